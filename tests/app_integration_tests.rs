//! Library-level integration tests against the assembled [`App`], covering
//! the management surface end to end with the in-crate testkit fakes
//! standing in for a real browser/automation backend.

use std::time::Duration;

use xstreamd::app::{App, Config};
use xstreamd::core::dispatcher::OperationRegistry;
use xstreamd::core::domain::StreamKind;
use xstreamd::testkit::browser::FakeDriver;
use xstreamd::testkit::domain::item_list;
use xstreamd::testkit::operation::ScriptedOperation;
use std::sync::Arc;

fn app_with_operation(op: ScriptedOperation) -> Arc<App> {
    let mut operations = OperationRegistry::new();
    operations.register("list-tweets-by-user", Box::new(op));
    App::new(Config::default(), Arc::new(FakeDriver::default()), Arc::new(operations), None, None)
}

#[tokio::test]
async fn duplicate_stream_is_rejected_through_the_app_surface() {
    let app = app_with_operation(ScriptedOperation::new(vec![item_list(&[])]));

    let id1 = app.create_stream(StreamKind::Tweet, "alice".into(), Some(Duration::from_secs(60)), None).await.unwrap();
    let err = app.create_stream(StreamKind::Tweet, "alice".into(), Some(Duration::from_secs(30)), None).await.unwrap_err();
    assert!(matches!(err, xstreamd::error::Error::DuplicateStream { .. }));

    assert_eq!(app.list_streams().len(), 1);
    app.stop_stream(&id1).await.unwrap();
    assert!(app.list_streams().is_empty());
}

#[tokio::test]
async fn stopped_stream_slot_can_be_recreated() {
    let app = app_with_operation(ScriptedOperation::new(vec![item_list(&[])]));

    let id1 = app.create_stream(StreamKind::Tweet, "bob".into(), Some(Duration::from_secs(60)), Some("owner-a".into())).await.unwrap();
    app.stop_stream(&id1).await.unwrap();

    let id2 = app.create_stream(StreamKind::Tweet, "bob".into(), Some(Duration::from_secs(60)), Some("owner-b".into())).await.unwrap();
    assert_ne!(id1, id2);
    let restored = app.get_stream(&id2).unwrap();
    assert_eq!(restored.owner.as_deref(), Some("owner-b"));
    app.stop_stream(&id2).await.unwrap();
}

#[tokio::test]
async fn interval_out_of_bounds_is_rejected_at_the_app_surface() {
    let app = app_with_operation(ScriptedOperation::new(vec![item_list(&[])]));
    let err = app.create_stream(StreamKind::Tweet, "carol".into(), Some(Duration::from_secs(1)), None).await.unwrap_err();
    assert!(matches!(err, xstreamd::error::Error::Validation { .. }));
}

#[tokio::test]
async fn global_stats_reflect_created_and_stopped_streams() {
    let app = app_with_operation(ScriptedOperation::new(vec![item_list(&[])]));
    let id1 = app.create_stream(StreamKind::Tweet, "dave".into(), Some(Duration::from_secs(60)), None).await.unwrap();
    let id2 = app.create_stream(StreamKind::Follower, "erin".into(), Some(Duration::from_secs(60)), None).await.unwrap();

    let stats = app.global_stats();
    assert_eq!(stats.stream_count, 2);

    app.pause_stream(&id1).unwrap();
    let stats = app.global_stats();
    assert_eq!(stats.paused, 1);

    app.resume_stream(&id1).unwrap();
    app.stop_all_streams().await.unwrap();
    assert_eq!(app.list_streams().len(), 0);
    let _ = id2;
}

#[tokio::test]
async fn agent_login_without_session_collaborator_is_not_found() {
    let app = app_with_operation(ScriptedOperation::new(vec![item_list(&[])]));
    let err = app.agent_login("no-such-agent").await.unwrap_err();
    assert!(matches!(err, xstreamd::error::Error::NotFound(_)));
}
