//! Builders for domain primitives used across tests: streams, tweet/follower
//! payloads, and activity slots, so tests focus on assertions rather than
//! construction boilerplate.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use crate::core::domain::{ActivityKind, ActivitySlot, Stream, StreamKind};

/// Build a tweet-stream [`Stream`] with a fixed id for a given target,
/// bypassing the random suffix so tests can assert on it.
#[must_use]
pub fn stream(kind: StreamKind, target: &str, interval_secs: u64) -> Stream {
    let mut s = Stream::new(kind, target, Duration::from_secs(interval_secs));
    s.id = format!("stream_{}_{target}_test", kind.as_str());
    s
}

/// A `list-tweets-by-user`/`search-mentions`-shaped result carrying the
/// given item ids, with otherwise-fixed author/text/timestamp fields.
#[must_use]
pub fn item_list(ids: &[&str]) -> Value {
    json!({
        "items": ids.iter().map(|id| json!({
            "id": id,
            "author": "tester",
            "text": format!("post {id}"),
            "created_at": Utc::now(),
        })).collect::<Vec<_>>()
    })
}

/// A `list-followers`-shaped result.
#[must_use]
pub fn follower_list(names: &[&str]) -> Value {
    json!({ "followers": names })
}

/// An `extract-follower-count`-shaped result.
#[must_use]
pub fn follower_count(count: u64) -> Value {
    json!({ "count": count })
}

/// A minimal non-sleep activity slot, for agent orchestrator tests that
/// don't care about circadian scheduling.
#[must_use]
pub fn activity_slot(kind: ActivityKind) -> ActivitySlot {
    ActivitySlot { kind, scheduled_for: Utc::now(), duration: Duration::from_secs(60), intensity: 0.5, argument: None }
}
