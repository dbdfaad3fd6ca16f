//! Per-stream poll-and-diff kernel.
//!
//! One [`PollerKernel`] is armed per running stream by the Stream Manager.
//! Each tick acquires a combined in-process + store-backed single-flight
//! guard, throttles against the endpoint's rate window, dispatches the
//! stream's scraper operation through the browser pool, diffs the result
//! against the stream's seen-ring (or follower set), and emits events for
//! whatever is new.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::dispatcher::OperationRegistry;
use crate::core::domain::{new_id, Event, SeenRing, Stream, StreamKind};
use crate::core::events::EventBus;
use crate::core::pool::BrowserPool;
use crate::core::rate::RateLimitRegistry;
use crate::core::state::{get_json, set_json, StateStore};
use crate::error::{Error, Result};

const SEVEN_DAYS: Duration = Duration::from_secs(7 * 24 * 3600);

/// Names of the scraper operations a poller dispatches, keyed by the
/// stream's kind. Overridable so a deployment can register differently
/// named operations without touching the kernel.
#[derive(Debug, Clone)]
pub struct OperationNames {
    pub tweet_list: String,
    pub mention_search: String,
    pub follower_list: String,
    pub follower_count: String,
}

impl Default for OperationNames {
    fn default() -> Self {
        Self {
            tweet_list: "list-tweets-by-user".into(),
            mention_search: "search-mentions".into(),
            follower_list: "list-followers".into(),
            follower_count: "extract-follower-count".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub seen_ring_capacity: usize,
    pub backoff_cap: Duration,
    pub max_consecutive_errors: u32,
    pub operation_timeout: Duration,
    pub lock_margin: Duration,
    pub operations: OperationNames,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            seen_ring_capacity: 500,
            backoff_cap: Duration::from_secs(900),
            max_consecutive_errors: 10,
            operation_timeout: Duration::from_secs(20),
            lock_margin: Duration::from_secs(10),
            operations: OperationNames::default(),
        }
    }
}

#[derive(Deserialize)]
struct TweetItem {
    id: String,
    author: String,
    text: String,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ItemListResult {
    #[serde(default)]
    items: Vec<TweetItem>,
}

#[derive(Deserialize)]
struct FollowerListResult {
    #[serde(default)]
    followers: Vec<String>,
}

#[derive(Deserialize)]
struct FollowerCountResult {
    count: u64,
}

/// What happened on one tick, used by the Stream Manager's run loop to
/// decide what to do with the stream next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Poll succeeded, or was skipped because the single-flight guard was
    /// already held elsewhere.
    Progressed,
    /// A retryable error pushed the stream into backoff.
    Backoff,
    /// A non-retryable auth failure paused the stream.
    Paused,
    /// The stream hit its consecutive-error cap, or observed a permanent
    /// failure (`NotFound`), and was stopped.
    Stopped,
}

/// The per-stream poll-and-diff kernel.
pub struct PollerKernel {
    pub stream_id: String,
    kind: StreamKind,
    target: String,
    config: PollerConfig,
    owner_token: String,
    store: Arc<dyn StateStore>,
    pool: Arc<BrowserPool>,
    operations: Arc<OperationRegistry>,
    rate: Arc<RateLimitRegistry>,
    bus: Arc<EventBus>,
    in_flight: AtomicBool,
    seq: AtomicU64,
    ring: parking_lot::Mutex<SeenRing>,
}

impl PollerKernel {
    /// Construct a kernel and rebuild its dedup state from the store (used
    /// both for a brand-new stream, where the ring/set starts empty, and
    /// for restart replay, where it's repopulated from persisted data).
    pub async fn new(
        stream_id: String,
        kind: StreamKind,
        target: String,
        config: PollerConfig,
        store: Arc<dyn StateStore>,
        pool: Arc<BrowserPool>,
        operations: Arc<OperationRegistry>,
        rate: Arc<RateLimitRegistry>,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        let mut ring = SeenRing::with_capacity(config.seen_ring_capacity);
        if matches!(kind, StreamKind::Tweet | StreamKind::Mention) {
            for id in store.list_range(&format!("stream:{stream_id}:seen")).await? {
                ring.push(id);
            }
        }
        Ok(Self {
            owner_token: new_id("poller"),
            stream_id,
            kind,
            target,
            config,
            store,
            pool,
            operations,
            rate,
            bus,
            in_flight: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            ring: parking_lot::Mutex::new(ring),
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn endpoint(&self) -> &'static str {
        match self.kind {
            StreamKind::Tweet => "stream:tweet",
            StreamKind::Follower => "stream:follower",
            StreamKind::Mention => "stream:mention",
        }
    }

    /// Run one tick against `stream`, mutating it in place with the updated
    /// lifecycle fields. `cancel` is raced against every suspension point so
    /// a `stop` from the Stream Manager unblocks promptly.
    #[instrument(skip_all, fields(stream_id = %self.stream_id))]
    pub async fn tick(&self, stream: &mut Stream, cancel: &mut CancelToken) -> TickOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return TickOutcome::Progressed;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let lock_key = format!("stream:{}:lock", self.stream_id);
        let lock_ttl = stream.interval + self.config.lock_margin;
        let token = match self.store.lock(&lock_key, &self.owner_token, lock_ttl).await {
            Ok(Some(token)) => token,
            Ok(None) => return TickOutcome::Progressed,
            Err(e) => {
                warn!(error = %e, "failed to acquire store-backed poll lock");
                return TickOutcome::Progressed;
            }
        };

        let result = self.try_tick(stream, cancel).await;
        if let Err(e) = self.store.unlock(&lock_key, &token).await {
            warn!(error = %e, "failed to release store-backed poll lock");
        }

        match result {
            Ok(()) => {
                stream.consecutive_errors = 0;
                stream.backoff_until = None;
                stream.last_poll_at = Some(Utc::now());
                info!("poll completed");
                TickOutcome::Progressed
            }
            Err(e) => self.handle_error(stream, e),
        }
    }

    fn handle_error(&self, stream: &mut Stream, err: Error) -> TickOutcome {
        let kind = err.kind();
        warn!(error = %err, ?kind, "poll failed");
        self.publish_error_event(stream, &err);

        if matches!(kind, crate::error::Kind::NotFound) {
            stream.stopped = true;
            return TickOutcome::Stopped;
        }
        if matches!(kind, crate::error::Kind::AuthExpired | crate::error::Kind::Unauthorized) {
            stream.paused = true;
            return TickOutcome::Paused;
        }
        if !kind.retryable() {
            stream.stopped = true;
            return TickOutcome::Stopped;
        }

        stream.consecutive_errors += 1;
        if stream.consecutive_errors >= self.config.max_consecutive_errors {
            stream.stopped = true;
            return TickOutcome::Stopped;
        }
        let base = stream.interval;
        let jitter_s = rand::thread_rng().gen_range(0..=base.as_secs().max(1) / 2);
        stream.backoff_until = Some(stream.next_backoff(base, self.config.backoff_cap, jitter_s));
        TickOutcome::Backoff
    }

    fn publish_error_event(&self, stream: &Stream, err: &Error) {
        let event = Event {
            stream_id: self.stream_id.clone(),
            topic: "stream:error".to_string(),
            payload: json!({ "kind": format!("{:?}", err.kind()), "message": err.to_string() }),
            timestamp: Utc::now(),
            sequence: self.next_seq(),
        };
        self.bus.publish(event);
        let _ = stream; // kept for future enrichment of the payload with stream fields
    }

    async fn try_tick(&self, stream: &mut Stream, cancel: &mut CancelToken) -> Result<()> {
        tokio::select! {
            () = self.rate.throttle(self.endpoint()) => {}
            () = cancel.cancelled() => return Err(Error::Transient("cancelled during throttle".into())),
        }

        if self.kind == StreamKind::Follower && self.fast_path_unchanged(stream, cancel).await? {
            return Ok(());
        }

        let page = tokio::select! {
            res = self.pool.acquire_page() => res?,
            () = cancel.cancelled() => return Err(Error::Transient("cancelled during page acquire".into())),
        };

        let operation_name = match self.kind {
            StreamKind::Tweet => &self.config.operations.tweet_list,
            StreamKind::Mention => &self.config.operations.mention_search,
            StreamKind::Follower => &self.config.operations.follower_list,
        };
        let args = json!({ "target": self.target });
        let outcome = self
            .operations
            .run_operation(operation_name, &page.page_id, args, self.config.operation_timeout)
            .await;
        page.release().await;
        let value = outcome?;

        match self.kind {
            StreamKind::Tweet | StreamKind::Mention => self.diff_items(stream, value).await,
            StreamKind::Follower => self.diff_followers(stream, value).await,
        }
    }

    /// Follower-only fast path: a lightweight count check that skips the
    /// expensive full list call when nothing has changed.
    async fn fast_path_unchanged(&self, stream: &mut Stream, cancel: &mut CancelToken) -> Result<bool> {
        let page = tokio::select! {
            res = self.pool.acquire_page() => res?,
            () = cancel.cancelled() => return Err(Error::Transient("cancelled during fast-path acquire".into())),
        };
        let args = json!({ "target": self.target });
        let outcome = self
            .operations
            .run_operation(&self.config.operations.follower_count, &page.page_id, args, self.config.operation_timeout)
            .await;
        page.release().await;
        let value = outcome?;
        let count: FollowerCountResult = serde_json::from_value(value)
            .map_err(|e| Error::ScraperMissing { operation: self.config.operations.follower_count.clone(), reason: e.to_string() })?;

        let count_key = format!("stream:{}:follower_count", self.stream_id);
        let previous: Option<u64> = get_json(self.store.as_ref(), &count_key).await?;

        if let Some(prev) = previous {
            if prev > 0 && count.count == 0 {
                // A previously nonzero follower count dropping to zero looks
                // like account suspension or a lock, not a genuine mass
                // unfollow; surface it rather than emitting the diff.
                return Err(Error::AuthExpired);
            }
            if prev == count.count {
                set_json(self.store.as_ref(), &count_key, &count.count, Some(SEVEN_DAYS)).await?;
                return Ok(true);
            }
        }

        set_json(self.store.as_ref(), &count_key, &count.count, Some(SEVEN_DAYS)).await?;
        Ok(false)
    }

    async fn diff_items(&self, _stream: &mut Stream, value: serde_json::Value) -> Result<()> {
        let parsed: ItemListResult = serde_json::from_value(value)
            .map_err(|e| Error::ScraperMissing { operation: "parse item list".into(), reason: e.to_string() })?;

        let topic = match self.kind {
            StreamKind::Tweet => "stream:tweet",
            StreamKind::Mention => "stream:mention",
            StreamKind::Follower => unreachable!(),
        };

        let mut ring = self.ring.lock();
        for item in parsed.items {
            if ring.contains(&item.id) {
                continue;
            }
            let event = Event {
                stream_id: self.stream_id.clone(),
                topic: topic.to_string(),
                payload: json!({
                    "stream_id": self.stream_id,
                    "item_id": item.id,
                    "author": item.author,
                    "text": item.text,
                    "created_at": item.created_at,
                }),
                timestamp: Utc::now(),
                sequence: self.next_seq(),
            };
            self.bus.publish(event.clone());
            self.store
                .list_append_capped(
                    &format!("stream:{}:events", self.stream_id),
                    serde_json::to_string(&event).unwrap_or_default(),
                    512,
                )
                .await?;
            self.store
                .list_append_capped(&format!("stream:{}:seen", self.stream_id), item.id.clone(), self.config.seen_ring_capacity)
                .await?;
            ring.push(item.id);
        }
        Ok(())
    }

    async fn diff_followers(&self, stream: &mut Stream, value: serde_json::Value) -> Result<()> {
        let parsed: FollowerListResult = serde_json::from_value(value)
            .map_err(|e| Error::ScraperMissing { operation: "parse follower list".into(), reason: e.to_string() })?;
        let observed: HashSet<String> = parsed.followers.into_iter().collect();

        let key = format!("stream:{}:followers", self.stream_id);
        let previous: HashSet<String> = get_json(self.store.as_ref(), &key).await?.unwrap_or_default();

        let mut followed: Vec<&String> = observed.difference(&previous).collect();
        let mut unfollowed: Vec<&String> = previous.difference(&observed).collect();
        followed.sort();
        unfollowed.sort();

        for follower in followed {
            self.emit_follower_event(follower, "follow").await?;
        }
        for follower in unfollowed {
            self.emit_follower_event(follower, "unfollow").await?;
        }

        set_json(self.store.as_ref(), &key, &observed, Some(SEVEN_DAYS)).await?;
        let _ = stream;
        Ok(())
    }

    async fn emit_follower_event(&self, follower: &str, action: &str) -> Result<()> {
        let event = Event {
            stream_id: self.stream_id.clone(),
            topic: "stream:follower".to_string(),
            payload: json!({
                "stream_id": self.stream_id,
                "action": action,
                "follower": follower,
                "observed_at": Utc::now(),
            }),
            timestamp: Utc::now(),
            sequence: self.next_seq(),
        };
        self.bus.publish(event.clone());
        self.store
            .list_append_capped(
                &format!("stream:{}:events", self.stream_id),
                serde_json::to_string(&event).unwrap_or_default(),
                512,
            )
            .await
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::ScraperOperation;
    use crate::core::pool::{BrowserDriver, BrowserHandleRef, BrowserPool, BrowserPoolConfig};
    use crate::core::state::MemoryStateStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use std::time::Duration as StdDuration;

    struct FakeHandle;
    #[async_trait]
    impl BrowserHandleRef for FakeHandle {
        async fn is_connected(&self) -> bool {
            true
        }
        async fn open_page(&self) -> Result<String> {
            Ok(new_id("page"))
        }
        async fn close_page(&self, _page_id: &str) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }
    struct FakeDriver;
    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn launch(&self) -> Result<Box<dyn BrowserHandleRef>> {
            Ok(Box::new(FakeHandle))
        }
    }

    struct ListTweets(StdAtomicBool);
    #[async_trait]
    impl ScraperOperation for ListTweets {
        async fn run(&self, _page_id: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
            let items = if !self.0.swap(true, Ordering::SeqCst) {
                json!({"items": [
                    {"id": "t1", "author": "a", "text": "hi", "created_at": Utc::now()},
                    {"id": "t2", "author": "a", "text": "yo", "created_at": Utc::now()},
                ]})
            } else {
                json!({"items": [
                    {"id": "t2", "author": "a", "text": "yo", "created_at": Utc::now()},
                    {"id": "t3", "author": "a", "text": "new", "created_at": Utc::now()},
                ]})
            };
            Ok(items)
        }
    }

    fn harness() -> (Arc<MemoryStateStore>, Arc<BrowserPool>, Arc<RateLimitRegistry>, Arc<EventBus>) {
        let store = Arc::new(MemoryStateStore::new());
        let pool = BrowserPool::new(Arc::new(FakeDriver), BrowserPoolConfig::default());
        let rate = Arc::new(RateLimitRegistry::new(crate::core::rate::Strategy::Wait, StdDuration::from_secs(60)));
        let bus = Arc::new(EventBus::new(100));
        (store, pool, rate, bus)
    }

    #[tokio::test]
    async fn bootstrap_poll_emits_all_and_increment_emits_one() {
        let (store, pool, rate, bus) = harness();
        let mut operations = OperationRegistry::new();
        operations.register("list-tweets-by-user", Box::new(ListTweets(StdAtomicBool::new(false))));
        let operations = Arc::new(operations);

        let kernel = PollerKernel::new(
            "stream_tweet_alpha_1".into(),
            StreamKind::Tweet,
            "alpha".into(),
            PollerConfig::default(),
            store.clone(),
            pool.clone(),
            operations,
            rate,
            bus.clone(),
        )
        .await
        .unwrap();

        let mut stream = Stream::new(StreamKind::Tweet, "alpha", StdDuration::from_secs(60));
        stream.id = "stream_tweet_alpha_1".into();
        let (_src, mut cancel) = crate::core::cancel::pair();
        let mut rx = bus.join(&stream.id.clone());

        let outcome = kernel.tick(&mut stream, &mut cancel).await;
        assert_eq!(outcome, TickOutcome::Progressed);
        let e1 = rx.recv().await.unwrap();
        let e2 = rx.recv().await.unwrap();
        assert_eq!(e1.payload["item_id"], "t1");
        assert_eq!(e2.payload["item_id"], "t2");

        let outcome2 = kernel.tick(&mut stream, &mut cancel).await;
        assert_eq!(outcome2, TickOutcome::Progressed);
        let e3 = rx.recv().await.unwrap();
        assert_eq!(e3.payload["item_id"], "t3");
        assert!(rx.try_recv().is_err());
    }

    struct FixedTweets(&'static [&'static str]);
    #[async_trait]
    impl ScraperOperation for FixedTweets {
        async fn run(&self, _page_id: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
            Ok(json!({"items": self.0.iter().map(|id| json!({
                "id": id, "author": "a", "text": "post", "created_at": Utc::now(),
            })).collect::<Vec<_>>()}))
        }
    }

    /// A fresh kernel built against the same store rebuilds its seen-ring
    /// from persisted state, so a poll straddling a process restart never
    /// re-emits items the prior process already saw.
    #[tokio::test]
    async fn kernel_rebuilt_from_store_does_not_replay_seen_items() {
        let (store, pool, rate, bus) = harness();
        let mut stream = Stream::new(StreamKind::Tweet, "alpha", StdDuration::from_secs(60));
        stream.id = "stream_tweet_alpha_restart".into();

        let mut before_ops = OperationRegistry::new();
        before_ops.register("list-tweets-by-user", Box::new(FixedTweets(&["t7", "t8", "t9"])));
        let kernel_before = PollerKernel::new(
            stream.id.clone(),
            StreamKind::Tweet,
            "alpha".into(),
            PollerConfig::default(),
            store.clone(),
            pool.clone(),
            Arc::new(before_ops),
            rate.clone(),
            bus.clone(),
        )
        .await
        .unwrap();
        let (_src, mut cancel) = crate::core::cancel::pair();
        let mut rx = bus.join(&stream.id.clone());
        let outcome = kernel_before.tick(&mut stream, &mut cancel).await;
        assert_eq!(outcome, TickOutcome::Progressed);
        for expected in ["t7", "t8", "t9"] {
            assert_eq!(rx.recv().await.unwrap().payload["item_id"], expected);
        }
        drop(kernel_before);

        // Simulate a restart: a brand-new kernel instance, same stream id,
        // same backing store.
        let mut after_ops = OperationRegistry::new();
        after_ops.register("list-tweets-by-user", Box::new(FixedTweets(&["t8", "t9", "t10"])));
        let kernel_after = PollerKernel::new(
            stream.id.clone(),
            StreamKind::Tweet,
            "alpha".into(),
            PollerConfig::default(),
            store.clone(),
            pool,
            Arc::new(after_ops),
            rate,
            bus,
        )
        .await
        .unwrap();
        let outcome2 = kernel_after.tick(&mut stream, &mut cancel).await;
        assert_eq!(outcome2, TickOutcome::Progressed);
        assert_eq!(rx.recv().await.unwrap().payload["item_id"], "t10");
        assert!(rx.try_recv().is_err());
    }

    struct FollowerList(Vec<&'static str>);
    #[async_trait]
    impl ScraperOperation for FollowerList {
        async fn run(&self, _page_id: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
            Ok(json!({ "followers": self.0 }))
        }
    }

    #[tokio::test]
    async fn follower_diff_emits_follow_and_unfollow() {
        let (store, pool, rate, bus) = harness();
        let mut operations = OperationRegistry::new();
        operations.register("list-followers", Box::new(FollowerList(vec!["b", "c", "d"])));
        let operations = Arc::new(operations);

        let kernel = PollerKernel::new(
            "stream_follower_alpha_1".into(),
            StreamKind::Follower,
            "alpha".into(),
            PollerConfig::default(),
            store.clone(),
            pool.clone(),
            operations,
            rate,
            bus.clone(),
        )
        .await
        .unwrap();

        store
            .set(
                "stream:stream_follower_alpha_1:followers",
                &HashSet::from(["a".to_string(), "b".to_string(), "c".to_string()]),
                None,
            )
            .await
            .unwrap();

        let mut stream = Stream::new(StreamKind::Follower, "alpha", StdDuration::from_secs(60));
        stream.id = "stream_follower_alpha_1".into();
        let (_src, mut cancel) = crate::core::cancel::pair();
        let mut rx = bus.join(&stream.id.clone());

        kernel.tick(&mut stream, &mut cancel).await;
        let mut follows = Vec::new();
        let mut unfollows = Vec::new();
        for _ in 0..2 {
            let e = rx.recv().await.unwrap();
            match e.payload["action"].as_str().unwrap() {
                "follow" => follows.push(e.payload["follower"].as_str().unwrap().to_string()),
                "unfollow" => unfollows.push(e.payload["follower"].as_str().unwrap().to_string()),
                _ => unreachable!(),
            }
        }
        assert_eq!(follows, vec!["d".to_string()]);
        assert_eq!(unfollows, vec!["a".to_string()]);
    }
}
