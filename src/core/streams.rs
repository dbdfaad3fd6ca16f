//! Stream Manager: lifecycle of pollers, duplicate prevention, global
//! stats, and graceful restart replay.
//!
//! Grounded on the pool's `Arc<Inner>` + background-task shape: each armed
//! stream owns one spawned tokio task (its poller loop) plus a
//! [`CancelSource`]/[`CancelToken`] pair, tracked in a map the manager
//! mutates under a `parking_lot::RwLock`, mirroring how the browser pool
//! tracks its own handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::cancel::{self, CancelSource, CancelToken};
use crate::core::dispatcher::OperationRegistry;
use crate::core::domain::{stream_id, Event, Stream, StreamKind, StreamStatus};
use crate::core::events::EventBus;
use crate::core::poller::{PollerConfig, PollerKernel, TickOutcome};
use crate::core::pool::BrowserPool;
use crate::core::rate::RateLimitRegistry;
use crate::core::state::{LockToken, StateStore};
use crate::error::{Error, Result};

const SEVEN_DAYS: Duration = Duration::from_secs(7 * 24 * 3600);
const STREAM_INDEX_KEY: &str = "streams:index";
/// Effectively permanent: a `(kind, target)` reservation lasts until the
/// stream is explicitly stopped, which releases it.
const RESERVATION_TTL: Duration = Duration::from_secs(3650 * 24 * 3600);

#[derive(Debug, Clone)]
pub struct StreamManagerConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub default_interval: Duration,
    pub max_consecutive_errors: u32,
    pub backoff_cap: Duration,
    pub seen_ring_capacity: usize,
    pub stop_grace: Duration,
    pub poller: PollerConfig,
}

impl Default for StreamManagerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(15),
            max_interval: Duration::from_secs(3600),
            default_interval: Duration::from_secs(60),
            max_consecutive_errors: 10,
            backoff_cap: Duration::from_secs(900),
            seen_ring_capacity: 500,
            stop_grace: Duration::from_secs(5),
            poller: PollerConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub owner: Option<String>,
}

struct Armed {
    record: Arc<Mutex<Stream>>,
    cancel: CancelSource,
    handle: JoinHandle<()>,
    reservation_token: LockToken,
}

#[derive(Debug, Clone, Copy)]
pub struct GlobalStats {
    pub stream_count: usize,
    pub running: usize,
    pub paused: usize,
    pub backoff: usize,
    pub stopped: usize,
    pub pool_handles: usize,
    pub pool_pages_open: usize,
}

pub struct StreamManager {
    config: StreamManagerConfig,
    store: Arc<dyn StateStore>,
    pool: Arc<BrowserPool>,
    operations: Arc<OperationRegistry>,
    rate: Arc<RateLimitRegistry>,
    bus: Arc<EventBus>,
    armed: RwLock<HashMap<String, Armed>>,
    reservation_key_by_id: RwLock<HashMap<String, String>>,
}

impl StreamManager {
    #[must_use]
    pub fn new(
        config: StreamManagerConfig,
        store: Arc<dyn StateStore>,
        pool: Arc<BrowserPool>,
        operations: Arc<OperationRegistry>,
        rate: Arc<RateLimitRegistry>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            pool,
            operations,
            rate,
            bus,
            armed: RwLock::new(HashMap::new()),
            reservation_key_by_id: RwLock::new(HashMap::new()),
        })
    }

    fn reservation_key(kind: StreamKind, target: &str) -> String {
        format!("streamkey:{}:{target}", kind.as_str())
    }

    /// Create a new stream, atomically reserving `(kind, target)` via a
    /// long-lived store lock so the check holds even across process
    /// restarts, not just within this manager's in-memory map.
    pub async fn create(self: &Arc<Self>, kind: StreamKind, target: String, interval: Duration, options: CreateOptions) -> Result<String> {
        if interval < self.config.min_interval || interval > self.config.max_interval {
            return Err(Error::Validation { field: "interval", reason: format!("must be between {:?} and {:?}", self.config.min_interval, self.config.max_interval) });
        }
        let id = stream_id(kind, &target);
        let res_key = Self::reservation_key(kind, &target);
        let token = self
            .store
            .lock(&res_key, &id, RESERVATION_TTL)
            .await?
            .ok_or_else(|| Error::DuplicateStream { kind: kind.as_str().to_string(), target: target.clone() })?;

        let mut stream = Stream::new(kind, target, interval);
        stream.id = id.clone();
        stream.owner = options.owner;

        if let Err(e) = self.persist_and_arm(stream.clone(), token.clone()).await {
            let _ = self.store.unlock(&res_key, &token).await;
            return Err(e);
        }
        info!(stream_id = %id, kind = kind.as_str(), target = %stream.target, "stream created");
        Ok(id)
    }

    async fn persist_and_arm(self: &Arc<Self>, stream: Stream, reservation_token: LockToken) -> Result<()> {
        self.store.set_add(STREAM_INDEX_KEY, stream.id.clone()).await?;
        crate::core::state::set_json(self.store.as_ref(), &format!("stream:{}", stream.id), &stream, Some(SEVEN_DAYS)).await?;
        // Persisted alongside the record so `restart_replay` can reassert the
        // real `(kind, target)` reservation after a process restart instead
        // of inventing a token that would never match the one `create` used.
        crate::core::state::set_json(
            self.store.as_ref(),
            &format!("stream:{}:reservation_token", stream.id),
            &reservation_token,
            Some(RESERVATION_TTL),
        )
        .await?;
        self.reservation_key_by_id
            .write()
            .insert(stream.id.clone(), Self::reservation_key(stream.kind, &stream.target));
        self.arm(stream, reservation_token).await
    }

    async fn arm(self: &Arc<Self>, stream: Stream, reservation_token: LockToken) -> Result<()> {
        let stream_id = stream.id.clone();
        let kernel = Arc::new(
            PollerKernel::new(
                stream_id.clone(),
                stream.kind,
                stream.target.clone(),
                self.config.poller.clone(),
                self.store.clone(),
                self.pool.clone(),
                self.operations.clone(),
                self.rate.clone(),
                self.bus.clone(),
            )
            .await?,
        );
        let record = Arc::new(Mutex::new(stream));
        let (source, token) = cancel::pair();

        let manager = self.clone();
        let record_for_task = record.clone();
        let handle = tokio::spawn(run_loop(manager, stream_id.clone(), kernel, record_for_task, token));

        self.armed.write().insert(stream_id, Armed { record, cancel: source, handle, reservation_token });
        Ok(())
    }

    #[must_use]
    pub fn list(&self) -> Vec<Stream> {
        self.armed.read().values().map(|a| a.record.lock().clone()).collect()
    }

    #[must_use]
    pub fn status(&self, id: &str) -> Option<Stream> {
        self.armed.read().get(id).map(|a| a.record.lock().clone())
    }

    pub fn pause(&self, id: &str) -> Result<()> {
        let armed = self.armed.read();
        let entry = armed.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        entry.record.lock().paused = true;
        Ok(())
    }

    pub fn resume(&self, id: &str) -> Result<()> {
        let armed = self.armed.read();
        let entry = armed.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        let mut record = entry.record.lock();
        record.paused = false;
        record.backoff_until = None;
        Ok(())
    }

    pub fn update_interval(&self, id: &str, new_interval: Duration) -> Result<()> {
        if new_interval < self.config.min_interval || new_interval > self.config.max_interval {
            return Err(Error::Validation { field: "interval", reason: "out of configured bounds".into() });
        }
        let armed = self.armed.read();
        let entry = armed.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        entry.record.lock().interval = new_interval;
        Ok(())
    }

    /// Signal the stream's poller to stop, wait up to the configured grace
    /// period for it to unwind, then force teardown. A second `stop` on an
    /// already-absent stream is a no-op, matching the idempotence law.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let armed = self.armed.write().remove(id);
        let Some(armed) = armed else {
            return Ok(());
        };
        armed.cancel.cancel();
        armed.record.lock().stopped = true;
        let grace = self.config.stop_grace;
        if tokio::time::timeout(grace, armed.handle).await.is_err() {
            warn!(stream_id = id, "poller did not unwind within grace period, forcing teardown");
        }
        if let Some(res_key) = self.reservation_key_by_id.write().remove(id) {
            let _ = self.store.unlock(&res_key, &armed.reservation_token).await;
        }
        self.bus.remove_room(id);
        info!(stream_id = id, "stream stopped");
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<()> {
        let ids: Vec<String> = self.armed.read().keys().cloned().collect();
        for id in ids {
            self.stop(&id).await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn history(&self, id: &str, limit: usize, topic: Option<&str>) -> Vec<Event> {
        self.bus.history(id, topic, limit)
    }

    #[must_use]
    pub fn global_stats(&self) -> GlobalStats {
        let armed = self.armed.read();
        let mut stats = GlobalStats {
            stream_count: armed.len(),
            running: 0,
            paused: 0,
            backoff: 0,
            stopped: 0,
            pool_handles: 0,
            pool_pages_open: 0,
        };
        for a in armed.values() {
            match a.record.lock().status() {
                StreamStatus::Running => stats.running += 1,
                StreamStatus::Paused => stats.paused += 1,
                StreamStatus::Backoff => stats.backoff += 1,
                StreamStatus::Stopped => stats.stopped += 1,
            }
        }
        let pool_stats = self.pool.stats();
        stats.pool_handles = pool_stats.handles;
        stats.pool_pages_open = pool_stats.pages_open;
        stats
    }

    /// On process startup, re-arm a kernel for every persisted non-stopped
    /// stream. Restores `consecutive_errors`/`backoff_until` from the
    /// stored record and the seen-ring/follower-set from the store, so no
    /// duplicate events are emitted for already-observed items.
    pub async fn restart_replay(self: &Arc<Self>) -> Result<usize> {
        let ids = self.store.set_members(STREAM_INDEX_KEY).await?;
        let mut armed_count = 0;
        for id in ids {
            let Some(stream): Option<Stream> = crate::core::state::get_json(self.store.as_ref(), &format!("stream:{id}")).await? else {
                continue;
            };
            if stream.stopped {
                continue;
            }
            let res_key = Self::reservation_key(stream.kind, &stream.target);
            // Re-read the real fencing token `create` stored alongside the
            // record; a fabricated token would never match what `lock`
            // issued, so `stop` after a restart would silently fail to
            // release the `(kind, target)` reservation.
            let reservation_token: LockToken = match crate::core::state::get_json(
                self.store.as_ref(),
                &format!("stream:{id}:reservation_token"),
            )
            .await?
            {
                Some(token) => token,
                None => {
                    // No persisted token (e.g. pre-existing store state): the
                    // `(kind, target)` key is otherwise unheld, so reacquire it
                    // under a fresh token rather than leave the stream unarmed.
                    warn!(stream_id = %id, "no persisted reservation token found on restart; reacquiring");
                    match self.store.lock(&res_key, &id, RESERVATION_TTL).await? {
                        Some(token) => token,
                        None => {
                            warn!(stream_id = %id, "could not reacquire (kind, target) reservation on restart; leaving stream unarmed");
                            continue;
                        }
                    }
                }
            };
            self.reservation_key_by_id.write().insert(id.clone(), res_key.clone());
            self.arm(stream, reservation_token).await?;
            armed_count += 1;
        }
        info!(armed = armed_count, "restart replay complete");
        Ok(armed_count)
    }
}

/// The spawned per-stream task: sleeps until the next tick is due (honoring
/// pause/backoff/interval), then calls the kernel, persists the updated
/// record, and loops until cancelled or stopped.
async fn run_loop(
    manager: Arc<StreamManager>,
    stream_id: String,
    kernel: Arc<PollerKernel>,
    record: Arc<Mutex<Stream>>,
    mut cancel: CancelToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let (stopped, paused, wait) = {
            let s = record.lock();
            if s.stopped {
                (true, false, Duration::ZERO)
            } else if s.paused {
                (false, true, Duration::from_secs(5))
            } else {
                let now = Utc::now();
                let due_at = s.backoff_until.unwrap_or(now).max(s.last_poll_at.map_or(now, |t| t + chrono::Duration::from_std(s.interval).unwrap_or_default()));
                let wait = (due_at - now).to_std().unwrap_or(Duration::ZERO);
                (false, false, wait)
            }
        };
        if stopped {
            return;
        }
        if !cancel.sleep(wait.max(Duration::from_millis(1))).await {
            return;
        }
        if paused {
            continue;
        }

        let mut snapshot = record.lock().clone();
        if snapshot.paused || snapshot.stopped {
            continue;
        }
        let outcome = kernel.tick(&mut snapshot, &mut cancel).await;
        *record.lock() = snapshot.clone();

        if let Err(e) = crate::core::state::set_json(manager.store.as_ref(), &format!("stream:{stream_id}"), &snapshot, Some(SEVEN_DAYS)).await {
            warn!(stream_id = %stream_id, error = %e, "failed to persist stream record after tick");
        }

        if outcome == TickOutcome::Stopped {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::ScraperOperation;
    use crate::core::pool::{BrowserDriver, BrowserHandleRef, BrowserPoolConfig};
    use crate::core::rate::Strategy;
    use crate::core::state::MemoryStateStore;
    use async_trait::async_trait;

    struct FakeHandle;
    #[async_trait]
    impl BrowserHandleRef for FakeHandle {
        async fn is_connected(&self) -> bool {
            true
        }
        async fn open_page(&self) -> Result<String> {
            Ok("page".into())
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
    struct EmptyTweets;
    #[async_trait]
    impl ScraperOperation for EmptyTweets {
        async fn run(&self, _page_id: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "items": [] }))
        }
    }

    fn manager() -> Arc<StreamManager> {
        manager_with(Arc::new(MemoryStateStore::new()))
    }

    fn manager_with(store: Arc<dyn StateStore>) -> Arc<StreamManager> {
        let pool = BrowserPool::new(Arc::new(FakeDriver), BrowserPoolConfig::default());
        let mut operations = OperationRegistry::new();
        operations.register("list-tweets-by-user", Box::new(EmptyTweets));
        let rate = Arc::new(RateLimitRegistry::new(Strategy::Wait, Duration::from_secs(60)));
        let bus = Arc::new(EventBus::new(100));
        StreamManager::new(StreamManagerConfig::default(), store, pool, Arc::new(operations), rate, bus)
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let mgr = manager();
        let id1 = mgr.create(StreamKind::Tweet, "alpha".into(), Duration::from_secs(60), CreateOptions { owner: None }).await.unwrap();
        let err = mgr
            .create(StreamKind::Tweet, "alpha".into(), Duration::from_secs(30), CreateOptions { owner: None })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateStream { .. }));
        assert_eq!(mgr.list().len(), 1);
        let s = mgr.status(&id1).unwrap();
        assert_eq!(s.interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn interval_out_of_bounds_is_validation_error() {
        let mgr = manager();
        let err = mgr
            .create(StreamKind::Tweet, "alpha".into(), Duration::from_secs(5), CreateOptions { owner: None })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn create_stop_create_succeeds_both_times() {
        let mgr = manager();
        let id1 = mgr.create(StreamKind::Tweet, "alpha".into(), Duration::from_secs(60), CreateOptions { owner: None }).await.unwrap();
        mgr.stop(&id1).await.unwrap();
        assert!(mgr.status(&id1).is_none());
        let id2 = mgr.create(StreamKind::Tweet, "alpha".into(), Duration::from_secs(60), CreateOptions { owner: None }).await.unwrap();
        assert_ne!(id1, id2);
        mgr.stop(&id2).await.unwrap();
    }

    #[tokio::test]
    async fn double_stop_is_noop() {
        let mgr = manager();
        let id1 = mgr.create(StreamKind::Tweet, "alpha".into(), Duration::from_secs(60), CreateOptions { owner: None }).await.unwrap();
        mgr.stop(&id1).await.unwrap();
        mgr.stop(&id1).await.unwrap();
    }

    /// After a crash (no `stop` call), a fresh manager built against the
    /// same store re-arms every persisted non-stopped stream and skips ones
    /// that were already stopped.
    #[tokio::test]
    async fn restart_replay_rearms_persisted_non_stopped_streams_only() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let mgr1 = manager_with(store.clone());
        let keep = mgr1.create(StreamKind::Tweet, "alpha".into(), Duration::from_secs(3600), CreateOptions { owner: None }).await.unwrap();
        let drop_id = mgr1.create(StreamKind::Tweet, "beta".into(), Duration::from_secs(3600), CreateOptions { owner: None }).await.unwrap();
        mgr1.stop(&drop_id).await.unwrap();
        assert_eq!(mgr1.list().len(), 1);

        // Simulate a crash: mgr1 is dropped without stopping the surviving
        // stream, so its persisted record is never marked `stopped`.
        drop(mgr1);

        let mgr2 = manager_with(store);
        let armed = mgr2.restart_replay().await.unwrap();
        assert_eq!(armed, 1);
        assert!(mgr2.status(&keep).is_some());
        assert!(mgr2.status(&drop_id).is_none());
        mgr2.stop(&keep).await.unwrap();
    }

    /// A restart-replayed stream's `stop` must release the real `(kind,
    /// target)` reservation (not a fabricated token the store never issued),
    /// or recreating the same pair afterward would spuriously return
    /// `DuplicateStream`.
    #[tokio::test]
    async fn stop_after_restart_replay_releases_reservation_for_recreate() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let mgr1 = manager_with(store.clone());
        let id1 = mgr1.create(StreamKind::Tweet, "alpha".into(), Duration::from_secs(3600), CreateOptions { owner: None }).await.unwrap();
        drop(mgr1);

        let mgr2 = manager_with(store);
        assert_eq!(mgr2.restart_replay().await.unwrap(), 1);
        mgr2.stop(&id1).await.unwrap();

        let id2 = mgr2.create(StreamKind::Tweet, "alpha".into(), Duration::from_secs(3600), CreateOptions { owner: None }).await.unwrap();
        assert_ne!(id1, id2);
        mgr2.stop(&id2).await.unwrap();
    }

    #[tokio::test]
    async fn pause_then_resume_preserves_state() {
        let mgr = manager();
        let id1 = mgr.create(StreamKind::Tweet, "alpha".into(), Duration::from_secs(60), CreateOptions { owner: None }).await.unwrap();
        mgr.pause(&id1).unwrap();
        assert_eq!(mgr.status(&id1).unwrap().status(), StreamStatus::Paused);
        mgr.resume(&id1).unwrap();
        assert_eq!(mgr.status(&id1).unwrap().status(), StreamStatus::Running);
        mgr.stop(&id1).await.unwrap();
    }
}
