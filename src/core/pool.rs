//! Bounded pool of browser handles, each able to host a capped number of
//! concurrent pages.
//!
//! Grounded on the same shape as a pooled-connection manager: a shared
//! `Vec`/`VecDeque` of live resources guarded by a mutex, an atomic in-use
//! counter, and one background maintenance task that prunes resources past
//! their age or that have gone unhealthy. `PageLease` release is RAII — a
//! caller that forgets to release explicitly still frees the slot when the
//! guard drops.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::domain::{epoch_millis, new_id};
use crate::error::{Error, Result};

/// Abstraction over the underlying browser automation layer. The pool never
/// assumes a concrete driver; this is the seam that keeps headless-browser
/// automation itself out of scope.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Launch a new browser handle, returning an opaque driver-specific
    /// handle reference.
    async fn launch(&self) -> Result<Box<dyn BrowserHandleRef>>;
}

/// A live, driver-specific handle. `is_connected` backs health checks run by
/// the pool's maintenance tick; `open_page`/`close_page` bracket a page's
/// lifetime within the handle.
#[async_trait]
pub trait BrowserHandleRef: Send + Sync {
    async fn is_connected(&self) -> bool;
    async fn open_page(&self) -> Result<String>;
    async fn close_page(&self, page_id: &str) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

struct Handle {
    id: String,
    driver_ref: Arc<dyn BrowserHandleRef>,
    launched_at_ms: u128,
    pages_in_use: usize,
}

pub struct BrowserPoolConfig {
    pub max_handles: usize,
    pub max_pages_per_handle: usize,
    pub handle_max_age: Duration,
    pub acquire_timeout: Duration,
    pub maintenance_interval: Duration,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            max_handles: 3,
            max_pages_per_handle: 5,
            handle_max_age: Duration::from_secs(30 * 60),
            acquire_timeout: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(5),
        }
    }
}

struct Inner {
    config: BrowserPoolConfig,
    driver: Arc<dyn BrowserDriver>,
    handles: Mutex<Vec<Handle>>,
    handle_count: AtomicUsize,
    pages_open: AtomicUsize,
    next_lease_id: AtomicU64,
    released: Notify,
    shutdown: Notify,
}

pub struct BrowserPool {
    inner: Arc<Inner>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub handles: usize,
    pub pages_open: usize,
    pub max_handles: usize,
    pub oldest_age: Duration,
}

impl BrowserPool {
    #[must_use]
    pub fn new(driver: Arc<dyn BrowserDriver>, config: BrowserPoolConfig) -> Arc<Self> {
        let inner = Arc::new(Inner {
            config,
            driver,
            handles: Mutex::new(Vec::new()),
            handle_count: AtomicUsize::new(0),
            pages_open: AtomicUsize::new(0),
            next_lease_id: AtomicU64::new(0),
            released: Notify::new(),
            shutdown: Notify::new(),
        });
        let pool = Arc::new(Self { inner: inner.clone(), maintenance: Mutex::new(None) });
        let handle = tokio::spawn(maintenance_loop(inner));
        *pool.maintenance.lock() = Some(handle);
        pool
    }

    /// Acquire a page, waiting up to `acquire_timeout` for capacity.
    pub async fn acquire_page(self: &Arc<Self>) -> Result<PageLease> {
        let deadline = tokio::time::Instant::now() + self.inner.config.acquire_timeout;
        loop {
            if let Some(lease) = self.try_acquire().await? {
                return Ok(lease);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::PoolTimeout { waited_ms: self.inner.config.acquire_timeout.as_millis() as u64 });
            }
            tokio::select! {
                () = self.inner.released.notified() => {}
                () = tokio::time::sleep(remaining) => {}
            }
        }
    }

    async fn try_acquire(self: &Arc<Self>) -> Result<Option<PageLease>> {
        {
            let mut handles = self.inner.handles.lock();
            if let Some(handle) = handles
                .iter_mut()
                .find(|h| h.pages_in_use < self.inner.config.max_pages_per_handle)
            {
                let page_id = handle.driver_ref.open_page().await?;
                handle.pages_in_use += 1;
                self.inner.pages_open.fetch_add(1, Ordering::SeqCst);
                let lease_id = new_id("lease");
                debug!(handle_id = %handle.id, %lease_id, "page leased");
                return Ok(Some(PageLease {
                    id: lease_id,
                    handle_id: handle.id.clone(),
                    page_id,
                    pool: Arc::downgrade(self),
                    released: false,
                }));
            }
        }

        if self.inner.handle_count.load(Ordering::SeqCst) < self.inner.config.max_handles {
            self.launch_handle().await?;
            return Ok(None); // retry loop will pick up the freshly launched handle
        }

        Ok(None)
    }

    async fn launch_handle(self: &Arc<Self>) -> Result<()> {
        self.inner.handle_count.fetch_add(1, Ordering::SeqCst);
        let driver_ref: Arc<dyn BrowserHandleRef> = match self.inner.driver.launch().await {
            Ok(h) => h.into(),
            Err(e) => {
                self.inner.handle_count.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };
        let handle = Handle {
            id: new_id("handle"),
            driver_ref,
            launched_at_ms: epoch_millis(),
            pages_in_use: 0,
        };
        info!(handle_id = %handle.id, "browser handle launched");
        self.inner.handles.lock().push(handle);
        self.inner.released.notify_waiters();
        Ok(())
    }

    async fn release_page(&self, handle_id: &str, page_id: &str) {
        let driver_ref = {
            let handles = self.inner.handles.lock();
            handles.iter().find(|h| h.id == handle_id).map(|h| h.driver_ref.clone())
        };
        if let Some(driver_ref) = driver_ref {
            if let Err(e) = driver_ref.close_page(page_id).await {
                warn!(handle_id, error = %e, "error closing page");
            }
        }
        {
            let mut handles = self.inner.handles.lock();
            if let Some(h) = handles.iter_mut().find(|h| h.id == handle_id) {
                h.pages_in_use = h.pages_in_use.saturating_sub(1);
            }
        }
        self.inner.pages_open.fetch_sub(1, Ordering::SeqCst);
        self.inner.released.notify_waiters();
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let handles = self.inner.handles.lock();
        let oldest = handles
            .iter()
            .map(|h| epoch_millis().saturating_sub(h.launched_at_ms))
            .max()
            .unwrap_or(0);
        PoolStats {
            handles: handles.len(),
            pages_open: self.inner.pages_open.load(Ordering::SeqCst),
            max_handles: self.inner.config.max_handles,
            oldest_age: Duration::from_millis(oldest as u64),
        }
    }

    pub async fn shutdown(&self) {
        self.inner.shutdown.notify_waiters();
        let handles = std::mem::take(&mut *self.inner.handles.lock());
        for h in handles {
            if let Err(e) = h.driver_ref.close().await {
                warn!(handle_id = %h.id, error = %e, "error closing handle during shutdown");
            }
        }
        self.inner.handle_count.store(0, Ordering::SeqCst);
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
    }
}

async fn maintenance_loop(inner: Arc<Inner>) {
    let mut tick = tokio::time::interval(inner.config.maintenance_interval);
    loop {
        tokio::select! {
            () = inner.shutdown.notified() => return,
            _ = tick.tick() => {}
        }
        let mut stale = Vec::new();
        {
            let mut handles = inner.handles.lock();
            let max_age_ms = inner.config.handle_max_age.as_millis();
            handles.retain(|h| {
                let age = epoch_millis().saturating_sub(h.launched_at_ms);
                let evict_age = h.pages_in_use == 0 && age > max_age_ms;
                if evict_age {
                    stale.push(h.driver_ref.clone());
                }
                !evict_age
            });
        }
        for driver_ref in &stale {
            if !driver_ref.is_connected().await {
                continue;
            }
            if let Err(e) = driver_ref.close().await {
                warn!(error = %e, "error closing aged-out handle");
            }
        }
        if !stale.is_empty() {
            inner.handle_count.fetch_sub(stale.len(), Ordering::SeqCst);
            inner.released.notify_waiters();
        }

        // Prune handles that silently disconnected.
        let mut dead = Vec::new();
        {
            let handles = inner.handles.lock();
            for h in handles.iter() {
                if !h.driver_ref.is_connected().await {
                    dead.push(h.id.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut handles = inner.handles.lock();
            handles.retain(|h| !dead.contains(&h.id));
            inner.handle_count.fetch_sub(dead.len(), Ordering::SeqCst);
            inner.released.notify_waiters();
        }
    }
}

/// A scoped borrow of one page. Releases on drop if not released
/// explicitly, so a panicking caller never leaks pool capacity.
pub struct PageLease {
    pub id: String,
    pub handle_id: String,
    pub page_id: String,
    pool: std::sync::Weak<BrowserPool>,
    released: bool,
}

impl PageLease {
    pub async fn release(mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release_page(&self.handle_id, &self.page_id).await;
        }
        self.released = true;
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            let handle_id = self.handle_id.clone();
            let page_id = self.page_id.clone();
            tokio::spawn(async move {
                pool.release_page(&handle_id, &page_id).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct FakeHandle {
        connected: AtomicBool,
        pages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BrowserHandleRef for FakeHandle {
        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn open_page(&self) -> Result<String> {
            let id = new_id("page");
            self.pages.lock().push(id.clone());
            Ok(id)
        }
        async fn close_page(&self, page_id: &str) -> Result<()> {
            self.pages.lock().retain(|p| p != page_id);
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeDriver;

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn launch(&self) -> Result<Box<dyn BrowserHandleRef>> {
            Ok(Box::new(FakeHandle { connected: AtomicBool::new(true), pages: Mutex::new(Vec::new()) }))
        }
    }

    #[tokio::test]
    async fn acquire_launches_up_to_max_handles() {
        let pool = BrowserPool::new(
            Arc::new(FakeDriver),
            BrowserPoolConfig { max_handles: 2, max_pages_per_handle: 1, ..Default::default() },
        );
        let l1 = pool.acquire_page().await.unwrap();
        let l2 = pool.acquire_page().await.unwrap();
        assert_eq!(pool.stats().handles, 2);
        l1.release().await;
        l2.release().await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn acquire_times_out_when_saturated() {
        let pool = BrowserPool::new(
            Arc::new(FakeDriver),
            BrowserPoolConfig {
                max_handles: 1,
                max_pages_per_handle: 1,
                acquire_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        let _l1 = pool.acquire_page().await.unwrap();
        let err = pool.acquire_page().await.unwrap_err();
        assert!(matches!(err, Error::PoolTimeout { .. }));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn max_handles_zero_always_times_out() {
        let pool = BrowserPool::new(
            Arc::new(FakeDriver),
            BrowserPoolConfig { max_handles: 0, acquire_timeout: Duration::from_millis(20), ..Default::default() },
        );
        let err = pool.acquire_page().await.unwrap_err();
        assert!(matches!(err, Error::PoolTimeout { .. }));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn lease_drop_releases_capacity() {
        let pool = BrowserPool::new(
            Arc::new(FakeDriver),
            BrowserPoolConfig { max_handles: 1, max_pages_per_handle: 1, ..Default::default() },
        );
        {
            let _l1 = pool.acquire_page().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _l2 = pool.acquire_page().await.unwrap();
        pool.shutdown().await;
    }
}
