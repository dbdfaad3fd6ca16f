//! Fake [`BrowserDriver`]/[`BrowserHandleRef`] implementations for exercising
//! the [`BrowserPool`](crate::core::pool::BrowserPool) and anything built on
//! top of it without a real automation backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::domain::new_id;
use crate::core::pool::{BrowserDriver, BrowserHandleRef};
use crate::error::{Error, Result};

/// A handle that is always connected and opens/closes pages without
/// tracking anything. Good enough for tests that only care about pool
/// bookkeeping (handle/page counts), not page identity.
pub struct FakeHandle {
    connected: AtomicBool,
}

impl Default for FakeHandle {
    fn default() -> Self {
        Self { connected: AtomicBool::new(true) }
    }
}

#[async_trait]
impl BrowserHandleRef for FakeHandle {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
    async fn open_page(&self) -> Result<String> {
        Ok(new_id("page"))
    }
    async fn close_page(&self, _page_id: &str) -> Result<()> {
        Ok(())
    }
    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A driver that launches an unlimited number of [`FakeHandle`]s, never
/// failing. The default choice for tests that exercise pool capacity limits
/// but don't care about launch failures.
pub struct FakeDriver {
    launches: AtomicU32,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self { launches: AtomicU32::new(0) }
    }
}

impl FakeDriver {
    #[must_use]
    pub fn launch_count(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch(&self) -> Result<Box<dyn BrowserHandleRef>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle::default()))
    }
}

/// A handle whose connectivity can be externally flipped, for tests that
/// need the pool's maintenance tick to detect and prune a disconnect.
pub struct ToggleHandle {
    pub connected: Arc<AtomicBool>,
}

#[async_trait]
impl BrowserHandleRef for ToggleHandle {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
    async fn open_page(&self) -> Result<String> {
        Ok(new_id("page"))
    }
    async fn close_page(&self, _page_id: &str) -> Result<()> {
        Ok(())
    }
    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A driver with a queue of pre-scripted launch outcomes, falling back to a
/// healthy [`FakeHandle`] once the queue is exhausted. Useful for testing
/// how the pool's `acquire_page` reacts to a launch that fails once then
/// succeeds.
pub struct ScriptedDriver {
    results: Mutex<VecDeque<Result<()>>>,
}

impl ScriptedDriver {
    #[must_use]
    pub fn new(results: Vec<Result<()>>) -> Self {
        Self { results: Mutex::new(results.into()) }
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn launch(&self) -> Result<Box<dyn BrowserHandleRef>> {
        let next = self.results.lock().pop_front();
        match next {
            Some(Ok(())) | None => Ok(Box::new(FakeHandle::default())),
            Some(Err(_)) => Err(Error::Transient("scripted launch failure".into())),
        }
    }
}
