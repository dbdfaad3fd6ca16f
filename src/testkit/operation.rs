//! Fake [`ScraperOperation`] implementations for driving the dispatcher,
//! poller kernel, and agent executor without a real scraping backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::dispatcher::ScraperOperation;
use crate::error::{Error, Result};

/// Returns the next value from a pre-loaded queue each call, repeating the
/// last value once exhausted. The poller kernel tests use this to script a
/// sequence of "first poll sees t1,t2,t3; second poll sees t2,t3,t4" style
/// observations.
pub struct ScriptedOperation {
    results: Mutex<VecDeque<Result<serde_json::Value>>>,
    last: Mutex<Option<Result<serde_json::Value>>>,
    calls: AtomicU32,
}

impl ScriptedOperation {
    #[must_use]
    pub fn new(results: Vec<serde_json::Value>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().map(Ok).collect()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScraperOperation for ScriptedOperation {
    async fn run(&self, _page_id: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.results.lock().pop_front() {
            let cloned = match &next {
                Ok(v) => Ok(v.clone()),
                Err(_) => Err(Error::Fatal("scripted error is not cloneable".into())),
            };
            *self.last.lock() = Some(cloned);
            return next;
        }
        match &*self.last.lock() {
            Some(Ok(v)) => Ok(v.clone()),
            _ => Ok(serde_json::json!({})),
        }
    }
}

/// Returns `args` unchanged as the result, recording how many times it was
/// invoked.
pub struct EchoOperation {
    calls: AtomicU32,
}

impl Default for EchoOperation {
    fn default() -> Self {
        Self { calls: AtomicU32::new(0) }
    }
}

impl EchoOperation {
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScraperOperation for EchoOperation {
    async fn run(&self, _page_id: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(args)
    }
}

/// Sleeps longer than any reasonable dispatcher timeout, for exercising
/// `OperationRegistry::run_operation`'s timeout-to-`Transient`
/// classification.
pub struct SlowOperation(pub Duration);

impl Default for SlowOperation {
    fn default() -> Self {
        Self(Duration::from_secs(10))
    }
}

#[async_trait]
impl ScraperOperation for SlowOperation {
    async fn run(&self, _page_id: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
        tokio::time::sleep(self.0).await;
        Ok(serde_json::json!({}))
    }
}

/// Always fails with the given error kind's representative [`Error`],
/// for exercising retry/backoff/pause classification paths.
pub struct FailingOperation(pub fn() -> Error);

#[async_trait]
impl ScraperOperation for FailingOperation {
    async fn run(&self, _page_id: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
        Err((self.0)())
    }
}
