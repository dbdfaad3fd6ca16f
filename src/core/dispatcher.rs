//! Uniform invocation point for named scraper operations.
//!
//! Each operation is a single well-typed async function taking the page id
//! of an acquired [`PageLease`](crate::core::pool::PageLease) and opaque
//! JSON arguments, returning an opaque JSON result. The registry is a
//! closed, static map from name to operation, mirroring how the core treats
//! exchange/provider implementations as a fixed set of trait objects rather
//! than open-ended dynamic dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{Error, Result};

#[async_trait]
pub trait ScraperOperation: Send + Sync {
    async fn run(&self, page_id: &str, args: serde_json::Value) -> Result<serde_json::Value>;
}

pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn ScraperOperation>>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { operations: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, op: Box<dyn ScraperOperation>) {
        self.operations.insert(name.into(), Arc::from(op));
    }

    /// Look up and run `name` against `page_id`. The call runs on its own
    /// task so a panic inside the operation is caught here rather than
    /// unwinding the poller/orchestrator task that called us; it is mapped
    /// to [`Error::Fatal`]. A timeout is classified as a retryable
    /// [`Error::Transient`] rather than letting the caller hang.
    pub async fn run_operation(
        &self,
        name: &str,
        page_id: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let Some(op) = self.operations.get(name).cloned() else {
            return Err(Error::NotFound(format!("no such scraper operation: {name}")));
        };

        let page_id = page_id.to_string();
        let started = std::time::Instant::now();
        let task = tokio::spawn(async move { op.run(&page_id, args).await });
        let outcome = tokio::time::timeout(timeout, task).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(Ok(value))) => {
                info!(operation = name, ?elapsed, "scraper operation succeeded");
                Ok(value)
            }
            Ok(Ok(Err(e))) => {
                warn!(operation = name, ?elapsed, error = %e, "scraper operation failed");
                Err(e)
            }
            Ok(Err(join_err)) => {
                warn!(operation = name, ?elapsed, error = %join_err, "scraper operation panicked");
                Err(Error::Fatal(format!("scraper operation {name} panicked: {join_err}")))
            }
            Err(_) => {
                warn!(operation = name, ?elapsed, "scraper operation timed out");
                Err(Error::Transient(format!("operation {name} timed out after {elapsed:?}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct SlowOp;
    #[async_trait]
    impl ScraperOperation for SlowOp {
        async fn run(&self, _page_id: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(serde_json::json!({}))
        }
    }

    struct EchoOp(Arc<AtomicBool>);
    #[async_trait]
    impl ScraperOperation for EchoOp {
        async fn run(&self, _page_id: &str, args: serde_json::Value) -> Result<serde_json::Value> {
            self.0.store(true, Ordering::SeqCst);
            Ok(args)
        }
    }

    struct PanickingOp;
    #[async_trait]
    impl ScraperOperation for PanickingOp {
        async fn run(&self, _page_id: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
            panic!("scraper blew up");
        }
    }

    #[tokio::test]
    async fn unknown_operation_is_not_found() {
        let registry = OperationRegistry::new();
        let err = registry
            .run_operation("nope", "page-1", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn timeout_is_classified_as_transient() {
        let mut registry = OperationRegistry::new();
        registry.register("slow", Box::new(SlowOp));
        let err = registry
            .run_operation("slow", "page-1", serde_json::json!({}), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }

    #[tokio::test]
    async fn panic_is_caught_and_classified_as_fatal() {
        let mut registry = OperationRegistry::new();
        registry.register("boom", Box::new(PanickingOp));
        let err = registry
            .run_operation("boom", "page-1", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
    }

    #[tokio::test]
    async fn successful_run_returns_value() {
        let called = Arc::new(AtomicBool::new(false));
        let mut registry = OperationRegistry::new();
        registry.register("echo", Box::new(EchoOp(called.clone())));
        let out = registry
            .run_operation("echo", "page-1", serde_json::json!({"a": 1}), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(out, serde_json::json!({"a": 1}));
    }
}
