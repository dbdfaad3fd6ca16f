//! Cooperative cancellation built on a `watch<bool>`, the same shutdown
//! idiom used for the whole process's ctrl-c handling.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

/// Cheaply cloneable cancellation signal. Every suspension point in the
/// poller kernel, browser pool, and agent orchestrator accepts one of these
/// and races it against whatever it's waiting on.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Owns the write side; dropping it or calling [`cancel`](CancelSource::cancel)
/// signals every clone of the paired [`CancelToken`].
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

#[must_use]
pub fn pair() -> (CancelSource, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelSource { tx }, CancelToken { rx })
}

impl CancelSource {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is signalled. Cheap to call repeatedly in
    /// a `select!` branch.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.rx.wait_for(|v| *v).await;
    }

    /// Sleep for `dur` unless cancelled first; returns `false` if cancelled
    /// early.
    pub async fn sleep(&mut self, dur: Duration) -> bool {
        tokio::select! {
            () = sleep(dur) => true,
            () = self.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_unblocks_waiter() {
        let (src, mut tok) = pair();
        let handle = tokio::spawn(async move {
            tok.cancelled().await;
        });
        src.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("did not unblock in time")
            .unwrap();
    }

    #[tokio::test]
    async fn sleep_returns_false_when_cancelled_early() {
        let (src, mut tok) = pair();
        let waiter = tokio::spawn(async move { tok.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        src.cancel();
        let completed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("sleep did not return promptly")
            .unwrap();
        assert!(!completed);
    }
}
