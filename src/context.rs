//! Scan-wide cancellation context

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation handle passed explicitly to every component that
/// may block: pool acquisition, transport calls and background loops.
#[derive(Debug, Clone)]
pub struct ScanContext {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ScanContext {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Cancels this context and every clone of it
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the context is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling: never resolves
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for ScanContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let ctx = ScanContext::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        assert!(!ctx.is_cancelled());
        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake up")
            .expect("task should not panic");
        assert!(ctx.is_cancelled());
    }
}
