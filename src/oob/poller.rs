//! Background interaction poller
//!
//! Two buffers are kept: the hot buffer is extended every cycle with the
//! interactions received since the previous one, the cold buffer is
//! replaced by the full history every `resync_every` cycles. Searches never
//! block on the network.

use super::{Interaction, InteractionSource};
use crate::context::ScanContext;
use crate::models::BlindHostConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Hot buffer capacity; older entries remain reachable through the cold one
const HOT_CAPACITY: usize = 10_000;

pub struct BlindHostPoller {
    source: Arc<dyn InteractionSource>,
    hot: RwLock<Vec<Interaction>>,
    cold: RwLock<Vec<Interaction>>,
    interval: Duration,
    resync_every: u64,
    cycle_timeout: Duration,
    cycles: AtomicU64,
}

impl BlindHostPoller {
    pub fn new(source: Arc<dyn InteractionSource>, config: &BlindHostConfig) -> Self {
        Self {
            source,
            hot: RwLock::new(Vec::new()),
            cold: RwLock::new(Vec::new()),
            interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            resync_every: u64::from(config.resync_every.max(1)),
            cycle_timeout: Duration::from_secs(config.cycle_timeout_secs.max(1)),
            cycles: AtomicU64::new(0),
        }
    }

    /// Overrides the polling cadence, mostly useful in tests
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Starts the polling loop; it stops once `ctx` is cancelled
    pub fn spawn(self: &Arc<Self>, ctx: ScanContext) -> JoinHandle<()> {
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            info!("Blind host poller started (every {:?})", poller.interval);
            let mut ticker = tokio::time::interval(poller.interval);
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = ticker.tick() => poller.poll_once(&ctx).await,
                }
            }
            debug!("Blind host poller stopped");
        })
    }

    /// Runs one polling cycle. A cycle that fails or times out is logged
    /// and retried on the next tick.
    pub async fn poll_once(&self, ctx: &ScanContext) {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst);
        self.fetch_recent(ctx).await;
        if cycle % self.resync_every == 0 {
            self.resync(ctx).await;
        }
    }

    /// Out-of-cycle poll plus a full resync, so that searches right after it
    /// see every interaction received so far
    pub async fn refresh(&self, ctx: &ScanContext) {
        self.fetch_recent(ctx).await;
        self.resync(ctx).await;
    }

    async fn fetch_recent(&self, ctx: &ScanContext) {
        match tokio::time::timeout(self.cycle_timeout, self.source.fetch_recent(ctx)).await {
            Ok(Ok(recent)) => {
                if !recent.is_empty() {
                    debug!("Blind host poller received {} interactions", recent.len());
                    let mut hot = self.hot.write().unwrap_or_else(|e| e.into_inner());
                    hot.extend(recent);
                    let overflow = hot.len().saturating_sub(HOT_CAPACITY);
                    hot.drain(..overflow);
                }
            }
            Ok(Err(e)) => warn!("Blind host poll failed: {}", e),
            Err(_) => warn!("Blind host poll timed out after {:?}", self.cycle_timeout),
        }
    }

    async fn resync(&self, ctx: &ScanContext) {
        match tokio::time::timeout(self.cycle_timeout, self.source.fetch_all(ctx)).await {
            Ok(Ok(all)) => {
                *self.cold.write().unwrap_or_else(|e| e.into_inner()) = all;
            }
            Ok(Err(e)) => warn!("Blind host resync failed: {}", e),
            Err(_) => warn!("Blind host resync timed out after {:?}", self.cycle_timeout),
        }
    }

    /// Best-effort lookup of an interaction by exact correlation id
    pub fn search(&self, id: &str) -> Option<Interaction> {
        if id.is_empty() {
            return None;
        }
        let id = id.to_ascii_lowercase();
        let hot = self.hot.read().unwrap_or_else(|e| e.into_inner());
        hot.iter().find(|i| i.id == id).cloned()
    }

    /// Substring lookup over the hot buffer, then the cold one
    pub fn brute_search(&self, needle: &str) -> Option<Interaction> {
        let needle = needle.to_ascii_lowercase();
        {
            let hot = self.hot.read().unwrap_or_else(|e| e.into_inner());
            if let Some(found) = hot.iter().find(|i| i.mentions(&needle)) {
                return Some(found.clone());
            }
        }
        let cold = self.cold.read().unwrap_or_else(|e| e.into_inner());
        cold.iter().find(|i| i.mentions(&needle)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GauntletError, Result};
    use crate::oob::{new_interaction_store, InteractionType, LocalInteractionSource};
    use async_trait::async_trait;

    fn interaction(id: &str) -> Interaction {
        Interaction {
            id: id.to_string(),
            protocol: InteractionType::Dns,
            remote_addr: "127.0.0.1:53".parse().expect("valid addr"),
            timestamp: chrono::Utc::now(),
            raw_data: format!("DNS query for {id}.oob.test"),
        }
    }

    fn config() -> BlindHostConfig {
        BlindHostConfig {
            resync_every: 2,
            ..BlindHostConfig::new("oob.test")
        }
    }

    #[tokio::test]
    async fn test_hot_and_cold_buffers() {
        let store = new_interaction_store();
        let source = Arc::new(LocalInteractionSource::new(store.clone()));
        let poller = BlindHostPoller::new(source, &config());
        let ctx = ScanContext::new();

        store.lock().await.push(interaction("first"));
        poller.poll_once(&ctx).await;
        assert!(poller.search("FIRST").is_some());
        assert!(poller.search("missing").is_none());

        store.lock().await.push(interaction("second"));
        poller.poll_once(&ctx).await;
        assert!(poller.search("second").is_some());
        assert!(poller.brute_search("second.oob").is_some());
    }

    #[tokio::test]
    async fn test_refresh_sees_interactions_between_ticks() {
        let store = new_interaction_store();
        let source = Arc::new(LocalInteractionSource::new(store.clone()));
        let poller = BlindHostPoller::new(source, &config());
        let ctx = ScanContext::new();

        poller.poll_once(&ctx).await;
        store.lock().await.push(interaction("late"));
        assert!(poller.search("late").is_none());

        poller.refresh(&ctx).await;
        assert!(poller.search("late").is_some());
        assert!(poller.brute_search("late.oob.test").is_some());
    }

    struct StalledSource;

    #[async_trait]
    impl InteractionSource for StalledSource {
        async fn fetch_recent(&self, _ctx: &ScanContext) -> Result<Vec<Interaction>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }

        async fn fetch_all(&self, _ctx: &ScanContext) -> Result<Vec<Interaction>> {
            Err(GauntletError::OobError("unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_stalled_cycle_degrades() {
        let config = BlindHostConfig {
            cycle_timeout_secs: 1,
            ..config()
        };
        let poller = BlindHostPoller::new(Arc::new(StalledSource), &config);
        let ctx = ScanContext::new();
        tokio::time::timeout(Duration::from_secs(3), poller.poll_once(&ctx))
            .await
            .expect("cycle bounded by its timeout");
        assert!(poller.brute_search("anything").is_none());
    }

    #[tokio::test]
    async fn test_loop_stops_on_cancel() {
        let store = new_interaction_store();
        store.lock().await.push(interaction("looped"));
        let source = Arc::new(LocalInteractionSource::new(store));
        let poller = Arc::new(
            BlindHostPoller::new(source, &config()).with_interval(Duration::from_millis(10)),
        );
        let ctx = ScanContext::new();
        let handle = poller.spawn(ctx.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(poller.search("looped").is_some());

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller stops")
            .expect("poller does not panic");
    }
}
