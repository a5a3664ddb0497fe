//! Scan statistics and their single-consumer collector
//!
//! Workers never touch [`Stats`] directly: they send [`StatsDelta`]s over a
//! bounded channel to one collector task, which applies them in arrival
//! order and checkpoints the stats whenever a template ends. A checkpoint
//! only ever holds the counters of templates that ended.

use super::fs::FileSystem;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::ops::AddAssign;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Scan-wide counters plus the set of fully processed templates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_templates: usize,
    /// Indexes of templates fully processed; skipped on resume
    pub templates_ended: BTreeSet<usize>,
    pub total_requests: u64,
    pub performed_requests: u64,
    pub succeeded_requests: u64,
    pub failed_requests: u64,
    /// Tasks not run because their payload needs unconfigured features
    pub skipped_requests: u64,
    pub entrypoints_found: u64,
    pub matches_found: u64,
    /// Requests evaluated by passive request profiles
    pub requests_to_analyze: u64,
    /// Responses evaluated by passive response profiles
    pub responses_to_analyze: u64,
}

impl Stats {
    pub fn apply(&mut self, delta: &StatsDelta) {
        self.total_requests = self.total_requests.saturating_add_signed(delta.total_requests);
        self.performed_requests = self
            .performed_requests
            .saturating_add_signed(delta.performed_requests);
        self.succeeded_requests = self
            .succeeded_requests
            .saturating_add_signed(delta.succeeded_requests);
        self.failed_requests = self.failed_requests.saturating_add_signed(delta.failed_requests);
        self.skipped_requests = self.skipped_requests.saturating_add_signed(delta.skipped_requests);
        self.entrypoints_found = self
            .entrypoints_found
            .saturating_add_signed(delta.entrypoints_found);
        self.matches_found = self.matches_found.saturating_add_signed(delta.matches_found);
        self.requests_to_analyze = self
            .requests_to_analyze
            .saturating_add_signed(delta.requests_to_analyze);
        self.responses_to_analyze = self
            .responses_to_analyze
            .saturating_add_signed(delta.responses_to_analyze);
    }

    pub fn is_template_ended(&self, index: usize) -> bool {
        self.templates_ended.contains(&index)
    }
}

/// Signed change to the counters of [`Stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub total_requests: i64,
    pub performed_requests: i64,
    pub succeeded_requests: i64,
    pub failed_requests: i64,
    pub skipped_requests: i64,
    pub entrypoints_found: i64,
    pub matches_found: i64,
    pub requests_to_analyze: i64,
    pub responses_to_analyze: i64,
}

impl StatsDelta {
    /// The compensating delta that cancels this one
    pub fn negated(&self) -> Self {
        Self {
            total_requests: -self.total_requests,
            performed_requests: -self.performed_requests,
            succeeded_requests: -self.succeeded_requests,
            failed_requests: -self.failed_requests,
            skipped_requests: -self.skipped_requests,
            entrypoints_found: -self.entrypoints_found,
            matches_found: -self.matches_found,
            requests_to_analyze: -self.requests_to_analyze,
            responses_to_analyze: -self.responses_to_analyze,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for StatsDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.total_requests += rhs.total_requests;
        self.performed_requests += rhs.performed_requests;
        self.succeeded_requests += rhs.succeeded_requests;
        self.failed_requests += rhs.failed_requests;
        self.skipped_requests += rhs.skipped_requests;
        self.entrypoints_found += rhs.entrypoints_found;
        self.matches_found += rhs.matches_found;
        self.requests_to_analyze += rhs.requests_to_analyze;
        self.responses_to_analyze += rhs.responses_to_analyze;
    }
}

#[derive(Debug)]
pub enum StatsUpdate {
    /// Counter change contributed by the template at `template`
    Delta { template: usize, delta: StatsDelta },
    TemplateEnded(usize),
}

/// Producer side of the collector channel
#[derive(Clone)]
pub struct StatsHandle {
    tx: mpsc::Sender<StatsUpdate>,
}

impl StatsHandle {
    pub async fn record(&self, template: usize, delta: StatsDelta) {
        if delta.is_zero() {
            return;
        }
        if self
            .tx
            .send(StatsUpdate::Delta { template, delta })
            .await
            .is_err()
        {
            debug!("Stats collector gone, dropping delta");
        }
    }

    pub async fn template_ended(&self, index: usize) {
        if self.tx.send(StatsUpdate::TemplateEnded(index)).await.is_err() {
            debug!("Stats collector gone, template {index} not marked ended");
        }
    }
}

/// Collector state: live counters plus the checkpoint made only of ended
/// templates. Deltas of in-flight templates wait in `in_flight` until their
/// template ends.
#[derive(Debug)]
struct Ledger {
    live: Stats,
    persisted: Stats,
    in_flight: HashMap<usize, StatsDelta>,
}

impl Ledger {
    fn new(initial: Stats) -> Self {
        Self {
            live: initial.clone(),
            persisted: initial,
            in_flight: HashMap::new(),
        }
    }

    fn apply(&mut self, template: usize, delta: &StatsDelta) {
        self.live.apply(delta);
        let pending = self.in_flight.entry(template).or_default();
        *pending += *delta;
        if pending.is_zero() {
            self.in_flight.remove(&template);
        }
    }

    /// Moves the template's deltas into the checkpoint and returns it
    fn end(&mut self, template: usize) -> Stats {
        if let Some(delta) = self.in_flight.remove(&template) {
            self.persisted.apply(&delta);
        }
        self.live.templates_ended.insert(template);
        self.persisted.templates_ended.insert(template);
        self.persisted.clone()
    }
}

/// Owns the consumer task applying updates to the shared [`Stats`]
pub struct StatsCollector {
    handle: StatsHandle,
    ledger: Arc<Mutex<Ledger>>,
    consumer: JoinHandle<()>,
}

impl StatsCollector {
    /// Starts the consumer. When `fs` is given, the stats of ended templates
    /// are checkpointed each time a template ends.
    pub fn spawn(initial: Stats, fs: Option<Arc<dyn FileSystem>>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<StatsUpdate>(capacity.max(1));
        let ledger = Arc::new(Mutex::new(Ledger::new(initial)));
        let shared = Arc::clone(&ledger);

        let consumer = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let checkpoint = {
                    let mut ledger = shared.lock().unwrap_or_else(|e| e.into_inner());
                    match update {
                        StatsUpdate::Delta { template, delta } => {
                            ledger.apply(template, &delta);
                            None
                        }
                        StatsUpdate::TemplateEnded(index) => Some(ledger.end(index)),
                    }
                };

                if let (Some(snapshot), Some(fs)) = (checkpoint, fs.as_ref()) {
                    if let Err(e) = fs.store_stats(&snapshot).await {
                        warn!("Failed to checkpoint stats: {}", e);
                    }
                }
            }
        });

        Self {
            handle: StatsHandle { tx },
            ledger,
            consumer,
        }
    }

    pub fn handle(&self) -> StatsHandle {
        self.handle.clone()
    }

    /// Live counters, including templates still in flight
    pub fn snapshot(&self) -> Stats {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .live
            .clone()
    }

    /// Waits until every handle is dropped and every update applied, then
    /// returns the stats of ended templates
    pub async fn finish(self) -> Stats {
        let Self {
            handle,
            ledger,
            consumer,
        } = self;
        drop(handle);
        if let Err(e) = consumer.await {
            warn!("Stats collector task failed: {}", e);
        }
        let guard = ledger.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.in_flight.is_empty() {
            warn!(
                "{} templates left unfinished stats behind",
                guard.in_flight.len()
            );
        }
        guard.persisted.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::fs::MemoryFileSystem;

    #[test]
    fn test_delta_roundtrip_is_zero() {
        let mut stats = Stats {
            succeeded_requests: 10,
            matches_found: 2,
            ..Stats::default()
        };
        let delta = StatsDelta {
            succeeded_requests: 3,
            failed_requests: 1,
            matches_found: 1,
            ..StatsDelta::default()
        };
        let before = stats.clone();
        stats.apply(&delta);
        assert_eq!(stats.succeeded_requests, 13);
        stats.apply(&delta.negated());
        assert_eq!(stats, before);
    }

    #[test]
    fn test_apply_saturates() {
        let mut stats = Stats::default();
        stats.apply(&StatsDelta {
            failed_requests: -5,
            ..StatsDelta::default()
        });
        assert_eq!(stats.failed_requests, 0);
    }

    #[tokio::test]
    async fn test_collector_serializes_producers() {
        let collector = StatsCollector::spawn(Stats::default(), None, 4);
        let mut producers = Vec::new();
        for _ in 0..8 {
            let handle = collector.handle();
            producers.push(tokio::spawn(async move {
                for _ in 0..25 {
                    handle
                        .record(3, StatsDelta {
                            performed_requests: 1,
                            ..StatsDelta::default()
                        })
                        .await;
                }
            }));
        }
        for p in producers {
            p.await.expect("producer");
        }
        collector.handle().template_ended(3).await;

        let stats = collector.finish().await;
        assert_eq!(stats.performed_requests, 200);
        assert!(stats.is_template_ended(3));
    }

    #[tokio::test]
    async fn test_checkpoint_excludes_in_flight_templates() {
        let fs = Arc::new(MemoryFileSystem::new());
        let store: Arc<dyn FileSystem> = fs.clone();
        let collector = StatsCollector::spawn(Stats::default(), Some(store), 4);
        let handle = collector.handle();

        handle
            .record(0, StatsDelta {
                succeeded_requests: 5,
                matches_found: 1,
                ..StatsDelta::default()
            })
            .await;
        handle
            .record(1, StatsDelta {
                succeeded_requests: 2,
                ..StatsDelta::default()
            })
            .await;
        handle.template_ended(1).await;
        drop(handle);

        // The consumer stores the checkpoint before taking the next update
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while fs.stored_stats().is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("checkpoint stored");

        let stored = fs.stored_stats().expect("stored stats");
        assert_eq!(stored.succeeded_requests, 2);
        assert_eq!(stored.matches_found, 0);
        assert!(stored.is_template_ended(1));
        assert!(!stored.is_template_ended(0));
        assert_eq!(collector.snapshot().succeeded_requests, 7);

        let finished = collector.finish().await;
        assert_eq!(finished, stored);
    }

    #[tokio::test]
    async fn test_rolled_back_template_leaves_no_trace() {
        let collector = StatsCollector::spawn(Stats::default(), None, 4);
        let handle = collector.handle();
        let delta = StatsDelta {
            total_requests: 4,
            performed_requests: 3,
            ..StatsDelta::default()
        };
        handle.record(2, delta).await;
        handle.record(2, delta.negated()).await;
        drop(handle);

        let stats = collector.finish().await;
        assert_eq!(stats, Stats::default());
    }
}
