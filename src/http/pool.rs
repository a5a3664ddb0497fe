//! Pooled, rate-limited requester
//!
//! The pool keeps a free list of requesters built by a factory, bounds the
//! number of requests in flight with a semaphore and spaces dispatches to
//! honor a requests-per-second budget. Requesters go back to the free list
//! when a request completes, so they are reused across templates.

use crate::context::ScanContext;
use crate::error::{GauntletError, Result};
use crate::http::client::Requester;
use crate::http::{Request, Response};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::sleep;
use tracing::debug;

/// Builds a fresh requester for the pool
pub type RequesterFactory = Arc<dyn Fn() -> Result<Arc<dyn Requester>> + Send + Sync>;

pub struct RequesterPool {
    factory: RequesterFactory,
    free: Mutex<Vec<Arc<dyn Requester>>>,
    slots: Semaphore,
    max_size: usize,
    period: Option<Duration>,
    next_slot: Mutex<Instant>,
}

impl RequesterPool {
    /// Creates a pool of at most `max_size` concurrently used requesters
    pub fn new(factory: RequesterFactory, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            factory,
            free: Mutex::new(Vec::new()),
            slots: Semaphore::new(max_size),
            max_size,
            period: None,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Limits dispatch to `rps` requests per second (0 = unlimited)
    pub fn with_rps(mut self, rps: u32) -> Self {
        self.period = (rps > 0).then(|| Duration::from_secs(1) / rps);
        self
    }

    /// Convenience constructor wrapping an existing requester
    pub fn from_requester(requester: Arc<dyn Requester>, max_size: usize) -> Self {
        Self::new(Arc::new(move || Ok(Arc::clone(&requester))), max_size)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of idle requesters waiting in the free list
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Waits for a free slot, observing cancellation
    pub async fn acquire(&self, ctx: &ScanContext) -> Result<PooledRequester<'_>> {
        let permit = tokio::select! {
            _ = ctx.cancelled() => return Err(GauntletError::Cancelled),
            permit = self.slots.acquire() => permit
                .map_err(|_| GauntletError::StorageError("requester pool closed".to_string()))?,
        };

        let reused = self.free.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let inner = match reused {
            Some(requester) => requester,
            None => {
                debug!("Requester pool: building a new requester");
                (self.factory)()?
            }
        };

        Ok(PooledRequester {
            pool: self,
            inner: Some(inner),
            _permit: permit,
        })
    }

    /// Reserves the next dispatch slot and sleeps until it comes up
    async fn throttle(&self, ctx: &ScanContext) -> Result<()> {
        let Some(period) = self.period else {
            return Ok(());
        };

        let wait = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + period;
            slot - now
        };

        if !wait.is_zero() {
            tokio::select! {
                _ = ctx.cancelled() => return Err(GauntletError::Cancelled),
                _ = sleep(wait) => {}
            }
        }
        Ok(())
    }

    fn release(&self, requester: Arc<dyn Requester>) {
        self.free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(requester);
    }
}

#[async_trait]
impl Requester for RequesterPool {
    async fn execute(&self, ctx: &ScanContext, request: &mut Request) -> Result<Response> {
        let pooled = self.acquire(ctx).await?;
        self.throttle(ctx).await?;
        pooled.execute(ctx, request).await
    }
}

/// A requester borrowed from the pool; returned to it on drop
pub struct PooledRequester<'a> {
    pool: &'a RequesterPool,
    inner: Option<Arc<dyn Requester>>,
    _permit: SemaphorePermit<'a>,
}

impl PooledRequester<'_> {
    pub async fn execute(&self, ctx: &ScanContext, request: &mut Request) -> Result<Response> {
        match &self.inner {
            Some(requester) => requester.execute(ctx, request).await,
            None => Err(GauntletError::StorageError("requester already released".to_string())),
        }
    }
}

impl Drop for PooledRequester<'_> {
    fn drop(&mut self) {
        if let Some(requester) = self.inner.take() {
            self.pool.release(requester);
        }
    }
}
