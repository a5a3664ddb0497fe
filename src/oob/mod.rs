//! Out-of-band (blind host) interactions
//!
//! Payloads referencing the blind host make vulnerable targets call back
//! over DNS or HTTP. The embedded callback servers record those calls in an
//! [`InteractionStore`]; the [`BlindHostPoller`] polls an
//! [`InteractionSource`] in the background and correlates interactions with
//! the requests that caused them through the request correlation id.

pub mod dns_server;
pub mod http_server;
pub mod poller;

use crate::context::ScanContext;
use crate::error::{GauntletError, Result};
use crate::models::BlindHostConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub use poller::BlindHostPoller;

/// A detected out-of-band interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Correlation id extracted from the callback (first DNS label, or the
    /// first path segment when the host is an address)
    pub id: String,
    pub protocol: InteractionType,
    pub remote_addr: SocketAddr,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Raw request data, searched by brute-force lookups
    pub raw_data: String,
}

impl Interaction {
    /// True when the id or the raw data mention `needle`
    pub fn mentions(&self, needle: &str) -> bool {
        !needle.is_empty() && (self.id.contains(needle) || self.raw_data.contains(needle))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    Http,
    Dns,
}

/// Thread-safe, append-only store of received interactions
pub type InteractionStore = Arc<Mutex<Vec<Interaction>>>;

pub fn new_interaction_store() -> InteractionStore {
    Arc::new(Mutex::new(Vec::new()))
}

/// Where the poller reads interactions from
#[async_trait]
pub trait InteractionSource: Send + Sync {
    /// Interactions received since the previous call
    async fn fetch_recent(&self, ctx: &ScanContext) -> Result<Vec<Interaction>>;

    /// Every interaction received so far
    async fn fetch_all(&self, ctx: &ScanContext) -> Result<Vec<Interaction>>;
}

/// Interaction source over the embedded callback servers
pub struct LocalInteractionSource {
    store: InteractionStore,
    cursor: AtomicUsize,
}

impl LocalInteractionSource {
    pub fn new(store: InteractionStore) -> Self {
        Self {
            store,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Binds the callback listeners described by `config` and serves them in
    /// background tasks until `ctx` is cancelled
    pub async fn start(ctx: &ScanContext, config: &BlindHostConfig) -> Result<Self> {
        let store = new_interaction_store();

        let http_listener = http_server::bind(config.listen_port).await?;
        info!(
            "Blind host HTTP listener on {}",
            http_listener
                .local_addr()
                .map_err(|e| GauntletError::OobError(e.to_string()))?
        );
        let http_store = Arc::clone(&store);
        let http_ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = http_ctx.cancelled() => {}
                res = http_server::serve(http_listener, http_store) => {
                    if let Err(e) = res {
                        tracing::error!("Blind host HTTP listener error: {}", e);
                    }
                }
            }
        });

        if let Some(dns_port) = config.dns_port {
            let socket = dns_server::bind(dns_port).await?;
            info!("Blind host DNS listener on udp/{}", dns_port);
            let dns_store = Arc::clone(&store);
            let dns_ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = dns_ctx.cancelled() => {}
                    res = dns_server::serve(socket, dns_store) => {
                        if let Err(e) = res {
                            tracing::error!("Blind host DNS listener error: {}", e);
                        }
                    }
                }
            });
        }

        Ok(Self::new(store))
    }

    pub fn store(&self) -> InteractionStore {
        Arc::clone(&self.store)
    }
}

#[async_trait]
impl InteractionSource for LocalInteractionSource {
    async fn fetch_recent(&self, _ctx: &ScanContext) -> Result<Vec<Interaction>> {
        let store = self.store.lock().await;
        let start = self.cursor.swap(store.len(), Ordering::SeqCst).min(store.len());
        Ok(store[start..].to_vec())
    }

    async fn fetch_all(&self, _ctx: &ScanContext) -> Result<Vec<Interaction>> {
        Ok(self.store.lock().await.clone())
    }
}

/// Correlation id carried by a callback host name, e.g. `abc123` in
/// `abc123.oob.example.com:8888`. Addresses carry none.
pub(crate) fn id_from_host(host: &str) -> Option<String> {
    let name = host.rsplit_once(':').map_or(host, |(h, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) {
            h
        } else {
            host
        }
    });
    if name.parse::<std::net::IpAddr>().is_ok() || !name.contains('.') {
        return None;
    }
    name.split('.')
        .next()
        .filter(|label| !label.is_empty())
        .map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interaction(id: &str) -> Interaction {
        Interaction {
            id: id.to_string(),
            protocol: InteractionType::Http,
            remote_addr: "127.0.0.1:5000".parse().expect("valid addr"),
            timestamp: chrono::Utc::now(),
            raw_data: format!("GET / Host: {id}.oob.test"),
        }
    }

    #[test]
    fn test_id_from_host() {
        assert_eq!(id_from_host("Abc123.oob.test:8888"), Some("abc123".to_string()));
        assert_eq!(id_from_host("abc123.oob.test"), Some("abc123".to_string()));
        assert_eq!(id_from_host("10.0.0.1:8888"), None);
        assert_eq!(id_from_host("localhost"), None);
    }

    #[tokio::test]
    async fn test_local_source_cursor() {
        let store = new_interaction_store();
        let source = LocalInteractionSource::new(Arc::clone(&store));
        let ctx = ScanContext::new();

        store.lock().await.push(interaction("a"));
        assert_eq!(source.fetch_recent(&ctx).await.expect("fetch").len(), 1);
        assert!(source.fetch_recent(&ctx).await.expect("fetch").is_empty());

        store.lock().await.push(interaction("b"));
        let recent = source.fetch_recent(&ctx).await.expect("fetch");
        assert_eq!(recent[0].id, "b");
        assert_eq!(source.fetch_all(&ctx).await.expect("fetch").len(), 2);
    }
}
