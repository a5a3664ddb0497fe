//! Minimal HTTP callback listener for blind host interactions

use super::{id_from_host, Interaction, InteractionStore, InteractionType};
use crate::error::{GauntletError, Result};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::debug;

pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|e| GauntletError::OobError(format!("cannot bind {addr}: {e}")))
}

/// Accepts callbacks forever, recording one interaction per request
pub async fn serve(listener: TcpListener, store: InteractionStore) -> Result<()> {
    loop {
        let (stream, remote_addr) = listener.accept().await?;
        let store = store.clone();
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let store = store.clone();
                async move { handle_request(req, remote_addr, store).await }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                debug!("Blind host HTTP connection error: {}", e);
            }
        });
    }
}

/// Correlation id of a callback: the first label of the Host header, or
/// the first path segment when the host is an address
fn interaction_id(host: Option<&str>, path: &str) -> Option<String> {
    host.and_then(id_from_host).or_else(|| {
        path.trim_start_matches('/')
            .split('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(str::to_ascii_lowercase)
    })
}

async fn handle_request(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    store: InteractionStore,
) -> std::result::Result<Response<String>, hyper::Error> {
    let host = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(id) = interaction_id(host.as_deref(), req.uri().path()) {
        let interaction = Interaction {
            id: id.clone(),
            protocol: InteractionType::Http,
            remote_addr,
            timestamp: chrono::Utc::now(),
            raw_data: format!(
                "{} {} Host: {}",
                req.method(),
                req.uri(),
                host.as_deref().unwrap_or_default()
            ),
        };

        debug!("Blind host HTTP interaction: {} from {}", id, remote_addr);
        store.lock().await.push(interaction);
    }

    Ok(Response::new("ok".to_string()))
}
