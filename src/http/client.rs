//! Transport contract and its reqwest-backed implementation

use crate::context::ScanContext;
use crate::error::{GauntletError, Result};
use crate::http::{RedirectPolicy, Request, Response};
use crate::models::ScanConfig;
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

/// Sends a request and returns the response.
///
/// Implementations update `request.followed_redirects` when they follow
/// redirects on the request's behalf.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn execute(&self, ctx: &ScanContext, request: &mut Request) -> Result<Response>;
}

/// Requester backed by a shared reqwest client.
///
/// Redirects are followed manually so the per-request policy and counters
/// on `Request` are honored.
#[derive(Clone)]
pub struct HttpRequester {
    client: Client,
    request_count: Arc<AtomicU64>,
}

impl HttpRequester {
    /// Creates a new requester from scan configuration
    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true);

        if let Some(ref ua) = config.user_agent {
            builder = builder.user_agent(ua);
        }

        Ok(Self {
            client: builder.build()?,
            request_count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Returns the total number of requests sent on the wire
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Sends a single request with retry on connection failures
    async fn send_once(&self, request: &Request) -> Result<Response> {
        const MAX_RETRIES: u32 = 2;
        const INITIAL_BACKOFF_MS: u64 = 250;

        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            GauntletError::InvalidRequest(format!("invalid method: {}", request.method))
        })?;
        let url = request.full_url();

        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                debug!("Retry attempt {attempt}, waiting {backoff:?}");
                sleep(backoff).await;
            }

            self.request_count.fetch_add(1, Ordering::Relaxed);

            let mut builder = self.client.request(method.clone(), &url);
            if !request.timeout.is_zero() {
                builder = builder.timeout(request.timeout);
            }
            for (name, values) in &request.headers {
                if name.eq_ignore_ascii_case("content-length") {
                    continue;
                }
                for value in values {
                    builder = builder.header(name.as_str(), value.as_str());
                }
            }
            if !request.body.is_empty() {
                builder = builder.body(request.body.clone());
            }

            let started = Instant::now();
            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!("Response: {status} for {url}");

                    let proto = format!("{:?}", response.version());
                    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
                    for (name, value) in response.headers() {
                        headers
                            .entry(name.to_string())
                            .or_default()
                            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
                    }
                    let body = response.bytes().await?.to_vec();

                    return Ok(Response {
                        proto,
                        code: status.as_u16(),
                        status: status.canonical_reason().unwrap_or_default().to_string(),
                        headers,
                        body,
                        time: started.elapsed(),
                        // reqwest does not expose connection setup timing
                        conn_time: Duration::ZERO,
                    });
                }
                Err(e) if e.is_connect() => {
                    warn!("Request failed (attempt {attempt}): {e}");
                    last_error = Some(GauntletError::HttpError(e));
                }
                Err(e) if e.is_timeout() => {
                    return Err(GauntletError::Timeout(request.timeout.as_millis()));
                }
                Err(e) => return Err(GauntletError::HttpError(e)),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GauntletError::InvalidRequest("max retries exceeded".to_string())
        }))
    }
}

#[async_trait]
impl Requester for HttpRequester {
    async fn execute(&self, ctx: &ScanContext, request: &mut Request) -> Result<Response> {
        let started = Instant::now();
        let mut current = request.clone();

        loop {
            let mut response = tokio::select! {
                _ = ctx.cancelled() => return Err(GauntletError::Cancelled),
                res = self.send_once(&current) => res?,
            };

            let next = match redirect_target(request, &current, &response) {
                Some(next) => next,
                None => {
                    response.time = started.elapsed();
                    return Ok(response);
                }
            };

            request.followed_redirects += 1;
            debug!(
                "Following redirect {} -> {}",
                current.full_url(),
                next.full_url()
            );
            current = next;
        }
    }
}

/// Builds the follow-up request for a redirect response, if the request's
/// policy and counters allow following it.
fn redirect_target(original: &Request, current: &Request, response: &Response) -> Option<Request> {
    if !matches!(response.code, 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    if original.redirect == RedirectPolicy::Never
        || original.followed_redirects >= original.max_redirects
    {
        return None;
    }

    let location = response.header("Location")?;
    let base = Url::parse(&current.full_url()).ok()?;
    let target = base.join(location).ok()?;

    if original.redirect == RedirectPolicy::OnSite && target.host_str() != base.host_str() {
        return None;
    }

    let mut next = Request::get(target.as_str()).ok()?;
    next.uid = current.uid.clone();
    next.timeout = current.timeout;
    next.proto = current.proto.clone();

    for (name, values) in &current.headers {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        for value in values {
            next.add_header(name, value);
        }
    }

    // 307/308 preserve method and body
    if matches!(response.code, 307 | 308) {
        next.method = current.method.clone();
        next.set_body(current.body.clone());
    } else {
        next.remove_header("Content-Type");
    }

    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect(code: u16, location: &str) -> Response {
        let mut headers = HashMap::new();
        headers.insert("Location".to_string(), vec![location.to_string()]);
        Response {
            code,
            headers,
            ..Response::default()
        }
    }

    #[test]
    fn test_redirect_never() {
        let req = Request::get("http://a.test/x").expect("valid url");
        assert!(redirect_target(&req, &req, &redirect(302, "/y")).is_none());
    }

    #[test]
    fn test_redirect_on_site_blocks_other_hosts() {
        let mut req = Request::get("http://a.test/x").expect("valid url");
        req.redirect = RedirectPolicy::OnSite;
        req.max_redirects = 3;

        let same = redirect_target(&req, &req, &redirect(302, "/y")).expect("same host");
        assert_eq!(same.full_url(), "http://a.test/y");
        assert_eq!(same.method, "GET");

        assert!(redirect_target(&req, &req, &redirect(302, "http://b.test/")).is_none());
    }

    #[test]
    fn test_redirect_respects_max() {
        let mut req = Request::get("http://a.test/x").expect("valid url");
        req.redirect = RedirectPolicy::Always;
        req.max_redirects = 1;
        req.followed_redirects = 1;
        assert!(redirect_target(&req, &req, &redirect(301, "/y")).is_none());
    }

    #[test]
    fn test_redirect_307_keeps_method() {
        let mut req = Request::get("http://a.test/x").expect("valid url");
        req.method = "POST".to_string();
        req.body = b"a=1".to_vec();
        req.redirect = RedirectPolicy::Always;
        req.max_redirects = 2;
        let next = redirect_target(&req, &req, &redirect(307, "/z")).expect("redirect");
        assert_eq!(next.method, "POST");
        assert_eq!(next.body, b"a=1");
    }
}
