//! HTTP request model
//!
//! `Request` is a plain value type: cloning it yields a fully independent
//! header map and body buffer, so every payload variant can be derived from
//! the same base request without leaking mutations between them.

use crate::error::{GauntletError, Result};
use crate::http::encoding::{self, split_message};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Default transport timeout applied to requests built from URLs or raw dumps
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Redirect-following policy for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectPolicy {
    /// Never follow redirects
    #[default]
    Never,
    /// Follow redirects only while they stay on the same host
    OnSite,
    /// Follow every redirect up to the configured maximum
    Always,
}

/// An HTTP request under scan
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Request {
    /// Correlation identifier, used to match out-of-band interactions
    #[serde(default)]
    pub uid: String,
    /// Scheme and authority, e.g. `https://example.com:8443`
    pub url: String,
    pub method: String,
    /// Path including the query string
    pub path: String,
    pub proto: String,
    /// Header name to values; repeated headers keep every value
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default, with = "encoding::base64_bytes")]
    pub body: Vec<u8>,
    #[serde(default, with = "encoding::nanos")]
    pub timeout: Duration,
    #[serde(default)]
    pub redirect: RedirectPolicy,
    #[serde(default)]
    pub max_redirects: u32,
    #[serde(default)]
    pub followed_redirects: u32,
    /// Placeholder label to the value substituted for it
    #[serde(default)]
    pub modifications: HashMap<String, String>,
}

impl Request {
    /// Builds a GET request for the given absolute URL
    pub fn get(raw_url: &str) -> Result<Self> {
        let parsed = Url::parse(raw_url)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| GauntletError::InvalidRequest(format!("URL without host: {raw_url}")))?;

        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        let mut request = Self {
            url: format!("{}://{}", parsed.scheme(), authority),
            method: "GET".to_string(),
            path,
            proto: "HTTP/1.1".to_string(),
            timeout: DEFAULT_TIMEOUT,
            ..Self::default()
        };
        request.set_header("Host", &authority);
        Ok(request)
    }

    /// Parses a raw HTTP/1.x request dump.
    ///
    /// When `base_url` is absent the scheme defaults to `http` and the
    /// authority is taken from the `Host` header. Absolute-form request
    /// targets (`GET http://host/path HTTP/1.1`) are also accepted.
    pub fn from_raw(raw: &[u8], base_url: Option<&str>) -> Result<Self> {
        let head = split_message(raw)
            .ok_or_else(|| GauntletError::InvalidRequest("malformed request head".to_string()))?;

        let mut parts = head.start_line.split_whitespace();
        let (method, target) = match (parts.next(), parts.next()) {
            (Some(m), Some(t)) => (m.to_string(), t.to_string()),
            _ => {
                return Err(GauntletError::InvalidRequest(format!(
                    "malformed request line: {}",
                    head.start_line
                )))
            }
        };
        let proto = parts.next().unwrap_or("HTTP/1.1").to_string();

        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in &head.headers {
            headers
                .entry((*name).to_string())
                .or_default()
                .push((*value).to_string());
        }

        let mut request = Self {
            method,
            path: target.clone(),
            proto,
            headers,
            body: head.body.to_vec(),
            timeout: DEFAULT_TIMEOUT,
            ..Self::default()
        };

        if target.starts_with("http://") || target.starts_with("https://") {
            let absolute = Self::get(&target)?;
            request.url = absolute.url;
            request.path = absolute.path;
        } else if let Some(base) = base_url {
            let parsed = Url::parse(base)?;
            let host = parsed.host_str().unwrap_or_default();
            request.url = match parsed.port() {
                Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
                None => format!("{}://{}", parsed.scheme(), host),
            };
        } else {
            let host = request.header("Host").map(str::to_string).ok_or_else(|| {
                GauntletError::InvalidRequest("no base URL and no Host header".to_string())
            })?;
            request.url = format!("http://{host}");
        }

        Ok(request)
    }

    /// Absolute URL this request targets
    pub fn full_url(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), self.path)
    }

    /// Host name (without port) taken from the base URL
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Path without the query string
    pub fn path_only(&self) -> &str {
        self.path.split_once('?').map_or(self.path.as_str(), |(p, _)| p)
    }

    /// Query string, if any (without the leading `?`)
    pub fn query(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, q)| q)
    }

    /// Replaces the query string; `None` or an empty query removes it
    pub fn set_query(&mut self, query: Option<&str>) {
        let path = self.path_only().to_string();
        self.path = match query {
            Some(q) if !q.is_empty() => format!("{path}?{q}"),
            _ => path,
        };
    }

    /// All values of a header, looked up case-insensitively
    pub fn header_values(&self, name: &str) -> Option<&Vec<String>> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// First value of a header, looked up case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header_values(name).is_some()
    }

    /// Sets a header to a single value, replacing any existing spelling of it
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.remove_header(name);
        self.headers
            .insert(name.to_string(), vec![value.to_string()]);
    }

    /// Appends one more value to a header, keeping the existing spelling
    pub fn add_header(&mut self, name: &str, value: &str) {
        let key = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| name.to_string());
        self.headers.entry(key).or_default().push(value.to_string());
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
    }

    /// Value of the `Content-Type` header
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Body as UTF-8, when it is valid UTF-8
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Replaces the body, keeping an existing `Content-Length` header in sync
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
        if self.has_header("Content-Length") {
            let len = self.body.len().to_string();
            self.set_header("Content-Length", &len);
        }
    }

    /// Header names in a stable (sorted, case-insensitive) order
    pub fn sorted_header_names(&self) -> Vec<&String> {
        let mut names: Vec<&String> = self.headers.keys().collect();
        names.sort_by_key(|n| n.to_ascii_lowercase());
        names
    }

    /// Renders the request in HTTP/1.x wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.path, self.proto).into_bytes();
        for name in self.sorted_header_names() {
            for value in &self.headers[name] {
                out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
            }
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// True for the zero value
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
