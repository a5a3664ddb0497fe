//! Core data models for Gauntlet

use crate::matcher::Occurrence;
use crate::http::{RedirectPolicy, Request, Response};
use crate::oob::Interaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level for an issue
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::High => write!(f, "HIGH"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::Low => write!(f, "LOW"),
            Severity::Info => write!(f, "INFO"),
        }
    }
}

/// Confidence level for an issue
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// The grep chain is specific enough to confirm the issue
    Certain,
    /// Strong indicators
    Firm,
    #[default]
    Tentative,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Certain => write!(f, "certain"),
            Confidence::Firm => write!(f, "firm"),
            Confidence::Tentative => write!(f, "tentative"),
        }
    }
}

/// Issue metadata attached to a profile or step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub remediation_detail: String,
    #[serde(default)]
    pub remediation_background: String,
}

/// One base request (plus an optional captured response) under scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Ordering and resume key
    pub index: usize,
    /// Original URL
    pub url: String,
    pub request: Request,
    /// Pre-captured response; when present only passive analysis runs
    #[serde(default)]
    pub response: Option<Response>,
}

impl Template {
    pub fn new(index: usize, request: Request) -> Self {
        Self {
            index,
            url: request.full_url(),
            request,
            response: None,
        }
    }

    /// A template over already-recorded traffic
    pub fn passive(index: usize, request: Request, response: Response) -> Self {
        Self {
            response: Some(response),
            ..Self::new(index, request)
        }
    }

    pub fn is_passive_only(&self) -> bool {
        self.response.is_some()
    }
}

/// Kind of profile a match came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    Active,
    PassiveRequest,
    PassiveResponse,
}

/// A reported vulnerability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub id: String,
    pub url: String,
    pub template_index: usize,
    pub profile_name: String,
    pub profile_kind: ProfileKind,
    pub issue: Issue,
    /// Human-readable entrypoint label, e.g. `name (query param)`
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
    pub requests: Vec<Request>,
    pub responses: Vec<Response>,
    #[serde(default)]
    pub occurrences: Vec<Occurrence>,
    #[serde(default)]
    pub interaction: Option<Interaction>,
    pub found_at: DateTime<Utc>,
}

/// A task that failed at the transport level
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub url: String,
    pub template_index: usize,
    pub requests: Vec<Request>,
    pub responses: Vec<Response>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Outcome of one executed task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub template_index: usize,
    pub url: String,
    #[serde(default)]
    pub profile_name: Option<String>,
    #[serde(default)]
    pub step_index: Option<usize>,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
    pub requests: usize,
    pub matched: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// How many payloads of a step are tried per entrypoint
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayloadStrategy {
    /// Every enabled payload
    #[default]
    All,
    /// Only the first enabled payload
    OnlyOnce,
}

/// Interaction host (blind host) settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlindHostConfig {
    /// Public callback domain substituted for `{BH}`
    pub host: String,
    /// Port of the embedded HTTP callback listener
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// UDP port of the embedded DNS callback listener, if any
    #[serde(default)]
    pub dns_port: Option<u16>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Every how many polling cycles the cold buffer is resynced
    #[serde(default = "default_resync_every")]
    pub resync_every: u32,
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,
}

fn default_listen_port() -> u16 {
    8888
}

fn default_poll_interval() -> u64 {
    5
}

fn default_resync_every() -> u32 {
    12
}

fn default_cycle_timeout() -> u64 {
    10
}

impl BlindHostConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            listen_port: default_listen_port(),
            dns_port: None,
            poll_interval_secs: default_poll_interval(),
            resync_every: default_resync_every(),
            cycle_timeout_secs: default_cycle_timeout(),
        }
    }
}

/// Configuration for a scan session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Templates processed concurrently
    pub concurrency: usize,
    /// Maximum concurrent connections in the requester pool
    pub max_connections: usize,
    /// Maximum requests per second (0 = unlimited)
    pub rps: u32,
    pub payload_strategy: PayloadStrategy,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    pub redirect: RedirectPolicy,
    pub max_redirects: u32,
    /// User-Agent set on requests that carry none
    pub user_agent: Option<String>,
    #[serde(default)]
    pub blind_host: Option<BlindHostConfig>,
    /// Address substituted for `{EMAIL}`
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
    /// Skip active profiles entirely
    #[serde(default)]
    pub passive_only: bool,
    /// Persist stats when the scan is cancelled
    #[serde(default = "default_save_on_stop")]
    pub save_on_stop: bool,
}

fn default_save_on_stop() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_connections: 20,
            rps: 0,
            payload_strategy: PayloadStrategy::All,
            timeout_secs: 20,
            redirect: RedirectPolicy::Never,
            max_redirects: 5,
            user_agent: None,
            blind_host: None,
            email: None,
            output_dir: None,
            passive_only: false,
            save_on_stop: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_passive_flag() {
        let req = Request::get("http://example.com/a").expect("valid url");
        let active = Template::new(3, req.clone());
        assert_eq!(active.url, "http://example.com/a");
        assert!(!active.is_passive_only());

        let passive = Template::passive(4, req, Response::default());
        assert!(passive.is_passive_only());
        assert_eq!(passive.index, 4);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical < Severity::Info);
        assert_eq!(Severity::High.to_string(), "HIGH");
        assert_eq!(Confidence::Firm.to_string(), "firm");
    }
}
