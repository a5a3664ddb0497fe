//! Active profile steps: where to inject, what to inject and how

use super::grep::{Grep, GrepType};
use crate::entrypoint::{InsertionPointType, PayloadPosition};
use crate::http::RedirectPolicy;
use crate::models::Issue;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// How a step's payloads are spread over the discovered entrypoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertionPointMode {
    /// Each entrypoint is attacked independently
    #[default]
    Any,
    /// Each payload is placed in every matching entrypoint of one request
    Same,
}

/// Optional HTTP method transform applied before sending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodChange {
    GetToPost,
    PostToGet,
    /// GET becomes POST and POST becomes GET
    Swap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceKind {
    #[default]
    Literal,
    Regex,
}

/// Whether a match-and-replace rule rewrites the payload or the whole request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceScope {
    #[default]
    Request,
    Payload,
}

/// A literal or regex rewrite rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAndReplace {
    #[serde(default, rename = "type")]
    pub kind: ReplaceKind,
    #[serde(default)]
    pub scope: ReplaceScope,
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

impl MatchAndReplace {
    /// Applies the rule to `input`. Invalid regexes leave the input as is.
    pub fn apply(&self, input: &str) -> String {
        if self.pattern.is_empty() {
            return input.to_string();
        }
        match self.kind {
            ReplaceKind::Literal => input.replace(&self.pattern, &self.replacement),
            ReplaceKind::Regex => match Regex::new(&self.pattern) {
                Ok(re) => re.replace_all(input, self.replacement.as_str()).into_owned(),
                Err(e) => {
                    debug!("Skipping invalid replace pattern {}: {}", self.pattern, e);
                    input.to_string()
                }
            },
        }
    }
}

/// Payload encoders, applied in declared order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoder {
    /// Percent-encodes everything but unreserved characters
    UrlEncode,
    /// Percent-encodes every byte
    UrlEncodeAll,
    Base64,
    /// HTML entity encoding of `& < > " '`
    Html,
}

impl Encoder {
    pub fn encode(self, input: &str) -> String {
        match self {
            Encoder::UrlEncode => urlencoding::encode(input).into_owned(),
            Encoder::UrlEncodeAll => input.bytes().map(|b| format!("%{b:02X}")).collect(),
            Encoder::Base64 => base64::engine::general_purpose::STANDARD.encode(input),
            Encoder::Html => {
                let mut out = String::with_capacity(input.len());
                for c in input.chars() {
                    match c {
                        '&' => out.push_str("&amp;"),
                        '<' => out.push_str("&lt;"),
                        '>' => out.push_str("&gt;"),
                        '"' => out.push_str("&quot;"),
                        '\'' => out.push_str("&#x27;"),
                        c => out.push(c),
                    }
                }
                out
            }
        }
    }
}

/// One payload line of a step: `enabled,literal`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub enabled: bool,
    pub value: String,
}

impl Payload {
    /// Parses `true,<literal>` / `false,<literal>`. Lines without a boolean
    /// prefix are enabled literals.
    pub fn parse(raw: &str) -> Self {
        if let Some((flag, value)) = raw.split_once(',') {
            match flag.trim().to_ascii_lowercase().as_str() {
                "true" => {
                    return Self {
                        enabled: true,
                        value: value.to_string(),
                    }
                }
                "false" => {
                    return Self {
                        enabled: false,
                        value: value.to_string(),
                    }
                }
                _ => {}
            }
        }
        Self {
            enabled: true,
            value: raw.to_string(),
        }
    }
}

/// One attack step of an active profile
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Step {
    /// Insertion point kinds this step attacks
    #[serde(default)]
    pub insertion_points: Vec<InsertionPointType>,
    #[serde(default)]
    pub insertion_point_mode: InsertionPointMode,
    /// Raw payload lines, parsed on use
    #[serde(default)]
    pub payloads: Vec<String>,
    #[serde(default)]
    pub payload_position: PayloadPosition,
    #[serde(default)]
    pub method_change: Option<MethodChange>,
    /// `Name: value` headers added to every request of the step
    #[serde(default)]
    pub custom_headers: Vec<String>,
    #[serde(default)]
    pub match_and_replaces: Vec<MatchAndReplace>,
    #[serde(default)]
    pub encoders: Vec<Encoder>,
    #[serde(default)]
    pub greps: Vec<Grep>,
    #[serde(default)]
    pub issue: Issue,
    /// Overrides the scan-wide redirect policy
    #[serde(default)]
    pub redirect: Option<RedirectPolicy>,
    #[serde(default)]
    pub max_redirects: Option<u32>,
}

impl Step {
    pub fn parsed_payloads(&self) -> Vec<Payload> {
        self.payloads.iter().map(|p| Payload::parse(p)).collect()
    }

    pub fn enabled_payloads(&self) -> Vec<Payload> {
        self.parsed_payloads()
            .into_iter()
            .filter(|p| p.enabled)
            .collect()
    }

    pub fn accepts(&self, kind: InsertionPointType) -> bool {
        self.insertion_points.contains(&kind)
    }

    /// Greps evaluated by the matcher (enabled, not blind-host)
    pub fn enabled_greps(&self) -> impl Iterator<Item = &Grep> {
        self.greps
            .iter()
            .filter(|g| g.enabled && g.match_type != GrepType::BlindHost)
    }

    pub fn has_blind_host_grep(&self) -> bool {
        self.greps
            .iter()
            .any(|g| g.enabled && g.match_type == GrepType::BlindHost)
    }

    /// Largest time-delay grep value, if any
    pub fn max_time_delay(&self) -> Option<Duration> {
        self.greps
            .iter()
            .filter(|g| g.enabled && g.match_type == GrepType::TimeDelay)
            .filter_map(Grep::time_delay)
            .max()
    }

    /// Payload-scoped rewrites followed by the encoders
    pub fn encode_payload(&self, raw: &str) -> String {
        let rewritten = self
            .match_and_replaces
            .iter()
            .filter(|r| r.scope == ReplaceScope::Payload)
            .fold(raw.to_string(), |acc, rule| rule.apply(&acc));
        self.encoders
            .iter()
            .fold(rewritten, |acc, encoder| encoder.encode(&acc))
    }
}
