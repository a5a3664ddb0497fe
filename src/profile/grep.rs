//! Grep directives: one predicate plus the operator joining it to the
//! previous one

use regex::bytes::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Boolean operator linking a grep to the result accumulated so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrepOperator {
    #[default]
    And,
    AndNot,
    Or,
    OrNot,
}

impl GrepOperator {
    pub fn apply(self, acc: bool, next: bool) -> bool {
        match self {
            GrepOperator::And => acc && next,
            GrepOperator::AndNot => acc && !next,
            GrepOperator::Or => acc || next,
            GrepOperator::OrNot => acc || !next,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrepType {
    SimpleString,
    Regex,
    /// Resolved through the interaction poller, never by the matcher
    BlindHost,
    StatusCode,
    /// Seconds, compared against server time
    TimeDelay,
    ContentType,
    ContentLength,
    /// Minimum body length difference against a fresh copy of the original
    ContentLengthDiff,
    UrlExtension,
    /// The payload as sent is echoed back
    Payload,
    /// The payload before encoding is echoed back
    PreEncodedPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepOptions {
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub only_in_headers: bool,
    #[serde(default)]
    pub excluding_headers: bool,
}

/// Region of the request scanned by passive request profiles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestScope {
    All,
    UrlFolder,
    UrlFile,
    ParamNames,
    ParamValues,
    EntireBody,
    Header(String),
}

impl RequestScope {
    /// Parses a `where` value; unknown values scan the whole request
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(name) = trimmed
            .strip_prefix("header:")
            .or_else(|| trimmed.strip_prefix("Header:"))
        {
            return RequestScope::Header(name.trim().to_string());
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "url_folder" => RequestScope::UrlFolder,
            "url_file" => RequestScope::UrlFile,
            "param_names" => RequestScope::ParamNames,
            "param_values" => RequestScope::ParamValues,
            "entire_body" => RequestScope::EntireBody,
            _ => RequestScope::All,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// One match predicate of a profile or step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grep {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub operator: GrepOperator,
    #[serde(rename = "type")]
    pub match_type: GrepType,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub options: GrepOptions,
    /// Request region, for passive request profiles only
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Grep {
    pub fn new(match_type: GrepType, value: impl Into<String>) -> Self {
        Self {
            enabled: true,
            operator: GrepOperator::And,
            match_type,
            value: value.into(),
            options: GrepOptions::default(),
            scope: None,
        }
    }

    pub fn with_operator(mut self, operator: GrepOperator) -> Self {
        self.operator = operator;
        self
    }

    fn list(&self) -> impl Iterator<Item = &str> {
        self.value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn status_codes(&self) -> Vec<u16> {
        self.list().filter_map(|s| s.parse().ok()).collect()
    }

    pub fn time_delay(&self) -> Option<Duration> {
        let secs: f64 = self.value.trim().parse().ok()?;
        Duration::try_from_secs_f64(secs).ok()
    }

    pub fn content_types(&self) -> Vec<String> {
        self.list().map(str::to_ascii_lowercase).collect()
    }

    /// Target length for content-length greps, or the minimum difference
    /// for content-length-diff greps
    pub fn length(&self) -> Option<usize> {
        self.value.trim().parse().ok()
    }

    /// Extensions without their leading dot, lowercased
    pub fn extensions(&self) -> Vec<String> {
        self.list()
            .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
            .collect()
    }

    /// Compiled pattern honouring the case option. Simple strings are
    /// escaped; regex greps compile `value` as is.
    pub fn pattern(&self, literal: &str) -> Option<Regex> {
        let source = if self.match_type == GrepType::Regex {
            literal.to_string()
        } else {
            regex::escape(literal)
        };
        RegexBuilder::new(&source)
            .case_insensitive(!self.options.case_sensitive)
            .build()
            .ok()
    }

    pub fn request_scope(&self) -> RequestScope {
        self.scope
            .as_deref()
            .map(RequestScope::parse)
            .unwrap_or(RequestScope::All)
    }

    /// Checks that the value parses for the grep type
    pub fn validate(&self) -> std::result::Result<(), String> {
        let ok = match self.match_type {
            GrepType::SimpleString | GrepType::Payload | GrepType::PreEncodedPayload => true,
            GrepType::BlindHost => true,
            GrepType::Regex => self.pattern(&self.value).is_some(),
            GrepType::StatusCode => !self.status_codes().is_empty(),
            GrepType::TimeDelay => self.time_delay().is_some(),
            GrepType::ContentType => !self.content_types().is_empty(),
            GrepType::ContentLength | GrepType::ContentLengthDiff => self.length().is_some(),
            GrepType::UrlExtension => !self.extensions().is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(format!("invalid value {:?} for {:?} grep", self.value, self.match_type))
        }
    }
}
