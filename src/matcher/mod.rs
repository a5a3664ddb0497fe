//! Grep evaluation
//!
//! A grep chain is folded strictly left to right: the first grep's operator
//! is ignored and every following grep combines with the accumulated result
//! through its own operator. There is no precedence.

mod scope;

use crate::context::ScanContext;
use crate::error::GauntletError;
use crate::http::{Request, Requester, Response};
use crate::profile::{Grep, GrepOperator, GrepType, PassiveProfile, Step};
use scope::{request_scope, response_scope, Scoped};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper slack of the time-delay window
const TIME_DELAY_WINDOW: Duration = Duration::from_secs(2);

/// Byte range of a grep hit within the scanned message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub start: usize,
    pub end: usize,
}

/// Where the greps come from; decides which message pattern greps scan
#[derive(Debug, Clone, Copy)]
pub enum GrepSource<'a> {
    Step(&'a Step),
    PassiveRequest(&'a PassiveProfile),
    PassiveResponse(&'a PassiveProfile),
}

impl<'a> GrepSource<'a> {
    fn greps(&self) -> Vec<&'a Grep> {
        match *self {
            GrepSource::Step(step) => step.enabled_greps().collect(),
            GrepSource::PassiveRequest(p) | GrepSource::PassiveResponse(p) => {
                p.enabled_greps().collect()
            }
        }
    }
}

/// The payload as sent and before encoding
#[derive(Debug, Clone, Copy)]
pub struct PayloadEcho<'a> {
    pub raw: &'a str,
    pub encoded: &'a str,
}

/// One exchange under evaluation
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    pub request: &'a Request,
    pub response: &'a Response,
    pub payload: Option<PayloadEcho<'a>>,
}

/// Folds grep results left to right, ignoring the first operator
pub fn fold(results: &[(GrepOperator, bool)]) -> bool {
    let Some(((_, first), rest)) = results.split_first() else {
        return false;
    };
    rest.iter()
        .fold(*first, |acc, (operator, next)| operator.apply(acc, *next))
}

/// Baseline requests sent by content-length-diff greps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaselineCount {
    pub succeeded: u64,
    pub failed: u64,
}

/// Evaluates grep chains. Holds what content-length-diff greps need to
/// re-issue the original request, and counts what they sent.
pub struct Matcher<'a> {
    ctx: &'a ScanContext,
    requester: Option<&'a dyn Requester>,
    original: Option<&'a Request>,
    baseline_succeeded: AtomicU64,
    baseline_failed: AtomicU64,
}

impl<'a> Matcher<'a> {
    pub fn new(ctx: &'a ScanContext) -> Self {
        Self {
            ctx,
            requester: None,
            original: None,
            baseline_succeeded: AtomicU64::new(0),
            baseline_failed: AtomicU64::new(0),
        }
    }

    /// Baseline requests sent so far by this matcher. Cancelled ones are
    /// not counted.
    pub fn baseline_requests(&self) -> BaselineCount {
        BaselineCount {
            succeeded: self.baseline_succeeded.load(Ordering::Relaxed),
            failed: self.baseline_failed.load(Ordering::Relaxed),
        }
    }

    pub fn with_original(mut self, requester: &'a dyn Requester, original: &'a Request) -> Self {
        self.requester = Some(requester);
        self.original = Some(original);
        self
    }

    /// Evaluates every enabled grep of `source` against `input`. A source
    /// with no enabled greps never matches.
    pub async fn evaluate(
        &self,
        source: GrepSource<'_>,
        input: &MatchInput<'_>,
    ) -> (bool, Vec<Occurrence>) {
        let greps = source.greps();
        if greps.is_empty() {
            return (false, Vec::new());
        }

        let on_request = matches!(source, GrepSource::PassiveRequest(_));
        let mut results = Vec::with_capacity(greps.len());
        let mut occurrences = Vec::new();

        for grep in greps {
            let (ok, found) = self.check(grep, on_request, input).await;
            if ok {
                occurrences.extend(found);
            }
            results.push((grep.operator, ok));
        }

        (fold(&results), occurrences)
    }

    async fn check(
        &self,
        grep: &Grep,
        on_request: bool,
        input: &MatchInput<'_>,
    ) -> (bool, Vec<Occurrence>) {
        let response = input.response;

        match grep.match_type {
            GrepType::SimpleString | GrepType::Regex => {
                find_pattern(grep, &grep.value, self.scoped(grep, on_request, input))
            }
            GrepType::Payload | GrepType::PreEncodedPayload => {
                let Some(echo) = input.payload else {
                    return (false, Vec::new());
                };
                let needle = if grep.match_type == GrepType::Payload {
                    echo.encoded
                } else {
                    echo.raw
                };
                if needle.is_empty() {
                    return (false, Vec::new());
                }
                find_pattern(grep, needle, self.scoped(grep, on_request, input))
            }
            GrepType::StatusCode => (grep.status_codes().contains(&response.code), Vec::new()),
            GrepType::TimeDelay => {
                let ok = grep.time_delay().is_some_and(|delay| {
                    let elapsed = response.server_time();
                    elapsed >= delay && elapsed <= delay + TIME_DELAY_WINDOW
                });
                (ok, Vec::new())
            }
            GrepType::ContentType => {
                let media = response
                    .content_type()
                    .and_then(|ct| ct.split(';').next())
                    .map(|ct| ct.trim().to_ascii_lowercase());
                let ok = media.is_some_and(|m| grep.content_types().contains(&m));
                (ok, Vec::new())
            }
            GrepType::ContentLength => {
                let ok = grep
                    .length()
                    .is_some_and(|target| within_twenty_percent(response.content_length(), target));
                (ok, Vec::new())
            }
            GrepType::ContentLengthDiff => (self.length_differs(grep, response).await, Vec::new()),
            GrepType::UrlExtension => {
                let path = input.request.path_only();
                let file = path.rsplit('/').next().unwrap_or_default();
                let ok = file
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_ascii_lowercase())
                    .is_some_and(|ext| grep.extensions().contains(&ext));
                (ok, Vec::new())
            }
            GrepType::BlindHost => (false, Vec::new()),
        }
    }

    fn scoped(&self, grep: &Grep, on_request: bool, input: &MatchInput<'_>) -> Scoped {
        if on_request {
            request_scope(input.request, &grep.request_scope())
        } else {
            response_scope(input.response, &grep.options)
        }
    }

    /// Re-issues the original request and compares body lengths. Fails
    /// closed on any transport error.
    async fn length_differs(&self, grep: &Grep, response: &Response) -> bool {
        let (Some(requester), Some(original), Some(threshold)) =
            (self.requester, self.original, grep.length())
        else {
            debug!("Content length diff grep without original request, skipping");
            return false;
        };

        let mut fresh = original.clone();
        match requester.execute(self.ctx, &mut fresh).await {
            Ok(baseline) => {
                self.baseline_succeeded.fetch_add(1, Ordering::Relaxed);
                response.content_length().abs_diff(baseline.content_length()) >= threshold
            }
            Err(GauntletError::Cancelled) => false,
            Err(e) => {
                self.baseline_failed.fetch_add(1, Ordering::Relaxed);
                warn!("Content length diff baseline for {} failed: {}", original.full_url(), e);
                false
            }
        }
    }
}

/// `len` within ±20% of `target`, bounds inclusive
fn within_twenty_percent(len: usize, target: usize) -> bool {
    let (len, target) = (len as u128 * 100, target as u128);
    len >= target * 80 && len <= target * 120
}

fn find_pattern(grep: &Grep, needle: &str, scoped: Scoped) -> (bool, Vec<Occurrence>) {
    let Some(re) = grep.pattern(needle) else {
        debug!("Skipping grep with invalid pattern {:?}", needle);
        return (false, Vec::new());
    };
    let occurrences: Vec<Occurrence> = re
        .find_iter(&scoped.bytes)
        .filter(|m| !m.is_empty())
        .map(|m| Occurrence {
            start: scoped.offset + m.start(),
            end: scoped.offset + m.end(),
        })
        .collect();
    (!occurrences.is_empty(), occurrences)
}
