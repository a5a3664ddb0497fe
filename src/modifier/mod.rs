//! Request modifiers
//!
//! Every outbound request goes through an ordered chain of modifiers. Each
//! one is a pure `Request -> Request` transform and records what it
//! substituted in `Request::modifications`.

pub mod method;

use crate::entrypoint::Entrypoint;
use crate::http::{RedirectPolicy, Request};
use crate::models::{BlindHostConfig, ScanConfig, Template};
use crate::profile::{ReplaceScope, Step};
use std::sync::Arc;
use std::time::Duration;

pub use method::HttpMethodModifier;

/// Replaced by a fresh random token on every request
pub const RANDOM_MARKER: &str = "{RANDOM}";
/// Replaced by `<correlation id>.<blind host>`
pub const BLIND_HOST_MARKER: &str = "{BH}";
/// Legacy alias of [`BLIND_HOST_MARKER`]
pub const LEGACY_BLIND_HOST_MARKER: &str = "{BC}";
pub const EMAIL_MARKER: &str = "{EMAIL}";

/// Headroom added over the largest time-delay grep
const TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Everything a modifier may look at besides the request itself
#[derive(Clone, Copy)]
pub struct ModifyContext<'a> {
    /// Absent for base requests
    pub step: Option<&'a Step>,
    pub template: &'a Template,
    /// The entrypoint being attacked, for insertion point placeholders
    pub entrypoint: Option<&'a Entrypoint>,
    pub payload: Option<&'a str>,
}

impl<'a> ModifyContext<'a> {
    pub fn base(template: &'a Template) -> Self {
        Self {
            step: None,
            template,
            entrypoint: None,
            payload: None,
        }
    }
}

pub trait Modifier: Send + Sync {
    fn name(&self) -> &str;

    fn modify(&self, ctx: &ModifyContext<'_>, request: Request) -> Request;
}

/// Replaces `from` in the path, every header value and a UTF-8 body.
/// Returns whether anything changed.
pub(crate) fn replace_everywhere(request: &mut Request, from: &str, to: &str) -> bool {
    let mut changed = false;

    if request.path.contains(from) {
        request.path = request.path.replace(from, to);
        changed = true;
    }
    for values in request.headers.values_mut() {
        for value in values.iter_mut() {
            if value.contains(from) {
                *value = value.replace(from, to);
                changed = true;
            }
        }
    }
    let body = request
        .body_str()
        .filter(|b| b.contains(from))
        .map(|b| b.replace(from, to));
    if let Some(body) = body {
        request.set_body(body.into_bytes());
        changed = true;
    }

    changed
}

/// True when `text` references the blind host
pub fn mentions_blind_host(text: &str) -> bool {
    text.contains(BLIND_HOST_MARKER) || text.contains(LEGACY_BLIND_HOST_MARKER)
}

/// Short random identifier, safe for use as a DNS label
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..20].to_string()
}

pub struct RandomTokenModifier;

impl Modifier for RandomTokenModifier {
    fn name(&self) -> &str {
        "random_token"
    }

    fn modify(&self, _ctx: &ModifyContext<'_>, mut request: Request) -> Request {
        let token = new_token();
        if replace_everywhere(&mut request, RANDOM_MARKER, &token) {
            request.modifications.insert(RANDOM_MARKER.to_string(), token);
        }
        request
    }
}

/// Request-scoped match-and-replace rules of the step
pub struct MatchReplaceModifier;

impl Modifier for MatchReplaceModifier {
    fn name(&self) -> &str {
        "match_replace"
    }

    fn modify(&self, ctx: &ModifyContext<'_>, mut request: Request) -> Request {
        let Some(step) = ctx.step else {
            return request;
        };

        for rule in step
            .match_and_replaces
            .iter()
            .filter(|r| r.scope == ReplaceScope::Request)
        {
            let before = request.clone();
            request.path = rule.apply(&request.path);
            for values in request.headers.values_mut() {
                for value in values.iter_mut() {
                    *value = rule.apply(value);
                }
            }
            if let Some(body) = request.body_str().map(|b| rule.apply(b)) {
                if body.as_bytes() != request.body.as_slice() {
                    request.set_body(body.into_bytes());
                }
            }
            if request != before {
                request
                    .modifications
                    .insert(rule.pattern.clone(), rule.replacement.clone());
            }
        }
        request
    }
}

/// `{CURRENT_*}` placeholders, resolved from the template and the
/// entrypoint under attack
pub struct PlaceholderModifier;

impl PlaceholderModifier {
    fn values(ctx: &ModifyContext<'_>) -> Vec<(&'static str, String)> {
        let original = &ctx.template.request;
        let path_only = original.path_only();
        let file = path_only.rsplit('/').next().unwrap_or_default();

        let mut values = vec![
            ("{CURRENT_URL}", original.full_url()),
            ("{CURRENT_METHOD}", original.method.clone()),
            ("{CURRENT_PATH}", path_only.to_string()),
            ("{CURRENT_FILE}", file.to_string()),
            ("{CURRENT_QUERY}", original.query().unwrap_or_default().to_string()),
            ("{CURRENT_HOST}", original.host().unwrap_or_default()),
        ];

        if let Some(entrypoint) = ctx.entrypoint {
            values.push((
                "{CURRENT_INSERTION_POINT_NAME}",
                entrypoint.param_name().unwrap_or_default().to_string(),
            ));
            values.push((
                "{CURRENT_INSERTION_POINT_TYPE}",
                entrypoint.kind().to_string(),
            ));
            // Bare form last so it does not eat the suffixed ones
            values.push(("{CURRENT_INSERTION_POINT}", entrypoint.value().to_string()));
        }
        values
    }
}

impl Modifier for PlaceholderModifier {
    fn name(&self) -> &str {
        "placeholders"
    }

    fn modify(&self, ctx: &ModifyContext<'_>, mut request: Request) -> Request {
        for (marker, value) in Self::values(ctx) {
            if replace_everywhere(&mut request, marker, &value) {
                request.modifications.insert(marker.to_string(), value);
            }
        }
        request
    }
}

/// Stretches the timeout past the slowest time-delay grep of the step
pub struct TimeoutModifier;

impl Modifier for TimeoutModifier {
    fn name(&self) -> &str {
        "timeout"
    }

    fn modify(&self, ctx: &ModifyContext<'_>, mut request: Request) -> Request {
        if let Some(delay) = ctx.step.and_then(Step::max_time_delay) {
            let needed = delay + TIMEOUT_MARGIN;
            if request.timeout < needed {
                request.timeout = needed;
                request
                    .modifications
                    .insert("timeout".to_string(), format!("{}ms", needed.as_millis()));
            }
        }
        request
    }
}

/// Applies the step redirect override, or the scan-wide policy
pub struct RedirectModifier {
    pub policy: RedirectPolicy,
    pub max_redirects: u32,
}

impl Modifier for RedirectModifier {
    fn name(&self) -> &str {
        "redirect"
    }

    fn modify(&self, ctx: &ModifyContext<'_>, mut request: Request) -> Request {
        request.redirect = ctx.step.and_then(|s| s.redirect).unwrap_or(self.policy);
        request.max_redirects = ctx
            .step
            .and_then(|s| s.max_redirects)
            .unwrap_or(self.max_redirects);
        request
    }
}

/// Binds `{BH}` to a per-request correlation id under the blind host
pub struct BlindHostModifier {
    pub host: String,
}

impl Modifier for BlindHostModifier {
    fn name(&self) -> &str {
        "blind_host"
    }

    fn modify(&self, _ctx: &ModifyContext<'_>, mut request: Request) -> Request {
        if request.uid.is_empty() {
            request.uid = new_token();
        }
        let target = format!("{}.{}", request.uid, self.host);

        let mut changed = replace_everywhere(&mut request, BLIND_HOST_MARKER, &target);
        changed |= replace_everywhere(&mut request, LEGACY_BLIND_HOST_MARKER, &target);
        if changed {
            request
                .modifications
                .insert(BLIND_HOST_MARKER.to_string(), target);
        }
        request
    }
}

pub struct EmailModifier {
    pub email: String,
}

impl Modifier for EmailModifier {
    fn name(&self) -> &str {
        "email"
    }

    fn modify(&self, _ctx: &ModifyContext<'_>, mut request: Request) -> Request {
        if replace_everywhere(&mut request, EMAIL_MARKER, &self.email) {
            request
                .modifications
                .insert(EMAIL_MARKER.to_string(), self.email.clone());
        }
        request
    }
}

/// Adds the step's custom `Name: value` headers
pub struct StepHeadersModifier;

impl Modifier for StepHeadersModifier {
    fn name(&self) -> &str {
        "step_headers"
    }

    fn modify(&self, ctx: &ModifyContext<'_>, mut request: Request) -> Request {
        let Some(step) = ctx.step else {
            return request;
        };
        for line in &step.custom_headers {
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() {
                    request.set_header(name, value.trim());
                    request
                        .modifications
                        .insert(format!("header:{name}"), value.trim().to_string());
                }
            }
        }
        request
    }
}

/// The modifier chain for a scan, in application order
pub fn default_chain(config: &ScanConfig) -> Vec<Arc<dyn Modifier>> {
    let mut chain: Vec<Arc<dyn Modifier>> = vec![
        Arc::new(RandomTokenModifier),
        Arc::new(HttpMethodModifier),
        Arc::new(MatchReplaceModifier),
        Arc::new(PlaceholderModifier),
        Arc::new(StepHeadersModifier),
        Arc::new(TimeoutModifier),
        Arc::new(RedirectModifier {
            policy: config.redirect,
            max_redirects: config.max_redirects,
        }),
    ];
    if let Some(BlindHostConfig { host, .. }) = &config.blind_host {
        chain.push(Arc::new(BlindHostModifier { host: host.clone() }));
    }
    if let Some(email) = &config.email {
        chain.push(Arc::new(EmailModifier {
            email: email.clone(),
        }));
    }
    chain
}

/// Runs `request` through every modifier of `chain`
pub fn apply_chain(chain: &[Arc<dyn Modifier>], ctx: &ModifyContext<'_>, request: Request) -> Request {
    chain
        .iter()
        .fold(request, |request, modifier| modifier.modify(ctx, request))
}
