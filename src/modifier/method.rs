//! HTTP method transform (GET to POST and back)

use super::{ModifyContext, Modifier};
use crate::http::Request;
use crate::profile::MethodChange;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Moves the query string into a form body, or the body into the query
/// string, verbatim
pub struct HttpMethodModifier;

pub(crate) fn get_to_post(mut request: Request) -> Request {
    if !request.method.eq_ignore_ascii_case("GET") {
        return request;
    }
    let query = request.query().unwrap_or_default().to_string();
    request.method = "POST".to_string();
    request.set_query(None);
    if !request.has_header("Content-Type") {
        request.set_header("Content-Type", FORM_CONTENT_TYPE);
    }
    request.body = query.into_bytes();
    let len = request.body.len().to_string();
    request.set_header("Content-Length", &len);
    request
}

pub(crate) fn post_to_get(mut request: Request) -> Request {
    if !request.method.eq_ignore_ascii_case("POST") {
        return request;
    }
    let body = String::from_utf8_lossy(&request.body).into_owned();
    let query = match request.query() {
        Some(existing) if !existing.is_empty() && !body.is_empty() => format!("{existing}&{body}"),
        Some(existing) if body.is_empty() => existing.to_string(),
        _ => body,
    };
    request.method = "GET".to_string();
    request.set_query(Some(&query));
    request.body.clear();
    request.remove_header("Content-Length");
    request.remove_header("Content-Type");
    request
}

impl Modifier for HttpMethodModifier {
    fn name(&self) -> &str {
        "http_method"
    }

    fn modify(&self, ctx: &ModifyContext<'_>, request: Request) -> Request {
        let Some(change) = ctx.step.and_then(|s| s.method_change) else {
            return request;
        };

        let before = request.method.clone();
        let mut out = match change {
            MethodChange::GetToPost => get_to_post(request),
            MethodChange::PostToGet => post_to_get(request),
            MethodChange::Swap => {
                if before.eq_ignore_ascii_case("GET") {
                    get_to_post(request)
                } else {
                    post_to_get(request)
                }
            }
        };

        if out.method != before {
            out.modifications
                .insert("method".to_string(), format!("{before} -> {}", out.method));
        }
        out
    }
}
