//! User-provided injection markers
//!
//! Users can embed [`USER_MARKER`] anywhere in the path, a header value or
//! the body to mark a manual injection point. Every marker yields one
//! affixed entrypoint; the other markers are stripped from its affixes.

use super::{Affixed, Entrypoint, Finder, InsertionPointType};
use crate::http::Request;

/// Literal token marking a manual injection point
pub const USER_MARKER: &str = "{{INJECT}}";

/// Finds every user-provided marker
pub struct UserProvidedFinder;

fn marker_points(region: &str) -> Vec<Affixed> {
    region
        .match_indices(USER_MARKER)
        .map(|(pos, _)| Affixed {
            kind: InsertionPointType::UserProvided,
            param: None,
            value: String::new(),
            prefix: region[..pos].replace(USER_MARKER, ""),
            suffix: region[pos + USER_MARKER.len()..].replace(USER_MARKER, ""),
        })
        .collect()
}

impl Finder for UserProvidedFinder {
    fn name(&self) -> &str {
        "user_provided"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        let mut out: Vec<Entrypoint> = marker_points(&request.path)
            .into_iter()
            .map(Entrypoint::Path)
            .collect();

        for name in request.sorted_header_names() {
            for (index, value) in request.headers[name].iter().enumerate() {
                out.extend(
                    marker_points(value)
                        .into_iter()
                        .map(|point| Entrypoint::HeaderValue {
                            name: name.clone(),
                            index,
                            point,
                        }),
                );
            }
        }

        if let Some(body) = request.body_str() {
            out.extend(marker_points(body).into_iter().map(Entrypoint::Body));
        }

        out
    }
}

/// Returns a copy of the request with every marker removed
pub fn strip_markers(request: &Request) -> Request {
    let mut out = request.clone();
    out.path = out.path.replace(USER_MARKER, "");
    for values in out.headers.values_mut() {
        for value in values.iter_mut() {
            *value = value.replace(USER_MARKER, "");
        }
    }
    if let Some(body) = request.body_str() {
        if body.contains(USER_MARKER) {
            out.set_body(body.replace(USER_MARKER, "").into_bytes());
        }
    }
    out
}
