//! Header finders: well-known existing headers and new headers

use super::{Entrypoint, Finder, InsertionPointType};
use crate::http::Request;

/// Existing headers considered injectable
const INJECTABLE_HEADERS: &[(&str, InsertionPointType)] = &[
    ("Host", InsertionPointType::HeaderHost),
    ("User-Agent", InsertionPointType::HeaderUserAgent),
    ("Referer", InsertionPointType::HeaderReferer),
    ("Origin", InsertionPointType::HeaderOrigin),
    ("Content-Type", InsertionPointType::HeaderContentType),
    ("Accept", InsertionPointType::HeaderAccept),
    ("Accept-Language", InsertionPointType::HeaderAcceptLanguage),
    ("Accept-Encoding", InsertionPointType::HeaderAcceptEncoding),
];

/// Finds the allow-listed headers present in the request
pub struct HeaderFinder;

impl Finder for HeaderFinder {
    fn name(&self) -> &str {
        "headers"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        INJECTABLE_HEADERS
            .iter()
            .filter_map(|(name, kind)| {
                let (actual, values) = request
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))?;
                Some(Entrypoint::ExistingHeader {
                    kind: *kind,
                    name: actual.clone(),
                    values: values.clone(),
                })
            })
            .collect()
    }
}

/// Always yields the single new-header entrypoint; the header itself comes
/// from the payload (`Name: value`).
pub struct NewHeaderFinder;

impl Finder for NewHeaderFinder {
    fn name(&self) -> &str {
        "new_headers"
    }

    fn find(&self, _request: &Request) -> Vec<Entrypoint> {
        vec![Entrypoint::NewHeader]
    }
}
