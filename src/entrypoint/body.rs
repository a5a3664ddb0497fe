//! Entire-body finder

use super::{Entrypoint, Finder, InsertionPointType, Templated, SENTINEL};
use crate::http::Request;

const ENTIRE_BODY_KINDS: [InsertionPointType; 4] = [
    InsertionPointType::EntireBodyForm,
    InsertionPointType::EntireBodyJson,
    InsertionPointType::EntireBodyXml,
    InsertionPointType::EntireBodyMultipart,
];

/// Targets the whole body once per content family. Injection also rewrites
/// `Content-Type` to match the family.
pub struct EntireBodyFinder;

impl Finder for EntireBodyFinder {
    fn name(&self) -> &str {
        "entire_body"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        let Some(body) = request.body_str() else {
            return Vec::new();
        };
        if body.is_empty() {
            return Vec::new();
        }

        ENTIRE_BODY_KINDS
            .iter()
            .map(|kind| {
                Entrypoint::EntireBody(Templated {
                    kind: *kind,
                    param: None,
                    value: body.to_string(),
                    template: SENTINEL.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entrypoint::PayloadPosition;

    #[test]
    fn test_entire_body_rewrites_content_type() {
        let mut req = Request::get("http://a.test/api").expect("valid url");
        req.method = "POST".to_string();
        req.set_header("Content-Type", "application/x-www-form-urlencoded");
        req.set_header("Content-Length", "3");
        req.body = b"a=1".to_vec();

        let points = EntireBodyFinder.find(&req);
        assert_eq!(points.len(), 4);

        let json = points
            .iter()
            .find(|p| p.kind() == InsertionPointType::EntireBodyJson)
            .expect("json kind");
        let out = json.inject(&req, PayloadPosition::Replace, r#"{"x":1}"#);
        assert_eq!(out.body, br#"{"x":1}"#);
        assert_eq!(out.content_type(), Some("application/json"));
        assert_eq!(out.header("Content-Length"), Some("7"));

        let multipart = points
            .iter()
            .find(|p| p.kind() == InsertionPointType::EntireBodyMultipart)
            .expect("multipart kind");
        let broken = multipart.inject(&req, PayloadPosition::Replace, "--\r\n");
        assert_eq!(broken, req);
    }

    #[test]
    fn test_empty_body() {
        let req = Request::get("http://a.test/").expect("valid url");
        assert!(EntireBodyFinder.find(&req).is_empty());
    }
}
