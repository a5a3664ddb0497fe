//! Query string and form body finders (`&`/`=` delimited pairs)

use super::{Affixed, Entrypoint, Finder, InsertionPointType};
use crate::http::Request;
use std::ops::Range;

/// One `name=value` pair, as byte ranges into the parsed string
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pair {
    pub name: Range<usize>,
    /// `None` for trailing keys without `=`
    pub value: Option<Range<usize>>,
}

/// Splits a `&`-delimited list of `name=value` pairs, skipping empty pairs
pub(crate) fn parse_pairs(input: &str) -> Vec<Pair> {
    let mut pairs = Vec::new();
    let mut start = 0;

    for chunk in input.split('&') {
        let end = start + chunk.len();
        if !chunk.is_empty() {
            let pair = match chunk.find('=') {
                Some(eq) => Pair {
                    name: start..start + eq,
                    value: Some(start + eq + 1..end),
                },
                None => Pair {
                    name: start..end,
                    value: None,
                },
            };
            if !pair.name.is_empty() {
                pairs.push(pair);
            }
        }
        start = end + 1;
    }

    pairs
}

/// Builds name and value entrypoints for every pair of `region[offset..]`
fn pair_points(
    region: &str,
    offset: usize,
    name_kind: InsertionPointType,
    value_kind: InsertionPointType,
) -> Vec<Affixed> {
    let mut out = Vec::new();

    for pair in parse_pairs(&region[offset..]) {
        let name_range = pair.name.start + offset..pair.name.end + offset;
        let name = &region[name_range.clone()];

        out.push(Affixed {
            kind: name_kind,
            param: Some(name.to_string()),
            value: name.to_string(),
            prefix: region[..name_range.start].to_string(),
            suffix: region[name_range.end..].to_string(),
        });

        match pair.value {
            Some(value) => {
                let value_range = value.start + offset..value.end + offset;
                out.push(Affixed {
                    kind: value_kind,
                    param: Some(name.to_string()),
                    value: region[value_range.clone()].to_string(),
                    prefix: region[..value_range.start].to_string(),
                    suffix: region[value_range.end..].to_string(),
                });
            }
            None => {
                // Injecting into a bare key gives it a value
                out.push(Affixed {
                    kind: value_kind,
                    param: Some(name.to_string()),
                    value: String::new(),
                    prefix: format!("{}=", &region[..name_range.end]),
                    suffix: region[name_range.end..].to_string(),
                });
            }
        }
    }

    out
}

/// Finds query string parameter names and values
pub struct QueryParamFinder;

impl Finder for QueryParamFinder {
    fn name(&self) -> &str {
        "query_params"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        let Some(question) = request.path.find('?') else {
            return Vec::new();
        };

        pair_points(
            &request.path,
            question + 1,
            InsertionPointType::ParamUrlName,
            InsertionPointType::ParamUrlValue,
        )
        .into_iter()
        .map(Entrypoint::Path)
        .collect()
    }
}

/// Finds url-encoded form body parameter names and values
pub struct BodyParamFinder;

impl BodyParamFinder {
    fn is_form(request: &Request, body: &str) -> bool {
        match request.content_type() {
            Some(ct) => ct
                .to_ascii_lowercase()
                .contains("application/x-www-form-urlencoded"),
            None => {
                let trimmed = body.trim_start();
                !trimmed.starts_with('{')
                    && !trimmed.starts_with('[')
                    && !trimmed.starts_with('<')
                    && trimmed.contains('=')
            }
        }
    }
}

impl Finder for BodyParamFinder {
    fn name(&self) -> &str {
        "body_params"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        let Some(body) = request.body_str() else {
            return Vec::new();
        };
        if body.is_empty() || !Self::is_form(request, body) {
            return Vec::new();
        }

        pair_points(
            body,
            0,
            InsertionPointType::ParamBodyName,
            InsertionPointType::ParamBodyValue,
        )
        .into_iter()
        .map(Entrypoint::Body)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entrypoint::PayloadPosition;

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs("a=1&&b=&c");
        assert_eq!(
            pairs,
            vec![
                Pair {
                    name: 0..1,
                    value: Some(2..3)
                },
                Pair {
                    name: 5..6,
                    value: Some(7..7)
                },
                Pair {
                    name: 8..9,
                    value: None
                },
            ]
        );
    }

    #[test]
    fn test_query_params() {
        let req = Request::get("http://a.test/s?q=hello&lang=en").expect("valid url");
        let points = QueryParamFinder.find(&req);
        assert_eq!(points.len(), 4);

        let value = &points[1];
        assert_eq!(value.kind(), InsertionPointType::ParamUrlValue);
        assert_eq!(value.param_name(), Some("q"));
        assert_eq!(
            value.inject(&req, PayloadPosition::Replace, "'").path,
            "/s?q='&lang=en"
        );
        assert_eq!(
            value.inject(&req, PayloadPosition::Append, "'").path,
            "/s?q=hello'&lang=en"
        );

        let name = &points[2];
        assert_eq!(name.kind(), InsertionPointType::ParamUrlName);
        assert_eq!(
            name.inject(&req, PayloadPosition::Replace, "x").path,
            "/s?q=hello&x=en"
        );
    }

    #[test]
    fn test_trailing_key_without_value() {
        let req = Request::get("http://a.test/s?a=1&debug").expect("valid url");
        let points = QueryParamFinder.find(&req);
        let value = points
            .iter()
            .find(|p| p.kind() == InsertionPointType::ParamUrlValue && p.param_name() == Some("debug"))
            .expect("bare key value entrypoint");
        assert_eq!(
            value.inject(&req, PayloadPosition::Replace, "1").path,
            "/s?a=1&debug=1"
        );
    }

    #[test]
    fn test_no_query() {
        let req = Request::get("http://a.test/s").expect("valid url");
        assert!(QueryParamFinder.find(&req).is_empty());
    }

    #[test]
    fn test_body_params() {
        let mut req = Request::get("http://a.test/login").expect("valid url");
        req.method = "POST".to_string();
        req.set_header("Content-Type", "application/x-www-form-urlencoded");
        req.body = b"param=value".to_vec();

        let points = BodyParamFinder.find(&req);
        assert_eq!(points.len(), 2);

        let name = points[0].inject(&req, PayloadPosition::Replace, "X");
        assert_eq!(name.body, b"X=value");
        let value = points[1].inject(&req, PayloadPosition::Replace, "X");
        assert_eq!(value.body, b"param=X");
        // Unrelated regions stay untouched
        assert_eq!(value.path, req.path);
        assert_eq!(value.headers, req.headers);
    }

    #[test]
    fn test_body_params_skip_json() {
        let mut req = Request::get("http://a.test/api").expect("valid url");
        req.set_header("Content-Type", "application/json");
        req.body = br#"{"a":"b=c"}"#.to_vec();
        assert!(BodyParamFinder.find(&req).is_empty());
    }
}
