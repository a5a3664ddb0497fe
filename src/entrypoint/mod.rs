//! Entrypoint discovery and payload injection
//!
//! A [`Finder`] locates every injectable position of one kind inside a
//! request. Each position is an [`Entrypoint`], which knows how to rebuild
//! the request with a payload placed at that position.
//!
//! Entrypoints come in two reconstruction families:
//!
//! - **affixed** (URL segments, query and form params, user markers): the
//!   region is stored as `prefix + value + suffix` and the payload is spliced
//!   in between the affixes.
//! - **templated** (cookies, JSON/XML/multipart fields, entire body): the
//!   finder renders the whole container once with the target replaced by
//!   [`SENTINEL`]; injection only substitutes the sentinel.

pub mod body;
pub mod cookie;
pub mod header;
pub mod json;
pub mod marker;
pub mod multipart;
pub mod path;
pub mod query;
pub mod xml;

use crate::http::Request;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub use body::EntireBodyFinder;
pub use cookie::CookieFinder;
pub use header::{HeaderFinder, NewHeaderFinder};
pub use json::JsonParamFinder;
pub use marker::{strip_markers, UserProvidedFinder, USER_MARKER};
pub use multipart::MultipartFinder;
pub use path::{PathDiscoveryFinder, UrlFinder};
pub use query::{BodyParamFinder, QueryParamFinder};
pub use xml::XmlParamFinder;

/// Placeholder rendered into templated containers in place of the target.
/// Alphanumeric only, so it survives JSON, XML and multipart serialization
/// untouched.
pub const SENTINEL: &str = "GAUNTLETxINSERTIONxPOINTx7f3c9a2e41d8b065";

/// Where the payload goes relative to the original value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadPosition {
    #[default]
    Replace,
    Append,
    Insert,
}

impl PayloadPosition {
    /// Places `payload` relative to `value`
    pub fn apply(self, value: &str, payload: &str) -> String {
        match self {
            PayloadPosition::Replace => payload.to_string(),
            PayloadPosition::Append => format!("{value}{payload}"),
            PayloadPosition::Insert => {
                let mid = floor_char_boundary(value, value.len() / 2);
                format!("{}{}{}", &value[..mid], payload, &value[mid..])
            }
        }
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Stable insertion point tags, as referenced by profile steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertionPointType {
    ParamUrlName,
    ParamUrlValue,
    ParamBodyName,
    ParamBodyValue,
    ParamCookieName,
    ParamCookieValue,
    ParamJsonName,
    ParamJsonValue,
    ParamXmlName,
    ParamXmlValue,
    ParamXmlAttrName,
    ParamXmlAttrValue,
    ParamMultipartName,
    ParamMultipartValue,
    ParamMultipartFilename,
    UrlPathFolder,
    UrlPathFilename,
    SinglePathDiscovery,
    PathDiscovery,
    EntireBodyForm,
    EntireBodyJson,
    EntireBodyXml,
    EntireBodyMultipart,
    HeaderHost,
    HeaderUserAgent,
    HeaderReferer,
    HeaderOrigin,
    HeaderContentType,
    HeaderAccept,
    HeaderAcceptLanguage,
    HeaderAcceptEncoding,
    NewHeaders,
    UserProvided,
}

impl InsertionPointType {
    /// Tag used in profiles and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParamUrlName => "param_url_name",
            Self::ParamUrlValue => "param_url_value",
            Self::ParamBodyName => "param_body_name",
            Self::ParamBodyValue => "param_body_value",
            Self::ParamCookieName => "param_cookie_name",
            Self::ParamCookieValue => "param_cookie_value",
            Self::ParamJsonName => "param_json_name",
            Self::ParamJsonValue => "param_json_value",
            Self::ParamXmlName => "param_xml_name",
            Self::ParamXmlValue => "param_xml_value",
            Self::ParamXmlAttrName => "param_xml_attr_name",
            Self::ParamXmlAttrValue => "param_xml_attr_value",
            Self::ParamMultipartName => "param_multipart_name",
            Self::ParamMultipartValue => "param_multipart_value",
            Self::ParamMultipartFilename => "param_multipart_filename",
            Self::UrlPathFolder => "url_path_folder",
            Self::UrlPathFilename => "url_path_filename",
            Self::SinglePathDiscovery => "single_path_discovery",
            Self::PathDiscovery => "path_discovery",
            Self::EntireBodyForm => "entire_body_form",
            Self::EntireBodyJson => "entire_body_json",
            Self::EntireBodyXml => "entire_body_xml",
            Self::EntireBodyMultipart => "entire_body_multipart",
            Self::HeaderHost => "header_host",
            Self::HeaderUserAgent => "header_user_agent",
            Self::HeaderReferer => "header_referer",
            Self::HeaderOrigin => "header_origin",
            Self::HeaderContentType => "header_content_type",
            Self::HeaderAccept => "header_accept",
            Self::HeaderAcceptLanguage => "header_accept_language",
            Self::HeaderAcceptEncoding => "header_accept_encoding",
            Self::NewHeaders => "new_headers",
            Self::UserProvided => "user_provided",
        }
    }

    /// Short description of the region, used in reports
    pub fn description(&self) -> &'static str {
        match self {
            Self::ParamUrlName | Self::ParamUrlValue => "query param",
            Self::ParamBodyName | Self::ParamBodyValue => "body param",
            Self::ParamCookieName | Self::ParamCookieValue => "cookie",
            Self::ParamJsonName | Self::ParamJsonValue => "json param",
            Self::ParamXmlName | Self::ParamXmlValue => "xml element",
            Self::ParamXmlAttrName | Self::ParamXmlAttrValue => "xml attribute",
            Self::ParamMultipartName | Self::ParamMultipartValue => "multipart field",
            Self::ParamMultipartFilename => "multipart filename",
            Self::UrlPathFolder => "url folder",
            Self::UrlPathFilename => "url filename",
            Self::SinglePathDiscovery | Self::PathDiscovery => "path discovery",
            Self::EntireBodyForm
            | Self::EntireBodyJson
            | Self::EntireBodyXml
            | Self::EntireBodyMultipart => "entire body",
            Self::HeaderHost
            | Self::HeaderUserAgent
            | Self::HeaderReferer
            | Self::HeaderOrigin
            | Self::HeaderContentType
            | Self::HeaderAccept
            | Self::HeaderAcceptLanguage
            | Self::HeaderAcceptEncoding => "header",
            Self::NewHeaders => "new header",
            Self::UserProvided => "user provided",
        }
    }

    /// True for kinds where the payload replaces a name rather than a value
    pub fn is_name(&self) -> bool {
        matches!(
            self,
            Self::ParamUrlName
                | Self::ParamBodyName
                | Self::ParamCookieName
                | Self::ParamJsonName
                | Self::ParamXmlName
                | Self::ParamXmlAttrName
                | Self::ParamMultipartName
        )
    }
}

impl fmt::Display for InsertionPointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Family A context: the region is `prefix + value + suffix`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affixed {
    pub kind: InsertionPointType,
    pub param: Option<String>,
    pub value: String,
    pub prefix: String,
    pub suffix: String,
}

impl Affixed {
    fn render(&self, position: PayloadPosition, payload: &str) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            position.apply(&self.value, payload),
            self.suffix
        )
    }
}

/// Family B context: the whole container rendered with [`SENTINEL`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templated {
    pub kind: InsertionPointType,
    pub param: Option<String>,
    pub value: String,
    pub template: String,
}

impl Templated {
    fn render(&self, position: PayloadPosition, payload: &str) -> String {
        self.template
            .replace(SENTINEL, &position.apply(&self.value, payload))
    }
}

/// One injectable location within a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entrypoint {
    /// Affixed over the request path (including the query string)
    Path(Affixed),
    /// Affixed over the request body
    Body(Affixed),
    /// Affixed over one value of a header
    HeaderValue {
        name: String,
        index: usize,
        point: Affixed,
    },
    /// Templated over one `Cookie` header line
    Cookie { index: usize, point: Templated },
    /// Templated over a structured body (JSON, XML, multipart)
    Document(Templated),
    /// The whole body; `Content-Type` is rewritten to match the kind
    EntireBody(Templated),
    /// Every value of an existing header
    ExistingHeader {
        kind: InsertionPointType,
        name: String,
        values: Vec<String>,
    },
    /// A header added from a `Name: value` payload
    NewHeader,
}

impl Entrypoint {
    pub fn kind(&self) -> InsertionPointType {
        match self {
            Entrypoint::Path(p) | Entrypoint::Body(p) => p.kind,
            Entrypoint::HeaderValue { point, .. } => point.kind,
            Entrypoint::Cookie { point, .. } => point.kind,
            Entrypoint::Document(t) | Entrypoint::EntireBody(t) => t.kind,
            Entrypoint::ExistingHeader { kind, .. } => *kind,
            Entrypoint::NewHeader => InsertionPointType::NewHeaders,
        }
    }

    /// Parameter name the entrypoint targets, if it has one
    pub fn param_name(&self) -> Option<&str> {
        match self {
            Entrypoint::Path(p) | Entrypoint::Body(p) => p.param.as_deref(),
            Entrypoint::HeaderValue { name, .. } => Some(name),
            Entrypoint::Cookie { point, .. } => point.param.as_deref(),
            Entrypoint::Document(t) | Entrypoint::EntireBody(t) => t.param.as_deref(),
            Entrypoint::ExistingHeader { name, .. } => Some(name),
            Entrypoint::NewHeader => None,
        }
    }

    /// Original value at this location
    pub fn value(&self) -> &str {
        match self {
            Entrypoint::Path(p) | Entrypoint::Body(p) => &p.value,
            Entrypoint::HeaderValue { point, .. } => &point.value,
            Entrypoint::Cookie { point, .. } => &point.value,
            Entrypoint::Document(t) | Entrypoint::EntireBody(t) => &t.value,
            Entrypoint::ExistingHeader { values, .. } => {
                values.first().map(String::as_str).unwrap_or_default()
            }
            Entrypoint::NewHeader => "",
        }
    }

    /// Human-readable label for reports, e.g. `id (query param)`.
    /// For name kinds the payload is shown, since it replaced the name.
    pub fn param(&self, payload: &str) -> String {
        let kind = self.kind();
        let description = kind.description();
        if kind.is_name() {
            return format!("{payload} ({description})");
        }
        match self.param_name() {
            Some(name) if !name.is_empty() => format!("{name} ({description})"),
            _ => description.to_string(),
        }
    }

    /// Returns a copy of `request` with the payload placed at this location.
    /// The input request is never modified.
    pub fn inject(&self, request: &Request, position: PayloadPosition, payload: &str) -> Request {
        let mut out = request.clone();

        match self {
            Entrypoint::Path(point) => {
                out.path = point.render(position, payload);
            }
            Entrypoint::Body(point) => {
                out.set_body(point.render(position, payload).into_bytes());
            }
            Entrypoint::HeaderValue { name, index, point } => {
                let rendered = point.render(position, payload);
                if let Some(slot) = header_slot(&mut out, name, *index) {
                    *slot = rendered;
                }
            }
            Entrypoint::Cookie { index, point } => {
                let rendered = point.render(position, payload);
                if let Some(slot) = header_slot(&mut out, "Cookie", *index) {
                    *slot = rendered;
                }
            }
            Entrypoint::Document(point) => {
                out.set_body(point.render(position, payload).into_bytes());
            }
            Entrypoint::EntireBody(point) => {
                let body = point.render(position, payload);
                let Some(content_type) = entire_body_content_type(point.kind, &body) else {
                    debug!("Malformed multipart envelope, leaving request untouched");
                    return out;
                };
                out.set_header("Content-Type", &content_type);
                out.set_body(body.into_bytes());
            }
            Entrypoint::ExistingHeader { name, .. } => {
                let key = out
                    .headers
                    .keys()
                    .find(|k| k.eq_ignore_ascii_case(name))
                    .cloned();
                if let Some(values) = key.and_then(|k| out.headers.get_mut(&k)) {
                    for value in values.iter_mut() {
                        *value = position.apply(value, payload);
                    }
                }
            }
            Entrypoint::NewHeader => match payload.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => {
                    out.add_header(name.trim(), value.trim());
                }
                _ => debug!("New header payload without a name: {payload}"),
            },
        }

        out
    }
}

fn header_slot<'a>(request: &'a mut Request, name: &str, index: usize) -> Option<&'a mut String> {
    let key = request
        .headers
        .keys()
        .find(|k| k.eq_ignore_ascii_case(name))
        .cloned()?;
    request.headers.get_mut(&key)?.get_mut(index)
}

/// Content type matching an entire-body kind. `None` when a multipart body
/// looks like an envelope but carries no usable boundary.
fn entire_body_content_type(kind: InsertionPointType, body: &str) -> Option<String> {
    let content_type = match kind {
        InsertionPointType::EntireBodyJson => "application/json".to_string(),
        InsertionPointType::EntireBodyXml => "application/xml".to_string(),
        InsertionPointType::EntireBodyMultipart => {
            if !body.starts_with("--") {
                return Some("multipart/form-data".to_string());
            }
            let first_line = body.lines().next().unwrap_or_default();
            let boundary = first_line.trim_start_matches("--").trim_end();
            if boundary.is_empty() {
                return None;
            }
            format!("multipart/form-data; boundary={boundary}")
        }
        _ => "application/x-www-form-urlencoded".to_string(),
    };
    Some(content_type)
}

/// Discovers entrypoints of one kind. Never fails: unparseable regions
/// simply yield no entrypoints.
pub trait Finder: Send + Sync {
    /// Returns the finder name
    fn name(&self) -> &str;

    /// Returns every entrypoint of this finder's kind in `request`
    fn find(&self, request: &Request) -> Vec<Entrypoint>;
}

/// All built-in finders
pub fn default_finders() -> Vec<Arc<dyn Finder>> {
    vec![
        Arc::new(UrlFinder),
        Arc::new(PathDiscoveryFinder),
        Arc::new(QueryParamFinder),
        Arc::new(BodyParamFinder),
        Arc::new(JsonParamFinder),
        Arc::new(XmlParamFinder),
        Arc::new(MultipartFinder),
        Arc::new(CookieFinder),
        Arc::new(HeaderFinder),
        Arc::new(NewHeaderFinder),
        Arc::new(EntireBodyFinder),
        Arc::new(UserProvidedFinder),
    ]
}

/// Runs every finder over `request`, in finder order
pub fn find_all(finders: &[Arc<dyn Finder>], request: &Request) -> Vec<Entrypoint> {
    finders.iter().flat_map(|f| f.find(request)).collect()
}

/// Replaces `spans` of `source` with [`SENTINEL`]. Spans must be sorted and
/// non-overlapping.
pub(crate) fn render_with_sentinel(source: &str, spans: &[std::ops::Range<usize>]) -> String {
    let mut out = String::with_capacity(source.len() + spans.len() * SENTINEL.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&source[cursor..span.start]);
        out.push_str(SENTINEL);
        cursor = span.end;
    }
    out.push_str(&source[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn affixed(prefix: &str, value: &str, suffix: &str) -> Affixed {
        Affixed {
            kind: InsertionPointType::ParamUrlValue,
            param: Some("q".to_string()),
            value: value.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        }
    }

    #[test]
    fn test_affixed_lengths() {
        let cases = [("/s?q=", "hello", "&x=1"), ("", "", ""), ("p", "ab", "")];
        for (p, v, s) in cases {
            let point = affixed(p, v, s);
            let x = "<PAYLOAD>";
            assert_eq!(
                point.render(PayloadPosition::Replace, x).len(),
                p.len() + x.len() + s.len()
            );
            assert_eq!(
                point.render(PayloadPosition::Append, x).len(),
                p.len() + v.len() + x.len() + s.len()
            );
            assert_eq!(
                point.render(PayloadPosition::Insert, x).len(),
                p.len() + v.len() + x.len() + s.len()
            );
        }
    }

    #[test]
    fn test_positions() {
        assert_eq!(PayloadPosition::Replace.apply("value", "X"), "X");
        assert_eq!(PayloadPosition::Append.apply("value", "X"), "valueX");
        assert_eq!(PayloadPosition::Insert.apply("value", "X"), "vaXlue");
        assert_eq!(PayloadPosition::Insert.apply("", "X"), "X");
    }

    #[test]
    fn test_insert_respects_char_boundaries() {
        // "añb" is 4 bytes; the midpoint falls inside 'ñ'
        assert_eq!(PayloadPosition::Insert.apply("añb", "X"), "aXñb");
    }

    #[test]
    fn test_templated_substitution() {
        let point = Templated {
            kind: InsertionPointType::ParamCookieValue,
            param: Some("a".to_string()),
            value: "1".to_string(),
            template: format!("a={SENTINEL}; b=2"),
        };
        assert_eq!(point.render(PayloadPosition::Append, "X"), "a=1X; b=2");
    }

    #[test]
    fn test_param_label() {
        let value = Entrypoint::Path(affixed("/s?q=", "1", ""));
        assert_eq!(value.param("x"), "q (query param)");

        let mut name_point = affixed("/s?", "q", "=1");
        name_point.kind = InsertionPointType::ParamUrlName;
        assert_eq!(Entrypoint::Path(name_point).param("evil"), "evil (query param)");
        assert_eq!(Entrypoint::NewHeader.param("X-A: b"), "new header");
    }

    #[test]
    fn test_inject_existing_header_every_value() {
        let mut req = Request::get("http://a.test/").expect("valid url");
        req.add_header("Accept", "text/html");
        req.add_header("Accept", "*/*");
        let point = Entrypoint::ExistingHeader {
            kind: InsertionPointType::HeaderAccept,
            name: "Accept".to_string(),
            values: req.header_values("Accept").cloned().unwrap_or_default(),
        };
        let out = point.inject(&req, PayloadPosition::Append, "'");
        assert_eq!(
            out.header_values("accept"),
            Some(&vec!["text/html'".to_string(), "*/*'".to_string()])
        );
        // The original is untouched
        assert_eq!(req.header("Accept"), Some("text/html"));
    }

    #[test]
    fn test_inject_new_header() {
        let req = Request::get("http://a.test/").expect("valid url");
        let out = Entrypoint::NewHeader.inject(&req, PayloadPosition::Replace, "X-Forwarded-For: 127.0.0.1");
        assert_eq!(out.header("x-forwarded-for"), Some("127.0.0.1"));

        let unchanged = Entrypoint::NewHeader.inject(&req, PayloadPosition::Replace, "garbage");
        assert_eq!(unchanged, req);
    }

    #[test]
    fn test_entire_body_multipart_boundary() {
        assert_eq!(
            entire_body_content_type(
                InsertionPointType::EntireBodyMultipart,
                "--abc\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--abc--"
            ),
            Some("multipart/form-data; boundary=abc".to_string())
        );
        assert_eq!(
            entire_body_content_type(InsertionPointType::EntireBodyMultipart, "--\r\nx"),
            None
        );
        assert_eq!(
            entire_body_content_type(InsertionPointType::EntireBodyJson, "{}"),
            Some("application/json".to_string())
        );
    }

    #[test]
    fn test_render_with_sentinel() {
        let out = render_with_sentinel("<a>b</a>", &[1..2, 6..7]);
        assert_eq!(out, format!("<{SENTINEL}>b</{SENTINEL}>"));
    }
}
