//! Cookie finder
//!
//! Each `Cookie` header line is rendered as a template with one cookie name
//! or value replaced by the sentinel.

use super::{render_with_sentinel, Entrypoint, Finder, InsertionPointType, Templated, SENTINEL};
use crate::http::Request;

pub struct CookieFinder;

impl Finder for CookieFinder {
    fn name(&self) -> &str {
        "cookies"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        let Some(lines) = request.header_values("Cookie") else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            if line.contains(SENTINEL) {
                continue;
            }

            let mut start = 0;
            for chunk in line.split(';') {
                let end = start + chunk.len();
                let leading = chunk.len() - chunk.trim_start().len();
                let chunk_start = start + leading;
                let trimmed = chunk.trim();

                if !trimmed.is_empty() {
                    let (name_range, value_range) = match trimmed.find('=') {
                        Some(eq) => (
                            chunk_start..chunk_start + eq,
                            Some(chunk_start + eq + 1..chunk_start + trimmed.len()),
                        ),
                        None => (chunk_start..chunk_start + trimmed.len(), None),
                    };
                    let name = line[name_range.clone()].to_string();

                    out.push(Entrypoint::Cookie {
                        index,
                        point: Templated {
                            kind: InsertionPointType::ParamCookieName,
                            param: Some(name.clone()),
                            value: name.clone(),
                            template: render_with_sentinel(line, &[name_range]),
                        },
                    });

                    if let Some(value_range) = value_range {
                        out.push(Entrypoint::Cookie {
                            index,
                            point: Templated {
                                kind: InsertionPointType::ParamCookieValue,
                                param: Some(name),
                                value: line[value_range.clone()].to_string(),
                                template: render_with_sentinel(line, &[value_range]),
                            },
                        });
                    }
                }
                start = end + 1;
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entrypoint::PayloadPosition;

    #[test]
    fn test_cookie_lines() {
        let mut req = Request::get("http://a.test/").expect("valid url");
        req.add_header("Cookie", "session=abc; theme=dark");
        req.add_header("Cookie", "lang=en");

        let points = CookieFinder.find(&req);
        assert_eq!(points.len(), 6);

        let theme_value = points
            .iter()
            .find(|p| p.kind() == InsertionPointType::ParamCookieValue && p.param_name() == Some("theme"))
            .expect("theme value");
        let out = theme_value.inject(&req, PayloadPosition::Append, "'");
        assert_eq!(
            out.header_values("cookie"),
            Some(&vec!["session=abc; theme=dark'".to_string(), "lang=en".to_string()])
        );

        let lang_name = points
            .iter()
            .find(|p| p.kind() == InsertionPointType::ParamCookieName && p.value() == "lang")
            .expect("lang name");
        let out = lang_name.inject(&req, PayloadPosition::Replace, "x");
        assert_eq!(
            out.header_values("cookie"),
            Some(&vec!["session=abc; theme=dark".to_string(), "x=en".to_string()])
        );
    }

    #[test]
    fn test_no_cookies() {
        let req = Request::get("http://a.test/").expect("valid url");
        assert!(CookieFinder.find(&req).is_empty());
    }
}
