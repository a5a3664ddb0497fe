//! Multipart form body finder

use super::{render_with_sentinel, Entrypoint, Finder, InsertionPointType, Templated};
use crate::http::Request;
use std::ops::Range;

pub struct MultipartFinder;

/// Extracts the boundary parameter of a multipart `Content-Type`
pub(crate) fn boundary(content_type: &str) -> Option<String> {
    if !content_type.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// One part of the body, as absolute byte ranges
struct Part {
    name: Option<Range<usize>>,
    filename: Option<Range<usize>>,
    content: Range<usize>,
}

fn parse_parts(body: &str, boundary: &str) -> Vec<Part> {
    let delimiter = format!("--{boundary}");
    let positions: Vec<usize> = body.match_indices(&delimiter).map(|(i, _)| i).collect();
    let mut parts = Vec::new();

    for window in positions.windows(2) {
        let mut start = window[0] + delimiter.len();
        let end = window[1];
        let region = &body[start..end];
        if region.starts_with("--") {
            break;
        }
        if region.starts_with("\r\n") {
            start += 2;
        } else if region.starts_with('\n') {
            start += 1;
        }

        let region = &body[start..end];
        let (head_len, separator_len) = match region.find("\r\n\r\n") {
            Some(i) => (i, 4),
            None => match region.find("\n\n") {
                Some(i) => (i, 2),
                None => continue,
            },
        };

        let content_start = start + head_len + separator_len;
        let mut content_end = end;
        if body[content_start..content_end].ends_with("\r\n") {
            content_end -= 2;
        } else if body[content_start..content_end].ends_with('\n') {
            content_end -= 1;
        }

        let (name, filename) = disposition_spans(&body[start..start + head_len], start);
        parts.push(Part {
            name,
            filename,
            content: content_start..content_end,
        });
    }

    parts
}

/// Finds the `name` and `filename` value spans of the Content-Disposition
/// header within a part head starting at `offset`
fn disposition_spans(head: &str, offset: usize) -> (Option<Range<usize>>, Option<Range<usize>>) {
    let mut name = None;
    let mut filename = None;

    let mut line_start = 0;
    for line in head.split('\n') {
        let line_end = line_start + line.len();
        if line
            .get(..20)
            .is_some_and(|p| p.eq_ignore_ascii_case("content-disposition:"))
        {
            let mut param_start = line_start;
            for param in line.trim_end_matches('\r').split(';') {
                let leading = param.len() - param.trim_start().len();
                let trimmed = param.trim();
                if let Some((key, value)) = trimmed.split_once('=') {
                    let mut value_start = param_start + leading + key.len() + 1;
                    let mut value_len = value.len();
                    if value_len >= 2 && value.starts_with('"') && value.ends_with('"') {
                        value_start += 1;
                        value_len -= 2;
                    }
                    let span = offset + value_start..offset + value_start + value_len;
                    match key.trim().to_ascii_lowercase().as_str() {
                        "name" => name = Some(span),
                        "filename" => filename = Some(span),
                        _ => {}
                    }
                }
                param_start += param.len() + 1;
            }
        }
        line_start = line_end + 1;
    }

    (name, filename)
}

impl Finder for MultipartFinder {
    fn name(&self) -> &str {
        "multipart_params"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        let Some(boundary) = request.content_type().and_then(boundary) else {
            return Vec::new();
        };
        let Some(body) = request.body_str() else {
            return Vec::new();
        };

        let templated = |kind, param: &str, span: &Range<usize>| {
            Entrypoint::Document(Templated {
                kind,
                param: Some(param.to_string()),
                value: body[span.clone()].to_string(),
                template: render_with_sentinel(body, std::slice::from_ref(span)),
            })
        };

        let mut out = Vec::new();
        for part in parse_parts(body, &boundary) {
            let Some(name_span) = part.name else {
                continue;
            };
            let field = &body[name_span.clone()];

            out.push(templated(InsertionPointType::ParamMultipartName, field, &name_span));
            if let Some(filename_span) = &part.filename {
                out.push(templated(InsertionPointType::ParamMultipartFilename, field, filename_span));
            }
            out.push(templated(InsertionPointType::ParamMultipartValue, field, &part.content));
        }
        out
    }
}
