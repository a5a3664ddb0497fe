//! XML body finder
//!
//! quick-xml drives a single pre-order pass over the document; each element
//! name (start and end tag together), attribute name, attribute value and
//! non-blank text node is recorded as byte spans of the original body, so
//! templates keep the document byte for byte apart from the target.

use super::{render_with_sentinel, Entrypoint, Finder, InsertionPointType, Templated};
use crate::http::Request;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::ops::Range;

pub struct XmlParamFinder;

struct Spot {
    kind: InsertionPointType,
    param: String,
    value: String,
    spans: Vec<Range<usize>>,
}

impl XmlParamFinder {
    fn applies(request: &Request, body: &str) -> bool {
        if let Some(ct) = request.content_type() {
            if ct.to_ascii_lowercase().contains("xml") {
                return true;
            }
        }
        body.trim_start().starts_with('<')
    }
}

impl Finder for XmlParamFinder {
    fn name(&self) -> &str {
        "xml_params"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        let Some(body) = request.body_str() else {
            return Vec::new();
        };
        if body.is_empty() || !Self::applies(request, body) {
            return Vec::new();
        }

        let Some(spots) = collect_spots(body) else {
            return Vec::new();
        };

        spots
            .into_iter()
            .map(|spot| {
                Entrypoint::Document(Templated {
                    kind: spot.kind,
                    param: Some(spot.param),
                    value: spot.value,
                    template: render_with_sentinel(body, &spot.spans),
                })
            })
            .collect()
    }
}

/// Position of the `<` opening the markup that starts near `pos`
fn tag_open(body: &str, pos: usize) -> Option<usize> {
    let from = pos.saturating_sub(1);
    body.get(from..)?.find('<').map(|i| from + i)
}

fn collect_spots(body: &str) -> Option<Vec<Spot>> {
    let mut reader = Reader::from_str(body);
    let mut spots: Vec<Spot> = Vec::new();
    // Indexes into `spots` of the open elements
    let mut stack: Vec<usize> = Vec::new();

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event().ok()?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let open = tag_open(body, before)?;
                let content_start = open + 1;
                let content = body.get(content_start..content_start + e.len())?;
                let name_len = e.name().as_ref().len();
                let name = content.get(..name_len)?.to_string();

                spots.push(Spot {
                    kind: InsertionPointType::ParamXmlName,
                    param: name.clone(),
                    value: name,
                    spans: vec![content_start..content_start + name_len],
                });
                if matches!(event, Event::Start(_)) {
                    stack.push(spots.len() - 1);
                }
                attribute_spots(content, content_start, name_len, &mut spots);
            }
            Event::End(ref e) => {
                let open = tag_open(body, before)?;
                let name_start = open + 2;
                let name_len = e.name().as_ref().len();
                let index = stack.pop()?;
                spots[index].spans.push(name_start..name_start + name_len);
            }
            Event::Text(ref e) => {
                let raw = body.get(before..before + e.len())?;
                if !raw.trim().is_empty() {
                    if let Some(&parent) = stack.last() {
                        let param = spots[parent].param.clone();
                        spots.push(Spot {
                            kind: InsertionPointType::ParamXmlValue,
                            param,
                            value: raw.to_string(),
                            spans: vec![before..before + e.len()],
                        });
                    }
                }
            }
            Event::CData(ref e) => {
                let open = tag_open(body, before)?;
                let inner_start = open + "<![CDATA[".len();
                let inner = body.get(inner_start..inner_start + e.len())?;
                if let Some(&parent) = stack.last() {
                    let param = spots[parent].param.clone();
                    spots.push(Spot {
                        kind: InsertionPointType::ParamXmlValue,
                        param,
                        value: inner.to_string(),
                        spans: vec![inner_start..inner_start + e.len()],
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return None;
    }
    Some(spots)
}

/// Scans `key="value"` pairs after the element name of a raw tag
fn attribute_spots(content: &str, offset: usize, name_len: usize, spots: &mut Vec<Spot>) {
    let bytes = content.as_bytes();
    let mut i = name_len;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let key_end = i;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if key_start == key_end || i >= bytes.len() || bytes[i] != b'=' {
            return;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || (bytes[i] != b'"' && bytes[i] != b'\'') {
            return;
        }
        let quote = bytes[i];
        let value_start = i + 1;
        let Some(len) = bytes[value_start..].iter().position(|&b| b == quote) else {
            return;
        };
        let value_end = value_start + len;
        i = value_end + 1;

        let key = &content[key_start..key_end];
        spots.push(Spot {
            kind: InsertionPointType::ParamXmlAttrName,
            param: key.to_string(),
            value: key.to_string(),
            spans: vec![offset + key_start..offset + key_end],
        });
        spots.push(Spot {
            kind: InsertionPointType::ParamXmlAttrValue,
            param: key.to_string(),
            value: content[value_start..value_end].to_string(),
            spans: vec![offset + value_start..offset + value_end],
        });
    }
}
