//! JSON body finder
//!
//! Walks the document in key order. Every object key yields a name
//! entrypoint and every scalar leaf a value entrypoint; array elements are
//! labelled `key[i]`.

use super::{Entrypoint, Finder, InsertionPointType, Templated, SENTINEL};
use crate::http::Request;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
enum PathStep {
    Key(String),
    Index(usize),
}

pub struct JsonParamFinder;

impl JsonParamFinder {
    fn applies(request: &Request, body: &str) -> bool {
        if let Some(ct) = request.content_type() {
            if ct.to_ascii_lowercase().contains("json") {
                return true;
            }
        }
        let trimmed = body.trim_start();
        trimmed.starts_with('{') || trimmed.starts_with('[')
    }
}

impl Finder for JsonParamFinder {
    fn name(&self) -> &str {
        "json_params"
    }

    fn find(&self, request: &Request) -> Vec<Entrypoint> {
        let Some(body) = request.body_str() else {
            return Vec::new();
        };
        if !Self::applies(request, body) {
            return Vec::new();
        }
        let Ok(root) = serde_json::from_str::<Value>(body) else {
            return Vec::new();
        };
        if !root.is_object() && !root.is_array() {
            return Vec::new();
        }

        let mut walker = Walker {
            root: &root,
            path: Vec::new(),
            out: Vec::new(),
        };
        walker.visit(&root, "");
        walker.out
    }
}

struct Walker<'a> {
    root: &'a Value,
    path: Vec<PathStep>,
    out: Vec<Entrypoint>,
}

impl Walker<'_> {
    fn visit(&mut self, value: &Value, label: &str) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if let Some(template) = self.render_renamed(key) {
                        self.push(InsertionPointType::ParamJsonName, key, key.clone(), template);
                    }
                    self.path.push(PathStep::Key(key.clone()));
                    self.visit(child, key);
                    self.path.pop();
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    self.path.push(PathStep::Index(i));
                    self.visit(child, &format!("{label}[{i}]"));
                    self.path.pop();
                }
            }
            Value::String(s) => {
                if let Some(template) = self.render_leaf(true) {
                    self.push(InsertionPointType::ParamJsonValue, label, s.clone(), template);
                }
            }
            scalar => {
                if let Some(template) = self.render_leaf(false) {
                    self.push(InsertionPointType::ParamJsonValue, label, scalar.to_string(), template);
                }
            }
        }
    }

    fn push(&mut self, kind: InsertionPointType, label: &str, value: String, template: String) {
        self.out.push(Entrypoint::Document(Templated {
            kind,
            param: Some(label.to_string()),
            value,
            template,
        }));
    }

    /// Document with the leaf at the current path replaced by the sentinel.
    /// Non-string leaves lose their quotes so payloads land unquoted.
    fn render_leaf(&self, quoted: bool) -> Option<String> {
        let mut doc = self.root.clone();
        *value_at_mut(&mut doc, &self.path)? = Value::String(SENTINEL.to_string());
        let rendered = serde_json::to_string(&doc).ok()?;
        if quoted {
            Some(rendered)
        } else {
            Some(rendered.replace(&format!("\"{SENTINEL}\""), SENTINEL))
        }
    }

    /// Document with `key` of the object at the current path renamed to the
    /// sentinel, keeping key order
    fn render_renamed(&self, key: &str) -> Option<String> {
        let mut doc = self.root.clone();
        let Value::Object(map) = value_at_mut(&mut doc, &self.path)? else {
            return None;
        };
        let renamed: Map<String, Value> = std::mem::take(map)
            .into_iter()
            .map(|(k, v)| if k == key { (SENTINEL.to_string(), v) } else { (k, v) })
            .collect();
        *map = renamed;
        serde_json::to_string(&doc).ok()
    }
}

fn value_at_mut<'a>(root: &'a mut Value, path: &[PathStep]) -> Option<&'a mut Value> {
    let mut current = root;
    for step in path {
        current = match step {
            PathStep::Key(key) => current.get_mut(key.as_str())?,
            PathStep::Index(i) => current.get_mut(*i)?,
        };
    }
    Some(current)
}
