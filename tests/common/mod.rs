//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use gauntlet::context::ScanContext;
use gauntlet::entrypoint::InsertionPointType;
use gauntlet::error::Result;
use gauntlet::http::{Request, Requester, Response};
use gauntlet::models::{Issue, ScanConfig, Severity};
use gauntlet::profile::{ActiveProfile, Grep, GrepType, PassiveProfile, Profile, ProfileSet, Step};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A ScanConfig suited to tests: small pools, short timeouts
pub fn test_config() -> ScanConfig {
    ScanConfig {
        concurrency: 2,
        max_connections: 4,
        timeout_secs: 10,
        user_agent: Some("Gauntlet-Test/0.1.0".to_string()),
        ..ScanConfig::default()
    }
}

pub fn issue(name: &str) -> Issue {
    Issue {
        name: name.to_string(),
        severity: Severity::High,
        ..Issue::default()
    }
}

/// Active profile attacking query values and grepping for the payload echo
pub fn reflection_profile(payload: &str) -> Profile {
    Profile::Active(ActiveProfile {
        name: "reflected-input".to_string(),
        enabled: true,
        tags: vec!["xss".to_string()],
        steps: vec![Step {
            insertion_points: vec![InsertionPointType::ParamUrlValue],
            payloads: vec![payload.to_string()],
            greps: vec![Grep::new(GrepType::Payload, "")],
            issue: issue("Reflected input"),
            ..Step::default()
        }],
    })
}

pub fn passive_response_profile(needle: &str) -> Profile {
    Profile::PassiveResponse(PassiveProfile {
        name: "debug-token-leak".to_string(),
        enabled: true,
        tags: vec!["leak".to_string()],
        greps: vec![Grep::new(GrepType::SimpleString, needle)],
        issue: issue("Debug token leak"),
    })
}

pub fn profiles(list: Vec<Profile>) -> Arc<ProfileSet> {
    Arc::new(ProfileSet::new(list, "tests"))
}

/// Requester answering 200 with the request path as body
pub struct Reflector {
    pub calls: AtomicUsize,
}

impl Reflector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Requester for Reflector {
    async fn execute(&self, _ctx: &ScanContext, request: &mut Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ok_response(request.path.as_bytes()))
    }
}

pub fn ok_response(body: &[u8]) -> Response {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), vec!["text/plain".to_string()]);
    Response {
        proto: "HTTP/1.1".to_string(),
        code: 200,
        status: "OK".to_string(),
        headers,
        body: body.to_vec(),
        ..Response::default()
    }
}
