//! End-to-end tests for the scan runner

mod common;

use async_trait::async_trait;
use common::*;
use gauntlet::context::ScanContext;
use gauntlet::entrypoint::{default_finders, InsertionPointType};
use gauntlet::error::{GauntletError, Result};
use gauntlet::http::{HttpRequester, Request, Requester, Response};
use gauntlet::models::{BlindHostConfig, ProfileKind, Template};
use gauntlet::oob::{
    new_interaction_store, BlindHostPoller, Interaction, InteractionStore, InteractionType,
    LocalInteractionSource,
};
use gauntlet::profile::{ActiveProfile, Grep, GrepType, Profile, Step};
use gauntlet::scan::{FileSystem, JsonlFileSystem, MemoryFileSystem, Runner, Stats};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

fn template(index: usize, url: &str) -> Template {
    Template::new(index, Request::get(url).expect("valid url"))
}

fn runner(fs: Arc<MemoryFileSystem>, requester: Arc<dyn Requester>, ctx: ScanContext) -> Runner {
    Runner::new(test_config())
        .with_context(ctx)
        .with_profiles(profiles(vec![reflection_profile("zq1echo")]))
        .with_finders(default_finders())
        .with_requester(requester)
        .with_file_system(fs)
}

/// Echoes the query string back in the body
struct EchoQuery;

impl Respond for EchoQuery {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let query = request.url.query().unwrap_or_default().to_string();
        ResponseTemplate::new(200)
            .insert_header("Content-Type", "text/html")
            .set_body_string(format!("<p>results for {query}</p>"))
    }
}

#[tokio::test]
async fn test_reflected_payload_is_reported_per_param() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(EchoQuery)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let fs = Arc::new(JsonlFileSystem::open(dir.path()).await.expect("open output"));
    let config = test_config();
    let requester = Arc::new(HttpRequester::from_config(&config).expect("client"));

    let stats = Runner::new(config)
        .with_context(ScanContext::new())
        .with_profiles(profiles(vec![reflection_profile("zq1echo")]))
        .with_finders(default_finders())
        .with_requester(requester)
        .with_file_system(fs.clone())
        .start(vec![template(
            0,
            &format!("{}/search?q=shoes&page=2", mock_server.uri()),
        )])
        .await
        .expect("scan runs");

    assert_eq!(stats.performed_requests, 2);
    assert_eq!(stats.succeeded_requests, 2);
    assert_eq!(stats.matches_found, 2);
    assert!(stats.is_template_ended(0));

    let matches = fs.matches().await.expect("stream").collect().await.expect("records");
    assert_eq!(matches.len(), 2);
    let mut params: Vec<String> = matches.iter().filter_map(|m| m.param.clone()).collect();
    params.sort();
    assert_eq!(params, vec!["page (query param)", "q (query param)"]);
    assert!(matches.iter().all(|m| m.profile_kind == ProfileKind::Active));
    assert!(matches.iter().all(|m| !m.occurrences.is_empty()));

    assert_eq!(fs.load_stats().await.expect("load"), Some(stats));
    let templates = fs.templates().await.expect("stream").collect().await.expect("records");
    assert_eq!(templates.len(), 1);
}

#[tokio::test]
async fn test_passive_response_profile_runs_on_base_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok debug-token=4f2a"))
        .mount(&mock_server)
        .await;

    let fs = Arc::new(MemoryFileSystem::new());
    let config = test_config();
    let requester = Arc::new(HttpRequester::from_config(&config).expect("client"));

    let stats = Runner::new(config)
        .with_context(ScanContext::new())
        .with_profiles(profiles(vec![passive_response_profile("debug-token")]))
        .with_finders(default_finders())
        .with_requester(requester)
        .with_file_system(fs.clone())
        .start(vec![template(0, &format!("{}/home", mock_server.uri()))])
        .await
        .expect("scan runs");

    assert_eq!(stats.performed_requests, 1);
    assert_eq!(stats.responses_to_analyze, 1);
    assert_eq!(stats.matches_found, 1);

    let matches = fs.stored_matches();
    assert_eq!(matches[0].profile_kind, ProfileKind::PassiveResponse);
    assert_eq!(matches[0].profile_name, "debug-token-leak");
    assert!(matches[0].param.is_none());
}

#[tokio::test]
async fn test_passive_only_template_sends_nothing() {
    let fs = Arc::new(MemoryFileSystem::new());
    let reflector = Reflector::new();
    let req = Request::get("http://app.test/account?id=7").expect("valid url");
    let captured = ok_response(b"<html>debug-token=1</html>");

    let stats = Runner::new(test_config())
        .with_context(ScanContext::new())
        .with_profiles(profiles(vec![
            reflection_profile("zq1echo"),
            passive_response_profile("debug-token"),
        ]))
        .with_finders(default_finders())
        .with_requester(reflector.clone())
        .with_file_system(fs.clone())
        .start(vec![Template::passive(0, req, captured)])
        .await
        .expect("scan runs");

    assert_eq!(reflector.calls(), 0);
    assert_eq!(stats.performed_requests, 0);
    assert_eq!(stats.entrypoints_found, 0);
    assert_eq!(stats.matches_found, 1);
}

#[tokio::test]
async fn test_resume_skips_ended_templates() {
    let fs = Arc::new(MemoryFileSystem::new());
    let reflector = Reflector::new();
    let templates = vec![
        template(0, "http://app.test/a?x=1"),
        template(1, "http://app.test/b?y=1"),
    ];

    let first = runner(fs.clone(), reflector.clone(), ScanContext::new())
        .start(templates.clone())
        .await
        .expect("first run");
    assert_eq!(reflector.calls(), 2);
    assert_eq!(first.templates_ended.len(), 2);

    let second = runner(fs.clone(), reflector.clone(), ScanContext::new())
        .start(templates)
        .await
        .expect("second run");
    assert_eq!(reflector.calls(), 2, "nothing is sent again");
    assert_eq!(second, first);
    assert_eq!(fs.stored_matches().len(), 2);
}

#[tokio::test]
async fn test_resume_from_partial_stats() {
    let mut previous = Stats::default();
    previous.templates_ended.insert(0);
    let fs = Arc::new(MemoryFileSystem::with_stats(previous));
    let reflector = Reflector::new();

    let stats = runner(fs.clone(), reflector.clone(), ScanContext::new())
        .start(vec![
            template(0, "http://app.test/a?x=1"),
            template(1, "http://app.test/b?y=1"),
        ])
        .await
        .expect("scan runs");

    assert_eq!(reflector.calls(), 1);
    assert_eq!(stats.total_templates, 2);
    assert!(stats.is_template_ended(0) && stats.is_template_ended(1));
    assert_eq!(fs.stored_templates()[0].index, 1);
}

/// Answers the first request, cancelling the scan while doing so
struct CancelOnFirstCall {
    ctx: ScanContext,
}

#[async_trait]
impl Requester for CancelOnFirstCall {
    async fn execute(&self, ctx: &ScanContext, request: &mut Request) -> Result<Response> {
        if ctx.is_cancelled() {
            return Err(GauntletError::Cancelled);
        }
        self.ctx.cancel();
        Ok(ok_response(request.path.as_bytes()))
    }
}

#[tokio::test]
async fn test_cancellation_rolls_back_interrupted_template() {
    let fs = Arc::new(MemoryFileSystem::new());
    let ctx = ScanContext::new();
    let discarded = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&discarded);

    let mut config = test_config();
    config.concurrency = 1;
    let stats = Runner::new(config)
        .with_context(ctx.clone())
        .with_profiles(profiles(vec![reflection_profile("zq1echo")]))
        .with_finders(default_finders())
        .with_requester(Arc::new(CancelOnFirstCall { ctx: ctx.clone() }))
        .with_file_system(fs.clone())
        .on_discarded(move |t| seen.lock().expect("lock").push(t.index))
        .start(vec![
            template(0, "http://app.test/a?x=1&y=2"),
            template(1, "http://app.test/b?z=3"),
        ])
        .await
        .expect("a cancelled scan is not an error");

    assert!(stats.templates_ended.is_empty());
    assert_eq!(stats.performed_requests, 0);
    assert_eq!(stats.succeeded_requests, 0);
    assert_eq!(stats.entrypoints_found, 0);
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.total_templates, 2);
    assert_eq!(*discarded.lock().expect("lock"), vec![1]);
    assert_eq!(fs.stored_stats(), Some(stats));

    // A fresh run over the same storage processes both templates
    let reflector = Reflector::new();
    let resumed = runner(fs.clone(), reflector.clone(), ScanContext::new())
        .start(vec![
            template(0, "http://app.test/a?x=1&y=2"),
            template(1, "http://app.test/b?z=3"),
        ])
        .await
        .expect("resumed run");
    assert_eq!(reflector.calls(), 3);
    assert_eq!(resumed.templates_ended.len(), 2);
}

#[tokio::test]
async fn test_missing_dependencies_fail_fast() {
    let fs = Arc::new(MemoryFileSystem::new());

    let err = Runner::new(test_config()).start(Vec::new()).await;
    assert!(matches!(err, Err(GauntletError::MissingContext)));

    let err = Runner::new(test_config())
        .with_context(ScanContext::new())
        .start(Vec::new())
        .await;
    assert!(matches!(err, Err(GauntletError::NoProfiles)));

    let err = Runner::new(test_config())
        .with_context(ScanContext::new())
        .with_profiles(profiles(vec![reflection_profile("x")]))
        .start(Vec::new())
        .await;
    assert!(matches!(err, Err(GauntletError::NoEntrypointFinders)));

    let err = Runner::new(test_config())
        .with_context(ScanContext::new())
        .with_profiles(profiles(vec![reflection_profile("x")]))
        .with_finders(default_finders())
        .start(Vec::new())
        .await;
    assert!(matches!(err, Err(GauntletError::NoRequesterBuilder)));

    let err = Runner::new(test_config())
        .with_context(ScanContext::new())
        .with_profiles(profiles(vec![reflection_profile("x")]))
        .with_finders(default_finders())
        .with_requester(Reflector::new())
        .start(Vec::new())
        .await;
    assert!(matches!(err, Err(GauntletError::NoFileSystem)));

    let ok = Runner::new(test_config())
        .with_context(ScanContext::new())
        .with_profiles(profiles(vec![reflection_profile("x")]))
        .with_finders(default_finders())
        .with_requester(Reflector::new())
        .with_file_system(fs)
        .start(Vec::new())
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn test_blind_host_payloads_skipped_without_config() {
    let fs = Arc::new(MemoryFileSystem::new());
    let reflector = Reflector::new();

    let stats = runner(fs, reflector.clone(), ScanContext::new())
        .with_profiles(profiles(vec![blind_profile()]))
        .start(vec![template(0, "http://app.test/fetch?url=x")])
        .await
        .expect("scan runs");

    assert_eq!(reflector.calls(), 0);
    assert_eq!(stats.skipped_requests, 1);
    assert_eq!(stats.total_requests, 1);
}

fn blind_profile() -> Profile {
    Profile::Active(ActiveProfile {
        name: "blind-ssrf".to_string(),
        enabled: true,
        tags: vec!["ssrf".to_string()],
        steps: vec![Step {
            insertion_points: vec![InsertionPointType::ParamUrlValue],
            payloads: vec!["http://{BH}/ping".to_string()],
            greps: vec![Grep::new(GrepType::BlindHost, "")],
            issue: issue("Blind SSRF"),
            ..Step::default()
        }],
    })
}

/// Simulates a target that fetches the blind host URL it is sent
struct CallsBack {
    store: InteractionStore,
    delay: Duration,
}

#[async_trait]
impl Requester for CallsBack {
    async fn execute(&self, _ctx: &ScanContext, request: &mut Request) -> Result<Response> {
        if !request.uid.is_empty() && request.path.contains(&request.uid) {
            self.store.lock().await.push(Interaction {
                id: request.uid.clone(),
                protocol: InteractionType::Http,
                remote_addr: "127.0.0.1:40000".parse().expect("valid addr"),
                timestamp: chrono::Utc::now(),
                raw_data: format!("GET /ping Host: {}.oob.test", request.uid),
            });
            tokio::time::sleep(self.delay).await;
        }
        Ok(ok_response(b"queued"))
    }
}

#[tokio::test]
async fn test_blind_host_interaction_confirms_match() {
    let store = new_interaction_store();
    let blind = BlindHostConfig::new("oob.test");
    let mut config = test_config();
    config.blind_host = Some(blind.clone());

    let ctx = ScanContext::new();
    let source = Arc::new(LocalInteractionSource::new(Arc::clone(&store)));
    let poller = Arc::new(
        BlindHostPoller::new(source, &blind).with_interval(Duration::from_millis(10)),
    );
    let polling = poller.spawn(ctx.clone());

    let fs = Arc::new(MemoryFileSystem::new());
    let stats = Runner::new(config)
        .with_context(ctx.clone())
        .with_profiles(profiles(vec![blind_profile()]))
        .with_finders(default_finders())
        .with_requester(Arc::new(CallsBack {
            store,
            delay: Duration::from_millis(150),
        }))
        .with_file_system(fs.clone())
        .with_poller(poller)
        .start(vec![template(0, "http://app.test/fetch?url=x")])
        .await
        .expect("scan runs");
    ctx.cancel();
    let _ = polling.await;

    assert_eq!(stats.matches_found, 1);
    let matches = fs.stored_matches();
    let interaction = matches[0].interaction.as_ref().expect("interaction attached");
    assert_eq!(interaction.protocol, InteractionType::Http);
    assert_eq!(matches[0].requests[0].uid, interaction.id);
    assert!(matches[0].requests[0].path.contains(".oob.test"));
}

#[tokio::test]
async fn test_late_interaction_confirmed_at_template_end() {
    let store = new_interaction_store();
    let blind = BlindHostConfig {
        poll_interval_secs: 60,
        ..BlindHostConfig::new("oob.test")
    };
    let mut config = test_config();
    config.blind_host = Some(blind.clone());

    // Never ticks during the scan: only the end-of-template refresh can see
    // the callback
    let source = Arc::new(LocalInteractionSource::new(Arc::clone(&store)));
    let poller = Arc::new(BlindHostPoller::new(source, &blind));

    let fs = Arc::new(MemoryFileSystem::new());
    let stats = Runner::new(config)
        .with_context(ScanContext::new())
        .with_profiles(profiles(vec![blind_profile()]))
        .with_finders(default_finders())
        .with_requester(Arc::new(CallsBack {
            store,
            delay: Duration::ZERO,
        }))
        .with_file_system(fs.clone())
        .with_poller(poller)
        .start(vec![template(0, "http://app.test/fetch?url=x")])
        .await
        .expect("scan runs");

    assert_eq!(stats.matches_found, 1);
    let matches = fs.stored_matches();
    assert_eq!(matches.len(), 1);
    assert!(matches[0].interaction.is_some());
}

fn length_diff_profile() -> Profile {
    Profile::Active(ActiveProfile {
        name: "length-oracle".to_string(),
        enabled: true,
        tags: vec!["sqli".to_string()],
        steps: vec![Step {
            insertion_points: vec![InsertionPointType::ParamUrlValue],
            payloads: vec!["zzzz".to_string()],
            greps: vec![Grep::new(GrepType::ContentLengthDiff, "1")],
            issue: issue("Response length oracle"),
            ..Step::default()
        }],
    })
}

#[tokio::test]
async fn test_baseline_requests_are_counted() {
    let fs = Arc::new(MemoryFileSystem::new());
    let reflector = Reflector::new();

    let stats = runner(fs.clone(), reflector.clone(), ScanContext::new())
        .with_profiles(profiles(vec![length_diff_profile()]))
        .start(vec![template(0, "http://app.test/page?id=1")])
        .await
        .expect("scan runs");

    // One payload request plus the baseline re-issued by the grep
    assert_eq!(reflector.calls(), 2);
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.performed_requests, 2);
    assert_eq!(stats.succeeded_requests, 2);
    assert_eq!(stats.failed_requests, 0);
    assert_eq!(stats.matches_found, 1);
    assert_eq!(fs.stored_stats(), Some(stats));
}
