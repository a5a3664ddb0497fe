//! Integration tests for the reqwest-backed requester

mod common;

use common::test_config;
use gauntlet::context::ScanContext;
use gauntlet::error::GauntletError;
use gauntlet::http::{HttpRequester, RedirectPolicy, Request, Requester, RequesterPool};
use std::sync::Arc;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_get_with_headers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("id", "7"))
        .and(header("X-Probe", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/json")
                .set_body_string(r#"{"id":7}"#),
        )
        .mount(&mock_server)
        .await;

    let requester = HttpRequester::from_config(&test_config()).expect("client");
    let mut request =
        Request::get(&format!("{}/items?id=7", mock_server.uri())).expect("valid url");
    request.set_header("X-Probe", "1");

    let response = requester
        .execute(&ScanContext::new(), &mut request)
        .await
        .expect("request succeeds");

    assert_eq!(response.code, 200);
    assert_eq!(response.content_type(), Some("application/json"));
    assert_eq!(response.body, br#"{"id":7}"#);
    assert_eq!(requester.request_count(), 1);
}

#[tokio::test]
async fn test_post_body_from_raw_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string("user=admin&pass=x"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/home"))
        .mount(&mock_server)
        .await;

    let raw = b"POST /login HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 17\r\n\r\nuser=admin&pass=x";
    let mut request = Request::from_raw(raw, Some(&mock_server.uri())).expect("valid request");

    let requester = HttpRequester::from_config(&test_config()).expect("client");
    let response = requester
        .execute(&ScanContext::new(), &mut request)
        .await
        .expect("request succeeds");

    assert_eq!(response.code, 302);
    assert_eq!(request.followed_redirects, 0);
}

#[tokio::test]
async fn test_redirects_followed_when_allowed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
        .mount(&mock_server)
        .await;

    let requester = HttpRequester::from_config(&test_config()).expect("client");
    let mut request = Request::get(&format!("{}/old", mock_server.uri())).expect("valid url");
    request.redirect = RedirectPolicy::OnSite;
    request.max_redirects = 3;

    let response = requester
        .execute(&ScanContext::new(), &mut request)
        .await
        .expect("request succeeds");

    assert_eq!(response.code, 200);
    assert_eq!(response.body, b"moved here");
    assert_eq!(request.followed_redirects, 1);
}

#[tokio::test]
async fn test_pool_over_http_requester() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .expect(5)
        .mount(&mock_server)
        .await;

    let config = test_config();
    let requester = Arc::new(HttpRequester::from_config(&config).expect("client"));
    let pool = RequesterPool::from_requester(requester, 2).with_rps(100);
    let ctx = ScanContext::new();

    for i in 0..5 {
        let mut request =
            Request::get(&format!("{}/r/{i}", mock_server.uri())).expect("valid url");
        let response = pool.execute(&ctx, &mut request).await.expect("request succeeds");
        assert_eq!(response.code, 204);
    }
    assert!(pool.idle() >= 1);
}

#[tokio::test]
async fn test_cancelled_context_aborts_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let requester = HttpRequester::from_config(&test_config()).expect("client");
    let ctx = ScanContext::new();
    let cancel = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let mut request = Request::get(&mock_server.uri()).expect("valid url");
    let result = requester.execute(&ctx, &mut request).await;
    assert!(matches!(result, Err(GauntletError::Cancelled)));
}
