//! End-to-end tests: the router on an ephemeral port, wiremock as upstream.

use std::net::SocketAddr;

use depot_core::{CacheEngine, ProxyConfig};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, ETAG, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use tempfile::TempDir;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Proxy {
    base: String,
    client: reqwest::Client,
    _temp_dir: TempDir,
}

async fn start_proxy(mock_server: &MockServer) -> Proxy {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let config = ProxyConfig::default()
        .with_cache_dir(temp_dir.path().join("cache"))
        .with_upstream(mock_server.uri())
        .with_max_retries(0)
        .with_timeout_secs(2);
    let engine = CacheEngine::new(config).expect("failed to create engine");

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        axum::serve(listener, depot_server::router(engine))
            .await
            .expect("server failed");
    });

    Proxy {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        _temp_dir: temp_dir,
    }
}

impl Proxy {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

#[tokio::test]
async fn test_status_endpoint() {
    let mock_server = MockServer::start().await;
    let proxy = start_proxy(&mock_server).await;

    let response = proxy.client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_pypi_json_cached_with_validators() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pypi/json-pkg/json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"info":{"name":"json-pkg"}}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let proxy = start_proxy(&mock_server).await;

    let first = proxy
        .client
        .get(proxy.url("/pypi/json-pkg/json"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(
        first.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    assert!(first.headers().contains_key(LAST_MODIFIED));
    let etag = first.headers()[ETAG].clone();
    assert_eq!(first.text().await.unwrap(), r#"{"info":{"name":"json-pkg"}}"#);

    let second = proxy
        .client
        .get(proxy.url("/pypi/json-pkg/json"))
        .header(IF_NONE_MATCH, etag)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert!(second.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pypi_artifact_is_attachment() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/packages/ab/cd/demo-1.0-py3-none-any.whl"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK".to_vec()))
        .mount(&mock_server)
        .await;

    let proxy = start_proxy(&mock_server).await;

    let response = proxy
        .client
        .get(proxy.url("/pypi/packages/ab/cd/demo-1.0-py3-none-any.whl"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION].to_str().unwrap(),
        "attachment; filename=\"demo-1.0-py3-none-any.whl\""
    );
}

#[tokio::test]
async fn test_large_artifact_streamed() {
    let mock_server = MockServer::start().await;
    let content: Vec<u8> = (0..1024 * 1024 + 3).map(|i| (i % 251) as u8).collect();

    Mock::given(method("GET"))
        .and(path("/maven2/org/x/y/1.0/y-1.0.jar"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let proxy = start_proxy(&mock_server).await;

    for _ in 0..2 {
        let response = proxy
            .client
            .get(proxy.url("/maven2/org/x/y/1.0/y-1.0.jar"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_LENGTH].to_str().unwrap(),
            content.len().to_string()
        );
        assert_eq!(response.bytes().await.unwrap().as_ref(), content.as_slice());
    }
}

#[tokio::test]
async fn test_npm_scoped_and_bulk() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/%40types/react"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"name":"@types/react"}"#))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/-/npm/v1/security/advisories/bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let proxy = start_proxy(&mock_server).await;

    let response = proxy
        .client
        .get(proxy.url("/npm/@types/react"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for _ in 0..2 {
        let response = proxy
            .client
            .post(proxy.url("/npm/-/npm/v1/security/advisories/bulk"))
            .body(r#"{"lodash":["4.17.20"]}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "{}");
    }
}

#[tokio::test]
async fn test_invalid_input_rejected_before_upstream() {
    let mock_server = MockServer::start().await;
    let proxy = start_proxy(&mock_server).await;

    for bad in [
        "/npm/Bad%20Name",
        "/pypi/-bad/json",
        "/maven2/org/x%5C..%5Cy/1.0/y.jar",
        "/npm/lodash/-/lodash.zip",
    ] {
        let response = proxy.client.get(proxy.url(bad)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", bad);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["detail"].is_string());
    }

    let received = mock_server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_upstream_status_mapping() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/maven2/org/x/y/1.0/y-1.0.jar"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/maven2/org/x/y/1.0/y-1.0.pom"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let proxy = start_proxy(&mock_server).await;

    let response = proxy
        .client
        .get(proxy.url("/maven2/org/x/y/1.0/y-1.0.jar"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = proxy
        .client
        .get(proxy.url("/maven2/org/x/y/1.0/y-1.0.pom"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let mock_server = MockServer::start().await;
    let proxy = start_proxy(&mock_server).await;

    let response = proxy
        .client
        .get(proxy.url("/rubygems/rails"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = proxy
        .client
        .post(proxy.url("/npm/lodash"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
