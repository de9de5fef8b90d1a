//! Request surface against a mock server
//!
//! Body encoding, query strings, caller headers and the method set.

use pooled_http::{
    Headers, HttpClientTrait, HttpError, Params, PoolConfig, PooledHttpClient, RequestMethod,
};
use serde::Deserialize;
use serde_json::json;
use wiremock::{
    matchers::{body_json, body_string, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn headers(pairs: &[(&str, &str)]) -> Headers {
    params(pairs)
}

#[tokio::test]
async fn test_post_encodes_params_as_json_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"a": "1", "b": "2"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;

    let client = PooledHttpClient::with_defaults();
    let response = client
        .post(&format!("{}/echo", server.uri()), &params(&[("a", "1"), ("b", "2")]))
        .await
        .unwrap();

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.body(), "created");
}

#[tokio::test]
async fn test_post_form_encoding_follows_declared_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("a=1&b=2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = PooledHttpClient::with_defaults();
    let response = client
        .post_with_headers(
            &format!("{}/form", server.uri()),
            &headers(&[("Content-Type", "application/x-www-form-urlencoded")]),
            &params(&[("b", "2"), ("a", "1")]),
        )
        .await
        .unwrap();

    assert!(response.is_success());
}

#[tokio::test]
async fn test_unsupported_content_type_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = PooledHttpClient::with_defaults();
    let result = client
        .post_with_headers(
            &format!("{}/text", server.uri()),
            &headers(&[("Content-Type", "text/plain")]),
            &params(&[("a", "1")]),
        )
        .await;

    match result {
        Err(HttpError::UnsupportedContentType(declared)) => assert_eq!(declared, "text/plain"),
        other => panic!("expected UnsupportedContentType, got {other:?}"),
    }
}

#[tokio::test]
async fn test_post_raw_forces_json_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/raw"))
        .and(header("content-type", "application/json"))
        .and(header("x-trace", "abc"))
        .and(body_string(r#"{"nested":{"n":1}}"#))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let client = PooledHttpClient::with_defaults();
    let response = client
        .post_raw_with_headers(
            &format!("{}/raw", server.uri()),
            &headers(&[("Content-Type", "text/plain"), ("X-Trace", "abc")]),
            r#"{"nested":{"n":1}}"#,
        )
        .await
        .unwrap();

    assert_eq!(response.status_code(), 202);
}

#[tokio::test]
async fn test_get_with_appends_params_to_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rust pools"))
        .and(query_param("page", "2"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let client = PooledHttpClient::with_defaults();
    let response = client
        .get_with(
            &format!("{}/search?page=2", server.uri()),
            Some(&headers(&[("Accept", "application/json")])),
            Some(&params(&[("q", "rust pools")])),
        )
        .await
        .unwrap();

    assert_eq!(response.body(), "[]");
}

#[tokio::test]
async fn test_get_with_headers_passes_headers_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth"))
        .and(header("authorization", "Bearer token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = PooledHttpClient::with_defaults();
    let response = client
        .get_with_headers(
            &format!("{}/auth", server.uri()),
            &headers(&[("Authorization", "Bearer token")]),
        )
        .await
        .unwrap();

    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_every_method_reaches_the_server() {
    let server = MockServer::start().await;
    for m in RequestMethod::ALL {
        Mock::given(method(m.as_str()))
            .and(path("/any"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    let client = PooledHttpClient::with_defaults();
    let url = format!("{}/any", server.uri());
    for m in RequestMethod::ALL {
        let response = client.request(m, &url).await.unwrap();
        assert_eq!(response.status_code(), 200, "{m} failed");
    }
    assert_eq!(client.constructions(), 1);
}

#[tokio::test]
async fn test_params_are_ignored_for_methods_without_body() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/items/7"))
        .and(body_string(""))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = PooledHttpClient::with_defaults();
    let response = client
        .request_with(
            RequestMethod::Delete,
            &format!("{}/items/7", server.uri()),
            None,
            Some(&params(&[("ignored", "yes")])),
        )
        .await
        .unwrap();

    assert_eq!(response.status_code(), 204);
    assert!(response.body().is_empty());
}

#[tokio::test]
async fn test_error_statuses_are_returned_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let client = PooledHttpClient::with_defaults();
    let response = client.get(&server.uri()).await.unwrap();

    assert_eq!(response.status_code(), 503);
    assert!(!response.is_success());
    assert_eq!(response.body(), "down");
}

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    id: u32,
    name: String,
}

#[tokio::test]
async fn test_decode_response_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7, "name": "pool"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/empty"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = PooledHttpClient::with_defaults();
    let item: Option<Item> = client
        .get(&format!("{}/item", server.uri()))
        .await
        .unwrap()
        .decode_as()
        .unwrap();
    assert_eq!(
        item,
        Some(Item {
            id: 7,
            name: "pool".to_string()
        })
    );

    let empty: Option<Item> = client
        .get(&format!("{}/empty", server.uri()))
        .await
        .unwrap()
        .decode_as()
        .unwrap();
    assert!(empty.is_none());
}

#[tokio::test]
async fn test_scheme_less_url_is_prefixed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bare"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = PooledHttpClient::new(PoolConfig::default());
    let bare = format!("{}/bare", server.address());
    let response = client.get(&bare).await.unwrap();

    assert_eq!(response.status_code(), 200);
}
