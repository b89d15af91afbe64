// tests/providers_http.rs
//
// TMDB and OMDB clients against a mock HTTP server.
//
// Covered:
// - auth header and page query reach the upstream
// - total pages / total results drive isLastPage
// - 429 and 5xx are transient, 401 is fatal
// - OMDB in-band errors

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use movie_harvester::config::{SourceKind, SourceSpec};
use movie_harvester::extract::providers::{http_client, OmdbClient, TmdbClient};
use movie_harvester::extract::SourceClient;

fn tmdb_spec(server: &MockServer) -> SourceSpec {
    let mut auth_headers = BTreeMap::new();
    auth_headers.insert("Authorization".to_string(), "Bearer test-token".to_string());
    SourceSpec {
        name: "tmdb".into(),
        kind: SourceKind::Tmdb,
        base_url: format!("{}/3/discover/movie", server.uri()),
        auth_headers,
        query: BTreeMap::new(),
        topic: None,
    }
}

fn omdb_spec(server: &MockServer) -> SourceSpec {
    let mut query = BTreeMap::new();
    query.insert("apikey".to_string(), "k3y".to_string());
    query.insert("s".to_string(), "heat".to_string());
    SourceSpec {
        name: "omdb".into(),
        kind: SourceKind::Omdb,
        base_url: format!("{}/", server.uri()),
        auth_headers: BTreeMap::new(),
        query,
        topic: None,
    }
}

fn http() -> reqwest::Client {
    http_client(Duration::from_secs(5)).expect("http client")
}

#[tokio::test]
async fn tmdb_sends_auth_and_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/3/discover/movie"))
        .and(header("Authorization", "Bearer test-token"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "page": 2,
            "results": [{"id": 1, "title": "Heat"}, {"id": 2, "title": "Ronin"}],
            "total_pages": 2,
            "total_results": 40
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = TmdbClient::new(&tmdb_spec(&server), http()).unwrap();
    let page = client.fetch_page(2).await.expect("page");

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.total_pages, Some(2));
    assert!(page.is_last_page);
    assert_eq!(page.records[1]["title"], "Ronin");
}

#[tokio::test]
async fn tmdb_rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let client = TmdbClient::new(&tmdb_spec(&server), http()).unwrap();
    let err = client.fetch_page(1).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.status(), Some(429));
}

#[tokio::test]
async fn tmdb_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = TmdbClient::new(&tmdb_spec(&server), http()).unwrap();
    assert!(client.fetch_page(1).await.unwrap_err().is_transient());
}

#[tokio::test]
async fn tmdb_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status_code": 7,
            "status_message": "Invalid API key"
        })))
        .mount(&server)
        .await;

    let client = TmdbClient::new(&tmdb_spec(&server), http()).unwrap();
    let err = client.fetch_page(1).await.unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn omdb_search_pages_by_result_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("apikey", "k3y"))
        .and(query_param("s", "heat"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Search": [
                {"Title": "Heat", "Year": "1995", "imdbID": "tt0113277", "Type": "movie"}
            ],
            "totalResults": "25",
            "Response": "True"
        })))
        .mount(&server)
        .await;

    let client = OmdbClient::new(&omdb_spec(&server), http()).unwrap();
    let page = client.fetch_page(1).await.expect("page");

    assert_eq!(page.total_pages, Some(3));
    assert!(!page.is_last_page);
    assert_eq!(page.records[0]["imdbID"], "tt0113277");
}

#[tokio::test]
async fn omdb_in_band_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("page", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Response": "False",
            "Error": "Movie not found!"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("page", "8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Response": "False",
            "Error": "Request limit reached!"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("page", "9"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "Response": "False",
            "Error": "Invalid API key!"
        })))
        .mount(&server)
        .await;

    let client = OmdbClient::new(&omdb_spec(&server), http()).unwrap();

    let past_end = client.fetch_page(7).await.expect("empty last page");
    assert!(past_end.is_last_page && past_end.records.is_empty());

    assert!(client.fetch_page(8).await.unwrap_err().is_transient());

    let fatal = client.fetch_page(9).await.unwrap_err();
    assert!(!fatal.is_transient());
}
