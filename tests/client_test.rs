// CT log client tests against a mock log server
mod common;

use base64::Engine;
use common::{LEAF_A1, PRECERT_B1};
use ct_mirror::ct_log::leaf::encode_leaf;
use ct_mirror::ct_log::{CtLogClient, EntrySource, EntryType};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn leaf_json(entry_type: EntryType, der: &[u8]) -> serde_json::Value {
    let leaf = encode_leaf(entry_type, 1_700_000_000_000, der);
    json!({
        "leaf_input": base64::engine::general_purpose::STANDARD.encode(leaf),
        "extra_data": "",
    })
}

fn client(server: &MockServer) -> CtLogClient {
    CtLogClient::new(format!("{}/", server.uri()))
        .unwrap()
        .with_retries(2, Duration::from_millis(10))
}

#[tokio::test]
async fn test_tree_size_from_sth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-sth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tree_size": 4242,
            "timestamp": 1_700_000_000_000u64,
            "sha256_root_hash": "AAAA",
            "tree_head_signature": "BBBB",
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    assert_eq!(client.tree_size().await.unwrap(), 4242);
    assert_eq!(client.get_sth().await.unwrap().sha256_root_hash, "AAAA");
}

#[tokio::test]
async fn test_get_entries_pages_through_short_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .and(query_param("start", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [
                leaf_json(EntryType::X509, LEAF_A1),
                leaf_json(EntryType::Precert, PRECERT_B1),
            ],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .and(query_param("start", "12"))
        .and(query_param("end", "12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [leaf_json(EntryType::X509, LEAF_A1)],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entries = client(&server).get_entries(10, 12).await.unwrap();

    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries.iter().map(|e| e.index).collect::<Vec<_>>(),
        vec![10, 11, 12]
    );
    assert_eq!(entries[0].entry_type, EntryType::X509);
    assert_eq!(entries[0].der, LEAF_A1);
    assert_eq!(entries[1].entry_type, EntryType::Precert);
    assert_eq!(entries[1].der, PRECERT_B1);
}

#[tokio::test]
async fn test_get_entries_retries_then_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let err = client(&server).get_entries(0, 9).await.unwrap_err();
    assert!(format!("{:#}", err).contains("500"));
}

#[tokio::test]
async fn test_rate_limited_response_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = client(&server).get_entries(0, 0).await.unwrap_err();
    assert!(format!("{:#}", err).contains("Rate limited"));
}

#[tokio::test]
async fn test_empty_page_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "entries": [] })))
        .mount(&server)
        .await;

    let err = client(&server).get_entries(0, 4).await.unwrap_err();
    assert!(err.to_string().contains("no entries"));
}

#[tokio::test]
async fn test_oversized_page_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [
                leaf_json(EntryType::X509, LEAF_A1),
                leaf_json(EntryType::X509, LEAF_A1),
            ],
        })))
        .mount(&server)
        .await;

    assert!(client(&server).get_entries(0, 0).await.is_err());
}

#[tokio::test]
async fn test_undecodable_leaf_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [{ "leaf_input": "%%% not base64 %%%" }],
        })))
        .mount(&server)
        .await;

    let err = client(&server).get_entries(0, 0).await.unwrap_err();
    assert!(format!("{:#}", err).contains("decoding leaf at index 0"));
}
