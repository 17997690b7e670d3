//! `HttpRegistryService` fetch and publish.

use std::time::Duration;

use agent_immune::classifier::RiskClassifier;
use agent_immune::external::ExternalError;
use agent_immune::registry::{HttpRegistryService, RegistryService, ThreatRecord};
use agent_immune::types::Receipt;
use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn threat(action: &str) -> ThreatRecord {
    let classification = RiskClassifier::default().classify(action);
    ThreatRecord::from_block(action, &classification, 95, "agent-b")
}

fn service(server: &MockServer) -> HttpRegistryService {
    HttpRegistryService::new(&server.uri(), Duration::from_millis(500)).expect("client")
}

#[tokio::test]
async fn fetch_returns_records() {
    let server = MockServer::start().await;
    let records = vec![threat("drop table users"), threat("wipe the backup volume")];
    Mock::given(method("GET"))
        .and(path("/threats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&records))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = service(&server).fetch(None).await.expect("fetch");
    assert_eq!(fetched, records);
}

#[tokio::test]
async fn fetch_passes_cursor_as_since() {
    let server = MockServer::start().await;
    let since = Utc
        .with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
        .single()
        .expect("valid date");
    Mock::given(method("GET"))
        .and(path("/threats"))
        .and(query_param("since", "2026-01-02T03:04:05.000000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = service(&server).fetch(Some(since)).await.expect("fetch");
    assert!(fetched.is_empty());
}

#[tokio::test]
async fn fetch_rejects_non_list_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/threats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"threats": []})))
        .mount(&server)
        .await;

    let err = service(&server).fetch(None).await.expect_err("wrong shape");
    assert!(matches!(err, ExternalError::Encoding(_)));
}

#[tokio::test]
async fn publish_posts_record() {
    let server = MockServer::start().await;
    let record = threat("drop table users");
    Mock::given(method("POST"))
        .and(path("/threats"))
        .and(body_partial_json(json!({
            "threat_id": record.threat_id,
            "reporter": "agent-b",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"receipt": "R-9"})))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = service(&server).publish(&record).await.expect("publish");
    assert_eq!(receipt, Receipt("R-9".to_owned()));
}

#[tokio::test]
async fn publish_surfaces_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threats"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad record"))
        .mount(&server)
        .await;

    let err = service(&server)
        .publish(&threat("drop table users"))
        .await
        .expect_err("400");
    assert!(matches!(err, ExternalError::Rejected { status: 400, .. }));
}
