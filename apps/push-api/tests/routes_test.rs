mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;

use push_api::push::encoder::{RecipientClass, StructuredEncoder};

fn server() -> TestServer {
    let (app, _state, _clock) = common::test_app();
    TestServer::new(app).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let server = server();

    let resp = server.get("/health").await;

    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_channel_issues_token() {
    let server = server();

    let resp = server
        .post("/api/v1/channels")
        .json(&json!({ "subscriber": "s1" }))
        .await;

    resp.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["subscriber"], "s1");
    assert!(body["token"].as_str().unwrap().starts_with("cht_"));
}

#[tokio::test]
async fn open_channel_rejects_blank_subscriber() {
    let server = server();

    let resp = server
        .post("/api/v1/channels")
        .json(&json!({ "subscriber": "  " }))
        .await;

    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"][0]["field"], "subscriber");
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribe_uses_default_ttl() {
    let server = server();

    let resp = server
        .put("/api/v1/subscribers/s1/subscriptions/addPersonEvent")
        .await;

    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["subscriber"], "s1");
    assert_eq!(body["event_type"], "addPersonEvent");
    assert_eq!(body["expires_at"], "2024-01-01T12:30:00Z");
}

#[tokio::test]
async fn subscribe_accepts_explicit_ttl() {
    let server = server();

    let resp = server
        .put("/api/v1/subscribers/s1/subscriptions/addPersonEvent")
        .json(&json!({ "ttl_minutes": 5 }))
        .await;

    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["expires_at"], "2024-01-01T12:05:00Z");
}

#[tokio::test]
async fn subscribe_rejects_non_positive_ttl() {
    let server = server();

    let resp = server
        .put("/api/v1/subscribers/s1/subscriptions/addPersonEvent")
        .json(&json!({ "ttl_minutes": 0 }))
        .await;

    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let server = server();
    server
        .put("/api/v1/subscribers/s1/subscriptions/addPersonEvent")
        .await
        .assert_status_ok();

    for _ in 0..2 {
        server
            .delete("/api/v1/subscribers/s1/subscriptions/addPersonEvent")
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }

    let resp = server
        .post("/api/v1/events")
        .json(&json!({ "event": "addPersonEvent", "fields": { "name": "John" } }))
        .await;
    let body: serde_json::Value = resp.json();
    assert_eq!(body["attempted"], 0);
}

#[tokio::test]
async fn keep_alive_reports_refreshed_subscriptions() {
    let server = server();
    for event in ["addPersonEvent", "removePersonEvent"] {
        server
            .put(&format!("/api/v1/subscribers/s1/subscriptions/{event}"))
            .await
            .assert_status_ok();
    }

    let resp = server.post("/api/v1/subscribers/s1/keep-alive").await;

    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["refreshed"], 2);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_reports_unconnected_subscribers_as_failures() {
    let server = server();
    server
        .put("/api/v1/subscribers/s1/subscriptions/addPersonEvent")
        .await
        .assert_status_ok();

    let resp = server
        .post("/api/v1/events")
        .json(&json!({ "event": "addPersonEvent", "fields": { "name": "John", "age": 12 } }))
        .await;

    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["attempted"], 1);
    assert_eq!(body["succeeded"], 0);
    assert_eq!(body["failures"]["s1"], "no open connection");
}

#[tokio::test]
async fn push_rejects_blank_event_type() {
    let server = server();

    let resp = server
        .post("/api/v1/events")
        .json(&json!({ "event": "", "fields": {} }))
        .await;

    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["details"][0]["field"], "event_type");
}

#[tokio::test]
async fn push_rejects_fields_that_clash_with_the_discriminator() {
    let server = server();
    server
        .put("/api/v1/subscribers/s1/subscriptions/addPersonEvent")
        .await
        .assert_status_ok();

    let resp = server
        .post("/api/v1/events")
        .json(&json!({ "event": "addPersonEvent", "fields": { "event": "x" } }))
        .await;

    resp.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn push_of_unsupported_structured_type_is_unprocessable() {
    let mut config = common::test_config();
    config.encoding_mode = RecipientClass::Structured;
    let (state, _clock) = common::test_state_with(config, StructuredEncoder::new());
    let server = TestServer::new(push_api::routes::router().with_state(state)).unwrap();

    server
        .put("/api/v1/subscribers/s1/subscriptions/addPersonEvent")
        .await
        .assert_status_ok();

    let resp = server
        .post("/api/v1/events")
        .json(&json!({ "event": "addPersonEvent", "fields": { "name": "John" } }))
        .await;

    resp.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "UNPROCESSABLE");
}
