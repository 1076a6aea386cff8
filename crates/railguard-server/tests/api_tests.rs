//! HTTP surface tests driven through the router with `oneshot`

mod support;

use axum::http::{Method, StatusCode};
use serde_json::json;
use support::{app, call, call_raw, short_timeout, state, state_with, Reply};

const REPLY: Reply = Reply::Fixed("Happy to help with that.");

#[tokio::test]
async fn test_health_reports_detectors_and_backend() {
    let app = app(state(REPLY));
    let (status, body) = call(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"]["name"], "test");
    assert_eq!(body["backend"]["healthy"], true);
    assert_eq!(body["detectors"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_message_is_delivered_and_recorded() {
    let app = app(state(REPLY));
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/message",
        Some(json!({ "session_id": "s1", "message": "Hello, how are you?" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["status"], "delivered");
    assert_eq!(body["blocked"], false);
    assert_eq!(body["response"], "Happy to help with that.");
    assert_eq!(body["sequence"], 1);
    assert_eq!(body["warnings"], json!([]));

    let (status, history) =
        call(&app, Method::GET, "/api/chat/history?session_id=s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["count"], 2);
    assert_eq!(history["messages"][0]["role"], "user");
    assert_eq!(history["messages"][1]["role"], "assistant");
}

#[tokio::test]
async fn test_message_without_session_starts_one() {
    let app = app(state(REPLY));
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/message",
        Some(json!({ "text": "hello" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let session_id = body["session_id"].as_str().unwrap();
    assert!(!session_id.is_empty());

    let (_, sessions) = call(&app, Method::GET, "/api/chat/sessions", None).await;
    assert_eq!(sessions["sessions"], json!([session_id]));
}

#[tokio::test]
async fn test_pii_input_is_blocked() {
    let app = app(state(REPLY));
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/message",
        Some(json!({ "session_id": "s1", "message": "mail me at jane.doe@example.com" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocked"], true);
    assert_eq!(body["blocking_reasons"], json!(["pii"]));
    assert_eq!(body["status"]["phase"], "input");
    assert_ne!(body["response"], "Happy to help with that.");
}

#[tokio::test]
async fn test_invalid_requests_are_400() {
    let app = app(state(REPLY));

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/message",
        Some(json!({ "session_id": "s1", "message": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/message",
        Some(json!({ "session_id": "s1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_generation_failure_is_a_processing_error() {
    let app = app(state(Reply::Fail));
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/message",
        Some(json!({ "session_id": "s1", "message": "hello" })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "generation_failure");
    assert_eq!(body["message"], "processing error");
    assert!(!body.to_string().contains("connection refused"));

    // The session survives the failure
    let (status, stats) = call(&app, Method::GET, "/api/chat/stats/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["failed_messages"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expiry_is_504() {
    let app = app(state_with(Reply::Hang, short_timeout()));
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/message",
        Some(json!({ "session_id": "s1", "message": "hello" })),
    )
    .await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "pipeline_timeout");
}

#[tokio::test]
async fn test_unknown_session_stats_is_404() {
    let app = app(state(REPLY));
    let (status, body) = call(&app, Method::GET, "/api/chat/stats/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "session_not_found");

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/chat/export",
        Some(json!({ "session_id": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_session_config_round_trip_and_rejection() {
    let app = app(state(REPLY));

    let (status, body) = call(
        &app,
        Method::PUT,
        "/api/chat/config",
        Some(json!({ "session_id": "s1", "config": { "pii": { "sensitivity": 0.9 } } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["pii"]["threshold"], json!(0.9));

    let (status, body) = call(
        &app,
        Method::PUT,
        "/api/chat/config",
        Some(json!({ "session_id": "s1", "config": { "pii": { "threshold": 1.5 } } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_configuration");

    // Rejected update leaves the prior config in place
    let (status, body) = call(&app, Method::GET, "/api/chat/config/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["pii"]["threshold"], json!(0.9));
}

#[tokio::test]
async fn test_disabled_detector_lets_message_through() {
    let app = app(state(REPLY));
    call(
        &app,
        Method::PUT,
        "/api/chat/config",
        Some(json!({ "session_id": "s1", "config": { "pii": { "enabled": false } } })),
    )
    .await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/message",
        Some(json!({ "session_id": "s1", "message": "mail me at jane.doe@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocked"], false);
}

#[tokio::test]
async fn test_clear_history_issues_new_session() {
    let app = app(state(REPLY));
    call(
        &app,
        Method::POST,
        "/api/chat/message",
        Some(json!({ "session_id": "s1", "message": "hello" })),
    )
    .await;

    let (status, body) = call(&app, Method::DELETE, "/api/chat/history/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous_session_id"], "s1");
    let new_id = body["session_id"].as_str().unwrap().to_string();
    assert_ne!(new_id, "s1");

    let (_, history) = call(
        &app,
        Method::GET,
        &format!("/api/chat/history?session_id={new_id}"),
        None,
    )
    .await;
    assert_eq!(history["count"], 0);
}

#[tokio::test]
async fn test_export_text() {
    let app = app(state(REPLY));
    call(
        &app,
        Method::POST,
        "/api/chat/message",
        Some(json!({ "session_id": "s1", "message": "hello there" })),
    )
    .await;

    let (status, bytes) = call_raw(
        &app,
        Method::POST,
        "/api/chat/export",
        Some(json!({ "session_id": "s1", "format": "text" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("User: hello there"));
    assert!(text.contains("Assistant: Happy to help with that."));
}

#[tokio::test]
async fn test_create_session() {
    let app = app(state(REPLY));
    let (status, body) = call(&app, Method::POST, "/api/chat/session", None).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["session_id"].as_str().unwrap();

    let (status, stats) = call(&app, Method::GET, &format!("/api/chat/stats/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_messages"], 0);
}

#[tokio::test]
async fn test_detector_listing() {
    let app = app(state(REPLY));
    let (status, body) = call(&app, Method::GET, "/api/detectors", None).await;
    assert_eq!(status, StatusCode::OK);

    let detectors = body.as_array().unwrap();
    assert_eq!(detectors.len(), 6);
    let toxicity = detectors.iter().find(|d| d["name"] == "toxicity").unwrap();
    assert_eq!(toxicity["loaded"], true);
    assert_eq!(toxicity["input_phase"], true);
    assert_eq!(toxicity["output_phase"], true);
    let spam = detectors.iter().find(|d| d["name"] == "spam").unwrap();
    assert_eq!(spam["output_phase"], false);
}

#[tokio::test]
async fn test_detection_endpoints() {
    let app = app(state(REPLY));

    let (status, verdict) = call(
        &app,
        Method::POST,
        "/api/detectors/detect",
        Some(json!({ "text": "call me at 555-123-4567", "detectors": ["pii"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["blocked"], true);
    assert_eq!(verdict["reasons"], json!(["pii"]));

    let (status, result) = call(
        &app,
        Method::POST,
        "/api/detectors/test",
        Some(json!({ "detector": "pii", "text": "nothing personal here" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["detector"], "pii");
    assert_eq!(result["decision"], "pass");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/detectors/test",
        Some(json!({ "detector": "sentiment", "text": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_batch_limit() {
    let app = app(state(REPLY));

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/detectors/batch",
        Some(json!({ "texts": ["hello", "jane.doe@example.com"], "detectors": ["pii"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["results"][0]["blocked"], false);
    assert_eq!(body["results"][1]["blocked"], true);

    let texts: Vec<String> = (0..21).map(|i| format!("text {i}")).collect();
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/detectors/batch",
        Some(json!({ "texts": texts })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = app(state(REPLY));
    let (status, _) = call_raw(&app, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_presets_apply_to_session() {
    let app = app(state(REPLY));

    let (status, body) = call(&app, Method::GET, "/api/detectors/presets", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["presets"]["strict"]["toxicity"]["threshold"], json!(0.5));
    assert!(body["presets"]["balanced"].is_object());
    assert!(body["presets"]["permissive"].is_object());

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/detectors/presets/permissive",
        Some(json!({ "session_id": "s1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["preset"], "permissive");

    let (_, body) = call(&app, Method::GET, "/api/chat/config/s1", None).await;
    assert_eq!(body["config"]["toxicity"]["threshold"], json!(0.8));

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/detectors/presets/lenient",
        Some(json!({ "session_id": "s1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "preset_not_found");
}

#[tokio::test]
async fn test_batch_chat() {
    let app = app(state(REPLY));

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/batch",
        Some(json!({ "messages": ["hello", "mail me at jane.doe@example.com"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message_count"], 2);
    assert_eq!(body["results"][0]["blocked"], false);
    assert_eq!(body["results"][1]["blocked"], true);

    let batch_id = body["batch_id"].as_str().unwrap();
    let (_, stats) = call(&app, Method::GET, &format!("/api/chat/stats/{batch_id}"), None).await;
    assert_eq!(stats["user_messages"], 2);

    let messages: Vec<String> = (0..11).map(|i| format!("message {i}")).collect();
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/chat/batch",
        Some(json!({ "messages": messages })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_detector_stats() {
    let app = app(state(REPLY));
    call(
        &app,
        Method::POST,
        "/api/detectors/detect",
        Some(json!({ "text": "call me at 555-123-4567", "detectors": ["pii"] })),
    )
    .await;

    let (status, body) = call(&app, Method::GET, "/api/detectors/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_detectors"], 6);
    assert_eq!(body["active_detectors"], 6);
    let pii = body["detectors"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["name"] == "pii")
        .unwrap();
    assert_eq!(pii["evaluations"], 1);
    assert_eq!(pii["blocks"], 1);
}
