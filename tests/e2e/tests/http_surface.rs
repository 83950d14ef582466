//! HTTP surface tests
//!
//! Drives the axum router in-process with `tower::ServiceExt::oneshot`,
//! covering the public JSON contract end to end.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use greenroom_core::EngineConfig;
use greenroom_server::state::AppState;

fn test_app() -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = AppState::build(Some(dir.path().to_path_buf()), EngineConfig::default())
        .expect("state");
    (greenroom_server::app(state), dir)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_endpoints_report_ok() {
    let (app, _dir) = test_app();

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["checks"].is_array());

    for uri in ["/ready", "/live"] {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn metrics_exposition_is_text() {
    let (app, _dir) = test_app();
    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn index_then_semantic_search_roundtrip() {
    let (app, _dir) = test_app();

    let profile = serde_json::json!({
        "id": "t1",
        "name": "Asha Verma",
        "age": 28,
        "location": "Mumbai",
        "skills": ["dance"],
        "languages": ["hindi"],
        "bio": "classical dancer",
        "createdAt": chrono::Utc::now().to_rfc3339(),
        "updatedAt": chrono::Utc::now().to_rfc3339(),
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/v1/search/index/talent", profile))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["talentId"], "t1");
    assert!(body["indexedAt"].is_string());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/search/talent/semantic",
            serde_json::json!({ "query": "dancer in Mumbai", "topK": 5 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["results"][0]["talentId"], "t1");
    assert!(body["results"][0]["matchScore"].as_f64().unwrap() > 0.0);
    assert!(body["results"][0]["explanation"].is_string());
    assert!(body["searchTimeMs"].is_number());

    let response = app
        .clone()
        .oneshot(Request::get("/api/v1/search/index/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn chat_then_transcript_then_delete() {
    let (app, _dir) = test_app();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/conversation/chat",
            serde_json::json!({ "message": "hello there" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let conversation_id = body["conversationId"].as_str().unwrap().to_string();
    assert!(!body["response"].as_str().unwrap().is_empty());
    assert!(body["metadata"]["intent"].is_string());

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/conversation/{conversation_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["messageCount"], 2);

    let response = app
        .clone()
        .oneshot(
            Request::delete(format!("/api/v1/conversation/{conversation_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Transcript is gone afterwards
    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/conversation/{conversation_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validation_errors_carry_the_error_contract() {
    let (app, _dir) = test_app();
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/search/talent/semantic",
            serde_json::json!({ "query": "" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "validation_error");
    assert!(body["detail"].is_string());
    assert!(body["requestId"].is_string());
}

#[tokio::test]
async fn script_analysis_endpoint() {
    let (app, _dir) = test_app();
    let script = "INT. STUDIO - DAY\n\nRAVI (30s)\nTrust me, I know every step.\n\nMEERA\nWhat if we are not ready?\n";
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/ai/analyze/script",
            serde_json::json!({ "scriptText": script }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let characters = body["characters"].as_array().unwrap();
    assert_eq!(characters.len(), 2);
    assert!(body["requirements"].as_array().unwrap().len() == 2);
}

#[tokio::test]
async fn usage_report_counts_completion_calls() {
    let (app, _dir) = test_app();
    // A general-inquiry chat goes through the completion provider
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/conversation/chat",
            serde_json::json!({ "message": "what a lovely day" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/api/v1/ai/usage/report").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(response).await;
    assert!(body["totalRequests"].as_u64().unwrap() >= 1);
    assert!(body["totalTokens"].as_u64().unwrap() > 0);
}
