//! Operational endpoints: health, readiness, liveness, metrics

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check().await;
    let status = if report.ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let mut body = serde_json::to_value(&report).unwrap_or_default();
    if let Some(object) = body.as_object_mut() {
        object.insert(
            "uptimeSecs".into(),
            serde_json::json!(state.started_at.elapsed().as_secs()),
        );
        object.insert(
            "version".into(),
            serde_json::json!(env!("CARGO_PKG_VERSION")),
        );
    }
    (status, Json(body))
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check().await;
    let status = if report.ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!({ "ready": report.ready() })))
}

pub async fn live(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check().await;
    let status = if report.live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!({ "alive": report.live() })))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.telemetry.render_prometheus(),
    )
}
