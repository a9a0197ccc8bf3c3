//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub enrichment: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: prospectforge_common::VERSION,
    })
}

/// Readiness probe - checks the store; enrichment is reported but optional
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let start = std::time::Instant::now();

    let db_check = match state.store.ping().await {
        Ok(_) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    let enrichment_check = CheckResult {
        status: if state.enrichment.is_enabled() { "configured" } else { "disabled" }.to_string(),
        latency_ms: None,
        error: None,
    };

    let all_healthy = db_check.status == "up";
    let code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReadyResponse {
            status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks {
                database: db_check,
                enrichment: enrichment_check,
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use crate::test_support::{body_json, TestApp};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = TestApp::new().await;

        let health = app.request_without_user("/health").await;
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(body_json(health).await["status"], "healthy");

        let ready = app.request_without_user("/ready").await;
        assert_eq!(ready.status(), StatusCode::OK);
        let body = body_json(ready).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["database"]["status"], "up");
        assert_eq!(body["checks"]["enrichment"]["status"], "configured");
        assert_ok!(app.state.store.ping().await);
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let app = TestApp::new().await;

        let response = app
            .send(
                Request::builder()
                    .uri("/health")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.headers()["x-request-id"], "req-42");

        let generated = app.request_without_user("/health").await;
        assert!(generated.headers().contains_key("x-request-id"));
    }
}
