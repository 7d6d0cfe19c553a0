use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

fn ok(latency_ms: u64) -> ComponentHealth {
    ComponentHealth {
        status: "ok".to_string(),
        latency_ms: Some(latency_ms),
    }
}

fn error() -> ComponentHealth {
    ComponentHealth {
        status: "error".to_string(),
        latency_ms: None,
    }
}

/// GET /health — dependency health with per-check latency.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_start = std::time::Instant::now();
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ok(db_start.elapsed().as_millis() as u64),
        Err(_) => error(),
    };

    let redis_start = std::time::Instant::now();
    let redis = match state.queue.health_check().await {
        Ok(_) => ok(redis_start.elapsed().as_millis() as u64),
        Err(_) => error(),
    };

    let all_healthy = database.status == "ok" && redis.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok".to_string() } else { "degraded".to_string() },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { database, redis },
    };

    (status_code, Json(response))
}
