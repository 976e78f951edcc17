// src/server/admin.rs
use hyper::{Body, Response, StatusCode};
use serde::Serialize;

use crate::proxy::BackendPool;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    healthy_backends: usize,
    total_backends: usize,
}

/// Serves `GET /health` — aggregate status over the backend pool.
/// `200 ok` when any backend is healthy, `503 degraded` otherwise.
pub fn health_response(pool: &BackendPool) -> Response<Body> {
    let healthy_backends = pool.healthy_count();
    let total_backends = pool.len();

    let (status_code, status) = if healthy_backends > 0 {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthBody {
        status,
        healthy_backends,
        total_backends,
    };

    Response::builder()
        .status(status_code)
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&body).expect("health body always serializes"),
        ))
        .unwrap()
}
