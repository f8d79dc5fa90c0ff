//! Liveness endpoint and the fallback for unknown paths.

use actix_web::{http::header, HttpRequest, HttpResponse, ResponseError};
use serde_json::json;
use tracing::warn;

use crate::error::AppError;

/// `GET /health`
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Default service: 404 for everything unrouted.
///
/// A WebSocket upgrade on an unknown path also gets its connection closed, so
/// the client can't keep it open.
pub async fn not_found(req: HttpRequest) -> HttpResponse {
    if is_websocket_upgrade(&req) {
        warn!(path = %req.path(), "Rejecting WebSocket upgrade on unknown path");
        return HttpResponse::NotFound().force_close().finish();
    }
    AppError::NotFound(req.path().to_string()).error_response()
}

pub fn is_websocket_upgrade(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}
