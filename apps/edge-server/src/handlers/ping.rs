//! Minimal rate-limited endpoint.

use actix_web::HttpResponse;

/// GET /api/ping
pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "message": "pong" }))
}
