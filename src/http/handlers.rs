use actix_web::{http::header, web, HttpResponse};
use tracing::{debug, warn};

use crate::dispatch::Caller;
use crate::error::AppError;
use crate::protocol::CommandEnvelope;
use crate::AppState;

/// One command per request. The session, if any, travels inside the body.
pub async fn command(body: web::Bytes, state: web::Data<AppState>) -> crate::Result<HttpResponse> {
    let (envelope, raw) = match CommandEnvelope::decode(&body) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Dropping malformed request: {}", e);
            return Ok(HttpResponse::BadRequest()
                .insert_header((header::CACHE_CONTROL, "no-cache"))
                .finish());
        }
    };
    debug!("Received {} request", envelope.cmd);

    let session = match envelope.session.as_deref().filter(|token| !token.is_empty()) {
        Some(token) => state.registry.get(token).await,
        None => None,
    };
    let reply = state
        .dispatcher
        .dispatch(&envelope, &raw, Caller::Stateless(session.as_ref()))
        .await;

    let body = serde_json::to_vec(&reply.response)
        .map_err(|e| AppError::InternalError(format!("Failed to serialize reply: {}", e)))?;
    Ok(HttpResponse::build(reply.status.http_status())
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .content_type("application/json")
        .body(body))
}

/// Health check endpoint handler
/// Returns a JSON response with server status, timestamp and live counts
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "sessions": state.registry.len().await,
        "connections": state.connections.connection_count().await,
    }))
}
