//! Subscription endpoint: upgrades an authenticated GET into a long-lived
//! event stream registered with the connection registry.

use actix_web::http::header;
use actix_web::{web, HttpResponse};

use crate::auth::Identity;
use crate::error::ServiceError;
use crate::models::UserRole;
use crate::sse::{ConnectionRegistry, SseStream};

/// GET /api/{role}/notifications/subscribe
///
/// The path role must match the caller's session role. The response body
/// never ends on its own; the client disconnecting is what tears the
/// connection down.
pub async fn subscribe(
    path: web::Path<String>,
    identity: Identity,
    registry: web::Data<ConnectionRegistry>,
) -> Result<HttpResponse, ServiceError> {
    let role: UserRole = path.into_inner().parse()?;
    if identity.role != role {
        return Err(ServiceError::Forbidden);
    }

    let connection = registry.open(&identity.user_id, role).await;
    let stream = SseStream::new(registry.get_ref().clone(), identity.user_id, connection);

    // keep-alive comes from the HTTP/1.1 default; actix owns the
    // Connection header
    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(stream))
}

/// Register subscription routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/api/{role}/notifications/subscribe",
        web::get().to(subscribe),
    );
}
