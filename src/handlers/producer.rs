//! Producer and diagnostic endpoints.
//!
//! Application services (messaging, offers, news) call these after a
//! domain action to push live updates; the status endpoints exist for
//! operations. Deployed behind the internal network boundary.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::ServiceError;
use crate::models::UserRole;
use crate::sse::ConnectionRegistry;

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    #[serde(default = "default_event")]
    pub event: String,
    pub payload: serde_json::Value,
}

fn default_event() -> String {
    "notification".to_string()
}

/// POST /api/internal/notify/{user_id}
pub async fn notify_user(
    path: web::Path<String>,
    registry: web::Data<ConnectionRegistry>,
    body: web::Json<PushRequest>,
) -> Result<HttpResponse, ServiceError> {
    let user_id = path.into_inner();
    let delivered = registry
        .send_to_user(&user_id, &body.event, &body.payload)
        .await;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "user_id": user_id,
        "event": body.event,
        "delivered": delivered,
        "message": if delivered > 0 {
            "Event sent to connected clients"
        } else {
            "User not connected (event dropped)"
        }
    })))
}

/// POST /api/internal/broadcast/{role}
pub async fn broadcast_role(
    path: web::Path<String>,
    registry: web::Data<ConnectionRegistry>,
    body: web::Json<PushRequest>,
) -> Result<HttpResponse, ServiceError> {
    let role: UserRole = path.into_inner().parse()?;
    let delivered = registry
        .broadcast_to_role(role, &body.event, &body.payload)
        .await;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "role": role.as_str(),
        "event": body.event,
        "delivered": delivered
    })))
}

/// GET /api/internal/status/{user_id}
pub async fn connection_status(
    path: web::Path<String>,
    registry: web::Data<ConnectionRegistry>,
) -> Result<HttpResponse, ServiceError> {
    let user_id = path.into_inner();
    let count = registry.user_connection_count(&user_id).await;

    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "connected": count > 0,
        "connection_count": count
    })))
}

/// GET /api/internal/connections
pub async fn connection_totals(
    registry: web::Data<ConnectionRegistry>,
) -> Result<HttpResponse, ServiceError> {
    let total_connections = registry.connection_count().await;
    let connected_users = registry.connected_user_count().await;

    Ok(HttpResponse::Ok().json(json!({
        "total_connections": total_connections,
        "connected_users": connected_users
    })))
}

/// Register producer/diagnostic routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/internal")
            .route("/notify/{user_id}", web::post().to(notify_user))
            .route("/broadcast/{role}", web::post().to(broadcast_role))
            .route("/status/{user_id}", web::get().to(connection_status))
            .route("/connections", web::get().to(connection_totals)),
    );
}
