//! Session identity resolution.
//!
//! Sessions are HMAC-signed JWTs issued by the platform's auth service and
//! carried in the `token` cookie (or an `Authorization: Bearer` header for
//! non-browser clients). This module only validates tokens; it never issues
//! them outside of tests and tooling.

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::models::UserRole;

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated caller, resolved from the session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: UserRole,
}

/// HMAC secret shared with the auth service, held in app data
#[derive(Clone)]
pub struct SessionKey(pub String);

/// Validate a session token and resolve the caller's identity.
pub fn decode_token(token: &str, secret: &str) -> Result<Identity, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|err| {
        tracing::debug!(error = %err, "session token rejected");
        ServiceError::Unauthorized
    })?;

    Ok(Identity {
        user_id: data.claims.sub,
        role: data.claims.role,
    })
}

/// Issue a session token. Used by tests and operator tooling; production
/// tokens come from the auth service.
pub fn issue_token(
    user_id: &str,
    role: UserRole,
    secret: &str,
    ttl: Duration,
) -> Result<String, ServiceError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| ServiceError::Internal(format!("failed to sign token: {err}")))
}

fn token_from_request(req: &HttpRequest) -> Option<String> {
    if let Some(cookie) = req.cookie("token") {
        return Some(cookie.value().to_string());
    }
    req.headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

impl FromRequest for Identity {
    type Error = ServiceError;
    type Future = Ready<Result<Identity, ServiceError>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = match (
            token_from_request(req),
            req.app_data::<web::Data<SessionKey>>(),
        ) {
            (Some(token), Some(key)) => decode_token(&token, &key.0),
            (None, _) => Err(ServiceError::Unauthorized),
            (_, None) => Err(ServiceError::Internal("session key not configured".into())),
        };
        ready(result)
    }
}
