// =============================================================================
// Bearer Token Authentication — JWT claims + Axum extractor
// =============================================================================
//
// Stateless HS256 tokens carrying user_id, role, and a type discriminator
// (access vs refresh). The extractor accepts the token from the
// `Authorization: Bearer` header or, for WebSocket upgrades, from the
// `?token=` query parameter. Only access tokens authenticate requests.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::model::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub role: String,
    pub typ: String,
    pub iat: i64,
    pub exp: i64,
}

// =============================================================================
// Token generation / parsing
// =============================================================================

pub fn generate_access_token(
    user_id: i64,
    role: Role,
    secret: &str,
    minutes: i64,
) -> AppResult<String> {
    generate_token(user_id, role, secret, "access", minutes * 60)
}

pub fn generate_refresh_token(
    user_id: i64,
    role: Role,
    secret: &str,
    hours: i64,
) -> AppResult<String> {
    generate_token(user_id, role, secret, "refresh", hours * 3600)
}

fn generate_token(
    user_id: i64,
    role: Role,
    secret: &str,
    typ: &str,
    ttl_secs: i64,
) -> AppResult<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        user_id,
        role: role.as_str().to_string(),
        typ: typ.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token encode: {e}")))
}

pub fn parse_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::AuthRequired("invalid or expired token".into()))
}

// =============================================================================
// Authenticated principal
// =============================================================================

/// The authenticated caller, resolved from a valid access token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
    pub role: Role,
}

impl AuthUser {
    /// Support / super-admin gate for review and broadcast endpoints.
    pub fn require_admin(&self) -> AppResult<()> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(AppError::PermissionDenied("admin role required".into()))
        }
    }
}

/// Resolve a raw token string into an authenticated principal. Shared by the
/// HTTP extractor and the WebSocket upgrade handler.
pub fn authenticate_token(token: &str, secret: &str) -> AppResult<AuthUser> {
    if secret.is_empty() {
        warn!("auth.jwt_secret is not configured, rejecting all authenticated requests");
        return Err(AppError::AuthRequired("authentication not configured".into()));
    }
    let claims = parse_token(token, secret)?;
    if claims.typ != "access" {
        return Err(AppError::AuthRequired("access token required".into()));
    }
    let role = Role::parse(&claims.role)
        .ok_or_else(|| AppError::AuthRequired("unknown role in token".into()))?;
    Ok(AuthUser {
        user_id: claims.user_id,
        role,
    })
}

/// Pull the token out of the Authorization header, falling back to the
/// `?token=` query parameter.
pub fn token_from_parts(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    if from_header.is_some() {
        return from_header;
    }
    parts
        .uri
        .query()?
        .split('&')
        .find_map(|kv| kv.strip_prefix("token=").map(str::to_string))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts)
            .ok_or_else(|| AppError::AuthRequired("missing authorization token".into()))?;
        authenticate_token(&token, &state.config.auth.jwt_secret)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn access_token_roundtrip() {
        let token = generate_access_token(42, Role::Customer, SECRET, 30).unwrap();
        let auth = authenticate_token(&token, SECRET).unwrap();
        assert_eq!(auth.user_id, 42);
        assert_eq!(auth.role, Role::Customer);
    }

    #[test]
    fn refresh_token_cannot_authenticate() {
        let token = generate_refresh_token(42, Role::Customer, SECRET, 24).unwrap();
        let err = authenticate_token(&token, SECRET).unwrap_err();
        assert!(matches!(err, AppError::AuthRequired(_)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_access_token(42, Role::Customer, SECRET, 30).unwrap();
        assert!(authenticate_token(&token, "other-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        // Far enough in the past to clear the default validation leeway.
        let token = generate_access_token(42, Role::Customer, SECRET, -5).unwrap();
        assert!(authenticate_token(&token, SECRET).is_err());
    }

    #[test]
    fn empty_secret_rejects_everything() {
        let token = generate_access_token(42, Role::Customer, SECRET, 30).unwrap();
        assert!(authenticate_token(&token, "").is_err());
    }

    #[test]
    fn admin_gate() {
        let customer = AuthUser {
            user_id: 1,
            role: Role::Customer,
        };
        assert!(customer.require_admin().is_err());
        let support = AuthUser {
            user_id: 2,
            role: Role::Support,
        };
        assert!(support.require_admin().is_ok());
    }
}
