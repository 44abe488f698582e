use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::state::{AppState, AuthConfig};

pub const ROLE_CUSTOMER: &str = "CUSTOMER";
pub const ROLE_ADMIN: &str = "ADMIN";

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub exp: usize,
}

/// Caller identity, inserted into request extensions by the auth middleware
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user_id: String,
    pub email: String,
    pub role: String,
}

impl UserSession {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

impl From<Claims> for UserSession {
    fn from(claims: Claims) -> Self {
        Self { user_id: claims.sub, email: claims.email, role: claims.role }
    }
}

/// HS256 token valid for `auth.expiration` seconds
pub fn issue_token(auth: &AuthConfig, sub: &str, email: &str, role: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: sub.to_string(),
        email: email.to_string(),
        role: role.to_string(),
        exp: (Utc::now() + Duration::seconds(auth.expiration as i64)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(auth.secret.as_bytes()))
}

fn session_from_headers(auth: &AuthConfig, headers: &HeaderMap) -> Result<UserSession, StatusCode> {
    let Authorization(bearer) = headers
        .typed_get::<Authorization<Bearer>>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        StatusCode::UNAUTHORIZED
    })?;

    Ok(token_data.claims.into())
}

// ============================================================================
// Customer Authentication Middleware
// ============================================================================

/// Any signed-in caller; admins may use customer routes too
pub async fn customer_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let session = session_from_headers(&state.auth, req.headers())?;

    if session.role != ROLE_CUSTOMER && !session.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

// ============================================================================
// Admin Authentication Middleware
// ============================================================================

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let session = session_from_headers(&state.auth, req.headers())?;

    if !session.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    fn auth() -> AuthConfig {
        AuthConfig { secret: "test-secret".to_string(), expiration: 60 }
    }

    #[test]
    fn test_token_round_trip() {
        let token = issue_token(&auth(), "driver_1", "d@example.com", ROLE_CUSTOMER).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());

        let session = session_from_headers(&auth(), &headers).unwrap();
        assert_eq!(session.user_id, "driver_1");
        assert!(!session.is_admin());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let other = AuthConfig { secret: "other".to_string(), expiration: 60 };
        let token = issue_token(&other, "driver_1", "d@example.com", ROLE_ADMIN).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());

        assert_eq!(session_from_headers(&auth(), &headers).unwrap_err(), StatusCode::UNAUTHORIZED);
        assert_eq!(session_from_headers(&auth(), &HeaderMap::new()).unwrap_err(), StatusCode::UNAUTHORIZED);
    }
}
