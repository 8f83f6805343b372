use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::app::AppState;
use crate::auth::{validate_jwt, Principal};
use crate::error::ApiError;

/// Decodes a Bearer token when present and attaches the caller's principal.
///
/// Anonymous requests pass through untouched; routes that need a caller
/// either extract `Principal` or let the ownership gate reject them.
pub async fn principal_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if let Some(token) = extract_jwt_from_headers(request.headers()) {
        match validate_jwt(&token, &state.config.security.jwt_secret) {
            Ok(claims) => {
                request.extensions_mut().insert(Principal::from(claims));
            }
            Err(e) => {
                debug!(error = %e, "Ignoring invalid bearer token");
            }
        }
    }
    next.run(request).await
}

/// Extract JWT token from Authorization header
pub fn extract_jwt_from_headers(headers: &HeaderMap) -> Option<String> {
    let auth_str = headers.get("authorization")?.to_str().ok()?;
    let token = auth_str.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}
