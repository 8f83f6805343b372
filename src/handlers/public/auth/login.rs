// handlers/public/auth/login.rs - POST /auth/login handler

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::app::AppState;
use crate::auth::{generate_jwt, verify_password, Claims, Principal};
use crate::domain::DomainStore;
use crate::error::ApiError;
use crate::middleware::client_ip::{ClientIp, UNKNOWN_IP};
use crate::middleware::{ApiResponse, ApiResult};
use crate::security::AuthContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(alias = "login_id")]
    pub login_id: String,
    pub password: String,
}

/**
 * POST /auth/login - Verify credentials and issue a bearer token
 *
 * Input:
 * ```json
 * { "loginId": "alice", "password": "..." }
 * ```
 *
 * Output:
 * ```json
 * {
 *   "success": true,
 *   "data": {
 *     "token": "eyJ...",
 *     "member": { "id": 1, "login_id": "alice", "name": "alice" },
 *     "expires_in": 86400
 *   }
 * }
 * ```
 *
 * Every attempt is reported to the anomaly monitor. A success clears the
 * failure count for (ip, login id); a failure increments it and may raise a
 * brute-force event.
 */
pub async fn login_post(
    State(state): State<AppState>,
    client_ip: Option<Extension<ClientIp>>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let ip = client_ip
        .map(|Extension(ip)| ip.0)
        .unwrap_or_else(|| UNKNOWN_IP.to_string());

    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            state
                .monitor
                .track_suspicious_request(&ip, "/auth/login", "Malformed login payload")
                .await;
            return Err(ApiError::invalid_json(rejection.body_text()));
        }
    };

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ctx = AuthContext::new(&request.login_id, &ip).with_user_agent(user_agent);

    let member = state.domain.member_by_login(&request.login_id).await?;
    let member = match member {
        Some(member) if verify_password(&request.password, &member.password_hash) => member,
        _ => {
            let assessment = state.monitor.record_failure(&ctx, "Invalid credentials").await;
            warn!(
                login_id = %request.login_id,
                ip = %ip,
                attempt = assessment.attempt,
                risk = ?assessment.risk,
                "Login failed"
            );
            return Err(ApiError::unauthorized("Invalid login credentials"));
        }
    };

    state.monitor.record_success(&ctx).await;

    let principal = Principal::new(member.id, &member.login_id);
    let expiry_hours = state.config.security.jwt_expiry_hours;
    let token = generate_jwt(&Claims::new(&principal, expiry_hours), &state.config.security.jwt_secret)?;

    info!(member_id = member.id, ip = %ip, "Login succeeded");

    Ok(ApiResponse::success(json!({
        "token": token,
        "member": {
            "id": member.id,
            "login_id": member.login_id,
            "name": member.name,
        },
        "expires_in": expiry_hours * 3600,
    })))
}
