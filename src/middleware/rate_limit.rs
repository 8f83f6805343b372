// middleware/rate_limit.rs - Admission gate in front of auth and protected routes

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app::AppState;
use crate::auth::Principal;
use crate::config::RateLimitConfig;
use crate::error::ApiError;
use crate::middleware::client_ip::{ClientIp, UNKNOWN_IP};
use crate::security::rate_limit::{ip_key, user_key, Admission};
use crate::security::{EndpointClass, RateLimitInfo};

const AUTH_LIMITED: &str = "Too many authentication attempts. Please try again later.";
const API_LIMITED: &str = "Too many requests. Please slow down.";

/// Endpoint class for `path`, or `None` when the path is never limited
pub fn classify(path: &str, config: &RateLimitConfig) -> Option<EndpointClass> {
    if config.skip_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
        return None;
    }
    let trimmed = path.strip_suffix('/').filter(|p| !p.is_empty()).unwrap_or(path);
    if config.auth_endpoints.iter().any(|endpoint| endpoint == trimmed) {
        return Some(EndpointClass::Auth);
    }
    if config.protected_prefixes.iter().any(|prefix| under_prefix(path, prefix)) {
        return Some(EndpointClass::Api);
    }
    None
}

fn under_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

pub async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let limiter = &state.limiter;
    if !limiter.config().enabled {
        return next.run(request).await;
    }
    let Some(class) = classify(request.uri().path(), limiter.config()) else {
        return next.run(request).await;
    };

    let ip = request
        .extensions()
        .get::<ClientIp>()
        .map(|ip| ip.as_str().to_owned())
        .unwrap_or_else(|| UNKNOWN_IP.to_string());
    let key = match class {
        EndpointClass::Auth => ip_key(&ip),
        EndpointClass::Api => match request.extensions().get::<Principal>() {
            Some(principal) => user_key(principal.member_id),
            None => ip_key(&ip),
        },
    };

    let admission = limiter.try_consume(&key, class).await;
    if let Admission::Rejected { window, .. } = admission {
        warn!(
            key = %key,
            class = ?class,
            window,
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        let message = match class {
            EndpointClass::Auth => AUTH_LIMITED,
            EndpointClass::Api => API_LIMITED,
        };
        return ApiError::too_many_requests(message, admission.retry_after_secs()).into_response();
    }

    let info = limiter.info(&key, class).await;
    let mut response = next.run(request).await;
    apply_quota_headers(response.headers_mut(), &info);
    response
}

fn apply_quota_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert("x-ratelimit-limit-minute", HeaderValue::from(info.per_minute));
    if let Some(per_hour) = info.per_hour {
        headers.insert("x-ratelimit-limit-hour", HeaderValue::from(per_hour));
    }
    headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining));
}
