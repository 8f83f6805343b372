// middleware/ownership.rs - Per-route ownership gate
//
// Attached with `route_layer` so path parameters are already matched. Only the
// parameter source the policy declares is read; the body is buffered for
// body-sourced policies and handed back to the handler unchanged. Anonymous
// callers are turned away before the body is touched.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{FromRequestParts, Query, RawPathParams, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use tracing::debug;

use crate::auth::Principal;
use crate::error::ApiError;
use crate::middleware::client_ip::{ClientIp, UNKNOWN_IP};
use crate::security::ownership::{InvocationArgs, ParameterSource};
use crate::security::{AnomalyMonitor, AuthContext, OwnershipError, OwnershipPolicy, OwnershipValidator};

/// State for one guarded route
#[derive(Clone)]
pub struct OwnershipGate {
    pub validator: OwnershipValidator,
    pub policy: Arc<OwnershipPolicy>,
    pub monitor: Arc<AnomalyMonitor>,
    pub max_body: usize,
}

impl OwnershipGate {
    pub fn new(
        validator: OwnershipValidator,
        policy: OwnershipPolicy,
        monitor: Arc<AnomalyMonitor>,
        max_body: usize,
    ) -> Self {
        Self {
            validator,
            policy: Arc::new(policy),
            monitor,
            max_body,
        }
    }
}

pub async fn ownership_gate(
    State(gate): State<OwnershipGate>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();
    let Some(principal) = parts.extensions.get::<Principal>().cloned() else {
        debug!(path = %parts.uri.path(), "Guarded route called without a principal");
        return Err(OwnershipError::Unauthenticated.into());
    };
    let ip = client_ip(&parts);

    let (body, json) = match gate.policy.source {
        ParameterSource::Body => {
            let bytes = to_bytes(body, gate.max_body)
                .await
                .map_err(|_| ApiError::payload_too_large("Request body too large"))?;
            let json = parse_body(&bytes);
            if json.is_none() && !bytes.iter().all(u8::is_ascii_whitespace) {
                gate.monitor
                    .track_suspicious_request(&ip, parts.uri.path(), "Malformed JSON body on guarded route")
                    .await;
            }
            (Body::from(bytes), json)
        }
        _ => (body, None),
    };

    let mut args = InvocationArgs::new();
    match gate.policy.source {
        ParameterSource::Path => {
            if let Ok(params) = RawPathParams::from_request_parts(&mut parts, &()).await {
                for (name, value) in params.iter() {
                    args = args.with_path(name, value);
                }
            }
        }
        ParameterSource::Query => {
            if let Ok(Query(query)) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri) {
                args.query = query;
            }
        }
        ParameterSource::Body => {
            if let Some(json) = json.as_ref() {
                args = args.with_body(json);
            }
        }
    }

    match gate.validator.check(Some(&principal), &gate.policy, &args).await {
        Ok(()) => {}
        Err(OwnershipError::Forbidden) => {
            let ctx = AuthContext::new(&principal.login_id, &ip).with_user_agent(user_agent(&parts));
            gate.monitor
                .record_access_denied(&ctx, gate.policy.resource_type.as_str(), parts.method.as_str())
                .await;
            return Err(OwnershipError::Forbidden.into());
        }
        Err(e) => return Err(e.into()),
    }

    debug!(path = %parts.uri.path(), "Ownership gate passed");
    Ok(next.run(Request::from_parts(parts, body)).await)
}

fn parse_body(bytes: &[u8]) -> Option<Value> {
    serde_json::from_slice::<Value>(bytes).ok()
}

fn client_ip(parts: &Parts) -> String {
    parts
        .extensions
        .get::<ClientIp>()
        .map(|ip| ip.as_str().to_owned())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

fn user_agent(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
