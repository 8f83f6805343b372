// security/anomaly/event.rs - Structured security events

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::AnomalyConfig;

/// Ordered risk label derived from a failure count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify an authentication failure count
    pub fn for_failures(count: u32, config: &AnomalyConfig) -> Self {
        if count >= config.critical_threshold {
            RiskLevel::Critical
        } else if count >= config.high_threshold {
            RiskLevel::High
        } else if count >= config.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Classify a suspicious-activity count; volume above the threshold is high risk
    pub fn for_suspicious(count: u32, config: &AnomalyConfig) -> Self {
        if count > config.suspicious_threshold {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    AuthenticationSuccess,
    AuthenticationFailure,
    AuthorizationDenied,
    SuspiciousRequest,
    BruteForceAttack,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::AuthenticationSuccess => "AUTHENTICATION_SUCCESS",
            SecurityEventType::AuthenticationFailure => "AUTHENTICATION_FAILURE",
            SecurityEventType::AuthorizationDenied => "AUTHORIZATION_DENIED",
            SecurityEventType::SuspiciousRequest => "SUSPICIOUS_REQUEST",
            SecurityEventType::BruteForceAttack => "BRUTE_FORCE_ATTACK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOutcome {
    Success,
    Failure,
    Denied,
    Detected,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    pub user_id: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub result: EventOutcome,
    pub risk_level: RiskLevel,
    pub details: String,
    pub attempt: Option<u32>,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        ip_address: impl Into<String>,
        result: EventOutcome,
        risk_level: RiskLevel,
        at_millis: i64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: DateTime::<Utc>::from_timestamp_millis(at_millis).unwrap_or_else(Utc::now),
            event_type,
            user_id: None,
            ip_address: ip_address.into(),
            user_agent: None,
            resource: None,
            action: None,
            result,
            risk_level,
            details: String::new(),
            attempt: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn resource(mut self, resource: impl Into<String>, action: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self.action = Some(action.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}
