// security/anomaly/sink.rs - Destinations for security events
//
// `publish` never blocks and never fails from the caller's point of view.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::event::{RiskLevel, SecurityEvent};

pub trait AlertSink: Send + Sync {
    fn publish(&self, event: SecurityEvent);
}

/// One structured log line per event, level chosen by risk
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn publish(&self, event: SecurityEvent) {
        let event_type = event.event_type.as_str();
        let user = event.user_id.as_deref().unwrap_or("-");
        let resource = event.resource.as_deref().unwrap_or("-");
        match event.risk_level {
            RiskLevel::Low => info!(
                event_type,
                user,
                ip = %event.ip_address,
                resource,
                risk = ?event.risk_level,
                attempt = event.attempt,
                "[SECURITY_EVENT] {}", event.details
            ),
            RiskLevel::Medium => warn!(
                event_type,
                user,
                ip = %event.ip_address,
                resource,
                risk = ?event.risk_level,
                attempt = event.attempt,
                "[SECURITY_EVENT] {}", event.details
            ),
            RiskLevel::High | RiskLevel::Critical => error!(
                event_type,
                user,
                ip = %event.ip_address,
                resource,
                risk = ?event.risk_level,
                attempt = event.attempt,
                "[SECURITY_EVENT] {}", event.details
            ),
        }
    }
}

/// Bounded queue for a downstream notifier. Events are dropped when full.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::Sender<SecurityEvent>,
}

impl ChannelAlertSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SecurityEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn publish(&self, event: SecurityEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(event_type = event.event_type.as_str(), "Alert queue full, dropping security event");
            }
            Err(TrySendError::Closed(event)) => {
                debug!(event_type = event.event_type.as_str(), "Alert queue closed, dropping security event");
            }
        }
    }
}

/// Publishes every event to each inner sink
#[derive(Default, Clone)]
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AlertSink for FanoutAlertSink {
    fn publish(&self, event: SecurityEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(event.clone());
            }
            last.publish(event);
        }
    }
}

/// Log sink plus a bounded queue drained by `spawn_alert_forwarder`
pub fn alert_pipeline(capacity: usize) -> (FanoutAlertSink, JoinHandle<u64>) {
    let (channel, rx) = ChannelAlertSink::new(capacity);
    let sink = FanoutAlertSink::default()
        .with(Arc::new(LogAlertSink))
        .with(Arc::new(channel));
    (sink, spawn_alert_forwarder(rx))
}

/// Forward high and critical events as single-line JSON on the
/// `security_alert` target until every sender is gone. Returns how many
/// events were forwarded.
pub fn spawn_alert_forwarder(mut rx: mpsc::Receiver<SecurityEvent>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut forwarded = 0;
        while let Some(event) = rx.recv().await {
            if event.risk_level < RiskLevel::High {
                continue;
            }
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    error!(target: "security_alert", event_type = event.event_type.as_str(), "{}", payload);
                    forwarded += 1;
                }
                Err(e) => warn!("Failed to serialize security alert: {}", e),
            }
        }
        forwarded
    })
}
