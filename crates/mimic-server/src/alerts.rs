//! Alerts: human-readable error reports for whatever surface displays them.
//!
//! Reporting is fire-and-forget and never part of the request/response path.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    PortInUse,
    PortInvalid,
    StartFailure,
    RouteRegexInvalid,
    FileNotFound,
    TemplateParseError,
    MissingHelper,
    JsonParseError,
    InvalidContentType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub environment_id: String,
    pub message: String,
}

impl Alert {
    pub fn new(kind: AlertKind, environment_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            environment_id: environment_id.to_string(),
            message: message.into(),
        }
    }
}

pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: Alert);
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: Alert) {
        warn!(
            environment = %alert.environment_id,
            kind = ?alert.kind,
            "{}",
            alert.message
        );
    }
}

/// Forwards alerts over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn alert(&self, alert: Alert) {
        // receiver gone means nobody is listening anymore
        let _ = self.tx.send(alert);
    }
}
