//! Error types for the engine.

use crate::alerts::AlertKind;
use crate::template::TemplateError;
use std::io;
use thiserror::Error;

/// Lifecycle failures. None of these leave a half-started instance behind.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Port {0} is already in use")]
    PortInUse(u16),
    #[error("Port {0} cannot be used (permission denied)")]
    PortInvalid(u16),
    #[error("Failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("Environment {0} not found")]
    EnvironmentNotFound(String),
    #[error("Environment {0} is already running")]
    AlreadyRunning(String),
}

impl EngineError {
    /// Classify a bind failure by OS error kind.
    pub fn from_bind(port: u16, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => EngineError::PortInUse(port),
            io::ErrorKind::PermissionDenied => EngineError::PortInvalid(port),
            _ => EngineError::Bind { port, source: err },
        }
    }

    pub fn alert_kind(&self) -> AlertKind {
        match self {
            EngineError::PortInUse(_) => AlertKind::PortInUse,
            EngineError::PortInvalid(_) => AlertKind::PortInvalid,
            _ => AlertKind::StartFailure,
        }
    }
}

/// Per-request failures while building a route's response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("Invalid JSON in response body: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),
}

impl ResponseError {
    pub fn alert_kind(&self) -> AlertKind {
        match self {
            ResponseError::FileNotFound { .. } | ResponseError::FileRead { .. } => {
                AlertKind::FileNotFound
            }
            ResponseError::Template(TemplateError::MissingHelper { .. }) => {
                AlertKind::MissingHelper
            }
            ResponseError::Template(_) => AlertKind::TemplateParseError,
            ResponseError::JsonParse(_) => AlertKind::JsonParseError,
            ResponseError::InvalidContentType(_) => AlertKind::InvalidContentType,
        }
    }
}
