//! Mimic: mock API environments served over HTTP(S).
//!
//! An [`Engine`] starts one listener per environment. Requests run through a
//! fixed pipeline (request log, latency, user routes, CORS preflight, proxy
//! fallback) against the live configuration held by a [`ConfigStore`].

pub mod alerts;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod pipeline;
pub mod request_log;
pub mod routing;
pub mod server;
pub mod store;
pub mod template;

pub use alerts::{Alert, AlertKind, AlertSink, ChannelAlertSink, TracingAlertSink};
pub use config::{EngineSettings, Environment, HeaderEntry, Method, Route};
pub use error::{EngineError, ResponseError};
pub use events::{event_bus, EngineEvent};
pub use pipeline::is_valid_url;
pub use request_log::LogEntry;
pub use server::Engine;
pub use store::{ConfigStore, EnvironmentStatus, MemoryStore};
