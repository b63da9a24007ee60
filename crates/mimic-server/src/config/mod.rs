//! Configuration types for mimic environments.
//!
//! An [`Environment`] is the unit of configuration and lifecycle: one bound
//! port, an ordered list of [`Route`]s, and the CORS/proxy/TLS toggles that
//! shape how unmatched traffic is treated. The types serialize in camelCase so
//! environment files written by other tooling load unchanged.

pub mod analysis;
mod loader;
mod settings;

use serde::{Deserialize, Serialize};

pub use loader::{load_environments, parse_environments};
pub use settings::EngineSettings;

/// A `(key, value-template)` pair applied to outgoing responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl HeaderEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// HTTP method a route answers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    /// Matches every method.
    All,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Patch => "patch",
            Method::Delete => "delete",
            Method::Head => "head",
            Method::Options => "options",
            Method::All => "all",
        }
    }

    /// Whether a request method is answered by a route declared with `self`.
    ///
    /// `GET` routes also answer `HEAD`, as standard HTTP routers do.
    pub fn matches(&self, method: &hyper::Method) -> bool {
        match self {
            Method::All => true,
            Method::Get => method == hyper::Method::GET || method == hyper::Method::HEAD,
            Method::Post => method == hyper::Method::POST,
            Method::Put => method == hyper::Method::PUT,
            Method::Patch => method == hyper::Method::PATCH,
            Method::Delete => method == hyper::Method::DELETE,
            Method::Head => method == hyper::Method::HEAD,
            Method::Options => method == hyper::Method::OPTIONS,
        }
    }
}

/// One method + path + response rule within an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default = "generate_uuid")]
    pub uuid: String,
    #[serde(default)]
    pub documentation: String,
    #[serde(default)]
    pub method: Method,
    /// Path pattern relative to the environment prefix (`users/:id`, `files/*`).
    #[serde(default)]
    pub endpoint: String,
    /// Response body template. Ignored when `file_path` is set.
    #[serde(default)]
    pub body: String,
    /// Route-level latency in milliseconds.
    #[serde(default)]
    pub latency: u64,
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    /// File served instead of `body`; may itself be a template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Serve the file inline instead of as an attachment.
    #[serde(default)]
    pub send_file_as_body: bool,
    /// Indices of routes in the same environment sharing method and path.
    #[serde(default)]
    pub duplicates: Vec<usize>,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            uuid: generate_uuid(),
            documentation: String::new(),
            method: Method::Get,
            endpoint: String::new(),
            body: String::new(),
            latency: 0,
            status_code: default_status_code(),
            headers: Vec::new(),
            file_path: None,
            send_file_as_body: false,
            duplicates: Vec::new(),
        }
    }
}

impl Route {
    /// The file path template, if this route serves a file.
    pub fn file_path(&self) -> Option<&str> {
        self.file_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
    }

    /// Duplicated routes are never registered.
    pub fn is_duplicated(&self) -> bool {
        !self.duplicates.is_empty()
    }
}

/// One mock server definition and its reported runtime status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(default = "generate_uuid")]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    /// Reported by the engine, never read by it.
    #[serde(default)]
    pub running: bool,
    /// Reported by the engine when the routing table is stale.
    #[serde(default)]
    pub need_restart: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub endpoint_prefix: String,
    /// Environment-wide latency in milliseconds, applied before routing.
    #[serde(default)]
    pub latency: u64,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub proxy_mode: bool,
    #[serde(default)]
    pub proxy_host: String,
    #[serde(default)]
    pub https: bool,
    #[serde(default = "default_cors")]
    pub cors: bool,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    /// Indices of other environments bound to the same port (informational).
    #[serde(default)]
    pub duplicates: Vec<usize>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            uuid: generate_uuid(),
            name: String::new(),
            running: false,
            need_restart: false,
            port: default_port(),
            endpoint_prefix: String::new(),
            latency: 0,
            routes: Vec::new(),
            proxy_mode: false,
            proxy_host: String::new(),
            https: false,
            cors: default_cors(),
            headers: Vec::new(),
            duplicates: Vec::new(),
        }
    }
}

impl Environment {
    pub fn route(&self, uuid: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.uuid == uuid)
    }

    /// Name used in log lines; falls back to the identifier.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.uuid
        } else {
            &self.name
        }
    }
}

pub(crate) fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn default_status_code() -> u16 {
    200
}

fn default_port() -> u16 {
    3000
}

fn default_cors() -> bool {
    true
}
