use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine-wide settings shared by every environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Address listeners bind to.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Maximum number of entries kept in each environment's request log.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Upper bound on a proxied upstream exchange, in seconds.
    #[serde(default = "default_proxy_timeout_secs")]
    pub proxy_timeout_secs: u64,
}

impl EngineSettings {
    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            log_capacity: default_log_capacity(),
            proxy_timeout_secs: default_proxy_timeout_secs(),
        }
    }
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_capacity() -> usize {
    100
}

fn default_proxy_timeout_secs() -> u64 {
    30
}
