//! Shared harness: an engine bound to 127.0.0.1 with a memory store and a
//! channel alert sink.

#![allow(dead_code)]

use mimic_server::{
    Alert, AlertKind, ChannelAlertSink, ConfigStore, Engine, EngineSettings, Environment,
    MemoryStore,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct Harness {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub alerts: UnboundedReceiver<Alert>,
    pub client: reqwest::Client,
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        bind_host: "127.0.0.1".to_string(),
        ..Default::default()
    }
}

/// Build an environment from its camelCase JSON form. Without an explicit
/// `port` the OS assigns one.
pub fn environment(mut value: Value) -> Environment {
    if let Some(object) = value.as_object_mut() {
        object.entry("port").or_insert(Value::from(0));
    }
    serde_json::from_value(value).unwrap()
}

impl Harness {
    pub fn new(environments: Vec<Environment>) -> Self {
        Self::with_settings(environments, settings())
    }

    pub fn with_settings(environments: Vec<Environment>, settings: EngineSettings) -> Self {
        let store = Arc::new(MemoryStore::from_environments(environments));
        let (sink, alerts) = ChannelAlertSink::new();
        let engine = Engine::new(store.clone(), Arc::new(sink), settings).unwrap();
        let client = reqwest::Client::builder()
            .no_proxy()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        Self {
            engine: Arc::new(engine),
            store,
            alerts,
            client,
        }
    }

    /// Start `id` and return its base URL.
    pub async fn start(&self, id: &str) -> String {
        let addr = self.engine.start(id).await.unwrap();
        let https = self
            .store
            .environment(id)
            .map(|env| env.https)
            .unwrap_or(false);
        let scheme = if https {
            "https"
        } else {
            "http"
        };
        format!("{scheme}://127.0.0.1:{}", addr.port())
    }

    /// Drain pending alerts of `kind`.
    pub fn alerts_of(&mut self, kind: AlertKind) -> Vec<Alert> {
        let mut found = Vec::new();
        while let Ok(alert) = self.alerts.try_recv() {
            if alert.kind == kind {
                found.push(alert);
            }
        }
        found
    }
}
