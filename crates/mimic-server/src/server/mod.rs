//! Environment lifecycle.
//!
//! [`Engine`] owns the registry of running instances (at most one per
//! environment id), wires a [`Pipeline`] for each start, and reports status
//! back to the [`ConfigStore`].

mod client;
mod instance;
mod signature;
mod tls;

pub use client::{create_http_client, HttpClient};
pub use instance::RunningInstance;
pub use signature::RoutingSignature;
pub use tls::{embedded_tls_acceptor, NoVerifier};

use crate::alerts::{Alert, AlertKind, AlertSink};
use crate::config::{EngineSettings, Environment};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::pipeline::{Pipeline, PipelineContext};
use crate::request_log::{LogEntry, LogRegistry};
use crate::store::{ConfigStore, EnvironmentStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

pub struct Engine {
    store: Arc<dyn ConfigStore>,
    alerts: Arc<dyn AlertSink>,
    settings: EngineSettings,
    http_client: HttpClient,
    logs: LogRegistry,
    instances: Mutex<HashMap<String, RunningInstance>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        alerts: Arc<dyn AlertSink>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            store,
            alerts,
            http_client: create_http_client()?,
            logs: LogRegistry::new(settings.log_capacity),
            settings,
            instances: Mutex::new(HashMap::new()),
        })
    }

    /// Start the environment `id` and return the address it listens on.
    ///
    /// Bind failures are classified, alerted and returned; nothing is
    /// registered for a failed start. Routes with an invalid path pattern are
    /// skipped with an alert and do not fail the start.
    pub async fn start(&self, id: &str) -> Result<SocketAddr, EngineError> {
        if self.is_running(id) {
            return Err(EngineError::AlreadyRunning(id.to_string()));
        }
        let environment = self
            .store
            .environment(id)
            .ok_or_else(|| EngineError::EnvironmentNotFound(id.to_string()))?;

        let (listener, local_addr, tls) = match self.bind(&environment).await {
            Ok(bound) => bound,
            Err(err) => {
                error!(
                    "Failed to start {}: {}",
                    environment.display_name(),
                    err
                );
                self.alerts
                    .alert(Alert::new(err.alert_kind(), id, err.to_string()));
                return Err(err);
            }
        };

        let context = PipelineContext {
            store: Arc::clone(&self.store),
            alerts: Arc::clone(&self.alerts),
            log: self.logs.log_for(id),
            http_client: self.http_client.clone(),
            proxy_timeout: self.settings.proxy_timeout(),
        };
        let (pipeline, pattern_errors) = Pipeline::build(Arc::clone(&environment), context);
        for err in pattern_errors {
            warn!("Skipping route in {}: {}", environment.display_name(), err);
            self.alerts
                .alert(Alert::new(AlertKind::RouteRegexInvalid, id, err.to_string()));
        }
        debug!(
            "Pipeline for {}: {}",
            environment.display_name(),
            pipeline.stage_names().join(" -> ")
        );

        {
            let mut instances = self.instances.lock();
            if instances.contains_key(id) {
                return Err(EngineError::AlreadyRunning(id.to_string()));
            }
            let instance = RunningInstance::spawn(
                listener,
                local_addr,
                tls,
                Arc::new(pipeline),
                RoutingSignature::of(&environment),
            );
            instances.insert(id.to_string(), instance);
        }

        info!(
            "Environment {} listening on {}://{}",
            environment.display_name(),
            if environment.https { "https" } else { "http" },
            local_addr
        );
        self.store.post_status(
            id,
            EnvironmentStatus {
                running: true,
                need_restart: false,
            },
        );
        Ok(local_addr)
    }

    async fn bind(
        &self,
        environment: &Environment,
    ) -> Result<(TcpListener, SocketAddr, Option<TlsAcceptor>), EngineError> {
        let tls = if environment.https {
            Some(embedded_tls_acceptor()?)
        } else {
            None
        };
        let port = environment.port;
        let listener = TcpListener::bind((self.settings.bind_host.as_str(), port))
            .await
            .map_err(|e| EngineError::from_bind(port, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| EngineError::from_bind(port, e))?;
        Ok((listener, local_addr, tls))
    }

    /// Stop the environment `id`, closing open connections. Returns `false`
    /// without side effects when it is not running.
    pub async fn stop(&self, id: &str) -> bool {
        let removed = self.instances.lock().remove(id);
        let Some(instance) = removed else {
            debug!("Environment {} is not running", id);
            return false;
        };
        let addr = instance.local_addr();
        instance.shutdown().await;
        info!("Environment {} on {} stopped", id, addr);

        self.store.post_status(id, EnvironmentStatus::default());
        true
    }

    pub async fn stop_all(&self) {
        for id in self.running_ids() {
            self.stop(&id).await;
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.instances.lock().contains_key(id)
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.instances.lock().keys().cloned().collect()
    }

    pub fn local_addr(&self, id: &str) -> Option<SocketAddr> {
        self.instances.lock().get(id).map(RunningInstance::local_addr)
    }

    /// Logged requests for `id`, newest first.
    pub fn logs(&self, id: &str) -> Vec<LogEntry> {
        self.logs
            .get(id)
            .map(|log| log.entries())
            .unwrap_or_default()
    }

    pub fn clear_logs(&self, id: &str) {
        if let Some(log) = self.logs.get(id) {
            log.clear();
        }
    }

    /// Compare the live environment with the one the instance was started
    /// with and report whether a restart is needed. Returns the new flag.
    pub fn environment_updated(&self, id: &str) -> bool {
        let Some(started) = self
            .instances
            .lock()
            .get(id)
            .map(|instance| instance.signature().clone())
        else {
            return false;
        };
        let Some(environment) = self.store.environment(id) else {
            return false;
        };

        let need_restart = RoutingSignature::of(&environment) != started;
        if need_restart != environment.need_restart {
            debug!(
                "Environment {} needRestart changed to {}",
                environment.display_name(),
                need_restart
            );
            self.store.post_status(
                id,
                EnvironmentStatus {
                    running: true,
                    need_restart,
                },
            );
        }
        need_restart
    }

    pub async fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::EnvironmentDeleted(id) => {
                self.stop(&id).await;
                self.logs.remove(&id);
                info!("Environment {} deleted", id);
            }
            EngineEvent::EnvironmentUpdated(id) => {
                self.environment_updated(&id);
            }
        }
    }

    /// Consume events until the bus closes.
    pub fn spawn_event_listener(
        self: Arc<Self>,
        mut events: broadcast::Receiver<EngineEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event listener lagged, {} event(s) skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Event bus closed");
        })
    }
}
