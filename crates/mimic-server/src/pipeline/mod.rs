//! Request pipeline for a running environment.
//!
//! Each request flows through a fixed, ordered list of stages:
//!
//! 1. [`RequestLogger`] - records the request
//! 2. [`EnvironmentLatency`] - environment-wide delay
//! 3. [`RouteDispatcher`] - user routes (route latency, headers, body)
//! 4. [`CorsResponder`] - preflight answers, when CORS is enabled
//! 5. [`ProxyFallback`] - forwards to the upstream, when configured
//!
//! A stage either handles the request or passes it on. Stages receive the
//! environment snapshot fetched from the store when the request arrived, so
//! live edits apply without a restart while one request always sees a single
//! consistent version.

mod cors;
mod dispatcher;
mod latency;
mod logger;
mod proxy;

pub use cors::CorsResponder;
pub use dispatcher::{is_templatable, RouteDispatcher};
pub use latency::{wait, EnvironmentLatency};
pub use logger::RequestLogger;
pub use proxy::{is_valid_url, ProxyFallback};

use crate::alerts::AlertSink;
use crate::config::Environment;
use crate::request_log::RequestLog;
use crate::routing::{PatternError, RouteTable};
use crate::server::HttpClient;
use crate::store::ConfigStore;
use crate::template::RequestContext;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::http::request::Parts;
use hyper::{Request, Response, StatusCode};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub type HttpResponse = Response<Full<Bytes>>;

/// A request in flight, with its body already read.
#[derive(Debug)]
pub struct Exchange {
    pub parts: Parts,
    pub body: Bytes,
    pub client_addr: SocketAddr,
    /// Id of the request's entry in the environment log.
    pub log_id: Option<u64>,
}

impl Exchange {
    pub fn new(parts: Parts, body: Bytes, client_addr: SocketAddr) -> Self {
        Self {
            parts,
            body,
            client_addr,
            log_id: None,
        }
    }

    /// Template context for this request.
    pub fn request_context(&self, params: HashMap<String, String>) -> RequestContext {
        RequestContext::new(
            &self.parts.method,
            &self.parts.uri,
            &self.parts.headers,
            &self.body,
            Some(self.client_addr),
        )
        .with_params(params)
    }
}

pub enum StageOutcome {
    Handled(HttpResponse),
    Next,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, exchange: &mut Exchange, environment: &Environment) -> StageOutcome;
}

/// Collaborators a pipeline is wired with.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn ConfigStore>,
    pub alerts: Arc<dyn AlertSink>,
    pub log: Arc<RequestLog>,
    pub http_client: HttpClient,
    pub proxy_timeout: Duration,
}

pub struct Pipeline {
    environment_id: String,
    store: Arc<dyn ConfigStore>,
    /// Snapshot taken at start, used if the store no longer has the
    /// environment.
    started_with: Arc<Environment>,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Wire the stages for `environment`. Routes whose path pattern does not
    /// compile are left out and returned.
    pub fn build(
        environment: Arc<Environment>,
        context: PipelineContext,
    ) -> (Self, Vec<PatternError>) {
        let (table, errors) = RouteTable::build(&environment);

        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(RequestLogger::new(Arc::clone(&context.log))),
            Box::new(EnvironmentLatency),
            Box::new(RouteDispatcher::new(table, Arc::clone(&context.alerts))),
        ];
        if environment.cors {
            stages.push(Box::new(CorsResponder::new(Arc::clone(&context.alerts))));
        }
        if let Some(proxy) = ProxyFallback::new(
            &environment,
            context.http_client.clone(),
            Arc::clone(&context.log),
            context.proxy_timeout,
        ) {
            stages.push(Box::new(proxy));
        }

        let pipeline = Self {
            environment_id: environment.uuid.clone(),
            store: context.store,
            started_with: environment,
            stages,
        };
        (pipeline, errors)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub async fn handle(
        &self,
        req: Request<Incoming>,
        client_addr: SocketAddr,
    ) -> Result<HttpResponse, Infallible> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!("Failed to read request body from {}: {}", client_addr, e);
                return Ok(plain_text(
                    StatusCode::BAD_REQUEST,
                    "Failed to read request body",
                ));
            }
        };

        let environment = self
            .store
            .environment(&self.environment_id)
            .unwrap_or_else(|| Arc::clone(&self.started_with));

        let mut exchange = Exchange::new(parts, body, client_addr);
        Ok(self.run(&mut exchange, &environment).await)
    }

    async fn run(&self, exchange: &mut Exchange, environment: &Environment) -> HttpResponse {
        for stage in &self.stages {
            if let StageOutcome::Handled(response) = stage.process(exchange, environment).await {
                debug!(
                    "{} {} handled by {} with {}",
                    exchange.parts.method,
                    exchange.parts.uri.path(),
                    stage.name(),
                    response.status()
                );
                return response;
            }
        }

        debug!(
            "No handler for {} {}",
            exchange.parts.method,
            exchange.parts.uri.path()
        );
        plain_text(
            StatusCode::NOT_FOUND,
            format!(
                "Cannot {} {}",
                exchange.parts.method,
                exchange.parts.uri.path()
            ),
        )
    }
}

/// Build a plain-text response.
pub fn plain_text(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error"))))
}
