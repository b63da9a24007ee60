use super::{latency, plain_text, Exchange, HttpResponse, Stage, StageOutcome};
use crate::alerts::{Alert, AlertSink};
use crate::config::{Environment, Route};
use crate::error::ResponseError;
use crate::headers::apply_layered_headers;
use crate::routing::RouteTable;
use crate::template::{renderer, RequestContext};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use hyper::{HeaderMap, Response, StatusCode};
use mime_guess::Mime;
use serde::de::IgnoredAny;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Content types whose files are rendered as templates before sending.
const TEMPLATABLE_TYPES: &[&str] = &[
    "application/json",
    "text/html",
    "text/css",
    "text/csv",
    "application/javascript",
    "text/javascript",
    "application/typescript",
    "text/plain",
    "application/xhtml+xml",
    "application/xml",
    "text/xml",
];

pub fn is_templatable(essence: &str) -> bool {
    TEMPLATABLE_TYPES
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(essence))
}

/// Answers requests matching a user route.
pub struct RouteDispatcher {
    table: RouteTable,
    alerts: Arc<dyn AlertSink>,
}

impl RouteDispatcher {
    pub fn new(table: RouteTable, alerts: Arc<dyn AlertSink>) -> Self {
        Self { table, alerts }
    }
}

#[async_trait]
impl Stage for RouteDispatcher {
    fn name(&self) -> &'static str {
        "dispatcher"
    }

    async fn process(&self, exchange: &mut Exchange, environment: &Environment) -> StageOutcome {
        let Some((registered, params)) = self
            .table
            .find(&exchange.parts.method, exchange.parts.uri.path())
        else {
            return StageOutcome::Next;
        };

        // Route data is read live; the start-time copy covers deleted routes.
        let route = environment
            .route(&registered.route_uuid)
            .unwrap_or(&registered.snapshot);
        debug!(
            "Matched {} {} to route {} ({})",
            exchange.parts.method,
            exchange.parts.uri.path(),
            route.uuid,
            registered.pattern.as_str()
        );

        latency::wait(route.latency).await;

        let request = exchange.request_context(params);
        match build_route_response(environment, route, &request).await {
            Ok(response) => StageOutcome::Handled(response),
            Err(err) => {
                warn!(
                    "Route {} in {} failed: {}",
                    route.uuid,
                    environment.display_name(),
                    err
                );
                self.alerts.alert(Alert::new(
                    err.alert_kind(),
                    &environment.uuid,
                    err.to_string(),
                ));
                StageOutcome::Handled(plain_text(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    err.to_string(),
                ))
            }
        }
    }
}

/// Build the response for `route`: status, layered headers, then the file or
/// inline body.
pub(crate) async fn build_route_response(
    environment: &Environment,
    route: &Route,
    request: &RequestContext,
) -> Result<HttpResponse, ResponseError> {
    let mut headers = HeaderMap::new();
    apply_layered_headers(&mut headers, &environment.headers, &route.headers, request)?;

    let status = StatusCode::from_u16(route.status_code).unwrap_or_else(|_| {
        warn!(
            "Route {} has invalid status code {}, using 200",
            route.uuid, route.status_code
        );
        StatusCode::OK
    });

    let explicit_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body = match route.file_path() {
        Some(file_path) => {
            file_body(route, file_path, explicit_type.is_some(), &mut headers, request).await?
        }
        None => inline_body(route, explicit_type.as_deref(), request)?,
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

async fn file_body(
    route: &Route,
    path_template: &str,
    has_content_type: bool,
    headers: &mut HeaderMap,
    request: &RequestContext,
) -> Result<Bytes, ResponseError> {
    let path = renderer().render(path_template, request)?;
    let data = tokio::fs::read(&path).await.map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ResponseError::FileNotFound { path: path.clone() }
        } else {
            ResponseError::FileRead {
                path: path.clone(),
                source,
            }
        }
    })?;

    let file_type = mime_guess::from_path(&path).first_or_octet_stream();
    if !has_content_type {
        if let Ok(value) = HeaderValue::from_str(file_type.as_ref()) {
            headers.insert(CONTENT_TYPE, value);
        }
    }

    if !route.send_file_as_body {
        let file_name = Path::new(&path).file_name().and_then(|name| name.to_str());
        if let Some(name) = file_name {
            if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")) {
                headers.insert(CONTENT_DISPOSITION, value);
            }
        }
    }

    if is_templatable(file_type.essence_str()) {
        let text = String::from_utf8_lossy(&data);
        Ok(Bytes::from(renderer().render(&text, request)?))
    } else {
        Ok(Bytes::from(data))
    }
}

fn inline_body(
    route: &Route,
    content_type: Option<&str>,
    request: &RequestContext,
) -> Result<Bytes, ResponseError> {
    let rendered = renderer().render(&route.body, request)?;
    let Some(content_type) = content_type else {
        return Ok(Bytes::from(rendered));
    };

    let mime: Mime = content_type
        .parse()
        .map_err(|_| ResponseError::InvalidContentType(content_type.to_string()))?;

    // An empty JSON body is sent as is.
    if mime.essence_str() == "application/json" && !rendered.trim().is_empty() {
        serde_json::from_str::<IgnoredAny>(&rendered)?;
    }
    Ok(Bytes::from(rendered))
}
