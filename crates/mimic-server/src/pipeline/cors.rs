use super::{Exchange, HttpResponse, Stage, StageOutcome};
use crate::alerts::{Alert, AlertKind, AlertSink};
use crate::config::Environment;
use crate::headers::apply_headers;
use crate::template::TemplateError;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use hyper::{HeaderMap, Method, Response};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const ALLOW_METHODS: &str = "GET,POST,PUT,PATCH,DELETE,HEAD,OPTIONS";
const ALLOW_HEADERS: &str =
    "Content-Type, Origin, Accept, Authorization, Content-Length, X-Requested-With";

/// Answers every unrouted `OPTIONS` request with 200.
///
/// Baseline CORS headers go first, then the environment headers as they are
/// at request time, so edits show up without a restart.
pub struct CorsResponder {
    alerts: Arc<dyn AlertSink>,
}

impl CorsResponder {
    pub fn new(alerts: Arc<dyn AlertSink>) -> Self {
        Self { alerts }
    }
}

fn baseline_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers
}

#[async_trait]
impl Stage for CorsResponder {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn process(&self, exchange: &mut Exchange, environment: &Environment) -> StageOutcome {
        if exchange.parts.method != Method::OPTIONS {
            return StageOutcome::Next;
        }

        let mut headers = baseline_headers();
        let request = exchange.request_context(HashMap::new());
        if let Err(err) = apply_headers(&mut headers, &environment.headers, &request) {
            warn!(
                "Preflight headers for {} failed to render: {}",
                environment.display_name(),
                err
            );
            let kind = match err {
                TemplateError::MissingHelper { .. } => AlertKind::MissingHelper,
                _ => AlertKind::TemplateParseError,
            };
            self.alerts
                .alert(Alert::new(kind, &environment.uuid, err.to_string()));
        }

        let mut response: HttpResponse = Response::new(Full::new(Bytes::new()));
        *response.headers_mut() = headers;
        StageOutcome::Handled(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_headers() {
        let headers = baseline_headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], ALLOW_METHODS);
        assert!(headers[ACCESS_CONTROL_ALLOW_HEADERS]
            .to_str()
            .unwrap()
            .contains("Authorization"));
    }
}
