use super::{plain_text, Exchange, HttpResponse, Stage, StageOutcome};
use crate::config::Environment;
use crate::request_log::RequestLog;
use crate::server::HttpClient;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use hyper::{HeaderMap, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};
use url::Url;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// `true` for absolute http(s) URLs with a host.
pub fn is_valid_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

/// Forwards anything no earlier stage handled to the environment's upstream.
///
/// The request body was read once up front and is forwarded byte for byte.
pub struct ProxyFallback {
    target: Url,
    client: HttpClient,
    log: Arc<RequestLog>,
    timeout: Duration,
}

impl ProxyFallback {
    /// `None` unless proxy mode is on and the target is a valid URL.
    pub fn new(
        environment: &Environment,
        client: HttpClient,
        log: Arc<RequestLog>,
        timeout: Duration,
    ) -> Option<Self> {
        if !environment.proxy_mode {
            return None;
        }
        if !is_valid_url(&environment.proxy_host) {
            debug!(
                "Proxy target {:?} for {} is not a valid URL, proxy disabled",
                environment.proxy_host,
                environment.display_name()
            );
            return None;
        }
        let target = Url::parse(&environment.proxy_host).ok()?;
        Some(Self {
            target,
            client,
            log,
            timeout,
        })
    }

    fn upstream_uri(&self, exchange: &Exchange) -> String {
        let base = self.target.as_str().trim_end_matches('/');
        let path_and_query = exchange
            .parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{base}{path_and_query}")
    }

    /// Host header for the upstream, port included when explicit.
    fn upstream_host(&self) -> Option<String> {
        let host = self.target.host_str()?;
        Some(match self.target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    fn build_request(&self, exchange: &Exchange) -> Result<Request<Full<Bytes>>, hyper::http::Error> {
        let mut headers = HeaderMap::new();
        for (name, value) in &exchange.parts.headers {
            if is_hop_by_hop(name) || *name == HOST || *name == CONTENT_LENGTH {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        if let Some(host) = self.upstream_host() {
            if let Ok(value) = HeaderValue::from_str(&host) {
                headers.insert(HOST, value);
            }
        }
        if !exchange.body.is_empty() || exchange.parts.headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(exchange.body.len()));
        }

        let mut request = Request::builder()
            .method(exchange.parts.method.clone())
            .uri(self.upstream_uri(exchange))
            .body(Full::new(exchange.body.clone()))?;
        *request.headers_mut() = headers;
        Ok(request)
    }

    /// Relay `request` upstream. The timeout covers the whole exchange, body
    /// included.
    async fn forward(&self, request: Request<Full<Bytes>>) -> HttpResponse {
        let deadline = Instant::now() + self.timeout;
        let upstream = match timeout_at(deadline, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Proxy request to {} failed: {}", self.target, e);
                return plain_text(StatusCode::BAD_GATEWAY, format!("Proxy error: {e}"));
            }
            Err(_) => return self.timed_out(),
        };

        let (parts, body) = upstream.into_parts();
        let body = match timeout_at(deadline, body.collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) => {
                warn!("Failed to read upstream response from {}: {}", self.target, e);
                return plain_text(StatusCode::BAD_GATEWAY, format!("Proxy error: {e}"));
            }
            Err(_) => return self.timed_out(),
        };

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = parts.status;
        for (name, value) in &parts.headers {
            if !is_hop_by_hop(name) {
                response.headers_mut().append(name.clone(), value.clone());
            }
        }
        response
    }

    fn timed_out(&self) -> HttpResponse {
        warn!(
            "Proxy request to {} timed out after {:?}",
            self.target, self.timeout
        );
        plain_text(StatusCode::GATEWAY_TIMEOUT, "Proxy timeout")
    }
}

#[async_trait]
impl Stage for ProxyFallback {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn process(&self, exchange: &mut Exchange, environment: &Environment) -> StageOutcome {
        if let Some(id) = exchange.log_id {
            self.log.mark_proxied(id);
        }

        let request = match self.build_request(exchange) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    "Cannot build proxy request for {}: {}",
                    environment.display_name(),
                    e
                );
                return StageOutcome::Handled(plain_text(
                    StatusCode::BAD_GATEWAY,
                    format!("Proxy error: {e}"),
                ));
            }
        };

        debug!(
            "Proxying {} {} to {}",
            exchange.parts.method,
            exchange.parts.uri.path(),
            request.uri()
        );
        StageOutcome::Handled(self.forward(request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::create_http_client;
    use hyper::Method;
    use std::net::SocketAddr;

    fn exchange(method: Method, uri: &str, body: &str) -> Exchange {
        let (parts, _) = Request::builder()
            .method(method)
            .uri(uri)
            .header(HOST, "localhost:3000")
            .header("connection", "keep-alive")
            .header("x-custom", "kept")
            .body(())
            .unwrap()
            .into_parts();
        let addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        Exchange::new(parts, Bytes::from(body.to_string()), addr)
    }

    fn proxy_env(host: &str) -> Environment {
        Environment {
            proxy_mode: true,
            proxy_host: host.to_string(),
            ..Default::default()
        }
    }

    fn fallback(host: &str) -> Option<ProxyFallback> {
        ProxyFallback::new(
            &proxy_env(host),
            create_http_client().unwrap(),
            Arc::new(RequestLog::new(10)),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_is_valid_url() {
        assert!(is_valid_url("http://localhost:3001"));
        assert!(is_valid_url("https://api.example.com/v1"));
        assert!(!is_valid_url("localhost:3001"));
        assert!(!is_valid_url("ftp://example.com"));
        assert!(!is_valid_url(""));
    }

    #[tokio::test]
    async fn test_invalid_target_disables_proxy() {
        assert!(fallback("not a url").is_none());

        let disabled = Environment {
            proxy_mode: false,
            proxy_host: "http://localhost:1".to_string(),
            ..Default::default()
        };
        assert!(ProxyFallback::new(
            &disabled,
            create_http_client().unwrap(),
            Arc::new(RequestLog::new(10)),
            Duration::from_secs(1),
        )
        .is_none());
    }

    #[tokio::test]
    async fn test_upstream_request_shape() {
        let proxy = fallback("http://upstream.test:8080/").unwrap();
        let exchange = exchange(Method::POST, "/users/1?expand=true", r#"{"a":1}"#);
        let request = proxy.build_request(&exchange).unwrap();

        assert_eq!(
            request.uri().to_string(),
            "http://upstream.test:8080/users/1?expand=true"
        );
        assert_eq!(request.headers()[HOST], "upstream.test:8080");
        assert_eq!(request.headers()[CONTENT_LENGTH], "7");
        assert_eq!(request.headers()["x-custom"], "kept");
        assert!(request.headers().get("connection").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let proxy = fallback("http://127.0.0.1:1").unwrap();
        let mut exchange = exchange(Method::GET, "/anything", "");
        let env = proxy_env("http://127.0.0.1:1");
        match proxy.process(&mut exchange, &env).await {
            StageOutcome::Handled(response) => {
                assert_eq!(response.status(), StatusCode::BAD_GATEWAY)
            }
            StageOutcome::Next => panic!("proxy must handle the request"),
        }
    }

    #[tokio::test]
    async fn test_stalled_upstream_body_times_out() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let upstream = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                .await
                .unwrap();
            // headers sent, the rest of the body never arrives
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let target = format!("http://{addr}");
        let proxy = ProxyFallback::new(
            &proxy_env(&target),
            create_http_client().unwrap(),
            Arc::new(RequestLog::new(10)),
            Duration::from_millis(300),
        )
        .unwrap();
        let mut exchange = exchange(Method::GET, "/slow", "");

        let started = std::time::Instant::now();
        match proxy.process(&mut exchange, &proxy_env(&target)).await {
            StageOutcome::Handled(response) => {
                assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT)
            }
            StageOutcome::Next => panic!("proxy must handle the request"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        upstream.abort();
    }
}
