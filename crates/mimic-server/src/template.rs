//! Request-aware templating for response bodies, file paths and headers.
//!
//! Templates use Handlebars syntax. The request being answered is the render
//! context, and the helpers below read from it:
//!
//! - `{{body 'user.name' 'default'}}` - value at a dotted path in the JSON body
//! - `{{bodyRaw}}` - the raw request body
//! - `{{queryParam 'page' '1'}}`, `{{urlParam 'id'}}`, `{{header 'x-id'}}`,
//!   `{{cookie 'session'}}`
//! - `{{method}}`, `{{hostname}}`, `{{ip}}`
//! - `{{uuid}}`, `{{randomInt 1 10}}`, `{{randomFloat 0 1}}`, `{{boolean}}`,
//!   `{{oneOf 'a' 'b'}}`, `{{now '%Y-%m-%d'}}`
//! - `{{lowercase s}}`, `{{uppercase s}}`, `{{concat a b c}}`
//!
//! Built-in Handlebars helpers (`if`, `each`, `eq`, `lookup`, ...) are
//! available as well. Output is never HTML-escaped.
//!
//! # Example
//!
//! ```yaml
//! body: '{"id": "{{urlParam ''id''}}", "echo": {{body ''payload''}}}'
//! ```

use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderError,
    RenderErrorReason,
};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::OnceLock;
use thiserror::Error;

/// Shared renderer; helper registration happens once per process.
static RENDERER: OnceLock<TemplateRenderer> = OnceLock::new();

pub fn renderer() -> &'static TemplateRenderer {
    RENDERER.get_or_init(TemplateRenderer::new)
}

/// Failure produced while rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Template parse error: {0}")]
    Parse(String),
    #[error("Missing helper: {name}")]
    MissingHelper { name: String },
    #[error("Template render error: {0}")]
    Render(String),
}

impl From<RenderError> for TemplateError {
    fn from(err: RenderError) -> Self {
        match err.reason() {
            RenderErrorReason::TemplateError(parse_err) => {
                TemplateError::Parse(parse_err.to_string())
            }
            RenderErrorReason::HelperNotFound(name) => {
                TemplateError::MissingHelper { name: name.clone() }
            }
            _ => TemplateError::Render(err.to_string()),
        }
    }
}

/// Request data exposed to templates.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    /// Parameters captured by the matched route pattern.
    pub params: HashMap<String, String>,
    pub body_raw: String,
    /// Parsed body: JSON, or an object for url-encoded forms, else null.
    pub body: Value,
    pub hostname: String,
    pub ip: String,
}

impl RequestContext {
    /// Build a context from request components.
    pub fn new(
        method: &hyper::Method,
        uri: &hyper::Uri,
        headers: &hyper::HeaderMap,
        body: &[u8],
        client_addr: Option<SocketAddr>,
    ) -> Self {
        let header_map: HashMap<String, String> = headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_lowercase(), val.to_string()))
            })
            .collect();

        let cookies = header_map
            .get("cookie")
            .map(|raw| parse_cookies(raw))
            .unwrap_or_default();

        let hostname = header_map
            .get("host")
            .map(|host| strip_port(host).to_string())
            .or_else(|| uri.host().map(str::to_string))
            .unwrap_or_default();

        let body_raw = String::from_utf8_lossy(body).to_string();
        let content_type = header_map
            .get("content-type")
            .map(String::as_str)
            .unwrap_or_default();
        let parsed_body = parse_body(content_type, &body_raw);

        Self {
            method: method.as_str().to_string(),
            path: uri.path().to_string(),
            query: parse_query_string(uri.query()),
            headers: header_map,
            cookies,
            params: HashMap::new(),
            body_raw,
            body: parsed_body,
            hostname,
            ip: client_addr
                .map(|addr| addr.ip().to_string())
                .unwrap_or_default(),
        }
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }
}

/// Host part of a `Host` header value. Bracketed IPv6 literals keep their
/// brackets.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Parse a query string into a map, percent-decoding values.
pub fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                params.insert(decode_component(key), decode_component(value));
            } else if !pair.is_empty() {
                params.insert(decode_component(pair), String::new());
            }
        }
    }
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

fn parse_cookies(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn parse_body(content_type: &str, body: &str) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    if content_type.contains("application/x-www-form-urlencoded") {
        let fields = parse_query_string(Some(body))
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        return Value::Object(fields);
    }
    serde_json::from_str(body).unwrap_or(Value::Null)
}

/// Handlebars registry with the request helpers installed.
pub struct TemplateRenderer {
    registry: Handlebars<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);

        registry.register_helper("body", Box::new(body_helper));
        registry.register_helper("bodyRaw", Box::new(body_raw_helper));
        registry.register_helper("queryParam", Box::new(query_param_helper));
        registry.register_helper("urlParam", Box::new(url_param_helper));
        registry.register_helper("header", Box::new(header_helper));
        registry.register_helper("cookie", Box::new(cookie_helper));
        registry.register_helper("method", Box::new(method_helper));
        registry.register_helper("hostname", Box::new(hostname_helper));
        registry.register_helper("ip", Box::new(ip_helper));
        registry.register_helper("uuid", Box::new(uuid_helper));
        registry.register_helper("randomInt", Box::new(random_int_helper));
        registry.register_helper("randomFloat", Box::new(random_float_helper));
        registry.register_helper("boolean", Box::new(boolean_helper));
        registry.register_helper("oneOf", Box::new(one_of_helper));
        registry.register_helper("now", Box::new(now_helper));
        registry.register_helper("lowercase", Box::new(lowercase_helper));
        registry.register_helper("uppercase", Box::new(uppercase_helper));
        registry.register_helper("concat", Box::new(concat_helper));

        Self { registry }
    }

    /// Render `template` against the request.
    pub fn render(&self, template: &str, request: &RequestContext) -> Result<String, TemplateError> {
        if !has_template_expressions(template) {
            return Ok(template.to_string());
        }
        Ok(self.registry.render_template(template, request)?)
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a string contains template expressions
pub fn has_template_expressions(s: &str) -> bool {
    s.contains("{{")
}

// ===== Helpers =====

fn request_field<'a>(ctx: &'a Context, field: &str) -> &'a Value {
    ctx.data().get(field).unwrap_or(&Value::Null)
}

fn param_str<'a>(h: &'a Helper, index: usize) -> Option<&'a str> {
    h.param(index).and_then(|p| p.value().as_str())
}

fn param_string(h: &Helper, index: usize) -> Option<String> {
    h.param(index).map(|p| value_to_string(p.value()))
}

/// Strings render bare; everything else renders as JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Walk a dotted path (`a.b.0`) through objects and arrays.
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn write_lookup(h: &Helper, out: &mut dyn Output, found: Option<&Value>) -> HelperResult {
    match found.filter(|v| !v.is_null()) {
        Some(value) => out.write(&value_to_string(value))?,
        None => out.write(&param_string(h, 1).unwrap_or_default())?,
    }
    Ok(())
}

fn body_helper(
    h: &Helper,
    _: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let path = param_str(h, 0).unwrap_or_default();
    if path.is_empty() {
        let raw = request_field(ctx, "bodyRaw");
        out.write(raw.as_str().unwrap_or_default())?;
        return Ok(());
    }
    write_lookup(h, out, lookup_path(request_field(ctx, "body"), path))
}

fn body_raw_helper(
    h: &Helper,
    r: &Handlebars,
    ctx: &Context,
    rc: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    body_helper(h, r, ctx, rc, out)
}

fn map_lookup(
    h: &Helper,
    ctx: &Context,
    field: &str,
    out: &mut dyn Output,
    lowercase_key: bool,
) -> HelperResult {
    let map = request_field(ctx, field);
    match param_str(h, 0) {
        Some(name) => {
            let key = if lowercase_key {
                name.to_lowercase()
            } else {
                name.to_string()
            };
            write_lookup(h, out, map.get(&key))
        }
        None => {
            out.write(&map.to_string())?;
            Ok(())
        }
    }
}

fn query_param_helper(
    h: &Helper,
    _: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    map_lookup(h, ctx, "query", out, false)
}

fn url_param_helper(
    h: &Helper,
    _: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    map_lookup(h, ctx, "params", out, false)
}

fn header_helper(
    h: &Helper,
    _: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    map_lookup(h, ctx, "headers", out, true)
}

fn cookie_helper(
    h: &Helper,
    _: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    map_lookup(h, ctx, "cookies", out, false)
}

fn write_field(ctx: &Context, field: &str, out: &mut dyn Output) -> HelperResult {
    out.write(request_field(ctx, field).as_str().unwrap_or_default())?;
    Ok(())
}

fn method_helper(
    _: &Helper,
    _: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    write_field(ctx, "method", out)
}

fn hostname_helper(
    _: &Helper,
    _: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    write_field(ctx, "hostname", out)
}

fn ip_helper(
    _: &Helper,
    _: &Handlebars,
    ctx: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    write_field(ctx, "ip", out)
}

fn uuid_helper(
    _: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&uuid::Uuid::new_v4().to_string())?;
    Ok(())
}

fn number_param(h: &Helper, index: usize) -> Option<f64> {
    h.param(index).and_then(|p| match p.value() {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

fn range_error(helper: &str) -> RenderError {
    RenderErrorReason::Other(format!("{helper}: min must not exceed max")).into()
}

fn random_int_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let min = number_param(h, 0).unwrap_or(0.0) as i64;
    let max = number_param(h, 1).unwrap_or(100.0) as i64;
    if min > max {
        return Err(range_error("randomInt"));
    }
    let value = rand::thread_rng().gen_range(min..=max);
    out.write(&value.to_string())?;
    Ok(())
}

fn random_float_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let min = number_param(h, 0).unwrap_or(0.0);
    let max = number_param(h, 1).unwrap_or(1.0);
    if !min.is_finite() || !max.is_finite() || !(max - min).is_finite() {
        return Err(RenderErrorReason::Other(
            "randomFloat: bounds must be finite numbers".to_string(),
        )
        .into());
    }
    if min > max {
        return Err(range_error("randomFloat"));
    }
    let value = if min == max {
        min
    } else {
        rand::thread_rng().gen_range(min..max)
    };
    out.write(&value.to_string())?;
    Ok(())
}

fn boolean_helper(
    _: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value: bool = rand::thread_rng().gen();
    out.write(if value { "true" } else { "false" })?;
    Ok(())
}

fn one_of_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let choices: Vec<Value> = match h.params().as_slice() {
        [single] if single.value().is_array() => {
            single.value().as_array().cloned().unwrap_or_default()
        }
        params => params.iter().map(|p| p.value().clone()).collect(),
    };
    if choices.is_empty() {
        return Ok(());
    }
    let index = rand::thread_rng().gen_range(0..choices.len());
    out.write(&value_to_string(&choices[index]))?;
    Ok(())
}

fn now_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let now = chrono::Utc::now();
    let formatted = match param_str(h, 0) {
        Some(format) => {
            let mut rendered = String::new();
            use std::fmt::Write;
            write!(rendered, "{}", now.format(format))
                .map_err(|_| RenderErrorReason::Other(format!("now: invalid format '{format}'")))?;
            rendered
        }
        None => now.to_rfc3339(),
    };
    out.write(&formatted)?;
    Ok(())
}

fn lowercase_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&param_string(h, 0).unwrap_or_default().to_lowercase())?;
    Ok(())
}

fn uppercase_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&param_string(h, 0).unwrap_or_default().to_uppercase())?;
    Ok(())
}

fn concat_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let joined: String = h.params().iter().map(|p| value_to_string(p.value())).collect();
    out.write(&joined)?;
    Ok(())
}
