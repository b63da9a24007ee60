//! Route path patterns and the per-environment routing table.
//!
//! Endpoints use the path syntax of common HTTP routers:
//!
//! - `/users/:id` - named parameter, one segment
//! - `/users/:id?` - optional named parameter
//! - `/users/:id(\d+)` - named parameter constrained by a regex
//! - `/files/*` - wildcard, any remainder (captured as param `0`)
//! - `/ab?cd`, `/ab+cd`, `/(a|b)/x` - regex operators pass through
//!
//! Matching is case-insensitive and tolerates a trailing slash. A pattern whose
//! regex does not compile is reported as a [`PatternError`] and the route is
//! left out of the table.

use crate::config::{Environment, Method, Route};
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid route path '{pattern}': {source}")]
pub struct PatternError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Full request path for a route: prefix + `/` + endpoint, spaces escaped.
pub fn route_path(prefix: &str, endpoint: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let path = if prefix.is_empty() {
        format!("/{endpoint}")
    } else {
        format!("/{prefix}/{endpoint}")
    };
    path.replace(' ', "%20")
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    path: String,
    regex: Regex,
}

impl PathPattern {
    pub fn compile(path: &str) -> Result<Self, PatternError> {
        let source = translate(path);
        let regex = Regex::new(&source).map_err(|source| PatternError {
            pattern: path.to_string(),
            source,
        })?;
        Ok(Self {
            path: path.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Parameters captured from `path`, or `None` when it does not match.
    /// Unnamed captures are numbered from `0`.
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        let mut params = HashMap::new();
        let mut unnamed = 0usize;
        for (index, name) in self.regex.capture_names().enumerate().skip(1) {
            let key = match name {
                Some(name) => name.to_string(),
                None => {
                    let key = unnamed.to_string();
                    unnamed += 1;
                    key
                }
            };
            if let Some(value) = caps.get(index) {
                let decoded = urlencoding::decode(value.as_str())
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.as_str().to_string());
                params.insert(key, decoded);
            }
        }
        Some(params)
    }
}

fn is_param_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Translate router path syntax into an anchored regex.
fn translate(path: &str) -> String {
    let chars: Vec<char> = path.chars().collect();
    let mut out = String::from("(?i)^");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ':' if chars.get(i + 1).is_some_and(|n| is_param_char(*n)) => {
                let start = i + 1;
                i = start;
                while i < chars.len() && is_param_char(chars[i]) {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();

                let mut body = String::from("[^/]+?");
                if chars.get(i) == Some(&'(') {
                    let (group, next) = balanced_group(&chars, i);
                    body = group;
                    i = next;
                }

                let optional = chars.get(i) == Some(&'?');
                if optional {
                    i += 1;
                    // an optional parameter also absorbs its leading slash
                    if out.ends_with('/') {
                        out.pop();
                        out.push_str(&format!("(?:/(?P<{name}>{body}))?"));
                    } else {
                        out.push_str(&format!("(?P<{name}>{body})?"));
                    }
                } else {
                    out.push_str(&format!("(?P<{name}>{body})"));
                }
                continue;
            }
            '*' => out.push_str("(.*)"),
            '(' | ')' | '?' | '+' | '|' | '[' | ']' => out.push(c),
            '\\' => {
                // keep explicit escapes as written
                out.push(c);
                if let Some(next) = chars.get(i + 1) {
                    out.push(*next);
                    i += 1;
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    out.push_str("/?$");
    out
}

/// The regex text inside a parenthesised group starting at `open`, and the
/// index after its closing paren. An unbalanced group consumes the rest of the
/// pattern so regex compilation reports it.
fn balanced_group(chars: &[char], open: usize) -> (String, usize) {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let inner: String = chars[open + 1..i].iter().collect();
                    return (inner, i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    let rest: String = chars[open..].iter().collect();
    (rest, chars.len())
}

/// A route that made it into the routing table.
#[derive(Debug, Clone)]
pub struct RegisteredRoute {
    pub route_uuid: String,
    pub method: Method,
    pub pattern: PathPattern,
    /// Copy taken at start, used if the route disappears from the live
    /// configuration.
    pub snapshot: Route,
}

/// Routing table built once per start; first registered match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RegisteredRoute>,
}

impl RouteTable {
    /// Register every non-duplicated route of `environment`. Routes with an
    /// invalid pattern are skipped and returned as errors.
    pub fn build(environment: &Environment) -> (Self, Vec<PatternError>) {
        let mut routes = Vec::new();
        let mut errors = Vec::new();

        for route in &environment.routes {
            if route.is_duplicated() {
                continue;
            }
            let path = route_path(&environment.endpoint_prefix, &route.endpoint);
            match PathPattern::compile(&path) {
                Ok(pattern) => routes.push(RegisteredRoute {
                    route_uuid: route.uuid.clone(),
                    method: route.method,
                    pattern,
                    snapshot: route.clone(),
                }),
                Err(err) => errors.push(err),
            }
        }

        (Self { routes }, errors)
    }

    pub fn find(
        &self,
        method: &hyper::Method,
        path: &str,
    ) -> Option<(&RegisteredRoute, HashMap<String, String>)> {
        self.routes
            .iter()
            .filter(|route| route.method.matches(method))
            .find_map(|route| route.pattern.captures(path).map(|params| (route, params)))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
