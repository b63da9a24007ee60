use crate::config::{Environment, Method};

/// The parts of an environment that are fixed for the lifetime of a running
/// instance. Any difference from the start-time value means the instance must
/// be restarted to pick up the edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingSignature {
    port: u16,
    https: bool,
    cors: bool,
    endpoint_prefix: String,
    proxy_target: Option<String>,
    routes: Vec<RouteKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RouteKey {
    uuid: String,
    method: Method,
    endpoint: String,
    duplicated: bool,
}

impl RoutingSignature {
    pub fn of(environment: &Environment) -> Self {
        Self {
            port: environment.port,
            https: environment.https,
            cors: environment.cors,
            endpoint_prefix: environment.endpoint_prefix.clone(),
            proxy_target: environment
                .proxy_mode
                .then(|| environment.proxy_host.clone()),
            routes: environment
                .routes
                .iter()
                .map(|route| RouteKey {
                    uuid: route.uuid.clone(),
                    method: route.method,
                    endpoint: route.endpoint.clone(),
                    duplicated: route.is_duplicated(),
                })
                .collect(),
        }
    }
}
