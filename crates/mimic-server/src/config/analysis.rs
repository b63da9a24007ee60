//! Collision analysis for routes and environments.
//!
//! Two routes collide when they share a method and a normalized endpoint; both
//! members of a colliding pair record the other's index in `duplicates`, which
//! keeps them out of the routing table. Environments sharing a port are
//! annotated the same way, but that annotation is informational only.

use super::{Environment, Route};

/// Normalize an endpoint for collision checks: surrounding slashes and case
/// are not significant.
pub fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_matches('/').to_lowercase()
}

/// Duplicate indices for every route, parallel to `routes`.
pub fn route_duplicates(routes: &[Route]) -> Vec<Vec<usize>> {
    let keys: Vec<_> = routes
        .iter()
        .map(|route| (route.method, normalize_endpoint(&route.endpoint)))
        .collect();

    keys.iter()
        .enumerate()
        .map(|(index, key)| {
            keys.iter()
                .enumerate()
                .filter(|(other, other_key)| *other != index && *other_key == key)
                .map(|(other, _)| other)
                .collect()
        })
        .collect()
}

/// Recompute `duplicates` on every route of the environment.
pub fn annotate_route_duplicates(environment: &mut Environment) {
    let duplicates = route_duplicates(&environment.routes);
    for (route, found) in environment.routes.iter_mut().zip(duplicates) {
        route.duplicates = found;
    }
}

/// Duplicate indices for every environment bound to a shared port.
pub fn port_duplicates(environments: &[Environment]) -> Vec<Vec<usize>> {
    environments
        .iter()
        .enumerate()
        .map(|(index, env)| {
            environments
                .iter()
                .enumerate()
                .filter(|(other, other_env)| {
                    *other != index && env.port != 0 && other_env.port == env.port
                })
                .map(|(other, _)| other)
                .collect()
        })
        .collect()
}

pub fn annotate_port_duplicates(environments: &mut [Environment]) {
    let duplicates = port_duplicates(environments);
    for (env, found) in environments.iter_mut().zip(duplicates) {
        env.duplicates = found;
    }
}
