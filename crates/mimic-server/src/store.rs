//! Configuration store seam.
//!
//! The engine never owns environment definitions. It reads them through
//! [`ConfigStore`], which must reflect live edits, and reports its status
//! back through the same trait. [`MemoryStore`] is the in-process
//! implementation used by the binary and the tests.

use crate::config::analysis::{annotate_port_duplicates, annotate_route_duplicates};
use crate::config::Environment;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Status the engine reports for an environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub running: bool,
    pub need_restart: bool,
}

pub trait ConfigStore: Send + Sync {
    /// Current version of an environment. Each call returns one consistent
    /// snapshot.
    fn environment(&self, id: &str) -> Option<Arc<Environment>>;

    /// Receive a status update from the engine.
    fn post_status(&self, id: &str, status: EnvironmentStatus);
}

/// Ordered in-memory environment store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    environments: RwLock<Vec<Arc<Environment>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_environments(environments: Vec<Environment>) -> Self {
        let store = Self::new();
        for env in environments {
            store.upsert(env);
        }
        store
    }

    /// Insert or replace an environment, refreshing duplicate annotations.
    pub fn upsert(&self, mut environment: Environment) {
        annotate_route_duplicates(&mut environment);
        let mut environments = self.environments.write();
        match environments
            .iter()
            .position(|env| env.uuid == environment.uuid)
        {
            Some(index) => environments[index] = Arc::new(environment),
            None => environments.push(Arc::new(environment)),
        }
        reannotate_ports(&mut environments);
    }

    /// Edit an environment in place. Returns `false` if it does not exist.
    pub fn update<F>(&self, id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut Environment),
    {
        let mut environments = self.environments.write();
        let Some(slot) = environments.iter_mut().find(|env| env.uuid == id) else {
            return false;
        };
        let mut edited = (**slot).clone();
        edit(&mut edited);
        annotate_route_duplicates(&mut edited);
        *slot = Arc::new(edited);
        reannotate_ports(&mut environments);
        true
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Environment>> {
        let mut environments = self.environments.write();
        let index = environments.iter().position(|env| env.uuid == id)?;
        let removed = environments.remove(index);
        reannotate_ports(&mut environments);
        Some(removed)
    }

    pub fn ids(&self) -> Vec<String> {
        self.environments
            .read()
            .iter()
            .map(|env| env.uuid.clone())
            .collect()
    }

    pub fn status(&self, id: &str) -> Option<EnvironmentStatus> {
        self.environment(id).map(|env| EnvironmentStatus {
            running: env.running,
            need_restart: env.need_restart,
        })
    }
}

fn reannotate_ports(environments: &mut [Arc<Environment>]) {
    let mut plain: Vec<Environment> = environments.iter().map(|env| (**env).clone()).collect();
    annotate_port_duplicates(&mut plain);
    for (slot, annotated) in environments.iter_mut().zip(plain) {
        if slot.duplicates != annotated.duplicates {
            *slot = Arc::new(annotated);
        }
    }
}

impl ConfigStore for MemoryStore {
    fn environment(&self, id: &str) -> Option<Arc<Environment>> {
        self.environments
            .read()
            .iter()
            .find(|env| env.uuid == id)
            .cloned()
    }

    fn post_status(&self, id: &str, status: EnvironmentStatus) {
        self.update(id, |env| {
            env.running = status.running;
            env.need_restart = status.need_restart;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Route;

    fn env(id: &str, port: u16) -> Environment {
        Environment {
            uuid: id.to_string(),
            port,
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_and_lookup() {
        let store = MemoryStore::new();
        store.upsert(env("a", 3000));
        store.upsert(env("b", 3001));
        assert_eq!(store.ids(), vec!["a", "b"]);
        assert_eq!(store.environment("b").unwrap().port, 3001);
        assert!(store.environment("c").is_none());
    }

    #[test]
    fn test_snapshots_are_stable_across_edits() {
        let store = MemoryStore::from_environments(vec![env("a", 3000)]);
        let before = store.environment("a").unwrap();
        assert!(store.update("a", |e| e.latency = 250));
        assert_eq!(before.latency, 0);
        assert_eq!(store.environment("a").unwrap().latency, 250);
    }

    #[test]
    fn test_update_refreshes_route_duplicates() {
        let store = MemoryStore::from_environments(vec![env("a", 3000)]);
        store.update("a", |e| {
            e.routes.push(Route {
                endpoint: "x".to_string(),
                ..Default::default()
            });
            e.routes.push(Route {
                endpoint: "/x".to_string(),
                ..Default::default()
            });
        });
        let snapshot = store.environment("a").unwrap();
        assert_eq!(snapshot.routes[0].duplicates, vec![1]);
    }

    #[test]
    fn test_port_duplicates_follow_membership() {
        let store = MemoryStore::from_environments(vec![env("a", 3000), env("b", 3000)]);
        assert_eq!(store.environment("a").unwrap().duplicates, vec![1]);
        store.remove("b");
        assert!(store.environment("a").unwrap().duplicates.is_empty());
    }

    #[test]
    fn test_post_status() {
        let store = MemoryStore::from_environments(vec![env("a", 3000)]);
        store.post_status(
            "a",
            EnvironmentStatus {
                running: true,
                need_restart: false,
            },
        );
        assert!(store.status("a").unwrap().running);
        assert!(!store.update("missing", |_| {}));
    }
}
