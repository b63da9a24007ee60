//! Bounded, per-environment request logs.
//!
//! Every inbound request is captured as a [`LogEntry`] and inserted at the
//! head of its environment's [`RequestLog`]. Once the log holds `capacity`
//! entries the oldest one is evicted from the tail.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of an inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Sequence number within the log; not part of the persisted format.
    #[serde(skip)]
    pub id: u64,
    pub method: String,
    pub path: String,
    /// Lowercased header names; repeated headers are joined with `, `.
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub proxied: bool,
}

impl LogEntry {
    pub fn capture(parts: &hyper::http::request::Parts, body: &Bytes) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &parts.headers {
            let value = String::from_utf8_lossy(value.as_bytes()).to_string();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        Self {
            id: 0,
            method: parts.method.as_str().to_string(),
            path: parts.uri.path().to_string(),
            headers,
            body: String::from_utf8_lossy(body).to_string(),
            timestamp: Utc::now(),
            proxied: false,
        }
    }
}

/// Ring buffer of the most recent requests, newest first.
#[derive(Debug)]
pub struct RequestLog {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
    next_id: AtomicU64,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert at the head, evicting from the tail when full. Returns the id
    /// assigned to the entry.
    pub fn record(&self, mut entry: LogEntry) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            return id;
        }
        entry.id = id;

        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_back();
        }
        entries.push_front(entry);
        id
    }

    /// Flag an entry as forwarded upstream. No-op if it was already evicted.
    pub fn mark_proxied(&self, id: u64) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) {
            entry.proxied = true;
        }
    }

    /// All entries, newest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<LogEntry> {
        self.entries.lock().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Request logs keyed by environment identifier.
#[derive(Debug)]
pub struct LogRegistry {
    capacity: usize,
    logs: RwLock<HashMap<String, Arc<RequestLog>>>,
}

impl LogRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// The log for `environment_id`, created on first use.
    pub fn log_for(&self, environment_id: &str) -> Arc<RequestLog> {
        if let Some(log) = self.logs.read().get(environment_id) {
            return Arc::clone(log);
        }
        let mut logs = self.logs.write();
        Arc::clone(
            logs.entry(environment_id.to_string())
                .or_insert_with(|| Arc::new(RequestLog::new(self.capacity))),
        )
    }

    pub fn get(&self, environment_id: &str) -> Option<Arc<RequestLog>> {
        self.logs.read().get(environment_id).cloned()
    }

    /// Drop the log entirely.
    pub fn remove(&self, environment_id: &str) -> Option<Arc<RequestLog>> {
        self.logs.write().remove(environment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> LogEntry {
        let (parts, _) = hyper::Request::builder()
            .method("POST")
            .uri(path)
            .header("x-tag", "a")
            .header("x-tag", "b")
            .body(())
            .unwrap()
            .into_parts();
        LogEntry::capture(&parts, &Bytes::from_static(b"payload"))
    }

    #[test]
    fn test_capture_fields() {
        let captured = entry("/orders?id=1");
        assert_eq!(captured.method, "POST");
        assert_eq!(captured.path, "/orders");
        assert_eq!(captured.headers["x-tag"], "a, b");
        assert_eq!(captured.body, "payload");
        assert!(!captured.proxied);
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let log = RequestLog::new(3);
        for i in 0..4 {
            log.record(entry(&format!("/r{i}")));
        }
        assert_eq!(log.len(), 3);
        let paths: Vec<_> = log.entries().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["/r3", "/r2", "/r1"]);
        assert_eq!(log.latest().unwrap().path, "/r3");
    }

    #[test]
    fn test_mark_proxied() {
        let log = RequestLog::new(2);
        let first = log.record(entry("/a"));
        let second = log.record(entry("/b"));
        log.mark_proxied(second);
        let entries = log.entries();
        assert!(entries[0].proxied);
        assert!(!entries[1].proxied);
        assert_ne!(first, second);
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let log = RequestLog::new(0);
        log.record(entry("/a"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let log = Arc::new(RequestLog::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.record(entry(&format!("/t{t}/{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 400);
    }

    #[test]
    fn test_persisted_format_field_set() {
        let json = serde_json::to_value(entry("/a")).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["body", "headers", "method", "path", "proxied", "timestamp"]
        );
    }

    #[test]
    fn test_registry_lifecycle() {
        let registry = LogRegistry::new(5);
        let log = registry.log_for("env");
        log.record(entry("/a"));
        assert_eq!(registry.log_for("env").len(), 1);
        registry.remove("env");
        assert!(registry.get("env").is_none());
        assert_eq!(registry.log_for("env").capacity(), 5);
    }
}
