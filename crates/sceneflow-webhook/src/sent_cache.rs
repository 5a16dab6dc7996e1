//! Bounded record of delivered notifications.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use url::Url;

type Key = (String, String);

/// Remembers `(endpoint, run_id)` deliveries for a limited time.
///
/// Entries are inserted in time order, so both TTL and capacity eviction
/// remove from the front.
#[derive(Debug)]
pub struct SentCache {
    entries: HashMap<Key, Instant>,
    order: VecDeque<Key>,
    ttl: Duration,
    capacity: usize,
}

impl SentCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a delivery. Returns false if it was already recorded.
    pub fn try_insert(&mut self, endpoint: &str, run_id: &str) -> bool {
        self.try_insert_at(endpoint, run_id, Instant::now())
    }

    /// Forget a delivery, e.g. after the POST failed.
    pub fn remove(&mut self, endpoint: &str, run_id: &str) {
        let key = key(endpoint, run_id);
        if self.entries.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
        }
    }

    fn try_insert_at(&mut self, endpoint: &str, run_id: &str, now: Instant) -> bool {
        self.evict_expired(now);

        let key = key(endpoint, run_id);
        if self.entries.contains_key(&key) {
            return false;
        }

        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }

        self.entries.insert(key.clone(), now);
        self.order.push_back(key);
        true
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(front) = self.order.front() {
            let expired = self
                .entries
                .get(front)
                .map_or(true, |sent| now.duration_since(*sent) >= self.ttl);
            if !expired {
                break;
            }
            if let Some(k) = self.order.pop_front() {
                self.entries.remove(&k);
            }
        }
    }
}

fn key(endpoint: &str, run_id: &str) -> Key {
    (normalize_endpoint(endpoint), run_id.to_string())
}

/// Canonical form of an endpoint URL for comparisons.
///
/// Scheme and host are lowercased, default ports and fragments dropped, and
/// a trailing slash on a non-root path removed. Unparseable input is only
/// trimmed.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            let path = url.path().to_string();
            if path.len() > 1 && path.ends_with('/') {
                url.set_path(path.trim_end_matches('/'));
            }
            url.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}
