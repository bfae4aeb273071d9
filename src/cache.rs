//! Bounded detection cache.
//!
//! Keys are `(detector, blake3(text))`, so a re-submitted document (or a
//! chunk shared by two runs) does not hit remote services twice. Entries
//! expire after a TTL measured by an injected [`Clock`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::detect::EntitySpan;

/// Time source for expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.lock().map_or_else(|e| *e.into_inner(), |now| *now)
    }
}

type CacheKey = (String, [u8; 32]);

struct CacheEntry {
    spans: Vec<EntitySpan>,
    inserted: Instant,
}

/// FIFO-evicting cache of detector results.
pub struct DetectionCache {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl DetectionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            ttl,
            clock,
        }
    }

    fn key(detector: &str, text: &str) -> CacheKey {
        (detector.to_string(), *blake3::hash(text.as_bytes()).as_bytes())
    }

    /// Cached spans, if present and fresh. Expired entries are removed.
    pub fn get(&mut self, detector: &str, text: &str) -> Option<Vec<EntitySpan>> {
        let key = Self::key(detector, text);
        let now = self.clock.now();
        let fresh = self
            .entries
            .get(&key)
            .map(|entry| now.duration_since(entry.inserted) < self.ttl)?;

        if fresh {
            self.entries.get(&key).map(|entry| entry.spans.clone())
        } else {
            self.entries.remove(&key);
            self.order.retain(|k| k != &key);
            None
        }
    }

    pub fn put(&mut self, detector: &str, text: &str, spans: Vec<EntitySpan>) {
        if self.capacity == 0 {
            return;
        }
        let key = Self::key(detector, text);
        let entry = CacheEntry {
            spans,
            inserted: self.clock.now(),
        };

        if self.entries.insert(key.clone(), entry).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
