//! Last-good caching for collector observations.
//!
//! When `--exporter.use-cache` is set, each collector keeps a private copy of
//! its most recent successfully-parsed records and serves that copy when the
//! current invocation fails. The cache is process-local, never time-bounded,
//! and only overwritten by the next successful parse.

use std::collections::HashMap;
use std::sync::Mutex;

/// Most recent successful parse for a single-shot collector.
#[derive(Debug, Default)]
pub struct LastGood<T> {
    inner: Mutex<Option<T>>,
}

impl<T: Clone> LastGood<T> {
    pub fn new() -> Self
    where
        T: Default,
    {
        Self::default()
    }

    /// Stores a deep copy of a successful parse.
    pub fn store(&self, value: &T) {
        *self.inner.lock().expect("cache poisoned") = Some(value.clone());
    }

    pub fn get(&self) -> Option<T> {
        self.inner.lock().expect("cache poisoned").clone()
    }
}

/// Most recent successful parse per fan-out key (filesystem or quota kind).
#[derive(Debug, Default)]
pub struct LastGoodMap<T> {
    inner: Mutex<HashMap<String, T>>,
}

impl<T: Clone> LastGoodMap<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self, key: &str, value: &T) {
        self.inner
            .lock()
            .expect("cache poisoned")
            .insert(key.to_string(), value.clone());
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.lock().expect("cache poisoned").get(key).cloned()
    }
}
