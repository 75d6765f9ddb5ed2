//! In-process coordination store
//!
//! Lets several ranks running as threads of one process rendezvous through
//! shared memory instead of the network.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, instrument};
use xccl_core::{Error, Result};

use crate::backend::{add_counter, parse_counter, Store};

/// In-memory store with blocking reads
#[derive(Debug)]
pub struct MemoryStore {
    /// Key space
    data: Mutex<HashMap<String, Bytes>>,

    /// Signalled whenever a key is written
    updated: Condvar,

    /// Timeout for blocking reads
    timeout: Duration,
}

impl MemoryStore {
    /// Create an empty store with the given read timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            updated: Condvar::new(),
            timeout,
        }
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// All keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl Store for MemoryStore {
    #[instrument(skip(self, value), fields(store = "memory", size = value.len()))]
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.data
            .lock()
            .insert(key.to_string(), Bytes::copy_from_slice(value));
        self.updated.notify_all();
        Ok(())
    }

    #[instrument(skip(self), fields(store = "memory"))]
    fn get(&self, key: &str) -> Result<Bytes> {
        let deadline = Instant::now() + self.timeout;
        let mut data = self.data.lock();

        loop {
            if let Some(value) = data.get(key) {
                return Ok(value.clone());
            }
            if self.updated.wait_until(&mut data, deadline).timed_out() {
                // One last look: the write may have raced the deadline
                return data.get(key).cloned().ok_or_else(|| {
                    debug!(key, "Timed out waiting for key");
                    Error::StoreTimeout {
                        key: key.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                });
            }
        }
    }

    fn check(&self, keys: &[&str]) -> Result<bool> {
        let data = self.data.lock();
        Ok(keys.iter().all(|key| data.contains_key(*key)))
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut data = self.data.lock();
        let current = match data.get(key) {
            Some(value) => parse_counter(key, value)?,
            None => 0,
        };
        let next = add_counter(key, current, delta)?;
        data.insert(key.to_string(), Bytes::from(next.to_string()));
        drop(data);

        self.updated.notify_all();
        Ok(next)
    }

    fn delete_key(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().remove(key).is_some())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
