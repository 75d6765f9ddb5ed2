//! Key-namespacing store wrapper

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use xccl_core::Result;

use crate::Store;

/// Store that places every key under `"{prefix}/"` in an inner store
pub struct PrefixStore {
    prefix: String,
    inner: Arc<dyn Store>,
}

impl PrefixStore {
    /// Wrap `inner`, namespacing keys under `prefix`
    pub fn new(prefix: impl Into<String>, inner: Arc<dyn Store>) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    /// Key prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Underlying store
    pub fn inner(&self) -> &Arc<dyn Store> {
        &self.inner
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }
}

impl Store for PrefixStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.set(&self.prefixed(key), value)
    }

    fn get(&self, key: &str) -> Result<Bytes> {
        self.inner.get(&self.prefixed(key))
    }

    fn check(&self, keys: &[&str]) -> Result<bool> {
        let prefixed: Vec<String> = keys.iter().map(|key| self.prefixed(key)).collect();
        let refs: Vec<&str> = prefixed.iter().map(String::as_str).collect();
        self.inner.check(&refs)
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64> {
        self.inner.add(&self.prefixed(key), delta)
    }

    fn delete_key(&self, key: &str) -> Result<bool> {
        self.inner.delete_key(&self.prefixed(key))
    }

    fn timeout(&self) -> Duration {
        self.inner.timeout()
    }
}
