//! Coordination store trait definition
//!
//! Defines the blocking interface that all coordination stores implement.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use xccl_core::Result;

/// Shared handle to a coordination store
pub type StoreHandle = Arc<dyn Store>;

/// Blocking key-value store shared by every rank of a group
///
/// Implementors guarantee that a completed `set` is visible to any later
/// `get` of the same key from any rank.
pub trait Store: Send + Sync {
    /// Store a value under the given key, replacing any previous value
    ///
    /// # Errors
    /// Returns error if the store cannot be reached
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read the value under the given key
    ///
    /// Blocks until the key is present or the store timeout elapses.
    ///
    /// # Errors
    /// Returns `Error::StoreTimeout` if the key does not appear in time
    fn get(&self, key: &str) -> Result<Bytes>;

    /// Check whether every key is present, without blocking
    fn check(&self, keys: &[&str]) -> Result<bool>;

    /// Atomically add `delta` to the integer stored under `key`
    ///
    /// Missing keys start at zero. Values are stored as decimal text so
    /// they can also be read back with `get`.
    ///
    /// # Returns
    /// The value after the addition
    fn add(&self, key: &str, delta: i64) -> Result<i64>;

    /// Remove a key
    ///
    /// # Returns
    /// `true` if the key existed
    fn delete_key(&self, key: &str) -> Result<bool>;

    /// Timeout applied to blocking operations
    fn timeout(&self) -> Duration;
}

/// Parse a counter value written by `add`
pub(crate) fn parse_counter(key: &str, value: &[u8]) -> Result<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .ok_or_else(|| xccl_core::Error::Store {
            message: format!("value under key '{}' is not an integer counter", key),
        })
}

/// Apply `delta` to a counter, failing instead of wrapping
pub(crate) fn add_counter(key: &str, current: i64, delta: i64) -> Result<i64> {
    current
        .checked_add(delta)
        .ok_or_else(|| xccl_core::Error::Store {
            message: format!(
                "counter under key '{}' overflows: {} + {}",
                key, current, delta
            ),
        })
}
