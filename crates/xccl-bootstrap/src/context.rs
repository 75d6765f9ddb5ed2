//! Process-wide rendezvous state

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Prefix of every unique ID store key
pub const STORE_KEY_PREFIX: &str = "xccl_storekey_";

/// Store-key counter shared by every bootstrap in a process
///
/// Each unique ID exchange takes the next key, so repeated communicator
/// creation never reuses a key, whether from one bootstrap or several.
/// All ranks create communicators in the same order and therefore draw
/// the same key sequence.
#[derive(Debug, Default)]
pub struct RendezvousContext {
    counter: AtomicU64,
}

impl RendezvousContext {
    /// Create a context whose counter starts at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide context
    pub fn global() -> Arc<RendezvousContext> {
        static GLOBAL: OnceLock<Arc<RendezvousContext>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(RendezvousContext::new())))
    }

    /// Key prefix shared by all exchange keys
    pub fn store_key_prefix() -> &'static str {
        STORE_KEY_PREFIX
    }

    /// Take the next exchange key
    pub fn next_store_key(&self) -> String {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}{}", STORE_KEY_PREFIX, counter)
    }

    /// Counter value the next key will use
    pub fn store_key_counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Restart the key sequence at zero
    pub fn reset(&self) {
        self.counter.store(0, Ordering::SeqCst);
    }
}
