//! Store registry
//!
//! Creates the per-communicator rendezvous store used when the caller does
//! not supply one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use xccl_core::{BootstrapConfig, Error, RankInfo, RendezvousAddress, Result, StoreConfig};

use crate::{PrefixStore, Store, TcpStore};

/// Source of rendezvous stores keyed by backend and communicator name
pub trait StoreRegistry: Send + Sync {
    /// Create or look up the store for communicator `name` of `backend_name`
    fn get_store(&self, backend_name: &str, name: &str, timeout: Duration) -> Result<Arc<dyn Store>>;
}

/// Default registry backed by a TCP store on the rendezvous address
///
/// Every call creates a fresh `TcpStore` (hosted by rank 0) wrapped in a
/// `PrefixStore` named `"{backend}/{name}"`. The caller owns the returned
/// handle; dropping the last reference shuts the store down and frees the
/// port for the next call.
pub struct StoreManager {
    /// Where rank 0 hosts the server
    rendezvous: RendezvousAddress,

    /// Rank of this process
    rank_info: RankInfo,

    /// Base store configuration; the timeout is overridden per call
    config: StoreConfig,

    /// Stores handed out so far
    created: AtomicU64,
}

impl StoreManager {
    /// Create a registry for the given rendezvous address
    pub fn new(rendezvous: RendezvousAddress, rank_info: RankInfo, config: StoreConfig) -> Self {
        Self {
            rendezvous,
            rank_info,
            config,
            created: AtomicU64::new(0),
        }
    }

    /// Create a registry from a resolved bootstrap configuration
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` if no rendezvous address is configured
    pub fn from_config(config: &BootstrapConfig, store_config: StoreConfig) -> Result<Self> {
        let rendezvous = config.rendezvous.clone().ok_or_else(|| Error::InvalidConfig {
            message: "MASTER_ADDR and MASTER_PORT are required for the TCP store".to_string(),
        })?;
        Ok(Self::new(rendezvous, config.rank_info, store_config))
    }

    /// Number of stores created by this registry
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl StoreRegistry for StoreManager {
    fn get_store(&self, backend_name: &str, name: &str, timeout: Duration) -> Result<Arc<dyn Store>> {
        let port = self.rendezvous.port_number()?;
        let config = StoreConfig {
            timeout,
            ..self.config.clone()
        };

        let store = TcpStore::new(
            &self.rendezvous.host,
            port,
            self.rank_info.is_root(),
            config,
        )?;
        let prefix = format!("{}/{}", backend_name, name);
        self.created.fetch_add(1, Ordering::Relaxed);

        info!(
            rank = self.rank_info.rank,
            host = %self.rendezvous.host,
            port,
            prefix = %prefix,
            "Created rendezvous store"
        );

        Ok(Arc::new(PrefixStore::new(prefix, Arc::new(store))))
    }
}
