//! Communicator bootstrap coordinator

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use xccl_core::{
    BootstrapConfig, CommConfig, CommHandle, CommOptions, DataType, DeviceIndex, DevicePtr, Error,
    RankInfo, RedOp, Result, StoreConfig, UniqueId, BACKEND_NAME, EXCHANGE_METHOD_AUTO,
    EXCHANGE_METHOD_TCPSTORE,
};
use xccl_store::{Store, StoreHandle, StoreManager, StoreRegistry};

use crate::api::{device_check, CollectiveBackend, DeviceApi};
use crate::context::RendezvousContext;
use crate::hints::apply_hints;

/// Default bound on blocking store operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How rank 0 shares the unique ID when no store is supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UniqueIdExchangeMethod {
    Auto,
    TcpStore,
}

impl UniqueIdExchangeMethod {
    fn parse(method: &str) -> Option<Self> {
        match method {
            EXCHANGE_METHOD_AUTO => Some(Self::Auto),
            EXCHANGE_METHOD_TCPSTORE => Some(Self::TcpStore),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => EXCHANGE_METHOD_AUTO,
            Self::TcpStore => EXCHANGE_METHOD_TCPSTORE,
        }
    }
}

/// Store used for one unique ID exchange
enum RendezvousStore {
    /// Supplied by the caller; never torn down here
    External(StoreHandle),

    /// Created from the registry; released before the closing barrier
    Internal(StoreHandle),
}

impl RendezvousStore {
    fn handle(&self) -> &dyn Store {
        match self {
            RendezvousStore::External(store) | RendezvousStore::Internal(store) => store.as_ref(),
        }
    }
}

/// Bootstraps XCCL communicators for one process
///
/// Owns the device assignment and a one-float scratch buffer used for the
/// closing barrier. Each call to [`create_communicator`] exchanges a fresh
/// unique ID through a coordination store and collectively constructs a
/// communicator spanning every rank.
///
/// When no store is supplied, one is created per communicator from the
/// store registry and torn down once every rank has finished construction.
/// The barrier guarantees that no rank reuses the rendezvous port while a
/// peer still holds the previous store.
///
/// [`create_communicator`]: XcclBootstrap::create_communicator
pub struct XcclBootstrap {
    /// Bound on blocking store operations
    timeout: Duration,

    /// Caller-supplied store, used for every exchange
    store: Option<StoreHandle>,

    /// Device selected for this process
    device: DeviceIndex,

    /// Rank and world size
    rank_info: RankInfo,

    /// Resolved bootstrap configuration
    config: BootstrapConfig,

    /// Source of internal stores, created on first use
    registry: Option<Arc<dyn StoreRegistry>>,

    /// Store-key counter
    context: Arc<RendezvousContext>,

    xccl_api: Arc<dyn CollectiveBackend>,
    device_api: Arc<dyn DeviceApi>,

    /// Barrier scratch buffer; `None` once released
    barrier_buffer: Option<DevicePtr>,
}

impl XcclBootstrap {
    /// Create a bootstrap from the process environment
    ///
    /// With `device` unset, the device is `rank % device_count`.
    pub fn new(
        store: Option<StoreHandle>,
        device: Option<DeviceIndex>,
        xccl_api: Arc<dyn CollectiveBackend>,
        device_api: Arc<dyn DeviceApi>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut builder = Self::builder(xccl_api, device_api).timeout(timeout);
        if let Some(store) = store {
            builder = builder.store(store);
        }
        if let Some(device) = device {
            builder = builder.device(device);
        }
        builder.build()
    }

    /// Start building a bootstrap
    pub fn builder(
        xccl_api: Arc<dyn CollectiveBackend>,
        device_api: Arc<dyn DeviceApi>,
    ) -> XcclBootstrapBuilder {
        XcclBootstrapBuilder::new(xccl_api, device_api)
    }

    /// Rank and world size of this process
    pub fn rank_info(&self) -> RankInfo {
        self.rank_info
    }

    pub fn rank(&self) -> u32 {
        self.rank_info.rank
    }

    pub fn world_size(&self) -> u32 {
        self.rank_info.world_size
    }

    /// Device selected for this process
    pub fn device(&self) -> DeviceIndex {
        self.device
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolved bootstrap configuration
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Lower-cased exchange method selector
    pub fn uniqueid_exchange_method(&self) -> &str {
        &self.config.uniqueid_exchange_method
    }

    /// Whether the caller supplied the store
    pub fn has_external_store(&self) -> bool {
        self.store.is_some()
    }

    /// Store-key counter used by this bootstrap
    pub fn context(&self) -> &Arc<RendezvousContext> {
        &self.context
    }

    /// Create a communicator spanning every rank
    ///
    /// Must be called by all ranks in the same order. Blocks until the
    /// unique ID has been exchanged and the backend has constructed the
    /// communicator. Ownership of the returned handle passes to the caller.
    ///
    /// # Errors
    /// Fails with a configuration error if no store can be obtained, with
    /// an exchange error if the unique ID cannot be shared or has the wrong
    /// size, with `HintParse` for a malformed integer hint, and with
    /// `CommInit` if the backend rejects the communicator.
    pub fn create_communicator(&mut self, name: &str, options: &CommOptions) -> Result<CommHandle> {
        let store = self.acquire_store(name)?;
        let unique_id = self.exchange_unique_id(store.handle(), name)?;

        let mut config = CommConfig {
            comm_name: Some(name.to_string()),
            ..CommConfig::default()
        };
        let report = apply_hints(&mut config, options, self.rank_info.rank, name)?;
        debug!(
            rank = self.rank_info.rank,
            comm = %name,
            applied = report.applied.len(),
            ignored = report.ignored.len(),
            "Translated communicator hints"
        );

        let comm = self
            .xccl_api
            .comm_init_rank_config(self.rank_info.world_size, &unique_id, self.rank_info.rank, config)
            .map_err(|status| self.comm_init_error(name, self.xccl_api.error_string(status)))?;
        if comm.is_null() {
            return Err(self.comm_init_error(name, "backend returned a null communicator".to_string()));
        }

        info!(
            rank = self.rank_info.rank,
            size = self.rank_info.world_size,
            device = self.device,
            comm = %name,
            "Created XCCL communicator"
        );

        if let RendezvousStore::Internal(store) = store {
            self.cleanup_tcp_store(store, comm, name)?;
        }

        Ok(comm)
    }

    /// Release the barrier buffer, reporting failure as an error
    pub fn close(mut self) -> Result<()> {
        self.release_barrier_buffer()
    }

    fn comm_init_error(&self, name: &str, message: String) -> Error {
        Error::CommInit {
            rank: self.rank_info.rank,
            size: self.rank_info.world_size,
            comm: name.to_string(),
            message,
        }
    }

    /// Pick the store for the next exchange
    fn acquire_store(&mut self, name: &str) -> Result<RendezvousStore> {
        if let Some(store) = &self.store {
            return Ok(RendezvousStore::External(Arc::clone(store)));
        }

        let method = UniqueIdExchangeMethod::parse(&self.config.uniqueid_exchange_method)
            .ok_or_else(|| Error::InvalidExchangeMethod {
                method: self.config.uniqueid_exchange_method.clone(),
                rank: self.rank_info.rank,
                comm: name.to_string(),
            })?;

        self.exchange_unique_id_tcp_store(method, name)
            .map(RendezvousStore::Internal)
    }

    /// Create an internal store on the rendezvous address
    fn exchange_unique_id_tcp_store(
        &mut self,
        method: UniqueIdExchangeMethod,
        name: &str,
    ) -> Result<StoreHandle> {
        if self.config.rendezvous.is_none() {
            return Err(Error::NoExchangeMethod {
                rank: self.rank_info.rank,
                comm: name.to_string(),
            });
        }

        let registry = self.registry()?;
        let store = registry
            .get_store(BACKEND_NAME, name, self.timeout)
            .map_err(|e| Error::StoreAcquire {
                rank: self.rank_info.rank,
                comm: name.to_string(),
                source: Box::new(e),
            })?;

        debug!(
            rank = self.rank_info.rank,
            comm = %name,
            method = method.as_str(),
            "Acquired internal rendezvous store"
        );
        Ok(store)
    }

    fn registry(&mut self) -> Result<Arc<dyn StoreRegistry>> {
        if let Some(registry) = &self.registry {
            return Ok(Arc::clone(registry));
        }

        let manager = StoreManager::from_config(&self.config, StoreConfig::with_timeout(self.timeout))?;
        let registry: Arc<dyn StoreRegistry> = Arc::new(manager);
        self.registry = Some(Arc::clone(&registry));
        Ok(registry)
    }

    /// Share the unique ID through `store`
    ///
    /// Rank 0 generates the identity and publishes it; every other rank
    /// blocks until it appears and checks its size.
    fn exchange_unique_id(&self, store: &dyn Store, name: &str) -> Result<UniqueId> {
        let key = self.context.next_store_key();
        let rank = self.rank_info.rank;
        let exchange_error = |key: &str, source: Error| Error::Exchange {
            key: key.to_string(),
            rank,
            comm: name.to_string(),
            source: Box::new(source),
        };

        if self.rank_info.is_root() {
            let unique_id = self
                .xccl_api
                .get_unique_id()
                .map_err(|status| Error::UniqueIdGeneration {
                    rank,
                    comm: name.to_string(),
                    message: self.xccl_api.error_string(status),
                })?;
            store
                .set(&key, unique_id.as_bytes())
                .map_err(|e| exchange_error(&key, e))?;
            debug!(rank, comm = %name, key = %key, "Published unique ID");
            return Ok(unique_id);
        }

        let bytes = store.get(&key).map_err(|e| exchange_error(&key, e))?;
        let expected = self.xccl_api.unique_id_size();
        if bytes.len() != expected {
            return Err(Error::InvalidUniqueIdSize {
                key,
                expected,
                actual: bytes.len(),
                rank,
                comm: name.to_string(),
            });
        }

        debug!(rank, comm = %name, key = %key, "Received unique ID");
        Ok(UniqueId::from_bytes(bytes))
    }

    /// Release an internal store, then wait for every rank to do the same
    ///
    /// The store is dropped before the barrier so that once the barrier
    /// completes, no rank still holds the rendezvous port.
    fn cleanup_tcp_store(&self, store: StoreHandle, comm: CommHandle, name: &str) -> Result<()> {
        drop(store);

        let buffer = self.barrier_buffer.ok_or_else(|| Error::Internal {
            message: format!(
                "barrier buffer already released (rank {}, comm '{}')",
                self.rank_info.rank, name
            ),
        })?;
        let stream = self.device_api.current_stream(self.device);

        if let Err(status) =
            self.xccl_api
                .all_reduce(buffer, buffer, 1, DataType::Float32, RedOp::Sum, comm, stream)
        {
            error!(
                rank = self.rank_info.rank,
                comm = %name,
                error = %self.xccl_api.error_string(status),
                "Closing barrier all-reduce failed"
            );
        }

        device_check(
            self.device_api.as_ref(),
            self.device_api.stream_synchronize(stream),
            || {
                format!(
                    "Failed to synchronize stream on device {} (rank {}, comm '{}')",
                    self.device, self.rank_info.rank, name
                )
            },
        )
    }

    fn release_barrier_buffer(&mut self) -> Result<()> {
        let Some(buffer) = self.barrier_buffer.take() else {
            return Ok(());
        };
        device_check(self.device_api.as_ref(), self.device_api.free(buffer), || {
            format!("Failed to free barrier buffer on device {}", self.device)
        })
    }
}

impl Drop for XcclBootstrap {
    fn drop(&mut self) {
        if let Err(e) = self.release_barrier_buffer() {
            error!(rank = self.rank_info.rank, error = %e, "Barrier buffer release failed");
            if !std::thread::panicking() {
                panic!("{}", e);
            }
        }
    }
}

/// Builder for [`XcclBootstrap`]
pub struct XcclBootstrapBuilder {
    xccl_api: Arc<dyn CollectiveBackend>,
    device_api: Arc<dyn DeviceApi>,
    store: Option<StoreHandle>,
    device: Option<DeviceIndex>,
    timeout: Duration,
    config: Option<BootstrapConfig>,
    registry: Option<Arc<dyn StoreRegistry>>,
    context: Option<Arc<RendezvousContext>>,
}

impl XcclBootstrapBuilder {
    /// Create a builder with the default timeout
    pub fn new(xccl_api: Arc<dyn CollectiveBackend>, device_api: Arc<dyn DeviceApi>) -> Self {
        Self {
            xccl_api,
            device_api,
            store: None,
            device: None,
            timeout: DEFAULT_TIMEOUT,
            config: None,
            registry: None,
            context: None,
        }
    }

    /// Use an externally owned store for every exchange
    pub fn store(mut self, store: StoreHandle) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific device instead of `rank % device_count`
    pub fn device(mut self, device: DeviceIndex) -> Self {
        self.device = Some(device);
        self
    }

    /// Set the bound on blocking store operations
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use an explicit configuration instead of reading the environment
    pub fn config(mut self, config: BootstrapConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Create internal stores from `registry`
    pub fn registry(mut self, registry: Arc<dyn StoreRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Draw store keys from `context` instead of the process-wide one
    pub fn context(mut self, context: Arc<RendezvousContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Select the device and allocate the barrier buffer
    pub fn build(self) -> Result<XcclBootstrap> {
        let config = match self.config {
            Some(config) => config,
            None => BootstrapConfig::from_env()?,
        };
        let rank_info = config.rank_info;
        let device_api = self.device_api;

        let device = match self.device {
            Some(device) => device,
            None => {
                let count = device_check(device_api.as_ref(), device_api.device_count(), || {
                    "Failed to get device count".to_string()
                })?;
                if count <= 0 {
                    return Err(Error::Device {
                        context: format!("Cannot assign a device to rank {}", rank_info.rank),
                        message: "no devices available".to_string(),
                    });
                }
                let device = (rank_info.rank % count as u32) as DeviceIndex;
                info!(
                    rank = rank_info.rank,
                    device,
                    device_count = count,
                    "No device specified, assigned device by rank"
                );
                device
            }
        };

        device_check(device_api.as_ref(), device_api.set_device(device), || {
            format!("Failed to set device {}", device)
        })?;
        let barrier_buffer = device_check(
            device_api.as_ref(),
            device_api.malloc(std::mem::size_of::<f32>()),
            || format!("Failed to allocate barrier buffer on device {}", device),
        )?;

        if self.store.is_some() && self.registry.is_some() {
            warn!("Both a store and a registry were supplied; the registry is unused");
        }

        Ok(XcclBootstrap {
            timeout: self.timeout,
            store: self.store,
            device,
            rank_info,
            config,
            registry: self.registry,
            context: self.context.unwrap_or_else(RendezvousContext::global),
            xccl_api: self.xccl_api,
            device_api,
            barrier_buffer: Some(barrier_buffer),
        })
    }
}
