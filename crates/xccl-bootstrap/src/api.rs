//! Device runtime and collective backend capabilities
//!
//! The bootstrap never talks to hardware directly. Both traits can be
//! backed by the native libraries or by in-process fakes for testing.

use std::fmt;

use xccl_core::{
    CommConfig, CommHandle, DataType, DeviceIndex, DevicePtr, Error, RedOp, Result, StreamHandle,
    UniqueId, UNIQUE_ID_BYTES,
};

/// Non-success status code from the device runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus(pub i32);

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device status {}", self.0)
    }
}

/// Device runtime operations used during bootstrap
pub trait DeviceApi: Send + Sync {
    /// Number of usable devices on this host
    fn device_count(&self) -> std::result::Result<i32, DeviceStatus>;

    /// Make `device` current for this process
    fn set_device(&self, device: DeviceIndex) -> std::result::Result<(), DeviceStatus>;

    /// Allocate `size` bytes of device memory
    fn malloc(&self, size: usize) -> std::result::Result<DevicePtr, DeviceStatus>;

    /// Release memory returned by `malloc`
    fn free(&self, ptr: DevicePtr) -> std::result::Result<(), DeviceStatus>;

    /// Stream currently in use on `device`
    fn current_stream(&self, device: DeviceIndex) -> StreamHandle;

    /// Block until all work queued on `stream` has finished
    fn stream_synchronize(&self, stream: StreamHandle) -> std::result::Result<(), DeviceStatus>;

    /// Human-readable description of a status
    fn error_string(&self, status: DeviceStatus) -> String;
}

/// Non-success result code from the collective backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XcclStatus {
    UnhandledDeviceError,
    SystemError,
    InternalError,
    InvalidArgument,
    InvalidUsage,
    RemoteError,
    InProgress,
    Other(i32),
}

/// Collective backend operations used during bootstrap
pub trait CollectiveBackend: Send + Sync {
    /// Size in bytes of the identity produced by `get_unique_id`
    fn unique_id_size(&self) -> usize {
        UNIQUE_ID_BYTES
    }

    /// Generate a fresh rendezvous identity
    fn get_unique_id(&self) -> std::result::Result<UniqueId, XcclStatus>;

    /// Collectively construct a communicator
    ///
    /// Blocks until every rank has joined. `config` is moved into the
    /// backend, which owns its strings from here on.
    fn comm_init_rank_config(
        &self,
        nranks: u32,
        unique_id: &UniqueId,
        rank: u32,
        config: CommConfig,
    ) -> std::result::Result<CommHandle, XcclStatus>;

    /// All-reduce `count` elements from `send` into `recv`
    #[allow(clippy::too_many_arguments)]
    fn all_reduce(
        &self,
        send: DevicePtr,
        recv: DevicePtr,
        count: usize,
        dtype: DataType,
        op: RedOp,
        comm: CommHandle,
        stream: StreamHandle,
    ) -> std::result::Result<(), XcclStatus>;

    /// Human-readable description of a status
    fn error_string(&self, status: XcclStatus) -> String;
}

/// Convert a device status into an error carrying `context`
pub fn device_check<T, C>(
    api: &dyn DeviceApi,
    result: std::result::Result<T, DeviceStatus>,
    context: C,
) -> Result<T>
where
    C: FnOnce() -> String,
{
    result.map_err(|status| Error::Device {
        context: context(),
        message: api.error_string(status),
    })
}
