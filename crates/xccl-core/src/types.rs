//! Core type definitions for communicator bootstrap

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::{Error, Result};

/// Backend name used to namespace rendezvous stores
pub const BACKEND_NAME: &str = "xccl";

/// Size of the native XCCL unique ID in bytes
pub const UNIQUE_ID_BYTES: usize = 128;

/// Local device index
pub type DeviceIndex = i32;

/// A process's position in the communicator group
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankInfo {
    /// Rank of this process, `0 <= rank < world_size`
    pub rank: u32,

    /// Total number of processes in the group
    pub world_size: u32,
}

impl RankInfo {
    /// Create a rank descriptor, validating `0 <= rank < world_size`
    pub fn new(rank: u32, world_size: u32) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::InvalidConfig {
                message: "world size must be greater than zero".to_string(),
            });
        }
        if rank >= world_size {
            return Err(Error::InvalidConfig {
                message: format!("rank {} out of range for world size {}", rank, world_size),
            });
        }
        Ok(Self { rank, world_size })
    }

    /// Whether this process is the root of the group
    pub fn is_root(&self) -> bool {
        self.rank == 0
    }
}

impl fmt::Display for RankInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rank, self.world_size)
    }
}

/// Opaque rendezvous identity produced by the collective backend
///
/// Generated once by rank 0 and propagated verbatim to every other rank.
#[derive(Clone, PartialEq, Eq)]
pub struct UniqueId(Bytes);

impl UniqueId {
    /// Wrap raw identity bytes
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw identity bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Identity length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the identity is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The contents are a network address blob; only the size is meaningful here
        f.debug_struct("UniqueId").field("len", &self.0.len()).finish()
    }
}

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);

        impl $name {
            /// The null handle
            pub const NULL: Self = Self(0);

            /// Whether this is the null handle
            pub fn is_null(&self) -> bool {
                self.0 == 0
            }
        }
    };
}

opaque_handle!(
    /// Device memory allocation returned by the device API
    DevicePtr
);

opaque_handle!(
    /// Device stream used to order collective operations
    StreamHandle
);

opaque_handle!(
    /// Communicator constructed by the collective backend
    CommHandle
);

/// Element type of a collective operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int8,
    Uint8,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float16,
    Float32,
    Float64,
    Bfloat16,
}

/// Reduction applied by a collective operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedOp {
    Sum,
    Prod,
    Max,
    Min,
    Avg,
}

/// Backend communicator configuration
///
/// Every tunable is optional; `None` leaves the backend's own default in
/// place. String fields are owned here and move into the backend together
/// with the config when the communicator is constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommConfig {
    pub blocking: Option<i32>,
    pub cga_cluster_size: Option<i32>,
    pub min_ctas: Option<i32>,
    pub max_ctas: Option<i32>,
    pub net_name: Option<String>,
    pub split_share: Option<i32>,
    pub traffic_class: Option<i32>,
    pub comm_name: Option<String>,
    pub collnet_enable: Option<i32>,
    pub cta_policy: Option<i32>,
    pub shrink_share: Option<i32>,
    pub nvls_ctas: Option<i32>,
    pub n_channels_per_net_peer: Option<i32>,
    pub nvlink_centric_sched: Option<i32>,
}

/// Options accepted when creating a communicator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommOptions {
    /// Backend tuning hints, keyed by camelCase or snake_case name
    pub hints: HashMap<String, String>,
}

impl CommOptions {
    /// Create options with no hints
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hint
    pub fn hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }
}
