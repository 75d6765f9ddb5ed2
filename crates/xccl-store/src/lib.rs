//! Store - Key-value coordination stores for XCCL rendezvous
//!
//! Provides blocking store operations with support for:
//! - In-process stores for ranks running as threads
//! - Key namespacing on top of any store
//! - A TCP store hosted by rank 0 and reached by every other rank
//! - A registry that creates per-communicator stores on demand
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use xccl_store::{Store, TcpStore};
//! use xccl_core::StoreConfig;
//!
//! # fn example() -> xccl_core::Result<()> {
//! let config = StoreConfig::with_timeout(Duration::from_secs(30));
//! let store = TcpStore::new("127.0.0.1", 29500, true, config)?;
//! store.set("greeting", b"hello")?;
//! let value = store.get("greeting")?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod manager;
mod memory;
mod prefix;
mod runtime;
pub mod tcp;

pub use backend::{Store, StoreHandle};
pub use manager::{StoreManager, StoreRegistry};
pub use memory::MemoryStore;
pub use prefix::PrefixStore;
pub use runtime::StoreRuntime;
pub use tcp::{TcpStore, TcpStoreServer};
