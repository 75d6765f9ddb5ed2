//! XCCL communicator bootstrap
//!
//! Every rank of a collective group must agree on a single opaque unique ID
//! before the backend can construct a communicator spanning them. This crate
//! implements that rendezvous:
//!
//! - Device assignment (`rank % device_count` unless one is given)
//! - Unique ID exchange through a coordination store
//! - Translation of user hints into backend configuration
//! - Teardown of internally created stores behind a closing barrier
//!
//! The device runtime and the collective library are consumed through the
//! [`DeviceApi`] and [`CollectiveBackend`] traits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use xccl_bootstrap::{CollectiveBackend, DeviceApi, XcclBootstrap};
//! use xccl_core::CommOptions;
//!
//! fn run(backend: Arc<dyn CollectiveBackend>, device: Arc<dyn DeviceApi>) -> xccl_core::Result<()> {
//!     let mut bootstrap = XcclBootstrap::new(None, None, backend, device, Duration::from_secs(300))?;
//!     let options = CommOptions::new().hint("blocking", "0");
//!     let _comm = bootstrap.create_communicator("tp", &options)?;
//!     bootstrap.close()
//! }
//! ```

pub mod api;
pub mod bootstrap;
pub mod context;
pub mod hints;

pub use api::{device_check, CollectiveBackend, DeviceApi, DeviceStatus, XcclStatus};
pub use bootstrap::{XcclBootstrap, XcclBootstrapBuilder, DEFAULT_TIMEOUT};
pub use context::{RendezvousContext, STORE_KEY_PREFIX};
pub use hints::{apply_hints, ConfigField, HintReport};
