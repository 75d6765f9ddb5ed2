//! XCCL Core - Foundation for communicator bootstrap
//!
//! Provides core types, error handling, and configuration resolution
//! shared by the coordination stores and the bootstrap coordinator.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    BootstrapConfig, RendezvousAddress, RetryConfig, StoreConfig, ENV_MASTER_ADDR,
    ENV_MASTER_PORT, ENV_UNIQUEID_EXCHANGE_METHOD, EXCHANGE_METHOD_AUTO, EXCHANGE_METHOD_DEFAULT,
    EXCHANGE_METHOD_TCPSTORE,
};
pub use error::{Error, Result};
pub use types::*;
