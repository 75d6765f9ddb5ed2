//! TCP coordination store
//!
//! Rank 0 hosts a `TcpStoreServer` on the rendezvous port and every rank,
//! rank 0 included, talks to it through a `TcpStoreClient`. `TcpStore`
//! wraps both behind the blocking `Store` interface.

mod client;
pub mod protocol;
mod server;

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, instrument};
use xccl_core::{Error, Result, StoreConfig};

use crate::{Store, StoreRuntime};
use protocol::{Request, Response};

pub use client::TcpStoreClient;
pub use server::TcpStoreServer;

/// Blocking TCP store
///
/// Dropping the store shuts down its runtime. On the hosting rank this
/// closes the listener, so the port can be bound again afterwards.
pub struct TcpStore {
    /// Client connection to the server
    client: TcpStoreClient,

    /// Server, present on the hosting rank
    server: Option<TcpStoreServer>,

    /// Runtime driving client and server; dropped last
    runtime: StoreRuntime,

    /// Store configuration
    config: StoreConfig,
}

impl TcpStore {
    /// Create a store client, hosting the server as well when `is_server`
    ///
    /// Port 0 is only meaningful with `is_server`; the bound port is then
    /// available through [`TcpStore::port`].
    pub fn new(host: &str, port: u16, is_server: bool, config: StoreConfig) -> Result<Self> {
        let runtime = StoreRuntime::new(config.io_threads, config.shutdown_timeout)?;

        let server = if is_server {
            let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            Some(runtime.block_on(TcpStoreServer::bind(bind_addr, config.max_message_size))?)
        } else {
            None
        };

        let port = server
            .as_ref()
            .map(|server| server.local_addr().port())
            .unwrap_or(port);
        let client = TcpStoreClient::new(format!("{}:{}", host, port), config.clone());
        runtime.block_on(client.ensure_connected())?;

        info!(
            address = %client.address(),
            is_server,
            timeout_ms = config.timeout.as_millis() as u64,
            "TCP store connected"
        );

        Ok(Self {
            client,
            server,
            runtime,
            config,
        })
    }

    /// Port of the server this store talks to
    pub fn port(&self) -> u16 {
        self.server
            .as_ref()
            .map(|server| server.local_addr().port())
            .or_else(|| {
                self.client
                    .address()
                    .rsplit(':')
                    .next()
                    .and_then(|port| port.parse().ok())
            })
            .unwrap_or(0)
    }

    /// Whether this store hosts the server
    pub fn is_server(&self) -> bool {
        self.server.is_some()
    }

    fn call(&self, request: Request, key: &str) -> Result<Response> {
        self.runtime.block_on(self.client.request(request, key))
    }
}

/// Error for a response that does not match its request
fn unexpected(response: Response) -> Error {
    Error::Store {
        message: format!("unexpected TCP store response: {:?}", response),
    }
}

impl Store for TcpStore {
    #[instrument(skip(self, value), fields(store = "tcp", size = value.len()))]
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let request = Request::Set {
            key: key.to_string(),
            value: value.to_vec(),
        };
        match self.call(request, key)? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    #[instrument(skip(self), fields(store = "tcp"))]
    fn get(&self, key: &str) -> Result<Bytes> {
        let request = Request::Get {
            key: key.to_string(),
        };
        match self.call(request, key)? {
            Response::Value(value) => Ok(Bytes::from(value)),
            other => Err(unexpected(other)),
        }
    }

    fn check(&self, keys: &[&str]) -> Result<bool> {
        let request = Request::Check {
            keys: keys.iter().map(|key| key.to_string()).collect(),
        };
        match self.call(request, keys.first().copied().unwrap_or_default())? {
            Response::Present(present) => Ok(present),
            other => Err(unexpected(other)),
        }
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let request = Request::Add {
            key: key.to_string(),
            delta,
        };
        match self.call(request, key)? {
            Response::Counter(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn delete_key(&self, key: &str) -> Result<bool> {
        let request = Request::DeleteKey {
            key: key.to_string(),
        };
        match self.call(request, key)? {
            Response::Deleted(existed) => Ok(existed),
            other => Err(unexpected(other)),
        }
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

impl Drop for TcpStore {
    fn drop(&mut self) {
        if let Some(server) = &self.server {
            server.shutdown();
        }
    }
}
