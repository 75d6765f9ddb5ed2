//! TCP store client

use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use xccl_core::{Error, Result, StoreConfig};

use super::protocol::{read_frame, write_frame, Request, Response};

/// Single-connection client for a `TcpStoreServer`
///
/// Requests are serialized over one connection. A request that times out
/// or fails drops the connection, since a late response would otherwise be
/// read as the answer to the next request.
pub struct TcpStoreClient {
    /// `host:port` of the server
    address: String,

    /// Live connection, re-established lazily
    stream: Mutex<Option<TcpStream>>,

    /// Store configuration
    config: StoreConfig,
}

impl TcpStoreClient {
    /// Create a client; no connection is made until first use
    pub fn new(address: impl Into<String>, config: StoreConfig) -> Self {
        Self {
            address: address.into(),
            stream: Mutex::new(None),
            config,
        }
    }

    /// Server address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect now if not already connected
    pub async fn ensure_connected(&self) -> Result<()> {
        let mut stream = self.stream.lock().await;
        if stream.is_none() {
            *stream = Some(self.connect().await?);
        }
        Ok(())
    }

    /// Send one request and wait for its response
    ///
    /// `key` only labels a timeout error.
    pub async fn request(&self, request: Request, key: &str) -> Result<Response> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(Error::Internal {
                message: "TCP store connection missing after connect".to_string(),
            });
        };

        let max = self.config.max_message_size;
        let exchange = async {
            write_frame(stream, &request, max).await?;
            read_frame::<_, Response>(stream, max).await
        };

        let outcome = tokio::time::timeout(self.config.timeout, exchange).await;
        match outcome {
            Ok(Ok(Some(Response::Error(message)))) => Err(Error::Store { message }),
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None)) => {
                *guard = None;
                Err(Error::StoreUnavailable {
                    address: self.address.clone(),
                })
            }
            Ok(Err(e)) => {
                *guard = None;
                Err(e)
            }
            Err(_) => {
                *guard = None;
                debug!(key, address = %self.address, "TCP store request timed out");
                Err(Error::StoreTimeout {
                    key: key.to_string(),
                    timeout_ms: self.config.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Connect, retrying with backoff until the store timeout elapses
    ///
    /// The server may still be starting on rank 0 when other ranks arrive.
    async fn connect(&self) -> Result<TcpStream> {
        let deadline = Instant::now() + self.config.timeout;
        let mut attempt = 0u32;

        loop {
            match TcpStream::connect(&self.address).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(address = %self.address, attempt, "Connected to TCP store");
                    return Ok(stream);
                }
                Err(e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(address = %self.address, error = %e, "Giving up connecting to TCP store");
                        return Err(Error::StoreUnavailable {
                            address: self.address.clone(),
                        });
                    }

                    let delay = self.backoff(attempt).min(deadline - now);
                    debug!(
                        address = %self.address,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "TCP store not reachable yet, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let retry = &self.config.retry;
        let delay = retry.delay_for_attempt(attempt);
        if retry.jitter && !delay.is_zero() {
            let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
            delay + Duration::from_millis(jitter_ms)
        } else {
            delay
        }
    }
}
