//! TCP store server
//!
//! Holds the shared key space for a group. Usually hosted by rank 0 inside
//! its `TcpStore`, or standalone through the `xccl-store-server` binary.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xccl_core::{Error, Result};

use super::protocol::{read_frame, write_frame, Request, Response};
use crate::backend::{add_counter, parse_counter};

/// Shared key space
struct ServerState {
    /// Stored values
    data: DashMap<String, Bytes>,

    /// Woken on every write so pending gets can re-check
    updated: Notify,

    /// Frame size limit
    max_message_size: usize,
}

impl ServerState {
    /// Wait until `key` exists and return its value
    async fn wait_for_key(&self, key: &str) -> Bytes {
        loop {
            let notified = self.updated.notified();
            tokio::pin!(notified);
            // Register before checking so a write between the check and the await is not lost
            notified.as_mut().enable();

            if let Some(entry) = self.data.get(key) {
                return entry.value().clone();
            }
            notified.await;
        }
    }

    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Set { key, value } => {
                self.data.insert(key, Bytes::from(value));
                self.updated.notify_waiters();
                Response::Ok
            }
            Request::Get { key } => Response::Value(self.wait_for_key(&key).await.to_vec()),
            Request::Check { keys } => {
                Response::Present(keys.iter().all(|key| self.data.contains_key(key)))
            }
            Request::Add { key, delta } => {
                let result = {
                    let mut entry = self
                        .data
                        .entry(key.clone())
                        .or_insert_with(|| Bytes::from_static(b"0"));
                    parse_counter(&key, entry.value())
                        .and_then(|current| add_counter(&key, current, delta))
                        .map(|next| {
                            *entry.value_mut() = Bytes::from(next.to_string());
                            next
                        })
                };
                match result {
                    Ok(next) => {
                        self.updated.notify_waiters();
                        Response::Counter(next)
                    }
                    Err(e) => Response::Error(e.to_string()),
                }
            }
            Request::DeleteKey { key } => Response::Deleted(self.data.remove(&key).is_some()),
            Request::Ping => Response::Pong,
        }
    }
}

/// TCP store server
pub struct TcpStoreServer {
    /// Bound address
    local_addr: SocketAddr,

    /// Stops the accept loop and every connection
    shutdown_tx: broadcast::Sender<()>,

    /// Accept loop task
    task: JoinHandle<()>,
}

impl TcpStoreServer {
    /// Bind and start serving on the current Tokio runtime
    pub async fn bind<A: ToSocketAddrs>(addr: A, max_message_size: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(ServerState {
            data: DashMap::new(),
            updated: Notify::new(),
            max_message_size,
        });
        let (shutdown_tx, _) = broadcast::channel(1);

        let task = tokio::spawn(Self::accept_loop(listener, state, shutdown_tx.clone()));

        info!(address = %local_addr, "TCP store server listening");

        Ok(Self {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and drop every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for the accept loop to exit
    pub async fn wait(&mut self) {
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "TCP store accept loop ended abnormally");
        }
    }

    async fn accept_loop(
        listener: TcpListener,
        state: Arc<ServerState>,
        shutdown_tx: broadcast::Sender<()>,
    ) {
        let mut shutdown_rx = shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "TCP store connection accepted");
                        let state = Arc::clone(&state);
                        let mut conn_shutdown = shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            tokio::select! {
                                result = Self::serve_connection(stream, state) => {
                                    if let Err(e) = result {
                                        debug!(%peer, error = %e, "TCP store connection closed with error");
                                    }
                                }
                                _ = conn_shutdown.recv() => {}
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "TCP store accept failed"),
                },
                _ = shutdown_rx.recv() => {
                    info!("TCP store server shutting down");
                    break;
                }
            }
        }
    }

    async fn serve_connection(mut stream: TcpStream, state: Arc<ServerState>) -> Result<()> {
        stream.set_nodelay(true)?;

        while let Some(request) = read_frame::<_, Request>(&mut stream, state.max_message_size).await? {
            // A get can wait indefinitely; stop waiting once the client hangs up
            let response = tokio::select! {
                biased;
                response = state.handle(request) => response,
                closed = Self::peer_closed(&stream) => return closed,
            };
            write_frame(&mut stream, &response, state.max_message_size).await?;
        }
        Ok(())
    }

    /// Resolve once the client closes its end of the connection
    async fn peer_closed(stream: &TcpStream) -> Result<()> {
        let mut byte = [0u8; 1];
        match stream.peek(&mut byte).await? {
            0 => {
                debug!("TCP store client disconnected with a request pending");
                Ok(())
            }
            _ => Err(Error::Store {
                message: "request received while the previous one is pending".to_string(),
            }),
        }
    }
}

impl Drop for TcpStoreServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
