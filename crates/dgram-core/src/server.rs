//! UDP server exposing a [`ServiceProvider`] to remote callers.
//!
//! The receive loop handles one datagram at a time: decode the Call
//! Envelope, invoke the procedure, and send a Result Envelope back to the
//! address the call came from. A slow procedure therefore delays every
//! caller queued behind it.
//!
//! Malformed datagrams are logged and dropped without a reply. Everything
//! that goes wrong after a call has been decoded (unknown procedure, a
//! failing procedure, an argument of an unknown type) is answered with a
//! failure envelope.
//!
//! The socket is read with a short timeout so the loop notices
//! [`RpcServerHandle::terminate`] within one poll interval, then releases
//! the socket.

use crate::cancel::CancellationToken;
use crate::codec::{deserialize_list, serialize, Payload};
use crate::config::RpcConfig;
use crate::error::Result;
use crate::protocol::{CallEnvelope, ResultEnvelope};
use crate::provider::ServiceProvider;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for an [`RpcServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a single receive may block before the running flag is checked again.
    pub poll_timeout: Duration,
    /// Size of the receive buffer. Longer calls are truncated and dropped.
    pub receive_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: RpcConfig::SERVER_POLL_TIMEOUT,
            receive_buffer: RpcConfig::MAX_DATAGRAM_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_receive_buffer(mut self, size: usize) -> Self {
        self.receive_buffer = size;
        self
    }
}

/// A bound server socket plus the provider that executes its calls.
pub struct RpcServer<P> {
    socket: UdpSocket,
    addr: SocketAddr,
    provider: P,
    config: ServerConfig,
    running: CancellationToken,
}

impl<P: ServiceProvider + 'static> RpcServer<P> {
    /// Bind to `addr` with the default configuration.
    pub async fn bind(provider: P, addr: SocketAddr) -> Result<Self> {
        Self::bind_with_config(provider, addr, ServerConfig::default()).await
    }

    pub async fn bind_with_config(provider: P, addr: SocketAddr, config: ServerConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let addr = socket.local_addr()?;

        info!("Starting RPC server on {}", addr);

        Ok(Self {
            socket,
            addr,
            provider,
            config,
            running: CancellationToken::new(),
        })
    }

    /// Bind to `addr` and run the loop on a background task.
    pub async fn start(provider: P, addr: SocketAddr) -> Result<RpcServerHandle> {
        Ok(Self::bind(provider, addr).await?.spawn())
    }

    /// The address the server is bound to (useful when port 0 was requested).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// A token that stops [`run`](Self::run) when cancelled.
    pub fn terminator(&self) -> CancellationToken {
        self.running.clone()
    }

    /// Run the loop on a background task.
    pub fn spawn(self) -> RpcServerHandle {
        let addr = self.addr;
        let running = self.running.clone();
        let task = tokio::spawn(self.run());

        RpcServerHandle {
            addr,
            running,
            task: Some(task),
        }
    }

    /// Receive, dispatch and respond until terminated, then close the socket.
    pub async fn run(self) {
        let mut buf = vec![0u8; self.config.receive_buffer];

        while !self.running.is_cancelled() {
            let received =
                tokio::time::timeout(self.config.poll_timeout, self.socket.recv_from(&mut buf)).await;

            let (len, peer) = match received {
                Err(_) => continue,
                Ok(Err(e)) => {
                    warn!("RPC server receive error: {}", e);
                    continue;
                }
                Ok(Ok(received)) => received,
            };

            self.handle_datagram(&buf[..len], peer).await;
        }

        info!("RPC server on {} shutting down", self.addr);
    }

    async fn handle_datagram(&self, data: &[u8], peer: SocketAddr) {
        let call = match CallEnvelope::decode(data) {
            Ok(call) => call,
            Err(e) => {
                warn!("Dropping malformed call from {}: {}", peer, e);
                return;
            }
        };

        debug!("Call {}.{} from {}", call.type_name, call.method_name, peer);

        let response = match self.dispatch(&call).await {
            Ok(value) => ResultEnvelope::success(&value),
            Err(e) => {
                debug!("{}.{} failed: {}", call.type_name, call.method_name, e);
                ResultEnvelope::failure(&serialize(&e.to_failure()))
            }
        };

        if let Err(e) = self.socket.send_to(&response.encode(), peer).await {
            warn!("Failed to send result to {}: {}", peer, e);
        }
    }

    async fn dispatch(&self, call: &CallEnvelope) -> Result<Payload> {
        let args = deserialize_list(&call.arguments)?;
        self.provider
            .invoke(&call.type_name, &call.method_name, args)
            .await
    }
}

/// Handle to a running server. Dropping it terminates the server.
#[derive(Debug)]
pub struct RpcServerHandle {
    addr: SocketAddr,
    running: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RpcServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Ask the loop to stop. It exits at the next poll boundary.
    pub fn terminate(&self) {
        self.running.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.running.is_cancelled()
    }

    /// Terminate and wait until the loop has exited and released its socket.
    pub async fn stopped(mut self) {
        self.terminate();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("RPC server task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
