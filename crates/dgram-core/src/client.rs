//! UDP client for calling procedures on a remote server.
//!
//! Each call encodes one Call Envelope, sends it to the server and waits for
//! a Result Envelope. A wait that runs out counts as a lost attempt and the
//! same bytes are sent again, up to the attempt budget.
//!
//! # Thread Safety
//!
//! The socket sits behind a tokio `Mutex`, so a client has at most one call
//! in flight. Concurrent callers queue on the lock.

use crate::codec::{deserialize, Payload};
use crate::config::RpcConfig;
use crate::error::{Failure, Result, RpcError};
use crate::protocol::{CallEnvelope, ResultEnvelope};
use crate::provider::ServiceProvider;
use crate::retry::retry_async;
use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for a [`RemoteServiceProvider`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// How long to wait for a response before the attempt counts as lost.
    pub response_timeout: Duration,
    /// Size of the receive buffer. Longer responses are truncated.
    pub receive_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: RpcConfig::MAX_ATTEMPTS,
            response_timeout: RpcConfig::RESPONSE_TIMEOUT,
            receive_buffer: RpcConfig::MAX_DATAGRAM_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_receive_buffer(mut self, size: usize) -> Self {
        self.receive_buffer = size;
        self
    }
}

/// Calls procedures on a server at a fixed address.
#[derive(Debug)]
pub struct RemoteServiceProvider {
    server: SocketAddr,
    socket: Mutex<UdpSocket>,
    config: ClientConfig,
}

impl RemoteServiceProvider {
    /// Create a client for `server` on an OS-assigned local port.
    pub async fn new(server: SocketAddr) -> Result<Self> {
        Self::with_config(server, ClientConfig::default()).await
    }

    pub async fn with_config(server: SocketAddr, config: ClientConfig) -> Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;

        debug!(
            "RPC client bound to {} for server {}",
            socket.local_addr()?,
            server
        );

        Ok(Self {
            server,
            socket: Mutex::new(socket),
            config,
        })
    }

    /// Resolve `host` and create a client for the first address found.
    pub async fn resolve(host: &str, port: u16, config: ClientConfig) -> Result<Self> {
        let server = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| RpcError::Io {
                message: format!("no address found for {}", host),
                source: None,
            })?;
        Self::with_config(server, config).await
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send the request once and wait for the matching response.
    ///
    /// Datagrams from anyone but the server are ignored. Any response from
    /// the server is accepted, including a late one to an earlier attempt.
    async fn attempt(&self, socket: &UdpSocket, request: &[u8], attempt: u32) -> Result<ResultEnvelope> {
        debug!(
            "Sending call to {} (attempt {}/{})",
            self.server, attempt, self.config.max_attempts
        );
        if let Err(e) = socket.send_to(request, self.server).await {
            warn!("Failed to send call to {}: {}", self.server, e);
        }

        let deadline = Instant::now() + self.config.response_timeout;
        let mut buf = vec![0u8; self.config.receive_buffer];

        loop {
            let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => return Err(RpcError::ServerUnresponsive { attempts: attempt }),
                Ok(Err(e)) => {
                    warn!("Receive from {} failed: {}", self.server, e);
                    return Err(RpcError::ServerUnresponsive { attempts: attempt });
                }
                Ok(Ok(received)) => received,
            };

            if from != self.server {
                debug!("Ignoring {} byte datagram from {}", len, from);
                continue;
            }

            return ResultEnvelope::decode(&buf[..len]);
        }
    }
}

#[async_trait]
impl ServiceProvider for RemoteServiceProvider {
    async fn invoke(&self, type_name: &str, method_name: &str, args: Vec<Payload>) -> Result<Payload> {
        let request = CallEnvelope::new(type_name, method_name, &args).encode();

        let guard = self.socket.lock().await;
        let socket: &UdpSocket = &guard;
        let request: &[u8] = &request;

        let (response, stats) = retry_async(
            self.config.max_attempts,
            move |attempt| self.attempt(socket, request, attempt),
            RpcError::is_retryable,
        )
        .await;
        drop(guard);

        debug!(
            "{}.{} finished after {} attempt(s), success: {}",
            type_name, method_name, stats.attempts, stats.success
        );

        match response? {
            ResultEnvelope::Success(value) => Payload::from_bytes(&value),
            ResultEnvelope::Failure(failure) => {
                let failure: Failure = deserialize(&Payload::from_bytes(&failure)?)?;
                debug!("{}.{} failed remotely: {}", type_name, method_name, failure);
                Err(RpcError::from_failure(failure))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::serialize;
    use crate::provider::ServiceProviderExt;

    /// A fake server that answers every call with `reply` built from the request.
    async fn fake_server<F>(reply: F) -> SocketAddr
    where
        F: Fn(CallEnvelope) -> Vec<u8> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let call = CallEnvelope::decode(&buf[..len]).unwrap();
                let _ = socket.send_to(&reply(call), from).await;
            }
        });
        addr
    }

    fn fast_config() -> ClientConfig {
        ClientConfig::new()
            .with_max_attempts(3)
            .with_response_timeout(Duration::from_millis(100))
    }

    #[test]
    fn test_default_config_matches_protocol_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.response_timeout, Duration::from_millis(2000));
        assert_eq!(config.receive_buffer, 1024);
    }

    #[tokio::test]
    async fn test_success_response_is_decoded() {
        let addr = fake_server(|call| {
            assert_eq!(call.type_name, "Sample");
            assert_eq!(call.method_name, "answer");
            ResultEnvelope::success(&serialize(&42i32)).encode().to_vec()
        })
        .await;

        let client = RemoteServiceProvider::with_config(addr, fast_config()).await.unwrap();
        let answer: i32 = client.call("Sample", "answer", ()).await.unwrap();
        assert_eq!(answer, 42);
    }

    #[tokio::test]
    async fn test_failure_response_is_raised() {
        let addr = fake_server(|_| {
            let failure = Failure::new("IllegalState", "remote boom");
            ResultEnvelope::failure(&serialize(&failure)).encode().to_vec()
        })
        .await;

        let client = RemoteServiceProvider::with_config(addr, fast_config()).await.unwrap();
        let result: Result<i32> = client.call("Sample", "fail", ()).await;
        match result {
            Err(RpcError::Application(failure)) => assert_eq!(failure.message, "remote boom"),
            other => panic!("Expected Application, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_is_not_retried() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let seen = calls.clone();
        let addr = fake_server(move |_| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            b"garbage".to_vec()
        })
        .await;

        let client = RemoteServiceProvider::with_config(addr, fast_config()).await.unwrap();
        let result: Result<i32> = client.call("Sample", "answer", ()).await;
        assert!(matches!(result, Err(RpcError::ProtocolDecode { .. })));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_silent_server_exhausts_attempts() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let client = RemoteServiceProvider::with_config(addr, fast_config()).await.unwrap();
        let started = std::time::Instant::now();
        let result: Result<i32> = client.call("Sample", "answer", ()).await;

        assert!(matches!(result, Err(RpcError::ServerUnresponsive { attempts: 3 })));
        assert!(started.elapsed() >= Duration::from_millis(300));

        // Every attempt retransmitted the same bytes
        let mut buf = vec![0u8; 1024];
        let (len, _) = silent.recv_from(&mut buf).await.unwrap();
        let first = buf[..len].to_vec();
        for _ in 0..2 {
            let (len, _) = silent.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], first.as_slice());
        }
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = fake_server(|_| ResultEnvelope::success(&serialize(&true)).encode().to_vec()).await;
        let client = RemoteServiceProvider::resolve("127.0.0.1", addr.port(), fast_config())
            .await
            .unwrap();
        assert_eq!(client.server_addr(), addr);
        let ok: bool = client.call("Sample", "ok", ()).await.unwrap();
        assert!(ok);
    }
}
