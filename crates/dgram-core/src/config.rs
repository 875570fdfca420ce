//! Centralized configuration for dgram-core.
//!
//! Protocol constants shared by the client and server transports.

use std::time::Duration;

/// Call transport configuration.
pub struct RpcConfig;

impl RpcConfig {
    /// Total attempts a client makes before giving up on a call.
    pub const MAX_ATTEMPTS: u32 = 5;
    /// How long a client waits for a Result Envelope per attempt.
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);
    /// How often the server loop wakes up to re-check its running flag.
    pub const SERVER_POLL_TIMEOUT: Duration = Duration::from_millis(500);
    /// Receive buffer for a single datagram. Longer datagrams are truncated.
    pub const MAX_DATAGRAM_SIZE: usize = 1024;
    pub const DEFAULT_PORT: u16 = 8000;
}
