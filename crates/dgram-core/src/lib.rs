//! dgram-core - invoke named static procedures locally or over UDP.
//!
//! A procedure is addressed by a type name and a method name and takes an
//! ordered list of typed arguments. The same call works against a
//! [`LocalServiceProvider`] (runs the procedure in this process) or a
//! [`RemoteServiceProvider`] (sends it to an [`RpcServer`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use dgram_core::{LocalServiceProvider, ProcedureRegistry, RemoteServiceProvider, RpcServer, ServiceProviderExt};
//!
//! #[tokio::main]
//! async fn main() -> dgram_core::Result<()> {
//!     let mut registry = ProcedureRegistry::new();
//!     registry.register("Sample", "sum", |a: i32, b: i32, c: i32| a + b + c);
//!     let local = LocalServiceProvider::new(registry);
//!
//!     let sum: i32 = local.call("Sample", "sum", (1, 3, 4)).await?;
//!     assert_eq!(sum, 8);
//!
//!     let server = RpcServer::start(local, "127.0.0.1:8000".parse().unwrap()).await?;
//!     let remote = RemoteServiceProvider::new(server.addr()).await?;
//!     let sum: i32 = remote.call("Sample", "sum", (1, 3, 4)).await?;
//!     assert_eq!(sum, 8);
//!
//!     server.stopped().await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod server;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use client::{ClientConfig, RemoteServiceProvider};
pub use codec::{deserialize, deserialize_list, register_type, serialize, IntoArgs, Payload, RpcType};
pub use config::RpcConfig;
pub use error::{Failure, Result, RpcError};
pub use protocol::{CallEnvelope, ResultEnvelope};
pub use provider::{LocalServiceProvider, ServiceProvider, ServiceProviderExt};
pub use registry::{ProcedureInfo, ProcedureRegistry};
pub use server::{RpcServer, RpcServerHandle, ServerConfig};
