//! The calling contract shared by local and remote invocation.
//!
//! [`ServiceProvider`] is the one method each variant implements.
//! [`ServiceProviderExt`] layers the typed call shapes on top of it and is
//! available on every provider, so callers never care where a procedure
//! actually runs.

use crate::codec::{deserialize, IntoArgs, Payload, RpcType};
use crate::error::{Result, RpcError};
use crate::registry::ProcedureRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Invocation of a named static procedure with encoded arguments.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Run `type_name.method_name` with `args` and return the encoded result.
    async fn invoke(&self, type_name: &str, method_name: &str, args: Vec<Payload>) -> Result<Payload>;
}

#[async_trait]
impl<P: ServiceProvider + ?Sized> ServiceProvider for Arc<P> {
    async fn invoke(&self, type_name: &str, method_name: &str, args: Vec<Payload>) -> Result<Payload> {
        (**self).invoke(type_name, method_name, args).await
    }
}

/// Typed call shapes available on every [`ServiceProvider`].
#[async_trait]
pub trait ServiceProviderExt: ServiceProvider {
    /// Call with an explicit argument list and decode the result as `R`.
    async fn call_explicit<R: RpcType>(
        &self,
        type_name: &str,
        method_name: &str,
        args: Vec<Payload>,
    ) -> Result<R> {
        let payload = self.invoke(type_name, method_name, args).await?;
        deserialize(&payload)
    }

    /// Call with a tuple of arguments, e.g. `(1, 3, 4)` or `()`.
    async fn call<R: RpcType, A: IntoArgs + Send>(
        &self,
        type_name: &str,
        method_name: &str,
        args: A,
    ) -> Result<R> {
        self.call_explicit(type_name, method_name, args.into_args())
            .await
    }

    /// Call with a `None`-terminated argument list.
    ///
    /// The trailing `None` is stripped before forwarding. An empty list is a
    /// zero-argument call. A non-empty list without the terminator, or with
    /// `None` anywhere else, is [`RpcError::InvalidUsage`].
    async fn call_terminated<R: RpcType>(
        &self,
        type_name: &str,
        method_name: &str,
        args: Vec<Option<Payload>>,
    ) -> Result<R> {
        let args = strip_terminator(args)?;
        self.call_explicit(type_name, method_name, args).await
    }
}

impl<P: ServiceProvider + ?Sized> ServiceProviderExt for P {}

fn strip_terminator(mut args: Vec<Option<Payload>>) -> Result<Vec<Payload>> {
    match args.pop() {
        None => Ok(Vec::new()),
        Some(Some(_)) => Err(RpcError::InvalidUsage {
            message: "terminate the parameters with None".to_string(),
        }),
        Some(None) => args
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| RpcError::InvalidUsage {
                message: "None is only allowed as the final terminator".to_string(),
            }),
    }
}

/// Runs procedures in this process from a [`ProcedureRegistry`].
#[derive(Debug, Clone)]
pub struct LocalServiceProvider {
    registry: Arc<ProcedureRegistry>,
}

impl LocalServiceProvider {
    pub fn new(registry: ProcedureRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ProcedureRegistry {
        &self.registry
    }
}

#[async_trait]
impl ServiceProvider for LocalServiceProvider {
    /// Procedures are plain blocking functions, so they run on tokio's
    /// blocking pool rather than on the async worker that awaits them.
    async fn invoke(&self, type_name: &str, method_name: &str, args: Vec<Payload>) -> Result<Payload> {
        debug!("Call: {}.{}", type_name, method_name);

        let registry = Arc::clone(&self.registry);
        let type_name = type_name.to_string();
        let method_name = method_name.to_string();
        tokio::task::spawn_blocking(move || registry.invoke(&type_name, &method_name, &args))
            .await
            .map_err(|e| RpcError::Internal(format!("procedure task failed: {}", e)))?
    }
}
