//! Procedure registration and resolution.
//!
//! Procedures are ordinary Rust functions registered under a
//! (type name, method name) pair at startup. Each registration records the
//! type tags of its parameters; a call resolves only when the tags of the
//! supplied arguments match a registered signature exactly, in order.
//!
//! ```rust,ignore
//! let mut registry = ProcedureRegistry::new();
//! registry
//!     .register("Sample", "sum", |a: i32, b: i32, c: i32| a + b + c)
//!     .register("Sample", "check", check_positive); // fn(i32) -> Result<i32, Failure>
//! ```

use crate::codec::{deserialize, register_type, serialize, Payload, RpcType};
use crate::error::{Failure, Result, RpcError};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

type Handler = Box<dyn Fn(&[Payload]) -> Result<Payload> + Send + Sync>;

/// Marker for procedures returning `Result<R, Failure>`.
pub struct Fallible;

/// Marker for procedures returning a bare value.
pub struct Infallible;

/// Conversion of a Rust function into a registered procedure.
///
/// Implemented for functions of up to eight [`RpcType`] arguments returning
/// either an [`RpcType`] or `Result<RpcType, Failure>`. The `Marker`
/// parameter only keeps the implementations apart.
pub trait IntoProcedure<Marker>: Send + Sync + 'static {
    /// Type tags of the parameters, in order.
    fn signature() -> Vec<&'static str>;
    fn return_tag() -> &'static str;
    /// Make every parameter and return type known to the payload codec.
    fn register_types();
    fn into_handler(self) -> Handler;
}

fn next_arg<'a>(args: &mut std::slice::Iter<'a, Payload>) -> Result<&'a Payload> {
    args.next().ok_or_else(|| RpcError::Internal("argument count changed after resolution".into()))
}

macro_rules! impl_into_procedure {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> IntoProcedure<(Fallible, R, $($arg,)*)> for F
        where
            F: Fn($($arg),*) -> std::result::Result<R, Failure> + Send + Sync + 'static,
            R: RpcType,
            $($arg: RpcType,)*
        {
            fn signature() -> Vec<&'static str> {
                vec![$($arg::TYPE_TAG),*]
            }

            fn return_tag() -> &'static str {
                R::TYPE_TAG
            }

            fn register_types() {
                register_type::<R>();
                $(register_type::<$arg>();)*
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_handler(self) -> Handler {
                Box::new(move |args: &[Payload]| {
                    let mut args = args.iter();
                    $(let $arg = deserialize::<$arg>(next_arg(&mut args)?)?;)*
                    let value = (self)($($arg),*).map_err(RpcError::Application)?;
                    Ok(serialize(&value))
                })
            }
        }

        impl<F, R, $($arg,)*> IntoProcedure<(Infallible, R, $($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: RpcType,
            $($arg: RpcType,)*
        {
            fn signature() -> Vec<&'static str> {
                vec![$($arg::TYPE_TAG),*]
            }

            fn return_tag() -> &'static str {
                R::TYPE_TAG
            }

            fn register_types() {
                register_type::<R>();
                $(register_type::<$arg>();)*
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_handler(self) -> Handler {
                Box::new(move |args: &[Payload]| {
                    let mut args = args.iter();
                    $(let $arg = deserialize::<$arg>(next_arg(&mut args)?)?;)*
                    Ok(serialize(&(self)($($arg),*)))
                })
            }
        }
    };
}

impl_into_procedure!();
impl_into_procedure!(A);
impl_into_procedure!(A, B);
impl_into_procedure!(A, B, C);
impl_into_procedure!(A, B, C, D);
impl_into_procedure!(A, B, C, D, E);
impl_into_procedure!(A, B, C, D, E, G);
impl_into_procedure!(A, B, C, D, E, G, H);
impl_into_procedure!(A, B, C, D, E, G, H, I);

/// One registered overload.
struct Procedure {
    signature: Vec<&'static str>,
    return_tag: &'static str,
    handler: Handler,
}

/// Description of a registered procedure, for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureInfo {
    pub type_name: String,
    pub method_name: String,
    pub signature: Vec<&'static str>,
    pub return_tag: &'static str,
}

impl fmt::Display for ProcedureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({}) -> {}",
            self.type_name,
            self.method_name,
            self.signature.join(","),
            self.return_tag
        )
    }
}

/// Table of invocable procedures keyed by type name, then method name.
#[derive(Default)]
pub struct ProcedureRegistry {
    types: HashMap<String, HashMap<String, Vec<Procedure>>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `procedure` as `type_name.method_name`.
    ///
    /// Several procedures may share a name as long as their signatures
    /// differ. Registering an existing signature again replaces it.
    /// Procedures take at most eight arguments; pass a `Vec` for more.
    pub fn register<M, F: IntoProcedure<M>>(
        &mut self,
        type_name: impl Into<String>,
        method_name: impl Into<String>,
        procedure: F,
    ) -> &mut Self {
        F::register_types();
        let entry = Procedure {
            signature: F::signature(),
            return_tag: F::return_tag(),
            handler: procedure.into_handler(),
        };

        let overloads = self
            .types
            .entry(type_name.into())
            .or_default()
            .entry(method_name.into())
            .or_default();
        overloads.retain(|existing| existing.signature != entry.signature);
        overloads.push(entry);
        self
    }

    pub fn contains_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// All registered procedures, sorted by name then signature.
    pub fn procedures(&self) -> Vec<ProcedureInfo> {
        let mut infos: Vec<ProcedureInfo> = self
            .types
            .iter()
            .flat_map(|(type_name, methods)| {
                methods.iter().flat_map(move |(method_name, overloads)| {
                    overloads.iter().map(move |procedure| ProcedureInfo {
                        type_name: type_name.clone(),
                        method_name: method_name.clone(),
                        signature: procedure.signature.clone(),
                        return_tag: procedure.return_tag,
                    })
                })
            })
            .collect();
        infos.sort_by(|a, b| {
            (&a.type_name, &a.method_name, &a.signature).cmp(&(&b.type_name, &b.method_name, &b.signature))
        });
        infos
    }

    /// Resolve the procedure matching the argument types and run it.
    ///
    /// A failure returned by the procedure comes back as
    /// [`RpcError::Application`] carrying the original [`Failure`]. A panic
    /// inside the procedure is reported the same way with kind `"Panic"`.
    pub fn invoke(&self, type_name: &str, method_name: &str, args: &[Payload]) -> Result<Payload> {
        let methods = self.types.get(type_name).ok_or_else(|| RpcError::TypeNotFound {
            type_name: type_name.to_string(),
        })?;

        let signature: Vec<&str> = args.iter().map(Payload::type_tag).collect();
        let procedure = methods
            .get(method_name)
            .and_then(|overloads| overloads.iter().find(|p| p.signature == signature))
            .ok_or_else(|| RpcError::ProcedureNotFound {
                type_name: type_name.to_string(),
                method_name: method_name.to_string(),
                signature: signature.join(","),
            })?;

        debug!(
            "Invoking {}.{}({})",
            type_name,
            method_name,
            signature.join(",")
        );

        match catch_unwind(AssertUnwindSafe(|| (procedure.handler)(args))) {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "procedure panicked".to_string());
                Err(RpcError::Application(Failure::new("Panic", message)))
            }
        }
    }
}

impl fmt::Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureRegistry")
            .field("procedures", &self.procedures().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IntoArgs;

    fn checked_div(a: i64, b: i64) -> std::result::Result<i64, Failure> {
        if b == 0 {
            return Err(Failure::new("Arithmetic", "division by zero"));
        }
        Ok(a / b)
    }

    fn registry() -> ProcedureRegistry {
        let mut registry = ProcedureRegistry::new();
        registry
            .register("Sample", "ping", || "pong".to_string())
            .register("Sample", "sum", |a: i32, b: i32, c: i32| a + b + c)
            .register("Sample", "sum", |a: i32| a)
            .register("Sample", "div", checked_div)
            .register("Sample", "first", |values: Vec<i32>| values.first().copied().unwrap_or(0));
        registry
    }

    fn invoke<R: RpcType>(registry: &ProcedureRegistry, method: &str, args: impl IntoArgs) -> Result<R> {
        let payload = registry.invoke("Sample", method, &args.into_args())?;
        deserialize(&payload)
    }

    #[test]
    fn test_overloads_resolve_by_exact_signature() {
        let registry = registry();
        assert_eq!(invoke::<i32>(&registry, "sum", (1i32, 3i32, 4i32)).unwrap(), 8);
        assert_eq!(invoke::<i32>(&registry, "sum", (5i32,)).unwrap(), 5);
    }

    #[test]
    fn test_repeated_invocation_is_stable() {
        let registry = registry();
        let first = invoke::<i32>(&registry, "sum", (1i32, 3i32, 4i32)).unwrap();
        let second = invoke::<i32>(&registry, "sum", (1i32, 3i32, 4i32)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_argument_procedure_requires_empty_args() {
        let registry = registry();
        assert_eq!(invoke::<String>(&registry, "ping", ()).unwrap(), "pong");

        match invoke::<String>(&registry, "ping", (1i32,)) {
            Err(RpcError::ProcedureNotFound { signature, .. }) => assert_eq!(signature, "i32"),
            other => panic!("Expected ProcedureNotFound, got: {:?}", other),
        }
    }

    #[test]
    fn test_no_widening_between_integer_types() {
        let registry = registry();
        let result = invoke::<i32>(&registry, "sum", (1i64, 3i64, 4i64));
        assert!(matches!(result, Err(RpcError::ProcedureNotFound { .. })));
    }

    #[test]
    fn test_argument_order_is_significant() {
        let mut registry = ProcedureRegistry::new();
        registry.register("Sample", "repeat", |s: String, n: i32| s.repeat(n as usize));

        let ok = registry.invoke("Sample", "repeat", &("ab".to_string(), 2i32).into_args());
        assert!(ok.is_ok());

        let swapped = registry.invoke("Sample", "repeat", &(2i32, "ab".to_string()).into_args());
        assert!(matches!(swapped, Err(RpcError::ProcedureNotFound { .. })));
    }

    #[test]
    fn test_unknown_type_and_method() {
        let registry = registry();
        assert!(matches!(
            registry.invoke("Missing", "sum", &[]),
            Err(RpcError::TypeNotFound { .. })
        ));
        assert!(matches!(
            registry.invoke("Sample", "missing", &[]),
            Err(RpcError::ProcedureNotFound { .. })
        ));
    }

    #[test]
    fn test_procedure_failure_is_preserved() {
        let registry = registry();
        assert_eq!(invoke::<i64>(&registry, "div", (9i64, 3i64)).unwrap(), 3);

        match invoke::<i64>(&registry, "div", (1i64, 0i64)) {
            Err(RpcError::Application(failure)) => {
                assert_eq!(failure, Failure::new("Arithmetic", "division by zero"));
            }
            other => panic!("Expected Application, got: {:?}", other),
        }
    }

    #[test]
    fn test_panicking_procedure_becomes_failure() {
        let mut registry = ProcedureRegistry::new();
        registry.register("Sample", "explode", || -> i32 { panic!("kaboom") });

        match registry.invoke("Sample", "explode", &[]) {
            Err(RpcError::Application(failure)) => {
                assert_eq!(failure.kind, "Panic");
                assert_eq!(failure.message, "kaboom");
            }
            other => panic!("Expected Application, got: {:?}", other),
        }
    }

    #[test]
    fn test_eight_argument_procedure() {
        let mut registry = ProcedureRegistry::new();
        registry.register(
            "Sample",
            "describe",
            |a: i32, b: i64, c: u32, d: u64, e: bool, f: String, g: f64, h: Vec<i32>| {
                format!("{a} {b} {c} {d} {e} {f} {g} {}", h.len())
            },
        );

        let args = (1i32, 2i64, 3u32, 4u64, true, "six".to_string(), 7.5f64, vec![8, 8]).into_args();
        let payload = registry.invoke("Sample", "describe", &args).unwrap();
        assert_eq!(deserialize::<String>(&payload).unwrap(), "1 2 3 4 true six 7.5 2");

        let listed = registry.procedures();
        assert_eq!(
            listed[0].to_string(),
            "Sample.describe(i32,i64,u32,u64,bool,String,f64,i32[]) -> String"
        );
    }

    #[test]
    fn test_non_finite_float_result() {
        let mut registry = ProcedureRegistry::new();
        registry.register("Sample", "div", |a: f64, b: f64| a / b);

        let payload = registry.invoke("Sample", "div", &(1.0f64, 0.0f64).into_args()).unwrap();
        assert_eq!(deserialize::<f64>(&payload).unwrap(), f64::INFINITY);

        let payload = registry.invoke("Sample", "div", &(0.0f64, 0.0f64).into_args()).unwrap();
        assert!(deserialize::<f64>(&payload).unwrap().is_nan());
    }

    #[test]
    fn test_single_array_argument() {
        let registry = registry();
        assert_eq!(invoke::<i32>(&registry, "first", (vec![12, 4, 1, 3],)).unwrap(), 12);
    }

    #[test]
    fn test_reregistering_signature_replaces_it() {
        let mut registry = ProcedureRegistry::new();
        registry.register("Sample", "value", || 1i32);
        registry.register("Sample", "value", || 2i32);

        assert_eq!(registry.procedures().len(), 1);
        let payload = registry.invoke("Sample", "value", &[]).unwrap();
        assert_eq!(deserialize::<i32>(&payload).unwrap(), 2);
    }

    #[test]
    fn test_procedure_listing() {
        let registry = registry();
        assert!(registry.contains_type("Sample"));
        assert!(!registry.contains_type("Other"));

        let listed: Vec<String> = registry.procedures().iter().map(|p| p.to_string()).collect();
        assert!(listed.contains(&"Sample.sum(i32,i32,i32) -> i32".to_string()));
        assert!(listed.contains(&"Sample.ping() -> String".to_string()));
        assert!(listed.contains(&"Sample.div(i64,i64) -> i64".to_string()));
    }
}
