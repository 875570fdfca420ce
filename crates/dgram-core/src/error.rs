//! Error types for dgram-core.
//!
//! Every condition a call can end in is a variant of [`RpcError`]. Only
//! [`Failure`] objects cross the network: the server flattens whatever went
//! wrong into one with [`RpcError::to_failure`], and the client restores the
//! typed variant with [`RpcError::from_failure`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for procedure invocation.
#[derive(Debug, Error)]
pub enum RpcError {
    // Resolution errors
    #[error("Type not found: {type_name}")]
    TypeNotFound { type_name: String },

    #[error("Procedure not found: {type_name}.{method_name}({signature})")]
    ProcedureNotFound {
        type_name: String,
        method_name: String,
        /// Comma separated argument type tags that were looked up.
        signature: String,
    },

    // Raised by the invoked procedure itself
    #[error("{0}")]
    Application(Failure),

    // Wire errors
    #[error("Protocol decode error: {message}")]
    ProtocolDecode { message: String },

    #[error("Server unresponsive after {attempts} attempts")]
    ServerUnresponsive { attempts: u32 },

    // Payload errors
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Unresolvable type: {type_tag}")]
    UnresolvableType { type_tag: String },

    // Caller errors
    #[error("Invalid usage: {message}")]
    InvalidUsage { message: String },

    // Socket errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for dgram-core operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<Failure> for RpcError {
    fn from(failure: Failure) -> Self {
        RpcError::Application(failure)
    }
}

impl RpcError {
    /// Stable kind name used when the error travels as a [`Failure`].
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::TypeNotFound { .. } => "TypeNotFound",
            RpcError::ProcedureNotFound { .. } => "ProcedureNotFound",
            RpcError::Application(_) => "ApplicationFailure",
            RpcError::ProtocolDecode { .. } => "ProtocolDecodeError",
            RpcError::ServerUnresponsive { .. } => "ServerUnresponsive",
            RpcError::TypeMismatch { .. } => "TypeMismatch",
            RpcError::UnresolvableType { .. } => "UnresolvableType",
            RpcError::InvalidUsage { .. } => "InvalidUsage",
            RpcError::Io { .. } => "Io",
            RpcError::Internal(_) => "Internal",
        }
    }

    /// Flatten this error into the object carried by a failure Result Envelope.
    ///
    /// Application failures are passed through verbatim. Everything else is
    /// reduced to its kind plus the subject it failed on.
    pub fn to_failure(&self) -> Failure {
        let message = match self {
            RpcError::Application(failure) => return failure.clone(),
            RpcError::TypeNotFound { type_name } => type_name.clone(),
            RpcError::ProcedureNotFound {
                type_name,
                method_name,
                signature,
            } => format!("{}.{}({})", type_name, method_name, signature),
            RpcError::TypeMismatch { expected, actual } => {
                format!("expected {}, got {}", expected, actual)
            }
            RpcError::UnresolvableType { type_tag } => type_tag.clone(),
            other => other.to_string(),
        };
        Failure {
            system: true,
            ..Failure::new(self.kind(), message)
        }
    }

    /// Rebuild an error from a failure received from a remote server.
    ///
    /// Resolution and payload conditions get their typed variant back so a
    /// remote caller can match on them the same way a local caller does.
    /// Failures raised by a procedure are never reinterpreted, whatever
    /// their kind, so they come back exactly as a local call returns them.
    pub fn from_failure(failure: Failure) -> Self {
        if !failure.system {
            return RpcError::Application(failure);
        }

        let restored = match failure.kind.as_str() {
            "TypeNotFound" => Some(RpcError::TypeNotFound {
                type_name: failure.message.clone(),
            }),
            "ProcedureNotFound" => parse_procedure(&failure.message).map(
                |(type_name, method_name, signature)| RpcError::ProcedureNotFound {
                    type_name,
                    method_name,
                    signature,
                },
            ),
            "TypeMismatch" => failure
                .message
                .strip_prefix("expected ")
                .and_then(|rest| rest.split_once(", got "))
                .map(|(expected, actual)| RpcError::TypeMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                }),
            "UnresolvableType" => Some(RpcError::UnresolvableType {
                type_tag: failure.message.clone(),
            }),
            _ => None,
        };
        restored.unwrap_or(RpcError::Application(failure))
    }

    /// Check if this error should trigger another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::ServerUnresponsive { .. })
    }

    /// The application failure, if the invoked procedure raised one.
    pub fn as_application(&self) -> Option<&Failure> {
        match self {
            RpcError::Application(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Split `Type.method(a,b)` back into its parts.
fn parse_procedure(subject: &str) -> Option<(String, String, String)> {
    let (head, signature) = subject.strip_suffix(')')?.split_once('(')?;
    let (type_name, method_name) = head.rsplit_once('.')?;
    Some((
        type_name.to_string(),
        method_name.to_string(),
        signature.to_string(),
    ))
}

/// A failure raised by a procedure, in a form that can cross the network.
///
/// `kind` names the failure class (for example `"IllegalArgument"`),
/// `message` is the human readable description and `cause` optionally
/// chains the failure that triggered this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<Failure>>,
    /// Set only by [`RpcError::to_failure`] for conditions raised by the
    /// RPC machinery rather than by a procedure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    system: bool,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            cause: None,
            system: false,
        }
    }

    /// Whether this failure describes an RPC condition (unknown procedure,
    /// undecodable payload, ...) rather than one raised by a procedure.
    pub fn is_system(&self) -> bool {
        self.system
    }

    /// Attach the failure that caused this one.
    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {})", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {}
