//! Error types for meshward
//!
//! Kubernetes API failures keep the underlying `kube::Error` so call sites can
//! classify them (transient, not found) without string matching.

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// HTTP status codes the API server uses for conditions worth retrying
const CONFLICT: u16 = 409;
const TOO_MANY_REQUESTS: u16 = 429;
const SERVICE_UNAVAILABLE: u16 = 503;
const GATEWAY_TIMEOUT: u16 = 504;
const NOT_FOUND: u16 = 404;

/// Main error type for meshward operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid configuration or input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field or flag (e.g. "sidecar-cpu-request")
        field: Option<String>,
    },

    /// A rollout was requested for a kind the executor cannot patch
    ///
    /// This indicates a gap in the action factory's kind coverage rather than
    /// a runtime condition, so it is never converted into a silent skip.
    #[error("kind {kind} is not supported for rollout")]
    UnsupportedRolloutKind {
        /// The offending owner kind
        kind: String,
    },

    /// The pass was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "pod-selector", "rollout")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the invalid field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an unsupported-rollout-kind error
    pub fn unsupported_rollout_kind(kind: impl Into<String>) -> Self {
        Self::UnsupportedRolloutKind { kind: kind.into() }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Status code of the API response, if this is an API error
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// Check whether the API server reported the object as missing
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(NOT_FOUND)
    }

    /// Check if this error is a transient cluster condition worth retrying
    ///
    /// Conflict, timeout, too-many-requests and service-unavailable responses
    /// are transient, and so are requests the client gave up on after its
    /// read timeout. Everything else, including other 4xx and 5xx codes, is
    /// returned to the caller on the first occurrence.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => {
                matches!(
                    ae.code,
                    CONFLICT | TOO_MANY_REQUESTS | SERVICE_UNAVAILABLE | GATEWAY_TIMEOUT
                ) || matches!(ae.reason.as_str(), "Timeout" | "ServerTimeout")
            }
            Error::Kube {
                source: kube::Error::HyperError(e),
            } => e.is_timeout() || has_timed_out_source(e),
            Error::Kube {
                source: kube::Error::Service(e),
            } => has_timed_out_source(e.as_ref()),
            _ => false,
        }
    }

    /// Errors that end the whole pass, whatever the caller's failure policy.
    ///
    /// A rollout of an unsupported kind means the action factory produced an
    /// action the executor cannot run; it is a defect, never a warning.
    pub fn aborts_pass(&self) -> bool {
        matches!(self, Error::Cancelled | Error::UnsupportedRolloutKind { .. })
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Whether an `io::ErrorKind::TimedOut` appears anywhere in the source chain
fn has_timed_out_source(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e
            .downcast_ref::<io::Error>()
            .is_some_and(|io_err| io_err.kind() == io::ErrorKind::TimedOut)
        {
            return true;
        }
        current = e.source();
    }
    false
}

/// Build a `kube::Error::Api` with the given status code and reason
///
/// Used by fakes and tests to produce the same errors the API server would.
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}
