//! Common types for meshward: errors, retry policy, and Kubernetes utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod mesh;
pub mod quantity;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Pod-template annotation used to trigger a rolling restart of a workload
///
/// The value is an RFC3339 timestamp; changing it changes the pod template
/// hash, which makes the owning controller roll its pods.
pub const RESTARTED_AT_ANNOTATION: &str = "meshward.dev/restartedAt";
