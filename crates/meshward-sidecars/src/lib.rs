//! Istio sidecar restart orchestration
//!
//! Finds pods whose `istio-proxy` sidecar is outdated or misconfigured and
//! restarts them through their owning workloads, once per owner per pass:
//!
//! - [`predicates`]: pure classification of a single pod
//! - [`pods`]: paginated, limited selection of pods to restart
//! - [`restart`]: owner resolution, deduplication and execution
//! - [`proxy`]: the two-phase proxy reset (platform, then customer workloads)
//! - [`remove`]: restart of every injected pod after the mesh is uninstalled
//! - [`reconcile`]: the controller-facing step mapping results to conditions

#![deny(missing_docs)]

pub mod client;
pub mod pods;
pub mod predicates;
pub mod proxy;
pub mod reconcile;
pub mod remove;
pub mod restart;

#[cfg(test)]
mod testing;

pub use client::{SidecarKubeClient, SidecarKubeClientImpl};
pub use pods::{PodSelector, PodsToRestart, RestartLimits};
pub use predicates::{ExpectedResources, PlatformWorkloads, SidecarImage, SidecarProxyPredicate};
pub use proxy::{build_warning_message, ProxyRestart, ProxyRestarter, RestartReport};
pub use reconcile::{ProxyResetSettings, RestartOutcome, SidecarsReconciler};
pub use remove::remove_sidecars;
pub use restart::{ActionRestarter, RestartWarning};
