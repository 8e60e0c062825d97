//! Pod predicates deciding which injected pods need their sidecar restarted
//!
//! A predicate is either *required* (`must_match() == true`, every one of them
//! has to hold) or *optional* (at least one of them has to hold, if any are
//! configured). Predicates are pure: they look only at the pod already in
//! memory and never call the cluster.

mod config_change;
mod image_resources;
mod native_sidecar;
mod workload;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Container, Pod};

use meshward_common::mesh;

pub use config_change::{ConfigChangePredicate, PrometheusMergePredicate};
pub use image_resources::{
    CustomImageSkipPredicate, ExpectedResources, ImageDriftPredicate, ImageResourcesPredicate,
    ResourcesDriftPredicate,
};
pub use native_sidecar::NativeSidecarPredicate;
pub use workload::{CustomerWorkloadPredicate, PlatformWorkloadPredicate, PlatformWorkloads};

/// Classifies a single pod for sidecar restart.
pub trait SidecarProxyPredicate: Send + Sync {
    /// Whether the pod satisfies this predicate
    fn matches(&self, pod: &Pod) -> bool;

    /// Whether this predicate is required (`true`) or optional (`false`)
    fn must_match(&self) -> bool;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Shared handle to a predicate
pub type PredicateRef = Arc<dyn SidecarProxyPredicate>;

/// Evaluate a predicate set against a pod.
///
/// All required predicates must match. If at least one optional predicate is
/// configured, at least one of them must match as well; with no optional
/// predicates the decision rests on the required ones alone.
pub fn evaluate(predicates: &[PredicateRef], pod: &Pod) -> bool {
    let required_ok = predicates
        .iter()
        .filter(|p| p.must_match())
        .all(|p| p.matches(pod));
    if !required_ok {
        return false;
    }

    let mut optional = predicates.iter().filter(|p| !p.must_match()).peekable();
    if optional.peek().is_none() {
        return true;
    }
    optional.any(|p| p.matches(pod))
}

/// Names of the optional predicates the pod matches, i.e. why it was selected
pub fn matched_reasons(predicates: &[PredicateRef], pod: &Pod) -> Vec<&'static str> {
    predicates
        .iter()
        .filter(|p| !p.must_match() && p.matches(pod))
        .map(|p| p.name())
        .collect()
}

// =============================================================================
// Sidecar image
// =============================================================================

/// Desired sidecar proxy image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarImage {
    /// Image repository, e.g. `docker.io/istio/proxyv2`
    pub repository: String,
    /// Image tag, e.g. `1.24.2` or `1.24.2-distroless`
    pub tag: String,
}

impl SidecarImage {
    /// Create an image descriptor from repository and tag
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Build the proxy image for a hub and tag (`<hub>/proxyv2:<tag>`)
    pub fn for_hub(hub: &str, tag: impl Into<String>) -> Self {
        Self::new(mesh::proxy_repository(hub), tag)
    }

    /// Whether a container runs this image.
    ///
    /// Registries may be rewritten by mirrors or admission controllers, so the
    /// repository only has to appear in the image reference and the tag has
    /// to terminate it.
    pub fn matches_image(&self, image: &str) -> bool {
        image.contains(&self.repository) && image.ends_with(&self.tag)
    }
}

impl fmt::Display for SidecarImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

// =============================================================================
// Pod helpers
// =============================================================================

/// Annotations of a pod, empty if it has none
pub(crate) fn annotations(pod: &Pod) -> &BTreeMap<String, String> {
    static EMPTY: BTreeMap<String, String> = BTreeMap::new();
    pod.metadata.annotations.as_ref().unwrap_or(&EMPTY)
}

/// Whether the injection webhook has marked this pod as injected
pub fn has_sidecar_status_annotation(pod: &Pod) -> bool {
    annotations(pod).contains_key(mesh::SIDECAR_STATUS_ANNOTATION)
}

/// Whether the pod is running, not being deleted, and has every condition true
pub fn is_pod_ready(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .conditions
        .iter()
        .flatten()
        .all(|condition| condition.status == "True")
}

/// Whether the pod is a ready, injected pod eligible for restart
pub fn is_ready_with_sidecar(pod: &Pod) -> bool {
    is_pod_ready(pod) && has_sidecar_status_annotation(pod)
}

/// Sidecar containers of the pod, regular containers first, then native
/// (init container) sidecars.
pub(crate) fn sidecar_containers(pod: &Pod) -> impl Iterator<Item = &Container> {
    let spec = pod.spec.as_ref();
    let containers = spec.map(|s| s.containers.iter()).into_iter().flatten();
    let init_containers = spec
        .and_then(|s| s.init_containers.as_ref())
        .map(|c| c.iter())
        .into_iter()
        .flatten();
    containers
        .chain(init_containers)
        .filter(|c| c.name == mesh::SIDECAR_CONTAINER_NAME)
}

/// Whether the sidecar runs as a native sidecar (init container)
pub(crate) fn has_native_sidecar(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.init_containers.as_ref())
        .is_some_and(|c| c.iter().any(|c| c.name == mesh::SIDECAR_CONTAINER_NAME))
}

/// Whether the pod was injected with a sidecar next to its own containers.
///
/// Pods with a single container are skipped even when that container is
/// `istio-proxy`; those are gateways, not injected workloads.
pub fn contains_injected_sidecar(pod: &Pod) -> bool {
    let Some(spec) = pod.spec.as_ref() else {
        return false;
    };
    spec.containers.len() > 1
        && spec
            .containers
            .iter()
            .any(|c| c.name == mesh::SIDECAR_CONTAINER_NAME)
}
