//! Platform vs customer workload split

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;

use meshward_common::mesh;

use super::SidecarProxyPredicate;

/// Identifies pods belonging to the platform itself
///
/// A pod is a platform workload if it runs in one of the platform namespaces
/// or carries the platform module label (with any value).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformWorkloads {
    /// Namespaces whose pods are all platform workloads
    pub namespaces: Vec<String>,
    /// Label key marking a pod as part of a platform module
    pub label: String,
}

impl Default for PlatformWorkloads {
    fn default() -> Self {
        Self {
            namespaces: mesh::DEFAULT_PLATFORM_NAMESPACES
                .iter()
                .map(|ns| ns.to_string())
                .collect(),
            label: mesh::DEFAULT_PLATFORM_LABEL.to_string(),
        }
    }
}

impl PlatformWorkloads {
    /// Whether the pod is a platform workload
    pub fn contains(&self, pod: &Pod) -> bool {
        let in_namespace = pod
            .metadata
            .namespace
            .as_deref()
            .is_some_and(|ns| self.namespaces.iter().any(|p| p == ns));
        let labelled = pod
            .metadata
            .labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(&self.label));
        in_namespace || labelled
    }
}

/// Required predicate selecting platform workloads only
#[derive(Clone, Debug)]
pub struct PlatformWorkloadPredicate {
    workloads: Arc<PlatformWorkloads>,
}

impl PlatformWorkloadPredicate {
    /// Create the predicate
    pub fn new(workloads: Arc<PlatformWorkloads>) -> Self {
        Self { workloads }
    }
}

impl SidecarProxyPredicate for PlatformWorkloadPredicate {
    fn matches(&self, pod: &Pod) -> bool {
        self.workloads.contains(pod)
    }

    fn must_match(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "platform-workload"
    }
}

/// Required predicate selecting everything that is not a platform workload
#[derive(Clone, Debug)]
pub struct CustomerWorkloadPredicate {
    workloads: Arc<PlatformWorkloads>,
}

impl CustomerWorkloadPredicate {
    /// Create the predicate
    pub fn new(workloads: Arc<PlatformWorkloads>) -> Self {
        Self { workloads }
    }
}

impl SidecarProxyPredicate for CustomerWorkloadPredicate {
    fn matches(&self, pod: &Pod) -> bool {
        !self.workloads.contains(pod)
    }

    fn must_match(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "customer-workload"
    }
}
