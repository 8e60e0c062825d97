//! Mesh-wide proxy configuration changes

use k8s_openapi::api::core::v1::Pod;

use meshward_common::mesh;

use super::{annotations, SidecarProxyPredicate};

/// Optional predicate matching every pod when a mesh-wide proxy setting
/// changed between the last applied and the desired configuration.
///
/// Settings are tri-state: unset and explicitly set are different values, so
/// going from unset to `false` still rolls the sidecars.
#[derive(Clone, Copy, Debug)]
pub struct ConfigChangePredicate {
    setting: &'static str,
    applied: Option<bool>,
    desired: Option<bool>,
}

impl ConfigChangePredicate {
    /// Create a predicate for an arbitrary boolean proxy setting
    pub fn new(setting: &'static str, applied: Option<bool>, desired: Option<bool>) -> Self {
        Self {
            setting,
            applied,
            desired,
        }
    }

    /// DNS proxying toggled
    pub fn dns_proxying(applied: Option<bool>, desired: Option<bool>) -> Self {
        Self::new("dns-proxying", applied, desired)
    }

    /// Compatibility mode toggled
    pub fn compatibility_mode(applied: bool, desired: bool) -> Self {
        Self::new("compatibility-mode", Some(applied), Some(desired))
    }

    /// Name of the setting this predicate watches
    pub fn setting(&self) -> &'static str {
        self.setting
    }

    /// Whether the setting differs between applied and desired configuration
    pub fn is_changed(&self) -> bool {
        self.applied != self.desired
    }
}

impl SidecarProxyPredicate for ConfigChangePredicate {
    fn matches(&self, _pod: &Pod) -> bool {
        self.is_changed()
    }

    fn must_match(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "config-change"
    }
}

/// Optional predicate matching pods whose Prometheus scrape annotations do
/// not yet reflect a toggled metrics-merging setting
#[derive(Clone, Debug)]
pub struct PrometheusMergePredicate {
    applied: bool,
    desired: bool,
    status_port: String,
}

impl PrometheusMergePredicate {
    /// Create the predicate for the default sidecar status port
    pub fn new(applied: bool, desired: bool) -> Self {
        Self::with_status_port(applied, desired, mesh::DEFAULT_STATUS_PORT)
    }

    /// Create the predicate for a custom sidecar status port
    pub fn with_status_port(applied: bool, desired: bool, status_port: u16) -> Self {
        Self {
            applied,
            desired,
            status_port: status_port.to_string(),
        }
    }
}

impl SidecarProxyPredicate for PrometheusMergePredicate {
    fn matches(&self, pod: &Pod) -> bool {
        if self.applied == self.desired {
            return false;
        }

        let annotations = annotations(pod);
        let has_merge_path = annotations
            .get(mesh::PROMETHEUS_PATH_ANNOTATION)
            .is_some_and(|path| path == mesh::PROMETHEUS_MERGE_PATH);
        let has_merge_port = annotations
            .get(mesh::PROMETHEUS_PORT_ANNOTATION)
            .is_some_and(|port| *port == self.status_port);

        if self.desired {
            !has_merge_path || !has_merge_port
        } else {
            has_merge_path || has_merge_port
        }
    }

    fn must_match(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "prometheus-merge"
    }
}
