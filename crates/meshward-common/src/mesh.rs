//! Istio sidecar constants
//!
//! Single source of truth for the container names, annotations and labels the
//! injection webhook writes onto pods, and the ones meshward reads back.

// =============================================================================
// Containers
// =============================================================================

/// Name of the injected Envoy sidecar container.
///
/// Appears in `spec.containers` for classic sidecars and in
/// `spec.initContainers` (with `restartPolicy: Always`) for native sidecars.
pub const SIDECAR_CONTAINER_NAME: &str = "istio-proxy";

/// Image name of the sidecar proxy under the configured hub.
pub const PROXY_IMAGE_NAME: &str = "proxyv2";

// =============================================================================
// Pod annotations
// =============================================================================

/// Written by the injection webhook on every injected pod.
pub const SIDECAR_STATUS_ANNOTATION: &str = "sidecar.istio.io/status";

/// Per-pod override of the proxy image; pods carrying it are never restarted
/// for image drift.
pub const CUSTOM_PROXY_IMAGE_ANNOTATION: &str = "sidecar.istio.io/proxyImage";

/// Per-pod override of the sidecar CPU request.
pub const PROXY_CPU_REQUEST_ANNOTATION: &str = "sidecar.istio.io/proxyCPU";

/// Per-pod override of the sidecar memory request.
pub const PROXY_MEMORY_REQUEST_ANNOTATION: &str = "sidecar.istio.io/proxyMemory";

/// Per-pod override of the sidecar CPU limit.
pub const PROXY_CPU_LIMIT_ANNOTATION: &str = "sidecar.istio.io/proxyCPULimit";

/// Per-pod override of the sidecar memory limit.
pub const PROXY_MEMORY_LIMIT_ANNOTATION: &str = "sidecar.istio.io/proxyMemoryLimit";

/// Per-pod switch between classic and native (init container) sidecars.
/// Value: "true" or "false"; absent means the mesh default applies.
pub const NATIVE_SIDECAR_ANNOTATION: &str = "sidecar.istio.io/nativeSidecar";

/// Prometheus scrape path annotation rewritten when metrics merging is on.
pub const PROMETHEUS_PATH_ANNOTATION: &str = "prometheus.io/path";

/// Prometheus scrape port annotation rewritten when metrics merging is on.
pub const PROMETHEUS_PORT_ANNOTATION: &str = "prometheus.io/port";

/// Scrape path exposed by the sidecar when metrics merging is enabled.
pub const PROMETHEUS_MERGE_PATH: &str = "/stats/prometheus";

/// Default sidecar status port serving merged metrics.
pub const DEFAULT_STATUS_PORT: u16 = 15020;

// =============================================================================
// Namespaces and labels
// =============================================================================

/// Default namespaces treated as platform workloads.
pub const DEFAULT_PLATFORM_NAMESPACES: &[&str] = &["kyma-system"];

/// Default label marking a pod as belonging to a platform module.
pub const DEFAULT_PLATFORM_LABEL: &str = "kyma-project.io/module";

/// Build the full proxy image repository for a hub
/// (e.g. `docker.io/istio` -> `docker.io/istio/proxyv2`).
pub fn proxy_repository(hub: &str) -> String {
    format!("{}/{}", hub.trim_end_matches('/'), PROXY_IMAGE_NAME)
}
