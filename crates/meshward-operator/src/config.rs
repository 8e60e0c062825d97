//! Command-line and environment configuration
//!
//! Every flag can also be set through the environment variable named next to
//! it, which is how the controller deployment configures the binary.

use clap::Args;

use meshward_common::mesh;
use meshward_common::Result;
use meshward_sidecars::predicates::ExpectedResources;
use meshward_sidecars::reconcile::ProxySettingsChange;
use meshward_sidecars::{PlatformWorkloads, ProxyResetSettings, RestartLimits};

/// Desired sidecar and the limits of a proxy reset pass
#[derive(Args, Debug, Clone)]
pub struct ProxyResetArgs {
    /// Installed Istio version; sidecars are expected to run the matching proxy
    #[arg(long, env = "ISTIO_VERSION")]
    pub istio_version: String,

    /// Registry hub the proxy image is pulled from
    #[arg(long, env = "ISTIO_HUB", default_value = "docker.io/istio")]
    pub hub: String,

    /// Image flavor appended to the proxy tag (e.g. distroless)
    #[arg(long, env = "ISTIO_IMAGE_FLAVOR")]
    pub flavor: Option<String>,

    /// Expected sidecar CPU request
    #[arg(long, env = "SIDECAR_CPU_REQUEST", default_value = "10m")]
    pub sidecar_cpu_request: String,

    /// Expected sidecar memory request
    #[arg(long, env = "SIDECAR_MEMORY_REQUEST", default_value = "192Mi")]
    pub sidecar_memory_request: String,

    /// Expected sidecar CPU limit
    #[arg(long, env = "SIDECAR_CPU_LIMIT", default_value = "1000m")]
    pub sidecar_cpu_limit: String,

    /// Expected sidecar memory limit
    #[arg(long, env = "SIDECAR_MEMORY_LIMIT", default_value = "1024Mi")]
    pub sidecar_memory_limit: String,

    /// Maximum customer pods restarted per pass
    #[arg(long, env = "PODS_TO_RESTART_LIMIT", default_value_t = RestartLimits::DEFAULT_PODS_TO_RESTART)]
    pub pods_to_restart_limit: usize,

    /// Page size when listing customer pods
    #[arg(long, env = "PODS_TO_LIST_LIMIT", default_value_t = RestartLimits::DEFAULT_PODS_TO_LIST)]
    pub pods_to_list_limit: u32,

    /// Namespaces whose pods are platform workloads (comma separated)
    #[arg(
        long,
        env = "PLATFORM_NAMESPACES",
        value_delimiter = ',',
        default_value = "kyma-system"
    )]
    pub platform_namespaces: Vec<String>,

    /// Label key marking pods as platform workloads
    #[arg(long, env = "PLATFORM_LABEL", default_value = mesh::DEFAULT_PLATFORM_LABEL)]
    pub platform_label: String,

    #[command(flatten)]
    pub mesh: MeshSettingsArgs,
}

/// Mesh-wide proxy settings, last applied and desired
#[derive(Args, Debug, Clone, Default)]
pub struct MeshSettingsArgs {
    /// Desired compatibility mode
    #[arg(long, env = "COMPATIBILITY_MODE")]
    pub compatibility_mode: bool,

    /// Compatibility mode of the last applied configuration
    #[arg(long, env = "APPLIED_COMPATIBILITY_MODE")]
    pub applied_compatibility_mode: bool,

    /// Desired DNS proxying (unset leaves the mesh default)
    #[arg(long, env = "DNS_PROXYING")]
    pub dns_proxying: Option<bool>,

    /// DNS proxying of the last applied configuration
    #[arg(long, env = "APPLIED_DNS_PROXYING")]
    pub applied_dns_proxying: Option<bool>,

    /// Desired Prometheus metrics merging
    #[arg(long, env = "PROMETHEUS_MERGE")]
    pub prometheus_merge: bool,

    /// Prometheus metrics merging of the last applied configuration
    #[arg(long, env = "APPLIED_PROMETHEUS_MERGE")]
    pub applied_prometheus_merge: bool,
}

impl ProxyResetArgs {
    /// Validated proxy reset settings
    pub fn settings(&self) -> Result<ProxyResetSettings> {
        let resources = ExpectedResources::parse(
            &self.sidecar_cpu_request,
            &self.sidecar_memory_request,
            &self.sidecar_cpu_limit,
            &self.sidecar_memory_limit,
        )?;
        ProxyResetSettings::new(
            self.istio_version.clone(),
            self.hub.clone(),
            self.flavor.clone(),
            resources,
        )
    }

    /// Validated customer restart limits
    pub fn limits(&self) -> Result<RestartLimits> {
        RestartLimits::new(self.pods_to_restart_limit, self.pods_to_list_limit)
    }

    /// Platform workload definition
    pub fn platform(&self) -> PlatformWorkloads {
        PlatformWorkloads {
            namespaces: self
                .platform_namespaces
                .iter()
                .map(|ns| ns.trim().to_string())
                .filter(|ns| !ns.is_empty())
                .collect(),
            label: self.platform_label.clone(),
        }
    }
}

impl MeshSettingsArgs {
    /// Settings change to evaluate
    pub fn change(&self) -> ProxySettingsChange {
        ProxySettingsChange {
            applied_compatibility_mode: self.applied_compatibility_mode,
            desired_compatibility_mode: self.compatibility_mode,
            applied_dns_proxying: self.applied_dns_proxying,
            desired_dns_proxying: self.dns_proxying,
            applied_prometheus_merge: self.applied_prometheus_merge,
            desired_prometheus_merge: self.prometheus_merge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use meshward_common::Error;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        args: ProxyResetArgs,
    }

    fn parse(extra: &[&str]) -> ProxyResetArgs {
        let mut argv = vec!["meshward", "--istio-version", "1.24.2"];
        argv.extend_from_slice(extra);
        TestCli::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn defaults_produce_valid_settings() {
        let args = parse(&[]);
        let settings = args.settings().unwrap();
        assert_eq!(
            settings.expected_image().to_string(),
            "docker.io/istio/proxyv2:1.24.2"
        );
        assert_eq!(args.limits().unwrap(), RestartLimits::default());
        assert_eq!(args.platform(), PlatformWorkloads::default());
        assert_eq!(args.mesh.change(), ProxySettingsChange::default());
    }

    #[test]
    fn flavor_and_hub_shape_the_expected_image() {
        let args = parse(&["--hub", "gcr.io/mesh", "--flavor", "distroless"]);
        assert_eq!(
            args.settings().unwrap().expected_image().to_string(),
            "gcr.io/mesh/proxyv2:1.24.2-distroless"
        );
    }

    #[test]
    fn invalid_resource_quantity_is_rejected() {
        let args = parse(&["--sidecar-memory-limit", "lots"]);
        assert!(matches!(args.settings(), Err(Error::Validation { .. })));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let args = parse(&["--pods-to-restart-limit", "0"]);
        assert!(args.limits().is_err());
    }

    #[test]
    fn platform_namespaces_split_on_commas() {
        let args = parse(&["--platform-namespaces", "kyma-system,infra, "]);
        assert_eq!(
            args.platform().namespaces,
            vec!["kyma-system".to_string(), "infra".to_string()]
        );
    }

    #[test]
    fn mesh_flags_map_to_settings_change() {
        let args = parse(&[
            "--compatibility-mode",
            "--dns-proxying",
            "true",
            "--applied-dns-proxying",
            "false",
        ]);
        let change = args.mesh.change();
        assert!(change.desired_compatibility_mode);
        assert!(!change.applied_compatibility_mode);
        assert_eq!(change.desired_dns_proxying, Some(true));
        assert_eq!(change.applied_dns_proxying, Some(false));
    }
}
