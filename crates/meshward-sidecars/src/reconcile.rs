//! Sidecar reconciliation step of the mesh controller
//!
//! Turns the installed Istio version, image hub and sidecar resources into a
//! proxy reset, and maps its result to a status condition reason and a
//! requeue decision.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use meshward_common::{Error, Result};

use crate::predicates::{
    ConfigChangePredicate, ExpectedResources, NativeSidecarPredicate, PredicateRef,
    PrometheusMergePredicate, SidecarImage,
};
use crate::proxy::ProxyRestarter;

/// Requeue delay while a pass left pods for later
pub const MORE_PODS_REQUEUE_INTERVAL: Duration = Duration::from_secs(60);

/// What the controller is told about the desired sidecar
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyResetSettings {
    /// Installed Istio version, e.g. `1.24.2`
    pub istio_version: String,
    /// Image hub the proxy is pulled from
    pub hub: String,
    /// Image flavor appended to the tag, e.g. `distroless`
    pub flavor: Option<String>,
    /// Desired sidecar resources
    pub resources: ExpectedResources,
}

impl ProxyResetSettings {
    /// Create settings, rejecting an empty version or hub
    pub fn new(
        istio_version: impl Into<String>,
        hub: impl Into<String>,
        flavor: Option<String>,
        resources: ExpectedResources,
    ) -> Result<Self> {
        let istio_version = istio_version.into();
        let hub = hub.into();
        if istio_version.trim().is_empty() {
            return Err(Error::validation_for_field(
                "istio-version",
                "must not be empty",
            ));
        }
        if hub.trim().is_empty() {
            return Err(Error::validation_for_field("hub", "must not be empty"));
        }
        Ok(Self {
            istio_version,
            hub,
            flavor: flavor.filter(|f| !f.is_empty()),
            resources,
        })
    }

    /// The proxy image every sidecar should run
    pub fn expected_image(&self) -> SidecarImage {
        let tag = match &self.flavor {
            Some(flavor) => format!("{}-{}", self.istio_version, flavor),
            None => self.istio_version.clone(),
        };
        SidecarImage::for_hub(&self.hub, tag)
    }
}

/// Mesh-wide proxy settings, last applied vs desired
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProxySettingsChange {
    /// Compatibility mode of the last applied configuration
    pub applied_compatibility_mode: bool,
    /// Desired compatibility mode
    pub desired_compatibility_mode: bool,
    /// DNS proxying of the last applied configuration
    pub applied_dns_proxying: Option<bool>,
    /// Desired DNS proxying
    pub desired_dns_proxying: Option<bool>,
    /// Prometheus metrics merging of the last applied configuration
    pub applied_prometheus_merge: bool,
    /// Desired Prometheus metrics merging
    pub desired_prometheus_merge: bool,
}

impl ProxySettingsChange {
    /// Predicates restarting the pods these changes affect
    pub fn predicates(&self) -> Vec<PredicateRef> {
        let compatibility = ConfigChangePredicate::compatibility_mode(
            self.applied_compatibility_mode,
            self.desired_compatibility_mode,
        );
        let dns = ConfigChangePredicate::dns_proxying(
            self.applied_dns_proxying,
            self.desired_dns_proxying,
        );
        for change in [compatibility, dns] {
            if change.is_changed() {
                info!(setting = change.setting(), "proxy setting changed, restarting all sidecars");
            }
        }

        vec![
            Arc::new(compatibility),
            Arc::new(dns),
            Arc::new(NativeSidecarPredicate::new(self.desired_compatibility_mode)),
            Arc::new(PrometheusMergePredicate::new(
                self.applied_prometheus_merge,
                self.desired_prometheus_merge,
            )),
        ]
    }
}

/// Outcome of a sidecar reconciliation, as reported in the status condition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Every outdated sidecar was restarted
    Succeeded,
    /// Restarts went fine but pods remain for the next pass
    PartiallySucceeded,
    /// Some workloads cannot be restarted by the operator
    ManualRestartRequired {
        /// Summary of the affected workloads
        message: String,
    },
    /// The pass failed
    Failed {
        /// Error description
        message: String,
    },
}

impl RestartOutcome {
    /// Condition reason for this outcome
    pub fn reason(&self) -> &'static str {
        match self {
            RestartOutcome::Succeeded => "ProxySidecarRestartSucceeded",
            RestartOutcome::PartiallySucceeded => "ProxySidecarRestartPartiallySucceeded",
            RestartOutcome::ManualRestartRequired { .. } => "ProxySidecarManualRestartRequired",
            RestartOutcome::Failed { .. } => "ProxySidecarRestartFailed",
        }
    }

    /// Condition message for this outcome
    pub fn message(&self) -> &str {
        match self {
            RestartOutcome::Succeeded => "Proxy sidecar restart succeeded",
            RestartOutcome::PartiallySucceeded => "Proxy sidecar restart partially succeeded",
            RestartOutcome::ManualRestartRequired { message } => message,
            RestartOutcome::Failed { message } => message,
        }
    }

    /// Whether the condition is true
    pub fn is_success(&self) -> bool {
        matches!(self, RestartOutcome::Succeeded)
    }
}

/// Outcome plus when to run again
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarsReconcileResult {
    /// Outcome of this pass
    pub outcome: RestartOutcome,
    /// Run again after this delay, `None` to wait for the next regular reconcile
    pub requeue_after: Option<Duration>,
}

/// Runs proxy resets on behalf of the mesh controller
pub struct SidecarsReconciler {
    proxy: Arc<dyn ProxyRestarter>,
    settings: ProxyResetSettings,
    predicates: Vec<PredicateRef>,
}

impl SidecarsReconciler {
    /// Create a reconciler
    pub fn new(proxy: Arc<dyn ProxyRestarter>, settings: ProxyResetSettings) -> Self {
        Self {
            proxy,
            settings,
            predicates: Vec::new(),
        }
    }

    /// Add a predicate evaluated on every pass
    pub fn add_predicate(&mut self, predicate: PredicateRef) {
        self.predicates.push(predicate);
    }

    /// Run one proxy reset pass
    #[instrument(skip(self, change), fields(version = %self.settings.istio_version))]
    pub async fn reconcile(&self, change: &ProxySettingsChange) -> SidecarsReconcileResult {
        let expected_image = self.settings.expected_image();
        info!(expected_image = %expected_image, "running proxy sidecar reset");

        let mut predicates = self.predicates.clone();
        predicates.extend(change.predicates());

        let report = match self
            .proxy
            .restart_proxies(&expected_image, &self.settings.resources, predicates)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "failed to reset proxy sidecars");
                return SidecarsReconcileResult {
                    outcome: RestartOutcome::Failed {
                        message: e.to_string(),
                    },
                    requeue_after: None,
                };
            }
        };

        let requeue_after = report.has_more_pods.then_some(MORE_PODS_REQUEUE_INTERVAL);
        let outcome = match report.summary() {
            Some(message) => {
                warn!(message = %message, "not all injected pods could be restarted");
                RestartOutcome::ManualRestartRequired { message }
            }
            None if report.has_more_pods => RestartOutcome::PartiallySucceeded,
            None => RestartOutcome::Succeeded,
        };

        SidecarsReconcileResult {
            outcome,
            requeue_after,
        }
    }
}
