//! Proxy reset: the top-level restart pass
//!
//! A pass runs in two phases. Platform workloads go first with no limits and
//! must all succeed. Customer workloads follow within the configured limits;
//! what could not be restarted is reported as warnings, and whatever did not
//! fit into this pass is signalled through `has_more_pods`.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use meshward_common::retry::RetryConfig;
use meshward_common::{Error, Result};

use crate::client::SidecarKubeClient;
use crate::pods::{PodSelector, RestartLimits};
use crate::predicates::{
    CustomImageSkipPredicate, CustomerWorkloadPredicate, ExpectedResources,
    ImageResourcesPredicate, PlatformWorkloadPredicate, PlatformWorkloads, PredicateRef,
    SidecarImage,
};
use crate::restart::{ActionRestarter, RestartWarning};

/// Workloads named in a warning summary before the rest is only counted
const SUMMARY_WORKLOAD_LIMIT: usize = 5;

/// Result of a restart pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestartReport {
    /// Objects whose sidecars could not be restarted
    pub warnings: Vec<RestartWarning>,
    /// Whether pods remain that this pass did not get to
    pub has_more_pods: bool,
}

impl RestartReport {
    /// Human-readable summary of the warnings, `None` without warnings
    pub fn summary(&self) -> Option<String> {
        let message = build_warning_message(&self.warnings);
        (!message.is_empty()).then_some(message)
    }
}

/// Summarise warnings as
/// `The sidecars of the following workloads could not be restarted: ns/a, ns/b`,
/// naming at most five workloads and counting the rest.
///
/// Returns an empty string when there are no warnings.
pub fn build_warning_message(warnings: &[RestartWarning]) -> String {
    if warnings.is_empty() {
        return String::new();
    }

    for warning in warnings {
        info!(
            name = %warning.name,
            namespace = %warning.namespace,
            kind = %warning.kind,
            message = %warning.message,
            "proxy reset warning"
        );
    }

    let named: Vec<String> = warnings
        .iter()
        .take(SUMMARY_WORKLOAD_LIMIT)
        .map(|w| format!("{}/{}", w.namespace, w.name))
        .collect();
    let mut message = format!(
        "The sidecars of the following workloads could not be restarted: {}",
        named.join(", ")
    );
    let remaining = warnings.len() - named.len();
    if remaining > 0 {
        message.push_str(&format!(" and {remaining} additional workload(s)"));
    }
    message
}

/// Restarts outdated sidecars across the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProxyRestarter: Send + Sync {
    /// Restart every sidecar whose image or resources drifted, plus those
    /// selected by the extra `predicates`
    async fn restart_proxies(
        &self,
        expected_image: &SidecarImage,
        expected_resources: &ExpectedResources,
        predicates: Vec<PredicateRef>,
    ) -> Result<RestartReport>;

    /// Restart the sidecars of pods selected by exactly `predicates`
    async fn restart_with_predicates(
        &self,
        predicates: Vec<PredicateRef>,
        limits: RestartLimits,
        fail_on_error: bool,
    ) -> Result<RestartReport>;
}

/// [`ProxyRestarter`] backed by the cluster
pub struct ProxyRestart {
    selector: PodSelector,
    restarter: ActionRestarter,
    platform: Arc<PlatformWorkloads>,
    customer_limits: RestartLimits,
}

impl ProxyRestart {
    /// Create a restarter with the default retry policy
    pub fn new(
        client: Arc<dyn SidecarKubeClient>,
        platform: PlatformWorkloads,
        customer_limits: RestartLimits,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_retry(
            client,
            platform,
            customer_limits,
            RetryConfig::kube_default(),
            cancel,
        )
    }

    /// Create a restarter with a custom retry policy
    pub fn with_retry(
        client: Arc<dyn SidecarKubeClient>,
        platform: PlatformWorkloads,
        customer_limits: RestartLimits,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            selector: PodSelector::new(client.clone(), retry.clone(), cancel.clone()),
            restarter: ActionRestarter::new(client, retry, cancel),
            platform: Arc::new(platform),
            customer_limits,
        }
    }

    async fn restart_platform_proxies(&self, mut predicates: Vec<PredicateRef>) -> Result<()> {
        predicates.push(Arc::new(PlatformWorkloadPredicate::new(self.platform.clone())));

        let report = self
            .restart_with_predicates(predicates, RestartLimits::unlimited(), true)
            .await?;
        if let Some(summary) = report.summary() {
            error!(message = %summary, "failed to restart platform proxies");
            return Err(Error::internal_with_context("platform-restart", summary));
        }

        info!("platform proxy restart completed");
        Ok(())
    }

    async fn restart_customer_proxies(
        &self,
        mut predicates: Vec<PredicateRef>,
    ) -> Result<RestartReport> {
        predicates.push(Arc::new(CustomerWorkloadPredicate::new(self.platform.clone())));

        let report = self
            .restart_with_predicates(predicates, self.customer_limits, false)
            .await?;
        if report.has_more_pods {
            info!(
                warnings = report.warnings.len(),
                "customer proxy restart only partially completed"
            );
        } else {
            info!(
                warnings = report.warnings.len(),
                "customer proxy restart completed"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl ProxyRestarter for ProxyRestart {
    #[instrument(skip(self, expected_resources, predicates), fields(image = %expected_image))]
    async fn restart_proxies(
        &self,
        expected_image: &SidecarImage,
        expected_resources: &ExpectedResources,
        predicates: Vec<PredicateRef>,
    ) -> Result<RestartReport> {
        let mut base: Vec<PredicateRef> = vec![
            Arc::new(CustomImageSkipPredicate),
            Arc::new(ImageResourcesPredicate::new(
                expected_image.clone(),
                expected_resources.clone(),
            )),
        ];
        base.extend(predicates);

        self.restart_platform_proxies(base.clone())
            .await
            .inspect_err(|e| error!(error = %e, "failed to restart platform proxies"))?;

        self.restart_customer_proxies(base)
            .await
            .inspect_err(|e| error!(error = %e, "failed to restart customer proxies"))
    }

    async fn restart_with_predicates(
        &self,
        predicates: Vec<PredicateRef>,
        limits: RestartLimits,
        fail_on_error: bool,
    ) -> Result<RestartReport> {
        let selected = self
            .selector
            .get_pods_to_restart(&predicates, limits)
            .await
            .inspect_err(|e| error!(error = %e, "getting pods to restart failed"))?;

        let warnings = self
            .restarter
            .restart(&selected.pods, fail_on_error)
            .await
            .inspect_err(|e| error!(error = %e, "restarting pods failed"))?;

        Ok(RestartReport {
            warnings,
            has_more_pods: selected.has_more(),
        })
    }
}
