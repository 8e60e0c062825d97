//! Sidecar removal after the mesh was uninstalled
//!
//! Once the injection webhook is gone, restarting an injected pod brings it
//! back without a sidecar. The sweep restarts every injected pod through the
//! same action engine as a proxy reset.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use meshward_common::retry::RetryConfig;
use meshward_common::Result;

use crate::client::SidecarKubeClient;
use crate::pods::PodSelector;
use crate::restart::{ActionRestarter, RestartWarning};

/// Restart every pod that still carries an injected sidecar.
///
/// Failures are reported as warnings; only listing errors and cancellation
/// abort the sweep.
#[instrument(skip_all)]
pub async fn remove_sidecars(
    client: Arc<dyn SidecarKubeClient>,
    retry: RetryConfig,
    cancel: CancellationToken,
) -> Result<Vec<RestartWarning>> {
    let selector = PodSelector::new(client.clone(), retry.clone(), cancel.clone());
    let pods = selector.get_all_injected_pods().await?;
    info!(pods = pods.len(), "removing sidecars from injected pods");

    ActionRestarter::new(client, retry, cancel)
        .restart(&pods, false)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restart::RolloutKind;
    use crate::testing::{FakeCluster, PodBuilder};
    use meshward_common::RESTARTED_AT_ANNOTATION;

    #[tokio::test]
    async fn injected_deployment_pod_triggers_rollout() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(RolloutKind::Deployment, "test-ns", "owner");
        cluster.add_pod(
            PodBuilder::new("owner-0", "test-ns")
                .owner("Deployment", "owner", "uid-owner")
                .build(),
        );

        let warnings = remove_sidecars(
            cluster.clone(),
            RetryConfig::immediate(3),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(warnings.is_empty());
        assert!(cluster
            .template_annotations(RolloutKind::Deployment, "test-ns", "owner")
            .contains_key(RESTARTED_AT_ANNOTATION));
    }

    #[tokio::test]
    async fn pod_without_sidecar_is_left_alone() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(RolloutKind::Deployment, "test-ns", "owner");
        cluster.add_pod(
            PodBuilder::new("owner-0", "test-ns")
                .owner("Deployment", "owner", "uid-owner")
                .without_sidecar()
                .build(),
        );

        let warnings = remove_sidecars(
            cluster.clone(),
            RetryConfig::immediate(3),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(warnings.is_empty());
        assert_eq!(cluster.mutation_count(), 0);
    }

    #[tokio::test]
    async fn orphaned_injected_pod_is_reported() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod(PodBuilder::new("stray", "test-ns").phase("Pending").build());

        let warnings = remove_sidecars(
            cluster.clone(),
            RetryConfig::immediate(3),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].name, "stray");
    }
}
