//! Executes restart actions against the cluster

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tracing::{debug, info};

use meshward_common::retry::{retry_transient, RetryConfig};
use meshward_common::{Error, Result, RESTARTED_AT_ANNOTATION};

use super::action::{ActionObject, RestartAction, RolloutKind};
use super::RestartWarning;
use crate::client::{SidecarKubeClient, WorkloadSnapshot};

/// Runs one [`RestartAction`] at a time
pub struct ActionExecutor {
    client: Arc<dyn SidecarKubeClient>,
    retry: RetryConfig,
}

impl ActionExecutor {
    /// Create an executor
    pub fn new(client: Arc<dyn SidecarKubeClient>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Execute the action, returning the warnings it produced
    pub async fn run(&self, action: &RestartAction) -> Result<Vec<RestartWarning>> {
        match action {
            RestartAction::Rollout(object) => self.rollout(object).await.map(|()| Vec::new()),
            RestartAction::Delete(object) => self.delete(object).await.map(|()| Vec::new()),
            RestartAction::Warn { object, message } => {
                info!(
                    name = %object.name,
                    namespace = %object.namespace,
                    kind = %object.kind,
                    message = %message,
                    "sidecar not restarted"
                );
                Ok(vec![RestartWarning::new(object, message.clone())])
            }
        }
    }

    async fn rollout(&self, object: &ActionObject) -> Result<()> {
        let kind: RolloutKind = object.kind.parse()?;
        info!(
            name = %object.name,
            namespace = %object.namespace,
            kind = %kind,
            "rolling out workload to restart sidecars"
        );

        // Conflicts re-fetch the object so the patch carries a fresh resourceVersion
        retry_transient(&self.retry, "rollout", || async move {
            let snapshot = self
                .client
                .get_workload(kind, &object.namespace, &object.name)
                .await?
                .ok_or_else(|| {
                    Error::internal_with_context("rollout", format!("{object} not found"))
                })?;
            if let Some(previous) = snapshot.template_annotations.get(RESTARTED_AT_ANNOTATION) {
                debug!(%object, previous = %previous, "workload was restarted before");
            }
            let patch = restart_patch(&snapshot, &restart_timestamp());
            self.client
                .patch_workload(kind, &object.namespace, &object.name, &patch)
                .await
        })
        .await
    }

    async fn delete(&self, object: &ActionObject) -> Result<()> {
        info!(
            name = %object.name,
            namespace = %object.namespace,
            "deleting pod to restart its sidecar"
        );
        let result = retry_transient(&self.retry, "delete_pod", || {
            self.client.delete_pod(&object.namespace, &object.name)
        })
        .await;
        match result {
            Err(e) if e.is_not_found() => {
                debug!(%object, "pod already gone");
                Ok(())
            }
            other => other,
        }
    }
}

fn restart_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Strategic merge patch setting the restart annotation on the pod template,
/// guarded by the snapshot's resourceVersion when it has one.
pub(crate) fn restart_patch(snapshot: &WorkloadSnapshot, timestamp: &str) -> serde_json::Value {
    let mut patch = json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        (RESTARTED_AT_ANNOTATION): timestamp
                    }
                }
            }
        }
    });
    if let Some(resource_version) = &snapshot.resource_version {
        patch["metadata"] = json!({ "resourceVersion": resource_version });
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockSidecarKubeClient;
    use crate::testing::FakeCluster;
    use meshward_common::error::api_error;

    fn executor(client: Arc<dyn SidecarKubeClient>) -> ActionExecutor {
        ActionExecutor::new(client, RetryConfig::immediate(3))
    }

    fn deployment() -> ActionObject {
        ActionObject::new("web", "shop", "Deployment")
    }

    #[test]
    fn patch_sets_restart_annotation_and_resource_version() {
        let snapshot = WorkloadSnapshot {
            resource_version: Some("42".to_string()),
            ..Default::default()
        };
        let patch = restart_patch(&snapshot, "2024-01-01T00:00:00Z");
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(
            patch["spec"]["template"]["metadata"]["annotations"][RESTARTED_AT_ANNOTATION],
            "2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn patch_without_resource_version_is_unguarded() {
        let patch = restart_patch(&WorkloadSnapshot::default(), "now");
        assert!(patch.get("metadata").is_none());
    }

    #[tokio::test]
    async fn rollout_patches_workload_template() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(RolloutKind::Deployment, "shop", "web");

        let warnings = executor(cluster.clone())
            .run(&RestartAction::Rollout(deployment()))
            .await
            .unwrap();

        assert!(warnings.is_empty());
        assert_eq!(cluster.patch_count(RolloutKind::Deployment, "shop", "web"), 1);
        assert!(cluster
            .template_annotations(RolloutKind::Deployment, "shop", "web")
            .contains_key(RESTARTED_AT_ANNOTATION));
    }

    #[tokio::test]
    async fn rollout_retries_conflicts_with_fresh_snapshot() {
        let mut mock = MockSidecarKubeClient::new();
        let mut version = 0;
        mock.expect_get_workload().times(2).returning(move |_, _, _| {
            version += 1;
            Ok(Some(WorkloadSnapshot {
                resource_version: Some(version.to_string()),
                ..Default::default()
            }))
        });
        mock.expect_patch_workload()
            .withf(|_, _, _, patch| patch["metadata"]["resourceVersion"] == "1")
            .times(1)
            .returning(|_, _, _, _| Err(api_error(409, "Conflict", "object modified").into()));
        mock.expect_patch_workload()
            .withf(|_, _, _, patch| patch["metadata"]["resourceVersion"] == "2")
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        executor(Arc::new(mock))
            .run(&RestartAction::Rollout(deployment()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rollout_of_unsupported_kind_fails_without_cluster_calls() {
        let mock = MockSidecarKubeClient::new();
        let err = executor(Arc::new(mock))
            .run(&RestartAction::Rollout(ActionObject::new(
                "nightly", "shop", "CronJob",
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedRolloutKind { .. }));
    }

    #[tokio::test]
    async fn rollout_of_missing_workload_fails() {
        let cluster = Arc::new(FakeCluster::new());
        let err = executor(cluster)
            .run(&RestartAction::Rollout(deployment()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Deployment shop/web not found"));
    }

    #[tokio::test]
    async fn delete_removes_pod() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod(crate::testing::PodBuilder::new("legacy-1", "shop").build());

        executor(cluster.clone())
            .run(&RestartAction::Delete(ActionObject::new(
                "legacy-1", "shop", "Pod",
            )))
            .await
            .unwrap();
        assert_eq!(cluster.deleted_pods(), vec!["shop/legacy-1".to_string()]);
    }

    #[tokio::test]
    async fn delete_tolerates_missing_pod() {
        let mut mock = MockSidecarKubeClient::new();
        mock.expect_delete_pod()
            .times(1)
            .returning(|_, _| Err(api_error(404, "NotFound", "pods \"gone\" not found").into()));

        executor(Arc::new(mock))
            .run(&RestartAction::Delete(ActionObject::new("gone", "shop", "Pod")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn warn_produces_warning_without_mutation() {
        let cluster = Arc::new(FakeCluster::new());
        let warnings = executor(cluster.clone())
            .run(&RestartAction::Warn {
                object: ActionObject::new("job-x", "shop", "Pod"),
                message: "owned by a Job".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            warnings,
            vec![RestartWarning {
                name: "job-x".to_string(),
                namespace: "shop".to_string(),
                kind: "Pod".to_string(),
                message: "owned by a Job".to_string(),
            }]
        );
        assert_eq!(cluster.mutation_count(), 0);
    }
}
