//! Owner resolution: which object to act on for a pod

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;

use meshward_common::retry::{retry_transient, RetryConfig};
use meshward_common::Result;

use super::action::{
    ActionObject, RestartAction, NOT_READY_REPLICA_SET_MESSAGE, OWNED_BY_JOB_MESSAGE,
    OWNER_NOT_FOUND_MESSAGE,
};
use crate::client::SidecarKubeClient;

const JOB_KIND: &str = "Job";
const REPLICA_SET_KIND: &str = "ReplicaSet";
const REPLICATION_CONTROLLER_KIND: &str = "ReplicationController";

fn first_owner(owners: Option<&Vec<OwnerReference>>) -> Option<&OwnerReference> {
    owners.and_then(|o| o.first())
}

/// Decide the restart action for a pod by looking at its owner chain.
///
/// Only ReplicaSet owners need cluster lookups: the ReplicaSet itself, and
/// its siblings under the same owner.
pub async fn build_action(
    client: &dyn SidecarKubeClient,
    retry: &RetryConfig,
    pod: &Pod,
) -> Result<RestartAction> {
    let Some(owner) = first_owner(pod.metadata.owner_references.as_ref()) else {
        return Ok(RestartAction::warn(
            ActionObject::from_pod(pod),
            OWNER_NOT_FOUND_MESSAGE,
        ));
    };
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();

    match owner.kind.as_str() {
        JOB_KIND => Ok(RestartAction::warn(
            ActionObject::new(owner.name.as_str(), namespace, JOB_KIND),
            OWNED_BY_JOB_MESSAGE,
        )),
        REPLICA_SET_KIND => replica_set_action(client, retry, pod, namespace, &owner.name).await,
        REPLICATION_CONTROLLER_KIND => Ok(RestartAction::Delete(ActionObject::from_pod(pod))),
        kind => Ok(RestartAction::Rollout(ActionObject::new(
            owner.name.as_str(),
            namespace,
            kind,
        ))),
    }
}

async fn replica_set_action(
    client: &dyn SidecarKubeClient,
    retry: &RetryConfig,
    pod: &Pod,
    namespace: &str,
    replica_set_name: &str,
) -> Result<RestartAction> {
    let replica_set = retry_transient(retry, "get_replica_set", || {
        client.get_replica_set(namespace, replica_set_name)
    })
    .await?;

    let Some(replica_set) = replica_set else {
        debug!(
            namespace,
            replica_set = replica_set_name,
            "owning ReplicaSet not found"
        );
        return Ok(RestartAction::warn(
            ActionObject::from_pod(pod),
            OWNER_NOT_FOUND_MESSAGE,
        ));
    };

    // A bare ReplicaSet never replaces pods on template changes
    let Some(owner) = first_owner(replica_set.metadata.owner_references.as_ref()) else {
        return Ok(RestartAction::Delete(ActionObject::from_pod(pod)));
    };
    let object = ActionObject::new(owner.name.as_str(), namespace, owner.kind.as_str());

    // Another rollout of the same owner is still in progress
    let siblings = retry_transient(retry, "list_replica_sets", || {
        client.list_replica_sets(namespace)
    })
    .await?;
    if siblings
        .iter()
        .any(|sibling| is_unready_sibling(sibling, &replica_set, &owner.uid))
    {
        return Ok(RestartAction::warn(object, NOT_READY_REPLICA_SET_MESSAGE));
    }

    Ok(RestartAction::Rollout(object))
}

fn is_unready_sibling(candidate: &ReplicaSet, replica_set: &ReplicaSet, owner_uid: &str) -> bool {
    let same_owner = first_owner(candidate.metadata.owner_references.as_ref())
        .is_some_and(|o| o.uid == owner_uid);
    if !same_owner || candidate.metadata.name == replica_set.metadata.name {
        return false;
    }
    let Some(status) = candidate.status.as_ref() else {
        return false;
    };
    status.replicas != 0 && status.ready_replicas.unwrap_or(0) != status.replicas
}
