//! Cluster access for the restart engine
//!
//! Every API call the engine makes goes through [`SidecarKubeClient`], so the
//! selector, action factory and executor can be exercised against mocks or an
//! in-memory cluster.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use tracing::debug;

use meshward_common::Error;

use crate::restart::RolloutKind;

/// One page of a pod listing
#[derive(Clone, Debug, Default)]
pub struct PodPage {
    /// Pods on this page, in API order
    pub items: Vec<Pod>,
    /// Token for the next page, `None` on the last page
    pub continue_token: Option<String>,
}

/// Parameters of a single pod list call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodListQuery {
    /// Field selector, e.g. `status.phase=Running`
    pub field_selector: Option<String>,
    /// Page size, `None` for the server default
    pub limit: Option<u32>,
    /// Continuation token from the previous page
    pub continue_token: Option<String>,
}

/// The parts of a rollout target the executor needs before patching it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadSnapshot {
    /// resourceVersion the patch is guarded by
    pub resource_version: Option<String>,
    /// Current pod template annotations
    pub template_annotations: BTreeMap<String, String>,
}

/// Trait abstracting the Kubernetes calls made while restarting sidecars
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SidecarKubeClient: Send + Sync {
    /// List one page of pods across all namespaces
    async fn list_pods(&self, query: &PodListQuery) -> Result<PodPage, Error>;

    /// Get a ReplicaSet, `None` if it does not exist
    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicaSet>, Error>;

    /// List all ReplicaSets in a namespace
    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, Error>;

    /// Get a rollout target, `None` if it does not exist
    async fn get_workload(
        &self,
        kind: RolloutKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadSnapshot>, Error>;

    /// Apply a strategic merge patch to a rollout target
    async fn patch_workload(
        &self,
        kind: RolloutKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Delete a pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct SidecarKubeClientImpl {
    client: Client,
}

impl SidecarKubeClientImpl {
    /// Create a new SidecarKubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn snapshot<K>(
        &self,
        namespace: &str,
        name: &str,
        template: impl Fn(&K) -> Option<&PodTemplateSpec> + Send,
    ) -> Result<Option<WorkloadSnapshot>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let Some(object) = api.get_opt(name).await? else {
            return Ok(None);
        };
        let template_annotations = template(&object)
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.annotations.clone())
            .unwrap_or_default();
        Ok(Some(WorkloadSnapshot {
            resource_version: object.meta().resource_version.clone(),
            template_annotations,
        }))
    }

    async fn patch<K>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SidecarKubeClient for SidecarKubeClientImpl {
    async fn list_pods(&self, query: &PodListQuery) -> Result<PodPage, Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let mut params = ListParams::default();
        if let Some(selector) = &query.field_selector {
            params = params.fields(selector);
        }
        if let Some(limit) = query.limit {
            params = params.limit(limit);
        }
        if let Some(token) = &query.continue_token {
            params = params.continue_token(token);
        }

        let list = api.list(&params).await?;
        let continue_token = list.metadata.continue_.filter(|t| !t.is_empty());
        debug!(
            pods = list.items.len(),
            has_more = continue_token.is_some(),
            "listed pod page"
        );
        Ok(PodPage {
            items: list.items,
            continue_token,
        })
    }

    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicaSet>, Error> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, Error> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_workload(
        &self,
        kind: RolloutKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadSnapshot>, Error> {
        match kind {
            RolloutKind::DaemonSet => {
                self.snapshot::<DaemonSet>(namespace, name, |ds| {
                    ds.spec.as_ref().map(|s| &s.template)
                })
                .await
            }
            RolloutKind::Deployment => {
                self.snapshot::<Deployment>(namespace, name, |d| {
                    d.spec.as_ref().map(|s| &s.template)
                })
                .await
            }
            RolloutKind::ReplicaSet => {
                self.snapshot::<ReplicaSet>(namespace, name, |rs| {
                    rs.spec.as_ref().and_then(|s| s.template.as_ref())
                })
                .await
            }
            RolloutKind::StatefulSet => {
                self.snapshot::<StatefulSet>(namespace, name, |ss| {
                    ss.spec.as_ref().map(|s| &s.template)
                })
                .await
            }
        }
    }

    async fn patch_workload(
        &self,
        kind: RolloutKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        match kind {
            RolloutKind::DaemonSet => self.patch::<DaemonSet>(namespace, name, patch).await,
            RolloutKind::Deployment => self.patch::<Deployment>(namespace, name, patch).await,
            RolloutKind::ReplicaSet => self.patch::<ReplicaSet>(namespace, name, patch).await,
            RolloutKind::StatefulSet => self.patch::<StatefulSet>(namespace, name, patch).await,
        }
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
