//! Test support: pod fixtures and an in-memory cluster

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetStatus};
use k8s_openapi::api::core::v1::{
    Container, Pod, PodCondition, PodSpec, PodStatus, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};

use meshward_common::error::api_error;
use meshward_common::{mesh, Error};

use crate::client::{PodListQuery, PodPage, SidecarKubeClient, WorkloadSnapshot};
use crate::predicates::ExpectedResources;
use crate::restart::RolloutKind;

/// Resources every [`PodBuilder`] sidecar gets unless overridden
pub fn default_resources() -> ExpectedResources {
    ExpectedResources::parse("10m", "192Mi", "1000m", "1024Mi").unwrap()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SidecarMode {
    Regular,
    Native,
    Gateway,
    Absent,
}

/// Builds a ready, running pod with an injected `istio-proxy` sidecar
pub struct PodBuilder {
    name: String,
    namespace: String,
    phase: String,
    conditions: Vec<(String, String)>,
    annotations: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    owners: Vec<OwnerReference>,
    sidecar: SidecarMode,
    sidecar_image: String,
    requests: BTreeMap<String, Quantity>,
    limits: BTreeMap<String, Quantity>,
    terminating: bool,
}

impl PodBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        let quantities = |pairs: [(&str, &str); 2]| {
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                .collect()
        };
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            phase: "Running".to_string(),
            conditions: vec![("Ready".to_string(), "True".to_string())],
            annotations: BTreeMap::from([(
                mesh::SIDECAR_STATUS_ANNOTATION.to_string(),
                "{\"containers\":[\"istio-proxy\"]}".to_string(),
            )]),
            labels: BTreeMap::new(),
            owners: Vec::new(),
            sidecar: SidecarMode::Regular,
            sidecar_image: "istio/proxyv2:1.11.0".to_string(),
            requests: quantities([("cpu", "10m"), ("memory", "192Mi")]),
            limits: quantities([("cpu", "1000m"), ("memory", "1024Mi")]),
            terminating: false,
        }
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.phase = phase.to_string();
        self
    }

    pub fn condition(mut self, type_: &str, status: &str) -> Self {
        self.conditions.retain(|(t, _)| t != type_);
        self.conditions.push((type_.to_string(), status.to_string()));
        self
    }

    pub fn terminating(mut self) -> Self {
        self.terminating = true;
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn owner(mut self, kind: &str, name: &str, uid: &str) -> Self {
        self.owners.push(owner_reference(kind, name, uid));
        self
    }

    /// Plain pod: no sidecar container, no injection annotation
    pub fn without_sidecar(mut self) -> Self {
        self.sidecar = SidecarMode::Absent;
        self.without_status_annotation()
    }

    pub fn without_status_annotation(mut self) -> Self {
        self.annotations.remove(mesh::SIDECAR_STATUS_ANNOTATION);
        self
    }

    /// Gateway pod: `istio-proxy` is its only container
    pub fn gateway(mut self) -> Self {
        self.sidecar = SidecarMode::Gateway;
        self
    }

    pub fn native_sidecar(mut self) -> Self {
        self.sidecar = SidecarMode::Native;
        self
    }

    pub fn sidecar_image(mut self, image: &str) -> Self {
        self.sidecar_image = image.to_string();
        self
    }

    pub fn sidecar_resource_request(mut self, resource: &str, value: &str) -> Self {
        self.requests
            .insert(resource.to_string(), Quantity(value.to_string()));
        self
    }

    pub fn sidecar_resource_limit(mut self, resource: &str, value: &str) -> Self {
        self.limits
            .insert(resource.to_string(), Quantity(value.to_string()));
        self
    }

    pub fn build(self) -> Pod {
        let app = Container {
            name: "app".to_string(),
            image: Some("nginx:1.27".to_string()),
            ..Default::default()
        };
        let mut sidecar = Container {
            name: mesh::SIDECAR_CONTAINER_NAME.to_string(),
            image: Some(self.sidecar_image),
            resources: Some(ResourceRequirements {
                requests: Some(self.requests),
                limits: Some(self.limits),
                ..Default::default()
            }),
            ..Default::default()
        };

        let (containers, init_containers) = match self.sidecar {
            SidecarMode::Regular => (vec![app, sidecar], None),
            SidecarMode::Native => {
                sidecar.restart_policy = Some("Always".to_string());
                (vec![app], Some(vec![sidecar]))
            }
            SidecarMode::Gateway => (vec![sidecar], None),
            SidecarMode::Absent => (vec![app], None),
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                annotations: Some(self.annotations),
                labels: Some(self.labels),
                owner_references: (!self.owners.is_empty()).then_some(self.owners),
                deletion_timestamp: self.terminating.then(|| Time(Utc::now())),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers,
                init_containers,
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(self.phase),
                conditions: Some(
                    self.conditions
                        .into_iter()
                        .map(|(type_, status)| PodCondition {
                            type_,
                            status,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
        }
    }
}

fn owner_reference(kind: &str, name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        ..Default::default()
    }
}

/// ReplicaSet owned by the Deployment `(name, uid)`, or bare when `owner` is `None`
pub fn replica_set(
    name: &str,
    namespace: &str,
    owner: Option<(&str, &str)>,
    replicas: i32,
    ready_replicas: i32,
) -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: owner
                .map(|(owner, uid)| vec![owner_reference("Deployment", owner, uid)]),
            ..Default::default()
        },
        status: Some(ReplicaSetStatus {
            replicas,
            ready_replicas: Some(ready_replicas),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// In-memory cluster
// =============================================================================

#[derive(Default)]
struct FakeWorkload {
    resource_version: u64,
    annotations: BTreeMap<String, String>,
    patches: usize,
}

type WorkloadKey = (RolloutKind, String, String);

#[derive(Default)]
struct State {
    pods: Vec<Pod>,
    replica_sets: Vec<ReplicaSet>,
    workloads: HashMap<WorkloadKey, FakeWorkload>,
    deleted: Vec<String>,
    list_calls: usize,
}

/// In-memory cluster implementing [`SidecarKubeClient`]
///
/// Pod listings are paginated with the offset as continuation token.
/// Patches are checked against the workload's resourceVersion.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key(kind: RolloutKind, namespace: &str, name: &str) -> WorkloadKey {
    (kind, namespace.to_string(), name.to_string())
}

fn is_in(meta: &ObjectMeta, namespace: &str, name: &str) -> bool {
    meta.namespace.as_deref() == Some(namespace) && meta.name.as_deref() == Some(name)
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state.lock().unwrap().pods.push(pod);
    }

    pub fn replace_pods(&self, pods: Vec<Pod>) {
        self.state.lock().unwrap().pods = pods;
    }

    pub fn add_replica_set(&self, replica_set: ReplicaSet) {
        self.state.lock().unwrap().replica_sets.push(replica_set);
    }

    pub fn add_workload(&self, kind: RolloutKind, namespace: &str, name: &str) {
        self.state.lock().unwrap().workloads.insert(
            key(kind, namespace, name),
            FakeWorkload {
                resource_version: 1,
                ..Default::default()
            },
        );
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn patch_count(&self, kind: RolloutKind, namespace: &str, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .workloads
            .get(&key(kind, namespace, name))
            .map_or(0, |w| w.patches)
    }

    pub fn total_patches(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .workloads
            .values()
            .map(|w| w.patches)
            .sum()
    }

    pub fn template_annotations(
        &self,
        kind: RolloutKind,
        namespace: &str,
        name: &str,
    ) -> BTreeMap<String, String> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .get(&key(kind, namespace, name))
            .map(|w| w.annotations.clone())
            .unwrap_or_default()
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Patches plus deletions
    pub fn mutation_count(&self) -> usize {
        self.total_patches() + self.state.lock().unwrap().deleted.len()
    }
}

#[async_trait]
impl SidecarKubeClient for FakeCluster {
    async fn list_pods(&self, query: &PodListQuery) -> Result<PodPage, Error> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;

        let running_only = query.field_selector.as_deref() == Some("status.phase=Running");
        let matching: Vec<&Pod> = state
            .pods
            .iter()
            .filter(|p| {
                !running_only
                    || p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
            })
            .collect();

        let start: usize = match &query.continue_token {
            Some(token) => token
                .parse()
                .map_err(|_| Error::from(api_error(410, "Expired", "bad continue token")))?,
            None => 0,
        };
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        let end = start.saturating_add(limit).min(matching.len());
        let items = matching
            .get(start..end)
            .map(|page| page.iter().map(|p| (*p).clone()).collect())
            .unwrap_or_default();

        Ok(PodPage {
            items,
            continue_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicaSet>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .replica_sets
            .iter()
            .find(|rs| is_in(&rs.metadata, namespace, name))
            .cloned())
    }

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .replica_sets
            .iter()
            .filter(|rs| rs.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn get_workload(
        &self,
        kind: RolloutKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadSnapshot>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .workloads
            .get(&key(kind, namespace, name))
            .map(|w| WorkloadSnapshot {
                resource_version: Some(w.resource_version.to_string()),
                template_annotations: w.annotations.clone(),
            }))
    }

    async fn patch_workload(
        &self,
        kind: RolloutKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let Some(workload) = state.workloads.get_mut(&key(kind, namespace, name)) else {
            return Err(api_error(404, "NotFound", format!("{kind} {name} not found")).into());
        };

        if let Some(expected) = patch["metadata"]["resourceVersion"].as_str() {
            if expected != workload.resource_version.to_string() {
                return Err(api_error(409, "Conflict", "the object has been modified").into());
            }
        }
        if let Some(annotations) = patch["spec"]["template"]["metadata"]["annotations"].as_object()
        {
            for (k, v) in annotations {
                workload
                    .annotations
                    .insert(k.clone(), v.as_str().unwrap_or_default().to_string());
            }
        }
        workload.resource_version += 1;
        workload.patches += 1;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let Some(index) = state.pods.iter().position(|p| is_in(&p.metadata, namespace, name))
        else {
            return Err(api_error(404, "NotFound", format!("pods \"{name}\" not found")).into());
        };
        state.pods.remove(index);
        state.deleted.push(format!("{namespace}/{name}"));
        Ok(())
    }
}
