//! Restart actions and the objects they act on

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Pod;

use meshward_common::Error;

/// Kind recorded for actions targeting the pod itself
pub const POD_KIND: &str = "Pod";

pub(crate) const OWNER_NOT_FOUND_MESSAGE: &str =
    "pod sidecar could not be updated because OwnerReferences was not found.";
pub(crate) const OWNED_BY_JOB_MESSAGE: &str =
    "pod sidecar could not be updated because it is owned by a Job.";
pub(crate) const NOT_READY_REPLICA_SET_MESSAGE: &str =
    "was not restarted because there exists another not ready ReplicaSet for the same object";

/// Kinds a rollout can be triggered on by patching their pod template
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RolloutKind {
    /// apps/v1 DaemonSet
    DaemonSet,
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 ReplicaSet
    ReplicaSet,
    /// apps/v1 StatefulSet
    StatefulSet,
}

impl RolloutKind {
    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutKind::DaemonSet => "DaemonSet",
            RolloutKind::Deployment => "Deployment",
            RolloutKind::ReplicaSet => "ReplicaSet",
            RolloutKind::StatefulSet => "StatefulSet",
        }
    }
}

impl FromStr for RolloutKind {
    type Err = Error;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "DaemonSet" => Ok(RolloutKind::DaemonSet),
            "Deployment" => Ok(RolloutKind::Deployment),
            "ReplicaSet" => Ok(RolloutKind::ReplicaSet),
            "StatefulSet" => Ok(RolloutKind::StatefulSet),
            other => Err(Error::unsupported_rollout_kind(other)),
        }
    }
}

impl fmt::Display for RolloutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The object a restart action targets: a pod or one of its owners
///
/// Two actions on equal objects are the same restart; only the first one of
/// a pass is executed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActionObject {
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
    /// Object kind, e.g. `Deployment` or `Pod`
    pub kind: String,
}

impl ActionObject {
    /// Create an action object
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            kind: kind.into(),
        }
    }

    /// The pod itself as the action target
    pub fn from_pod(pod: &Pod) -> Self {
        Self::new(
            pod.metadata.name.clone().unwrap_or_default(),
            pod.metadata.namespace.clone().unwrap_or_default(),
            POD_KIND,
        )
    }
}

impl fmt::Display for ActionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// What to do to get a pod's sidecar replaced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestartAction {
    /// Patch the owner's pod template so its controller rolls the pods
    Rollout(ActionObject),
    /// Delete the pod and let its controller recreate it
    Delete(ActionObject),
    /// Leave the object alone and report why
    Warn {
        /// Object the warning is about
        object: ActionObject,
        /// Reason the sidecar was not restarted
        message: String,
    },
}

impl RestartAction {
    pub(crate) fn warn(object: ActionObject, message: impl Into<String>) -> Self {
        RestartAction::Warn {
            object,
            message: message.into(),
        }
    }

    /// The object this action targets
    pub fn object(&self) -> &ActionObject {
        match self {
            RestartAction::Rollout(object) | RestartAction::Delete(object) => object,
            RestartAction::Warn { object, .. } => object,
        }
    }

    /// Short action name for logs
    pub fn name(&self) -> &'static str {
        match self {
            RestartAction::Rollout(_) => "rollout",
            RestartAction::Delete(_) => "delete",
            RestartAction::Warn { .. } => "warn",
        }
    }
}
