//! Restart actions: owner resolution, deduplication and execution
//!
//! For every selected pod the factory decides what to act on (the owning
//! workload, the pod itself, or nothing with a warning), and the executor
//! carries it out. Each object is acted on at most once per pass, so a
//! Deployment with fifty outdated pods is patched once.

mod action;
mod executor;
mod factory;

use std::collections::HashSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use meshward_common::retry::RetryConfig;
use meshward_common::{Error, Result};

use crate::client::SidecarKubeClient;

pub use action::{ActionObject, RestartAction, RolloutKind, POD_KIND};
pub use executor::ActionExecutor;
pub use factory::build_action;

/// A sidecar that could not be restarted, and why
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestartWarning {
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
    /// Object kind
    pub kind: String,
    /// Reason
    pub message: String,
}

impl RestartWarning {
    /// Create a warning about an action object
    pub fn new(object: &ActionObject, message: impl Into<String>) -> Self {
        Self {
            name: object.name.clone(),
            namespace: object.namespace.clone(),
            kind: object.kind.clone(),
            message: message.into(),
        }
    }
}

/// Turns selected pods into restart actions and runs each distinct one once
pub struct ActionRestarter {
    client: Arc<dyn SidecarKubeClient>,
    executor: ActionExecutor,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl ActionRestarter {
    /// Create a restarter
    pub fn new(
        client: Arc<dyn SidecarKubeClient>,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor: ActionExecutor::new(client.clone(), retry.clone()),
            client,
            retry,
            cancel,
        }
    }

    /// Restart the sidecars of `pods` through their owners.
    ///
    /// With `fail_on_error` the first failing action aborts the pass and its
    /// error is returned. Otherwise failures are logged and reported as
    /// warnings alongside the ones the actions produce themselves.
    /// Cancellation and rollouts of unsupported kinds always abort.
    #[instrument(skip(self, pods), fields(pods = pods.len()))]
    pub async fn restart(&self, pods: &[Pod], fail_on_error: bool) -> Result<Vec<RestartWarning>> {
        let mut warnings = Vec::new();
        let mut processed: HashSet<ActionObject> = HashSet::new();

        for pod in pods {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let action = match build_action(self.client.as_ref(), &self.retry, pod).await {
                Ok(action) => action,
                Err(e) => {
                    let object = ActionObject::from_pod(pod);
                    error!(
                        name = %object.name,
                        namespace = %object.namespace,
                        error = %e,
                        "creating pod restart action failed"
                    );
                    if fail_on_error || e.aborts_pass() {
                        return Err(e);
                    }
                    warnings.push(RestartWarning::new(
                        &object,
                        format!("creating pod restart action failed: {e}"),
                    ));
                    continue;
                }
            };

            if !processed.insert(action.object().clone()) {
                debug!(object = %action.object(), "already handled in this pass");
                continue;
            }

            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.executor.run(&action).await {
                Ok(produced) => warnings.extend(produced),
                Err(e) => {
                    let object = action.object();
                    error!(
                        name = %object.name,
                        namespace = %object.namespace,
                        kind = %object.kind,
                        action = action.name(),
                        error = %e,
                        "running pod restart action failed"
                    );
                    if fail_on_error || e.aborts_pass() {
                        return Err(e);
                    }
                    warnings.push(RestartWarning::new(object, e.to_string()));
                }
            }
        }

        Ok(warnings)
    }
}
