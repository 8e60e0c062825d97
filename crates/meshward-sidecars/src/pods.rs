//! Pod selection
//!
//! Lists running pods page by page and keeps the ready, injected ones the
//! predicate set selects, until the restart limit is reached or the listing
//! runs out.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use meshward_common::kube_utils::RUNNING_PODS_FIELD_SELECTOR;
use meshward_common::retry::{retry_transient, RetryConfig};
use meshward_common::{Error, Result};

use crate::client::{PodListQuery, SidecarKubeClient};
use crate::predicates::{self, PredicateRef};

/// Bounds on a single selection pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartLimits {
    /// Stop selecting once this many pods were selected
    pub pods_to_restart_limit: usize,
    /// Page size of each list call
    pub pods_to_list_limit: u32,
}

impl RestartLimits {
    /// Restarts per pass for customer workloads
    pub const DEFAULT_PODS_TO_RESTART: usize = 30;
    /// Page size for customer workloads
    pub const DEFAULT_PODS_TO_LIST: u32 = 100;

    /// Create limits, rejecting zero values
    pub fn new(pods_to_restart_limit: usize, pods_to_list_limit: u32) -> Result<Self> {
        if pods_to_restart_limit == 0 {
            return Err(Error::validation_for_field(
                "pods-to-restart-limit",
                "must be greater than zero",
            ));
        }
        if pods_to_list_limit == 0 {
            return Err(Error::validation_for_field(
                "pods-to-list-limit",
                "must be greater than zero",
            ));
        }
        Ok(Self {
            pods_to_restart_limit,
            pods_to_list_limit,
        })
    }

    /// No practical bound; the whole cluster is processed in one pass
    pub fn unlimited() -> Self {
        Self {
            pods_to_restart_limit: usize::MAX,
            pods_to_list_limit: u32::MAX,
        }
    }
}

impl Default for RestartLimits {
    fn default() -> Self {
        Self {
            pods_to_restart_limit: Self::DEFAULT_PODS_TO_RESTART,
            pods_to_list_limit: Self::DEFAULT_PODS_TO_LIST,
        }
    }
}

/// Pods selected for restart
#[derive(Clone, Debug, Default)]
pub struct PodsToRestart {
    /// Selected pods, in list order
    pub pods: Vec<Pod>,
    /// Continuation token of the last consumed page, if the listing was not
    /// exhausted
    pub continue_token: Option<String>,
    /// Whether the restart limit cut the last page short
    pub truncated: bool,
}

impl PodsToRestart {
    /// Whether running pods remain that this pass did not look at
    pub fn has_more(&self) -> bool {
        self.continue_token.is_some() || self.truncated
    }
}

/// Lists pods and applies the predicate engine to them
pub struct PodSelector {
    client: Arc<dyn SidecarKubeClient>,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl PodSelector {
    /// Create a selector
    pub fn new(
        client: Arc<dyn SidecarKubeClient>,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            retry,
            cancel,
        }
    }

    async fn list_page(&self, query: &PodListQuery) -> Result<crate::client::PodPage> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        retry_transient(&self.retry, "list_pods", || self.client.list_pods(query)).await
    }

    /// Select the ready, injected, running pods matching `predicates`.
    #[instrument(skip(self, predicates), fields(predicates = predicates.len()))]
    pub async fn get_pods_to_restart(
        &self,
        predicates: &[PredicateRef],
        limits: RestartLimits,
    ) -> Result<PodsToRestart> {
        let mut selected = PodsToRestart::default();
        let mut query = PodListQuery {
            field_selector: Some(RUNNING_PODS_FIELD_SELECTOR.to_string()),
            limit: Some(limits.pods_to_list_limit),
            continue_token: None,
        };

        loop {
            let page = self.list_page(&query).await?;
            let page_len = page.items.len();

            for (index, pod) in page.items.into_iter().enumerate() {
                if !predicates::is_ready_with_sidecar(&pod)
                    || !predicates::evaluate(predicates, &pod)
                {
                    continue;
                }
                debug!(
                    name = pod.metadata.name.as_deref().unwrap_or_default(),
                    namespace = pod.metadata.namespace.as_deref().unwrap_or_default(),
                    reasons = ?predicates::matched_reasons(predicates, &pod),
                    "pod selected for sidecar restart"
                );
                selected.pods.push(pod);
                if selected.pods.len() >= limits.pods_to_restart_limit {
                    selected.truncated = index + 1 < page_len;
                    break;
                }
            }

            selected.continue_token = page.continue_token;
            if selected.pods.len() >= limits.pods_to_restart_limit
                || selected.continue_token.is_none()
            {
                break;
            }
            query.continue_token = selected.continue_token.clone();
        }

        info!(
            pods = selected.pods.len(),
            has_more = selected.has_more(),
            "selected pods for sidecar restart"
        );
        Ok(selected)
    }

    /// Every pod with an injected sidecar next to its own containers,
    /// regardless of phase or readiness.
    #[instrument(skip(self))]
    pub async fn get_all_injected_pods(&self) -> Result<Vec<Pod>> {
        let mut injected = Vec::new();
        let mut query = PodListQuery {
            field_selector: None,
            limit: Some(RestartLimits::DEFAULT_PODS_TO_LIST),
            continue_token: None,
        };

        loop {
            let page = self.list_page(&query).await?;
            injected.extend(
                page.items
                    .into_iter()
                    .filter(predicates::contains_injected_sidecar),
            );
            match page.continue_token {
                Some(token) => query.continue_token = Some(token),
                None => break,
            }
        }

        debug!(pods = injected.len(), "found injected pods");
        Ok(injected)
    }
}
