//! Sidecar image and resource drift

use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;

use meshward_common::mesh;
use meshward_common::quantity::{parse_quantity, quantities_equal};
use meshward_common::Result;

use super::{annotations, sidecar_containers, SidecarImage, SidecarProxyPredicate};

const CPU: &str = "cpu";
const MEMORY: &str = "memory";

/// Desired sidecar resource requests and limits
///
/// A missing value compares equal to zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpectedResources {
    /// CPU request
    pub cpu_request: Option<Quantity>,
    /// Memory request
    pub memory_request: Option<Quantity>,
    /// CPU limit
    pub cpu_limit: Option<Quantity>,
    /// Memory limit
    pub memory_limit: Option<Quantity>,
}

impl ExpectedResources {
    /// Build expected resources from quantity strings, validating each one
    pub fn parse(
        cpu_request: &str,
        memory_request: &str,
        cpu_limit: &str,
        memory_limit: &str,
    ) -> Result<Self> {
        Ok(Self {
            cpu_request: Some(checked_quantity(cpu_request)?),
            memory_request: Some(checked_quantity(memory_request)?),
            cpu_limit: Some(checked_quantity(cpu_limit)?),
            memory_limit: Some(checked_quantity(memory_limit)?),
        })
    }

    /// Apply the pod's per-sidecar resource annotations on top of these
    /// expectations. Fails if an annotation does not hold a valid quantity.
    pub fn with_pod_overrides(&self, pod: &Pod) -> Result<Self> {
        let annotations = annotations(pod);
        let mut resolved = self.clone();
        let overrides = [
            (mesh::PROXY_CPU_REQUEST_ANNOTATION, &mut resolved.cpu_request),
            (mesh::PROXY_MEMORY_REQUEST_ANNOTATION, &mut resolved.memory_request),
            (mesh::PROXY_CPU_LIMIT_ANNOTATION, &mut resolved.cpu_limit),
            (mesh::PROXY_MEMORY_LIMIT_ANNOTATION, &mut resolved.memory_limit),
        ];
        for (key, slot) in overrides {
            if let Some(value) = annotations.get(key) {
                *slot = Some(checked_quantity(value)?);
            }
        }
        Ok(resolved)
    }

    /// Whether the container's requests and limits equal these expectations
    pub fn matches_container(&self, container: &Container) -> bool {
        let resources = container.resources.as_ref();
        let requests = resources.and_then(|r| r.requests.as_ref());
        let limits = resources.and_then(|r| r.limits.as_ref());

        quantities_equal(requests.and_then(|r| r.get(CPU)), self.cpu_request.as_ref())
            && quantities_equal(
                requests.and_then(|r| r.get(MEMORY)),
                self.memory_request.as_ref(),
            )
            && quantities_equal(limits.and_then(|l| l.get(CPU)), self.cpu_limit.as_ref())
            && quantities_equal(
                limits.and_then(|l| l.get(MEMORY)),
                self.memory_limit.as_ref(),
            )
    }
}

fn checked_quantity(value: &str) -> Result<Quantity> {
    parse_quantity(value)?;
    Ok(Quantity(value.to_string()))
}

fn has_custom_image(pod: &Pod) -> bool {
    annotations(pod).contains_key(mesh::CUSTOM_PROXY_IMAGE_ANNOTATION)
}

fn image_differs(image: &SidecarImage, pod: &Pod) -> bool {
    sidecar_containers(pod).any(|c| !image.matches_image(c.image.as_deref().unwrap_or_default()))
}

/// `None` when the pod's resource overrides are invalid. Such pods would be
/// rejected by the injection webhook, so restarting them achieves nothing.
fn resources_differ(resources: &ExpectedResources, pod: &Pod) -> Option<bool> {
    let expected = match resources.with_pod_overrides(pod) {
        Ok(expected) => expected,
        Err(e) => {
            debug!(
                name = pod.metadata.name.as_deref().unwrap_or_default(),
                namespace = pod.metadata.namespace.as_deref().unwrap_or_default(),
                error = %e,
                "ignoring pod with invalid sidecar resource annotations"
            );
            return None;
        }
    };
    Some(sidecar_containers(pod).any(|c| !expected.matches_container(c)))
}

// =============================================================================
// Predicates
// =============================================================================

/// Optional predicate matching pods whose sidecar image or resources drifted
/// from the desired ones. Pods with a custom proxy image are never matched.
#[derive(Clone, Debug)]
pub struct ImageResourcesPredicate {
    image: SidecarImage,
    resources: ExpectedResources,
}

impl ImageResourcesPredicate {
    /// Create the predicate for the desired image and resources
    pub fn new(image: SidecarImage, resources: ExpectedResources) -> Self {
        Self { image, resources }
    }
}

impl SidecarProxyPredicate for ImageResourcesPredicate {
    fn matches(&self, pod: &Pod) -> bool {
        if has_custom_image(pod) {
            return false;
        }
        match resources_differ(&self.resources, pod) {
            None => false,
            Some(differ) => differ || image_differs(&self.image, pod),
        }
    }

    fn must_match(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "image-resources"
    }
}

/// Optional predicate matching pods whose sidecar image differs
#[derive(Clone, Debug)]
pub struct ImageDriftPredicate {
    image: SidecarImage,
}

impl ImageDriftPredicate {
    /// Create the predicate for the desired image
    pub fn new(image: SidecarImage) -> Self {
        Self { image }
    }
}

impl SidecarProxyPredicate for ImageDriftPredicate {
    fn matches(&self, pod: &Pod) -> bool {
        image_differs(&self.image, pod)
    }

    fn must_match(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "image-drift"
    }
}

/// Optional predicate matching pods whose sidecar resources differ
#[derive(Clone, Debug)]
pub struct ResourcesDriftPredicate {
    resources: ExpectedResources,
}

impl ResourcesDriftPredicate {
    /// Create the predicate for the desired resources
    pub fn new(resources: ExpectedResources) -> Self {
        Self { resources }
    }
}

impl SidecarProxyPredicate for ResourcesDriftPredicate {
    fn matches(&self, pod: &Pod) -> bool {
        resources_differ(&self.resources, pod).unwrap_or(false)
    }

    fn must_match(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "resources-drift"
    }
}

/// Required predicate excluding pods that pin their own proxy image
#[derive(Clone, Copy, Debug, Default)]
pub struct CustomImageSkipPredicate;

impl SidecarProxyPredicate for CustomImageSkipPredicate {
    fn matches(&self, pod: &Pod) -> bool {
        !has_custom_image(pod)
    }

    fn must_match(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "custom-image-skip"
    }
}
