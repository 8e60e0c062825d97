//! Classic vs native sidecar mode

use k8s_openapi::api::core::v1::Pod;

use meshward_common::mesh;

use super::{annotations, has_native_sidecar, SidecarProxyPredicate};

/// Optional predicate matching pods whose sidecar mode disagrees with the
/// desired one.
///
/// The desired mode comes from the pod's `sidecar.istio.io/nativeSidecar`
/// annotation when it is `"true"` or `"false"`. Without the annotation,
/// native sidecars are desired unless compatibility mode is on. Any other
/// annotation value leaves the pod alone.
#[derive(Clone, Copy, Debug)]
pub struct NativeSidecarPredicate {
    compatibility_mode: bool,
}

impl NativeSidecarPredicate {
    /// Create the predicate for the mesh's compatibility mode
    pub fn new(compatibility_mode: bool) -> Self {
        Self { compatibility_mode }
    }

    fn desired_native(&self, pod: &Pod) -> Option<bool> {
        match annotations(pod)
            .get(mesh::NATIVE_SIDECAR_ANNOTATION)
            .map(String::as_str)
        {
            None | Some("") => Some(!self.compatibility_mode),
            Some("true") => Some(true),
            Some("false") => Some(false),
            Some(_) => None,
        }
    }
}

impl SidecarProxyPredicate for NativeSidecarPredicate {
    fn matches(&self, pod: &Pod) -> bool {
        self.desired_native(pod)
            .is_some_and(|desired| desired != has_native_sidecar(pod))
    }

    fn must_match(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "native-sidecar"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PodBuilder;

    fn classic(annotation: Option<&str>) -> Pod {
        let mut builder = PodBuilder::new("classic", "default");
        if let Some(value) = annotation {
            builder = builder.annotation(mesh::NATIVE_SIDECAR_ANNOTATION, value);
        }
        builder.build()
    }

    fn native(annotation: Option<&str>) -> Pod {
        let mut builder = PodBuilder::new("native", "default").native_sidecar();
        if let Some(value) = annotation {
            builder = builder.annotation(mesh::NATIVE_SIDECAR_ANNOTATION, value);
        }
        builder.build()
    }

    #[test]
    fn without_annotation_native_is_desired_outside_compatibility_mode() {
        let predicate = NativeSidecarPredicate::new(false);
        assert!(predicate.matches(&classic(None)));
        assert!(!predicate.matches(&native(None)));
    }

    #[test]
    fn without_annotation_classic_is_desired_in_compatibility_mode() {
        let predicate = NativeSidecarPredicate::new(true);
        assert!(!predicate.matches(&classic(None)));
        assert!(predicate.matches(&native(None)));
    }

    #[test]
    fn annotation_overrides_compatibility_mode() {
        for compatibility_mode in [false, true] {
            let predicate = NativeSidecarPredicate::new(compatibility_mode);
            assert!(predicate.matches(&classic(Some("true"))));
            assert!(!predicate.matches(&native(Some("true"))));
            assert!(predicate.matches(&native(Some("false"))));
            assert!(!predicate.matches(&classic(Some("false"))));
        }
    }

    #[test]
    fn unrecognised_annotation_value_never_matches() {
        let predicate = NativeSidecarPredicate::new(false);
        assert!(!predicate.matches(&classic(Some("yes"))));
        assert!(!predicate.matches(&native(Some("yes"))));
        assert!(!predicate.must_match());
    }
}
