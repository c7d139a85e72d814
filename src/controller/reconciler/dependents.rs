//! Dependents of a `KonnectExtension`.
//!
//! A DataPlane or ControlPlane counts as a dependent once it references the
//! extension and its `KonnectExtensionApplied` condition is True. The lists are
//! rebuilt from scratch on every pass and sorted, so an unchanged cluster
//! produces an identical status.

use crate::constants::KONNECT_GROUP;
use crate::crd::{
    condition_type, is_condition_true, Condition, ControlPlane, DataPlane, ExtensionRef,
    KonnectExtension, NamespacedRef,
};
use kube::{Resource, ResourceExt};

/// A parent that can reference extensions
pub trait ExtensionConsumer: Resource<DynamicType = ()> + Sized {
    fn extension_refs(&self) -> &[ExtensionRef];
    fn current_conditions(&self) -> &[Condition];

    /// Whether one of the extension references points at `extension`
    fn references(&self, extension: &KonnectExtension) -> bool {
        let own_namespace = self.namespace().unwrap_or_default();
        let target_namespace = extension.namespace().unwrap_or_default();
        self.extension_refs().iter().any(|r| {
            r.group == KONNECT_GROUP
                && r.kind == KonnectExtension::kind(&())
                && r.name == extension.name_any()
                && r.namespace.as_deref().unwrap_or(&own_namespace) == target_namespace
        })
    }
}

impl ExtensionConsumer for DataPlane {
    fn extension_refs(&self) -> &[ExtensionRef] {
        &self.spec.extensions
    }

    fn current_conditions(&self) -> &[Condition] {
        self.conditions()
    }
}

impl ExtensionConsumer for ControlPlane {
    fn extension_refs(&self) -> &[ExtensionRef] {
        &self.spec.extensions
    }

    fn current_conditions(&self) -> &[Condition] {
        self.conditions()
    }
}

/// Sorted references to the candidates that have the extension applied
pub fn applied_dependents<'a, P, I>(
    extension: &KonnectExtension,
    candidates: I,
) -> Vec<NamespacedRef>
where
    P: ExtensionConsumer + 'a,
    I: IntoIterator<Item = &'a P>,
{
    let mut refs: Vec<_> = candidates
        .into_iter()
        .filter(|p| p.references(extension))
        .filter(|p| {
            is_condition_true(p.current_conditions(), condition_type::KONNECT_EXTENSION_APPLIED)
        })
        .map(|p| NamespacedRef::new(&p.namespace().unwrap_or_default(), &p.name_any()))
        .collect();
    refs.sort_by_key(NamespacedRef::key);
    refs.dedup();
    refs
}

/// Candidates that still reference the extension, regardless of conditions
pub(crate) fn referencing<'a, P, I>(extension: &KonnectExtension, candidates: I) -> usize
where
    P: ExtensionConsumer + 'a,
    I: IntoIterator<Item = &'a P>,
{
    candidates
        .into_iter()
        .filter(|p| p.references(extension))
        .count()
}
