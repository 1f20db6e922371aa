//! Metadata Reconciler
//!
//! Labels, annotations and finalizers on a managed object are shared between
//! the user and the controllers running on the cluster. This module decides
//! which part of the live metadata belongs in the user's state, and which
//! part of it has to be carried through an update untouched.

pub mod finalizers;
pub mod keys;

pub use finalizers::*;
pub use keys::*;

use crate::domain::model::MetadataModel;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Wire metadata for a create. Absent attributes stay unset.
pub fn expand_metadata(model: &MetadataModel) -> ObjectMeta {
    ObjectMeta {
        name: Some(model.name.clone()),
        namespace: model.namespace.clone(),
        labels: model.labels.clone(),
        annotations: model.annotations.clone(),
        finalizers: model.finalizers.clone(),
        ..Default::default()
    }
}

/// Wire metadata for an update against the live metadata.
///
/// Finalizers are merged with [`merge_finalizers_for_update`]. A label or
/// annotation map the user did not declare is sent back as it is live; a
/// declared one keeps the system-owned keys present on the live object.
pub fn expand_metadata_for_update(model: &MetadataModel, existing: &ObjectMeta) -> ObjectMeta {
    let mut meta = expand_metadata(model);

    meta.labels = carry_map(existing.labels.as_ref(), model.labels.as_ref());
    meta.annotations = carry_map(existing.annotations.as_ref(), model.annotations.as_ref());

    let live_finalizers = existing.finalizers.as_deref().unwrap_or_default();
    if !live_finalizers.is_empty() || model.finalizers.is_some() {
        let declared = model.finalizers.as_deref().unwrap_or_default();
        meta.finalizers = Some(merge_finalizers_for_update(live_finalizers, declared));
    }

    meta
}

/// State metadata from the live object, filtered against the prior
/// declaration.
///
/// A collection the user never declared comes back as `None` unless
/// something user-visible is left after filtering.
pub fn flatten_metadata(live: &ObjectMeta, prior: &MetadataModel) -> MetadataModel {
    let labels = filter_map(live.labels.as_ref(), prior.labels.as_ref());
    let annotations = filter_map(live.annotations.as_ref(), prior.annotations.as_ref());

    let live_finalizers = live.finalizers.as_deref().unwrap_or_default();
    let finalizers = filter_declared_finalizers(
        live_finalizers,
        prior.finalizers.as_deref().unwrap_or_default(),
    );
    let finalizers = present_if(finalizers, prior.finalizers.is_some());

    MetadataModel {
        name: live.name.clone().unwrap_or_else(|| prior.name.clone()),
        namespace: live.namespace.clone().or_else(|| prior.namespace.clone()),
        labels,
        annotations,
        finalizers,
        generation: live.generation,
        resource_version: live.resource_version.clone(),
        uid: live.uid.clone(),
    }
}

fn filter_map(
    live: Option<&BTreeMap<String, String>>,
    declared: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let empty = BTreeMap::new();
    let filtered = filter_owned_keys(live.unwrap_or(&empty), declared.unwrap_or(&empty));
    present_if(filtered, declared.is_some())
}

fn carry_map(
    live: Option<&BTreeMap<String, String>>,
    declared: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    // an undeclared map is not managed, whatever is live stays
    let Some(declared) = declared else {
        return live.cloned();
    };
    let empty = BTreeMap::new();
    Some(carry_owned_keys(live.unwrap_or(&empty), declared))
}

fn present_if<C: Default + PartialEq>(collection: C, declared: bool) -> Option<C> {
    if declared || collection != C::default() {
        Some(collection)
    } else {
        None
    }
}
