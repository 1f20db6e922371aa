//! Project resource
//!
//! Translation between the declared project and the `AppProject` wire object.
//! Repeated blocks are expanded positionally, in declaration order, without
//! sorting or deduplication. Optional attributes the user left out stay unset
//! on the wire; on update, metadata maps the user never declared are sent
//! back as they are live.

use crate::controlplane::features::Feature;
use crate::crd::{
    AppProject, AppProjectSpec, ApplicationDestination, ApplicationDestinationServiceAccount,
    GroupKind, OrphanedResourceKey, OrphanedResourcesMonitorSettings, ProjectRole, SignatureKey,
    SyncWindow,
};
use crate::domain::model::{
    DestinationModel, DestinationServiceAccountModel, GroupKindModel, MetadataModel,
    OrphanedResourceKeyModel, OrphanedResourcesModel, ProjectModel, ProjectSpecModel, RoleModel,
    SyncWindowModel,
};
use crate::domain::ports::ManagedResource;
use crate::error::{Error, Result};
use crate::metadata::{expand_metadata, expand_metadata_for_update, flatten_metadata};
use std::collections::HashSet;
use tracing::debug;

/// Argo CD project kind
#[derive(Debug, Clone, Copy, Default)]
pub struct Project;

impl ManagedResource for Project {
    const KIND: &'static str = "project";

    type Model = ProjectModel;
    type Object = AppProject;

    fn name(model: &ProjectModel) -> &str {
        &model.metadata.name
    }

    fn required_features(model: &ProjectModel) -> Vec<Feature> {
        let mut features = Vec::new();
        if !model.spec.source_namespaces.is_empty() {
            features.push(Feature::ProjectSourceNamespaces);
        }
        if !model.spec.destination_service_account.is_empty() {
            features.push(Feature::ProjectDestinationServiceAccounts);
        }
        features
    }

    fn expand(model: &ProjectModel) -> Result<AppProject> {
        expand_project(model)
    }

    fn expand_for_update(model: &ProjectModel, live: &AppProject) -> Result<AppProject> {
        let mut project = expand_project(model)?;
        project.metadata = expand_metadata_for_update(&model.metadata, &live.metadata);
        preserve_role_tokens(&mut project.spec.roles, live)?;
        Ok(project)
    }

    fn flatten(object: &AppProject, prior: &ProjectModel) -> ProjectModel {
        flatten_project(object, prior)
    }

    fn model_for_import(name: &str) -> ProjectModel {
        ProjectModel {
            metadata: MetadataModel::named(name),
            ..Default::default()
        }
    }
}

// =============================================================================
// Expansion
// =============================================================================

/// Wire object for a declared project
pub fn expand_project(model: &ProjectModel) -> Result<AppProject> {
    if model.metadata.name.trim().is_empty() {
        return Err(Error::Configuration("project metadata.name must be set".into()));
    }

    let spec = &model.spec;
    let project_spec = AppProjectSpec {
        description: spec.description.clone(),
        source_repos: spec.source_repos.clone(),
        destinations: spec.destination.iter().map(expand_destination).collect(),
        destination_service_accounts: spec
            .destination_service_account
            .iter()
            .map(expand_destination_service_account)
            .collect(),
        cluster_resource_whitelist: expand_group_kinds(&spec.cluster_resource_whitelist),
        cluster_resource_blacklist: expand_group_kinds(&spec.cluster_resource_blacklist),
        namespace_resource_whitelist: expand_group_kinds(&spec.namespace_resource_whitelist),
        namespace_resource_blacklist: expand_group_kinds(&spec.namespace_resource_blacklist),
        orphaned_resources: spec.orphaned_resources.as_ref().map(expand_orphaned_resources),
        roles: expand_project_roles(&spec.role)?,
        sync_windows: spec.sync_window.iter().map(expand_sync_window).collect(),
        signature_keys: spec
            .signature_keys
            .iter()
            .map(|key_id| SignatureKey {
                key_id: key_id.clone(),
            })
            .collect(),
        source_namespaces: spec.source_namespaces.clone(),
    };

    Ok(AppProject {
        metadata: expand_metadata(&model.metadata),
        spec: project_spec,
    })
}

/// Declared roles, without any server-issued tokens
pub fn expand_project_roles(roles: &[RoleModel]) -> Result<Vec<ProjectRole>> {
    let mut seen = HashSet::new();

    roles
        .iter()
        .map(|role| {
            if !seen.insert(role.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "project role {} is declared more than once",
                    role.name
                )));
            }

            Ok(ProjectRole {
                name: role.name.clone(),
                description: role.description.clone(),
                policies: role.policies.clone(),
                groups: role.groups.clone(),
                jwt_tokens: None,
            })
        })
        .collect()
}

/// Copy tokens from live roles onto desired roles of the same name.
///
/// A role with no live counterpart is new and gets no tokens. A live project
/// whose roles cannot be matched unambiguously aborts the update.
pub fn preserve_role_tokens(roles: &mut [ProjectRole], live: &AppProject) -> Result<()> {
    for role in roles.iter_mut() {
        match live.role_by_name(&role.name)? {
            Some((_, existing)) => {
                role.jwt_tokens = existing.jwt_tokens.clone();
            }
            None => {
                debug!(role = %role.name, "project role is new, no tokens to preserve");
            }
        }
    }
    Ok(())
}

fn expand_destination(dest: &DestinationModel) -> ApplicationDestination {
    ApplicationDestination {
        server: dest.server.clone(),
        namespace: dest.namespace.clone(),
        name: dest.name.clone(),
    }
}

fn expand_destination_service_account(
    dsa: &DestinationServiceAccountModel,
) -> ApplicationDestinationServiceAccount {
    ApplicationDestinationServiceAccount {
        server: dsa.server.clone(),
        namespace: dsa.namespace.clone(),
        default_service_account: dsa.default_service_account.clone(),
    }
}

fn expand_group_kinds(group_kinds: &[GroupKindModel]) -> Vec<GroupKind> {
    group_kinds
        .iter()
        .map(|gk| GroupKind {
            group: gk.group.clone(),
            kind: gk.kind.clone(),
        })
        .collect()
}

fn expand_orphaned_resources(or: &OrphanedResourcesModel) -> OrphanedResourcesMonitorSettings {
    OrphanedResourcesMonitorSettings {
        warn: or.warn,
        ignore: or
            .ignore
            .iter()
            .map(|key| OrphanedResourceKey {
                group: key.group.clone(),
                kind: key.kind.clone(),
                name: key.name.clone(),
            })
            .collect(),
    }
}

fn expand_sync_window(sw: &SyncWindowModel) -> SyncWindow {
    SyncWindow {
        kind: sw.kind.clone(),
        schedule: sw.schedule.clone(),
        duration: sw.duration.clone(),
        applications: sw.applications.clone(),
        namespaces: sw.namespaces.clone(),
        clusters: sw.clusters.clone(),
        manual_sync: sw.manual_sync,
        time_zone: sw.timezone.clone(),
    }
}

// =============================================================================
// Flattening
// =============================================================================

/// State model for a live project, with metadata filtered against `prior`
pub fn flatten_project(project: &AppProject, prior: &ProjectModel) -> ProjectModel {
    let spec = &project.spec;

    ProjectModel {
        metadata: flatten_metadata(&project.metadata, &prior.metadata),
        spec: ProjectSpecModel {
            description: spec.description.clone(),
            source_repos: spec.source_repos.clone(),
            signature_keys: spec.signature_keys.iter().map(|k| k.key_id.clone()).collect(),
            source_namespaces: spec.source_namespaces.clone(),
            destination: spec
                .destinations
                .iter()
                .map(|d| DestinationModel {
                    server: d.server.clone(),
                    name: d.name.clone(),
                    namespace: d.namespace.clone(),
                })
                .collect(),
            destination_service_account: spec
                .destination_service_accounts
                .iter()
                .map(|d| DestinationServiceAccountModel {
                    default_service_account: d.default_service_account.clone(),
                    server: d.server.clone(),
                    namespace: d.namespace.clone(),
                })
                .collect(),
            cluster_resource_blacklist: flatten_group_kinds(&spec.cluster_resource_blacklist),
            cluster_resource_whitelist: flatten_group_kinds(&spec.cluster_resource_whitelist),
            namespace_resource_blacklist: flatten_group_kinds(&spec.namespace_resource_blacklist),
            namespace_resource_whitelist: flatten_group_kinds(&spec.namespace_resource_whitelist),
            orphaned_resources: spec.orphaned_resources.as_ref().map(|or| OrphanedResourcesModel {
                warn: or.warn,
                ignore: or
                    .ignore
                    .iter()
                    .map(|key| OrphanedResourceKeyModel {
                        group: key.group.clone(),
                        kind: key.kind.clone(),
                        name: key.name.clone(),
                    })
                    .collect(),
            }),
            role: spec
                .roles
                .iter()
                .map(|r| RoleModel {
                    name: r.name.clone(),
                    description: r.description.clone(),
                    policies: r.policies.clone(),
                    groups: r.groups.clone(),
                })
                .collect(),
            sync_window: spec
                .sync_windows
                .iter()
                .map(|sw| SyncWindowModel {
                    applications: sw.applications.clone(),
                    clusters: sw.clusters.clone(),
                    namespaces: sw.namespaces.clone(),
                    duration: sw.duration.clone(),
                    kind: sw.kind.clone(),
                    manual_sync: sw.manual_sync,
                    schedule: sw.schedule.clone(),
                    timezone: sw.time_zone.clone(),
                })
                .collect(),
        },
    }
}

fn flatten_group_kinds(group_kinds: &[GroupKind]) -> Vec<GroupKindModel> {
    group_kinds
        .iter()
        .map(|gk| GroupKindModel {
            group: gk.group.clone(),
            kind: gk.kind.clone(),
        })
        .collect()
}
