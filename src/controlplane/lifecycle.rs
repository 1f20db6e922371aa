//! Lifecycle Orchestrator
//!
//! Sequences Create, Read, Update and Delete of one resource kind against the
//! remote API. Every operation runs under the named lock of the resource it
//! touches: reads share it, mutations hold it exclusively from the first
//! remote call to the last. There is no retry; each entry point makes a
//! single attempt and reports what happened.

use crate::controlplane::features::ServerCapabilities;
use crate::controlplane::metrics::{LifecycleMetrics, Outcome};
use crate::domain::ports::{ManagedResource, RemoteError, ResourceApiRef};
use crate::error::{Error, Result};
use crate::registry::NamedMutexRegistry;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Lifecycle Configuration
// =============================================================================

/// Configuration for the lifecycle orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Upper bound on waiting out a previous instance's deletion grace period
    pub max_deletion_wait: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_deletion_wait: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Create/Read/Update/Delete/Import entry points for one resource kind
pub struct Lifecycle<K: ManagedResource> {
    api: ResourceApiRef<K::Object>,
    locks: Arc<NamedMutexRegistry>,
    capabilities: ServerCapabilities,
    config: LifecycleConfig,
    metrics: Arc<LifecycleMetrics>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ManagedResource> Lifecycle<K> {
    pub fn new(
        api: ResourceApiRef<K::Object>,
        locks: Arc<NamedMutexRegistry>,
        capabilities: ServerCapabilities,
        config: LifecycleConfig,
        metrics: Arc<LifecycleMetrics>,
    ) -> Self {
        Self {
            api,
            locks,
            capabilities,
            config,
            metrics,
            _kind: PhantomData,
        }
    }

    /// Lock registry shared by every operation on this kind
    pub fn locks(&self) -> &Arc<NamedMutexRegistry> {
        &self.locks
    }

    /// Create the declared resource and return its state
    pub async fn create(&self, model: &K::Model, cancel: &CancellationToken) -> Result<K::Model> {
        let result = self.create_inner(model, cancel).await;
        self.finish("create", outcome(&result));
        result
    }

    /// Current state of the resource, or `None` once it no longer exists
    pub async fn read(&self, model: &K::Model, cancel: &CancellationToken) -> Result<Option<K::Model>> {
        let result = self.read_inner(model, cancel).await;
        let status = match &result {
            Ok(Some(_)) => Outcome::Ok,
            Ok(None) => Outcome::Absent,
            Err(_) => Outcome::Error,
        };
        self.finish("read", status);
        result
    }

    /// Bring the resource in line with the declaration and return its state
    pub async fn update(&self, model: &K::Model, cancel: &CancellationToken) -> Result<K::Model> {
        let result = self.update_inner(model, cancel).await;
        self.finish("update", outcome(&result));
        result
    }

    /// Delete the resource. Deleting a resource that is already gone succeeds.
    pub async fn delete(&self, model: &K::Model, cancel: &CancellationToken) -> Result<()> {
        let result = self.delete_inner(model, cancel).await;
        let status = match &result {
            Ok(true) => Outcome::Ok,
            Ok(false) => Outcome::Absent,
            Err(_) => Outcome::Error,
        };
        self.finish("delete", status);
        result.map(|_| ())
    }

    /// Resolve an import identifier to a skeleton model to be read
    pub fn import(&self, id: &str) -> Result<K::Model> {
        let name = id.trim();
        if name.is_empty() {
            return Err(Error::InvalidImportId(id.to_string()));
        }
        debug!("Importing {} {}", K::KIND, name);
        Ok(K::model_for_import(name))
    }

    // =========================================================================
    // Operations
    // =========================================================================

    async fn create_inner(&self, model: &K::Model, cancel: &CancellationToken) -> Result<K::Model> {
        self.capabilities.ensure_supported(&K::required_features(model))?;
        let desired = K::expand(model)?;
        let name = K::name(model);

        let _guard = self
            .cancellable("create", name, cancel, self.locks.write(name))
            .await?;

        match self.cancellable("create", name, cancel, self.api.get(name)).await? {
            Ok(existing) => {
                if let Some(wait) = self.deletion_wait(existing.meta()) {
                    debug!(
                        "Previous {} {} is still being deleted, waiting {:?}",
                        K::KIND,
                        name,
                        wait
                    );
                    self.cancellable("create", name, cancel, tokio::time::sleep(wait))
                        .await?;
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(self.remote_error("get", name, e)),
        }

        let created = self
            .cancellable("create", name, cancel, self.api.create(desired, false))
            .await?
            .map_err(|e| self.remote_error("create", name, e))?;

        info!("Created {} {}", K::KIND, name);

        Ok(K::flatten(&created, model))
    }

    async fn read_inner(&self, model: &K::Model, cancel: &CancellationToken) -> Result<Option<K::Model>> {
        let name = K::name(model);

        let _guard = self
            .cancellable("read", name, cancel, self.locks.read(name))
            .await?;

        match self.cancellable("read", name, cancel, self.api.get(name)).await? {
            Ok(object) => Ok(Some(K::flatten(&object, model))),
            Err(e) if e.is_not_found() => {
                debug!("{} {} no longer exists", K::KIND, name);
                Ok(None)
            }
            Err(e) => Err(self.remote_error("read", name, e)),
        }
    }

    async fn update_inner(&self, model: &K::Model, cancel: &CancellationToken) -> Result<K::Model> {
        self.capabilities.ensure_supported(&K::required_features(model))?;
        K::validate(model)?;
        let name = K::name(model);

        let _guard = self
            .cancellable("update", name, cancel, self.locks.write(name))
            .await?;

        let live = self
            .cancellable("update", name, cancel, self.api.get(name))
            .await?
            .map_err(|e| self.remote_error("get", name, e))?;

        let mut desired = K::expand_for_update(model, &live)?;
        desired.meta_mut().resource_version = live.meta().resource_version.clone();

        self.cancellable("update", name, cancel, self.api.update(desired))
            .await?
            .map_err(|e| self.remote_error("update", name, e))?;

        info!("Updated {} {}", K::KIND, name);

        let refreshed = self
            .cancellable("update", name, cancel, self.api.get(name))
            .await?
            .map_err(|e| self.remote_error("read", name, e))?;

        Ok(K::flatten(&refreshed, model))
    }

    /// `Ok(false)` when there was nothing left to delete
    async fn delete_inner(&self, model: &K::Model, cancel: &CancellationToken) -> Result<bool> {
        let name = K::name(model);

        let _guard = self
            .cancellable("delete", name, cancel, self.locks.write(name))
            .await?;

        match self.cancellable("delete", name, cancel, self.api.delete(name)).await? {
            Ok(()) => {
                info!("Deleted {} {}", K::KIND, name);
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!("{} {} was already deleted", K::KIND, name);
                Ok(false)
            }
            Err(e) => Err(self.remote_error("delete", name, e)),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Run `fut` unless `cancel` fires first
    async fn cancellable<F: Future>(
        &self,
        operation: &str,
        name: &str,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("{} of {} {} cancelled", operation, K::KIND, name);
                Err(Error::Cancelled {
                    operation: operation.to_string(),
                    kind: K::KIND.to_string(),
                    name: name.to_string(),
                })
            }
            output = fut => Ok(output),
        }
    }

    /// How long to wait for a soft-deleted previous instance to go away
    fn deletion_wait(&self, meta: &ObjectMeta) -> Option<Duration> {
        meta.deletion_timestamp.as_ref()?;
        let grace = meta.deletion_grace_period_seconds?;
        let grace = Duration::from_secs(u64::try_from(grace).unwrap_or(0));
        Some(grace.min(self.config.max_deletion_wait)).filter(|wait| !wait.is_zero())
    }

    fn remote_error(&self, operation: &str, name: &str, err: RemoteError) -> Error {
        if operation == "create" && err.is_already_exists() {
            return Error::AlreadyExists {
                kind: K::KIND.to_string(),
                name: name.to_string(),
                message: err.message,
            };
        }
        if operation == "update" && err.is_conflict() {
            return Error::Conflict {
                kind: K::KIND.to_string(),
                name: name.to_string(),
                message: err.message,
            };
        }
        Error::remote(operation, K::KIND, name, err.message)
    }

    fn finish(&self, operation: &str, status: Outcome) {
        self.metrics.record(K::KIND, operation, status);
        self.metrics.set_lock_entries(K::KIND, self.locks.len());
    }
}

fn outcome<T>(result: &Result<T>) -> Outcome {
    match result {
        Ok(_) => Outcome::Ok,
        Err(_) => Outcome::Error,
    }
}
