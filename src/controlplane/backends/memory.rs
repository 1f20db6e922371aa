//! In-Memory Control Plane
//!
//! A `ResourceApi` that keeps objects in process. It behaves like the API
//! server where the lifecycle depends on it: server-assigned metadata,
//! optimistic concurrency on update, soft deletion with a grace period and
//! metadata injected by a controller after create. Failures and latency can
//! be injected per call.

use crate::crd::AppProject;
use crate::domain::ports::{RemoteError, RemoteResult, ResourceApi};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::Resource;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

/// Finalizer the Argo CD controller places on resources it manages
pub const CONTROLLER_FINALIZER: &str = "resources-finalizer.argocd.argoproj.io";

/// Hook run against an object's metadata after the server stores it
pub type MetadataHook = Arc<dyn Fn(&mut ObjectMeta) + Send + Sync>;

/// Remote call kinds, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    Get,
    Create,
    Update,
    Delete,
}

impl ApiOperation {
    fn index(self) -> usize {
        match self {
            ApiOperation::Get => 0,
            ApiOperation::Create => 1,
            ApiOperation::Update => 2,
            ApiOperation::Delete => 3,
        }
    }
}

// =============================================================================
// Stored State
// =============================================================================

#[derive(Debug, Clone)]
struct StoredObject<O> {
    object: O,
    /// Set while soft-deleted; the object disappears once this passes
    purge_at: Option<Instant>,
}

impl<O> StoredObject<O> {
    fn is_purged(&self, now: Instant) -> bool {
        self.purge_at.map_or(false, |at| at <= now)
    }
}

// =============================================================================
// In-Memory Resource API
// =============================================================================

/// In-process control plane for one resource kind
pub struct InMemoryResourceApi<O> {
    objects: RwLock<BTreeMap<String, StoredObject<O>>>,
    failures: Mutex<HashMap<ApiOperation, VecDeque<RemoteError>>>,
    controller: Option<MetadataHook>,
    latency: Duration,
    next_version: AtomicU64,
    calls: [AtomicUsize; 4],
}

/// In-process control plane for projects
pub type InMemoryProjectApi = InMemoryResourceApi<AppProject>;

impl<O> InMemoryResourceApi<O>
where
    O: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            controller: None,
            latency: Duration::ZERO,
            next_version: AtomicU64::new(1),
            calls: Default::default(),
        }
    }

    /// Run `hook` on every newly created object, as a controller would
    pub fn with_controller(mut self, hook: MetadataHook) -> Self {
        self.controller = Some(hook);
        self
    }

    /// Add system finalizers, labels and annotations the way Argo CD does
    pub fn with_argocd_controller(self) -> Self {
        self.with_controller(Arc::new(argocd_controller_metadata))
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next call of `operation` with `error`
    pub async fn fail_next(&self, operation: ApiOperation, error: RemoteError) {
        self.failures
            .lock()
            .await
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Number of calls made for `operation`, including failed ones
    pub fn calls(&self, operation: ApiOperation) -> usize {
        self.calls[operation.index()].load(Ordering::Relaxed)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Current stored object, bypassing call accounting
    pub async fn peek(&self, name: &str) -> Option<O> {
        let now = Instant::now();
        self.objects
            .read()
            .await
            .get(name)
            .filter(|stored| !stored.is_purged(now))
            .map(|stored| stored.object.clone())
    }

    /// Store an object directly, assigning server metadata
    pub async fn insert(&self, mut object: O) {
        let name = object.meta().name.clone().unwrap_or_default();
        self.assign_server_metadata(object.meta_mut(), None);
        self.objects.write().await.insert(
            name,
            StoredObject {
                object,
                purge_at: None,
            },
        );
    }

    /// Change stored metadata the way another actor would, bumping the version
    pub async fn modify_metadata(&self, name: &str, f: impl FnOnce(&mut ObjectMeta)) -> bool {
        let mut objects = self.objects.write().await;
        match objects.get_mut(name) {
            Some(stored) => {
                f(stored.object.meta_mut());
                stored.object.meta_mut().resource_version = Some(self.bump_version());
                true
            }
            None => false,
        }
    }

    /// Soft-delete an object: it stays visible with a deletion timestamp and
    /// is purged once `grace` elapses
    pub async fn mark_deleting(&self, name: &str, grace: Duration) -> bool {
        let mut objects = self.objects.write().await;
        match objects.get_mut(name) {
            Some(stored) => {
                let meta = stored.object.meta_mut();
                meta.deletion_timestamp = Some(Time(chrono::Utc::now()));
                meta.deletion_grace_period_seconds = Some(grace.as_secs() as i64);
                stored.purge_at = Some(Instant::now() + grace);
                debug!("Marked {} for deletion, grace {:?}", name, grace);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn enter(&self, operation: ApiOperation) -> RemoteResult<()> {
        self.calls[operation.index()].fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let injected = self
            .failures
            .lock()
            .await
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(error) => {
                trace!("Injected {:?} failure: {}", operation, error);
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn bump_version(&self) -> String {
        self.next_version.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn assign_server_metadata(&self, meta: &mut ObjectMeta, previous: Option<&ObjectMeta>) {
        match previous {
            Some(previous) => {
                meta.uid = previous.uid.clone();
                meta.creation_timestamp = previous.creation_timestamp.clone();
                meta.deletion_timestamp = previous.deletion_timestamp.clone();
                meta.deletion_grace_period_seconds = previous.deletion_grace_period_seconds;
                meta.generation = Some(previous.generation.unwrap_or(0) + 1);
            }
            None => {
                let n = self.next_version.load(Ordering::Relaxed);
                meta.uid = Some(format!("00000000-0000-4000-8000-{:012x}", n));
                meta.creation_timestamp = Some(Time(chrono::Utc::now()));
                meta.deletion_timestamp = None;
                meta.deletion_grace_period_seconds = None;
                meta.generation = Some(1);
            }
        }
        meta.resource_version = Some(self.bump_version());
    }

    fn not_found(name: &str) -> RemoteError {
        RemoteError::not_found(format!("{} \"{}\" not found", O::plural(&()), name))
    }
}

impl<O> Default for InMemoryResourceApi<O>
where
    O: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<O> fmt::Debug for InMemoryResourceApi<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryResourceApi")
            .field("latency", &self.latency)
            .field("controller", &self.controller.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<O> ResourceApi<O> for InMemoryResourceApi<O>
where
    O: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> RemoteResult<O> {
        self.enter(ApiOperation::Get).await?;

        let mut objects = self.objects.write().await;
        match objects.get(name) {
            Some(stored) if stored.is_purged(Instant::now()) => {
                objects.remove(name);
                Err(Self::not_found(name))
            }
            Some(stored) => Ok(stored.object.clone()),
            None => Err(Self::not_found(name)),
        }
    }

    async fn create(&self, mut object: O, upsert: bool) -> RemoteResult<O> {
        self.enter(ApiOperation::Create).await?;

        let name = object
            .meta()
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| RemoteError::other("metadata.name: Required value"))?;

        let mut objects = self.objects.write().await;
        let previous = match objects.get(&name) {
            Some(stored) if stored.is_purged(Instant::now()) => None,
            Some(_) if !upsert => {
                return Err(RemoteError::already_exists(format!(
                    "{} \"{}\" already exists",
                    O::plural(&()),
                    name
                )));
            }
            Some(stored) => Some(stored.object.meta().clone()),
            None => None,
        };

        self.assign_server_metadata(object.meta_mut(), previous.as_ref());
        if previous.is_none() {
            if let Some(controller) = &self.controller {
                controller(object.meta_mut());
            }
        }

        objects.insert(
            name.clone(),
            StoredObject {
                object: object.clone(),
                purge_at: None,
            },
        );
        debug!("Stored {} {}", O::kind(&()), name);

        Ok(object)
    }

    async fn update(&self, mut object: O) -> RemoteResult<O> {
        self.enter(ApiOperation::Update).await?;

        let name = object.meta().name.clone().unwrap_or_default();
        let mut objects = self.objects.write().await;
        let stored = match objects.get_mut(&name) {
            Some(stored) if !stored.is_purged(Instant::now()) => stored,
            _ => return Err(Self::not_found(&name)),
        };

        let live_version = stored.object.meta().resource_version.as_deref();
        if object.meta().resource_version.as_deref() != live_version || live_version.is_none() {
            return Err(RemoteError::conflict(format!(
                "Operation cannot be fulfilled on {} \"{}\": the object has been modified; \
                 please apply your changes to the latest version and try again",
                O::plural(&()),
                name
            )));
        }

        let previous = stored.object.meta().clone();
        self.assign_server_metadata(object.meta_mut(), Some(&previous));
        stored.object = object.clone();

        Ok(object)
    }

    async fn delete(&self, name: &str) -> RemoteResult<()> {
        self.enter(ApiOperation::Delete).await?;

        let mut objects = self.objects.write().await;
        match objects.remove(name) {
            Some(stored) if !stored.is_purged(Instant::now()) => Ok(()),
            _ => Err(Self::not_found(name)),
        }
    }
}

/// Metadata the Argo CD controller and notifications engine add to a project
pub fn argocd_controller_metadata(meta: &mut ObjectMeta) {
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(CONTROLLER_FINALIZER.to_string());
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert("app.kubernetes.io/part-of".to_string(), "argocd".to_string());
    let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(
        "notified.notifications.argoproj.io".to_string(),
        "{}".to_string(),
    );
    annotations.insert(
        "kubectl.kubernetes.io/last-applied-configuration".to_string(),
        "{}".to_string(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::AppProjectSpec;
    use assert_matches::assert_matches;
    use crate::domain::ports::RemoteErrorCode;

    fn project(name: &str) -> AppProject {
        AppProject::new(name, AppProjectSpec::default())
    }

    #[tokio::test]
    async fn test_create_assigns_server_metadata() {
        let api = InMemoryProjectApi::new();
        let created = api.create(project("alpha"), false).await.unwrap();

        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert_eq!(created.metadata.generation, Some(1));

        let err = api.create(project("alpha"), false).await.unwrap_err();
        assert_eq!(err.code, RemoteErrorCode::AlreadyExists);
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_update_requires_current_version() {
        let api = InMemoryProjectApi::new();
        let created = api.create(project("alpha"), false).await.unwrap();

        let mut stale = project("alpha");
        assert_matches!(api.update(stale.clone()).await, Err(e) if e.is_conflict());

        stale.metadata.resource_version = created.metadata.resource_version.clone();
        let updated = api.update(stale.clone()).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(2));
        assert_eq!(updated.metadata.uid, created.metadata.uid);

        // second write with the same version is stale now
        assert_matches!(api.update(stale).await, Err(e) if e.is_conflict());
    }

    #[tokio::test]
    async fn test_controller_metadata_added_on_create() {
        let api = InMemoryProjectApi::new().with_argocd_controller();
        let created = api.create(project("alpha"), false).await.unwrap();

        assert_eq!(
            created.metadata.finalizers,
            Some(vec![CONTROLLER_FINALIZER.to_string()])
        );
        assert!(created
            .metadata
            .annotations
            .unwrap()
            .contains_key("notified.notifications.argoproj.io"));
    }

    #[tokio::test]
    async fn test_soft_deleted_object_purged_after_grace() {
        let api = InMemoryProjectApi::new();
        api.create(project("alpha"), false).await.unwrap();
        assert!(api.mark_deleting("alpha", Duration::from_millis(20)).await);

        let live = api.get("alpha").await.unwrap();
        assert!(live.metadata.deletion_timestamp.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_matches!(api.get("alpha").await, Err(e) if e.is_not_found());
        api.create(project("alpha"), false).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failures_and_counts() {
        let api = InMemoryProjectApi::new();
        api.fail_next(ApiOperation::Get, RemoteError::other("connection refused"))
            .await;

        assert_matches!(api.get("alpha").await, Err(e) if e.message == "connection refused");
        assert_matches!(api.get("alpha").await, Err(e) if e.is_not_found());
        assert_matches!(api.delete("alpha").await, Err(e) if e.is_not_found());

        assert_eq!(api.calls(ApiOperation::Get), 2);
        assert_eq!(api.calls(ApiOperation::Delete), 1);
        assert_eq!(api.total_calls(), 3);
    }
}
