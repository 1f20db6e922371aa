//! Domain Ports - Core trait definitions for the provider
//!
//! These traits define the boundaries between the lifecycle core and the
//! systems around it: the remote control-plane API on one side and the
//! per-kind translation between declarative model and wire object on the
//! other.

use crate::controlplane::features::Feature;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Remote Errors
// =============================================================================

/// Classification reported by the remote adapter, when it knows one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteErrorCode {
    NotFound,
    AlreadyExists,
    Conflict,
    Other,
}

/// Error returned by a remote API call.
///
/// Adapters are not required to classify their errors; the predicates fall
/// back to inspecting the message the server returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub code: RemoteErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::AlreadyExists, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::Conflict, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::Other, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == RemoteErrorCode::NotFound
            || self.message.contains("NotFound")
            || self.message.to_lowercase().contains("not found")
    }

    pub fn is_already_exists(&self) -> bool {
        self.code == RemoteErrorCode::AlreadyExists
            || self.message.contains("AlreadyExists")
            || self.message.to_lowercase().contains("already exists")
    }

    pub fn is_conflict(&self) -> bool {
        self.code == RemoteErrorCode::Conflict
            || self.message.contains("the object has been modified")
    }
}

/// Result of a single remote call
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

// =============================================================================
// Resource API Port
// =============================================================================

/// Port for the remote control-plane API of one resource kind
#[async_trait]
pub trait ResourceApi<O>: Send + Sync {
    /// Fetch the live object
    async fn get(&self, name: &str) -> RemoteResult<O>;

    /// Create a new object; with `upsert` false an existing object is an error
    async fn create(&self, object: O, upsert: bool) -> RemoteResult<O>;

    /// Replace an object; `metadata.resourceVersion` must match the live one
    async fn update(&self, object: O) -> RemoteResult<O>;

    /// Delete an object by name
    async fn delete(&self, name: &str) -> RemoteResult<()>;
}

pub type ResourceApiRef<O> = Arc<dyn ResourceApi<O>>;

// =============================================================================
// Managed Resource Port
// =============================================================================

/// Translation hooks between a declarative model and its wire object
pub trait ManagedResource: Send + Sync + 'static {
    /// Kind name used in diagnostics and metrics
    const KIND: &'static str;

    /// Declarative model
    type Model: Clone + Send + Sync + 'static;

    /// Wire object exchanged with the remote API
    type Object: kube::Resource<DynamicType = ()> + Clone + Send + Sync + 'static;

    /// Name identifying the resource on the server
    fn name(model: &Self::Model) -> &str;

    /// Features the declaration relies on
    fn required_features(model: &Self::Model) -> Vec<Feature>;

    /// Desired object for a create
    fn expand(model: &Self::Model) -> Result<Self::Object>;

    /// Reject a declaration that cannot be expanded, before any remote call
    fn validate(model: &Self::Model) -> Result<()> {
        Self::expand(model).map(|_| ())
    }

    /// Desired object for an update against the current live object.
    ///
    /// Implementations keep metadata owned by other actors and carry
    /// server-issued sub-records forward. The resource version is attached
    /// by the caller.
    fn expand_for_update(model: &Self::Model, live: &Self::Object) -> Result<Self::Object>;

    /// New state from a live object, filtered against the prior declaration
    fn flatten(object: &Self::Object, prior: &Self::Model) -> Self::Model;

    /// Skeleton model for an imported resource
    fn model_for_import(name: &str) -> Self::Model;
}
