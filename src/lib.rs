//! Argo CD Provider Core
//!
//! The reconciliation core of an infrastructure-as-code provider for Argo CD.
//! Declared resources are expanded into Argo CD wire objects, pushed through
//! a locked Create/Read/Update/Delete lifecycle and flattened back into state
//! that only reports what the user owns.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Provider Session                                    │
//! │        (server capabilities, metrics, one lock registry per kind)           │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Lifecycle     │  │  Named Mutex    │  │   Desired-State Expander    │  │
//! │  │  Orchestrator   │──│    Registry     │  │   (resources::project)      │  │
//! │  └────────┬────────┘  └─────────────────┘  └─────────────┬───────────────┘  │
//! │           │                                              │                   │
//! │           │                                ┌─────────────┴───────────────┐  │
//! │           │                                │    Metadata Reconciler      │  │
//! │           │                                └─────────────────────────────┘  │
//! ├───────────┴─────────────────────────────────────────────────────────────────┤
//! │                        Control Plane Adapters                                │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │   Kubernetes API server     │  │          In-memory                  │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Lifecycle orchestrator, session, feature gating and adapters
//! - [`metadata`]: Ownership rules for labels, annotations and finalizers
//! - [`registry`]: Per-name reader/writer locks
//! - [`resources`]: Managed resource kinds
//! - [`crd`]: Argo CD wire types
//! - [`domain`]: Declarative models and ports
//! - [`error`]: Error types and diagnostics

pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metadata;
pub mod registry;
pub mod resources;

// Re-export commonly used types
pub use controlplane::{
    Feature, InMemoryProjectApi, KubeProjectApi, Lifecycle, LifecycleConfig, LifecycleMetrics,
    ProviderSession, ServerCapabilities, ServerVersion, SessionConfig,
};

pub use crd::{AppProject, AppProjectSpec};

pub use domain::{
    ManagedResource, MetadataModel, ProjectModel, ProjectSpecModel, RemoteError,
    RemoteErrorCode, ResourceApi, ResourceApiRef,
};

pub use error::{Diagnostic, Error, Result, Severity};

pub use registry::{LockMode, NamedMutexRegistry, ResourceGuard};

pub use resources::Project;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
