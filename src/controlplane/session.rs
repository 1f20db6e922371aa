//! Provider Session
//!
//! State shared by every lifecycle operation of one provider process: the
//! negotiated server capabilities, the metrics registry and one named lock
//! registry per resource kind. Lock entries live as long as the session.

use crate::controlplane::features::ServerCapabilities;
use crate::controlplane::lifecycle::{Lifecycle, LifecycleConfig};
use crate::controlplane::metrics::LifecycleMetrics;
use crate::domain::ports::{ManagedResource, ResourceApiRef};
use crate::error::Result;
use crate::registry::NamedMutexRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

// =============================================================================
// Session Configuration
// =============================================================================

/// Configuration for a provider session
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Argo CD server version, when known
    pub server_version: Option<String>,
    pub lifecycle: LifecycleConfig,
}

// =============================================================================
// Provider Session
// =============================================================================

/// Process-wide provider state
pub struct ProviderSession {
    config: SessionConfig,
    capabilities: ServerCapabilities,
    metrics: Arc<LifecycleMetrics>,
    locks: DashMap<&'static str, Arc<NamedMutexRegistry>>,
}

impl ProviderSession {
    /// Create a session; fails when the configured server version is malformed
    pub fn new(config: SessionConfig) -> Result<Arc<Self>> {
        let capabilities = ServerCapabilities::from_version_str(config.server_version.as_deref())?;
        let metrics = Arc::new(LifecycleMetrics::new()?);

        match capabilities.version() {
            Some(version) => info!("Provider session targeting Argo CD {}", version),
            None => info!("Provider session with unknown server version"),
        }

        Ok(Arc::new(Self {
            config,
            capabilities,
            metrics,
            locks: DashMap::new(),
        }))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    pub fn metrics(&self) -> &Arc<LifecycleMetrics> {
        &self.metrics
    }

    /// Lock registry for a resource kind, created on first use
    pub fn locks_for<K: ManagedResource>(&self) -> Arc<NamedMutexRegistry> {
        self.locks
            .entry(K::KIND)
            .or_insert_with(NamedMutexRegistry::new)
            .clone()
    }

    /// Lifecycle entry points for `K`, backed by `api`
    pub fn lifecycle<K: ManagedResource>(&self, api: ResourceApiRef<K::Object>) -> Lifecycle<K> {
        Lifecycle::new(
            api,
            self.locks_for::<K>(),
            self.capabilities,
            self.config.lifecycle.clone(),
            self.metrics.clone(),
        )
    }
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .field("kinds", &self.locks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Project;
    use assert_matches::assert_matches;

    #[test]
    fn test_locks_shared_per_kind() {
        let session = ProviderSession::new(SessionConfig::default()).unwrap();

        let first = session.locks_for::<Project>();
        let second = session.locks_for::<Project>();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_malformed_version_rejected() {
        let config = SessionConfig {
            server_version: Some("two.five".into()),
            ..Default::default()
        };

        assert_matches!(
            ProviderSession::new(config),
            Err(crate::error::Error::Configuration(_))
        );
    }
}
