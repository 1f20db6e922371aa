//! Lifecycle Metrics
//!
//! Counters for lifecycle operations, kept in a registry owned by the
//! provider session so several sessions in one process do not collide.

use crate::error::Result;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// How a lifecycle operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Ok,
    /// The resource no longer exists (read) or already did not exist (delete)
    Absent,
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Absent => "absent",
            Outcome::Error => "error",
        }
    }
}

/// Prometheus metrics for one provider session
pub struct LifecycleMetrics {
    registry: Registry,
    operations: IntCounterVec,
    lock_entries: IntGaugeVec,
}

impl LifecycleMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new(
                "argocd_provider_operations_total",
                "Lifecycle operations by resource kind, operation and outcome",
            ),
            &["kind", "operation", "outcome"],
        )?;
        let lock_entries = IntGaugeVec::new(
            Opts::new(
                "argocd_provider_lock_entries",
                "Named resource locks created in this session by resource kind",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(lock_entries.clone()))?;

        Ok(Self {
            registry,
            operations,
            lock_entries,
        })
    }

    pub fn record(&self, kind: &str, operation: &str, outcome: Outcome) {
        self.operations
            .with_label_values(&[kind, operation, outcome.as_str()])
            .inc();
    }

    pub fn operation_count(&self, kind: &str, operation: &str, outcome: Outcome) -> u64 {
        self.operations
            .with_label_values(&[kind, operation, outcome.as_str()])
            .get()
    }

    pub fn set_lock_entries(&self, kind: &str, entries: usize) {
        self.lock_entries
            .with_label_values(&[kind])
            .set(entries as i64);
    }

    pub fn lock_entries(&self, kind: &str) -> i64 {
        self.lock_entries.with_label_values(&[kind]).get()
    }

    /// Text exposition of every metric in the session
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for LifecycleMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleMetrics").finish_non_exhaustive()
    }
}
