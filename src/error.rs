//! Error types for the Argo CD provider core
//!
//! Every failure that leaves a lifecycle operation is one of these variants.
//! Remote failures carry the operation, resource kind and resource name so a
//! diagnostic can be rendered without retrying the call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the provider core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Remote API Errors
    // =========================================================================
    #[error("failed to {operation} {kind} {name}: {message}")]
    RemoteApi {
        operation: String,
        kind: String,
        name: String,
        message: String,
    },

    #[error("{kind} {name} already exists: {message}")]
    AlreadyExists {
        kind: String,
        name: String,
        message: String,
    },

    #[error("{kind} {name} was modified concurrently, re-read and retry: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("{operation} of {kind} {name} was cancelled")]
    Cancelled {
        operation: String,
        kind: String,
        name: String,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("{feature} is only supported from Argo CD {min_version} onwards")]
    FeatureUnsupported { feature: String, min_version: String },

    #[error("project role {role} could not be retrieved: {reason}")]
    RoleRetrieval { role: String, reason: String },

    #[error("invalid import identifier: {0:?}")]
    InvalidImportId(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Severity of a diagnostic handed back to the orchestrating framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Typed diagnostic returned from the lifecycle entry points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl Error {
    /// Build a remote error wrapped with operation context
    pub fn remote(
        operation: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::RemoteApi {
            operation: operation.into(),
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Errors the user has to fix in their configuration rather than on the server
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::AlreadyExists { .. }
                | Error::FeatureUnsupported { .. }
                | Error::InvalidImportId(_)
                | Error::Configuration(_)
                | Error::YamlParse(_)
        )
    }

    /// Render the error as a diagnostic for the framework
    pub fn diagnostic(&self) -> Diagnostic {
        let summary = match self {
            Error::RemoteApi {
                operation,
                kind,
                name,
                ..
            } => format!("failed to {} {} {}", operation, kind, name),
            Error::AlreadyExists { kind, .. } => format!("{} already exists", kind),
            Error::Conflict { kind, .. } => format!("{} update conflict", kind),
            Error::Cancelled { .. } => "operation cancelled".to_string(),
            Error::FeatureUnsupported { .. } => "feature not supported".to_string(),
            Error::RoleRetrieval { .. } => "project role retrieval failed".to_string(),
            Error::InvalidImportId(_) => "invalid import identifier".to_string(),
            Error::Configuration(_) | Error::YamlParse(_) => "invalid configuration".to_string(),
            Error::JsonParse(_) | Error::Metrics(_) | Error::Io(_) => "internal error".to_string(),
        };

        Diagnostic {
            severity: Severity::Error,
            summary,
            detail: self.to_string(),
        }
    }
}

/// Result type alias for the provider core
pub type Result<T> = std::result::Result<T, Error>;
