//! Server Capability Detection
//!
//! Some project attributes only exist on newer Argo CD servers. A declaration
//! using one of them against an older server is rejected before anything is
//! written.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Server Version
// =============================================================================

/// `major.minor.patch` version reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ServerVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `v2.13.1`, `2.13.1+f3c2a1b`, `2.13.1-rc2` or `2.13`
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed
            .split(['+', '-'])
            .next()
            .unwrap_or_default();

        let invalid = || Error::Configuration(format!("invalid server version: {:?}", raw));

        let mut parts = core.split('.');
        let mut component = |required: bool| -> Result<u64> {
            match parts.next() {
                Some(part) => part.parse::<u64>().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };

        let version = Self::new(component(true)?, component(true)?, component(false)?);

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(version)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// =============================================================================
// Features
// =============================================================================

/// Capability that depends on the server version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// `spec.sourceNamespaces` on projects
    ProjectSourceNamespaces,
    /// `spec.destinationServiceAccounts` on projects
    ProjectDestinationServiceAccounts,
}

impl Feature {
    /// First server version supporting the feature
    pub const fn min_version(self) -> ServerVersion {
        match self {
            Feature::ProjectSourceNamespaces => ServerVersion::new(2, 5, 0),
            Feature::ProjectDestinationServiceAccounts => ServerVersion::new(2, 13, 0),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::ProjectSourceNamespaces => write!(f, "project source namespaces"),
            Feature::ProjectDestinationServiceAccounts => {
                write!(f, "project destination service accounts")
            }
        }
    }
}

// =============================================================================
// Server Capabilities
// =============================================================================

/// What the connected server supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    version: Option<ServerVersion>,
}

impl ServerCapabilities {
    /// Capabilities of a server; `None` if it did not report a version
    pub fn new(version: Option<ServerVersion>) -> Self {
        Self { version }
    }

    pub fn from_version_str(raw: Option<&str>) -> Result<Self> {
        raw.map(ServerVersion::parse).transpose().map(Self::new)
    }

    pub fn version(&self) -> Option<ServerVersion> {
        self.version
    }

    pub fn is_supported(&self, feature: Feature) -> bool {
        self.version
            .map_or(true, |version| version >= feature.min_version())
    }

    /// Fail on the first unsupported feature
    pub fn ensure_supported(&self, features: &[Feature]) -> Result<()> {
        match features.iter().find(|feature| !self.is_supported(**feature)) {
            Some(feature) => Err(Error::FeatureUnsupported {
                feature: feature.to_string(),
                min_version: feature.min_version().to_string(),
            }),
            None => Ok(()),
        }
    }
}
