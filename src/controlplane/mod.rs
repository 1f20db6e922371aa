//! Control Plane Module
//!
//! Drives managed resources through their lifecycle against the Argo CD
//! control plane: feature gating on the server version, per-name locking,
//! the CRUD sequencing itself and the adapters that reach the server.

pub mod backends;
pub mod features;
pub mod lifecycle;
pub mod metrics;
pub mod session;

pub use backends::*;
pub use features::*;
pub use lifecycle::*;
pub use metrics::*;
pub use session::*;
