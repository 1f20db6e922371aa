//! Managed resource kinds
//!
//! Each kind implements [`ManagedResource`](crate::domain::ports::ManagedResource)
//! and is driven through the generic lifecycle.

pub mod project;

pub use project::*;
