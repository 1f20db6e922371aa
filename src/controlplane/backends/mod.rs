//! Control Plane Adapters
//!
//! Implementations of [`ResourceApi`](crate::domain::ports::ResourceApi):
//! - Kube: the Kubernetes API server Argo CD stores its resources in
//! - Memory: an in-process control plane for tests and dry runs

pub mod kubernetes;
pub mod memory;

pub use kubernetes::*;
pub use memory::*;
