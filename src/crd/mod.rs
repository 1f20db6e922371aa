//! Wire types for the Argo CD resources managed by the provider
//!
//! This module contains the server-side representations:
//! - AppProject: project scoping applications, destinations and roles

pub mod app_project;

pub use app_project::*;
