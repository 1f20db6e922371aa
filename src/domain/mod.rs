//! Domain layer - declarative models and port definitions
//!
//! This module defines the typed declarative models and the traits (ports)
//! that remote adapters and resource kinds implement.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
