//! Resource Lock Registry Module
//!
//! Per-name reader/writer locks serializing lifecycle operations on the same
//! server-side resource.

pub mod mutex_registry;

pub use mutex_registry::*;
