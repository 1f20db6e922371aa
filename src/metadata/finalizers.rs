//! Finalizer ownership
//!
//! Controllers add finalizers to objects the user manages. Those must stay on
//! the server object but must not show up in the user's state, or the next
//! plan would try to remove them.

use serde_json::Value;
use std::collections::HashSet;

/// An entry of a declared finalizer list.
///
/// Declarations coming from loosely typed sources may contain entries that
/// are not strings; those never match a live finalizer.
pub trait AsFinalizer {
    fn as_finalizer(&self) -> Option<&str>;
}

impl AsFinalizer for String {
    fn as_finalizer(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl AsFinalizer for &str {
    fn as_finalizer(&self) -> Option<&str> {
        Some(*self)
    }
}

impl AsFinalizer for Option<String> {
    fn as_finalizer(&self) -> Option<&str> {
        self.as_deref()
    }
}

impl AsFinalizer for Value {
    fn as_finalizer(&self) -> Option<&str> {
        self.as_str()
    }
}

/// Live finalizers the user declared, in live order
pub fn filter_declared_finalizers<T: AsFinalizer>(live: &[String], declared: &[T]) -> Vec<String> {
    let declared: HashSet<&str> = declared.iter().filter_map(|entry| entry.as_finalizer()).collect();

    live.iter()
        .filter(|finalizer| declared.contains(finalizer.as_str()))
        .cloned()
        .collect()
}

/// Finalizer list to send on update.
///
/// Every live finalizer is kept in its live position, including ones another
/// controller added after the user's last read. Declared finalizers not yet
/// on the object are appended in declaration order, each at most once.
pub fn merge_finalizers_for_update(existing_live: &[String], user_declared: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = existing_live.iter().map(String::as_str).collect();
    let mut merged = existing_live.to_vec();

    for finalizer in user_declared {
        if seen.insert(finalizer.as_str()) {
            merged.push(finalizer.clone());
        }
    }

    merged
}
