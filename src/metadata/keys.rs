//! System-owned label and annotation keys
//!
//! Keys are hostname-qualified (`<subdomain>.<domain>/<name>`). Anything the
//! platform or another controller stamps onto an object lives under the
//! platform domain, plus a single exact key written by the notifications
//! controller.

use std::collections::BTreeMap;
use tracing::trace;

/// Hostname suffix reserved by the platform
pub const INTERNAL_DOMAIN_SUFFIX: &str = "kubernetes.io";

/// Annotation written by the notifications controller after delivery
pub const NOTIFIED_ANNOTATION: &str = "notified.notifications.argoproj.io";

/// Whether `key` is owned by the platform rather than the user.
///
/// Keys without a hostname qualifier, empty keys and keys that do not parse
/// as `[scheme://][userinfo@]host[:port][/path]` are never internal.
pub fn is_internal_key(key: &str) -> bool {
    if key == NOTIFIED_ANNOTATION {
        return true;
    }

    key_hostname(key).is_some_and(|host| host.ends_with(INTERNAL_DOMAIN_SUFFIX))
}

/// Drop every key of `live` that is internal and not declared by the user.
///
/// Declared keys are kept even when they look internal. Keys are only ever
/// removed, never added or renamed.
pub fn filter_owned_keys(
    live: &BTreeMap<String, String>,
    declared: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    live.iter()
        .filter(|(key, _)| {
            let owned_elsewhere = is_internal_key(key) && !declared.contains_key(*key);
            if owned_elsewhere {
                trace!(key = %key, "hiding system-owned metadata key");
            }
            !owned_elsewhere
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Live system-owned keys the user did not declare, added onto `declared`.
///
/// Used when replacing an object so that keys stamped by other controllers
/// are not wiped by a full update.
pub fn carry_owned_keys(
    live: &BTreeMap<String, String>,
    declared: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = declared.clone();
    for (key, value) in live {
        if is_internal_key(key) && !declared.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Hostname portion of a qualified key
fn key_hostname(key: &str) -> Option<&str> {
    let rest = match key.split_once("://") {
        Some((scheme, rest)) if is_scheme(scheme) => rest,
        _ => key,
    };

    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = match authority.rsplit_once('@') {
        Some((_, host_port)) => host_port,
        None => authority,
    };

    let host = match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        Some(_) => return None,
        None => host_port,
    };

    let valid = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));

    valid.then_some(host)
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
