//! System labels: the managed-label protocol (`spec.md` §3).
//!
//! These are read and written by the engine only. Users never author them;
//! the Loader rejects any user label that collides with one of these keys.

use std::collections::BTreeMap;

/// `"true"` — object is under engine control.
pub const MANAGED: &str = "KONGCTL-managed";
/// Namespace string.
pub const NAMESPACE: &str = "KONGCTL-namespace";
/// Canonical hash of the desired config that produced the state.
pub const CONFIG_HASH: &str = "KONGCTL-config-hash";
/// ISO-8601 timestamp of the last engine write.
pub const LAST_UPDATED: &str = "KONGCTL-last-updated";
/// `"true"` blocks destructive operations until flipped off.
pub const PROTECTED: &str = "KONGCTL-protected";
/// Fallback ref-identifying label for kinds with no natural unique remote
/// field (`spec.md` §9 open question, resolved in `DESIGN.md`).
pub const REF: &str = "KONGCTL-ref";

/// All system label keys, for filtering them out of user label maps.
pub const ALL: &[&str] = &[MANAGED, NAMESPACE, CONFIG_HASH, LAST_UPDATED, PROTECTED, REF];

pub fn is_system_label(key: &str) -> bool {
    ALL.contains(&key)
}

/// `true` iff the labels carry `KONGCTL-managed=true` for the given
/// namespace. Used by the Planner/Executor "safety" invariant (`spec.md`
/// §8): nothing lacking this is ever mutated or deleted outside `adopt`.
pub fn is_managed(labels: &BTreeMap<String, String>, namespace: &str) -> bool {
    labels.get(MANAGED).map(String::as_str) == Some("true")
        && labels.get(NAMESPACE).map(String::as_str) == Some(namespace)
}

pub fn is_protected(labels: &BTreeMap<String, String>) -> bool {
    labels.get(PROTECTED).map(String::as_str) == Some("true")
}

/// Builds the system label set to write on a successful create/update.
pub fn managed_labels(namespace: &str, config_hash: &str, now: chrono::DateTime<chrono::Utc>) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED.to_string(), "true".to_string()),
        (NAMESPACE.to_string(), namespace.to_string()),
        (CONFIG_HASH.to_string(), config_hash.to_string()),
        (LAST_UPDATED.to_string(), now.to_rfc3339()),
    ])
}
