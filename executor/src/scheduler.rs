//! Pure scheduling helpers (`spec.md` §4.3 step 5, §5): which changes are
//! ready to attempt next, and whether a change is blocked by a failed or
//! still-blocked prerequisite. Kept free of I/O so the batching logic is
//! unit-testable without a runtime.

use std::collections::BTreeSet;

use kongctl_planner::plan::PlannedChange;

/// The next contiguous run of `execution_order` entries (up to
/// `concurrency`) whose dependencies have all reached a terminal state.
/// Stops at the first not-yet-ready entry rather than skipping ahead, so
/// the batch never runs a change out of its planned relative order.
pub fn next_batch<'a>(
    changes_by_id: &std::collections::BTreeMap<&str, &'a PlannedChange>,
    execution_order: &[String],
    terminal: &BTreeSet<String>,
    concurrency: usize,
) -> Vec<&'a PlannedChange> {
    let mut batch = Vec::new();
    for id in execution_order {
        if terminal.contains(id) {
            continue;
        }
        let Some(&change) = changes_by_id.get(id.as_str()) else { continue };
        if !change.depends_on.iter().all(|dep| terminal.contains(dep)) {
            break;
        }
        batch.push(change);
        if batch.len() >= concurrency.max(1) {
            break;
        }
    }
    batch
}

/// A change is blocked when any of its prerequisites reached a terminal
/// state without succeeding (`spec.md` §4.3 step 2: "skipped-blocked").
pub fn is_blocked(change: &PlannedChange, succeeded: &BTreeSet<String>, terminal: &BTreeSet<String>) -> bool {
    change.depends_on.iter().any(|dep| terminal.contains(dep) && !succeeded.contains(dep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kongctl_planner::plan::{Action, ChangeFields};
    use kongctl_model::Kind;
    use serde_json::Map;

    fn change(id: &str, depends_on: &[&str]) -> PlannedChange {
        PlannedChange {
            id: id.to_string(),
            kind: Kind::Portal,
            r#ref: id.to_string(),
            remote_id: None,
            action: Action::Create,
            fields: ChangeFields::Create(Map::new()),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            references: Vec::new(),
            parent: None,
            namespace: "default".to_string(),
            protection: false,
            config_hash: String::new(),
            pre_image_hash: None,
        }
    }

    #[test]
    fn batches_only_ready_prefix() {
        let a = change("a", &[]);
        let b = change("b", &["a"]);
        let c = change("c", &[]);
        let changes = vec![a, b, c];
        let by_id: std::collections::BTreeMap<&str, &PlannedChange> =
            changes.iter().map(|c| (c.id.as_str(), c)).collect();
        let order = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let terminal = BTreeSet::new();

        let batch = next_batch(&by_id, &order, &terminal, 4);
        assert_eq!(batch.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn dependent_blocked_when_dependency_failed_not_succeeded() {
        let b = change("b", &["a"]);
        let succeeded = BTreeSet::new();
        let mut terminal = BTreeSet::new();
        terminal.insert("a".to_string());
        assert!(is_blocked(&b, &succeeded, &terminal));
    }

    #[test]
    fn dependent_ready_when_dependency_succeeded() {
        let b = change("b", &["a"]);
        let mut succeeded = BTreeSet::new();
        succeeded.insert("a".to_string());
        let mut terminal = BTreeSet::new();
        terminal.insert("a".to_string());
        assert!(!is_blocked(&b, &succeeded, &terminal));
    }
}
