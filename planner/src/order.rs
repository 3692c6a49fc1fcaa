//! Topological ordering of a change set (`spec.md` §4.2 "Ordering").
//!
//! Edges are `depends_on`. Ties among ready nodes are broken by `(kind
//! order, ref)`. Any cycle is a hard failure.

use std::collections::BTreeMap;

use crate::plan::PlannedChange;
use crate::Error;

pub fn topological_order(changes: &[PlannedChange]) -> Result<Vec<String>, Error> {
    let by_id: BTreeMap<&str, &PlannedChange> = changes.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut remaining: BTreeMap<String, usize> = changes.iter().map(|c| (c.id.clone(), 0)).collect();
    let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for change in changes {
        for dep in &change.depends_on {
            if by_id.contains_key(dep.as_str()) {
                *remaining.get_mut(&change.id).unwrap() += 1;
                dependents.entry(dep.clone()).or_default().push(change.id.clone());
            }
        }
    }

    let mut order = Vec::with_capacity(changes.len());
    loop {
        let mut ready: Vec<&PlannedChange> =
            changes.iter().filter(|c| remaining.get(&c.id) == Some(&0)).collect();
        if ready.is_empty() {
            break;
        }
        ready.sort_by(|a, b| (a.kind.priority(), a.r#ref.as_str()).cmp(&(b.kind.priority(), b.r#ref.as_str())));
        let next_id = ready[0].id.clone();
        order.push(next_id.clone());
        remaining.remove(&next_id);
        if let Some(deps) = dependents.get(&next_id) {
            for dependent in deps {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    if order.len() != changes.len() {
        let stuck: Vec<&str> = changes.iter().map(|c| c.id.as_str()).filter(|id| !order.contains(&id.to_string())).collect();
        return Err(Error::Cycle(stuck.join(", ")));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Action, ChangeFields};
    use kongctl_model::Kind;
    use serde_json::Map;

    fn change(id: &str, kind: Kind, r#ref: &str, depends_on: &[&str]) -> PlannedChange {
        PlannedChange {
            id: id.to_string(),
            kind,
            r#ref: r#ref.to_string(),
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
    fn orders_by_dependency_then_priority() {
        let changes = vec![
            change("2:c:apis:a1", Kind::Api, "a1", &["1:c:portals:p1"]),
            change("1:c:portals:p1", Kind::Portal, "p1", &[]),
        ];
        let order = topological_order(&changes).unwrap();
        assert_eq!(order, vec!["1:c:portals:p1".to_string(), "2:c:apis:a1".to_string()]);
    }

    #[test]
    fn detects_cycles() {
        let changes = vec![
            change("a", Kind::Portal, "a", &["b"]),
            change("b", Kind::Portal, "b", &["a"]),
        ];
        assert!(topological_order(&changes).is_err());
    }
}
