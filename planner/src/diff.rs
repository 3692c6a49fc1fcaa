//! The diff algorithm (`spec.md` §4.2 steps 1-7): desired `ResourceSet`
//! against a `CurrentState` snapshot, yielding the unordered change set
//! that `order.rs` later linearizes.

use std::collections::{BTreeMap, BTreeSet};

use kongctl_model::{labels, Kind, ParentRef, Resource, ResourceSet};
use kongctl_remote::{state::CurrentState, CurrentObject, RefField};
use serde_json::{Map, Value};

use crate::filter::{matches_any, RefFilter};
use crate::plan::{Action, ChangeFields, FieldChange, Mode, PlannedChange, UNKNOWN_ID};
use crate::Error;

pub struct DiffOptions<'a> {
    pub mode: Mode,
    pub ignore_refs: &'a [RefFilter],
    pub isolate_refs: &'a [RefFilter],
}

pub struct DiffOutput {
    pub changes: Vec<PlannedChange>,
    pub warnings: Vec<String>,
}

struct Pending {
    kind: Kind,
    r#ref: String,
    namespace: String,
    parent: Option<ParentRef>,
    remote_id: Option<String>,
    action: Action,
    fields: ChangeFields,
    protection: bool,
    config_hash: String,
    pre_image_hash: Option<String>,
    depends_on: Vec<usize>,
    references: Vec<(Kind, String, String)>,
}

/// The ref-identifying field value for a desired resource, per its kind's
/// adapter spec (`spec.md` §4.2 step 2).
fn ref_key_for(resource: &Resource) -> String {
    match kongctl_remote::spec_for(resource.kind).ref_field {
        RefField::Name => resource.name.clone(),
        RefField::Slug => resource
            .fields
            .get("slug")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| resource.name.clone()),
        RefField::Label => resource.r#ref.clone(),
    }
}

fn collect_ref_tokens(value: &Value, out: &mut Vec<kongctl_model::RefToken>) {
    if let Some(token) = kongctl_model::RefToken::from_json(value) {
        out.push(token);
        return;
    }
    match value {
        Value::Object(map) => {
            for v in map.values() {
                collect_ref_tokens(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_ref_tokens(v, out);
            }
        }
        _ => {}
    }
}

fn field_diff(resource: &Resource, current_raw: &Value) -> BTreeMap<String, FieldChange> {
    let mut desired = resource.fields.clone();
    desired.insert("name".to_string(), Value::String(resource.name.clone()));
    let mut out = BTreeMap::new();
    for (key, new) in &desired {
        let old = current_raw.get(key).cloned().unwrap_or(Value::Null);
        if &old != new {
            out.insert(key.clone(), FieldChange { old, new: new.clone() });
        }
    }
    out
}

pub fn diff(resources: &ResourceSet, current: &CurrentState, options: DiffOptions<'_>) -> Result<DiffOutput, Error> {
    // Step 7: resolve the planned subset. `ignore_refs` removes matches
    // entirely; `isolate_refs`, when non-empty, keeps only matches.
    let mut planned: BTreeSet<(Kind, String)> = BTreeSet::new();
    for resource in resources.iter() {
        if resource.is_external() {
            continue;
        }
        if matches_any(options.ignore_refs, resource.kind, &resource.r#ref) {
            continue;
        }
        if !options.isolate_refs.is_empty() && !matches_any(options.isolate_refs, resource.kind, &resource.r#ref) {
            continue;
        }
        planned.insert((resource.kind, resource.r#ref.clone()));
    }

    if !options.isolate_refs.is_empty() {
        for (kind, r#ref) in &planned {
            let resource = resources
                .iter()
                .find(|r| r.kind == *kind && &r.r#ref == r#ref)
                .expect("planned key always names a resource in the set");
            if let Some(parent) = &resource.parent {
                let parent_planned = planned.contains(&(parent.kind, parent.r#ref.clone()));
                let parent_exists_remote = resources
                    .iter()
                    .find(|r| r.kind == parent.kind && r.r#ref == parent.r#ref)
                    .map(|parent_resource| current.get(parent.kind, &ref_key_for(parent_resource)).is_some())
                    .unwrap_or(false);
                if !parent_planned && !parent_exists_remote {
                    return Err(Error::IsolatedParentMissing {
                        kind: resource.kind,
                        resource_ref: resource.r#ref.clone(),
                        parent_kind: parent.kind,
                        parent_ref: parent.r#ref.clone(),
                    });
                }
            }
        }
    }

    let mut all_desired_ref_keys: BTreeMap<Kind, BTreeSet<String>> = BTreeMap::new();
    for resource in resources.iter() {
        all_desired_ref_keys.entry(resource.kind).or_default().insert(ref_key_for(resource));
    }

    let mut pending: Vec<Pending> = Vec::new();
    let mut create_index: BTreeMap<(Kind, String), usize> = BTreeMap::new();
    let mut warnings: Vec<String> = Vec::new();

    for kind in Kind::ALL.iter().copied() {
        let mut considered_ref_keys: BTreeSet<String> = BTreeSet::new();

        for resource in resources.iter_kind(kind) {
            if !planned.contains(&(kind, resource.r#ref.clone())) {
                continue;
            }
            let ref_key = ref_key_for(resource);
            considered_ref_keys.insert(ref_key.clone());
            let desired_hash = resource.canonical_hash().map_err(Error::Model)?;
            let current_obj = current.get(kind, &ref_key);

            if kind.is_singleton_child() && !kongctl_remote::spec_for(kind).supports_update {
                match current_obj {
                    None => push_create(&mut pending, &mut create_index, resource, desired_hash),
                    Some(obj) if obj.config_hash.as_deref() == Some(desired_hash.as_str()) => {}
                    Some(obj) => {
                        let delete_idx = pending.len();
                        pending.push(Pending {
                            kind,
                            r#ref: resource.r#ref.clone(),
                            namespace: resource.namespace.clone(),
                            parent: resource.parent.clone(),
                            remote_id: Some(obj.remote_id.clone()),
                            action: Action::Delete,
                            fields: ChangeFields::Delete(Map::new()),
                            protection: labels::is_protected(&obj.labels),
                            config_hash: obj.config_hash.clone().unwrap_or_default(),
                            pre_image_hash: obj.config_hash.clone(),
                            depends_on: Vec::new(),
                            references: Vec::new(),
                        });
                        push_create(&mut pending, &mut create_index, resource, desired_hash);
                        let create_idx = pending.len() - 1;
                        pending[create_idx].depends_on.push(delete_idx);
                        if options.mode == Mode::Apply {
                            warnings.push(format!(
                                "{kind} {:?} replaced via delete+create in apply mode (immutable field changed)",
                                resource.r#ref
                            ));
                        }
                    }
                }
            } else {
                match current_obj {
                    None => push_create(&mut pending, &mut create_index, resource, desired_hash),
                    Some(obj) if obj.config_hash.as_deref() == Some(desired_hash.as_str()) => {}
                    Some(obj) => {
                        let fields = field_diff(resource, &obj.raw);
                        pending.push(Pending {
                            kind,
                            r#ref: resource.r#ref.clone(),
                            namespace: resource.namespace.clone(),
                            parent: resource.parent.clone(),
                            remote_id: Some(obj.remote_id.clone()),
                            action: Action::Update,
                            fields: ChangeFields::Update(fields),
                            protection: labels::is_protected(&obj.labels),
                            config_hash: desired_hash,
                            pre_image_hash: obj.config_hash.clone(),
                            depends_on: Vec::new(),
                            references: Vec::new(),
                        });
                    }
                }
            }
        }

        let declared_elsewhere = all_desired_ref_keys.get(&kind).cloned().unwrap_or_default();
        for obj in current.iter_kind(kind) {
            if considered_ref_keys.contains(&obj.ref_key) || declared_elsewhere.contains(&obj.ref_key) {
                continue;
            }
            if obj.labels.get(labels::MANAGED).map(String::as_str) != Some("true") {
                continue;
            }
            if kind.is_singleton_child() {
                if options.mode == Mode::Sync {
                    push_delete(&mut pending, kind, obj, current);
                } else {
                    warnings.push(format!("{kind} {:?} omitted from desired state; not deleted in apply mode", obj.ref_key));
                }
            } else if options.mode == Mode::Sync {
                push_delete(&mut pending, kind, obj, current);
            }
        }
    }

    // Dependency linking: parent edges and embedded `!ref` edges.
    let resolved: Vec<(usize, Vec<usize>, Vec<(Kind, String, String)>)> = pending
        .iter()
        .enumerate()
        .map(|(idx, change)| {
            let mut depends_on = change.depends_on.clone();
            let mut references = change.references.clone();
            if let Some(parent) = &change.parent {
                if let Some(&create_idx) = create_index.get(&(parent.kind, parent.r#ref.clone())) {
                    depends_on.push(create_idx);
                    references.push((parent.kind, parent.r#ref.clone(), UNKNOWN_ID.to_string()));
                } else if let Some(parent_resource) =
                    resources.iter().find(|r| r.kind == parent.kind && r.r#ref == parent.r#ref)
                {
                    let ref_key = ref_key_for(parent_resource);
                    if let Some(obj) = current.get(parent.kind, &ref_key) {
                        references.push((parent.kind, parent.r#ref.clone(), obj.remote_id.clone()));
                    }
                }
            }
            let mut tokens = Vec::new();
            collect_ref_tokens(&Value::Object(fields_value(&change.fields)), &mut tokens);
            for token in tokens {
                let target = match token.kind {
                    Some(kind) => resources.iter().find(|r| r.kind == kind && r.r#ref == token.r#ref),
                    None => resources.iter().find(|r| r.r#ref == token.r#ref),
                };
                let Some(target) = target else { continue };
                if let Some(external) = &target.external {
                    if let kongctl_model::ExternalSpec::Id(id) = external {
                        references.push((target.kind, target.r#ref.clone(), id.clone()));
                    }
                    continue;
                }
                if let Some(&create_idx) = create_index.get(&(target.kind, target.r#ref.clone())) {
                    depends_on.push(create_idx);
                    references.push((target.kind, target.r#ref.clone(), UNKNOWN_ID.to_string()));
                } else {
                    let ref_key = ref_key_for(target);
                    if let Some(obj) = current.get(target.kind, &ref_key) {
                        references.push((target.kind, target.r#ref.clone(), obj.remote_id.clone()));
                    }
                }
            }
            (idx, depends_on, references)
        })
        .collect();

    for (idx, depends_on, references) in resolved {
        pending[idx].depends_on = depends_on;
        pending[idx].references = references;
    }

    // Deletes depend on the deletes of their own children (children
    // destroyed before their parent, `spec.md` §3 "Lifecycle").
    let delete_index: BTreeMap<(Kind, String), usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, c)| c.action == Action::Delete)
        .map(|(idx, c)| ((c.kind, c.r#ref.clone()), idx))
        .collect();
    for idx in 0..pending.len() {
        if pending[idx].action != Action::Delete {
            continue;
        }
        let (kind, r#ref) = (pending[idx].kind, pending[idx].r#ref.clone());
        let child_delete_indices: Vec<usize> = delete_index
            .iter()
            .filter(|((child_kind, _), &child_idx)| {
                child_kind.parent_kind() == Some(kind)
                    && pending[child_idx].parent.as_ref().map(|p| p.r#ref == r#ref).unwrap_or(false)
            })
            .map(|(_, &i)| i)
            .collect();
        pending[idx].depends_on.extend(child_delete_indices);
    }

    // Step 6: protection downgrades update/delete to a warning and drops
    // the change from the plan entirely.
    let mut kept_indices: Vec<usize> = Vec::new();
    let mut old_to_new: BTreeMap<usize, usize> = BTreeMap::new();
    for (idx, change) in pending.iter().enumerate() {
        if change.protection && change.action != Action::Create {
            warnings.push(format!(
                "{} {:?} is protected; {} skipped",
                change.kind,
                change.r#ref,
                if change.action == Action::Update { "update" } else { "delete" }
            ));
            continue;
        }
        old_to_new.insert(idx, kept_indices.len());
        kept_indices.push(idx);
    }

    // Assign stable ids in `(kind priority, ref, action letter)` order
    // (`spec.md` §4.2 "Ordering"), independent of execution order.
    let mut seq_order: Vec<usize> = kept_indices.clone();
    seq_order.sort_by(|&a, &b| {
        let ca = &pending[a];
        let cb = &pending[b];
        (ca.kind.priority(), ca.r#ref.as_str(), ca.action.letter())
            .cmp(&(cb.kind.priority(), cb.r#ref.as_str(), cb.action.letter()))
    });
    let mut final_id: BTreeMap<usize, String> = BTreeMap::new();
    for (seq, &idx) in seq_order.iter().enumerate() {
        let change = &pending[idx];
        final_id.insert(idx, format!("{}:{}:{}:{}", seq + 1, change.action.letter(), change.kind, change.r#ref));
    }

    let mut changes = Vec::with_capacity(seq_order.len());
    for &idx in &seq_order {
        let change = &pending[idx];
        let depends_on: Vec<String> = change
            .depends_on
            .iter()
            .filter_map(|dep_idx| old_to_new.contains_key(dep_idx).then(|| final_id[dep_idx].clone()))
            .collect();
        let references = change
            .references
            .iter()
            .map(|(kind, r#ref, id)| crate::plan::ChangeReference { kind: *kind, r#ref: r#ref.clone(), id: id.clone() })
            .collect();
        changes.push(PlannedChange {
            id: final_id[&idx].clone(),
            kind: change.kind,
            r#ref: change.r#ref.clone(),
            remote_id: change.remote_id.clone(),
            action: change.action,
            fields: change.fields.clone(),
            depends_on,
            references,
            parent: change.parent.clone(),
            namespace: change.namespace.clone(),
            protection: change.protection,
            config_hash: change.config_hash.clone(),
            pre_image_hash: change.pre_image_hash.clone(),
        });
    }

    Ok(DiffOutput { changes, warnings })
}

fn push_create(pending: &mut Vec<Pending>, create_index: &mut BTreeMap<(Kind, String), usize>, resource: &Resource, desired_hash: String) {
    let mut fields = resource.fields.clone();
    fields.insert("name".to_string(), Value::String(resource.name.clone()));
    let idx = pending.len();
    pending.push(Pending {
        kind: resource.kind,
        r#ref: resource.r#ref.clone(),
        namespace: resource.namespace.clone(),
        parent: resource.parent.clone(),
        remote_id: None,
        action: Action::Create,
        fields: ChangeFields::Create(fields),
        protection: false,
        config_hash: desired_hash,
        pre_image_hash: None,
        depends_on: Vec::new(),
        references: Vec::new(),
    });
    create_index.insert((resource.kind, resource.r#ref.clone()), idx);
}

/// The deleted object's own parent, resolved by looking up its
/// `parent_id` against the current snapshot. Needed so the "children
/// deleted before their parent" dependency link below can find it —
/// [`CurrentObject`] only carries a remote parent id, not a `(kind, ref)`
/// pair.
fn parent_ref_for(kind: Kind, obj: &CurrentObject, current: &CurrentState) -> Option<ParentRef> {
    let parent_kind = kind.parent_kind()?;
    let parent_id = obj.parent_id.as_ref()?;
    current
        .iter_kind(parent_kind)
        .find(|p| &p.remote_id == parent_id)
        .map(|p| ParentRef { kind: parent_kind, r#ref: p.ref_key.clone() })
}

fn push_delete(pending: &mut Vec<Pending>, kind: Kind, obj: &CurrentObject, current: &CurrentState) {
    pending.push(Pending {
        kind,
        r#ref: obj.ref_key.clone(),
        namespace: obj.labels.get(labels::NAMESPACE).cloned().unwrap_or_default(),
        parent: parent_ref_for(kind, obj, current),
        remote_id: Some(obj.remote_id.clone()),
        action: Action::Delete,
        fields: ChangeFields::Delete(Map::new()),
        protection: labels::is_protected(&obj.labels),
        config_hash: obj.config_hash.clone().unwrap_or_default(),
        pre_image_hash: obj.config_hash.clone(),
        depends_on: Vec::new(),
        references: Vec::new(),
    });
}

fn fields_value(fields: &ChangeFields) -> Map<String, Value> {
    match fields {
        ChangeFields::Create(map) => map.clone(),
        ChangeFields::Delete(map) => map.clone(),
        ChangeFields::Update(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), v.new.clone());
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kongctl_model::{labels as model_labels, ResourceBuilder};
    use std::collections::BTreeMap as Map2;

    fn portal_p1(description: &str) -> Resource {
        let mut fields = Map::new();
        fields.insert("description".to_string(), Value::String(description.to_string()));
        ResourceBuilder::new(Kind::Portal, "p1", "P1").fields(fields).build().unwrap()
    }

    fn current_object(kind: Kind, ref_key: &str, config_hash: &str, raw: Value, protected: bool) -> CurrentObject {
        let mut labels = Map2::new();
        labels.insert(model_labels::MANAGED.to_string(), "true".to_string());
        labels.insert(model_labels::NAMESPACE.to_string(), "default".to_string());
        labels.insert(model_labels::CONFIG_HASH.to_string(), config_hash.to_string());
        if protected {
            labels.insert(model_labels::PROTECTED.to_string(), "true".to_string());
        }
        CurrentObject {
            remote_id: "remote-1".to_string(),
            kind,
            ref_key: ref_key.to_string(),
            labels,
            config_hash: Some(config_hash.to_string()),
            parent_id: None,
            path: "portals/remote-1".to_string(),
            raw,
        }
    }

    fn no_filters() -> DiffOptions<'static> {
        DiffOptions { mode: Mode::Apply, ignore_refs: &[], isolate_refs: &[] }
    }

    #[test]
    fn no_op_when_hash_matches() {
        let resource = portal_p1("");
        let hash = resource.canonical_hash().unwrap();
        let mut set = ResourceSet::new();
        set.insert(resource).unwrap();
        let current = CurrentState::from_objects([current_object(
            Kind::Portal,
            "P1",
            &hash,
            serde_json::json!({ "name": "P1", "description": "" }),
            false,
        )]);

        let output = diff(&set, &current, no_filters()).unwrap();
        assert!(output.changes.is_empty());
    }

    #[test]
    fn field_update_is_detected() {
        let resource = portal_p1("v2");
        let mut set = ResourceSet::new();
        set.insert(resource).unwrap();
        let current = CurrentState::from_objects([current_object(
            Kind::Portal,
            "P1",
            "sha256:stale",
            serde_json::json!({ "name": "P1", "description": "" }),
            false,
        )]);

        let output = diff(&set, &current, no_filters()).unwrap();
        assert_eq!(output.changes.len(), 1);
        let change = &output.changes[0];
        assert_eq!(change.action, Action::Update);
        match &change.fields {
            ChangeFields::Update(fields) => {
                let description = fields.get("description").unwrap();
                assert_eq!(description.old, Value::String("".to_string()));
                assert_eq!(description.new, Value::String("v2".to_string()));
            }
            other => panic!("expected Update fields, got {other:?}"),
        }
        assert!(change.depends_on.is_empty());
    }

    #[test]
    fn sync_mode_deletes_objects_missing_from_desired() {
        let set = ResourceSet::new();
        let current = CurrentState::from_objects([current_object(
            Kind::Portal,
            "P1",
            "sha256:whatever",
            serde_json::json!({ "name": "P1" }),
            false,
        )]);

        let sync_output = diff(&set, &current, DiffOptions { mode: Mode::Sync, ignore_refs: &[], isolate_refs: &[] }).unwrap();
        assert_eq!(sync_output.changes.len(), 1);
        assert_eq!(sync_output.changes[0].action, Action::Delete);

        let apply_output = diff(&set, &current, no_filters()).unwrap();
        assert!(apply_output.changes.is_empty());
    }

    #[test]
    fn sync_delete_orders_child_before_parent() {
        let set = ResourceSet::new();
        let mut api = current_object(Kind::Api, "A1", "sha256:api", serde_json::json!({ "name": "A1" }), false);
        api.remote_id = "api-1".to_string();
        api.path = "apis/api-1".to_string();
        let mut publication = current_object(Kind::ApiPublication, "pub1", "sha256:pub", serde_json::json!({}), false);
        publication.remote_id = "pub-1".to_string();
        publication.parent_id = Some("api-1".to_string());
        let current = CurrentState::from_objects([api, publication]);

        let output = diff(&set, &current, DiffOptions { mode: Mode::Sync, ignore_refs: &[], isolate_refs: &[] }).unwrap();
        assert_eq!(output.changes.len(), 2);
        let api_delete = output.changes.iter().find(|c| c.kind == Kind::Api).unwrap();
        let pub_delete = output.changes.iter().find(|c| c.kind == Kind::ApiPublication).unwrap();
        assert!(api_delete.depends_on.contains(&pub_delete.id), "api delete must depend on publication delete");
    }

    #[test]
    fn protected_object_downgrades_delete_to_warning() {
        let set = ResourceSet::new();
        let current = CurrentState::from_objects([current_object(
            Kind::Portal,
            "P1",
            "sha256:whatever",
            serde_json::json!({ "name": "P1" }),
            true,
        )]);

        let output = diff(&set, &current, DiffOptions { mode: Mode::Sync, ignore_refs: &[], isolate_refs: &[] }).unwrap();
        assert!(output.changes.is_empty());
        assert!(output.warnings.iter().any(|w| w.contains("protected")));
    }
}
