//! Per-change dispatch: reference resolution, the adapter call itself,
//! and the label write-back (`spec.md` §4.3 steps 2-4).

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use kongctl_model::labels;
use kongctl_planner::plan::{Action, ChangeFields, ChangeReference, PlannedChange, UNKNOWN_ID};
use kongctl_remote::{client, spec_for, Adapter, RemoteClient};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::retry::{with_backoff, Outcome, RetryPolicy};
use crate::Error;

/// A remote object learned during this run: either freshly created or
/// confirmed unchanged. Keyed by change id in [`crate::Executor`]'s
/// `ChangeResult` map (`spec.md` §4.3 step 2).
#[derive(Debug, Clone)]
pub struct LearnedObject {
    pub remote_id: String,
    pub path: String,
}

/// Why a change could not be dispatched at all, before any HTTP call was
/// made.
#[derive(Debug, Clone)]
pub enum Blocked {
    /// A prerequisite change's id has no entry in the learned map, so an
    /// `[unknown]` reference could not be resolved.
    Prerequisite(String),
}

/// Finds, among `change.depends_on`, the id of the change that creates
/// `(kind, ref)` — ids are stably formatted `seq:letter:kind:ref`
/// (`diff.rs`), so parsing one back out is cheaper than threading a
/// second index through the plan document.
fn dependency_for(change: &PlannedChange, kind: kongctl_model::Kind, r#ref: &str) -> Option<String> {
    change.depends_on.iter().find(|id| {
        let mut parts = id.splitn(4, ':');
        let (_seq, letter, dep_kind, dep_ref) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
                _ => return false,
            };
        letter == "c" && dep_kind == kind.doc_key() && dep_ref == r#ref
    }).cloned()
}

/// Substitutes every `[unknown]` entry in `change.references` with a
/// learned id, or reports the first one that cannot be resolved.
pub fn resolve_references(
    change: &PlannedChange,
    learned: &HashMap<String, LearnedObject>,
) -> Result<Vec<ChangeReference>, Blocked> {
    let mut resolved = Vec::with_capacity(change.references.len());
    for reference in &change.references {
        if reference.id != UNKNOWN_ID {
            resolved.push(reference.clone());
            continue;
        }
        let dep_id = dependency_for(change, reference.kind, &reference.r#ref)
            .ok_or_else(|| Blocked::Prerequisite(format!("{}:{}", reference.kind, reference.r#ref)))?;
        let learned_obj = learned.get(&dep_id).ok_or_else(|| Blocked::Prerequisite(dep_id.clone()))?;
        resolved.push(ChangeReference { kind: reference.kind, r#ref: reference.r#ref.clone(), id: learned_obj.remote_id.clone() });
    }
    Ok(resolved)
}

/// Resolves the parent object's path this change's create/update/delete
/// is nested under, if any.
fn resolve_parent_path(
    change: &PlannedChange,
    resolved_references: &[ChangeReference],
    path_index: &BTreeMap<String, String>,
    learned: &HashMap<String, LearnedObject>,
) -> Result<Option<String>, Blocked> {
    let Some(parent) = &change.parent else { return Ok(None) };
    let reference = resolved_references
        .iter()
        .find(|r| r.kind == parent.kind && r.r#ref == parent.r#ref);
    let remote_id = match reference {
        Some(r) => r.id.clone(),
        None => {
            // The parent wasn't recorded as a reference (it already existed
            // at plan time and wasn't itself being created); fall back to
            // the dependency-id lookup used for references.
            if let Some(dep_id) = dependency_for(change, parent.kind, &parent.r#ref) {
                learned.get(&dep_id).map(|o| o.remote_id.clone()).ok_or_else(|| Blocked::Prerequisite(dep_id))?
            } else {
                return Ok(None);
            }
        }
    };
    if let Some(path) = path_index.get(&remote_id) {
        return Ok(Some(path.clone()));
    }
    if let Some(learned_obj) = learned.values().find(|o| o.remote_id == remote_id) {
        return Ok(Some(learned_obj.path.clone()));
    }
    Err(Blocked::Prerequisite(format!("{}:{}", parent.kind, parent.r#ref)))
}

/// Recursively replaces every embedded `$kongctl_ref` token with the
/// resolved remote id it points at.
fn substitute_refs(value: &Value, references: &[ChangeReference]) -> Value {
    if let Some(token) = kongctl_model::RefToken::from_json(value) {
        if let Some(reference) = references.iter().find(|r| {
            r.r#ref == token.r#ref && token.kind.map(|k| k == r.kind).unwrap_or(true)
        }) {
            return Value::String(reference.id.clone());
        }
        return value.clone();
    }
    match value {
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), substitute_refs(v, references))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_refs(v, references)).collect()),
        other => other.clone(),
    }
}

fn fields_body(fields: &ChangeFields, references: &[ChangeReference]) -> Value {
    let map: Map<String, Value> = match fields {
        ChangeFields::Create(map) => map.clone(),
        ChangeFields::Delete(map) => map.clone(),
        ChangeFields::Update(map) => map.iter().map(|(k, change)| (k.clone(), change.new.clone())).collect(),
    };
    substitute_refs(&Value::Object(map), references)
}

fn field_path(change: &PlannedChange, path_index: &BTreeMap<String, String>, learned: &HashMap<String, LearnedObject>) -> Option<String> {
    let remote_id = change.remote_id.as_deref()?;
    if let Some(path) = path_index.get(remote_id) {
        return Some(path.clone());
    }
    learned.values().find(|o| o.remote_id == remote_id).map(|o| o.path.clone())
}

fn classify_remote_error(error: kongctl_remote::Error) -> Outcome<Error> {
    match &error {
        kongctl_remote::Error::Transport(_) => Outcome::Retry(Error::Remote(error)),
        kongctl_remote::Error::UnexpectedStatus { status, .. } => match client::classify(*status) {
            client::Disposition::Transient => Outcome::Retry(Error::Remote(error)),
            _ => Outcome::Fatal(Error::Remote(error)),
        },
        _ => Outcome::Fatal(Error::Remote(error)),
    }
}

/// What stopped a change from reaching `applied`, beyond the ordinary
/// `skipped-noop` case the scheduler handles itself.
#[derive(Debug)]
pub enum DispatchFailure {
    Blocked(Blocked),
    Failed(Error),
}

impl From<Blocked> for DispatchFailure {
    fn from(b: Blocked) -> Self {
        DispatchFailure::Blocked(b)
    }
}

/// Applies one change: resolves references, dispatches to the adapter,
/// and writes back `KONGCTL-*` labels on success. Returns the object's
/// learned `(remote_id, path)` so the scheduler can populate the
/// `ChangeResult` map.
#[instrument(skip(client, retry_policy, learned, path_index), fields(change = %change.id))]
pub async fn apply_change(
    client: &RemoteClient,
    change: &PlannedChange,
    namespace: &str,
    path_index: &BTreeMap<String, String>,
    learned: &HashMap<String, LearnedObject>,
    retry_policy: &RetryPolicy,
) -> Result<LearnedObject, DispatchFailure> {
    let resolved_references = resolve_references(change, learned)?;
    let parent_path = resolve_parent_path(change, &resolved_references, path_index, learned)?;
    let adapter = kongctl_remote::rest_adapter::RestAdapter::new(change.kind);
    let body = fields_body(&change.fields, &resolved_references);

    let result = match change.action {
        Action::Create => {
            let created = with_backoff(retry_policy, &change.id, || {
                let adapter = kongctl_remote::rest_adapter::RestAdapter::new(change.kind);
                let body = body.clone();
                let parent_path = parent_path.clone();
                async move {
                    adapter
                        .create(client, parent_path.as_deref(), &body)
                        .await
                        .map_err(classify_remote_error)
                }
            })
            .await
            .map_err(DispatchFailure::Failed)?;
            LearnedObject { remote_id: created.remote_id, path: created.path }
        }
        Action::Update => {
            let path = field_path(change, path_index, learned)
                .ok_or_else(|| DispatchFailure::Blocked(Blocked::Prerequisite(change.id.clone())))?;
            with_backoff(retry_policy, &change.id, || {
                let adapter = kongctl_remote::rest_adapter::RestAdapter::new(change.kind);
                let body = body.clone();
                let path = path.clone();
                async move { adapter.update(client, &path, &body).await.map_err(classify_remote_error) }
            })
            .await
            .map_err(DispatchFailure::Failed)?;
            LearnedObjectOrRefetch::Refetch(path).resolve(client, &adapter).await.map_err(DispatchFailure::Failed)?
        }
        Action::Delete => {
            let path = field_path(change, path_index, learned)
                .ok_or_else(|| DispatchFailure::Blocked(Blocked::Prerequisite(change.id.clone())))?;
            with_backoff(retry_policy, &change.id, || {
                let adapter = kongctl_remote::rest_adapter::RestAdapter::new(change.kind);
                let path = path.clone();
                async move { adapter.delete(client, &path).await.map_err(classify_remote_error) }
            })
            .await
            .map_err(DispatchFailure::Failed)?;
            return Ok(LearnedObject { remote_id: change.remote_id.clone().unwrap_or_default(), path });
        }
    };

    if change.action != Action::Delete {
        let mut label_map = labels::managed_labels(namespace, &change.config_hash, Utc::now());
        if spec_for(change.kind).ref_field == kongctl_remote::RefField::Label {
            label_map.insert(labels::REF.to_string(), change.r#ref.clone());
        }
        with_backoff(retry_policy, &change.id, || {
            let adapter = kongctl_remote::rest_adapter::RestAdapter::new(change.kind);
            let path = result.path.clone();
            let label_map = label_map.clone();
            async move { adapter.write_labels(client, &path, &label_map).await.map_err(classify_remote_error) }
        })
        .await
        .map_err(DispatchFailure::Failed)?;
    }

    Ok(result)
}

/// Update doesn't return the updated object (`Adapter::update` returns
/// `()`), so confirming the learned id/path after an update means
/// re-reading the object at its now-known path.
enum LearnedObjectOrRefetch {
    Refetch(String),
}

impl LearnedObjectOrRefetch {
    async fn resolve(
        self,
        client: &RemoteClient,
        adapter: &kongctl_remote::rest_adapter::RestAdapter,
    ) -> Result<LearnedObject, Error> {
        let LearnedObjectOrRefetch::Refetch(path) = self;
        let resp = client.get(&path).await?;
        let collection_path = path.rsplit_once('/').map(|(prefix, _)| prefix).unwrap_or(&path);
        let object = adapter.parse_object(&resp.body, collection_path)?;
        Ok(LearnedObject { remote_id: object.remote_id, path: object.path })
    }
}
