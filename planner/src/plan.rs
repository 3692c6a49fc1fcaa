//! The Plan document format (`spec.md` §3, §6): a portable JSON artifact
//! produced by the Planner and consumed by the Executor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kongctl_model::{Kind, ParentRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The sentinel used in place of a remote id that is not yet known
/// because the change that will produce it has not executed yet
/// (`spec.md` §3, §4.3 step 2).
pub const UNKNOWN_ID: &str = "[unknown]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Apply,
    Sync,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Apply => "apply",
            Mode::Sync => "sync",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn letter(&self) -> char {
        match self {
            Action::Create => 'c',
            Action::Update => 'u',
            Action::Delete => 'd',
        }
    }
}

/// One field's before/after value in an `update` change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// The `fields` payload of a change: plain values on create, `{old, new}`
/// pairs on update, empty on delete (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeFields {
    Create(Map<String, Value>),
    Update(BTreeMap<String, FieldChange>),
    Delete(Map<String, Value>),
}

/// A dependency edge surfaced to the Executor: another resource this
/// change's fields point at, with its remote id if already known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReference {
    pub kind: Kind,
    pub r#ref: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedChange {
    pub id: String,
    pub kind: Kind,
    pub r#ref: String,
    pub remote_id: Option<String>,
    pub action: Action,
    pub fields: ChangeFields,
    pub depends_on: Vec<String>,
    pub references: Vec<ChangeReference>,
    pub parent: Option<ParentRef>,
    pub namespace: String,
    pub protection: bool,
    /// The hash to write to `KONGCTL-config-hash` on success.
    pub config_hash: String,
    /// The `KONGCTL-config-hash` read off the current object at plan
    /// time, if one existed. The Executor's pre-flight re-reads the live
    /// object and compares against this value to detect concurrent edits
    /// (`spec.md` §4.3 step 1).
    pub pre_image_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub tool_version: String,
    pub mode: Mode,
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub by_action: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

impl PlanSummary {
    pub fn record(&mut self, change: &PlannedChange) {
        let action = match change.action {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        *self.by_action.entry(action.to_string()).or_insert(0) += 1;
        *self.by_kind.entry(change.kind.doc_key().to_string()).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub metadata: PlanMetadata,
    pub changes: Vec<PlannedChange>,
    pub execution_order: Vec<String>,
    pub summary: PlanSummary,
}
