//! The Planner: deterministic diff between desired and current state,
//! yielding an ordered, dependency-aware [`plan::Plan`] (`spec.md` §4.2).

pub mod diff;
pub mod filter;
pub mod order;
pub mod plan;

use chrono::{DateTime, Utc};
use kongctl_model::{Kind, ResourceSet};
use kongctl_remote::state::CurrentState;
use tracing::instrument;

pub use filter::RefFilter;
pub use plan::{Mode, Plan};

pub struct PlanOptions {
    pub mode: Mode,
    pub ignore_refs: Vec<RefFilter>,
    pub isolate_refs: Vec<RefFilter>,
    pub tool_version: String,
}

/// Computes a [`Plan`] for `resources` against `current`, with a fixed
/// generation timestamp supplied by the caller so the Planner itself
/// never touches the wall clock (`spec.md` §4.2 "Determinism").
#[instrument(skip(resources, current, options))]
pub fn plan(
    resources: &ResourceSet,
    current: &CurrentState,
    options: PlanOptions,
    generated_at: DateTime<Utc>,
) -> Result<Plan, Error> {
    let output = diff::diff(
        resources,
        current,
        diff::DiffOptions { mode: options.mode, ignore_refs: &options.ignore_refs, isolate_refs: &options.isolate_refs },
    )?;

    let execution_order = order::topological_order(&output.changes)?;

    let mut summary = plan::PlanSummary { warnings: output.warnings, ..Default::default() };
    for change in &output.changes {
        summary.record(change);
    }

    let namespaces: std::collections::BTreeSet<String> = resources.iter().map(|r| r.namespace.clone()).collect();

    Ok(Plan {
        metadata: plan::PlanMetadata {
            version: "1".to_string(),
            generated_at,
            tool_version: options.tool_version,
            mode: options.mode,
            namespaces: namespaces.into_iter().collect(),
        },
        changes: output.changes,
        execution_order,
        summary,
    })
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Model(#[from] kongctl_model::Error),

    #[error(transparent)]
    Remote(#[from] kongctl_remote::Error),

    #[error("cycle detected among changes: {0}")]
    Cycle(String),

    #[error("{kind} {resource_ref:?} is isolated but its parent {parent_kind} {parent_ref:?} is neither isolated nor already on the remote")]
    IsolatedParentMissing { kind: Kind, resource_ref: String, parent_kind: Kind, parent_ref: String },
}
