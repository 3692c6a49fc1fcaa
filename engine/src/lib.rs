//! The Engine: wires the Loader, the Remote State Client, the Planner and
//! the Executor into the five CLI verbs (`spec.md` §6).

pub mod config;

use std::collections::BTreeMap;

use chrono::Utc;
use kongctl_model::{labels, Kind};
use kongctl_planner::filter::RefFilter;
use kongctl_planner::plan::{Mode, Plan};
use kongctl_planner::PlanOptions;
use kongctl_remote::adapter::CurrentObject;
use kongctl_remote::{rest_adapter::RestAdapter, spec_for, Adapter, RefField, RemoteClient};
use kongctl_remote::state::{CurrentState, StateClient};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub use config::Config;
pub use kongctl_executor::{report::PlanResult, ExecutorOptions};

/// Inputs shared by `plan`, `diff`, `apply` and `sync` (`spec.md` §6's CLI
/// verb table: `-f`/`-R`/`--namespace` plus the filtering flags).
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub paths: Vec<String>,
    pub recursive: bool,
    pub namespace: String,
    pub mode: Mode,
    pub ignore_refs: Vec<RefFilter>,
    pub isolate_refs: Vec<RefFilter>,
    pub tool_version: String,
}

pub struct Engine {
    client: RemoteClient,
}

impl Engine {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = RemoteClient::new(config.client_config())?;
        Ok(Self { client })
    }

    /// Loads desired state, fetches current state, and diffs them. Shared
    /// by `plan`, `diff`, `apply` and `sync` — `apply`/`sync` additionally
    /// execute the resulting plan.
    #[instrument(skip(self, request))]
    pub async fn plan(&self, request: &PlanRequest) -> Result<(Plan, CurrentState), Error> {
        let resources =
            kongctl_loader::load(&request.paths, request.recursive, Some(&request.namespace))?;
        let state_client = StateClient::new(self.client.clone());
        let current = state_client.fetch_current_state(&request.namespace).await?;
        let plan = kongctl_planner::plan(
            &resources,
            &current,
            PlanOptions {
                mode: request.mode,
                ignore_refs: request.ignore_refs.clone(),
                isolate_refs: request.isolate_refs.clone(),
                tool_version: request.tool_version.clone(),
            },
            Utc::now(),
        )?;
        Ok((plan, current))
    }

    /// `diff` is `plan` without the current-state snapshot the executor
    /// would otherwise need; the CLI only renders the plan.
    pub async fn diff(&self, request: &PlanRequest) -> Result<Plan, Error> {
        self.plan(request).await.map(|(plan, _)| plan)
    }

    /// Fetches a fresh current-state snapshot for `namespace`, independent
    /// of any plan. Used by the CLI to build an executable path index for
    /// a plan loaded from `--plan <file>`, and by [`Engine::plan`] itself.
    pub async fn fetch_current_state(&self, namespace: &str) -> Result<CurrentState, Error> {
        let state_client = StateClient::new(self.client.clone());
        Ok(state_client.fetch_current_state(namespace).await?)
    }

    /// Executes `plan` against `current` (`spec.md` §4.3). Split out from
    /// planning so the CLI can render the plan and gate on
    /// `--auto-approve`/interactive confirmation before any mutation
    /// happens — the Executor itself only checks `options.mode` against
    /// `plan.metadata.mode`.
    #[instrument(skip(self, plan, current, options))]
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        namespace: &str,
        current: &CurrentState,
        options: ExecutorOptions,
        cancel: &CancellationToken,
    ) -> Result<PlanResult, Error> {
        let executor = kongctl_executor::Executor::new(self.client.clone(), namespace.to_string(), current, options);
        Ok(executor.execute(plan, cancel).await?)
    }

    /// Stamps managed labels onto an existing, not-yet-managed remote
    /// object (`spec.md` §3 "Adoption", §6 `adopt <kind> <name|id>
    /// --namespace <ns>`). Does not consult `KONGCTL-protected`; per
    /// `spec.md` §9's open question, adoption of a protected object is
    /// allowed.
    #[instrument(skip(self))]
    pub async fn adopt(&self, kind: Kind, selector: &str, namespace: &str) -> Result<CurrentObject, Error> {
        let adapter = RestAdapter::new(kind);
        let objects = adapter.list_unfiltered(&self.client, None).await?;
        let object = objects
            .into_iter()
            .find(|o| o.ref_key == selector || o.remote_id == selector)
            .ok_or_else(|| Error::AdoptTargetNotFound { kind, selector: selector.to_string() })?;

        let fields = adoptable_fields(&object.raw);
        let config_hash = kongctl_model::hash::canonical_hash(&fields, &BTreeMap::new())?;
        let mut label_map = labels::managed_labels(namespace, &config_hash, Utc::now());
        if spec_for(kind).ref_field == RefField::Label {
            label_map.insert(labels::REF.to_string(), object.ref_key.clone());
        }
        adapter.write_labels(&self.client, &object.path, &label_map).await?;
        Ok(object)
    }
}

/// Strips remote-assigned identity metadata from a raw object so the rest
/// can seed a baseline `KONGCTL-config-hash` on adoption. This is a
/// best-effort baseline, not a guarantee of matching the desired
/// resource's hash — a normal `plan` run after adoption will surface any
/// remaining drift as an ordinary update, which is the intended pipeline
/// (`spec.md` §3: "adoption then feeds into the normal pipeline").
fn adoptable_fields(raw: &serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    let mut fields = raw.as_object().cloned().unwrap_or_default();
    for key in ["id", "labels", "parent_id", "created_at", "updated_at"] {
        fields.remove(key);
    }
    fields
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Model(#[from] kongctl_model::Error),

    #[error(transparent)]
    Loader(#[from] kongctl_loader::Error),

    #[error(transparent)]
    Remote(#[from] kongctl_remote::Error),

    #[error(transparent)]
    Planner(#[from] kongctl_planner::Error),

    #[error(transparent)]
    Executor(#[from] kongctl_executor::Error),

    #[error("no unmanaged {kind} found matching {selector:?}")]
    AdoptTargetNotFound { kind: Kind, selector: String },

    #[error("unknown resource kind {0:?}")]
    UnknownKind(String),

    #[error("error reading plan document {path}: {source}")]
    PlanFile { path: String, source: std::io::Error },

    #[error("error parsing plan document: {0}")]
    PlanParse(#[from] serde_json::Error),
}
