//! The Executor: dispatches a [`kongctl_planner::Plan`] against the
//! remote API (`spec.md` §4.3).

pub mod dispatch;
pub mod report;
pub mod retry;
pub mod scheduler;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use kongctl_planner::plan::{Mode, Plan, PlannedChange};
use kongctl_remote::{state::CurrentState, RemoteClient};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use dispatch::{apply_change, Blocked, DispatchFailure, LearnedObject};
use report::{ChangeReport, ChangeStatus, PlanResult};
use retry::RetryPolicy;

/// Execution-time knobs (`spec.md` §4.3 "Inputs").
pub struct ExecutorOptions {
    pub dry_run: bool,
    /// Recorded for completeness; the interactive confirmation this gates
    /// happens in the CLI layer before `execute` is ever called.
    pub auto_approve: bool,
    pub mode: Mode,
    pub per_change_timeout: Duration,
    pub concurrency: usize,
    /// Sync mode's pre-flight stale check aborts the whole plan unless
    /// this is set (`spec.md` §4.3 step 1).
    pub force: bool,
    pub retry_policy: RetryPolicy,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            auto_approve: false,
            mode: Mode::Apply,
            per_change_timeout: Duration::from_secs(30),
            concurrency: 1,
            force: false,
            retry_policy: RetryPolicy::default(),
        }
    }
}

pub struct Executor {
    client: RemoteClient,
    namespace: String,
    path_index: BTreeMap<String, String>,
    options: ExecutorOptions,
}

impl Executor {
    /// `initial_state` is the snapshot the Planner diffed against; its
    /// `(remote_id -> path)` index lets the Executor compose REST paths
    /// for parents that already existed at plan time without a second
    /// full state fetch.
    pub fn new(client: RemoteClient, namespace: impl Into<String>, initial_state: &CurrentState, options: ExecutorOptions) -> Self {
        let path_index = initial_state.iter().map(|obj| (obj.remote_id.clone(), obj.path.clone())).collect();
        Self { client, namespace: namespace.into(), path_index, options }
    }

    #[instrument(skip(self, plan, cancel))]
    pub async fn execute(&self, plan: &Plan, cancel: &CancellationToken) -> Result<PlanResult, Error> {
        if plan.metadata.mode != self.options.mode {
            return Err(Error::ModeMismatch { plan_mode: plan.metadata.mode, executor_mode: self.options.mode });
        }

        let mut result = PlanResult::for_plan(plan, self.options.dry_run);
        let changes_by_id: BTreeMap<&str, &PlannedChange> =
            plan.changes.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut succeeded: BTreeSet<String> = BTreeSet::new();
        let mut terminal: BTreeSet<String> = BTreeSet::new();
        let mut learned: HashMap<String, LearnedObject> = HashMap::new();
        let mut sync_abort = false;

        loop {
            if sync_abort || cancel.is_cancelled() {
                for change in &plan.changes {
                    if terminal.insert(change.id.clone()) {
                        result.push(ChangeReport::skipped(&change.id, ChangeStatus::SkippedBlocked));
                    }
                }
                break;
            }

            let batch = scheduler::next_batch(&changes_by_id, &plan.execution_order, &terminal, self.options.concurrency);
            if batch.is_empty() {
                break;
            }

            let mut to_dispatch = Vec::new();
            for change in batch {
                if scheduler::is_blocked(change, &succeeded, &terminal) {
                    result.push(ChangeReport::skipped(&change.id, ChangeStatus::SkippedBlocked));
                    terminal.insert(change.id.clone());
                    continue;
                }
                to_dispatch.push(change);
            }

            let mut join_set: JoinSet<(String, Result<Outcome, Error>)> = JoinSet::new();
            for change in to_dispatch {
                let change = change.clone();
                let client = self.client.clone();
                let namespace = self.namespace.clone();
                let path_index = self.path_index.clone();
                let learned_snapshot = learned.clone();
                let retry_policy = self.options.retry_policy;
                let dry_run = self.options.dry_run;
                let timeout = self.options.per_change_timeout;
                let cancel = cancel.clone();
                join_set.spawn(async move {
                    let id = change.id.clone();
                    let outcome = run_one(
                        &client, &change, &namespace, &path_index, &learned_snapshot, &retry_policy, dry_run, timeout, &cancel,
                    )
                    .await;
                    (id, outcome)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let (id, outcome) = joined.map_err(|e| Error::Join(e.to_string()))?;
                terminal.insert(id.clone());
                match outcome {
                    Ok(Outcome::Applied { learned: obj, duration }) => {
                        succeeded.insert(id.clone());
                        learned.insert(id.clone(), obj.clone());
                        result.push(ChangeReport::applied(&id, duration, obj.remote_id));
                    }
                    Ok(Outcome::Noop) => {
                        succeeded.insert(id.clone());
                        result.push(ChangeReport::skipped(&id, ChangeStatus::SkippedNoop));
                    }
                    Ok(Outcome::Stale) => {
                        result.push(ChangeReport::skipped(&id, ChangeStatus::SkippedStale));
                        warn!(change = %id, "stale pre-image; skipped");
                        if self.options.mode == Mode::Sync && !self.options.force {
                            sync_abort = true;
                        }
                    }
                    Ok(Outcome::Blocked) => {
                        result.push(ChangeReport::skipped(&id, ChangeStatus::SkippedBlocked));
                    }
                    Err(err) => {
                        result.push(ChangeReport::failed(&id, Duration::default(), err.to_string()));
                        if self.options.mode == Mode::Sync {
                            sync_abort = true;
                        }
                    }
                }
            }
        }

        info!(applied = result.reports.iter().filter(|r| r.status == ChangeStatus::Applied).count(), total = result.reports.len(), "execution finished");
        Ok(result)
    }
}

enum Outcome {
    Applied { learned: LearnedObject, duration: Duration },
    Noop,
    Stale,
    Blocked,
}

#[allow(clippy::too_many_arguments)]
async fn run_one(
    client: &RemoteClient,
    change: &PlannedChange,
    namespace: &str,
    path_index: &BTreeMap<String, String>,
    learned: &HashMap<String, LearnedObject>,
    retry_policy: &RetryPolicy,
    dry_run: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Outcome, Error> {
    if let Some(true) = preflight_stale(client, change, path_index, learned).await? {
        return Ok(Outcome::Stale);
    }

    if dry_run {
        return Ok(Outcome::Noop);
    }

    let start = Instant::now();
    let dispatched = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(Outcome::Blocked),
        result = tokio::time::timeout(timeout, apply_change(client, change, namespace, path_index, learned, retry_policy)) => result,
    };

    match dispatched {
        Err(_elapsed) => Err(Error::Timeout(change.id.clone())),
        Ok(Ok(obj)) => Ok(Outcome::Applied { learned: obj, duration: start.elapsed() }),
        Ok(Err(DispatchFailure::Blocked(Blocked::Prerequisite(_)))) => Ok(Outcome::Blocked),
        Ok(Err(DispatchFailure::Failed(err))) => Err(err),
    }
}

/// Re-fetches the change's current object (by its already-known path) and
/// compares its `KONGCTL-config-hash` against the plan's pre-image
/// (`spec.md` §4.3 step 1). `None` when there's no pre-image to check
/// (a fresh create).
async fn preflight_stale(
    client: &RemoteClient,
    change: &PlannedChange,
    path_index: &BTreeMap<String, String>,
    learned: &HashMap<String, LearnedObject>,
) -> Result<Option<bool>, Error> {
    let Some(pre_image) = &change.pre_image_hash else { return Ok(None) };
    let Some(remote_id) = &change.remote_id else { return Ok(None) };
    let path = match path_index.get(remote_id) {
        Some(path) => path.clone(),
        None => match learned.values().find(|o| &o.remote_id == remote_id) {
            Some(obj) => obj.path.clone(),
            None => return Ok(None),
        },
    };
    let resp = client.get(&path).await?;
    let current_hash = resp
        .body
        .get("labels")
        .and_then(|l| l.get(kongctl_model::labels::CONFIG_HASH))
        .and_then(|v| v.as_str());
    Ok(Some(current_hash != Some(pre_image.as_str())))
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Remote(#[from] kongctl_remote::Error),

    #[error("executor mode {executor_mode:?} does not match plan mode {plan_mode:?}")]
    ModeMismatch { plan_mode: Mode, executor_mode: Mode },

    #[error("change {0} timed out")]
    Timeout(String),

    #[error("task join error: {0}")]
    Join(String),
}
