use std::io::Read as _;
use std::process;

use clap::{crate_authors, crate_description, crate_name, crate_version, Arg, ArgAction, Command};
use is_terminal::IsTerminal;
use kongctl_engine::config::Config;
use kongctl_engine::{Engine, Error, PlanRequest};
use kongctl_executor::ExecutorOptions;
use kongctl_model::Kind;
use kongctl_planner::filter::RefFilter;
use kongctl_planner::plan::{Mode, Plan};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

fn main() {
    let paths_arg = || Arg::new("filename").short('f').long("filename").action(ArgAction::Append);
    let recursive_arg = || Arg::new("recursive").short('R').long("recursive").action(ArgAction::SetTrue);
    let namespace_arg = || Arg::new("namespace").long("namespace").required(true);
    let mode_arg = || Arg::new("mode").long("mode").value_parser(["apply", "sync"]).default_value("apply");
    let plan_arg = || Arg::new("plan").long("plan").help("path to a saved Plan JSON document, or `-` for stdin");
    let dry_run_arg = || Arg::new("dry_run").long("dry-run").action(ArgAction::SetTrue);
    let force_arg = || Arg::new("force").long("force").action(ArgAction::SetTrue);
    let concurrency_arg = || Arg::new("concurrency").long("concurrency").default_value("1");
    let ignore_ref_arg = || Arg::new("ignore_ref").long("ignore-ref").action(ArgAction::Append);
    let isolate_ref_arg = || Arg::new("isolate_ref").long("isolate-ref").action(ArgAction::Append);
    let auto_approve_arg = || Arg::new("auto_approve").long("auto-approve").action(ArgAction::SetTrue);

    let cmd = Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .subcommand_required(true)
        .subcommands([
            Command::new("plan").about("load, validate and plan; write Plan JSON").args([
                paths_arg().required(true),
                recursive_arg(),
                namespace_arg(),
                mode_arg(),
                ignore_ref_arg(),
                isolate_ref_arg(),
            ]),
            Command::new("diff").about("render a human-readable diff of a plan").args([
                paths_arg(),
                recursive_arg(),
                namespace_arg().required(false),
                mode_arg(),
                plan_arg(),
                ignore_ref_arg(),
                isolate_ref_arg(),
            ]),
            Command::new("apply").about("execute in apply mode (no deletes)").args([
                paths_arg(),
                recursive_arg(),
                namespace_arg(),
                plan_arg(),
                dry_run_arg(),
                force_arg(),
                auto_approve_arg(),
                concurrency_arg(),
                ignore_ref_arg(),
                isolate_ref_arg(),
            ]),
            Command::new("sync").about("execute in sync mode (includes deletes)").args([
                paths_arg(),
                recursive_arg(),
                namespace_arg(),
                plan_arg(),
                dry_run_arg(),
                force_arg(),
                auto_approve_arg(),
                concurrency_arg(),
                ignore_ref_arg(),
                isolate_ref_arg(),
            ]),
            Command::new("adopt").about("stamp managed labels onto an existing object").args([
                Arg::new("kind").required(true),
                Arg::new("selector").required(true),
                namespace_arg(),
            ]),
        ]);

    let matches = cmd.get_matches();
    let invocation = match matches.subcommand() {
        Some(("plan", m)) => Invocation::Plan(plan_request(m, mode_of(m))),
        Some(("diff", m)) => Invocation::Diff { request: plan_request(m, mode_of(m)), plan_file: m.get_one::<String>("plan").cloned() },
        Some(("apply", m)) => Invocation::Execute { request: plan_request(m, Mode::Apply), options: executor_options(m, Mode::Apply), plan_file: m.get_one::<String>("plan").cloned() },
        Some(("sync", m)) => Invocation::Execute { request: plan_request(m, Mode::Sync), options: executor_options(m, Mode::Sync), plan_file: m.get_one::<String>("plan").cloned() },
        Some(("adopt", m)) => Invocation::Adopt {
            kind: m.get_one::<String>("kind").cloned().unwrap_or_default(),
            selector: m.get_one::<String>("selector").cloned().unwrap_or_default(),
            namespace: m.get_one::<String>("namespace").cloned().unwrap_or_default(),
        },
        _ => unreachable!(),
    };

    process::exit(match startup(invocation) {
        Ok(code) => code,
        Err(err) => {
            let code = exit_code_for_error(&err);
            for cause in anyhow::Error::new(err).chain() {
                eprintln!("{cause}");
            }
            code
        }
    });
}

/// Maps an engine-level error to one of `spec.md` §6's exit codes: `3` for
/// configuration/validation errors caught before planning ever starts, `1`
/// for everything else raised outside a completed execution (a completed
/// execution's own failures are reported via `PlanResult::exit_code`).
fn exit_code_for_error(err: &Error) -> i32 {
    match err {
        Error::Config(_) | Error::Loader(_) | Error::Model(_) | Error::UnknownKind(_) | Error::PlanFile { .. } | Error::PlanParse(_) => 3,
        Error::Remote(_) | Error::Planner(_) | Error::Executor(_) | Error::AdoptTargetNotFound { .. } => 1,
    }
}

enum Invocation {
    Plan(PlanRequest),
    Diff { request: PlanRequest, plan_file: Option<String> },
    Execute { request: PlanRequest, options: ExecutorOptions, plan_file: Option<String> },
    Adopt { kind: String, selector: String, namespace: String },
}

fn mode_of(m: &clap::ArgMatches) -> Mode {
    match m.get_one::<String>("mode").map(String::as_str) {
        Some("sync") => Mode::Sync,
        _ => Mode::Apply,
    }
}

fn parse_ref_filters(m: &clap::ArgMatches, id: &str) -> Vec<RefFilter> {
    m.get_many::<String>(id)
        .into_iter()
        .flatten()
        .map(|raw| match raw.strip_prefix("kind:").and_then(Kind::from_doc_key) {
            Some(kind) => RefFilter::Kind(kind),
            None => RefFilter::Ref(raw.clone()),
        })
        .collect()
}

fn plan_request(m: &clap::ArgMatches, mode: Mode) -> PlanRequest {
    PlanRequest {
        paths: m.get_many::<String>("filename").into_iter().flatten().cloned().collect(),
        recursive: m.get_flag("recursive"),
        namespace: m.get_one::<String>("namespace").cloned().unwrap_or_default(),
        mode,
        ignore_refs: parse_ref_filters(m, "ignore_ref"),
        isolate_refs: parse_ref_filters(m, "isolate_ref"),
        tool_version: crate_version!().to_string(),
    }
}

fn executor_options(m: &clap::ArgMatches, mode: Mode) -> ExecutorOptions {
    ExecutorOptions {
        dry_run: m.get_flag("dry_run"),
        auto_approve: m.get_flag("auto_approve"),
        mode,
        force: m.get_flag("force"),
        concurrency: m.get_one::<String>("concurrency").and_then(|v| v.parse().ok()).unwrap_or(1),
        ..ExecutorOptions::default()
    }
}

/// Sets up logging exactly as the teacher's own `startup()` does: an
/// `EnvFilter` defaulting to `info`, pretty output on a terminal, JSON
/// output otherwise. Builds a multi-threaded runtime, wires a
/// ctrl-c-triggered [`CancellationToken`], resolves the active profile,
/// and dispatches `invocation`.
fn startup(invocation: Invocation) -> Result<i32, Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let collector = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(if std::io::stdout().is_terminal() { Some(tracing_subscriber::fmt::layer()) } else { None })
        .with(if std::io::stdout().is_terminal() { None } else { Some(tracing_subscriber::fmt::layer().json()) });
    tracing::subscriber::set_global_default(collector).ok();

    let config = Config::from_env()?;
    info!(profile = %config.profile, base_url = %config.base_url, "resolved profile");
    let engine = Engine::new(&config)?;

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().expect("tokio runtime builds");
    let token = CancellationToken::new();
    let ctlstop = token.clone();
    rt.spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("error reading ctrl-c: {err}");
        }
        ctlstop.cancel();
    });

    rt.block_on(run(engine, invocation, token))
}

async fn run(engine: Engine, invocation: Invocation, cancel: CancellationToken) -> Result<i32, Error> {
    match invocation {
        Invocation::Plan(request) => {
            let (plan, _current) = engine.plan(&request).await?;
            println!("{}", serde_json::to_string_pretty(&plan).expect("Plan serializes"));
            Ok(0)
        }
        Invocation::Diff { request, plan_file } => {
            let plan = match plan_file {
                Some(path) => read_plan_document(&path)?,
                None => engine.diff(&request).await?,
            };
            print_diff(&plan);
            Ok(0)
        }
        Invocation::Execute { request, options, plan_file } => {
            let (plan, current) = match &plan_file {
                Some(path) => {
                    let plan = read_plan_document(path)?;
                    let current = engine.fetch_current_state(&request.namespace).await?;
                    (plan, current)
                }
                None => engine.plan(&request).await?,
            };
            print_diff(&plan);

            if plan.changes.is_empty() {
                println!("no changes");
                return Ok(0);
            }
            if !options.dry_run && !options.auto_approve && !confirm() {
                println!("aborted");
                return Ok(0);
            }

            let result = engine.execute_plan(&plan, &request.namespace, &current, options, &cancel).await?;
            for report in &result.reports {
                info!(change = %report.change_id, status = ?report.status, "change result");
            }
            Ok(result.exit_code())
        }
        Invocation::Adopt { kind, selector, namespace } => {
            let kind = Kind::from_doc_key(&kind).ok_or(Error::UnknownKind(kind))?;
            let object = engine.adopt(kind, &selector, &namespace).await?;
            info!(kind = %object.kind, remote_id = %object.remote_id, "adopted");
            Ok(0)
        }
    }
}

/// Interactive confirmation gate for `apply`/`sync` without
/// `--auto-approve` (`spec.md` §6). Anything other than `y`/`yes` aborts.
fn confirm() -> bool {
    use std::io::Write;
    print!("proceed with these changes? [y/N] ");
    std::io::stdout().flush().ok();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn read_plan_document(path: &str) -> Result<Plan, Error> {
    let text = if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).map_err(|source| Error::PlanFile { path: path.to_string(), source })?;
        buf
    } else {
        std::fs::read_to_string(path).map_err(|source| Error::PlanFile { path: path.to_string(), source })?
    };
    Ok(serde_json::from_str(&text)?)
}

fn print_diff(plan: &Plan) {
    for change in &plan.changes {
        println!("{} {} {}", change.action.letter(), change.kind, change.r#ref);
    }
    for warning in &plan.summary.warnings {
        println!("warning: {warning}");
    }
}
