//! End-to-end coverage driving the full Engine (Loader -> State Client ->
//! Planner -> Executor) against a stateful in-memory Kong-shaped REST
//! backend, instead of per-call static mocks. The backend is a single
//! [`wiremock::Respond`] implementation fronting a path-keyed JSON store,
//! which is what lets these tests exercise real create-then-reread-then-
//! update-then-delete continuity across several `Engine` calls.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kongctl_engine::{Config, Engine, PlanRequest};
use kongctl_executor::ExecutorOptions;
use kongctl_model::Kind;
use kongctl_planner::plan::Mode;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const COLLECTIONS: &[&str] = &[
    "application-auth-strategies",
    "control-planes",
    "portals",
    "pages",
    "snippets",
    "customization",
    "custom-domains",
    "apis",
    "versions",
    "publications",
    "documents",
    "implementations",
];

/// A stateful fake of the Kong Admin-style REST API this engine talks to:
/// a path-keyed JSON object store behind plain collection/object CRUD
/// semantics. Shared across every `Mock` mount via the inner `Arc`.
#[derive(Clone, Default)]
struct FakeBackend {
    store: Arc<Mutex<BTreeMap<String, Value>>>,
    next_id: Arc<Mutex<u64>>,
}

impl FakeBackend {
    fn seed(&self, path: &str, value: Value) {
        self.store.lock().unwrap().insert(path.to_string(), value);
    }

    fn set_label(&self, path: &str, key: &str, value: &str) {
        let mut store = self.store.lock().unwrap();
        if let Some(Value::Object(obj)) = store.get_mut(path) {
            let labels = obj.entry("labels").or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(labels) = labels {
                labels.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
    }
}

impl Respond for FakeBackend {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let path = request.url.path().trim_start_matches('/').to_string();
        let is_collection = path.rsplit('/').next().map(|last| COLLECTIONS.contains(&last)).unwrap_or(false);
        let mut store = self.store.lock().unwrap();

        match request.method.as_str() {
            "GET" if is_collection => {
                let prefix = format!("{path}/");
                let data: Vec<Value> = store
                    .iter()
                    .filter(|(key, _)| key.strip_prefix(prefix.as_str()).map(|rest| !rest.contains('/')).unwrap_or(false))
                    .map(|(_, value)| value.clone())
                    .collect();
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": data }))
            }
            "GET" => match store.get(&path) {
                Some(value) => ResponseTemplate::new(200).set_body_json(value.clone()),
                None => ResponseTemplate::new(404),
            },
            "POST" => {
                let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
                let mut fields = match body {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                let mut next_id = self.next_id.lock().unwrap();
                *next_id += 1;
                let id = format!("id-{next_id}");
                fields.insert("id".to_string(), Value::String(id.clone()));
                let segments: Vec<&str> = path.split('/').collect();
                if segments.len() >= 2 {
                    fields.insert("parent_id".to_string(), Value::String(segments[segments.len() - 2].to_string()));
                }
                let created = Value::Object(fields);
                store.insert(format!("{path}/{id}"), created.clone());
                ResponseTemplate::new(201).set_body_json(created)
            }
            "PATCH" => {
                let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
                let patch = match body {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                match store.get_mut(&path) {
                    Some(Value::Object(existing)) => {
                        for (key, value) in patch {
                            existing.insert(key, value);
                        }
                        ResponseTemplate::new(200).set_body_json(Value::Object(existing.clone()))
                    }
                    _ => ResponseTemplate::new(404),
                }
            }
            "DELETE" => match store.remove(&path) {
                Some(_) => ResponseTemplate::new(204),
                None => ResponseTemplate::new(404),
            },
            other => ResponseTemplate::new(500).set_body_string(format!("unexpected method {other}")),
        }
    }
}

async fn test_engine() -> (MockServer, FakeBackend, Engine) {
    let server = MockServer::start().await;
    let backend = FakeBackend::default();
    for verb in ["GET", "POST", "PATCH", "DELETE"] {
        Mock::given(method(verb)).respond_with(backend.clone()).mount(&server).await;
    }
    let config = Config {
        profile: "default".to_string(),
        base_url: server.uri(),
        bearer_token: "t".to_string(),
        request_timeout: Duration::from_secs(5),
        object_fetch_concurrency: 4,
    };
    let engine = Engine::new(&config).expect("engine builds against a mock base url");
    (server, backend, engine)
}

fn request(dir: &tempfile::TempDir, yaml: &str, filename: &str, mode: Mode) -> PlanRequest {
    let path = dir.path().join(filename);
    std::fs::write(&path, yaml).unwrap();
    PlanRequest {
        paths: vec![path.to_str().unwrap().to_string()],
        recursive: false,
        namespace: "default".to_string(),
        mode,
        ignore_refs: Vec::new(),
        isolate_refs: Vec::new(),
        tool_version: "test".to_string(),
    }
}

async fn apply(engine: &Engine, req: &PlanRequest) -> kongctl_engine::PlanResult {
    let (plan, current) = engine.plan(req).await.expect("plan succeeds");
    let options = ExecutorOptions { mode: req.mode, ..ExecutorOptions::default() };
    engine.execute_plan(&plan, &req.namespace, &current, options, &CancellationToken::new()).await.expect("execute succeeds")
}

/// Walks scenarios 1 through 4 as one continuous lifecycle against a
/// single backend: no-op reapply, a field update, a child create with an
/// embedded reference, then a sync delete that orders a child before its
/// parent.
#[tokio::test]
async fn lifecycle_reapply_update_create_and_sync_delete() {
    let (_server, _backend, engine) = test_engine().await;
    let dir = tempfile::tempdir().unwrap();

    // Scenario 1: no-op reapply.
    let portal_v1 = "portals:\n  - ref: p1\n    name: P1\n    description: \"\"\n";
    let req1 = request(&dir, portal_v1, "s1.yaml", Mode::Apply);
    let result = apply(&engine, &req1).await;
    assert_eq!(result.exit_code(), 0);

    let reapply_plan = engine.diff(&req1).await.expect("diff succeeds");
    assert!(reapply_plan.changes.is_empty());

    // Scenario 2: a field update.
    let portal_v2 = "portals:\n  - ref: p1\n    name: P1\n    description: \"v2\"\n";
    let req2 = request(&dir, portal_v2, "s2.yaml", Mode::Apply);
    let update_plan = engine.diff(&req2).await.expect("diff succeeds");
    assert_eq!(update_plan.changes.len(), 1);
    let change = &update_plan.changes[0];
    assert_eq!(change.action, kongctl_planner::plan::Action::Update);
    assert!(change.depends_on.is_empty());
    match &change.fields {
        kongctl_planner::plan::ChangeFields::Update(fields) => {
            let description = fields.get("description").expect("description changed");
            assert_eq!(description.old, Value::String(String::new()));
            assert_eq!(description.new, Value::String("v2".to_string()));
        }
        other => panic!("expected an update, got {other:?}"),
    }
    let result = apply(&engine, &req2).await;
    assert_eq!(result.exit_code(), 0);

    // Scenario 3: child create, with an embedded reference to the portal.
    let with_api = "portals:\n  - ref: p1\n    name: P1\n    description: \"v2\"\napis:\n  - ref: a1\n    name: A1\n    api_publications:\n      - ref: pub1\n        name: pub1\n        portal: !ref p1\n";
    let req3 = request(&dir, with_api, "s3.yaml", Mode::Apply);
    let create_plan = engine.diff(&req3).await.expect("diff succeeds");
    assert_eq!(create_plan.changes.len(), 2);
    assert!(!create_plan.changes.iter().any(|c| c.kind == Kind::Portal));
    let api_change = create_plan.changes.iter().find(|c| c.kind == Kind::Api).expect("api create present");
    let pub_change = create_plan.changes.iter().find(|c| c.kind == Kind::ApiPublication).expect("publication create present");
    assert_eq!(api_change.action, kongctl_planner::plan::Action::Create);
    assert_eq!(pub_change.action, kongctl_planner::plan::Action::Create);
    assert!(pub_change.depends_on.contains(&api_change.id));
    let portal_reference = pub_change
        .references
        .iter()
        .find(|r| r.kind == Kind::Portal && r.r#ref == "p1")
        .expect("publication references the portal");
    assert_ne!(portal_reference.id, kongctl_planner::plan::UNKNOWN_ID);

    let result = apply(&engine, &req3).await;
    assert_eq!(result.exit_code(), 0);

    // Scenario 4: sync delete orders the child before its parent, and a
    // second sync run against the same desired state is empty.
    let portal_only = "portals:\n  - ref: p1\n    name: P1\n    description: \"v2\"\n";
    let req4 = request(&dir, portal_only, "s4.yaml", Mode::Sync);
    let delete_plan = engine.diff(&req4).await.expect("diff succeeds");
    assert_eq!(delete_plan.changes.len(), 2);
    let api_delete = delete_plan.changes.iter().find(|c| c.kind == Kind::Api).expect("api delete present");
    let pub_delete = delete_plan.changes.iter().find(|c| c.kind == Kind::ApiPublication).expect("publication delete present");
    assert_eq!(api_delete.action, kongctl_planner::plan::Action::Delete);
    assert_eq!(pub_delete.action, kongctl_planner::plan::Action::Delete);
    let pub_order = delete_plan.execution_order.iter().position(|id| id == &pub_delete.id).unwrap();
    let api_order = delete_plan.execution_order.iter().position(|id| id == &api_delete.id).unwrap();
    assert!(pub_order < api_order, "publication must be deleted before its api");

    let result = apply(&engine, &req4).await;
    assert_eq!(result.exit_code(), 0);

    let second_sync = engine.diff(&req4).await.expect("diff succeeds");
    assert!(second_sync.changes.is_empty());
}

/// A protected object is never planned for deletion; its removal is
/// downgraded to a warning instead.
#[tokio::test]
async fn protected_object_blocks_sync_delete() {
    let (_server, backend, engine) = test_engine().await;
    backend.seed(
        "portals/protected-1",
        serde_json::json!({
            "id": "protected-1",
            "name": "Protected",
            "labels": {
                "KONGCTL-managed": "true",
                "KONGCTL-namespace": "default",
                "KONGCTL-config-hash": "sha256:whatever",
                "KONGCTL-protected": "true",
            }
        }),
    );

    let dir = tempfile::tempdir().unwrap();
    let req = request(&dir, "portals: []\n", "empty.yaml", Mode::Sync);
    let plan = engine.diff(&req).await.expect("diff succeeds");

    assert!(plan.changes.is_empty());
    assert!(plan.summary.warnings.iter().any(|w| w.contains("protected")), "warnings: {:?}", plan.summary.warnings);
}

/// A change whose pre-image hash has drifted out from under the plan is
/// skipped rather than applied, and the run as a whole reports failure.
#[tokio::test]
async fn stale_pre_image_is_skipped_and_execution_reports_failure() {
    let (_server, backend, engine) = test_engine().await;
    let dir = tempfile::tempdir().unwrap();

    let portal_v1 = "portals:\n  - ref: p1\n    name: P1\n    description: \"\"\n";
    let req1 = request(&dir, portal_v1, "create.yaml", Mode::Apply);
    let result = apply(&engine, &req1).await;
    assert_eq!(result.exit_code(), 0);

    let portal_v2 = "portals:\n  - ref: p1\n    name: P1\n    description: \"v2\"\n";
    let req2 = request(&dir, portal_v2, "update.yaml", Mode::Apply);
    let (plan, _current) = engine.plan(&req2).await.expect("plan succeeds");
    assert_eq!(plan.changes.len(), 1);

    // A saved plan round-trips through JSON, same as `--plan <file>`.
    let saved = serde_json::to_vec(&plan).unwrap();
    let reloaded: kongctl_planner::plan::Plan = serde_json::from_slice(&saved).unwrap();

    // Out of band, a third party mutates the object's config hash.
    backend.set_label("portals/id-1", "KONGCTL-config-hash", "sha256:tampered");

    let current = engine.fetch_current_state("default").await.expect("current state fetch succeeds");
    let options = ExecutorOptions { mode: Mode::Apply, ..ExecutorOptions::default() };
    let result = engine.execute_plan(&reloaded, "default", &current, options, &CancellationToken::new()).await.expect("execute runs");

    assert_eq!(result.reports.len(), 1);
    assert_eq!(result.reports[0].status, kongctl_executor::report::ChangeStatus::SkippedStale);
    assert_eq!(result.exit_code(), 2);
}
