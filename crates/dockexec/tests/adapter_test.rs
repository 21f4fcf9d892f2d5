// crates/dockexec/tests/adapter_test.rs

use async_trait::async_trait;
use dockcore::{
    ContainerSpec, DagTask, NodePhase, RunPhase, RuntimeError, ScriptSpec, StepGroup, Template,
    UnitOfWork, WorkflowDocument, WorkflowRun, WorkflowStep,
};
use dockexec::{ContainerRuntime, ExecutionAdapter, RuntimeUnit, UnitSpec, ENV_NODE_NAME};
use dockruntime::{Orchestrator, UnitExecutor, UnitRequest};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Scripted behaviour of one image in the fake runtime
#[derive(Clone, Default)]
struct Script {
    exit_code: i64,
    delay_ms: u64,
    stdout: String,
    fail_create: bool,
    fail_start: bool,
    fail_wait: bool,
    fail_logs: bool,
    fail_remove: bool,
}

#[derive(Default)]
struct FakeRuntime {
    scripts: HashMap<String, Script>,
    created: Mutex<Vec<(String, UnitSpec)>>,
    removed: Mutex<Vec<String>>,
    units: Mutex<HashMap<String, String>>,
}

impl FakeRuntime {
    fn with(mut self, image: &str, script: Script) -> Self {
        self.scripts.insert(image.to_string(), script);
        self
    }

    fn script_for(&self, unit: &RuntimeUnit) -> Script {
        let image = self.units.lock().unwrap().get(&unit.id).cloned().unwrap_or_default();
        self.scripts.get(&image).cloned().unwrap_or_default()
    }

    fn created(&self) -> Vec<(String, UnitSpec)> {
        self.created.lock().unwrap().clone()
    }

    fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &UnitSpec, name: &str) -> Result<RuntimeUnit, RuntimeError> {
        let script = self.scripts.get(&spec.image).cloned().unwrap_or_default();
        if script.fail_create {
            return Err(RuntimeError::Create(format!("no such image: {}", spec.image)));
        }

        let mut created = self.created.lock().unwrap();
        created.push((name.to_string(), spec.clone()));
        let id = format!("c{}", created.len());
        self.units
            .lock()
            .unwrap()
            .insert(id.clone(), spec.image.clone());

        Ok(RuntimeUnit {
            id,
            name: name.to_string(),
        })
    }

    async fn start(&self, unit: &RuntimeUnit) -> Result<(), RuntimeError> {
        if self.script_for(unit).fail_start {
            return Err(RuntimeError::Start("permission denied".to_string()));
        }
        Ok(())
    }

    async fn wait(&self, unit: &RuntimeUnit) -> Result<i64, RuntimeError> {
        let script = self.script_for(unit);
        tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        if script.fail_wait {
            return Err(RuntimeError::Wait("connection reset by daemon".to_string()));
        }
        Ok(script.exit_code)
    }

    async fn logs(&self, unit: &RuntimeUnit) -> Result<String, RuntimeError> {
        let script = self.script_for(unit);
        if script.fail_logs {
            return Err(RuntimeError::Logs("log driver unavailable".to_string()));
        }
        Ok(script.stdout)
    }

    async fn remove(&self, unit: &RuntimeUnit) -> Result<(), RuntimeError> {
        self.removed.lock().unwrap().push(unit.id.clone());
        if self.script_for(unit).fail_remove {
            return Err(RuntimeError::Remove("device busy".to_string()));
        }
        Ok(())
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

fn container(name: &str, image: &str) -> Template {
    Template::container(name, ContainerSpec::new(image).with_command(["run"]))
}

fn request(image: &str) -> UnitRequest {
    UnitRequest {
        run_name: "adapter".to_string(),
        node_id: "main".to_string(),
        display_name: "main".to_string(),
        template_name: "main".to_string(),
        work: UnitOfWork::Container(ContainerSpec::new(image)),
    }
}

async fn run_to_completion(orchestrator: &Orchestrator, document: WorkflowDocument) -> WorkflowRun {
    let name = document.name().to_string();
    orchestrator.submit(document).await.expect("submission accepted");
    tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.wait_for_completion(&name, Duration::from_millis(5)),
    )
    .await
    .expect("run finished in time")
    .expect("run exists")
}

// ============================================================================
// Adapter
// ============================================================================

#[tokio::test]
async fn test_zero_exit_succeeds_with_logs() {
    init_tracing();
    let runtime = Arc::new(FakeRuntime::default().with(
        "ok",
        Script {
            stdout: "hello world\n".to_string(),
            ..Default::default()
        },
    ));
    let adapter = ExecutionAdapter::new(runtime.clone());

    let status = adapter.execute(request("ok")).await.unwrap();

    assert_eq!(status.phase, NodePhase::Succeeded);
    assert_eq!(status.logs(), Some("hello world\n"));
    assert_eq!(status.runtime_unit.as_deref(), Some("dockflow-adapter-main"));
    assert!(status.finished_at.is_some());
    assert_eq!(runtime.removed(), vec!["c1"]);
}

#[tokio::test]
async fn test_nonzero_exit_fails_with_exit_code() {
    let runtime = Arc::new(FakeRuntime::default().with(
        "bad",
        Script {
            exit_code: 42,
            stdout: "partial output\n".to_string(),
            ..Default::default()
        },
    ));
    let adapter = ExecutionAdapter::new(runtime.clone());

    let status = adapter.execute(request("bad")).await.unwrap();

    assert_eq!(status.phase, NodePhase::Failed);
    assert_eq!(status.message.as_deref(), Some("exited with code 42"));
    assert_eq!(status.logs(), Some("partial output\n"));
    assert_eq!(runtime.removed().len(), 1);
}

#[tokio::test]
async fn test_create_failure_is_an_error_without_removal() {
    let runtime = Arc::new(FakeRuntime::default().with(
        "missing",
        Script {
            fail_create: true,
            ..Default::default()
        },
    ));
    let adapter = ExecutionAdapter::new(runtime.clone());

    let err = adapter.execute(request("missing")).await.unwrap_err();

    assert_eq!(err.status.phase, NodePhase::Error);
    assert!(err.status.message.as_deref().unwrap().contains("no such image"));
    assert!(matches!(err.source, RuntimeError::Create(_)));
    assert!(runtime.removed().is_empty());
}

#[tokio::test]
async fn test_start_failure_still_removes_unit() {
    let runtime = Arc::new(FakeRuntime::default().with(
        "locked",
        Script {
            fail_start: true,
            ..Default::default()
        },
    ));
    let adapter = ExecutionAdapter::new(runtime.clone());

    let err = adapter.execute(request("locked")).await.unwrap_err();

    assert_eq!(err.status.phase, NodePhase::Error);
    assert!(matches!(err.source, RuntimeError::Start(_)));
    assert_eq!(runtime.removed(), vec!["c1"]);
}

#[tokio::test]
async fn test_wait_failure_is_an_error() {
    let runtime = Arc::new(FakeRuntime::default().with(
        "flaky",
        Script {
            fail_wait: true,
            ..Default::default()
        },
    ));
    let adapter = ExecutionAdapter::new(runtime.clone());

    let err = adapter.execute(request("flaky")).await.unwrap_err();

    assert_eq!(err.status.phase, NodePhase::Error);
    assert_eq!(
        err.status.message.as_deref(),
        Some("failed to wait for container: connection reset by daemon")
    );
    assert!(err.status.logs().is_none());
    assert_eq!(runtime.removed(), vec!["c1"]);
}

#[tokio::test]
async fn test_log_and_remove_failures_do_not_change_phase() {
    let runtime = Arc::new(FakeRuntime::default().with(
        "quiet",
        Script {
            fail_logs: true,
            fail_remove: true,
            ..Default::default()
        },
    ));
    let adapter = ExecutionAdapter::new(runtime.clone());

    let status = adapter.execute(request("quiet")).await.unwrap();

    assert_eq!(status.phase, NodePhase::Succeeded);
    assert!(status.message.is_none());
    assert!(status.logs().is_none());
}

#[tokio::test]
async fn test_script_is_run_through_interpreter() {
    let runtime = Arc::new(FakeRuntime::default());
    let adapter = ExecutionAdapter::new(runtime.clone()).with_name_prefix("ci");

    let mut req = request("alpine");
    req.work = UnitOfWork::Script(ScriptSpec::new("alpine", "echo $WORKFLOW_NODE_NAME"));
    adapter.execute(req).await.unwrap();

    let (name, spec) = runtime.created().remove(0);
    assert_eq!(name, "ci-adapter-main");
    assert_eq!(spec.command, vec!["sh", "-c", "echo $WORKFLOW_NODE_NAME"]);
}

// ============================================================================
// End to end through the orchestrator
// ============================================================================

#[tokio::test]
async fn test_single_container_run() {
    let runtime = Arc::new(FakeRuntime::default().with(
        "alpine",
        Script {
            stdout: "hello\n".to_string(),
            ..Default::default()
        },
    ));
    let orchestrator = Orchestrator::new(Arc::new(ExecutionAdapter::new(runtime.clone())));

    let doc = WorkflowDocument::new("hello", "say").with_template(container("say", "alpine"));
    let run = run_to_completion(&orchestrator, doc).await;

    assert_eq!(run.status.phase, RunPhase::Succeeded);
    let node = &run.status.nodes["say"];
    assert_eq!(node.phase, NodePhase::Succeeded);
    assert_eq!(node.logs(), Some("hello\n"));
    assert_eq!(node.runtime_unit.as_deref(), Some("dockflow-hello-say"));
    assert_eq!(runtime.created().len(), 1);
    assert_eq!(runtime.removed().len(), 1);
}

#[tokio::test]
async fn test_unresolvable_entrypoint_creates_no_units() {
    let runtime = Arc::new(FakeRuntime::default());
    let orchestrator = Orchestrator::new(Arc::new(ExecutionAdapter::new(runtime.clone())));

    let doc = WorkflowDocument::new("lost", "nowhere").with_template(container("say", "alpine"));
    let run = run_to_completion(&orchestrator, doc).await;

    assert_eq!(run.status.phase, RunPhase::Failed);
    assert!(runtime.created().is_empty());
}

#[tokio::test]
async fn test_exit_code_reaches_run_message() {
    let runtime = Arc::new(FakeRuntime::default().with(
        "bad",
        Script {
            exit_code: 3,
            ..Default::default()
        },
    ));
    let orchestrator = Orchestrator::new(Arc::new(ExecutionAdapter::new(runtime)));

    let doc = WorkflowDocument::new("exit", "boom").with_template(container("boom", "bad"));
    let run = run_to_completion(&orchestrator, doc).await;

    assert_eq!(run.status.phase, RunPhase::Failed);
    assert_eq!(
        run.status.nodes["boom"].message.as_deref(),
        Some("exited with code 3")
    );
    assert_eq!(
        run.status.message.as_deref(),
        Some("node 'boom' failed: exited with code 3")
    );
}

#[tokio::test]
async fn test_step_barrier_with_uneven_durations() {
    let runtime = Arc::new(
        FakeRuntime::default()
            .with(
                "fast",
                Script {
                    delay_ms: 10,
                    ..Default::default()
                },
            )
            .with(
                "slow",
                Script {
                    delay_ms: 120,
                    ..Default::default()
                },
            ),
    );
    let orchestrator = Orchestrator::new(Arc::new(ExecutionAdapter::new(runtime.clone())));

    let main = Template::steps(
        "main",
        vec![
            StepGroup::new(vec![
                WorkflowStep::new("quick", "fast"),
                WorkflowStep::new("lazy", "slow"),
            ]),
            StepGroup::new(vec![
                WorkflowStep::new("after-a", "fast"),
                WorkflowStep::new("after-b", "slow"),
            ]),
        ],
    );
    let doc = WorkflowDocument::new("barrier", "main")
        .with_template(main)
        .with_template(container("fast", "fast"))
        .with_template(container("slow", "slow"));
    let run = run_to_completion(&orchestrator, doc).await;

    assert_eq!(run.status.phase, RunPhase::Succeeded);
    let nodes = &run.status.nodes;
    let group_one_done = nodes["main[0].quick"]
        .finished_at
        .unwrap()
        .max(nodes["main[0].lazy"].finished_at.unwrap());
    assert!(nodes["main[1].after-a"].started_at >= group_one_done);
    assert!(nodes["main[1].after-b"].started_at >= group_one_done);
    assert_eq!(runtime.removed().len(), 4);
}

#[tokio::test]
async fn test_dag_with_one_failure_finishes_every_task() {
    let runtime = Arc::new(FakeRuntime::default().with(
        "bad",
        Script {
            exit_code: 1,
            ..Default::default()
        },
    ));
    let orchestrator = Orchestrator::new(Arc::new(ExecutionAdapter::new(runtime.clone())));

    let graph = Template::dag(
        "graph",
        vec![
            DagTask::new("one", "good"),
            DagTask::new("two", "bad"),
            DagTask::new("three", "good"),
        ],
    );
    let doc = WorkflowDocument::new("dag", "graph")
        .with_template(graph)
        .with_template(container("good", "alpine"))
        .with_template(container("bad", "bad"));
    let run = run_to_completion(&orchestrator, doc).await;

    assert_eq!(run.status.phase, RunPhase::Failed);
    for id in ["graph.one", "graph.two", "graph.three"] {
        assert!(run.status.nodes[id].phase.is_terminal());
    }
    assert_eq!(runtime.created().len(), 3);
    assert_eq!(runtime.removed().len(), 3);
}

#[tokio::test]
async fn test_injected_env_names_the_node() {
    let runtime = Arc::new(FakeRuntime::default());
    let orchestrator = Orchestrator::new(Arc::new(ExecutionAdapter::new(runtime.clone())));

    let main = Template::steps(
        "main",
        vec![StepGroup::new(vec![WorkflowStep::new("greet", "say")])],
    );
    let doc = WorkflowDocument::new("env", "main")
        .with_template(main)
        .with_template(container("say", "alpine"));
    run_to_completion(&orchestrator, doc).await;

    let (name, spec) = runtime.created().remove(0);
    assert_eq!(name, "dockflow-env-main-0--greet");
    let node_var = spec.env.iter().find(|v| v.name == ENV_NODE_NAME).unwrap();
    assert_eq!(node_var.value, "main[0].greet");
}
