// crates/dockcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dockcore::{
    ContainerSpec, DagTask, ExecutionEvent, NodeKind, NodePhase, RunPhase, ScriptSpec, StepGroup,
    Template, WorkflowDocument, WorkflowRun, WorkflowStep,
};
use dockexec::{DockerConfig, ExecutionAdapter};
use dockruntime::{EngineConfig, Orchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dockflow")]
#[command(about = "Run container workflows", long_about = None)]
struct Cli {
    /// Server used by submit, get and list
    #[arg(long, global = true, env = "DOCKFLOW_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file locally against Docker
    Run {
        /// Path to workflow YAML or JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Upper bound on concurrently running containers
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Docker binary used to run containers
        #[arg(long, env = "DOCKER_BINARY", default_value = "docker")]
        docker_binary: String,
    },

    /// Validate a workflow file without running it
    Validate {
        /// Path to workflow YAML or JSON file
        file: PathBuf,
    },

    /// Submit a workflow file to a running server
    Submit {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show one run from the server
    Get {
        name: String,

        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },

    /// List runs on the server
    List,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Run {
            file,
            max_parallel,
            docker_binary,
        } => {
            let docker = DockerConfig {
                binary: docker_binary,
                ..Default::default()
            };
            run_workflow(file, docker, max_parallel).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Submit { file } => {
            submit_workflow(&cli.server, file).await?;
        }

        Commands::Get { name, json } => {
            get_workflow(&cli.server, &name, json).await?;
        }

        Commands::List => {
            list_workflows(&cli.server).await?;
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn load_document(file: &Path) -> Result<WorkflowDocument> {
    let body = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    Ok(WorkflowDocument::parse(&body)?)
}

async fn run_workflow(
    file: PathBuf,
    docker: DockerConfig,
    max_parallel: Option<usize>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let document = load_document(&file)?;
    let name = document.name().to_string();

    println!("📋 Workflow: {}", name);
    println!("   Entrypoint: {}", document.spec.entrypoint);
    println!("   Templates: {}", document.spec.templates.len());
    println!();

    let config = EngineConfig {
        max_parallel_units: max_parallel,
        ..Default::default()
    };
    let orchestrator = Orchestrator::with_config(Arc::new(ExecutionAdapter::docker(&docker)), config);

    let mut events = orchestrator.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunSubmitted { .. } => {}
                ExecutionEvent::RunStarted { .. } => {
                    println!("▶️  Workflow started");
                }
                ExecutionEvent::NodeStarted {
                    node_id,
                    template,
                    kind,
                    ..
                } => match kind {
                    NodeKind::Leaf => println!("  ⚡ Starting node: {} ({})", node_id, template),
                    NodeKind::Composite => println!("  📂 Entering {} ({})", node_id, template),
                },
                ExecutionEvent::NodeCompleted {
                    node_id,
                    phase,
                    message,
                    ..
                } => match phase {
                    NodePhase::Succeeded => println!("  ✅ Node {} succeeded", node_id),
                    _ => println!(
                        "  ❌ Node {} {:?}: {}",
                        node_id,
                        phase,
                        message.unwrap_or_default()
                    ),
                },
                ExecutionEvent::RunCompleted { phase, message, .. } => {
                    match phase {
                        RunPhase::Succeeded => println!("✨ Workflow completed successfully"),
                        _ => println!("💥 Workflow failed: {}", message.unwrap_or_default()),
                    }
                    break;
                }
            }
        }
    });

    orchestrator.submit(document).await?;
    let run = orchestrator
        .wait_for_completion(&name, Duration::from_millis(100))
        .await?;
    let _ = tokio::time::timeout(Duration::from_secs(1), event_task).await;

    println!();
    print_summary(&run);

    if run.status.phase != RunPhase::Succeeded {
        bail!(
            "workflow '{}' failed: {}",
            name,
            run.status.message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let document = load_document(&file)?;
    if document.name().trim().is_empty() {
        bail!(dockcore::DocumentError::MissingName);
    }
    dockruntime::validate(&document.spec)?;

    let leaves = document.spec.templates.iter().filter(|t| t.is_leaf()).count();
    println!("✅ Workflow is valid:");
    println!("   Name: {}", document.name());
    println!("   Entrypoint: {}", document.spec.entrypoint);
    println!(
        "   Templates: {} ({} containers or scripts)",
        document.spec.templates.len(),
        leaves
    );

    Ok(())
}

/// Turn a non-success response into an error carrying the server's message
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    tracing::debug!("{} answered {}", response.url(), status);
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    let message = body["error"].as_str().unwrap_or("no details").to_string();
    bail!("server returned {}: {}", status, message)
}

async fn submit_workflow(server: &str, file: PathBuf) -> Result<()> {
    let body = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
    let document = WorkflowDocument::parse(&body)?;
    tracing::debug!("Submitting '{}' to {}", document.name(), server);

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/workflows", server))
        .header("content-type", "application/yaml")
        .body(body)
        .send()
        .await
        .with_context(|| format!("connecting to {}", server))?;
    let run: WorkflowRun = check(response).await?.json().await?;

    println!("📨 Submitted workflow: {}", run.metadata.name);
    println!("   UID: {}", run.metadata.uid);
    println!();
    println!("Follow it with:");
    println!("  dockflow get {}", run.metadata.name);
    Ok(())
}

async fn get_workflow(server: &str, name: &str, json: bool) -> Result<()> {
    let response = reqwest::get(format!("{}/api/v1/workflows/{}", server, name))
        .await
        .with_context(|| format!("connecting to {}", server))?;
    let run: WorkflowRun = check(response).await?.json().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_summary(&run);
    }
    Ok(())
}

async fn list_workflows(server: &str) -> Result<()> {
    let response = reqwest::get(format!("{}/api/v1/workflows", server))
        .await
        .with_context(|| format!("connecting to {}", server))?;
    let body: serde_json::Value = check(response).await?.json().await?;
    let runs: Vec<WorkflowRun> = serde_json::from_value(body["items"].clone())?;

    if runs.is_empty() {
        println!("No workflows");
        return Ok(());
    }

    println!("📦 Workflows:");
    for run in &runs {
        println!(
            "  • {} {} ({} nodes)",
            phase_icon(run.status.phase),
            run.metadata.name,
            run.status.nodes.len()
        );
    }
    Ok(())
}

fn phase_icon(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Pending => "⏳",
        RunPhase::Running => "🔄",
        RunPhase::Succeeded => "✅",
        RunPhase::Failed => "❌",
    }
}

fn print_summary(run: &WorkflowRun) {
    println!("📊 Execution Summary:");
    println!("   Workflow: {} ({})", run.metadata.name, run.metadata.uid);
    println!("   Phase: {} {:?}", phase_icon(run.status.phase), run.status.phase);
    if let Some(finished) = run.status.finished_at {
        let elapsed = finished - run.status.started_at;
        println!("   Duration: {}ms", elapsed.num_milliseconds());
    }
    if let Some(ref message) = run.status.message {
        println!("   Message: {}", message);
    }

    if run.status.nodes.is_empty() {
        return;
    }

    println!();
    println!("📤 Nodes:");
    for node in run.status.nodes.values() {
        let detail = node.message.as_deref().unwrap_or("");
        println!("   {} [{:?}] {}", node.id, node.phase, detail);
        if let Some(logs) = node.logs() {
            for line in logs.lines() {
                println!("     │ {}", line);
            }
        }
    }
}

fn example_workflow() -> WorkflowDocument {
    let main = Template::steps(
        "main",
        vec![
            StepGroup::new(vec![WorkflowStep::new("hello", "echo")]),
            StepGroup::new(vec![
                WorkflowStep::new("fan-out", "fan-out"),
                WorkflowStep::new("whoami", "whoami"),
            ]),
        ],
    );

    let fan_out = Template::dag(
        "fan-out",
        vec![
            DagTask::new("left", "echo"),
            DagTask::new("right", "echo"),
        ],
    );

    let echo = Template::container(
        "echo",
        ContainerSpec::new("alpine:3.19")
            .with_command(["echo"])
            .with_args(["Hello from dockflow"]),
    );

    let whoami = Template::script(
        "whoami",
        ScriptSpec::new(
            "alpine:3.19",
            "echo \"running $WORKFLOW_NODE_NAME of $WORKFLOW_NAME\"\nuname -a\n",
        )
        .with_env("GREETING", "hi"),
    );

    WorkflowDocument::new("hello-dockflow", "main")
        .with_template(main)
        .with_template(fan_out)
        .with_template(echo)
        .with_template(whoami)
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let yaml = example_workflow().to_yaml()?;
    std::fs::write(&output, yaml)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  dockflow run --file {}", output.display());

    Ok(())
}
