use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use dockexec::{DockerCli, DockerConfig, ExecutionAdapter};
use dockruntime::{EngineConfig, Orchestrator};
use dockserver::{configure, AppState};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dockflow-server")]
#[command(about = "Run dockflow workflows over HTTP", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Docker binary used to run containers
    #[arg(long, env = "DOCKER_BINARY", default_value = "docker")]
    docker_binary: String,

    /// Prefix for container names
    #[arg(long, default_value = dockexec::DEFAULT_NAME_PREFIX)]
    name_prefix: String,

    /// Upper bound on concurrently running containers (unbounded if unset)
    #[arg(long, env = "MAX_PARALLEL")]
    max_parallel: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("🚀 Starting dockflow server");

    let docker_config = DockerConfig {
        binary: args.docker_binary,
        name_prefix: args.name_prefix,
    };

    // Runs submitted without a daemon fail per node, so keep serving.
    if let Err(e) = DockerCli::new(&docker_config).ping().await {
        warn!("Docker is not reachable, runs will error until it is: {}", e);
    }

    let engine_config = EngineConfig {
        max_parallel_units: args.max_parallel,
        ..Default::default()
    };
    let orchestrator = Arc::new(Orchestrator::with_config(
        Arc::new(ExecutionAdapter::docker(&docker_config)),
        engine_config,
    ));

    info!("✅ Orchestrator initialized");

    let app_state = web::Data::new(AppState::new(Arc::clone(&orchestrator)));

    info!("🌐 Server starting on http://{}", args.bind);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure)
    })
    .disable_signals()
    .bind(&args.bind)?
    .run();

    let handle = server.handle();
    let signal_orchestrator = Arc::clone(&orchestrator);
    actix_web::rt::spawn(async move {
        shutdown_signal().await;
        info!("🛑 Shutdown signal received");
        signal_orchestrator.shutdown();
        handle.stop(true).await;
    });

    server.await?;

    orchestrator.shutdown();
    info!("👋 Server stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
