//! HTTP surface for the dockflow orchestrator
//!
//! Routes are registered through [`configure`] so the binary and the tests
//! share one application definition.

use actix_web::{get, http::StatusCode, post, web, HttpResponse, Responder, Result as ActixResult};
use actix_ws::Message;
use dockcore::{FlowError, RegistryError, WorkflowDocument};
use dockruntime::Orchestrator;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct ListResponse<T> {
    items: Vec<T>,
}

fn status_for(err: &FlowError) -> StatusCode {
    match err {
        FlowError::Document(_) => StatusCode::BAD_REQUEST,
        FlowError::Registry(RegistryError::DuplicateRun(_)) => StatusCode::CONFLICT,
        FlowError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
        FlowError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &FlowError) -> HttpResponse {
    let status = status_for(err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    HttpResponse::build(status).json(ErrorResponse {
        error: err.to_string(),
    })
}

/// Health check endpoint
#[get("/healthz")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// List all runs, ordered by name
#[get("/api/v1/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let items = data.orchestrator.list().await;
    Ok(HttpResponse::Ok().json(ListResponse { items }))
}

/// Submit a workflow document (JSON or YAML)
#[post("/api/v1/workflows")]
async fn submit_workflow(
    data: web::Data<AppState>,
    body: web::Bytes,
) -> ActixResult<impl Responder> {
    let document = match WorkflowDocument::parse(&body) {
        Ok(document) => document,
        Err(e) => return Ok(error_response(&FlowError::from(e))),
    };

    info!("Received workflow: {}", document.name());

    match data.orchestrator.submit(document).await {
        Ok(run) => Ok(HttpResponse::Created().json(run)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Get a single run
#[get("/api/v1/workflows/{name}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let name = path.into_inner();
    match data.orchestrator.get(&name).await {
        Ok(run) => Ok(HttpResponse::Ok().json(run)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// WebSocket endpoint for execution events
#[get("/api/v1/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.orchestrator.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events dropped", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// Register every route on an actix `App`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_workflows)
        .service(submit_workflow)
        .service(get_workflow)
        .service(websocket_events);
}
