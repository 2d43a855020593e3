use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::{error, info};
use tokio::{net::TcpListener, signal};

use crate::app::config::Config;
use crate::manager::pool::Pool;
use crate::models::task::TaskParams;

pub const TASK_PATH: &str = "/api/v1/task";

pub fn router(pool: Arc<Pool>) -> Router {
    Router::new()
        .route(
            TASK_PATH,
            get(list_tasks).post(create_task).fallback(unsupported_method),
        )
        .fallback(not_found)
        .with_state(pool)
}

/// Serves until SIGINT or SIGTERM arrives.
pub async fn serve(config: &Config, pool: Arc<Pool>) -> anyhow::Result<()> {
    let address = config.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;

    info!("Starting server at {}", address);
    axum::serve(listener, router(pool))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("Server stopped accepting requests.");
    Ok(())
}

async fn list_tasks(State(pool): State<Arc<Pool>>) -> Response {
    Json(pool.snapshot()).into_response()
}

async fn create_task(State(pool): State<Arc<Pool>>, body: Bytes) -> Response {
    let params: TaskParams = match serde_json::from_slice(&body) {
        Ok(params) => params,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match pool.try_enqueue(params) {
        Ok(_) => (StatusCode::OK, "Task queued successfully.").into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn unsupported_method() -> &'static str {
    "Only GET and POST methods are supported."
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 not found.").into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C."),
        _ = terminate => info!("Received SIGTERM."),
    }
}
