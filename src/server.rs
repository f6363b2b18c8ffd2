//! HTTP surface of the merge service.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::{MergeService, TracingProgress};
use crate::config::ResolvedConfig;
use crate::domain::{DOCX_MEDIA_TYPE, MergedDocument};
use crate::error::MergeError;
use crate::fetch::SourceClient;
use crate::scratch::ScratchSpace;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeBody {
    #[serde(default)]
    pub file_urls: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for MergeError {
    fn into_response(self) -> Response {
        if self.is_client_error() {
            let message = client_message(&self);
            warn!("merge rejected: {}", error_chain(&self));
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    message,
                    details: None,
                }),
            )
                .into_response();
        }
        error!("merge failed: {}", error_chain(&self));
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                message: "an unexpected error occurred while merging documents".to_string(),
                details: Some(self.to_string()),
            }),
        )
            .into_response()
    }
}

/// What a caller is told about a rejected merge. Assembly failures name the
/// document by position; the scratch path it was read from stays in the log.
fn client_message(err: &MergeError) -> String {
    match err {
        MergeError::Assembly {
            position, source, ..
        } => format!("could not merge document {position}: {}", error_chain(source)),
        other => error_chain(other),
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

pub fn build_router<C: SourceClient + 'static>(service: Arc<MergeService<C>>) -> Router {
    Router::new()
        .route("/merge", post(merge_handler::<C>))
        .route("/merge/health", get(health_handler))
        .with_state(service)
}

async fn merge_handler<C: SourceClient + 'static>(
    State(service): State<Arc<MergeService<C>>>,
    payload: Result<Json<MergeBody>, JsonRejection>,
) -> Response {
    let urls = match payload {
        Ok(Json(body)) => body.file_urls,
        Err(rejection) => {
            warn!("malformed merge request: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    message: rejection.body_text(),
                    details: None,
                }),
            )
                .into_response();
        }
    };

    let merged =
        tokio::task::spawn_blocking(move || service.merge_documents(&urls, &TracingProgress)).await;
    match merged {
        Ok(Ok(document)) => document_response(document),
        Ok(Err(err)) => err.into_response(),
        Err(join_err) => {
            error!("merge worker failed: {join_err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    message: "an unexpected error occurred while merging documents".to_string(),
                    details: Some(join_err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

fn document_response(document: MergedDocument) -> Response {
    let file_name = MergedDocument::file_name(Utc::now());
    info!(
        "merged {} documents into {file_name} ({} bytes)",
        document.source_count,
        document.bytes.len()
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, DOCX_MEDIA_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        document.bytes,
    )
        .into_response()
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "document-merge",
    }))
}

/// Runs the scratch sweep every `interval` on the blocking pool.
pub fn spawn_sweeper(scratch: ScratchSpace, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let space = scratch.clone();
            match tokio::task::spawn_blocking(move || space.sweep(SystemTime::now())).await {
                Ok(Ok(report)) if report.removed > 0 || report.failed > 0 => info!(
                    "scratch sweep removed={} failed={} retained={}",
                    report.removed, report.failed, report.retained
                ),
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!("scratch sweep failed: {err}"),
                Err(err) => warn!("scratch sweep task failed: {err}"),
            }
        }
    })
}

pub struct MergeServer<C: SourceClient> {
    config: ResolvedConfig,
    service: Arc<MergeService<C>>,
}

impl<C: SourceClient + 'static> MergeServer<C> {
    pub fn new(config: ResolvedConfig, service: Arc<MergeService<C>>) -> Self {
        Self { config, service }
    }

    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.service))
    }

    /// Serves until ctrl-c.
    pub async fn serve(self) -> Result<(), MergeError> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|err| MergeError::Server(format!("bind {}: {err}", self.config.bind_addr)))?;
        let sweeper = spawn_sweeper(self.service.scratch().clone(), self.config.sweep_interval);
        info!(
            "document merge service listening on {} (scratch {})",
            self.config.bind_addr,
            self.service.scratch().root()
        );
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!("failed to listen for shutdown signal: {err}");
                }
            })
            .await
            .map_err(|err| MergeError::Server(err.to_string()));
        sweeper.abort();
        served
    }
}
