//! HTTP surface of the service.
//!
//! | route | |
//! |---|---|
//! | `GET /` | liveness, `{"message": "Welcome!"}` |
//! | `POST /query` | `{query, chart_type?, user_email?}` → chart object, explanation string or `"No chart data generated."` |
//! | `GET /history?email=..&page=..` | a user's past exchanges, newest first |
//!
//! Failures come back as `{"message": ...}` with a status that tells
//! infrastructure problems apart: 400 for an empty query, 503 when the
//! generative model is unavailable, 504 when the request deadline elapsed,
//! 500 otherwise. A malformed chart is never an HTTP error.
//!
//! A client that disconnects drops its request future, which abandons any
//! pending generation retries.

use std::error::Error;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::RagConfig;
use crate::error::RagError;
use crate::history::{HistoryEntry, HistorySink, SqliteHistory};
use crate::models::HistoryRecord;
use crate::pipeline::{QueryResponse, RetrievalPipeline};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<RetrievalPipeline>,
    history: SqliteHistory,
    history_page_size: usize,
}

impl AppState {
    pub fn new(
        pipeline: Arc<RetrievalPipeline>,
        history: SqliteHistory,
        history_page_size: usize,
    ) -> Self {
        Self {
            pipeline,
            history,
            history_page_size: history_page_size.max(1),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default, alias = "user_query")]
    pub query: String,
    #[serde(default)]
    pub chart_type: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(alias = "user_email")]
    pub email: String,
    /// 0-based page of `history_page_size` entries.
    #[serde(default)]
    pub page: Option<usize>,
    /// Number of entries to skip. Takes precedence over `page`.
    #[serde(default, alias = "page_no")]
    pub offset: Option<usize>,
}

impl HistoryParams {
    /// Row offset to list from, or `None` for the full history.
    pub fn row_offset(&self, page_size: usize) -> Option<usize> {
        self.offset
            .or_else(|| self.page.map(|page| page.saturating_mul(page_size)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

type ApiError = (StatusCode, Json<MessageBody>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/query", post(query_handler))
        .route("/history", get(history_handler))
        .with_state(state)
}

/// Build every component from `config` and serve until Ctrl-C.
pub async fn serve(config: &RagConfig, bind: Option<String>) -> Result<(), Box<dyn Error>> {
    let pipeline = Arc::new(RetrievalPipeline::from_config(config)?);
    let history = SqliteHistory::open(config.history_db_url.clone()).await?;
    let app = router(AppState::new(pipeline, history, config.history_page_size));

    let bind = bind.unwrap_or_else(|| config.bind.clone());
    let listener = tokio::net::TcpListener::bind(bind.as_str()).await?;
    info!("ragchart listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn root() -> Json<MessageBody> {
    Json(MessageBody {
        message: "Welcome!".to_string(),
    })
}

async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing user query"));
    }

    let response = state
        .pipeline
        .answer(&request.query, request.chart_type.as_deref())
        .await
        .map_err(|err| {
            error!("Query {:?} failed: {err}", request.query);
            api_error(rag_error_status(&err), err.to_string())
        })?;

    if let Some(user_email) = request.user_email.filter(|e| !e.trim().is_empty()) {
        let stored = response.history_text().map_err(|err| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to store query history: {err}"),
            )
        })?;
        state
            .history
            .record(HistoryEntry {
                user_email,
                user_query: request.query,
                response: stored,
            })
            .await
            .map_err(|err| {
                error!("History write failed: {err}");
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to store query history: {err}"),
                )
            })?;
    }

    Ok(Json(response))
}

async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    state
        .history
        .list(
            &params.email,
            params.row_offset(state.history_page_size),
            state.history_page_size,
        )
        .await
        .map(Json)
        .map_err(|err| {
            error!("History read failed: {err}");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to retrieve history: {err}"),
            )
        })
}

fn rag_error_status(err: &RagError) -> StatusCode {
    match err {
        RagError::Embedding(_) | RagError::Search(_) => StatusCode::INTERNAL_SERVER_ERROR,
        RagError::GenerationUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RagError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(MessageBody {
            message: message.into(),
        }),
    )
}
