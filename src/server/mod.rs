//! HTTP surface: plan-and-search, streaming answers over SSE, event intake,
//! and preference management.
//!
//! Routes:
//! - `GET  /api/search`       - plan the query and return first-pass hits
//! - `POST /api/answer`       - run the full pipeline, streamed as SSE
//! - `POST /api/events`       - ingest one interaction event (best-effort)
//! - `GET  /api/events`       - list a user's events
//! - `GET  /api/preferences`  - a user's top arms and interaction count
//! - `DELETE /api/preferences` - wipe a user's state
//! - `GET  /health`           - liveness
//!
//! Every `/api/answer` stream carries zero or more `progress`/`chunk`
//! frames and exactly one terminal `complete` or `error` frame, each as a
//! `data: {"type": ..., "data": ...}` SSE record.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::models::{QueryPlan, SearchHit, UserEvent};
use crate::pipeline::{Pipeline, PipelineEvent};
use crate::store::EventStore;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The assembled answer pipeline.
    pub pipeline: Arc<Pipeline>,

    /// The event store (also reachable through the pipeline; kept here for
    /// the event/preference endpoints).
    pub store: Arc<EventStore>,
}

impl AppState {
    /// Build state from a pipeline, sharing its event store.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let store = pipeline.store();
        Self { pipeline, store }
    }
}

/// Build the full router with CORS for the given allowed origin.
pub fn router(state: AppState, web_origin: &str) -> Router {
    let cors = match HeaderValue::from_str(web_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => {
            warn!("invalid WEB_ORIGIN {:?}, allowing any origin", web_origin);
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    Router::new()
        .route("/api/search", get(search_handler))
        .route("/api/answer", post(answer_handler))
        .route("/api/events", post(post_event_handler).get(list_events_handler))
        .route(
            "/api/preferences",
            get(preferences_handler).delete(reset_preferences_handler),
        )
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until ctrl-c.
///
/// # Errors
/// Returns an error when the listener cannot bind or the server fails.
pub async fn serve(state: AppState, port: u16, web_origin: &str) -> std::io::Result<()> {
    let app = router(state, web_origin);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
}

/// API error envelope.
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    fn bad_gateway(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            error,
            message: message.into(),
        }
    }

    fn internal(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(json!({
            "error": self.error,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

// ============================================================================
// Request / response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// The question to plan and search.
    pub q: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub plan: QueryPlan,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub query: String,

    #[serde(default)]
    pub user_id: Option<String>,

    /// Re-use a plan from a prior `/api/search` call instead of re-planning.
    #[serde(default)]
    pub plan: Option<QueryPlan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParams {
    pub user_id: String,

    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmScore {
    pub arm: String,
    pub score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesResponse {
    pub top_arms: Vec<ArmScore>,
    pub total_interactions: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// `GET /api/search?q=` - plan the query (degrading internally on planner
/// failure) and return the merged first-pass hits.
pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let plan = state.pipeline.plan(&params.q).await;
    let results = state
        .pipeline
        .search(&plan)
        .await
        .map_err(|e| ApiError::bad_gateway("search_failed", e.to_string()))?;
    Ok(Json(SearchResponse { plan, results }))
}

/// `POST /api/answer` - run the pipeline and stream its events as SSE.
pub async fn answer_handler(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PipelineEvent>();
    let pipeline = state.pipeline.clone();

    tokio::spawn(async move {
        pipeline
            .run(&request.query, request.user_id.as_deref(), request.plan, tx)
            .await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = matches!(
                event,
                PipelineEvent::Complete(_) | PipelineEvent::Error { .. }
            );
            if let Ok(frame) = Event::default().json_data(&event) {
                yield Ok(frame);
            }
            if terminal {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `POST /api/events` - best-effort intake: malformed events are logged and
/// dropped, never 4xx'd.
pub async fn post_event_handler(
    State(state): State<AppState>,
    Json(event): Json<UserEvent>,
) -> Json<serde_json::Value> {
    if let Err(err) = state.store.record_event(event).await {
        warn!("dropping event: {}", err);
    }
    Json(json!({"success": true}))
}

/// `GET /api/events?userId=` - list a user's events.
pub async fn list_events_handler(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<Vec<UserEvent>>, ApiError> {
    let events = state
        .store
        .events(&params.user_id, params.limit)
        .await
        .map_err(|e| ApiError::internal("store_failed", e.to_string()))?;
    Ok(Json(events))
}

/// `GET /api/preferences?userId=` - top 5 arms plus interaction count.
pub async fn preferences_handler(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<PreferencesResponse>, ApiError> {
    let (top_arms, total_interactions) = state
        .store
        .preferences(&params.user_id, 5)
        .await
        .map_err(|e| ApiError::internal("store_failed", e.to_string()))?;
    Ok(Json(PreferencesResponse {
        top_arms: top_arms
            .into_iter()
            .map(|(arm, score)| ArmScore { arm, score })
            .collect(),
        total_interactions,
    }))
}

/// `DELETE /api/preferences?userId=` - wipe a user's state entirely.
pub async fn reset_preferences_handler(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .reset(&params.user_id)
        .await
        .map_err(|e| ApiError::internal("store_failed", e.to_string()))?;
    Ok(Json(json!({"ok": true})))
}

/// `GET /health` - liveness probe.
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "timestamp": EventStore::now_ms(),
    }))
}
