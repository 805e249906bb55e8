use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use libwsctl::{TaskError, TaskSupervisor};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use wsctl_protocol::{
    CreateTaskRequest, ErrorBody, FollowupRequest, OutputQuery, TaskDetail, TaskList, TaskRecord,
    TokenResponse,
};

use crate::auth::{AuthMode, Authorizer};

pub struct AppState {
    supervisor: TaskSupervisor,
    auth: Authorizer,
}

impl AppState {
    pub fn new(supervisor: TaskSupervisor, auth: Authorizer) -> Self {
        Self { supervisor, auth }
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    fn ensure_authorized(&self, headers: &HeaderMap, mode: AuthMode) -> Result<(), ApiError> {
        if self.auth.authorize(headers, mode) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(String),
    InvalidInput(String),
    BackendUnavailable(String),
    Internal(anyhow::Error),
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(id) => ApiError::NotFound(format!("task not found: {id}")),
            TaskError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            TaskError::BackendUnavailable(msg) => ApiError::BackendUnavailable(msg),
            other @ (TaskError::Persistence(_) | TaskError::Io(_)) => {
                ApiError::Internal(other.into())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::BackendUnavailable(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(err) => {
                tracing::error!("request failed: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/claude/tasks", get(list_tasks).post(create_task))
        .route("/api/claude/tasks/{id}", get(get_task).delete(delete_task))
        .route("/api/claude/tasks/{id}/output", get(task_output))
        .route("/api/claude/tasks/{id}/message", post(send_message))
        .route("/api/claude/auth/token", get(get_token))
        .route("/api/claude/auth/token/regenerate", post(regenerate_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wrap `app` in a CORS layer when origins are configured.
pub fn with_cors(app: Router, origins: &[String]) -> Result<Router> {
    if origins.is_empty() {
        return Ok(app);
    }
    Ok(app.layer(build_cors(origins)?))
}

fn build_cors(origins: &[String]) -> Result<CorsLayer> {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any));
    }

    let mut headers = Vec::with_capacity(origins.len());
    for origin in origins {
        headers.push(
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid --allow-origin value: {origin}"))?,
        );
    }

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(headers))
        .allow_methods(methods)
        .allow_headers(Any))
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "backend": state.supervisor.backend_kind(),
    }))
}

/// GET /api/claude/tasks
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TaskList>, ApiError> {
    state.ensure_authorized(&headers, AuthMode::BearerOrProxy)?;
    let tasks = state.supervisor.list().await?;
    Ok(Json(TaskList { tasks }))
}

/// POST /api/claude/tasks
async fn create_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskRecord>), ApiError> {
    state.ensure_authorized(&headers, AuthMode::BearerOrProxy)?;
    let Json(req) = body?;
    let record = state.supervisor.create(&req.prompt, req.workdir).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/claude/tasks/{id}
async fn get_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<TaskDetail>, ApiError> {
    state.ensure_authorized(&headers, AuthMode::BearerOrProxy)?;
    Ok(Json(state.supervisor.get(&task_id).await?))
}

/// GET /api/claude/tasks/{id}/output?tail=N
async fn task_output(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    query: Result<Query<OutputQuery>, QueryRejection>,
) -> Result<String, ApiError> {
    state.ensure_authorized(&headers, AuthMode::BearerOrProxy)?;
    let Query(query) = query?;
    Ok(state.supervisor.output(&task_id, query.tail).await?)
}

/// POST /api/claude/tasks/{id}/message
async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    body: Result<Json<FollowupRequest>, JsonRejection>,
) -> Result<Json<TaskRecord>, ApiError> {
    state.ensure_authorized(&headers, AuthMode::BearerOrProxy)?;
    let Json(req) = body?;
    Ok(Json(state.supervisor.send_followup(&task_id, &req.prompt).await?))
}

/// DELETE /api/claude/tasks/{id}
async fn delete_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    state.ensure_authorized(&headers, AuthMode::BearerOrProxy)?;
    Ok(Json(state.supervisor.delete(&task_id).await?))
}

/// GET /api/claude/auth/token
async fn get_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, ApiError> {
    state.ensure_authorized(&headers, AuthMode::ProxyOnly)?;
    let token = state.auth.tokens().get_or_create()?;
    Ok(Json(TokenResponse { token }))
}

/// POST /api/claude/auth/token/regenerate
async fn regenerate_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, ApiError> {
    state.ensure_authorized(&headers, AuthMode::ProxyOnly)?;
    let token = state.auth.tokens().regenerate()?;
    if let Some(user) = state.auth.proxy_user(&headers) {
        tracing::info!(user = %user, "api token regenerated via http");
    }
    Ok(Json(TokenResponse { token }))
}
