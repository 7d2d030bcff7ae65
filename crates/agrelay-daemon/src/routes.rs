use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

use agrelay_logs::munge_project_path;
use agrelay_runtime::{HookNotification, SendOptions};
use agrelay_types::{NormalizedMessage, ProjectSummary, SessionMetadata, SessionSummary};

use crate::auth;
use crate::state::AppState;

// ─── error mapping ───────────────────────────────────────────────────────────

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({"error": self.1}))).into_response()
    }
}

impl From<agrelay_runtime::Error> for ApiError {
    fn from(err: agrelay_runtime::Error) -> Self {
        use agrelay_runtime::Error;
        let status = match &err {
            Error::SessionNotFound(_) | Error::PromptNotFound(_) => StatusCode::NOT_FOUND,
            Error::ConcurrentSend(_) => StatusCode::CONFLICT,
            Error::SpawnFailed(_) => StatusCode::BAD_GATEWAY,
            Error::Logs(_) | Error::Agent(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl From<agrelay_logs::Error> for ApiError {
    fn from(err: agrelay_logs::Error) -> Self {
        use agrelay_logs::Error;
        let status = match &err {
            Error::SessionNotFound(_) | Error::ProjectNotFound(_) => StatusCode::NOT_FOUND,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
    }
}

// ─── request bodies ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ImageBody {
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub text: String,
    #[serde(default)]
    pub images: Vec<ImageBody>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl SendBody {
    fn into_options(self) -> (String, SendOptions) {
        let images = self
            .images
            .into_iter()
            .map(|img| agrelay_runtime::ImagePayload {
                media_type: img.media_type,
                data: img.data,
            })
            .collect();
        (
            self.text,
            SendOptions {
                images,
                permission_mode: self.permission_mode,
                model: self.model,
            },
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct PermissionBody {
    pub request_id: String,
    pub allow: bool,
    #[serde(default)]
    pub allow_all: bool,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub updated_input: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct HookBody {
    pub session_id: String,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, serde::Serialize)]
pub struct MessagesPage {
    pub messages: Vec<NormalizedMessage>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct PushSubscribeBody {
    pub endpoint: String,
    #[serde(default)]
    pub keys: Value,
}

#[derive(Debug, Deserialize)]
pub struct PushUnsubscribeBody {
    pub endpoint: String,
}

// ─── handlers ────────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<ProjectSummary>>, ApiError> {
    let projects = state.daemon.coordinator().reader().list_projects()?;
    Ok(Json(projects))
}

async fn list_sessions(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let sessions = state.daemon.coordinator().reader().list_sessions(&path)?;
    Ok(Json(sessions))
}

/// The :path parameter is either an absolute project directory or the
/// munged name the agent derives from one; spawning needs the real path.
fn resolve_project_dir(state: &AppState, path: &str) -> Result<PathBuf, ApiError> {
    if path.starts_with('/') {
        return Ok(PathBuf::from(path));
    }
    let projects = state.daemon.coordinator().reader().list_projects()?;
    projects
        .into_iter()
        .find(|p| munge_project_path(&p.path) == path)
        .map(|p| PathBuf::from(p.path))
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("Project not found: {}", path)))
}

async fn new_session(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(body): Json<SendBody>,
) -> Result<Json<Value>, ApiError> {
    let project = resolve_project_dir(&state, &path)?;
    let (text, options) = body.into_options();
    let session_id = state
        .daemon
        .coordinator()
        .new_session(project, &text, options)
        .await?;
    Ok(Json(json!({"session_id": session_id})))
}

async fn session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<MessagesPage>, ApiError> {
    let log = state.daemon.coordinator().reader().read(&id)?;
    let total = log.messages.len();

    // Pagination counts from the tail: offset 0 is the newest page
    let limit = page.limit.unwrap_or(50);
    let offset = page.offset.unwrap_or(0);
    let end = total.saturating_sub(offset);
    let start = end.saturating_sub(limit);
    let messages = log.messages[start..end].to_vec();

    Ok(Json(MessagesPage { messages, total }))
}

async fn session_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionMetadata>, ApiError> {
    let metadata = state.daemon.coordinator().reader().session_metadata(&id)?;
    Ok(Json(metadata))
}

async fn send_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendBody>,
) -> Result<Json<Value>, ApiError> {
    let (text, options) = body.into_options();
    state.daemon.coordinator().send(&id, &text, options).await?;
    Ok(Json(json!({"status": "sent"})))
}

async fn respond_permission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PermissionBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .daemon
        .coordinator()
        .respond_permission(
            &id,
            &body.request_id,
            body.allow,
            body.allow_all,
            body.tool_name,
            body.updated_input,
        )
        .await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn abort_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.daemon.coordinator().abort(&id).await?;
    Ok(Json(json!({"status": "aborted"})))
}

async fn hook_callback(
    State(state): State<AppState>,
    Json(body): Json<HookBody>,
) -> Result<Json<Value>, ApiError> {
    // The agent's Notification hook does not always label its payload;
    // a permission message is recognizable from the text
    let notification_type = body.notification_type.unwrap_or_else(|| {
        if body.message.contains("permission") {
            "permission_prompt".to_string()
        } else {
            "notification".to_string()
        }
    });

    debug!(session_id = %body.session_id, kind = %notification_type, "hook callback");
    state
        .daemon
        .coordinator()
        .hook_notification(HookNotification {
            session_id: body.session_id,
            notification_type,
            message: body.message,
            cwd: body.cwd,
        })
        .await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn push_list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"subscriptions": state.push.list()}))
}

async fn push_subscribe(
    State(state): State<AppState>,
    Json(body): Json<PushSubscribeBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .push
        .add(body.endpoint, body.keys)
        .map_err(ApiError::from)?;
    Ok(Json(json!({"status": "subscribed"})))
}

async fn push_unsubscribe(
    State(state): State<AppState>,
    Json(body): Json<PushUnsubscribeBody>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.push.remove(&body.endpoint).map_err(ApiError::from)?;
    Ok(Json(json!({"removed": removed})))
}

// ─── router ──────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/claude/projects", get(list_projects))
        .route("/api/claude/projects/:path/sessions", get(list_sessions))
        .route("/api/claude/projects/:path/new", post(new_session))
        .route("/api/claude/sessions/:id", get(session_messages))
        .route("/api/claude/sessions/:id/metadata", get(session_metadata))
        .route("/api/claude/sessions/:id/send", post(send_turn))
        .route("/api/claude/sessions/:id/permission", post(respond_permission))
        .route("/api/sessions/:id/abort", post(abort_session))
        .route("/api/events/:id", get(crate::sse::events))
        .route("/api/claude-hook", post(hook_callback))
        .route("/api/push/subscriptions", get(push_list))
        .route("/api/push/subscribe", post(push_subscribe))
        .route("/api/push/unsubscribe", post(push_unsubscribe))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
