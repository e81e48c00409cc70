//! HTTP API.
//!
//! A thin JSON layer over the vault. The acting user comes from request
//! headers; verifying who they are is the job of whatever sits in front of
//! this server.
//!
//! | Header | Meaning |
//! |--------|---------|
//! | `x-vault-user` | user id (required) |
//! | `x-vault-name` | display name, recorded as uploader |
//! | `x-vault-email` | email, published for chat search |
//! | `x-vault-auth-error` | failure code from a fronting authenticator; answered with 401 |
//!
//! Each user gets one [`Session`] for the life of the process, kept in step
//! with that user's live metadata feed.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/files?q=` | Visible files, optionally filtered |
//! | `POST` | `/files` | Upload a batch (base64 content) |
//! | `DELETE` | `/files/{id}` | Delete a file |
//! | `POST` | `/files/{id}/summary` | Summarize on demand |
//! | `GET`  | `/devices` | Devices with derived status |
//! | `DELETE` | `/devices/{id}` | Remove a device |
//! | `POST` | `/print` | Queue a print job |
//! | `GET`  | `/users?email=` | Find users by email |
//! | `GET`/`POST` | `/conversations` | List / open conversations |
//! | `GET`/`POST` | `/conversations/{id}/messages` | Read / send messages |
//! | `POST` | `/logout` | Drop the caller's session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "device_offline", "message": "device pc-1 is offline" } }
//! ```
//!
//! Responses that can raise alerts carry them in an `alerts` array, error
//! bodies included:
//!
//! ```json
//! { "error": { "code": "analysis_failed", "message": "..." },
//!   "alerts": [{ "severity": "non_blocking", "message": "Could not analyze this file. ..." }] }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use cloudvault_core::models::{ChatUser, Conversation, Device, FileRecord, UserMessage};
use cloudvault_core::store::MetadataStore;

use crate::chat;
use crate::errors::{auth_error_message, VaultError};
use crate::pipeline::{NewFile, UploadReport};
use crate::printing::{self, PrintTargets};
use crate::runtime::{chat_user, Runtime};
use crate::session::{Alert, Identity, Session};

struct SessionEntry {
    session: Arc<Session>,
    sync: JoinHandle<()>,
}

#[derive(Clone)]
struct AppState {
    runtime: Arc<Runtime>,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
}

impl AppState {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The caller's session, created and synced on first use.
    async fn session(&self, headers: &HeaderMap) -> Result<Arc<Session>, AppError> {
        let identity = identity_from(headers)?;

        let existing = self
            .sessions()
            .get(&identity.user_id)
            .map(|entry| entry.session.clone());
        if let Some(session) = existing {
            return Ok(session);
        }

        let session = Arc::new(Session::new(identity));
        if session.identity().email.is_some() {
            chat::sync_user(self.runtime.store.as_ref(), &chat_user(session.identity()))
                .await
                .map_err(internal)?;
        }
        let sync = self
            .runtime
            .vault
            .sync(session.clone())
            .await
            .map_err(internal)?;

        let mut sessions = self.sessions();
        if let Some(entry) = sessions.get(session.owner_id()) {
            // Another request created it first.
            sync.abort();
            return Ok(entry.session.clone());
        }
        sessions.insert(
            session.owner_id().to_string(),
            SessionEntry {
                session: session.clone(),
                sync,
            },
        );
        info!(user = %session.owner_id(), "session started");
        Ok(session)
    }
}

fn identity_from(headers: &HeaderMap) -> Result<Identity, AppError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let unauthenticated = |message: String| AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthenticated".to_string(),
        message,
        alerts: Vec::new(),
    };

    if let Some(code) = header("x-vault-auth-error") {
        return Err(unauthenticated(auth_error_message(&code).to_string()));
    }
    let user_id = header("x-vault-user")
        .ok_or_else(|| unauthenticated("x-vault-user header is required".to_string()))?;
    Ok(Identity {
        display_name: header("x-vault-name").unwrap_or_else(|| user_id.clone()),
        email: header("x-vault-email"),
        user_id,
    })
}

/// Starts the HTTP server on `[server].bind`. Runs until the process exits.
pub async fn run_server(runtime: Runtime) -> anyhow::Result<()> {
    let bind_addr = runtime.config.server.bind.clone();
    let state = AppState {
        runtime: Arc::new(runtime),
        sessions: Arc::new(Mutex::new(HashMap::new())),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "vault server listening");
    println!("Vault server listening on http://{}", bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/files", get(handle_list_files).post(handle_upload))
        .route("/files/{id}", delete(handle_delete_file))
        .route("/files/{id}/summary", post(handle_summary))
        .route("/devices", get(handle_devices))
        .route("/devices/{id}", delete(handle_delete_device))
        .route("/print", post(handle_print))
        .route("/users", get(handle_search_users))
        .route(
            "/conversations",
            get(handle_conversations).post(handle_open_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(handle_messages).post(handle_send_message),
        )
        .route("/logout", post(handle_logout))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    alerts: Vec<Alert>,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    alerts: Vec<Alert>,
}

impl AppError {
    fn with_alerts(mut self, alerts: Vec<Alert>) -> Self {
        self.alerts = alerts;
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
            alerts: self.alerts,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        let status = match err {
            VaultError::NotFound { .. } => StatusCode::NOT_FOUND,
            VaultError::InvalidInput(_)
            | VaultError::InvalidRecord(_)
            | VaultError::UnknownPrinter { .. } => StatusCode::BAD_REQUEST,
            VaultError::DeviceOffline(_) => StatusCode::CONFLICT,
            VaultError::Retrieval(_) | VaultError::Analysis { .. } => StatusCode::BAD_GATEWAY,
            VaultError::Upload { .. }
            | VaultError::Delete { .. }
            | VaultError::Print(_)
            | VaultError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
            alerts: Vec::new(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        alerts: Vec::new(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    warn!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
        alerts: Vec::new(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Files ============

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<FileRecord>,
    alerts: Vec<Alert>,
}

async fn handle_list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<FilesResponse>, AppError> {
    let session = state.session(&headers).await?;
    Ok(Json(FilesResponse {
        files: session.visible_files(&query.q),
        alerts: session.drain_alerts(),
    }))
}

#[derive(Deserialize)]
struct UploadItem {
    name: String,
    #[serde(default)]
    mime_type: String,
    content_base64: String,
}

#[derive(Deserialize)]
struct UploadRequest {
    files: Vec<UploadItem>,
}

#[derive(Serialize)]
struct UploadResponse {
    reports: Vec<UploadReport>,
    alerts: Vec<Alert>,
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    if req.files.is_empty() {
        return Err(bad_request("files must not be empty"));
    }

    let mut files = Vec::with_capacity(req.files.len());
    for item in req.files {
        if item.name.trim().is_empty() {
            return Err(bad_request("file name must not be empty"));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(item.content_base64.as_bytes())
            .map_err(|e| bad_request(format!("{}: invalid base64: {}", item.name, e)))?;
        files.push(NewFile {
            name: item.name,
            mime_type: item.mime_type,
            bytes,
        });
    }

    let session = state.session(&headers).await?;
    let reports = state.runtime.vault.upload_batch(&session, files).await;
    Ok(Json(UploadResponse {
        reports,
        alerts: session.drain_alerts(),
    }))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: String,
    alerts: Vec<Alert>,
}

async fn handle_delete_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let session = state.session(&headers).await?;
    let result = state.runtime.vault.delete_file(&session, &id).await;
    let alerts = session.drain_alerts();
    match result {
        Ok(()) => Ok(Json(DeleteResponse { deleted: id, alerts })),
        Err(e) => Err(AppError::from(e).with_alerts(alerts)),
    }
}

#[derive(Serialize)]
struct SummaryResponse {
    id: String,
    summary: String,
    alerts: Vec<Alert>,
}

async fn handle_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SummaryResponse>, AppError> {
    let session = state.session(&headers).await?;
    let result = state.runtime.vault.request_summary(&session, &id).await;
    let alerts = session.drain_alerts();
    match result {
        Ok(summary) => Ok(Json(SummaryResponse { id, summary, alerts })),
        Err(e) => Err(AppError::from(e).with_alerts(alerts)),
    }
}

// ============ Devices & printing ============

#[derive(Serialize)]
struct DevicesResponse {
    devices: Vec<Device>,
}

async fn handle_devices(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DevicesResponse>, AppError> {
    state.session(&headers).await?;
    let rt = &state.runtime;
    let devices = printing::online_devices(rt.store.as_ref(), &rt.policy, Utc::now())
        .await
        .map_err(internal)?;
    Ok(Json(DevicesResponse { devices }))
}

async fn handle_delete_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.session(&headers).await?;
    printing::delete_device(state.runtime.store.as_ref(), &id)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PrintRequest {
    file_id: String,
    device_id: String,
    printer: String,
}

#[derive(Serialize)]
struct PrintResponse {
    job_id: String,
}

async fn handle_print(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PrintRequest>,
) -> Result<Json<PrintResponse>, AppError> {
    let session = state.session(&headers).await?;
    let rt = &state.runtime;

    let doc = MetadataStore::find(rt.store.as_ref(), &req.file_id)
        .await
        .map_err(internal)?
        .filter(|doc| doc.owner_id == session.owner_id())
        .ok_or_else(|| VaultError::not_found("file", &req.file_id))?;

    let devices = printing::online_devices(rt.store.as_ref(), &rt.policy, Utc::now())
        .await
        .map_err(internal)?;
    PrintTargets::new(devices).select(&req.device_id, &req.printer)?;

    let job_id = printing::send_print_job(
        rt.store.as_ref(),
        &doc.record.url,
        &req.device_id,
        &req.printer,
    )
    .await?;
    Ok(Json(PrintResponse { job_id }))
}

// ============ Chat ============

#[derive(Deserialize)]
struct UserQuery {
    email: String,
}

async fn handle_search_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<ChatUser>>, AppError> {
    let session = state.session(&headers).await?;
    let users = chat::search_users(
        state.runtime.store.as_ref(),
        &query.email,
        session.owner_id(),
    )
    .await
    .map_err(internal)?;
    Ok(Json(users))
}

async fn handle_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Conversation>>, AppError> {
    let session = state.session(&headers).await?;
    let feed = chat::conversations(state.runtime.store.as_ref(), session.owner_id())
        .await
        .map_err(internal)?;
    Ok(Json(feed.current()))
}

#[derive(Deserialize)]
struct OpenConversationRequest {
    uid: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Serialize)]
struct OpenConversationResponse {
    id: String,
}

async fn handle_open_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OpenConversationRequest>,
) -> Result<Json<OpenConversationResponse>, AppError> {
    let session = state.session(&headers).await?;
    let other = ChatUser {
        name: req.name.unwrap_or_else(|| req.uid.clone()),
        uid: req.uid,
        email: req.email,
    };
    let id = chat::get_or_create_conversation(
        state.runtime.store.as_ref(),
        &chat_user(session.identity()),
        &other,
    )
    .await?;
    Ok(Json(OpenConversationResponse { id }))
}

/// Only participants may read a conversation.
async fn ensure_participant(
    state: &AppState,
    session: &Session,
    conversation: &str,
) -> Result<(), AppError> {
    chat::participant_conversation(state.runtime.store.as_ref(), conversation, session.owner_id())
        .await?;
    Ok(())
}

async fn handle_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<UserMessage>>, AppError> {
    let session = state.session(&headers).await?;
    ensure_participant(&state, &session, &id).await?;
    let feed = chat::messages(state.runtime.store.as_ref(), &id)
        .await
        .map_err(internal)?;
    Ok(Json(feed.current()))
}

#[derive(Deserialize)]
struct SendMessageRequest {
    text: String,
}

async fn handle_send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<UserMessage>, AppError> {
    let session = state.session(&headers).await?;
    let message = chat::send_message(
        state.runtime.store.as_ref(),
        &id,
        session.owner_id(),
        &req.text,
    )
    .await?;
    Ok(Json(message))
}

// ============ POST /logout ============

async fn handle_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let identity = identity_from(&headers)?;
    let removed = state.sessions().remove(&identity.user_id);
    if let Some(entry) = removed {
        entry.sync.abort();
        entry.session.clear();
        info!(user = %identity.user_id, "session closed");
    }
    Ok(StatusCode::NO_CONTENT)
}
