//! Axum HTTP server for the pipeline API.
//!
//! Serves leads, tasks, quotes, identity and AI routes under `/api`, backed
//! by a local store. Bodies use external (snake_case) field names.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router, middleware};
use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::ai::{GenerativeModel, fallback_value, gemini::run_action};
use crate::db::{
    EntityRepository, Identity, Lead, LeadRepository, Quote, QuoteRepository, Record, Repositories,
    Task, TaskRepository,
};
use crate::transcode::{decode, encode, to_external};
use crate::web::auth::{AuthState, auth_middleware};
use crate::web::types::*;

/// Shared state for all API handlers.
pub struct ApiState {
    pub repos: Repositories,
    /// Model behind `POST /api/ai`. `None` answers 503.
    pub generator: Option<Arc<dyn GenerativeModel>>,
    /// Identity reported by `/api/auth/me` and stamped on created rows.
    pub identity: Identity,
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
    pub startup_time: Instant,
}

impl ApiState {
    pub fn new(
        repos: Repositories,
        generator: Option<Arc<dyn GenerativeModel>>,
        identity: Identity,
    ) -> Self {
        Self {
            repos,
            generator,
            identity,
            shutdown_tx: tokio::sync::RwLock::new(None),
            startup_time: Instant::now(),
        }
    }
}

pub fn router(state: Arc<ApiState>, auth_token: SecretString) -> Router {
    let public = Router::new().route("/api/health", get(health_handler));

    let auth_state = AuthState { token: auth_token };
    let protected = Router::new()
        .route("/api/auth/me", get(me_handler))
        // Leads
        .route("/api/leads", get(leads_list_handler).post(leads_create_handler))
        .route(
            "/api/leads/{id}",
            get(leads_get_handler)
                .put(leads_update_handler)
                .delete(leads_delete_handler),
        )
        .route("/api/leads/{id}/status", patch(leads_status_handler))
        // Tasks
        .route("/api/tasks", get(tasks_list_handler).post(tasks_create_handler))
        .route(
            "/api/tasks/{id}",
            get(tasks_get_handler)
                .put(tasks_update_handler)
                .delete(tasks_delete_handler),
        )
        .route("/api/tasks/{id}/toggle", patch(tasks_toggle_handler))
        // Quotes
        .route(
            "/api/quotes",
            get(quotes_list_handler).post(quotes_create_handler),
        )
        .route("/api/quotes/lead/{lead_id}", get(quotes_by_lead_handler))
        .route(
            "/api/quotes/{id}",
            get(quotes_get_handler)
                .put(quotes_update_handler)
                .delete(quotes_delete_handler),
        )
        // AI
        .route("/api/ai", post(ai_handler))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the API server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<ApiState>,
    auth_token: SecretString,
) -> Result<SocketAddr, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    let app = router(Arc::clone(&state), auth_token);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("API server shutting down");
            })
            .await
        {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!(addr = %bound_addr, "API server listening");
    Ok(bound_addr)
}

/// Ask a running server to stop.
pub async fn shutdown(state: &ApiState) {
    if let Some(tx) = state.shutdown_tx.write().await.take() {
        let _ = tx.send(());
    }
}

// --- Helpers ---

fn encode_json<T: Serialize>(value: &T) -> ApiResult<Json<Value>> {
    encode(value).map(Json).map_err(|e| {
        tracing::error!(error = %e, "Failed to encode response");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode response")
    })
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    let raw: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("body is not valid JSON: {e}")))?;
    decode(raw).map_err(|e| ApiError::bad_request(format!("invalid payload: {e}")))
}

async fn list_records<E, R>(repo: &R) -> ApiResult<Json<Value>>
where
    E: Record,
    R: EntityRepository<E> + ?Sized,
{
    let rows = repo.get_all().await?;
    encode_json(&rows)
}

async fn get_record<E, R>(repo: &R, id: &str) -> ApiResult<Json<Value>>
where
    E: Record,
    R: EntityRepository<E> + ?Sized,
{
    let row = repo.get_one(id).await?;
    encode_json(&row)
}

async fn create_record<E, R>(repo: &R, body: &Bytes) -> ApiResult<(StatusCode, Json<Value>)>
where
    E: Record,
    R: EntityRepository<E> + ?Sized,
{
    let input: E::Create = parse_body(body)?;
    let row = repo.create(input).await?;
    tracing::info!(kind = E::KIND, id = %row.id(), "Created");
    Ok((StatusCode::CREATED, encode_json(&row)?))
}

async fn update_record<E, R>(repo: &R, id: &str, body: &Bytes) -> ApiResult<Json<Value>>
where
    E: Record,
    R: EntityRepository<E> + ?Sized,
{
    let patch: E::Patch = parse_body(body)?;
    let row = repo.update(id, patch).await?;
    encode_json(&row)
}

/// Absent ids answer 404 here even though the repository delete is
/// idempotent.
async fn delete_record<E, R>(repo: &R, id: &str, label: &str) -> ApiResult<Json<MessageResponse>>
where
    E: Record,
    R: EntityRepository<E> + ?Sized,
{
    repo.get_one(id).await?;
    repo.delete(id).await?;
    tracing::info!(kind = E::KIND, id = %id, "Deleted");
    Ok(Json(MessageResponse {
        message: format!("{label} deleted"),
    }))
}

// --- Handlers ---

async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.startup_time.elapsed().as_secs(),
    })
}

async fn me_handler(State(state): State<Arc<ApiState>>) -> Json<Identity> {
    Json(state.identity.clone())
}

async fn leads_list_handler(State(state): State<Arc<ApiState>>) -> ApiResult<Json<Value>> {
    list_records::<Lead, _>(&*state.repos.leads).await
}

async fn leads_get_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    get_record::<Lead, _>(&*state.repos.leads, &id).await
}

async fn leads_create_handler(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    create_record::<Lead, _>(&*state.repos.leads, &body).await
}

async fn leads_update_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    update_record::<Lead, _>(&*state.repos.leads, &id, &body).await
}

async fn leads_status_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let request: StatusRequest = parse_body(&body)?;
    let lead = state.repos.leads.update_status(&id, request.status).await?;
    encode_json(&lead)
}

async fn leads_delete_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    delete_record::<Lead, _>(&*state.repos.leads, &id, "Lead").await
}

async fn tasks_list_handler(State(state): State<Arc<ApiState>>) -> ApiResult<Json<Value>> {
    list_records::<Task, _>(&*state.repos.tasks).await
}

async fn tasks_get_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    get_record::<Task, _>(&*state.repos.tasks, &id).await
}

async fn tasks_create_handler(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    create_record::<Task, _>(&*state.repos.tasks, &body).await
}

async fn tasks_update_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    update_record::<Task, _>(&*state.repos.tasks, &id, &body).await
}

async fn tasks_toggle_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let task = state.repos.tasks.toggle(&id).await?;
    encode_json(&task)
}

async fn tasks_delete_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    delete_record::<Task, _>(&*state.repos.tasks, &id, "Task").await
}

async fn quotes_list_handler(State(state): State<Arc<ApiState>>) -> ApiResult<Json<Value>> {
    list_records::<Quote, _>(&*state.repos.quotes).await
}

async fn quotes_by_lead_handler(
    State(state): State<Arc<ApiState>>,
    Path(lead_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let quotes = state.repos.quotes.list_for_lead(&lead_id).await?;
    encode_json(&quotes)
}

async fn quotes_get_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    get_record::<Quote, _>(&*state.repos.quotes, &id).await
}

async fn quotes_create_handler(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    create_record::<Quote, _>(&*state.repos.quotes, &body).await
}

async fn quotes_update_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    update_record::<Quote, _>(&*state.repos.quotes, &id, &body).await
}

async fn quotes_delete_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    delete_record::<Quote, _>(&*state.repos.quotes, &id, "Quote").await
}

async fn ai_handler(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: AiRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid AI request: {e}")))?;
    let fallback = to_external(fallback_value(request.action));
    let lead: Lead = decode(request.lead)
        .map_err(|e| ApiError::bad_request(format!("invalid lead: {e}")))?;

    let Some(generator) = state.generator.as_ref() else {
        return Err(
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "AI service not configured")
                .with_fallback(fallback),
        );
    };

    match run_action(generator.as_ref(), request.action, &lead).await {
        Ok(result) => Ok(Json(to_external(result))),
        Err(e) => {
            tracing::warn!(action = request.action.as_str(), lead_id = %lead.id, error = %e, "AI action failed");
            Err(
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                    .with_fallback(fallback),
            )
        }
    }
}
