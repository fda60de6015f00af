// src/api.rs
use crate::{
    database::HistoryStore,
    models::{ClosedPosition, FilterState, Quota, SortSpec, Subject},
    quota::SharedQuota,
    synchronizer::{SkipReason, SyncOutcome, SyncSnapshot, Synchronizer},
};
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

pub struct ApiContext {
    pub sync: Arc<Synchronizer>,
    pub quota: SharedQuota,
    /// Set when the synchronizer reads from the local store, which then accepts writes.
    pub store: Option<HistoryStore>,
}

// The shared state for our Axum handlers
type AppState = State<Arc<ApiContext>>;

#[derive(Deserialize)]
pub struct PageRequest {
    page: usize,
}

#[derive(Deserialize)]
pub struct DetailRequest {
    expanded: bool,
}

#[derive(Deserialize)]
pub struct RecordRequest {
    account: String,
    #[serde(default = "default_context")]
    context: String,
    position: ClosedPosition,
}

fn default_context() -> String {
    "perp".to_string()
}

// GET /history
async fn get_history(State(ctx): AppState) -> Json<SyncSnapshot> {
    Json(ctx.sync.snapshot().await)
}

// POST /history/page
async fn request_page(
    State(ctx): AppState,
    Json(req): Json<PageRequest>,
) -> Result<Json<SyncOutcome>, StatusCode> {
    if req.page == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(ctx.sync.request_page(req.page).await))
}

// POST /history/more
async fn load_more(State(ctx): AppState) -> Json<SyncOutcome> {
    Json(ctx.sync.load_more().await)
}

// PUT /history/filters
async fn set_filters(State(ctx): AppState, Json(filters): Json<FilterState>) -> Json<SyncOutcome> {
    Json(resync_if(&ctx, ctx.sync.set_filters(filters).await).await)
}

// PUT /history/sort
async fn change_sort(State(ctx): AppState, Json(sort): Json<SortSpec>) -> Json<SyncOutcome> {
    Json(resync_if(&ctx, ctx.sync.change_sort(sort).await).await)
}

// DELETE /history/sort
async fn reset_sort(State(ctx): AppState) -> Json<SyncOutcome> {
    Json(resync_if(&ctx, ctx.sync.reset_sort().await).await)
}

// PUT /history/detail
async fn set_detail(State(ctx): AppState, Json(req): Json<DetailRequest>) -> StatusCode {
    ctx.sync.set_detail_view(req.expanded).await;
    StatusCode::OK
}

// POST /history/refresh
async fn refresh(State(ctx): AppState) -> Json<SyncOutcome> {
    Json(ctx.sync.refresh().await)
}

// PUT /quota
async fn set_quota(State(ctx): AppState, Json(quota): Json<Quota>) -> Json<SyncOutcome> {
    ctx.quota.set(quota);
    Json(ctx.sync.sync().await)
}

// POST /positions/history
async fn record_position(
    State(ctx): AppState,
    Json(req): Json<RecordRequest>,
) -> Result<StatusCode, StatusCode> {
    let store = ctx.store.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let subject = Subject::parse(&req.account, req.context).map_err(|_| StatusCode::BAD_REQUEST)?;
    let recorded = store.record_closed(&subject, req.position).map_err(|e| {
        warn!("[API] failed to record closed position: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(if recorded { StatusCode::CREATED } else { StatusCode::OK })
}

/// Runs the resync inline when the mutation moved the fingerprint, so the
/// response already reflects the new dataset.
async fn resync_if(ctx: &ApiContext, changed: bool) -> SyncOutcome {
    if changed {
        ctx.sync.sync().await
    } else {
        SyncOutcome::Skipped(SkipReason::UpToDate)
    }
}

pub fn router(ctx: Arc<ApiContext>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/history", get(get_history))
        .route("/history/page", post(request_page))
        .route("/history/more", post(load_more))
        .route("/history/filters", put(set_filters))
        .route("/history/sort", put(change_sort).delete(reset_sort))
        .route("/history/detail", put(set_detail))
        .route("/history/refresh", post(refresh))
        .route("/quota", put(set_quota))
        .route("/positions/history", post(record_position))
        .with_state(ctx)
        .layer(cors)
}

pub async fn run_api_server(bind_address: &str, ctx: Arc<ApiContext>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("[API Server] Listening on http://{}", bind_address);
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}
