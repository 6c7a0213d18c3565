// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Everything lives under `/api/v1/` except the two WebSocket endpoints.
// Health is public; all other routes require a valid Bearer access token.
// Review and broadcast endpoints additionally require an admin role.
//
// Successful mutations return the authoritative post-state (new balance,
// new position status) so clients need not re-query. Errors render as
// HTTP status + `{"error": "..."}` via the AppError IntoResponse.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthUser;
use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::model::ReviewStatus;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Orders ──────────────────────────────────────────────────
        .route("/api/v1/orders", post(create_order).get(list_orders))
        .route("/api/v1/orders/:order_id", get(order_detail))
        .route("/api/v1/orders/:order_id/settle", post(settle_order))
        // ── Deposits ────────────────────────────────────────────────
        .route("/api/v1/deposits", post(submit_deposit).get(list_deposits))
        .route("/api/v1/deposits/:id/review", post(review_deposit))
        // ── Withdrawals ─────────────────────────────────────────────
        .route("/api/v1/withdraws", post(submit_withdraw).get(list_withdraws))
        .route("/api/v1/withdraws/:id/review", post(review_withdraw))
        .route("/api/v1/withdraws/:id/paid", post(mark_withdraw_paid))
        // ── Supplements ─────────────────────────────────────────────
        .route(
            "/api/v1/supplements",
            post(submit_supplement).get(list_supplements),
        )
        // ── Notifications ───────────────────────────────────────────
        .route("/api/v1/notifications", get(list_notifications))
        .route("/api/v1/notifications/unread", get(unread_notifications))
        .route("/api/v1/notifications/count", get(unread_count))
        .route("/api/v1/notifications/read", post(mark_read))
        .route("/api/v1/notifications/read-all", post(mark_all_read))
        // ── Risk / admin ────────────────────────────────────────────
        .route("/api/v1/risk/statistics", get(risk_statistics))
        .route("/api/v1/announcements", post(post_announcement))
        // ── WebSocket ───────────────────────────────────────────────
        .route("/ws/quotes", get(crate::api::ws::quotes_ws_handler))
        .route(
            "/ws/notifications",
            get(crate::api::ws::notifications_ws_handler),
        )
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let latest = state.quote_hub.latest_price();
    Json(serde_json::json!({
        "status": "ok",
        "upstream_alive": state.quote_hub.is_upstream_alive(),
        "price_valid": latest.valid,
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Deserialize)]
struct CreateOrderRequest {
    side: String,
    locked_price: f64,
    weight_g: f64,
    deposit: f64,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateOrderRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let position = state
        .trade
        .create_position(
            auth.user_id,
            &req.side,
            req.locked_price,
            req.weight_g,
            req.deposit,
        )
        .await?;
    let user = state
        .store
        .find_user(auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    Ok(Json(serde_json::json!({
        "position": position,
        "available_deposit": user.available_deposit,
        "used_deposit": user.used_deposit,
    })))
}

#[derive(Deserialize)]
struct ListOrdersQuery {
    status: Option<String>,
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListOrdersQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let positions = state
        .trade
        .list_positions(auth.user_id, query.status.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "orders": positions })))
}

async fn order_detail(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(order_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let position = state.trade.position_detail(auth.user_id, &order_id).await?;
    Ok(Json(serde_json::json!({ "position": position })))
}

#[derive(Deserialize)]
struct SettleRequest {
    pay_password: String,
}

async fn settle_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(order_id): Path<String>,
    Json(req): Json<SettleRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let (position, snapshot) = state
        .trade
        .settle(auth.user_id, &order_id, &req.pay_password)
        .await?;
    Ok(Json(serde_json::json!({
        "position": position,
        "available_deposit": snapshot.available,
        "used_deposit": snapshot.used,
    })))
}

// =============================================================================
// Deposits
// =============================================================================

#[derive(Deserialize)]
struct SubmitDepositRequest {
    amount: f64,
    #[serde(default)]
    method: String,
    #[serde(default)]
    voucher_url: String,
    #[serde(default)]
    note: String,
}

async fn submit_deposit(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<SubmitDepositRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let request = state
        .deposits
        .submit(auth.user_id, req.amount, &req.method, &req.voucher_url, &req.note)
        .await?;
    Ok(Json(serde_json::json!({ "deposit": request })))
}

#[derive(Deserialize)]
struct ListByStatusQuery {
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

fn parse_review_status(s: &str) -> AppResult<ReviewStatus> {
    ReviewStatus::parse(s).ok_or_else(|| AppError::BadInput(format!("unknown status: {s}")))
}

async fn list_deposits(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListByStatusQuery>,
) -> AppResult<Json<serde_json::Value>> {
    // Admins may filter the whole book by status; customers see their own.
    let deposits = match &query.status {
        Some(status) => {
            auth.require_admin()?;
            state
                .deposits
                .list_by_status(parse_review_status(status)?, query.limit)
                .await?
        }
        None => {
            state
                .deposits
                .list_for_user(auth.user_id, query.limit, query.offset)
                .await?
        }
    };
    Ok(Json(serde_json::json!({ "deposits": deposits })))
}

#[derive(Deserialize)]
struct ReviewRequest {
    /// "approve" or "reject".
    action: String,
    #[serde(default)]
    note: String,
    #[serde(default)]
    receipt_voucher_url: String,
}

async fn review_deposit(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ReviewRequest>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let request = match req.action.as_str() {
        "approve" => {
            state
                .deposits
                .approve(id, auth.user_id, &req.note, &req.receipt_voucher_url)
                .await?
        }
        "reject" => state.deposits.reject(id, auth.user_id, &req.note).await?,
        other => return Err(AppError::BadInput(format!("unknown action: {other}"))),
    };
    Ok(Json(serde_json::json!({ "deposit": request })))
}

// =============================================================================
// Withdrawals
// =============================================================================

#[derive(Deserialize)]
struct SubmitWithdrawRequest {
    amount: f64,
    #[serde(default)]
    method: String,
    #[serde(default)]
    note: String,
}

async fn submit_withdraw(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<SubmitWithdrawRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let request = state
        .withdraws
        .submit(auth.user_id, req.amount, &req.method, &req.note)
        .await?;
    Ok(Json(serde_json::json!({ "withdraw": request })))
}

async fn list_withdraws(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListByStatusQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let withdraws = match &query.status {
        Some(status) => {
            auth.require_admin()?;
            state
                .withdraws
                .list_by_status(parse_review_status(status)?, query.limit)
                .await?
        }
        None => {
            state
                .withdraws
                .list_for_user(auth.user_id, query.limit, query.offset)
                .await?
        }
    };
    Ok(Json(serde_json::json!({ "withdraws": withdraws })))
}

async fn review_withdraw(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ReviewRequest>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let request = match req.action.as_str() {
        "approve" => state.withdraws.approve(id, auth.user_id, &req.note).await?,
        "reject" => state.withdraws.reject(id, auth.user_id, &req.note).await?,
        other => return Err(AppError::BadInput(format!("unknown action: {other}"))),
    };
    Ok(Json(serde_json::json!({ "withdraw": request })))
}

#[derive(Deserialize)]
struct MarkPaidRequest {
    voucher_url: String,
}

async fn mark_withdraw_paid(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<MarkPaidRequest>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    let request = state.withdraws.mark_paid(id, &req.voucher_url).await?;
    Ok(Json(serde_json::json!({ "withdraw": request })))
}

// =============================================================================
// Supplements
// =============================================================================

#[derive(Deserialize)]
struct SubmitSupplementRequest {
    position_id: i64,
    amount: f64,
}

async fn submit_supplement(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<SubmitSupplementRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let (position, snapshot) = state
        .supplements
        .submit(auth.user_id, req.position_id, req.amount)
        .await?;
    Ok(Json(serde_json::json!({
        "position": position,
        "available_deposit": snapshot.available,
        "used_deposit": snapshot.used,
    })))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

async fn list_supplements(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let supplements = state
        .supplements
        .list_for_user(auth.user_id, query.limit, query.offset)
        .await?;
    Ok(Json(serde_json::json!({ "supplements": supplements })))
}

// =============================================================================
// Notifications
// =============================================================================

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let notifications = state
        .notifier
        .list(auth.user_id, query.limit, query.offset)
        .await?;
    Ok(Json(serde_json::json!({ "notifications": notifications })))
}

async fn unread_notifications(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let notifications = state.notifier.unread(auth.user_id).await?;
    Ok(Json(serde_json::json!({ "notifications": notifications })))
}

async fn unread_count(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let count = state.notifier.unread_count(auth.user_id).await?;
    Ok(Json(serde_json::json!({ "count": count })))
}

#[derive(Deserialize)]
struct MarkReadRequest {
    ids: Vec<i64>,
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<MarkReadRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let updated = state.notifier.mark_as_read(auth.user_id, &req.ids).await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let updated = state.notifier.mark_all_as_read(auth.user_id).await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

// =============================================================================
// Risk statistics & announcements (admin)
// =============================================================================

#[derive(Deserialize)]
struct RiskStatisticsQuery {
    current_price: Option<f64>,
}

async fn risk_statistics(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<RiskStatisticsQuery>,
) -> AppResult<Json<crate::risk::RiskStatistics>> {
    auth.require_admin()?;
    let price = match query.current_price {
        Some(p) if p > 0.0 => p,
        Some(_) => return Err(AppError::BadInput("current_price must be positive".into())),
        None => {
            let latest = state.quote_hub.latest_price();
            if !latest.valid {
                return Err(AppError::UpstreamUnavailable(
                    "market price unavailable, pass current_price explicitly".into(),
                ));
            }
            latest.price
        }
    };
    let stats = state.risk.statistics(price).await?;
    Ok(Json(stats))
}

#[derive(Deserialize)]
struct AnnouncementRequest {
    title: String,
    content: String,
}

async fn post_announcement(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<AnnouncementRequest>,
) -> AppResult<Json<serde_json::Value>> {
    auth.require_admin()?;
    if req.title.is_empty() {
        return Err(AppError::BadInput("title must not be empty".into()));
    }
    let announcement = state.notifier.send_announcement(&req.title, &req.content).await?;
    info!(admin = auth.user_id, title = %req.title, "announcement broadcast");
    Ok(Json(serde_json::json!({ "announcement": announcement })))
}
