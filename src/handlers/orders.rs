use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::models::{OrderPaymentStatus, OrderStatus};
use crate::error::AppError;
use crate::handlers::{account_id, actor};
use crate::services::orders::{Confirmation, NewGatewayOrder, NewWalletOrder};
use crate::AppState;

pub async fn create_wallet_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NewWalletOrder>,
) -> Result<impl IntoResponse, AppError> {
    let buyer_id = account_id(&headers)?;
    let order = state.orders().create_with_wallet(buyer_id, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn create_gateway_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NewGatewayOrder>,
) -> Result<impl IntoResponse, AppError> {
    let buyer_id = account_id(&headers)?;
    let charge = state
        .orders()
        .initialize_with_gateway(buyer_id, request)
        .await?;
    Ok(Json(charge))
}

#[derive(Deserialize)]
pub struct VerifyQuery {
    pub reference: String,
}

pub async fn verify_gateway_order(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<impl IntoResponse, AppError> {
    match state
        .orders()
        .confirm_gateway_payment(&query.reference)
        .await?
    {
        Confirmation::Applied(order) => Ok(Json(json!({
            "status": "settled",
            "order": order,
        }))),
        Confirmation::AlreadyProcessed => Ok(Json(json!({
            "status": "already_settled",
        }))),
    }
}

#[derive(Deserialize)]
pub struct OrderListQuery {
    pub role: Option<String>,
    pub payment_status: Option<OrderPaymentStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = account_id(&headers)?;
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);
    let service = state.orders();
    let orders = match query.role.as_deref() {
        Some("vendor") => {
            service
                .list_for_vendor(viewer, query.payment_status, limit, offset)
                .await?
        }
        Some("buyer") | None => {
            service
                .list_for_buyer(viewer, query.payment_status, limit, offset)
                .await?
        }
        Some(other) => {
            return Err(AppError::Validation(format!(
                "unknown role {other:?}, expected buyer or vendor"
            )))
        }
    };
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = actor(&headers)?;
    let order = state.orders().get(order_id).await?;
    if !viewer_may_see(&viewer, order.buyer_id, order.vendor_id) {
        return Err(AppError::Unauthorized(
            "only the order's buyer or vendor may view it".into(),
        ));
    }
    Ok(Json(order))
}

#[derive(Deserialize)]
pub struct UpdateStatusBody {
    pub status: OrderStatus,
    pub expected_delivery_date: Option<DateTime<Utc>>,
}

pub async fn update_order_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<impl IntoResponse, AppError> {
    let vendor_id = account_id(&headers)?;
    let order = state
        .orders()
        .update_status(order_id, vendor_id, body.status, body.expected_delivery_date)
        .await?;
    Ok(Json(order))
}

pub async fn complete_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let who = actor(&headers)?;
    let order = state.orders().complete_settlement(order_id, who).await?;
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let who = actor(&headers)?;
    let order = state.orders().cancel(order_id, who).await?;
    Ok(Json(order))
}

fn viewer_may_see(viewer: &crate::services::orders::Actor, buyer_id: Uuid, vendor_id: Uuid) -> bool {
    use crate::services::orders::Actor;
    match viewer {
        Actor::Admin => true,
        Actor::Account(id) => *id == buyer_id || *id == vendor_id,
    }
}
