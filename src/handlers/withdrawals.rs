use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::{account_id, require_admin};
use crate::AppState;

#[derive(Deserialize)]
pub struct InitiateBody {
    pub amount: BigDecimal,
}

pub async fn initiate_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<InitiateBody>,
) -> Result<impl IntoResponse, AppError> {
    let account_id = account_id(&headers)?;
    let withdrawal = state
        .withdrawals()
        .initiate(account_id, body.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

pub async fn approve_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(withdrawal_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&headers)?;
    let withdrawal = state.withdrawals().approve(withdrawal_id).await?;
    Ok(Json(withdrawal))
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(withdrawal_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&headers)?;
    let withdrawal = state.withdrawals().reject(withdrawal_id).await?;
    Ok(Json(withdrawal))
}

#[derive(Deserialize)]
pub struct BanksQuery {
    pub country: Option<String>,
}

pub async fn list_banks(
    State(state): State<AppState>,
    Query(query): Query<BanksQuery>,
) -> Result<impl IntoResponse, AppError> {
    let country = query.country.as_deref().unwrap_or("nigeria");
    let banks = state.withdrawals().list_banks(country).await?;
    Ok(Json(banks))
}
