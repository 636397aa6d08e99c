use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use sqlx::types::BigDecimal;

use crate::error::AppError;
use crate::handlers::account_id;
use crate::services::funding::FundingOutcome;
use crate::AppState;

#[derive(Deserialize)]
pub struct FundWalletBody {
    pub amount: BigDecimal,
}

pub async fn fund_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<FundWalletBody>,
) -> Result<impl IntoResponse, AppError> {
    let account_id = account_id(&headers)?;
    let charge = state.funding().initialize(account_id, body.amount).await?;
    Ok(Json(charge))
}

#[derive(Deserialize)]
pub struct VerifyQuery {
    pub reference: String,
}

pub async fn verify_funding(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<impl IntoResponse, AppError> {
    match state.funding().verify(&query.reference).await? {
        FundingOutcome::Applied(payment) => Ok(Json(json!({
            "status": "settled",
            "payment": payment,
        }))),
        FundingOutcome::AlreadyProcessed(payment) => Ok(Json(json!({
            "status": "already_settled",
            "payment": payment,
        }))),
    }
}
