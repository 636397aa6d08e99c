use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;

use crate::error::AppError;
use crate::gateway::ChargeIntent;
use crate::money;
use crate::services::funding::FundingOutcome;
use crate::services::orders::Confirmation;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Gateway event envelope. Adjacent tagging matches the wire shape
/// `{"event": "...", "data": {...}}`; events we do not handle fall into
/// `Unknown` and are acknowledged without action.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum GatewayEvent {
    #[serde(rename = "charge.success")]
    ChargeSuccess(ChargeEventData),
    #[serde(rename = "transfer.success")]
    TransferSuccess(TransferEventData),
    #[serde(rename = "transfer.failed")]
    TransferFailed(TransferEventData),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct ChargeEventData {
    pub reference: String,
    /// Charged amount in minor units.
    pub amount: i64,
    pub channel: Option<String>,
    pub id: Option<i64>,
    pub metadata: Option<ChargeIntent>,
}

#[derive(Debug, Deserialize)]
pub struct TransferEventData {
    pub reference: String,
}

/// Webhook entry point. The HMAC signature over the raw body is the only
/// authentication; once it checks out, every recognized event is acknowledged
/// with 200 even when applying it fails, because the gateway retries on
/// anything else and every apply path is idempotent.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("missing webhook signature".into()))?;
    if !verify_signature(&state.webhook_secret, &body, signature) {
        return Err(AppError::Validation("invalid webhook signature".into()));
    }

    let event: GatewayEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("malformed webhook payload: {e}")))?;

    match event {
        GatewayEvent::ChargeSuccess(data) => handle_charge_success(&state, data).await?,
        GatewayEvent::TransferSuccess(data) => {
            match state
                .withdrawals()
                .handle_transfer_success(&data.reference)
                .await
            {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::info!("transfer.success for {} was a no-op", data.reference)
                }
                Err(e) if should_redeliver(&e) => return Err(e),
                Err(e) => tracing::error!("transfer.success for {} failed: {e}", data.reference),
            }
        }
        GatewayEvent::TransferFailed(data) => {
            match state
                .withdrawals()
                .handle_transfer_failure(&data.reference)
                .await
            {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::info!("transfer.failed for {} was a no-op", data.reference)
                }
                Err(e) if should_redeliver(&e) => return Err(e),
                Err(e) => tracing::error!("transfer.failed for {} failed: {e}", data.reference),
            }
        }
        GatewayEvent::Unknown => {
            tracing::debug!("ignoring unhandled gateway event");
        }
    }

    Ok(StatusCode::OK)
}

/// Business outcomes (duplicates, bad intents, missing entities) are final:
/// redelivery can never change them, so they are logged and acked. A storage
/// failure means the event was not applied at all; surfacing a 5xx makes the
/// gateway redeliver, and the idempotent apply paths absorb the retry.
fn should_redeliver(e: &AppError) -> bool {
    matches!(e, AppError::Database(_) | AppError::Internal(_))
}

async fn handle_charge_success(state: &AppState, data: ChargeEventData) -> Result<(), AppError> {
    match data.metadata {
        Some(ChargeIntent::Order(intent)) => {
            let expected = money::to_minor_units(&intent.charge_amount()).ok();
            if expected != Some(data.amount) {
                tracing::error!(
                    "charge.success {}: charged amount {} does not match order intent",
                    data.reference,
                    data.amount
                );
                return Ok(());
            }
            match state
                .orders()
                .apply_gateway_order(intent, &data.reference)
                .await
            {
                Ok(Confirmation::Applied(order)) => {
                    tracing::info!("charge.success {} settled order {}", data.reference, order.id)
                }
                Ok(Confirmation::AlreadyProcessed) => {
                    tracing::info!("charge.success {} already settled", data.reference)
                }
                Err(e) if should_redeliver(&e) => return Err(e),
                Err(e) => tracing::error!("charge.success {} failed: {e}", data.reference),
            }
        }
        Some(ChargeIntent::Funding { account_id, amount }) => {
            match money::to_minor_units(&amount) {
                Ok(expected) if expected == data.amount => {}
                _ => {
                    tracing::error!(
                        "charge.success {}: charged amount {} does not match the funding intent",
                        data.reference,
                        data.amount
                    );
                    return Ok(());
                }
            }
            let external_id = data.id.map(|id| id.to_string());
            match state
                .funding()
                .apply_from_intent(
                    &data.reference,
                    account_id,
                    &amount,
                    data.channel.as_deref(),
                    external_id.as_deref(),
                )
                .await
            {
                Ok(FundingOutcome::Applied(payment)) => tracing::info!(
                    "charge.success {} funded account {}",
                    data.reference,
                    payment.account_id
                ),
                Ok(FundingOutcome::AlreadyProcessed(_)) => {
                    tracing::info!("charge.success {} already applied", data.reference)
                }
                Err(e) if should_redeliver(&e) => return Err(e),
                Err(e) => tracing::error!("charge.success {} failed: {e}", data.reference),
            }
        }
        None => {
            tracing::warn!(
                "charge.success {} carried no recognizable intent metadata",
                data.reference
            );
        }
    }
    Ok(())
}

fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = match Hmac::<Sha512>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
