pub mod orders;
pub mod payments;
pub mod webhook;
pub mod withdrawals;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::orders::Actor;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    Json(json!({
        "status": "ok",
        "dependencies": {
            "database": database,
            "gateway_circuit": state.gateway.circuit_state(),
        },
    }))
}

/// Authentication lives upstream; the proxy forwards the authenticated
/// account in `x-actor-id` and flags admins with `x-actor-role: admin`.
pub fn account_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing x-actor-id header".into()))?;
    raw.parse()
        .map_err(|_| AppError::Unauthorized("x-actor-id is not a valid id".into()))
}

pub fn actor(headers: &HeaderMap) -> Result<Actor, AppError> {
    if headers
        .get("x-actor-role")
        .and_then(|v| v.to_str().ok())
        .map(|role| role.eq_ignore_ascii_case("admin"))
        .unwrap_or(false)
    {
        return Ok(Actor::Admin);
    }
    Ok(Actor::Account(account_id(headers)?))
}

pub fn require_admin(headers: &HeaderMap) -> Result<(), AppError> {
    match actor(headers)? {
        Actor::Admin => Ok(()),
        Actor::Account(_) => Err(AppError::Unauthorized("admin role required".into())),
    }
}
