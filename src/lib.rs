pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod money;
pub mod services;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::gateway::GatewayClient;
use crate::services::funding::FundingService;
use crate::services::orders::OrderService;
use crate::services::withdrawals::WithdrawalService;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub gateway: GatewayClient,
    pub webhook_secret: String,
    pub currency: String,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, config: &Config) -> Self {
        let gateway = GatewayClient::new(
            config.gateway_base_url.clone(),
            config.gateway_secret_key.clone(),
            config.gateway_callback_url.clone(),
        );
        Self {
            db,
            gateway,
            webhook_secret: config.webhook_secret.clone(),
            currency: config.default_currency.clone(),
        }
    }

    pub fn orders(&self) -> OrderService {
        OrderService::new(self.db.clone(), self.gateway.clone(), self.currency.clone())
    }

    pub fn funding(&self) -> FundingService {
        FundingService::new(self.db.clone(), self.gateway.clone(), self.currency.clone())
    }

    pub fn withdrawals(&self) -> WithdrawalService {
        WithdrawalService::new(self.db.clone(), self.gateway.clone(), self.currency.clone())
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/orders/wallet", post(handlers::orders::create_wallet_order))
        .route("/orders/gateway", post(handlers::orders::create_gateway_order))
        .route("/orders/verify", get(handlers::orders::verify_gateway_order))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/status", patch(handlers::orders::update_order_status))
        .route("/orders/:id/complete", post(handlers::orders::complete_order))
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route("/wallet/fund", post(handlers::payments::fund_wallet))
        .route("/wallet/fund/verify", get(handlers::payments::verify_funding))
        .route("/withdrawals", post(handlers::withdrawals::initiate_withdrawal))
        .route(
            "/withdrawals/:id/approve",
            post(handlers::withdrawals::approve_withdrawal),
        )
        .route(
            "/withdrawals/:id/reject",
            post(handlers::withdrawals::reject_withdrawal),
        )
        .route("/banks", get(handlers::withdrawals::list_banks))
        .route("/webhooks/gateway", post(handlers::webhook::gateway_webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
