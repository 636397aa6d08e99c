// End-to-end settlement flows against a real Postgres. Run with a database:
//   DATABASE_URL=postgres://... cargo test -- --ignored

use std::path::Path;
use std::str::FromStr;

use sqlx::migrate::Migrator;
use sqlx::types::BigDecimal;
use sqlx::PgPool;
use uuid::Uuid;

use oja_core::db::models::{
    DeliveryAddress, EntryStatus, FundingStatus, OrderStatus, WithdrawalStatus,
};
use oja_core::error::AppError;
use oja_core::gateway::{GatewayClient, OrderIntent};
use oja_core::services::funding::{FundingOutcome, FundingService};
use oja_core::services::orders::{Actor, Confirmation, NewWalletOrder, OrderService};
use oja_core::services::withdrawals::WithdrawalService;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    let pool = PgPool::connect(&url).await.unwrap();
    let migrator = Migrator::new(Path::join(
        Path::new(env!("CARGO_MANIFEST_DIR")),
        "migrations",
    ))
    .await
    .unwrap();
    migrator.run(&pool).await.unwrap();
    pool
}

fn offline_gateway() -> GatewayClient {
    // Wallet and webhook-applied flows never call out, so any URL works.
    GatewayClient::new(
        "https://api.gateway.example".to_string(),
        "sk_test".to_string(),
        "https://app.example/callback".to_string(),
    )
}

fn orders(pool: &PgPool) -> OrderService {
    OrderService::new(pool.clone(), offline_gateway(), "NGN".to_string())
}

fn withdrawals(pool: &PgPool) -> WithdrawalService {
    WithdrawalService::new(pool.clone(), offline_gateway(), "NGN".to_string())
}

fn funding(pool: &PgPool) -> FundingService {
    FundingService::new(pool.clone(), offline_gateway(), "NGN".to_string())
}

async fn seed_pending_payment(pool: &PgPool, account_id: Uuid, amount: &str) -> String {
    let reference = format!("fund_{}", Uuid::new_v4().simple());
    sqlx::query(
        "INSERT INTO payments (id, account_id, amount, currency, reference) VALUES ($1, $2, $3, 'NGN', $4)",
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(dec(amount))
    .bind(&reference)
    .execute(pool)
    .await
    .unwrap();
    reference
}

async fn journal_entry_status(pool: &PgPool, reference: &str) -> EntryStatus {
    let row: (EntryStatus,) =
        sqlx::query_as("SELECT status FROM ledger_entries WHERE reference = $1")
            .bind(reference)
            .fetch_one(pool)
            .await
            .unwrap();
    row.0
}

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

async fn seed_account(pool: &PgPool, available: &str, with_bank: bool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO accounts (id, email, first_name, last_name, available, bank_code, bank_account_number)
        VALUES ($1, $2, 'Test', 'Account', $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(format!("{}@test.example", id.simple()))
    .bind(dec(available))
    .bind(with_bank.then(|| "058".to_string()))
    .bind(with_bank.then(|| "0123456789".to_string()))
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn seed_product(pool: &PgPool, vendor_id: Uuid, price: &str, commission_percent: &str) -> Uuid {
    let category_id = Uuid::new_v4();
    sqlx::query("INSERT INTO categories (id, name, commission_percent) VALUES ($1, $2, $3)")
        .bind(category_id)
        .bind(format!("category-{}", category_id.simple()))
        .bind(dec(commission_percent))
        .execute(pool)
        .await
        .unwrap();
    let product_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO products (id, vendor_id, category_id, name, price) VALUES ($1, $2, $3, 'Widget', $4)",
    )
    .bind(product_id)
    .bind(vendor_id)
    .bind(category_id)
    .bind(dec(price))
    .execute(pool)
    .await
    .unwrap();
    product_id
}

async fn balances(pool: &PgPool, account_id: Uuid) -> (BigDecimal, BigDecimal) {
    sqlx::query_as("SELECT available, pending_escrow FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn address() -> DeliveryAddress {
    DeliveryAddress {
        name: "A Buyer".to_string(),
        address: "12 Main St".to_string(),
        phone_number: "08010000000".to_string(),
        city: "Ikeja".to_string(),
        state: "Lagos".to_string(),
    }
}

fn wallet_order(vendor_id: Uuid, product_id: Uuid) -> NewWalletOrder {
    NewWalletOrder {
        vendor_id,
        product_id,
        quantity: 2,
        unit_price: dec("100"),
        delivery_address: address(),
    }
}

#[tokio::test]
#[ignore]
async fn wallet_order_settles_and_releases_on_completion() {
    let pool = test_pool().await;
    let buyer = seed_account(&pool, "1000", false).await;
    let vendor = seed_account(&pool, "0", false).await;
    let product = seed_product(&pool, vendor, "100", "10").await;
    let service = orders(&pool);

    // total 200, commission 20, vendor share 180
    let order = service
        .create_with_wallet(buyer, wallet_order(vendor, product))
        .await
        .unwrap();
    assert_eq!(order.total_amount, dec("200.00"));
    assert_eq!(order.commission_amount, dec("20.00"));
    assert_eq!(balances(&pool, buyer).await.0, dec("800.00"));
    assert_eq!(balances(&pool, vendor).await, (dec("0.00"), dec("180.00")));

    service
        .update_status(order.id, vendor, OrderStatus::Shipped, None)
        .await
        .unwrap();
    service
        .update_status(order.id, vendor, OrderStatus::Delivered, None)
        .await
        .unwrap();
    service
        .complete_settlement(order.id, Actor::Account(buyer))
        .await
        .unwrap();
    assert_eq!(balances(&pool, vendor).await, (dec("180.00"), dec("0.00")));

    let purchases: (i32,) = sqlx::query_as("SELECT purchases FROM products WHERE id = $1")
        .bind(product)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(purchases.0, 2);

    // A second confirmation moves nothing.
    let second = service
        .complete_settlement(order.id, Actor::Account(buyer))
        .await;
    assert!(matches!(second, Err(AppError::InvalidState(_))));
    assert_eq!(balances(&pool, vendor).await, (dec("180.00"), dec("0.00")));
}

#[tokio::test]
#[ignore]
async fn wallet_order_with_insufficient_funds_moves_nothing() {
    let pool = test_pool().await;
    let buyer = seed_account(&pool, "50", false).await;
    let vendor = seed_account(&pool, "0", false).await;
    let product = seed_product(&pool, vendor, "100", "10").await;

    let result = orders(&pool)
        .create_with_wallet(buyer, wallet_order(vendor, product))
        .await;
    assert!(matches!(result, Err(AppError::InsufficientFunds)));

    assert_eq!(balances(&pool, buyer).await.0, dec("50.00"));
    assert_eq!(balances(&pool, vendor).await.1, dec("0.00"));
    let count: (i64,) = sqlx::query_as("SELECT count(*) FROM orders WHERE buyer_id = $1")
        .bind(buyer)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 0);
}

#[tokio::test]
#[ignore]
async fn duplicate_gateway_confirmations_settle_once() {
    let pool = test_pool().await;
    let buyer = seed_account(&pool, "0", false).await;
    let vendor = seed_account(&pool, "0", false).await;
    let product = seed_product(&pool, vendor, "100", "10").await;
    let service = orders(&pool);

    let intent = OrderIntent {
        buyer_id: buyer,
        vendor_id: vendor,
        product_id: product,
        quantity: 2,
        unit_price: dec("100"),
        total_amount: dec("200"),
        commission_amount: dec("20"),
        delivery_fee: dec("50"),
        delivery_address: address(),
    };
    let reference = format!("order_{}", Uuid::new_v4().simple());

    let first = service
        .apply_gateway_order(intent.clone(), &reference)
        .await
        .unwrap();
    assert!(matches!(first, Confirmation::Applied(_)));
    // vendor share: 200 - 20 + 50
    assert_eq!(balances(&pool, vendor).await.1, dec("230.00"));

    let second = service.apply_gateway_order(intent, &reference).await.unwrap();
    assert!(matches!(second, Confirmation::AlreadyProcessed));
    assert_eq!(balances(&pool, vendor).await.1, dec("230.00"));

    let count: (i64,) = sqlx::query_as("SELECT count(*) FROM orders WHERE reference = $1")
        .bind(&reference)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1);
}

#[tokio::test]
#[ignore]
async fn cancelled_order_refunds_the_buyer() {
    let pool = test_pool().await;
    let buyer = seed_account(&pool, "1000", false).await;
    let vendor = seed_account(&pool, "0", false).await;
    let product = seed_product(&pool, vendor, "100", "10").await;
    let service = orders(&pool);

    let order = service
        .create_with_wallet(buyer, wallet_order(vendor, product))
        .await
        .unwrap();
    assert_eq!(balances(&pool, buyer).await.0, dec("800.00"));

    service.cancel(order.id, Actor::Account(buyer)).await.unwrap();
    // The escrowed vendor share comes back; the platform commission does not.
    assert_eq!(balances(&pool, buyer).await.0, dec("980.00"));
    assert_eq!(balances(&pool, vendor).await.1, dec("0.00"));

    // Cancelled orders cannot be completed or re-cancelled.
    let complete = service
        .complete_settlement(order.id, Actor::Account(buyer))
        .await;
    assert!(matches!(complete, Err(AppError::InvalidState(_))));
    let again = service.cancel(order.id, Actor::Account(buyer)).await;
    assert!(matches!(again, Err(AppError::InvalidState(_))));
}

#[tokio::test]
#[ignore]
async fn rejected_withdrawal_refunds_the_balance() {
    let pool = test_pool().await;
    let account = seed_account(&pool, "500", true).await;
    let service = withdrawals(&pool);

    let withdrawal = service.initiate(account, dec("200")).await.unwrap();
    assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
    assert_eq!(balances(&pool, account).await.0, dec("300.00"));

    let rejected = service.reject(withdrawal.id).await.unwrap();
    assert_eq!(rejected.status, WithdrawalStatus::Rejected);
    assert_eq!(balances(&pool, account).await.0, dec("500.00"));

    let again = service.reject(withdrawal.id).await;
    assert!(matches!(again, Err(AppError::InvalidState(_))));
    assert_eq!(balances(&pool, account).await.0, dec("500.00"));
}

#[tokio::test]
#[ignore]
async fn failed_transfer_webhook_refunds_the_balance() {
    let pool = test_pool().await;
    let account = seed_account(&pool, "500", true).await;
    let service = withdrawals(&pool);

    let withdrawal = service.initiate(account, dec("200")).await.unwrap();
    assert_eq!(balances(&pool, account).await.0, dec("300.00"));

    let finalized = service
        .handle_transfer_failure(&withdrawal.reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finalized.status, WithdrawalStatus::Failed);
    assert_eq!(balances(&pool, account).await.0, dec("500.00"));

    // Replayed webhook is a no-op.
    let replay = service
        .handle_transfer_failure(&withdrawal.reference)
        .await
        .unwrap();
    assert!(replay.is_none());
    assert_eq!(balances(&pool, account).await.0, dec("500.00"));
}

#[tokio::test]
#[ignore]
async fn funding_webhook_credits_the_wallet_once() {
    let pool = test_pool().await;
    let account = seed_account(&pool, "100", false).await;
    let reference = seed_pending_payment(&pool, account, "250").await;
    let service = funding(&pool);

    let first = service
        .apply(&reference, Some("card"), Some("991"))
        .await
        .unwrap();
    let payment = match first {
        FundingOutcome::Applied(payment) => payment,
        other => panic!("expected Applied, got {other:?}"),
    };
    assert_eq!(payment.status, FundingStatus::Success);
    assert_eq!(payment.channel.as_deref(), Some("card"));
    assert_eq!(balances(&pool, account).await.0, dec("350.00"));
    assert_eq!(
        journal_entry_status(&pool, &reference).await,
        EntryStatus::Successful
    );

    // Replayed webhook credits nothing further.
    let second = service.apply(&reference, Some("card"), Some("991")).await.unwrap();
    assert!(matches!(second, FundingOutcome::AlreadyProcessed(_)));
    assert_eq!(balances(&pool, account).await.0, dec("350.00"));
    let entries: (i64,) = sqlx::query_as("SELECT count(*) FROM ledger_entries WHERE reference = $1")
        .bind(&reference)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(entries.0, 1);
}

#[tokio::test]
#[ignore]
async fn funding_intent_recreates_a_missing_payment_row() {
    let pool = test_pool().await;
    let account = seed_account(&pool, "0", false).await;
    let reference = format!("fund_{}", Uuid::new_v4().simple());
    let service = funding(&pool);

    // No pending row exists; the signed intent payload is enough to settle.
    let outcome = service
        .apply_from_intent(&reference, account, &dec("250"), Some("card"), None)
        .await
        .unwrap();
    let payment = match outcome {
        FundingOutcome::Applied(payment) => payment,
        other => panic!("expected Applied, got {other:?}"),
    };
    assert_eq!(payment.status, FundingStatus::Success);
    assert_eq!(payment.account_id, account);
    assert_eq!(balances(&pool, account).await.0, dec("250.00"));

    let replay = service
        .apply_from_intent(&reference, account, &dec("250"), Some("card"), None)
        .await
        .unwrap();
    assert!(matches!(replay, FundingOutcome::AlreadyProcessed(_)));
    assert_eq!(balances(&pool, account).await.0, dec("250.00"));
}

#[tokio::test]
#[ignore]
async fn successful_transfer_webhook_finalizes_the_withdrawal() {
    let pool = test_pool().await;
    let account = seed_account(&pool, "500", true).await;
    let service = withdrawals(&pool);

    let withdrawal = service.initiate(account, dec("200")).await.unwrap();
    assert_eq!(balances(&pool, account).await.0, dec("300.00"));
    assert_eq!(
        journal_entry_status(&pool, &withdrawal.reference).await,
        EntryStatus::Pending
    );

    let finalized = service
        .handle_transfer_success(&withdrawal.reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finalized.status, WithdrawalStatus::Success);
    assert!(finalized.processed_at.is_some());
    // The payout left the wallet at initiation; success moves no money.
    assert_eq!(balances(&pool, account).await.0, dec("300.00"));
    assert_eq!(
        journal_entry_status(&pool, &withdrawal.reference).await,
        EntryStatus::Successful
    );

    // Replayed webhook is a no-op.
    let replay = service
        .handle_transfer_success(&withdrawal.reference)
        .await
        .unwrap();
    assert!(replay.is_none());
    assert_eq!(balances(&pool, account).await.0, dec("300.00"));
}

#[tokio::test]
#[ignore]
async fn withdrawal_without_bank_details_is_rejected_up_front() {
    let pool = test_pool().await;
    let account = seed_account(&pool, "500", false).await;

    let result = withdrawals(&pool).initiate(account, dec("100")).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(balances(&pool, account).await.0, dec("500.00"));
}
