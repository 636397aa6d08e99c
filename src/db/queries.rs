//! Query layer. Anything that participates in a settlement takes an open
//! `Transaction` so that every write of one business operation commits or
//! rolls back as a unit. Status transitions are conditional updates: the
//! WHERE clause carries the expected prior state and zero affected rows means
//! the caller lost the race.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Result, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::db::models::{
    Account, DeliveryAddress, EntryStatus, EntryType, LedgerEntry, NotificationKind, Order,
    OrderPaymentStatus, Payment, PaymentMethod, Product, Withdrawal,
};
use sqlx::types::BigDecimal;

// --- Accounts / wallet ---

pub async fn get_account(pool: &PgPool, id: Uuid) -> Result<Option<Account>> {
    sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Debit `available`. Returns false when the balance is short; the guard in
/// the WHERE clause is what keeps balances non-negative under concurrency.
pub async fn debit_available(
    tx: &mut SqlxTransaction<'_, Postgres>,
    account_id: Uuid,
    amount: &BigDecimal,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET available = available - $1, updated_at = now()
        WHERE id = $2 AND available >= $1
        "#,
    )
    .bind(amount)
    .bind(account_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn credit_available(
    tx: &mut SqlxTransaction<'_, Postgres>,
    account_id: Uuid,
    amount: &BigDecimal,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE accounts SET available = available + $1, updated_at = now() WHERE id = $2",
    )
    .bind(amount)
    .bind(account_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn credit_escrow(
    tx: &mut SqlxTransaction<'_, Postgres>,
    account_id: Uuid,
    amount: &BigDecimal,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE accounts SET pending_escrow = pending_escrow + $1, updated_at = now() WHERE id = $2",
    )
    .bind(amount)
    .bind(account_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move escrowed funds into the same account's spendable balance.
pub async fn release_escrow(
    tx: &mut SqlxTransaction<'_, Postgres>,
    account_id: Uuid,
    amount: &BigDecimal,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET pending_escrow = pending_escrow - $1,
            available = available + $1,
            updated_at = now()
        WHERE id = $2 AND pending_escrow >= $1
        "#,
    )
    .bind(amount)
    .bind(account_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Take funds out of escrow without crediting the holder (refund path: the
/// buyer is credited separately inside the same transaction).
pub async fn revoke_escrow(
    tx: &mut SqlxTransaction<'_, Postgres>,
    account_id: Uuid,
    amount: &BigDecimal,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET pending_escrow = pending_escrow - $1, updated_at = now()
        WHERE id = $2 AND pending_escrow >= $1
        "#,
    )
    .bind(amount)
    .bind(account_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

// --- Products ---

pub async fn get_product(pool: &PgPool, id: Uuid) -> Result<Option<Product>> {
    sqlx::query_as::<_, Product>(
        r#"
        SELECT p.id, p.vendor_id, p.name, p.price, p.purchases, c.commission_percent
        FROM products p
        JOIN categories c ON c.id = p.category_id
        WHERE p.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn increment_product_purchases(
    tx: &mut SqlxTransaction<'_, Postgres>,
    product_id: Uuid,
    quantity: i32,
) -> Result<()> {
    sqlx::query("UPDATE products SET purchases = purchases + $1 WHERE id = $2")
        .bind(quantity)
        .bind(product_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// --- Orders ---

pub struct NewOrder {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub vendor_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub commission_amount: BigDecimal,
    pub delivery_fee: BigDecimal,
    pub delivery_address: DeliveryAddress,
    pub payment_method: PaymentMethod,
    pub reference: String,
}

/// Insert an order already marked paid. Orders are only materialized once
/// payment is known-good, so there is no pending-payment insert path.
pub async fn insert_paid_order(
    tx: &mut SqlxTransaction<'_, Postgres>,
    order: &NewOrder,
) -> Result<Order> {
    sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (
            id, buyer_id, vendor_id, product_id, quantity, unit_price,
            total_amount, commission_amount, delivery_fee, delivery_address,
            payment_method, payment_status, reference, paid_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'paid', $12, now())
        RETURNING *
        "#,
    )
    .bind(order.id)
    .bind(order.buyer_id)
    .bind(order.vendor_id)
    .bind(order.product_id)
    .bind(order.quantity)
    .bind(&order.unit_price)
    .bind(&order.total_amount)
    .bind(&order.commission_amount)
    .bind(&order.delivery_fee)
    .bind(Json(&order.delivery_address))
    .bind(order.payment_method)
    .bind(&order.reference)
    .fetch_one(&mut **tx)
    .await
}

pub async fn get_order(pool: &PgPool, id: Uuid) -> Result<Option<Order>> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_orders_for_buyer(
    pool: &PgPool,
    buyer_id: Uuid,
    payment_status: Option<OrderPaymentStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>> {
    sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE buyer_id = $1 AND ($2::order_payment_status IS NULL OR payment_status = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(buyer_id)
    .bind(payment_status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn list_orders_for_vendor(
    pool: &PgPool,
    vendor_id: Uuid,
    payment_status: Option<OrderPaymentStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>> {
    sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE vendor_id = $1 AND ($2::order_payment_status IS NULL OR payment_status = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(vendor_id)
    .bind(payment_status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// pending -> shipped, stamping `shipped_at`.
pub async fn mark_order_shipped(
    pool: &PgPool,
    order_id: Uuid,
    expected_delivery_date: Option<DateTime<Utc>>,
) -> Result<Option<Order>> {
    sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET order_status = 'shipped',
            shipped_at = now(),
            expected_delivery_date = COALESCE($2, expected_delivery_date),
            updated_at = now()
        WHERE id = $1 AND order_status = 'pending'
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(expected_delivery_date)
    .fetch_optional(pool)
    .await
}

/// shipped -> delivered, stamping `delivered_at`.
pub async fn mark_order_delivered(pool: &PgPool, order_id: Uuid) -> Result<Option<Order>> {
    sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET order_status = 'delivered', delivered_at = now(), updated_at = now()
        WHERE id = $1 AND order_status = 'shipped'
        RETURNING *
        "#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await
}

/// Flip settlement to completed, at most once.
pub async fn complete_order_settlement(
    tx: &mut SqlxTransaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<Option<Order>> {
    sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET settlement_status = 'completed', updated_at = now()
        WHERE id = $1 AND settlement_status = 'pending'
        RETURNING *
        "#,
    )
    .bind(order_id)
    .fetch_optional(tx.as_mut())
    .await
}

/// Cancel an order that has not settled. Terminal: nothing transitions out of
/// a cancelled order.
pub async fn cancel_order_row(
    tx: &mut SqlxTransaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<Option<Order>> {
    sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET order_status = 'cancelled',
            settlement_status = 'failed',
            payment_status = 'refunded',
            updated_at = now()
        WHERE id = $1 AND settlement_status = 'pending'
        RETURNING *
        "#,
    )
    .bind(order_id)
    .fetch_optional(tx.as_mut())
    .await
}

// --- Ledger journal ---

pub struct NewLedgerEntry {
    pub account_id: Uuid,
    pub counterparty_id: Option<Uuid>,
    pub entry_type: EntryType,
    pub amount: BigDecimal,
    pub reference: String,
    pub status: EntryStatus,
    pub metadata: Option<serde_json::Value>,
}

/// The unique index on `reference` makes this fail with 23505 on replay;
/// callers map that to `DuplicateReference`.
pub async fn insert_ledger_entry(
    tx: &mut SqlxTransaction<'_, Postgres>,
    entry: &NewLedgerEntry,
) -> Result<LedgerEntry> {
    sqlx::query_as::<_, LedgerEntry>(
        r#"
        INSERT INTO ledger_entries (
            id, account_id, counterparty_id, entry_type, amount, reference, status, metadata
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.account_id)
    .bind(entry.counterparty_id)
    .bind(entry.entry_type)
    .bind(&entry.amount)
    .bind(&entry.reference)
    .bind(entry.status)
    .bind(&entry.metadata)
    .fetch_one(&mut **tx)
    .await
}

pub async fn ledger_entry_exists(pool: &PgPool, reference: &str) -> Result<bool> {
    let exists: (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM ledger_entries WHERE reference = $1)")
            .bind(reference)
            .fetch_one(pool)
            .await?;
    Ok(exists.0)
}

pub async fn set_ledger_entry_status(
    tx: &mut SqlxTransaction<'_, Postgres>,
    reference: &str,
    status: EntryStatus,
) -> Result<()> {
    sqlx::query("UPDATE ledger_entries SET status = $2, updated_at = now() WHERE reference = $1")
        .bind(reference)
        .bind(status)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// --- Payments (wallet funding) ---

pub async fn insert_payment(
    pool: &PgPool,
    account_id: Uuid,
    amount: &BigDecimal,
    currency: &str,
    reference: &str,
) -> Result<Payment> {
    sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (id, account_id, amount, currency, reference)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(amount)
    .bind(currency)
    .bind(reference)
    .fetch_one(pool)
    .await
}

pub async fn get_payment_by_reference(pool: &PgPool, reference: &str) -> Result<Option<Payment>> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE reference = $1")
        .bind(reference)
        .fetch_optional(pool)
        .await
}

/// PENDING/FAILED -> SUCCESS. A payment already marked SUCCESS is left alone,
/// which is what makes duplicate funding webhooks harmless.
pub async fn mark_payment_succeeded(
    tx: &mut SqlxTransaction<'_, Postgres>,
    reference: &str,
    channel: Option<&str>,
    external_id: Option<&str>,
) -> Result<Option<Payment>> {
    sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = 'SUCCESS',
            channel = COALESCE($2, channel),
            external_id = COALESCE($3, external_id),
            updated_at = now()
        WHERE reference = $1 AND status <> 'SUCCESS'
        RETURNING *
        "#,
    )
    .bind(reference)
    .bind(channel)
    .bind(external_id)
    .fetch_optional(tx.as_mut())
    .await
}

pub async fn mark_payment_failed(pool: &PgPool, reference: &str) -> Result<Option<Payment>> {
    sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = 'FAILED', updated_at = now()
        WHERE reference = $1 AND status = 'PENDING'
        RETURNING *
        "#,
    )
    .bind(reference)
    .fetch_optional(pool)
    .await
}

// --- Withdrawals ---

pub struct NewWithdrawal {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: BigDecimal,
    pub bank_code: String,
    pub account_number: String,
    pub reference: String,
}

pub async fn insert_withdrawal(
    tx: &mut SqlxTransaction<'_, Postgres>,
    withdrawal: &NewWithdrawal,
) -> Result<Withdrawal> {
    sqlx::query_as::<_, Withdrawal>(
        r#"
        INSERT INTO withdrawals (id, account_id, amount, bank_code, account_number, reference)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(withdrawal.id)
    .bind(withdrawal.account_id)
    .bind(&withdrawal.amount)
    .bind(&withdrawal.bank_code)
    .bind(&withdrawal.account_number)
    .bind(&withdrawal.reference)
    .fetch_one(&mut **tx)
    .await
}

pub async fn get_withdrawal(pool: &PgPool, id: Uuid) -> Result<Option<Withdrawal>> {
    sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// PENDING -> APPROVED, recording the external transfer. Zero rows means an
/// admin or a webhook got there first.
pub async fn approve_withdrawal_row(
    pool: &PgPool,
    id: Uuid,
    recipient_code: &str,
    transfer_id: &str,
) -> Result<Option<Withdrawal>> {
    sqlx::query_as::<_, Withdrawal>(
        r#"
        UPDATE withdrawals
        SET status = 'APPROVED', recipient_code = $2, transfer_id = $3, updated_at = now()
        WHERE id = $1 AND status = 'PENDING'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(recipient_code)
    .bind(transfer_id)
    .fetch_optional(pool)
    .await
}

pub async fn reject_withdrawal_row(
    tx: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Withdrawal>> {
    sqlx::query_as::<_, Withdrawal>(
        r#"
        UPDATE withdrawals
        SET status = 'REJECTED', processed_at = now(), updated_at = now()
        WHERE id = $1 AND status = 'PENDING'
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_optional(tx.as_mut())
    .await
}

/// Finalize from a transfer webhook. The status guard covers both directions:
/// a SUCCESS webhook cannot overwrite FAILED/REJECTED and vice versa, so the
/// reserved amount is never both restored and paid out.
pub async fn finalize_withdrawal(
    tx: &mut SqlxTransaction<'_, Postgres>,
    reference: &str,
    success: bool,
) -> Result<Option<Withdrawal>> {
    let status = if success { "SUCCESS" } else { "FAILED" };
    sqlx::query_as::<_, Withdrawal>(
        r#"
        UPDATE withdrawals
        SET status = $2::withdrawal_status, processed_at = now(), updated_at = now()
        WHERE reference = $1 AND status IN ('PENDING', 'APPROVED')
        RETURNING *
        "#,
    )
    .bind(reference)
    .bind(status)
    .fetch_optional(tx.as_mut())
    .await
}

// --- Collaborators (best-effort, post-commit) ---

pub async fn insert_notification(
    pool: &PgPool,
    account_id: Uuid,
    title: &str,
    message: &str,
    kind: NotificationKind,
    metadata: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notifications (account_id, title, message, kind, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(account_id)
    .bind(title)
    .bind(message)
    .bind(kind)
    .bind(metadata)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_chat_thread(
    pool: &PgPool,
    buyer_id: Uuid,
    vendor_id: Uuid,
    product_id: Uuid,
    order_id: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chats (buyer_id, vendor_id, product_id, order_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (order_id) DO NOTHING
        "#,
    )
    .bind(buyer_id)
    .bind(vendor_id)
    .bind(product_id)
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(())
}
