use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::{BigDecimal, Json};
use sqlx::FromRow;
use uuid::Uuid;

// --- Status enums ---
//
// Each enum maps onto a Postgres enum type created by the migrations, so an
// out-of-range value can never be written or read.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Wallet,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderPaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Shipped,
    Delivered,
    Cancelled,
}

/// Escrow settlement state of an order. `Completed` is written exactly once,
/// when the vendor's escrowed share is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "settlement_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Deposit,
    Withdrawal,
    Payment,
    Sales,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Successful,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "funding_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum FundingStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Orders,
    Payments,
    Withdrawals,
}

// --- Row models ---

/// An account's wallet. `available` is spendable; `pending_escrow` holds a
/// vendor's earnings until the buyer confirms delivery. Both are kept >= 0 by
/// schema CHECK constraints and guarded updates.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub available: BigDecimal,
    pub pending_escrow: BigDecimal,
    pub bank_code: Option<String>,
    pub bank_account_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product row joined with its category's commission rate.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Product {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub purchases: i32,
    pub commission_percent: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryAddress {
    pub name: String,
    pub address: String,
    pub phone_number: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub vendor_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub commission_amount: BigDecimal,
    pub delivery_fee: BigDecimal,
    pub delivery_address: Json<DeliveryAddress>,
    pub payment_method: PaymentMethod,
    pub payment_status: OrderPaymentStatus,
    pub order_status: OrderStatus,
    pub settlement_status: SettlementStatus,
    /// Idempotency key tying the order to exactly one settlement.
    pub reference: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub expected_delivery_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The vendor's net share of this order: what went into escrow on payment
    /// and what is released (or refunded) later.
    pub fn vendor_share(&self) -> BigDecimal {
        &self.total_amount - &self.commission_amount + &self.delivery_fee
    }
}

/// Append-only journal row. `reference` is globally unique and is the single
/// idempotency gate for every settlement path.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub counterparty_id: Option<Uuid>,
    pub entry_type: EntryType,
    pub amount: BigDecimal,
    pub reference: String,
    pub status: EntryStatus,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One wallet top-up attempt through the gateway.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub channel: Option<String>,
    pub status: FundingStatus,
    pub reference: String,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payout request. `amount` is debited from `available` the moment the row is
/// created and restored only on REJECTED or FAILED.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: BigDecimal,
    pub bank_code: String,
    pub account_number: String,
    pub recipient_code: Option<String>,
    pub transfer_id: Option<String>,
    pub status: WithdrawalStatus,
    pub reference: String,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
