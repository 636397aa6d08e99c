//! Wallet balance primitives. Every function takes an open database
//! transaction so callers compose debits, credits and journal writes into one
//! atomic unit. The non-negative invariant lives in the guarded SQL, not in
//! read-then-write application code.

use sqlx::types::BigDecimal;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::queries;
use crate::error::AppError;

/// Take `amount` out of the account's spendable balance.
pub async fn debit(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    amount: &BigDecimal,
) -> Result<(), AppError> {
    if queries::debit_available(tx, account_id, amount).await? {
        return Ok(());
    }
    // Zero rows: either the account is missing or the balance is short.
    match sqlx::query_scalar::<_, BigDecimal>("SELECT available FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_optional(tx.as_mut())
        .await?
    {
        Some(_) => Err(AppError::InsufficientFunds),
        None => Err(AppError::NotFound(format!("account {account_id}"))),
    }
}

pub async fn credit(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    amount: &BigDecimal,
) -> Result<(), AppError> {
    if queries::credit_available(tx, account_id, amount).await? {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("account {account_id}")))
    }
}

/// Hold `amount` in the vendor's escrow until delivery is confirmed.
pub async fn escrow(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    amount: &BigDecimal,
) -> Result<(), AppError> {
    if queries::credit_escrow(tx, account_id, amount).await? {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("account {account_id}")))
    }
}

/// Release held funds into the same account's spendable balance.
pub async fn release(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    amount: &BigDecimal,
) -> Result<(), AppError> {
    if queries::release_escrow(tx, account_id, amount).await? {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "account {account_id} holds less than {amount} in escrow"
        )))
    }
}

/// Remove held funds without crediting the holder; the refund credit happens
/// separately inside the same transaction.
pub async fn revoke_escrow(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    amount: &BigDecimal,
) -> Result<(), AppError> {
    if queries::revoke_escrow(tx, account_id, amount).await? {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "account {account_id} holds less than {amount} in escrow"
        )))
    }
}
