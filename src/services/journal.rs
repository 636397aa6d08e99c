//! Append-only journal of money movements, keyed by a globally unique
//! reference. `record` is the single idempotency gate: a reference can be
//! written at most once, so a replayed webhook or a racing manual verify can
//! never settle the same movement twice.

use sqlx::{PgPool, Postgres, Transaction};

use crate::db::models::{EntryStatus, LedgerEntry};
use crate::db::queries::{self, NewLedgerEntry};
use crate::error::AppError;

/// Record a movement. Fails with `DuplicateReference` when the reference has
/// already been written.
pub async fn record(
    tx: &mut Transaction<'_, Postgres>,
    entry: NewLedgerEntry,
) -> Result<LedgerEntry, AppError> {
    queries::insert_ledger_entry(tx, &entry)
        .await
        .map_err(|e| AppError::from_unique_violation(e, &entry.reference))
}

/// Cheap pre-check used before expensive work (gateway verification, order
/// materialization). The unique index remains the authoritative gate.
pub async fn exists(pool: &PgPool, reference: &str) -> Result<bool, AppError> {
    Ok(queries::ledger_entry_exists(pool, reference).await?)
}

pub async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    reference: &str,
    status: EntryStatus,
) -> Result<(), AppError> {
    Ok(queries::set_ledger_entry_status(tx, reference, status).await?)
}
