use serde_json::json;
use sqlx::types::BigDecimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{
    EntryStatus, EntryType, NotificationKind, Withdrawal, WithdrawalStatus,
};
use crate::db::queries::{self, NewLedgerEntry, NewWithdrawal};
use crate::error::AppError;
use crate::gateway::{Bank, GatewayClient};
use crate::money;
use crate::services::{journal, ledger, notifications};

/// Withdrawal lifecycle: the balance is debited the moment the request is
/// accepted, so a pending withdrawal can never be double-spent. The money
/// comes back only on rejection or a failed transfer.
pub struct WithdrawalService {
    pool: PgPool,
    gateway: GatewayClient,
    currency: String,
}

impl WithdrawalService {
    pub fn new(pool: PgPool, gateway: GatewayClient, currency: String) -> Self {
        Self {
            pool,
            gateway,
            currency,
        }
    }

    /// Accept a withdrawal request against the account's stored payout bank.
    pub async fn initiate(
        &self,
        account_id: Uuid,
        amount: BigDecimal,
    ) -> Result<Withdrawal, AppError> {
        money::require_positive(&amount, "withdrawal amount")?;
        let account = queries::get_account(&self.pool, account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {account_id}")))?;
        let (bank_code, account_number) = account
            .bank_code
            .zip(account.bank_account_number)
            .ok_or_else(|| {
                AppError::Validation("no payout bank details configured for this account".into())
            })?;

        let id = Uuid::new_v4();
        let reference = format!("wd_{}", id.simple());

        let mut tx = self.pool.begin().await?;
        ledger::debit(&mut tx, account_id, &amount).await?;
        let withdrawal = queries::insert_withdrawal(
            &mut tx,
            &NewWithdrawal {
                id,
                account_id,
                amount: amount.clone(),
                bank_code,
                account_number,
                reference: reference.clone(),
            },
        )
        .await?;
        journal::record(
            &mut tx,
            NewLedgerEntry {
                account_id,
                counterparty_id: None,
                entry_type: EntryType::Withdrawal,
                amount,
                reference,
                status: EntryStatus::Pending,
                metadata: Some(json!({ "withdrawal_id": id })),
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!("withdrawal {id} initiated for account {account_id}");
        notifications::notify(
            &self.pool,
            account_id,
            "Withdrawal Request Submitted",
            "Your withdrawal request is pending review",
            NotificationKind::Withdrawals,
            json!({ "withdrawalId": id }),
        )
        .await;
        Ok(withdrawal)
    }

    /// Admin approval: resolve a transfer recipient at the gateway and start
    /// the payout. The gateway calls happen before the status flip so a
    /// declined transfer leaves the withdrawal PENDING and retryable.
    pub async fn approve(&self, withdrawal_id: Uuid) -> Result<Withdrawal, AppError> {
        let withdrawal = self.get(withdrawal_id).await?;
        if withdrawal.status != WithdrawalStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "withdrawal is {:?}, not PENDING",
                withdrawal.status
            )));
        }
        let account = queries::get_account(&self.pool, withdrawal.account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {}", withdrawal.account_id)))?;

        let recipient_name = format!("{} {}", account.first_name, account.last_name);
        let recipient_code = self
            .gateway
            .find_or_create_recipient(
                &recipient_name,
                &withdrawal.account_number,
                &withdrawal.bank_code,
                &self.currency,
            )
            .await?;
        let amount_minor = money::to_minor_units(&withdrawal.amount)?;
        let transfer_id = self
            .gateway
            .initiate_transfer(
                &recipient_code,
                amount_minor,
                &withdrawal.reference,
                "Wallet withdrawal",
            )
            .await?;

        let updated =
            queries::approve_withdrawal_row(&self.pool, withdrawal_id, &recipient_code, &transfer_id)
                .await?
                .ok_or_else(|| {
                    AppError::InvalidState("withdrawal was finalized while approving".into())
                })?;

        tracing::info!("withdrawal {withdrawal_id} approved, transfer {transfer_id}");
        notifications::notify(
            &self.pool,
            updated.account_id,
            "Withdrawal Approved",
            "Your withdrawal was approved and the transfer is in flight",
            NotificationKind::Withdrawals,
            json!({ "withdrawalId": withdrawal_id }),
        )
        .await;
        Ok(updated)
    }

    /// Admin rejection of a pending request. Refunds the held amount.
    pub async fn reject(&self, withdrawal_id: Uuid) -> Result<Withdrawal, AppError> {
        let mut tx = self.pool.begin().await?;
        let withdrawal = queries::reject_withdrawal_row(&mut tx, withdrawal_id)
            .await?
            .ok_or_else(|| AppError::InvalidState("withdrawal is not pending".into()))?;
        ledger::credit(&mut tx, withdrawal.account_id, &withdrawal.amount).await?;
        journal::set_status(&mut tx, &withdrawal.reference, EntryStatus::Failed).await?;
        tx.commit().await?;

        tracing::info!("withdrawal {withdrawal_id} rejected and refunded");
        notifications::notify(
            &self.pool,
            withdrawal.account_id,
            "Withdrawal Rejected",
            "Your withdrawal was rejected and the amount returned to your wallet",
            NotificationKind::Withdrawals,
            json!({ "withdrawalId": withdrawal_id }),
        )
        .await;
        Ok(withdrawal)
    }

    /// Gateway confirmed the payout landed. `None` means the reference is
    /// unknown or already finalized, which the webhook treats as a no-op.
    pub async fn handle_transfer_success(
        &self,
        reference: &str,
    ) -> Result<Option<Withdrawal>, AppError> {
        let mut tx = self.pool.begin().await?;
        let withdrawal = match queries::finalize_withdrawal(&mut tx, reference, true).await? {
            Some(withdrawal) => withdrawal,
            None => return Ok(None),
        };
        journal::set_status(&mut tx, reference, EntryStatus::Successful).await?;
        tx.commit().await?;

        tracing::info!("withdrawal transfer {reference} settled");
        notifications::notify(
            &self.pool,
            withdrawal.account_id,
            "Withdrawal Processed Successfully",
            "Your withdrawal has been paid out to your bank account",
            NotificationKind::Withdrawals,
            json!({ "reference": reference }),
        )
        .await;
        Ok(Some(withdrawal))
    }

    /// Gateway reported the payout bounced. Refunds the held amount.
    pub async fn handle_transfer_failure(
        &self,
        reference: &str,
    ) -> Result<Option<Withdrawal>, AppError> {
        let mut tx = self.pool.begin().await?;
        let withdrawal = match queries::finalize_withdrawal(&mut tx, reference, false).await? {
            Some(withdrawal) => withdrawal,
            None => return Ok(None),
        };
        ledger::credit(&mut tx, withdrawal.account_id, &withdrawal.amount).await?;
        journal::set_status(&mut tx, reference, EntryStatus::Failed).await?;
        tx.commit().await?;

        tracing::warn!("withdrawal transfer {reference} failed, amount refunded");
        notifications::notify(
            &self.pool,
            withdrawal.account_id,
            "Withdrawal Failed",
            "The transfer failed and the amount was returned to your wallet",
            NotificationKind::Withdrawals,
            json!({ "reference": reference }),
        )
        .await;
        Ok(Some(withdrawal))
    }

    pub async fn get(&self, withdrawal_id: Uuid) -> Result<Withdrawal, AppError> {
        queries::get_withdrawal(&self.pool, withdrawal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("withdrawal {withdrawal_id}")))
    }

    /// Payout bank directory, proxied from the gateway.
    pub async fn list_banks(&self, country: &str) -> Result<Vec<Bank>, AppError> {
        Ok(self.gateway.list_banks(country, &self.currency).await?)
    }
}
