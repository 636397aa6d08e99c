use serde_json::json;
use sqlx::types::BigDecimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{EntryStatus, EntryType, FundingStatus, NotificationKind, Payment};
use crate::db::queries::{self, NewLedgerEntry};
use crate::error::AppError;
use crate::gateway::{ChargeIntent, GatewayClient, InitializedCharge};
use crate::money;
use crate::services::{journal, ledger, notifications};

/// Outcome of an idempotent funding confirmation.
#[derive(Debug)]
pub enum FundingOutcome {
    Applied(Payment),
    AlreadyProcessed(Payment),
}

/// Tops up wallets through the payment gateway. Unlike orders, a pending
/// payment row is written up front so the synchronous verify endpoint has a
/// local record to reconcile against.
pub struct FundingService {
    pool: PgPool,
    gateway: GatewayClient,
    currency: String,
}

impl FundingService {
    pub fn new(pool: PgPool, gateway: GatewayClient, currency: String) -> Self {
        Self {
            pool,
            gateway,
            currency,
        }
    }

    /// Start a wallet top-up. Returns the gateway checkout URL.
    pub async fn initialize(
        &self,
        account_id: Uuid,
        amount: BigDecimal,
    ) -> Result<InitializedCharge, AppError> {
        money::require_positive(&amount, "funding amount")?;
        let account = queries::get_account(&self.pool, account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {account_id}")))?;

        let reference = format!("fund_{}", Uuid::new_v4().simple());
        let amount_minor = money::to_minor_units(&amount)?;
        let charge = self
            .gateway
            .initialize_charge(
                &account.email,
                amount_minor,
                &reference,
                &self.currency,
                &ChargeIntent::Funding {
                    account_id,
                    amount: amount.clone(),
                },
            )
            .await?;
        queries::insert_payment(&self.pool, account_id, &amount, &self.currency, &reference)
            .await?;
        tracing::info!("funding {reference} initialized for account {account_id}");
        Ok(charge)
    }

    /// Synchronous confirmation, driven by the buyer returning from checkout.
    /// Re-verifies with the gateway before crediting anything.
    pub async fn verify(&self, reference: &str) -> Result<FundingOutcome, AppError> {
        let payment = queries::get_payment_by_reference(&self.pool, reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment {reference}")))?;
        if payment.status == FundingStatus::Success {
            return Ok(FundingOutcome::AlreadyProcessed(payment));
        }

        let verification = self.gateway.verify_charge(reference).await?;
        if !verification.is_success() {
            queries::mark_payment_failed(&self.pool, reference).await?;
            return Err(AppError::Validation("payment verification failed".into()));
        }
        if verification.amount != money::to_minor_units(&payment.amount)? {
            return Err(AppError::Validation(
                "charged amount does not match the payment record".into(),
            ));
        }

        self.apply(
            reference,
            verification.channel.as_deref(),
            verification.external_id().as_deref(),
        )
        .await
    }

    /// Credit the wallet for a confirmed charge. Called by `verify` and by
    /// the webhook path; the payment status flip and the journal reference
    /// each make a second application a no-op.
    pub async fn apply(
        &self,
        reference: &str,
        channel: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<FundingOutcome, AppError> {
        let mut tx = self.pool.begin().await?;
        let payment = match queries::mark_payment_succeeded(&mut tx, reference, channel, external_id)
            .await?
        {
            Some(payment) => payment,
            None => {
                let payment = queries::get_payment_by_reference(&self.pool, reference)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("payment {reference}")))?;
                return Ok(FundingOutcome::AlreadyProcessed(payment));
            }
        };
        ledger::credit(&mut tx, payment.account_id, &payment.amount).await?;
        let recorded = journal::record(
            &mut tx,
            NewLedgerEntry {
                account_id: payment.account_id,
                counterparty_id: None,
                entry_type: EntryType::Deposit,
                amount: payment.amount.clone(),
                reference: reference.to_string(),
                status: EntryStatus::Successful,
                metadata: Some(json!({ "payment_id": payment.id })),
            },
        )
        .await;
        if let Err(e) = recorded {
            if e.is_duplicate_reference() {
                return Ok(FundingOutcome::AlreadyProcessed(payment));
            }
            return Err(e);
        }
        tx.commit().await?;

        tracing::info!(
            "funding {reference} credited {} to account {}",
            payment.amount,
            payment.account_id
        );
        notifications::notify(
            &self.pool,
            payment.account_id,
            "Wallet Funded Successfully",
            &format!("Your wallet was funded with {}", payment.amount),
            NotificationKind::Payments,
            json!({ "reference": reference }),
        )
        .await;
        Ok(FundingOutcome::Applied(payment))
    }

    /// Webhook entry point. The signed event payload carries the funding
    /// intent, so a charge whose pending row never made it to disk can still
    /// settle: the row is recreated from the intent before the normal apply.
    pub async fn apply_from_intent(
        &self,
        reference: &str,
        account_id: Uuid,
        amount: &BigDecimal,
        channel: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<FundingOutcome, AppError> {
        money::require_positive(amount, "funding amount")?;
        if queries::get_payment_by_reference(&self.pool, reference)
            .await?
            .is_none()
        {
            let inserted =
                queries::insert_payment(&self.pool, account_id, amount, &self.currency, reference)
                    .await
                    .map_err(|e| AppError::from_unique_violation(e, reference));
            match inserted {
                Ok(_) => {
                    tracing::warn!("recreated missing payment row for funding {reference}");
                }
                // A racing writer inserted it first; proceed against that row.
                Err(e) if e.is_duplicate_reference() => {}
                Err(e) => return Err(e),
            }
        }
        self.apply(reference, channel, external_id).await
    }
}
