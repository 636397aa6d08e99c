use serde::Deserialize;
use serde_json::json;
use sqlx::types::BigDecimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{
    DeliveryAddress, EntryStatus, EntryType, NotificationKind, Order, OrderPaymentStatus,
    OrderStatus, PaymentMethod,
};
use crate::db::queries::{self, NewLedgerEntry, NewOrder};
use crate::error::AppError;
use crate::gateway::{ChargeIntent, GatewayClient, InitializedCharge, OrderIntent};
use crate::money;
use crate::services::{journal, ledger, notifications};

/// Who is performing a mutation. Admin bypasses ownership checks (the admin
/// surface is authenticated upstream).
#[derive(Debug, Clone, Copy)]
pub enum Actor {
    Account(Uuid),
    Admin,
}

impl Actor {
    fn is(&self, account_id: Uuid) -> bool {
        matches!(self, Actor::Admin) || matches!(self, Actor::Account(id) if *id == account_id)
    }
}

/// Outcome of an idempotent confirmation: either this call applied the
/// settlement, or an earlier one already did and this was a safe no-op.
#[derive(Debug)]
pub enum Confirmation {
    Applied(Order),
    AlreadyProcessed,
}

#[derive(Debug, Deserialize)]
pub struct NewWalletOrder {
    pub vendor_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub delivery_address: DeliveryAddress,
}

#[derive(Debug, Deserialize)]
pub struct NewGatewayOrder {
    pub vendor_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    #[serde(default)]
    pub delivery_fee: Option<BigDecimal>,
    pub delivery_address: DeliveryAddress,
}

pub struct OrderService {
    pool: PgPool,
    gateway: GatewayClient,
    currency: String,
}

impl OrderService {
    pub fn new(pool: PgPool, gateway: GatewayClient, currency: String) -> Self {
        Self {
            pool,
            gateway,
            currency,
        }
    }

    /// Pay for an order out of the buyer's wallet. Debit, escrow, order row
    /// and journal entry commit together; collaborators run after.
    pub async fn create_with_wallet(
        &self,
        buyer_id: Uuid,
        request: NewWalletOrder,
    ) -> Result<Order, AppError> {
        let intent = self
            .build_intent(buyer_id, request.vendor_id, request.product_id, request.quantity,
                request.unit_price, BigDecimal::from(0), request.delivery_address)
            .await?;

        let order_id = Uuid::new_v4();
        let reference = order_id.to_string();
        let vendor_share = &intent.total_amount - &intent.commission_amount;

        let mut tx = self.pool.begin().await?;
        ledger::debit(&mut tx, buyer_id, &intent.total_amount).await?;
        ledger::escrow(&mut tx, intent.vendor_id, &vendor_share).await?;
        let order = queries::insert_paid_order(
            &mut tx,
            &NewOrder {
                id: order_id,
                buyer_id,
                vendor_id: intent.vendor_id,
                product_id: intent.product_id,
                quantity: intent.quantity,
                unit_price: intent.unit_price.clone(),
                total_amount: intent.total_amount.clone(),
                commission_amount: intent.commission_amount.clone(),
                delivery_fee: intent.delivery_fee.clone(),
                delivery_address: intent.delivery_address.clone(),
                payment_method: PaymentMethod::Wallet,
                reference: reference.clone(),
            },
        )
        .await?;
        journal::record(
            &mut tx,
            NewLedgerEntry {
                account_id: intent.vendor_id,
                counterparty_id: Some(buyer_id),
                entry_type: EntryType::Sales,
                amount: intent.total_amount.clone(),
                reference,
                status: EntryStatus::Successful,
                metadata: Some(json!({ "order_id": order_id })),
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!("wallet order {order_id} settled for buyer {buyer_id}");
        self.after_payment(&order).await;
        Ok(order)
    }

    /// Start a gateway checkout. No order row is created: the full intent
    /// rides to the gateway as metadata and the order is materialized only
    /// once the charge is confirmed, so abandoned checkouts leave no orphans.
    pub async fn initialize_with_gateway(
        &self,
        buyer_id: Uuid,
        request: NewGatewayOrder,
    ) -> Result<InitializedCharge, AppError> {
        let buyer = queries::get_account(&self.pool, buyer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {buyer_id}")))?;

        let intent = self
            .build_intent(
                buyer_id,
                request.vendor_id,
                request.product_id,
                request.quantity,
                request.unit_price,
                request.delivery_fee.unwrap_or_else(|| BigDecimal::from(0)),
                request.delivery_address,
            )
            .await?;

        let reference = format!("order_{}", Uuid::new_v4().simple());
        let amount_minor = money::to_minor_units(&intent.charge_amount())?;
        let charge = self
            .gateway
            .initialize_charge(
                &buyer.email,
                amount_minor,
                &reference,
                &self.currency,
                &ChargeIntent::Order(intent),
            )
            .await?;
        Ok(charge)
    }

    /// Confirm a gateway order charge by reference. Shared by the synchronous
    /// verify endpoint and the webhook path; both race safely because the
    /// journal reference can only ever be written once.
    pub async fn confirm_gateway_payment(&self, reference: &str) -> Result<Confirmation, AppError> {
        if journal::exists(&self.pool, reference).await? {
            return Ok(Confirmation::AlreadyProcessed);
        }

        let verification = self.gateway.verify_charge(reference).await?;
        if !verification.is_success() {
            return Err(AppError::Validation("payment verification failed".into()));
        }

        let intent = match verification.metadata {
            Some(ChargeIntent::Order(intent)) => intent,
            _ => {
                return Err(AppError::Validation(
                    "charge metadata is not an order intent".into(),
                ))
            }
        };
        if verification.amount != money::to_minor_units(&intent.charge_amount())? {
            return Err(AppError::Validation(
                "charged amount does not match order intent".into(),
            ));
        }

        self.apply_gateway_order(intent, reference).await
    }

    /// Materialize a confirmed gateway order. Called with a verified intent
    /// (signature-checked webhook payload or gateway verify response).
    pub async fn apply_gateway_order(
        &self,
        intent: OrderIntent,
        reference: &str,
    ) -> Result<Confirmation, AppError> {
        intent.validate()?;
        if journal::exists(&self.pool, reference).await? {
            return Ok(Confirmation::AlreadyProcessed);
        }

        let order_id = Uuid::new_v4();
        let vendor_share =
            &intent.total_amount - &intent.commission_amount + &intent.delivery_fee;

        let mut tx = self.pool.begin().await?;
        ledger::escrow(&mut tx, intent.vendor_id, &vendor_share).await?;
        let inserted = queries::insert_paid_order(
            &mut tx,
            &NewOrder {
                id: order_id,
                buyer_id: intent.buyer_id,
                vendor_id: intent.vendor_id,
                product_id: intent.product_id,
                quantity: intent.quantity,
                unit_price: intent.unit_price.clone(),
                total_amount: intent.total_amount.clone(),
                commission_amount: intent.commission_amount.clone(),
                delivery_fee: intent.delivery_fee.clone(),
                delivery_address: intent.delivery_address.clone(),
                payment_method: PaymentMethod::Gateway,
                reference: reference.to_string(),
            },
        )
        .await
        .map_err(|e| AppError::from_unique_violation(e, reference));
        let order = match inserted {
            Ok(order) => order,
            Err(e) if e.is_duplicate_reference() => return Ok(Confirmation::AlreadyProcessed),
            Err(e) => return Err(e),
        };
        let recorded = journal::record(
            &mut tx,
            NewLedgerEntry {
                account_id: intent.vendor_id,
                counterparty_id: Some(intent.buyer_id),
                entry_type: EntryType::Sales,
                amount: intent.total_amount.clone(),
                reference: reference.to_string(),
                status: EntryStatus::Successful,
                metadata: Some(json!({ "order_id": order_id })),
            },
        )
        .await;
        if let Err(e) = recorded {
            if e.is_duplicate_reference() {
                // Lost the race after the pre-check; the other writer settled it.
                return Ok(Confirmation::AlreadyProcessed);
            }
            return Err(e);
        }
        tx.commit().await?;

        tracing::info!("gateway order {order_id} settled, reference {reference}");
        self.after_payment(&order).await;
        Ok(Confirmation::Applied(order))
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order, AppError> {
        queries::get_order(&self.pool, order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))
    }

    pub async fn list_for_buyer(
        &self,
        buyer_id: Uuid,
        payment_status: Option<OrderPaymentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, AppError> {
        Ok(queries::list_orders_for_buyer(&self.pool, buyer_id, payment_status, limit, offset).await?)
    }

    pub async fn list_for_vendor(
        &self,
        vendor_id: Uuid,
        payment_status: Option<OrderPaymentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, AppError> {
        Ok(queries::list_orders_for_vendor(&self.pool, vendor_id, payment_status, limit, offset).await?)
    }

    /// Vendor-driven fulfilment transitions: pending -> shipped -> delivered.
    /// Cancellation routes through `cancel` so the refund logic stays in one
    /// place.
    pub async fn update_status(
        &self,
        order_id: Uuid,
        vendor_id: Uuid,
        new_status: OrderStatus,
        expected_delivery_date: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Order, AppError> {
        let order = self.get(order_id).await?;
        if order.vendor_id != vendor_id {
            return Err(AppError::Unauthorized(
                "only the order's vendor may update its status".into(),
            ));
        }

        let updated = match new_status {
            OrderStatus::Shipped => {
                queries::mark_order_shipped(&self.pool, order_id, expected_delivery_date).await?
            }
            OrderStatus::Delivered => queries::mark_order_delivered(&self.pool, order_id).await?,
            OrderStatus::Cancelled => {
                return self.cancel(order_id, Actor::Account(vendor_id)).await;
            }
            OrderStatus::Pending => {
                return Err(AppError::InvalidState(
                    "orders cannot move back to pending".into(),
                ));
            }
        };
        let order = updated.ok_or_else(|| {
            AppError::InvalidState(format!("order cannot transition to {new_status:?}"))
        })?;

        let (buyer_title, buyer_message) = match order.order_status {
            OrderStatus::Shipped => ("Order Shipped", "Your order has been shipped"),
            _ => ("Order Delivered", "Your order has been delivered"),
        };
        notifications::notify(
            &self.pool,
            order.buyer_id,
            buyer_title,
            buyer_message,
            NotificationKind::Orders,
            json!({ "orderId": order.id }),
        )
        .await;
        notifications::notify(
            &self.pool,
            order.vendor_id,
            "Order Updated Successfully",
            &format!("Order {} is now {:?}", order.id, order.order_status),
            NotificationKind::Orders,
            json!({ "orderId": order.id }),
        )
        .await;
        Ok(order)
    }

    /// Buyer confirmation of receipt (or admin override). Releases the
    /// vendor's escrowed share exactly once.
    pub async fn complete_settlement(&self, order_id: Uuid, actor: Actor) -> Result<Order, AppError> {
        let order = self.get(order_id).await?;
        if !actor.is(order.buyer_id) {
            return Err(AppError::Unauthorized(
                "only the order's buyer may confirm receipt".into(),
            ));
        }

        let vendor_share = order.vendor_share();
        let mut tx = self.pool.begin().await?;
        let order = queries::complete_order_settlement(&mut tx, order_id)
            .await?
            .ok_or_else(|| AppError::InvalidState("order settlement already finalized".into()))?;
        ledger::release(&mut tx, order.vendor_id, &vendor_share).await?;
        queries::increment_product_purchases(&mut tx, order.product_id, order.quantity).await?;
        tx.commit().await?;

        tracing::info!("order {order_id} completed, released {vendor_share} to vendor");
        notifications::notify(
            &self.pool,
            order.vendor_id,
            "Order Completed",
            "The buyer confirmed receipt; your earnings are now available",
            NotificationKind::Orders,
            json!({ "orderId": order.id }),
        )
        .await;
        Ok(order)
    }

    /// Cancel an unsettled order and refund the buyer the escrowed share.
    pub async fn cancel(&self, order_id: Uuid, actor: Actor) -> Result<Order, AppError> {
        let order = self.get(order_id).await?;
        if !actor.is(order.buyer_id) && !actor.is(order.vendor_id) {
            return Err(AppError::Unauthorized(
                "only the order's buyer or vendor may cancel it".into(),
            ));
        }

        let vendor_share = order.vendor_share();
        let refund_reference = format!("refund_{}", order.reference);

        let mut tx = self.pool.begin().await?;
        let order = queries::cancel_order_row(&mut tx, order_id)
            .await?
            .ok_or_else(|| AppError::InvalidState("order already settled or cancelled".into()))?;
        ledger::revoke_escrow(&mut tx, order.vendor_id, &vendor_share).await?;
        ledger::credit(&mut tx, order.buyer_id, &vendor_share).await?;
        journal::record(
            &mut tx,
            NewLedgerEntry {
                account_id: order.buyer_id,
                counterparty_id: Some(order.vendor_id),
                entry_type: EntryType::Payment,
                amount: vendor_share.clone(),
                reference: refund_reference,
                status: EntryStatus::Successful,
                metadata: Some(json!({ "order_id": order.id, "refund": true })),
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!("order {order_id} cancelled, refunded {vendor_share} to buyer");
        notifications::notify(
            &self.pool,
            order.buyer_id,
            "Order Cancelled",
            "Your order was cancelled and the amount refunded to your wallet",
            NotificationKind::Orders,
            json!({ "orderId": order.id }),
        )
        .await;
        notifications::notify(
            &self.pool,
            order.vendor_id,
            "Order Cancelled",
            &format!("Order {} was cancelled", order.id),
            NotificationKind::Orders,
            json!({ "orderId": order.id }),
        )
        .await;
        Ok(order)
    }

    /// Resolve product and vendor, compute totals and commission, and return
    /// a validated intent. Shared by both payment paths.
    async fn build_intent(
        &self,
        buyer_id: Uuid,
        vendor_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        unit_price: BigDecimal,
        delivery_fee: BigDecimal,
        delivery_address: DeliveryAddress,
    ) -> Result<OrderIntent, AppError> {
        let product = queries::get_product(&self.pool, product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("product {product_id}")))?;
        queries::get_account(&self.pool, vendor_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("vendor {vendor_id}")))?;

        let total_amount = &unit_price * BigDecimal::from(quantity);
        let commission_amount = money::commission_for(&total_amount, &product.commission_percent);
        let intent = OrderIntent {
            buyer_id,
            vendor_id,
            product_id,
            quantity,
            unit_price,
            total_amount,
            commission_amount,
            delivery_fee,
            delivery_address,
        };
        intent.validate()?;
        Ok(intent)
    }

    /// Post-commit collaborators for a freshly paid order.
    async fn after_payment(&self, order: &Order) {
        notifications::open_chat_thread(
            &self.pool,
            order.buyer_id,
            order.vendor_id,
            order.product_id,
            order.id,
        )
        .await;
        notifications::notify(
            &self.pool,
            order.buyer_id,
            "Order Created Successfully",
            "You have successfully placed an order",
            NotificationKind::Orders,
            json!({ "orderId": order.id }),
        )
        .await;
        notifications::notify(
            &self.pool,
            order.vendor_id,
            "Order Received",
            "You've received a new order",
            NotificationKind::Orders,
            json!({ "orderId": order.id }),
        )
        .await;
    }
}
