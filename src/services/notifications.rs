//! Best-effort collaborators. These run after the settlement transaction has
//! committed; a failure here is logged and swallowed because it cannot affect
//! money correctness.

use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::NotificationKind;
use crate::db::queries;

pub async fn notify(
    pool: &PgPool,
    account_id: Uuid,
    title: &str,
    message: &str,
    kind: NotificationKind,
    metadata: serde_json::Value,
) {
    if let Err(e) = queries::insert_notification(pool, account_id, title, message, kind, metadata).await
    {
        tracing::error!("failed to record notification for {account_id}: {e}");
    }
}

/// Open the buyer <-> vendor chat thread for a freshly paid order.
pub async fn open_chat_thread(
    pool: &PgPool,
    buyer_id: Uuid,
    vendor_id: Uuid,
    product_id: Uuid,
    order_id: Uuid,
) {
    if let Err(e) = queries::insert_chat_thread(pool, buyer_id, vendor_id, product_id, order_id).await
    {
        tracing::error!("failed to open chat thread for order {order_id}: {e}");
    }
}
