use sqlx::{Row, SqliteConnection};

use crate::{
    crypto::EddsaPublicKey,
    db_types::{InstanceId, OrderId, SessionPayment},
    traits::MerchantDbError,
};

/// Remembers that `fulfillment_url` was bought with `order_id` in `session_id`, replacing any earlier purchase of the
/// same resource in that session.
pub async fn upsert_session(
    instance: &InstanceId,
    session_id: &str,
    fulfillment_url: &str,
    order_id: &OrderId,
    merchant_pub: &EddsaPublicKey,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    sqlx::query(
        r#"
            INSERT INTO sessions (instance_id, session_id, fulfillment_url, order_id, merchant_pub)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (instance_id, session_id, fulfillment_url)
            DO UPDATE SET order_id = excluded.order_id, merchant_pub = excluded.merchant_pub,
                updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(instance)
    .bind(session_id)
    .bind(fulfillment_url)
    .bind(order_id)
    .bind(merchant_pub)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_session_payment(
    instance: &InstanceId,
    session_id: &str,
    fulfillment_url: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<SessionPayment>, MerchantDbError> {
    let row = sqlx::query(
        "SELECT session_id, fulfillment_url, order_id FROM sessions WHERE instance_id = $1 AND session_id = $2 AND \
         fulfillment_url = $3",
    )
    .bind(instance)
    .bind(session_id)
    .bind(fulfillment_url)
    .fetch_optional(conn)
    .await?;
    row.map(|r| {
        Ok(SessionPayment {
            session_id: r.try_get("session_id")?,
            fulfillment_url: r.try_get("fulfillment_url")?,
            order_id: r.try_get("order_id")?,
        })
    })
    .transpose()
}

pub async fn is_paid_in_session(
    instance: &InstanceId,
    session_id: &str,
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<bool, MerchantDbError> {
    let found = sqlx::query("SELECT 1 FROM sessions WHERE instance_id = $1 AND session_id = $2 AND order_id = $3")
        .bind(instance)
        .bind(session_id)
        .bind(order_id)
        .fetch_optional(conn)
        .await?;
    Ok(found.is_some())
}
