use log::debug;
use merchant_common::Amount;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{
    crypto::{EddsaPublicKey, EddsaSignature, HashCode},
    db_types::{RefundExchangeStatus, RefundRecord},
    traits::MerchantDbError,
};

fn refund_from_row(row: &SqliteRow) -> Result<RefundRecord, MerchantDbError> {
    let exchange_pub: Option<EddsaPublicKey> = row.try_get("exchange_pub")?;
    let exchange_sig: Option<EddsaSignature> = row.try_get("exchange_sig")?;
    let http_status: Option<i64> = row.try_get("exchange_http_status")?;
    let status = match (exchange_pub, exchange_sig, http_status) {
        (Some(exchange_pub), Some(exchange_sig), _) => RefundExchangeStatus::Confirmed { exchange_pub, exchange_sig },
        (_, _, Some(status)) => {
            let code: Option<i64> = row.try_get("exchange_code")?;
            let reply: Option<String> = row.try_get("exchange_reply")?;
            let reply = reply.map(|r| serde_json::from_str(&r)).transpose()?.unwrap_or(Value::Null);
            RefundExchangeStatus::Failed {
                http_status: u16::try_from(status).unwrap_or(0),
                code: code.and_then(|c| u32::try_from(c).ok()),
                reply,
            }
        },
        _ => RefundExchangeStatus::Pending,
    };
    let rtransaction_id: i64 = row.try_get("rtransaction_id")?;
    Ok(RefundRecord {
        row_id: row.try_get("row_id")?,
        h_contract_terms: row.try_get("h_contract_terms")?,
        coin_pub: row.try_get("coin_pub")?,
        exchange_url: row.try_get("exchange_url")?,
        rtransaction_id: u64::try_from(rtransaction_id).unwrap_or_default(),
        refund_amount: row.try_get("refund_amount")?,
        refund_fee: row.try_get("refund_fee")?,
        reason: row.try_get("reason")?,
        status,
    })
}

pub async fn fetch_refunds(
    h_contract_terms: &HashCode,
    conn: &mut SqliteConnection,
) -> Result<Vec<RefundRecord>, MerchantDbError> {
    let rows = sqlx::query("SELECT * FROM refunds WHERE h_contract_terms = $1 ORDER BY row_id")
        .bind(h_contract_terms)
        .fetch_all(conn)
        .await?;
    rows.iter().map(refund_from_row).collect()
}

pub async fn next_rtransaction_id(
    h_contract_terms: &HashCode,
    conn: &mut SqliteConnection,
) -> Result<i64, MerchantDbError> {
    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(rtransaction_id) FROM refunds WHERE h_contract_terms = $1")
        .bind(h_contract_terms)
        .fetch_one(conn)
        .await?;
    Ok(max.unwrap_or(0) + 1)
}

pub struct NewRefund<'a> {
    pub h_contract_terms: &'a HashCode,
    pub coin_pub: &'a EddsaPublicKey,
    pub exchange_url: &'a str,
    pub rtransaction_id: i64,
    pub refund_amount: &'a Amount,
    pub refund_fee: &'a Amount,
    pub reason: &'a str,
}

pub async fn insert_refund(refund: NewRefund<'_>, conn: &mut SqliteConnection) -> Result<(), MerchantDbError> {
    sqlx::query(
        r#"
            INSERT INTO refunds (
                h_contract_terms,
                coin_pub,
                exchange_url,
                rtransaction_id,
                refund_amount,
                refund_fee,
                reason
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(refund.h_contract_terms)
    .bind(refund.coin_pub)
    .bind(refund.exchange_url)
    .bind(refund.rtransaction_id)
    .bind(refund.refund_amount)
    .bind(refund.refund_fee)
    .bind(refund.reason)
    .execute(conn)
    .await?;
    debug!(
        "🗃️ Refund #{} of {} on coin {} recorded",
        refund.rtransaction_id, refund.refund_amount, refund.coin_pub
    );
    Ok(())
}

pub async fn update_status(
    row_id: i64,
    status: &RefundExchangeStatus,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    let query = match status {
        RefundExchangeStatus::Pending => sqlx::query(
            "UPDATE refunds SET exchange_pub = NULL, exchange_sig = NULL, exchange_http_status = NULL, exchange_code \
             = NULL, exchange_reply = NULL WHERE row_id = $1",
        )
        .bind(row_id),
        RefundExchangeStatus::Confirmed { exchange_pub, exchange_sig } => sqlx::query(
            "UPDATE refunds SET exchange_pub = $1, exchange_sig = $2, exchange_http_status = 200 WHERE row_id = $3",
        )
        .bind(*exchange_pub)
        .bind(*exchange_sig)
        .bind(row_id),
        RefundExchangeStatus::Failed { http_status, code, reply } => sqlx::query(
            "UPDATE refunds SET exchange_http_status = $1, exchange_code = $2, exchange_reply = $3 WHERE row_id = $4",
        )
        .bind(i64::from(*http_status))
        .bind(code.map(i64::from))
        .bind(reply.to_string())
        .bind(row_id),
    };
    query.execute(conn).await?;
    Ok(())
}
