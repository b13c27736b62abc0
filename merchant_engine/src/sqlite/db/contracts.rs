use log::debug;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{
    crypto::{EddsaPublicKey, HashCode},
    db_types::{ContractTermsRecord, InstanceId, OrderId},
    traits::MerchantDbError,
};
use merchant_common::Timestamp;

fn contract_from_row(row: &SqliteRow) -> Result<ContractTermsRecord, MerchantDbError> {
    Ok(ContractTermsRecord {
        row_id: row.try_get("row_id")?,
        instance_id: row.try_get("instance_id")?,
        order_id: row.try_get("order_id")?,
        contract_text: row.try_get("contract_terms")?,
        h_contract_terms: row.try_get("h_contract_terms")?,
        merchant_pub: row.try_get("merchant_pub")?,
        nonce: row.try_get("nonce")?,
        timestamp: row.try_get("timestamp")?,
        fulfillment_url: row.try_get("fulfillment_url")?,
        paid: row.try_get("paid")?,
        wired: row.try_get("wired")?,
        last_session_id: row.try_get("last_session_id")?,
    })
}

pub async fn fetch_contract_terms(
    instance: &InstanceId,
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<ContractTermsRecord>, MerchantDbError> {
    let row = sqlx::query("SELECT * FROM contract_terms WHERE instance_id = $1 AND order_id = $2")
        .bind(instance)
        .bind(order_id)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(contract_from_row).transpose()
}

pub async fn fetch_contract_terms_by_hash(
    h_contract_terms: &HashCode,
    conn: &mut SqliteConnection,
) -> Result<Option<ContractTermsRecord>, MerchantDbError> {
    let row = sqlx::query("SELECT * FROM contract_terms WHERE h_contract_terms = $1")
        .bind(h_contract_terms)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(contract_from_row).transpose()
}

/// The subset of a contract needed to store it.
pub struct NewContractTerms<'a> {
    pub instance_id: &'a InstanceId,
    pub order_id: &'a OrderId,
    pub contract_text: &'a str,
    pub h_contract_terms: &'a HashCode,
    pub merchant_pub: &'a EddsaPublicKey,
    pub nonce: &'a str,
    pub timestamp: Timestamp,
    pub fulfillment_url: &'a str,
}

pub async fn insert_contract_terms(
    contract: NewContractTerms<'_>,
    conn: &mut SqliteConnection,
) -> Result<ContractTermsRecord, MerchantDbError> {
    let row = sqlx::query(
        r#"
            INSERT INTO contract_terms (
                instance_id,
                order_id,
                contract_terms,
                h_contract_terms,
                merchant_pub,
                nonce,
                timestamp,
                fulfillment_url
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
        "#,
    )
    .bind(contract.instance_id)
    .bind(contract.order_id)
    .bind(contract.contract_text)
    .bind(contract.h_contract_terms)
    .bind(contract.merchant_pub)
    .bind(contract.nonce)
    .bind(contract.timestamp)
    .bind(contract.fulfillment_url)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Contract terms for order [{}] stored as {}", contract.order_id, contract.h_contract_terms);
    contract_from_row(&row)
}

pub async fn mark_paid(
    h_contract_terms: &HashCode,
    session_id: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<bool, MerchantDbError> {
    let res = sqlx::query(
        "UPDATE contract_terms SET paid = TRUE, last_session_id = COALESCE($1, last_session_id) WHERE h_contract_terms \
         = $2",
    )
    .bind(session_id)
    .bind(h_contract_terms)
    .execute(conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn mark_wired(h_contract_terms: &HashCode, conn: &mut SqliteConnection) -> Result<(), MerchantDbError> {
    sqlx::query("UPDATE contract_terms SET wired = TRUE WHERE h_contract_terms = $1")
        .bind(h_contract_terms)
        .execute(conn)
        .await?;
    Ok(())
}
