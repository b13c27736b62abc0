use log::debug;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::json_column;
use crate::{crypto::HashCode, db_types::DepositRecord, traits::MerchantDbError};

fn deposit_from_row(row: &SqliteRow) -> Result<DepositRecord, MerchantDbError> {
    Ok(DepositRecord {
        h_contract_terms: row.try_get("h_contract_terms")?,
        coin_pub: row.try_get("coin_pub")?,
        exchange_url: row.try_get("exchange_url")?,
        amount_with_fee: row.try_get("amount_with_fee")?,
        deposit_fee: row.try_get("deposit_fee")?,
        refund_fee: row.try_get("refund_fee")?,
        wire_fee: row.try_get("wire_fee")?,
        exchange_pub: row.try_get("exchange_pub")?,
        exchange_sig: row.try_get("exchange_sig")?,
        exchange_proof: json_column(row, "exchange_proof")?,
    })
}

/// All deposits for a contract, in the order they were accepted.
pub async fn fetch_deposits(
    h_contract_terms: &HashCode,
    conn: &mut SqliteConnection,
) -> Result<Vec<DepositRecord>, MerchantDbError> {
    let rows = sqlx::query("SELECT * FROM deposits WHERE h_contract_terms = $1 ORDER BY id")
        .bind(h_contract_terms)
        .fetch_all(conn)
        .await?;
    rows.iter().map(deposit_from_row).collect()
}

/// Inserts a deposit, returning `false` if the coin was already recorded for the contract.
pub async fn idempotent_insert(deposit: DepositRecord, conn: &mut SqliteConnection) -> Result<bool, MerchantDbError> {
    let res = sqlx::query(
        r#"
            INSERT INTO deposits (
                h_contract_terms,
                coin_pub,
                exchange_url,
                amount_with_fee,
                deposit_fee,
                refund_fee,
                wire_fee,
                exchange_pub,
                exchange_sig,
                exchange_proof
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (h_contract_terms, coin_pub) DO NOTHING
        "#,
    )
    .bind(deposit.h_contract_terms)
    .bind(deposit.coin_pub)
    .bind(&deposit.exchange_url)
    .bind(&deposit.amount_with_fee)
    .bind(&deposit.deposit_fee)
    .bind(&deposit.refund_fee)
    .bind(&deposit.wire_fee)
    .bind(deposit.exchange_pub)
    .bind(deposit.exchange_sig)
    .bind(deposit.exchange_proof.to_string())
    .execute(conn)
    .await?;
    let inserted = res.rows_affected() > 0;
    if inserted {
        debug!("🗃️ Deposit of coin {} for {} stored", deposit.coin_pub, deposit.h_contract_terms);
    }
    Ok(inserted)
}
