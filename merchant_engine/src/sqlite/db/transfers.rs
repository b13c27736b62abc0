use log::debug;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::json_column;
use crate::{
    crypto::{HashCode, WireTransferId},
    db_types::{CoinTransfer, TransferProof},
    traits::MerchantDbError,
};

fn proof_from_row(row: &SqliteRow) -> Result<TransferProof, MerchantDbError> {
    Ok(TransferProof {
        exchange_url: row.try_get("exchange_url")?,
        wtid: row.try_get("wtid")?,
        execution_time: row.try_get("execution_time")?,
        exchange_pub: row.try_get("exchange_pub")?,
        exchange_sig: row.try_get("exchange_sig")?,
        total_amount: row.try_get("total_amount")?,
        wire_fee: row.try_get("wire_fee")?,
        h_wire: row.try_get("h_wire")?,
        merchant_pub: row.try_get("merchant_pub")?,
        proof: json_column(row, "proof")?,
    })
}

fn coin_transfer_from_row(row: &SqliteRow) -> Result<CoinTransfer, MerchantDbError> {
    Ok(CoinTransfer {
        h_contract_terms: row.try_get("h_contract_terms")?,
        coin_pub: row.try_get("coin_pub")?,
        wtid: row.try_get("wtid")?,
        exchange_url: row.try_get("exchange_url")?,
        deposit_value: row.try_get("deposit_value")?,
        deposit_fee: row.try_get("deposit_fee")?,
        execution_time: row.try_get("execution_time")?,
    })
}

pub async fn fetch_proof(
    exchange_url: &str,
    wtid: &WireTransferId,
    conn: &mut SqliteConnection,
) -> Result<Option<TransferProof>, MerchantDbError> {
    let row = sqlx::query("SELECT * FROM transfers WHERE exchange_url = $1 AND wtid = $2")
        .bind(exchange_url)
        .bind(wtid)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(proof_from_row).transpose()
}

pub async fn idempotent_insert_proof(proof: &TransferProof, conn: &mut SqliteConnection) -> Result<bool, MerchantDbError> {
    let res = sqlx::query(
        r#"
            INSERT INTO transfers (
                exchange_url,
                wtid,
                execution_time,
                exchange_pub,
                exchange_sig,
                total_amount,
                wire_fee,
                h_wire,
                merchant_pub,
                proof
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (exchange_url, wtid) DO NOTHING
        "#,
    )
    .bind(&proof.exchange_url)
    .bind(proof.wtid)
    .bind(proof.execution_time)
    .bind(proof.exchange_pub)
    .bind(proof.exchange_sig)
    .bind(&proof.total_amount)
    .bind(&proof.wire_fee)
    .bind(proof.h_wire)
    .bind(proof.merchant_pub)
    .bind(proof.proof.to_string())
    .execute(conn)
    .await?;
    let inserted = res.rows_affected() > 0;
    if inserted {
        debug!("🗃️ Transfer proof for {} from {} stored", proof.wtid, proof.exchange_url);
    }
    Ok(inserted)
}

pub async fn idempotent_insert_coin(coin: &CoinTransfer, conn: &mut SqliteConnection) -> Result<(), MerchantDbError> {
    sqlx::query(
        r#"
            INSERT INTO coin_transfers (
                h_contract_terms,
                coin_pub,
                wtid,
                exchange_url,
                deposit_value,
                deposit_fee,
                execution_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (h_contract_terms, coin_pub, wtid) DO NOTHING
        "#,
    )
    .bind(coin.h_contract_terms)
    .bind(coin.coin_pub)
    .bind(coin.wtid)
    .bind(&coin.exchange_url)
    .bind(&coin.deposit_value)
    .bind(&coin.deposit_fee)
    .bind(coin.execution_time)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_coin_transfers(
    h_contract_terms: &HashCode,
    conn: &mut SqliteConnection,
) -> Result<Vec<CoinTransfer>, MerchantDbError> {
    let rows = sqlx::query("SELECT * FROM coin_transfers WHERE h_contract_terms = $1")
        .bind(h_contract_terms)
        .fetch_all(conn)
        .await?;
    rows.iter().map(coin_transfer_from_row).collect()
}

pub async fn fetch_coin_transfers_by_wtid(
    exchange_url: &str,
    wtid: &WireTransferId,
    conn: &mut SqliteConnection,
) -> Result<Vec<CoinTransfer>, MerchantDbError> {
    let rows = sqlx::query("SELECT * FROM coin_transfers WHERE exchange_url = $1 AND wtid = $2")
        .bind(exchange_url)
        .bind(wtid)
        .fetch_all(conn)
        .await?;
    rows.iter().map(coin_transfer_from_row).collect()
}
