use log::{debug, trace};
use merchant_common::{Amount, Timestamp};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::{json_column, parse_stored};
use crate::{
    crypto::{Blob, EddsaPublicKey, HashCode},
    db_types::{NewTip, Tip, TipReserve},
    traits::MerchantDbError,
};

fn reserve_from_row(row: &SqliteRow) -> Result<TipReserve, MerchantDbError> {
    Ok(TipReserve {
        reserve_pub: row.try_get("reserve_pub")?,
        instance_id: row.try_get("instance_id")?,
        exchange_url: row.try_get("exchange_url")?,
        expiration: row.try_get("expiration")?,
        amount_authorized: row.try_get("amount_authorized")?,
        amount_picked_up: row.try_get("amount_picked_up")?,
    })
}

fn tip_from_row(row: &SqliteRow) -> Result<Tip, MerchantDbError> {
    Ok(Tip {
        tip_id: row.try_get("tip_id")?,
        instance_id: row.try_get("instance_id")?,
        reserve_pub: row.try_get("reserve_pub")?,
        exchange_url: row.try_get("exchange_url")?,
        justification: row.try_get("justification")?,
        amount_authorized: row.try_get("amount_authorized")?,
        amount_remaining: row.try_get("amount_remaining")?,
        expiration: row.try_get("expiration")?,
        extra: json_column(row, "extra")?,
        next_url: row.try_get("next_url")?,
        pickup_url: row.try_get("pickup_url")?,
    })
}

pub async fn fetch_reserve(
    reserve_pub: &EddsaPublicKey,
    conn: &mut SqliteConnection,
) -> Result<Option<TipReserve>, MerchantDbError> {
    let row = sqlx::query("SELECT * FROM tip_reserves WHERE reserve_pub = $1")
        .bind(reserve_pub)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(reserve_from_row).transpose()
}

/// Creates the reserve record if it does not exist yet and pushes its expiration out to `expiration` if that is
/// later than what is stored.
pub async fn upsert_reserve(
    tip: &NewTip,
    expiration: Timestamp,
    conn: &mut SqliteConnection,
) -> Result<TipReserve, MerchantDbError> {
    let zero = Amount::zero(tip.amount.currency());
    let row = sqlx::query(
        r#"
            INSERT INTO tip_reserves (reserve_pub, instance_id, exchange_url, expiration, amount_authorized, amount_picked_up)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (reserve_pub) DO UPDATE SET expiration = MAX(expiration, excluded.expiration)
            RETURNING *
        "#,
    )
    .bind(tip.reserve_pub)
    .bind(&tip.instance_id)
    .bind(&tip.exchange_url)
    .bind(expiration)
    .bind(&zero)
    .fetch_one(conn)
    .await?;
    reserve_from_row(&row)
}

pub async fn set_reserve_authorized(
    reserve_pub: &EddsaPublicKey,
    authorized: &Amount,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    sqlx::query("UPDATE tip_reserves SET amount_authorized = $1 WHERE reserve_pub = $2")
        .bind(authorized)
        .bind(reserve_pub)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn add_reserve_picked_up(
    reserve_pub: &EddsaPublicKey,
    amount: &Amount,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    let reserve = fetch_reserve(reserve_pub, &mut *conn)
        .await?
        .ok_or_else(|| MerchantDbError::NotFound(format!("Tip reserve {reserve_pub}")))?;
    let picked_up = reserve
        .amount_picked_up
        .checked_add(amount)
        .map_err(|e| MerchantDbError::Inconsistent(format!("Tip reserve {reserve_pub} totals: {e}")))?;
    sqlx::query("UPDATE tip_reserves SET amount_picked_up = $1 WHERE reserve_pub = $2")
        .bind(&picked_up)
        .bind(reserve_pub)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_tip(tip: &NewTip, tip_id: &HashCode, conn: &mut SqliteConnection) -> Result<Tip, MerchantDbError> {
    let row = sqlx::query(
        r#"
            INSERT INTO tips (
                tip_id,
                instance_id,
                reserve_pub,
                exchange_url,
                justification,
                amount_authorized,
                amount_remaining,
                expiration,
                extra,
                next_url,
                pickup_url
            ) VALUES ($1, $2, $3, $4, $5, $6, $6, $7, $8, $9, $10)
            RETURNING *
        "#,
    )
    .bind(tip_id)
    .bind(&tip.instance_id)
    .bind(tip.reserve_pub)
    .bind(&tip.exchange_url)
    .bind(&tip.justification)
    .bind(&tip.amount)
    .bind(tip.expiration)
    .bind(tip.extra.to_string())
    .bind(&tip.next_url)
    .bind(&tip.pickup_url)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Tip {tip_id} of {} authorized for instance {}", tip.amount, tip.instance_id);
    tip_from_row(&row)
}

pub async fn fetch_tip(tip_id: &HashCode, conn: &mut SqliteConnection) -> Result<Option<Tip>, MerchantDbError> {
    let row = sqlx::query("SELECT * FROM tips WHERE tip_id = $1").bind(tip_id).fetch_optional(conn).await?;
    row.as_ref().map(tip_from_row).transpose()
}

pub async fn set_tip_remaining(
    tip_id: &HashCode,
    remaining: &Amount,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    sqlx::query("UPDATE tips SET amount_remaining = $1 WHERE tip_id = $2")
        .bind(remaining)
        .bind(tip_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Returns the amount of a known pickup, or `None` if the pickup has not been seen before.
pub async fn fetch_pickup_amount(
    pickup_id: &HashCode,
    conn: &mut SqliteConnection,
) -> Result<Option<Amount>, MerchantDbError> {
    let amount: Option<String> = sqlx::query_scalar("SELECT amount FROM tip_pickups WHERE pickup_id = $1")
        .bind(pickup_id)
        .fetch_optional(conn)
        .await?;
    amount.map(|a| parse_stored::<Amount>(&a, "pickup amount")).transpose()
}

pub async fn insert_pickup(
    pickup_id: &HashCode,
    tip_id: &HashCode,
    amount: &Amount,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    sqlx::query("INSERT INTO tip_pickups (pickup_id, tip_id, amount) VALUES ($1, $2, $3)")
        .bind(pickup_id)
        .bind(tip_id)
        .bind(amount)
        .execute(conn)
        .await?;
    trace!("🗃️ Pickup {pickup_id} of {amount} started for tip {tip_id}");
    Ok(())
}

pub async fn fetch_pickup_signatures(
    pickup_id: &HashCode,
    conn: &mut SqliteConnection,
) -> Result<Vec<Blob>, MerchantDbError> {
    let sigs: Vec<String> =
        sqlx::query_scalar("SELECT blind_sig FROM tip_pickup_signatures WHERE pickup_id = $1 ORDER BY coin_offset")
            .bind(pickup_id)
            .fetch_all(conn)
            .await?;
    sigs.iter().map(|s| parse_stored::<Blob>(s, "blind signature")).collect()
}

pub async fn insert_pickup_signatures(
    pickup_id: &HashCode,
    blind_sigs: &[Blob],
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    for (offset, sig) in blind_sigs.iter().enumerate() {
        sqlx::query(
            "INSERT INTO tip_pickup_signatures (pickup_id, coin_offset, blind_sig) VALUES ($1, $2, $3) ON CONFLICT \
             (pickup_id, coin_offset) DO NOTHING",
        )
        .bind(pickup_id)
        .bind(offset as i64)
        .bind(sig.to_string())
        .execute(&mut *conn)
        .await?;
    }
    debug!("🗃️ {} blind signature(s) stored for pickup {pickup_id}", blind_sigs.len());
    Ok(())
}
