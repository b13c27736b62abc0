use log::{debug, trace};
use merchant_common::{RelativeTime, Secret};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::{optional_json_column, parse_stored};
use crate::{
    crypto::{EddsaPrivateKey, EddsaPublicKey, HashCode},
    db_types::{Instance, InstanceId, InstancePatch, NewInstance, WireAccount},
    traits::MerchantDbError,
};

fn secret_key_column(row: &SqliteRow, column: &str) -> Result<Option<Secret<EddsaPrivateKey>>, MerchantDbError> {
    let value: Option<String> = row.try_get(column)?;
    value.map(|v| parse_stored::<EddsaPrivateKey>(&v, column).map(Secret::new)).transpose()
}

fn instance_from_row(row: &SqliteRow) -> Result<Instance, MerchantDbError> {
    let amortization: i64 = row.try_get("default_wire_fee_amortization")?;
    Ok(Instance {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        merchant_pub: row.try_get("merchant_pub")?,
        merchant_priv: secret_key_column(row, "merchant_priv")?,
        address: optional_json_column(row, "address")?,
        jurisdiction: optional_json_column(row, "jurisdiction")?,
        default_max_deposit_fee: row.try_get("default_max_deposit_fee")?,
        default_max_wire_fee: row.try_get("default_max_wire_fee")?,
        default_wire_fee_amortization: u32::try_from(amortization.max(1)).unwrap_or(1),
        default_pay_delay: RelativeTime::from_millis(row.try_get("default_pay_delay")?),
        default_wire_transfer_delay: RelativeTime::from_millis(row.try_get("default_wire_transfer_delay")?),
        tip_exchange: row.try_get("tip_exchange")?,
        tip_reserve_priv: secret_key_column(row, "tip_reserve_priv")?,
        accounts: vec![],
        created_at: row.try_get("created_at")?,
    })
}

pub async fn fetch_accounts(id: &InstanceId, conn: &mut SqliteConnection) -> Result<Vec<WireAccount>, MerchantDbError> {
    let rows = sqlx::query("SELECT payto_uri, salt, h_wire, active FROM instance_accounts WHERE instance_id = $1 ORDER BY id")
        .bind(id)
        .fetch_all(conn)
        .await?;
    rows.iter()
        .map(|row| {
            Ok(WireAccount {
                payto_uri: row.try_get("payto_uri")?,
                salt: row.try_get::<HashCode, _>("salt")?,
                h_wire: row.try_get::<HashCode, _>("h_wire")?,
                active: row.try_get("active")?,
            })
        })
        .collect()
}

pub async fn fetch_instance(id: &InstanceId, conn: &mut SqliteConnection) -> Result<Option<Instance>, MerchantDbError> {
    let row = sqlx::query("SELECT * FROM instances WHERE id = $1").bind(id).fetch_optional(&mut *conn).await?;
    match row {
        None => Ok(None),
        Some(row) => {
            let mut instance = instance_from_row(&row)?;
            instance.accounts = fetch_accounts(id, conn).await?;
            Ok(Some(instance))
        },
    }
}

pub async fn fetch_instances(conn: &mut SqliteConnection) -> Result<Vec<Instance>, MerchantDbError> {
    let rows = sqlx::query("SELECT * FROM instances ORDER BY id").fetch_all(&mut *conn).await?;
    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let mut instance = instance_from_row(&row)?;
        instance.accounts = fetch_accounts(&instance.id, conn).await?;
        result.push(instance);
    }
    Ok(result)
}

async fn insert_account(
    id: &InstanceId,
    account: &WireAccount,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    sqlx::query(
        "INSERT INTO instance_accounts (instance_id, payto_uri, salt, h_wire, active) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(&account.payto_uri)
    .bind(account.salt)
    .bind(account.h_wire)
    .bind(account.active)
    .execute(conn)
    .await?;
    Ok(())
}

fn new_account(payto_uri: &str) -> Result<WireAccount, MerchantDbError> {
    WireAccount::new(payto_uri).map_err(|e| MerchantDbError::Inconsistent(format!("Could not hash wire account: {e}")))
}

/// Inserts a new instance and its wire accounts. Not atomic on its own; run it inside a transaction.
pub async fn insert_instance(
    instance: NewInstance,
    conn: &mut SqliteConnection,
) -> Result<EddsaPublicKey, MerchantDbError> {
    let private_key = instance.private_key.unwrap_or_else(EddsaPrivateKey::generate);
    let merchant_pub = private_key.public_key();
    let address = instance.address.as_ref().map(|v| v.to_string());
    let jurisdiction = instance.jurisdiction.as_ref().map(|v| v.to_string());
    sqlx::query(
        r#"
            INSERT INTO instances (
                id,
                name,
                merchant_pub,
                merchant_priv,
                address,
                jurisdiction,
                default_max_deposit_fee,
                default_max_wire_fee,
                default_wire_fee_amortization,
                default_pay_delay,
                default_wire_transfer_delay,
                tip_exchange,
                tip_reserve_priv
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(&instance.id)
    .bind(&instance.name)
    .bind(merchant_pub)
    .bind(private_key.to_string())
    .bind(address)
    .bind(jurisdiction)
    .bind(&instance.default_max_deposit_fee)
    .bind(&instance.default_max_wire_fee)
    .bind(i64::from(instance.default_wire_fee_amortization.max(1)))
    .bind(instance.default_pay_delay.millis())
    .bind(instance.default_wire_transfer_delay.millis())
    .bind(&instance.tip_exchange)
    .bind(instance.tip_reserve_priv.as_ref().map(|k| k.to_string()))
    .execute(&mut *conn)
    .await?;
    for payto in &instance.payto_uris {
        let account = new_account(payto)?;
        insert_account(&instance.id, &account, conn).await?;
    }
    debug!("🗃️ Instance {} created with {} account(s)", instance.id, instance.payto_uris.len());
    Ok(merchant_pub)
}

pub async fn update_instance(
    id: &InstanceId,
    patch: InstancePatch,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    let mut builder = sqlx::QueryBuilder::new("UPDATE instances SET ");
    let mut set_clause = builder.separated(", ");
    if let Some(name) = patch.name {
        set_clause.push("name = ");
        set_clause.push_bind_unseparated(name);
    }
    if let Some(address) = patch.address {
        set_clause.push("address = ");
        set_clause.push_bind_unseparated(address.to_string());
    }
    if let Some(jurisdiction) = patch.jurisdiction {
        set_clause.push("jurisdiction = ");
        set_clause.push_bind_unseparated(jurisdiction.to_string());
    }
    if let Some(fee) = patch.default_max_deposit_fee {
        set_clause.push("default_max_deposit_fee = ");
        set_clause.push_bind_unseparated(fee);
    }
    if let Some(fee) = patch.default_max_wire_fee {
        set_clause.push("default_max_wire_fee = ");
        set_clause.push_bind_unseparated(fee);
    }
    if let Some(amortization) = patch.default_wire_fee_amortization {
        set_clause.push("default_wire_fee_amortization = ");
        set_clause.push_bind_unseparated(i64::from(amortization.max(1)));
    }
    if let Some(delay) = patch.default_pay_delay {
        set_clause.push("default_pay_delay = ");
        set_clause.push_bind_unseparated(delay.millis());
    }
    if let Some(delay) = patch.default_wire_transfer_delay {
        set_clause.push("default_wire_transfer_delay = ");
        set_clause.push_bind_unseparated(delay.millis());
    }
    if let Some(exchange) = patch.tip_exchange {
        set_clause.push("tip_exchange = ");
        set_clause.push_bind_unseparated(exchange);
    }
    if let Some(key) = patch.tip_reserve_priv {
        set_clause.push("tip_reserve_priv = ");
        set_clause.push_bind_unseparated(key.to_string());
    }
    // Always touch a column so that the statement is valid even when only the accounts change
    set_clause.push("id = id");
    builder.push(" WHERE id = ");
    builder.push_bind(id);
    let res = builder.build().execute(&mut *conn).await?;
    if res.rows_affected() == 0 {
        return Err(MerchantDbError::NotFound(format!("Instance {id}")));
    }
    if let Some(uris) = patch.payto_uris {
        let existing = fetch_accounts(id, conn).await?;
        for account in &existing {
            let active = uris.contains(&account.payto_uri);
            sqlx::query("UPDATE instance_accounts SET active = $1 WHERE instance_id = $2 AND payto_uri = $3")
                .bind(active)
                .bind(id)
                .bind(&account.payto_uri)
                .execute(&mut *conn)
                .await?;
        }
        for uri in uris.iter().filter(|u| !existing.iter().any(|a| &a.payto_uri == *u)) {
            let account = new_account(uri)?;
            insert_account(id, &account, conn).await?;
        }
    }
    trace!("🗃️ Instance {id} updated");
    Ok(())
}

/// Removes the instance's signing key, leaving its history in place.
pub async fn revoke_instance_key(id: &InstanceId, conn: &mut SqliteConnection) -> Result<bool, MerchantDbError> {
    let res = sqlx::query("UPDATE instances SET merchant_priv = NULL WHERE id = $1").bind(id).execute(conn).await?;
    Ok(res.rows_affected() > 0)
}

/// Deletes the instance and every row that belongs to it. Run inside a transaction.
pub async fn purge_instance(id: &InstanceId, conn: &mut SqliteConnection) -> Result<bool, MerchantDbError> {
    let by_contract = [
        "DELETE FROM deposits WHERE h_contract_terms IN (SELECT h_contract_terms FROM contract_terms WHERE instance_id = $1)",
        "DELETE FROM refunds WHERE h_contract_terms IN (SELECT h_contract_terms FROM contract_terms WHERE instance_id = $1)",
        "DELETE FROM coin_transfers WHERE h_contract_terms IN (SELECT h_contract_terms FROM contract_terms WHERE \
         instance_id = $1)",
        "DELETE FROM transfers WHERE merchant_pub IN (SELECT merchant_pub FROM instances WHERE id = $1)",
        "DELETE FROM tip_pickup_signatures WHERE pickup_id IN (SELECT p.pickup_id FROM tip_pickups p JOIN tips t ON \
         p.tip_id = t.tip_id WHERE t.instance_id = $1)",
        "DELETE FROM tip_pickups WHERE tip_id IN (SELECT tip_id FROM tips WHERE instance_id = $1)",
        "DELETE FROM tips WHERE instance_id = $1",
        "DELETE FROM tip_reserves WHERE instance_id = $1",
        "DELETE FROM sessions WHERE instance_id = $1",
        "DELETE FROM contract_terms WHERE instance_id = $1",
        "DELETE FROM orders WHERE instance_id = $1",
        "DELETE FROM products WHERE instance_id = $1",
        "DELETE FROM instance_accounts WHERE instance_id = $1",
    ];
    for statement in by_contract {
        sqlx::query(statement).bind(id).execute(&mut *conn).await?;
    }
    let res = sqlx::query("DELETE FROM instances WHERE id = $1").bind(id).execute(&mut *conn).await?;
    debug!("🗃️ Instance {id} purged");
    Ok(res.rows_affected() > 0)
}
