//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interactions are maintained by simple functions (rather than stateful structs) that accept a
//! `&mut SqliteConnection` argument. Callers can obtain a connection from a pool,
//! or create an atomic transaction as the need arises and call through to the functions without any other changes.
use std::{env, str::FromStr};

use log::info;
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Error as SqlxError,
    Row,
    SqlitePool,
};

use crate::traits::MerchantDbError;

pub mod contracts;
pub mod deposits;
pub mod instances;
pub mod orders;
pub mod products;
pub mod refunds;
pub mod sessions;
pub mod tips;
pub mod transfers;

pub const SQLITE_DB_URL: &str = "sqlite://data/merchant.db";

pub fn db_url() -> String {
    let result = env::var("MERCHANT_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ MERCHANT_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

/// Opens a connection pool, creating the database file if it does not exist yet.
pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    info!("🗃️ Opening database at {url}");
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

/// Reads a TEXT column holding JSON.
pub(crate) fn json_column(row: &SqliteRow, column: &str) -> Result<Value, MerchantDbError> {
    let text: String = row.try_get(column)?;
    Ok(serde_json::from_str(&text)?)
}

/// Reads a nullable TEXT column holding JSON.
pub(crate) fn optional_json_column(row: &SqliteRow, column: &str) -> Result<Option<Value>, MerchantDbError> {
    let text: Option<String> = row.try_get(column)?;
    Ok(text.map(|t| serde_json::from_str(&t)).transpose()?)
}

/// Parses a value that is stored in its string form but has no direct database mapping.
pub(crate) fn parse_stored<T>(value: &str, what: &str) -> Result<T, MerchantDbError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| MerchantDbError::Inconsistent(format!("Invalid {what} in database: {e}")))
}
