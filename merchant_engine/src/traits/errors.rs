use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerchantDbError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    /// A transient failure (the database was busy or locked). The operation may be retried as-is.
    #[error("Transient database error: {0}")]
    SoftError(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("Product {0} does not have enough stock")]
    OutOfStock(String),
    #[error("Stored data is inconsistent: {0}")]
    Inconsistent(String),
}

impl MerchantDbError {
    pub fn is_soft(&self) -> bool {
        matches!(self, MerchantDbError::SoftError(_))
    }
}

impl From<sqlx::Error> for MerchantDbError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return MerchantDbError::AlreadyExists(db_err.message().to_string());
                }
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes
                let busy = db_err.code().and_then(|c| c.parse::<i32>().ok()).map(|c| matches!(c & 0xff, 5 | 6));
                if busy.unwrap_or(false) || db_err.message().contains("database is locked") {
                    MerchantDbError::SoftError(db_err.message().to_string())
                } else {
                    MerchantDbError::DatabaseError(db_err.message().to_string())
                }
            },
            sqlx::Error::PoolTimedOut => MerchantDbError::SoftError(e.to_string()),
            _ => MerchantDbError::DatabaseError(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for MerchantDbError {
    fn from(e: serde_json::Error) -> Self {
        MerchantDbError::Inconsistent(format!("Stored JSON could not be parsed. {e}"))
    }
}
