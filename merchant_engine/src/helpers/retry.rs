use std::future::Future;

use log::warn;

use crate::traits::MerchantDbError;

/// How often a plain insert is attempted before a soft error is reported.
pub const INSERT_RETRIES: usize = 3;
/// How often a read-modify-write transaction is attempted before a soft error is reported.
pub const RMW_RETRIES: usize = 5;

/// Runs `op` until it succeeds, fails with a hard error, or has failed softly `max_attempts` times.
pub async fn with_retries<T, F, Fut>(max_attempts: usize, mut op: F) -> Result<T, MerchantDbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MerchantDbError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_soft() && attempt < max_attempts => {
                warn!("🗃️ Soft database error on attempt {attempt} of {max_attempts}: {e}. Retrying.");
                attempt += 1;
            },
            result => return result,
        }
    }
}
