mod order_id;
mod retry;
mod uris;

pub use order_id::new_order_id;
pub use retry::{with_retries, INSERT_RETRIES, RMW_RETRIES};
pub use uris::MerchantUrls;
