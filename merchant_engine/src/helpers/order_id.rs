use chrono::Local;
use merchant_common::crockford;

use crate::db_types::OrderId;

/// Generates an order id of the form `YYYY.DDD-<base32 of a random u64>`, using the local calendar day.
pub fn new_order_id() -> OrderId {
    let day = Local::now().format("%Y.%j");
    let suffix = crockford::encode(&rand::random::<u64>().to_be_bytes());
    OrderId(format!("{day}-{suffix}"))
}
