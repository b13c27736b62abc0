//! Value types shared by the merchant engine and the HTTP backend: amounts, timestamps, Crockford base32 and the
//! numeric error codes returned to clients.
mod amount;
pub mod crockford;
mod error_codes;
pub mod helpers;
pub mod op;
mod secret;
mod time;

pub use amount::{Amount, AmountError, CURRENCY_LEN, FRACTION_BASE, FRACTION_DIGITS, MAX_AMOUNT_VALUE};
pub use error_codes::ErrorCode;
pub use secret::Secret;
pub use time::{RelativeTime, Timestamp};
