//! # Exchange client
//!
//! Everything the merchant needs from an exchange goes through the [`ExchangeClient`] trait:
//! * `/keys` and `/wire` to learn the exchange's denominations, signing keys, auditors and wire fees;
//! * `/deposit` to cash in a customer's coin;
//! * `/deposits/..` and `/transfers/..` to find out which wire transfer settled a deposit;
//! * `/coins/{coin_pub}/refund` to execute a refund;
//! * `/reserves/..` to check tip reserve balances and to withdraw tip coins.
//!
//! [`HttpExchangeClient`] is the production implementation on top of `reqwest`. It caches `/keys` and `/wire`
//! replies per exchange for a configurable time.
mod cache;
mod client;
mod errors;
mod http_client;
mod types;

pub use cache::TtlCache;
pub use client::ExchangeClient;
pub use errors::{ExchangeError, ExchangeRejection};
pub use http_client::{HttpExchangeClient, DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_KEYS_CACHE_TTL};
pub use types::*;
