//! Merchant Engine
//!
//! The merchant engine is the payment coordination core of the merchant backend. It lets a merchant sell goods for
//! digital cash: it turns orders into signed contracts, accepts coins from customers' wallets and deposits them with
//! the exchanges that issued them, and keeps track of refunds, wire transfers and tips. It is independent of the HTTP
//! server that exposes it.
//!
//! The library is divided into these main sections:
//! 1. Storage ([`mod@traits`] and [`mod@db_types`]). The engine talks to its database only through the storage
//!    traits. [`SqliteDatabase`] is the one backend shipped with the engine.
//! 2. The exchange client ([`mod@exchange`]). Every call the merchant makes to an exchange goes through the
//!    [`exchange::ExchangeClient`] trait, so the engine can be tested against a fake exchange.
//! 3. The public API ([`mod@api`]). One API object per part of the payment life cycle: orders, payments, payment
//!    status, refunds, tracking, tips and instance administration.
//!
//! Payment status requests can long-poll. The registry in [`mod@long_poll`] parks such requests until a payment or
//! refund for the order arrives, or until they time out.
//!
//! The engine also publishes events when an order is paid or a refund is increased (see [`mod@events`]), which
//! callers can hook into to perform custom actions.
mod sqlite;

pub mod api;
pub mod crypto;
pub mod db_types;
pub mod events;
pub mod exchange;
pub mod helpers;
pub mod long_poll;
pub mod settings;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use api::{InstanceApi, OrderApi, PaymentApi, PollRegistries, RefundApi, StatusApi, TipApi, TrackingApi};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    InstanceManagement,
    MerchantDatabase,
    MerchantDbError,
    OrderManagement,
    PaymentManagement,
    RefundManagement,
    TipManagement,
    TransferManagement,
};
