//! # Merchant engine public API
//!
//! The `api` module exposes the programmatic API of the merchant engine. Each API groups the operations of one part of
//! the payment life cycle and asks only for the storage traits (and, where needed, the [`ExchangeClient`]) it uses:
//!
//! * [`instance_api`] manages merchant instances and their product inventory.
//! * [`order_api`] creates orders, lets wallets claim them and lists them for the merchant.
//! * [`payment_api`] accepts coins from wallets and forwards them to the exchanges, or hands out refund permissions
//!   when a wallet aborts a payment.
//! * [`status_api`] answers "has this order been paid?" for merchants and wallets, optionally as a long poll.
//! * [`refund_api`] grants refunds and reports the exchange's view of them to the wallet.
//! * [`tracking_api`] asks the exchanges which wire transfers settled an order, and what a wire transfer contained.
//! * [`tip_api`] authorizes tips from an exchange reserve and lets wallets pick them up.
//!
//! The `*_objects` submodules hold the request and response types.
//!
//! # API usage
//!
//! Every API is created from a database backend that implements the storage traits it needs:
//!
//! ```rust,ignore
//! use merchant_engine::{api::OrderApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url("sqlite://merchant.db", 25).await?;
//! let api = OrderApi::new(db, settings, pollers);
//! let response = api.create_order(&instance_id, &urls, request).await?;
//! ```
//!
//! APIs that talk to exchanges additionally take an `Arc` of an [`ExchangeClient`] implementation, usually
//! [`crate::exchange::HttpExchangeClient`].
//!
//! [`ExchangeClient`]: crate::exchange::ExchangeClient

pub mod errors;
pub mod instance_api;
pub mod normalize;
pub mod order_api;
pub mod order_objects;
pub mod payment_api;
pub mod payment_objects;
pub mod refund_api;
pub mod status_api;
pub mod tip_api;
pub mod tip_objects;
pub mod tracking_api;

pub use errors::*;
pub use instance_api::InstanceApi;
pub use order_api::OrderApi;
pub use payment_api::PaymentApi;
pub use refund_api::RefundApi;
pub use status_api::StatusApi;
pub use tip_api::TipApi;
pub use tracking_api::TrackingApi;

use crate::{
    crypto::ShortHash,
    db_types::{Instance, InstanceId},
    long_poll::LongPollRegistry,
    traits::{InstanceManagement, MerchantDbError},
};

/// The long-poll registries shared by every API. Payments are keyed by order and merchant, order listings by instance.
#[derive(Clone, Default)]
pub struct PollRegistries {
    pub payments: LongPollRegistry<ShortHash>,
    pub orders: LongPollRegistry<InstanceId>,
}

impl PollRegistries {
    pub fn cancel_all(&self) {
        self.payments.cancel_all();
        self.orders.cancel_all();
    }
}

/// Fetches an instance that can still sign. Instances deleted without purging are treated as unknown.
pub(crate) async fn active_instance<B>(db: &B, id: &InstanceId) -> Result<Option<Instance>, MerchantDbError>
where B: InstanceManagement {
    Ok(db.fetch_instance(id).await?.filter(Instance::is_active))
}
