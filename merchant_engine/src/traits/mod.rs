//! # Storage interface
//!
//! The traits in this module are the query interface the payment coordination layer needs from its storage engine.
//! The engine never touches SQL directly; backends (currently only [`crate::SqliteDatabase`]) implement these traits.
//!
//! * [`InstanceManagement`] covers merchant instances, their wire accounts and product inventory.
//! * [`OrderManagement`] stores unclaimed orders and the contract terms they turn into when claimed.
//! * [`PaymentManagement`] records accepted coin deposits, paid flags and session purchases.
//! * [`RefundManagement`] tracks refund authorizations and the exchange's answers to them.
//! * [`TransferManagement`] caches wire transfer proofs and the coins they settle.
//! * [`TipManagement`] manages tip reserves, authorized tips and pickups.
//!
//! [`MerchantDatabase`] ties them all together.
mod errors;
mod instance_management;
mod merchant_database;
mod order_management;
mod payment_management;
mod refund_management;
mod tip_management;
mod transfer_management;

pub use errors::MerchantDbError;
pub use instance_management::InstanceManagement;
pub use merchant_database::MerchantDatabase;
pub use order_management::OrderManagement;
pub use payment_management::PaymentManagement;
pub use refund_management::RefundManagement;
pub use tip_management::TipManagement;
pub use transfer_management::TransferManagement;
