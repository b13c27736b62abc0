use merchant_common::Amount;

use crate::{
    db_types::{InstanceId, OrderId, RefundExchangeStatus, RefundIncreaseOutcome, RefundRecord},
    crypto::HashCode,
    traits::MerchantDbError,
};

#[allow(async_fn_in_trait)]
pub trait RefundManagement {
    /// Raises the total refund for an order to `refund`, in a single transaction.
    ///
    /// The increase over the current total is spread across the contract's coins in deposit order, each coin capped at
    /// its deposited value minus earlier refunds. One new refund row is written per
    /// coin that receives part of the increase; all rows of one increase share a fresh `rtransaction_id`.
    async fn increase_refund(
        &self,
        instance: &InstanceId,
        order_id: &OrderId,
        refund: &Amount,
        reason: &str,
    ) -> Result<RefundIncreaseOutcome, MerchantDbError>;

    async fn fetch_refunds(&self, h_contract_terms: &HashCode) -> Result<Vec<RefundRecord>, MerchantDbError>;

    async fn update_refund_status(&self, row_id: i64, status: &RefundExchangeStatus) -> Result<(), MerchantDbError>;
}
