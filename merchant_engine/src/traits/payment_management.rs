use crate::{
    crypto::HashCode,
    db_types::{DepositRecord, InstanceId, OrderId, SessionPayment},
    traits::MerchantDbError,
};

#[allow(async_fn_in_trait)]
pub trait PaymentManagement {
    async fn fetch_deposits(&self, h_contract_terms: &HashCode) -> Result<Vec<DepositRecord>, MerchantDbError>;

    /// Stores the accepted deposits and marks the contract as paid, all or nothing. Coins already recorded for the
    /// contract are skipped. Returns the number of newly stored deposits.
    async fn record_payment(
        &self,
        h_contract_terms: &HashCode,
        deposits: &[DepositRecord],
        session_id: Option<&str>,
    ) -> Result<usize, MerchantDbError>;

    /// Marks the contract as paid and, when a session is given, remembers that `fulfillment_url` was bought in that
    /// session with this order.
    async fn mark_contract_paid(
        &self,
        h_contract_terms: &HashCode,
        session_id: Option<&str>,
    ) -> Result<(), MerchantDbError>;

    /// The order most recently paid for `fulfillment_url` within `session_id`, if any.
    async fn fetch_session_payment(
        &self,
        instance: &InstanceId,
        session_id: &str,
        fulfillment_url: &str,
    ) -> Result<Option<SessionPayment>, MerchantDbError>;

    /// Whether `order_id` was paid within `session_id`.
    async fn is_paid_in_session(
        &self,
        instance: &InstanceId,
        session_id: &str,
        order_id: &OrderId,
    ) -> Result<bool, MerchantDbError>;
}
