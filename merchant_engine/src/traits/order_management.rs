use crate::{
    crypto::{HashCode, Nonce},
    db_types::{
        ClaimOutcome,
        ContractTermsRecord,
        InstanceId,
        InventoryClaim,
        NewOrderRecord,
        OrderId,
        OrderListFilter,
        OrderRecord,
        OrderSummary,
    },
    traits::MerchantDbError,
};

#[allow(async_fn_in_trait)]
pub trait OrderManagement {
    /// Stores a new unclaimed order and, in the same transaction, takes the `inventory` out of stock.
    ///
    /// Fails with `AlreadyExists` if the order id is taken for the instance and with `OutOfStock` if any product does
    /// not have enough units left. Returns the order's row id.
    async fn insert_order(&self, order: NewOrderRecord, inventory: &[InventoryClaim]) -> Result<i64, MerchantDbError>;

    /// Fetches an order from the orders table. The row stays there after the order is claimed.
    async fn fetch_order(&self, instance: &InstanceId, order_id: &OrderId) -> Result<Option<OrderRecord>, MerchantDbError>;

    async fn fetch_contract_terms(
        &self,
        instance: &InstanceId,
        order_id: &OrderId,
    ) -> Result<Option<ContractTermsRecord>, MerchantDbError>;

    async fn fetch_contract_terms_by_hash(
        &self,
        h_contract_terms: &HashCode,
    ) -> Result<Option<ContractTermsRecord>, MerchantDbError>;

    /// Atomically binds an order to `nonce`:
    /// 1. If contract terms exist for the order, succeed only when their nonce equals `nonce` (nothing is written).
    /// 2. Otherwise the order is read, `nonce` is injected and the result is stored as contract terms together with
    ///    its canonical hash.
    async fn claim_order(
        &self,
        instance: &InstanceId,
        order_id: &OrderId,
        nonce: &Nonce,
    ) -> Result<ClaimOutcome, MerchantDbError>;

    async fn list_orders(
        &self,
        instance: &InstanceId,
        filter: &OrderListFilter,
    ) -> Result<Vec<OrderSummary>, MerchantDbError>;
}
