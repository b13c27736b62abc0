use crate::traits::{
    InstanceManagement,
    OrderManagement,
    PaymentManagement,
    RefundManagement,
    TipManagement,
    TransferManagement,
};

/// The full storage interface of the merchant backend.
#[allow(async_fn_in_trait)]
pub trait MerchantDatabase:
    InstanceManagement + OrderManagement + PaymentManagement + RefundManagement + TransferManagement + TipManagement
{
    /// The URL of the database
    fn url(&self) -> &str;

    /// Close all connections. Further calls will fail.
    async fn close(&mut self) -> Result<(), crate::traits::MerchantDbError>;
}
