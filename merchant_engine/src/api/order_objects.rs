use merchant_common::{Amount, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    crypto::{EddsaPublicKey, EddsaSignature, HashCode, Nonce},
    db_types::{ContractTermsRecord, InventoryClaim, OrderId, OrderSummary},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostOrderRequest {
    pub order: Value,
    #[serde(default)]
    pub inventory_products: Vec<InventoryClaim>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostOrderResponse {
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub nonce: Nonce,
}

/// Signed contract terms, as handed to the wallet that claimed the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub contract_terms: Value,
    pub sig: EddsaSignature,
    #[serde(skip)]
    pub h_contract_terms: Option<HashCode>,
}

/// The fields of stored contract terms the payment flow works with.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractTermsView {
    pub amount: Amount,
    pub max_fee: Amount,
    pub max_wire_fee: Amount,
    pub wire_fee_amortization: u32,
    pub h_wire: HashCode,
    pub wire_method: String,
    pub timestamp: Timestamp,
    pub refund_deadline: Timestamp,
    pub pay_deadline: Timestamp,
    pub wire_transfer_deadline: Timestamp,
    pub merchant_pub: EddsaPublicKey,
    pub fulfillment_url: String,
}

impl ContractTermsView {
    pub fn from_record(record: &ContractTermsRecord) -> Result<Self, serde_json::Error> {
        serde_json::from_str(&record.contract_text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderSummary>,
}

//--------------------------------------    Payment status    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaidStatus {
    pub paid: bool,
    pub refunded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<Amount>,
    /// Only returned by the merchant-facing check-payment endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_terms: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnpaidStatus {
    pub paid: bool,
    pub taler_pay_uri: String,
    pub contract_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_paid_order_id: Option<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PaymentStatus {
    Paid(PaidStatus),
    Unpaid(UnpaidStatus),
}

impl PaymentStatus {
    pub fn is_paid(&self) -> bool {
        matches!(self, PaymentStatus::Paid(_))
    }
}

/// Which contract a status request refers to.
#[derive(Debug, Clone)]
pub enum StatusQuery {
    /// Merchant-side check by order id. The reply includes the contract terms once paid.
    CheckPayment,
    /// Wallet-side poll. The contract hash binds the poll to one specific contract.
    PollPayment { h_contract: HashCode },
}

/// The parameters shared by check-payment and poll-payment.
#[derive(Debug, Clone)]
pub struct StatusRequest {
    pub order_id: OrderId,
    pub query: StatusQuery,
    pub session_id: Option<String>,
    pub contract_url: Option<String>,
    /// When set, a paid order only counts as settled once its refunds exceed this amount.
    pub min_refund: Option<Amount>,
    pub timeout: std::time::Duration,
}
