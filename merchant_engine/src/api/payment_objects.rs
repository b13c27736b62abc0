use std::fmt::Display;

use merchant_common::{Amount, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    crypto::{Blob, EddsaPublicKey, EddsaSignature, HashCode, WireTransferId},
    db_types::OrderId,
};

//--------------------------------------         Pay          ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayMode {
    Pay,
    AbortRefund,
}

impl std::str::FromStr for PayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pay" => Ok(PayMode::Pay),
            "abort-refund" => Ok(PayMode::AbortRefund),
            other => Err(other.to_string()),
        }
    }
}

impl Display for PayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayMode::Pay => f.write_str("pay"),
            PayMode::AbortRefund => f.write_str("abort-refund"),
        }
    }
}

/// One coin a wallet spends towards a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinPaymentDetails {
    /// The coin's contribution to the payment, including the deposit fee
    pub contribution: Amount,
    pub coin_pub: EddsaPublicKey,
    pub exchange_url: String,
    pub denom_pub: Blob,
    pub ub_sig: Blob,
    pub coin_sig: EddsaSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayRequest {
    #[serde(default = "default_mode")]
    pub mode: String,
    pub order_id: OrderId,
    pub merchant_pub: EddsaPublicKey,
    pub coins: Vec<CoinPaymentDetails>,
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_mode() -> String {
    PayMode::Pay.to_string()
}

/// Proof for the wallet that the merchant considers the contract paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayResponse {
    pub sig: EddsaSignature,
    #[serde(skip)]
    pub h_contract_terms: Option<HashCode>,
}

/// A merchant-signed permission for the exchange to refund a coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPermission {
    pub coin_pub: EddsaPublicKey,
    pub rtransaction_id: u64,
    pub refund_amount: Amount,
    pub refund_fee: Amount,
    pub merchant_sig: EddsaSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortRefundResponse {
    pub merchant_pub: EddsaPublicKey,
    pub h_contract_terms: HashCode,
    pub refund_permissions: Vec<RefundPermission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PayResult {
    Paid(PayResponse),
    Aborted(AbortRefundResponse),
}

//--------------------------------------       Refunds        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundIncreaseRequest {
    pub order_id: OrderId,
    pub refund: Amount,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundIncreaseResponse {
    pub h_contract_terms: HashCode,
    pub taler_refund_url: String,
}

/// One refund row as reported to the wallet, with the exchange's answer when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDetail {
    pub coin_pub: EddsaPublicKey,
    pub rtransaction_id: u64,
    pub refund_amount: Amount,
    pub refund_fee: Amount,
    /// 0 when the exchange could not be reached
    pub exchange_http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_pub: Option<EddsaPublicKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_sig: Option<EddsaSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_reply: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundLookupResponse {
    pub h_contract_terms: HashCode,
    pub merchant_pub: EddsaPublicKey,
    pub refunds: Vec<RefundDetail>,
}

//--------------------------------------       Tracking       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferredCoin {
    pub coin_pub: EddsaPublicKey,
    pub amount_with_fee: Amount,
    pub deposit_fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub exchange: String,
    pub wtid: WireTransferId,
    pub execution_time: Timestamp,
    pub amount: Amount,
    pub coins: Vec<TransferredCoin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTransactionResponse {
    pub transfers: Vec<TransferSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackTransactionResult {
    Settled(TrackTransactionResponse),
    /// The exchange has not executed the wire transfer yet. Its reply is relayed verbatim.
    Pending { exchange_url: String, reply: Value },
}
