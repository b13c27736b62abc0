use std::fmt::Display;

use chrono::{DateTime, Utc};
use merchant_common::{Amount, RelativeTime, Secret, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Type;

use crate::crypto::{
    hash_json,
    Blob,
    CryptoError,
    EddsaPrivateKey,
    EddsaPublicKey,
    EddsaSignature,
    HashCode,
    WireTransferId,
};

//--------------------------------------       OrderId        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

//--------------------------------------      InstanceId      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub const DEFAULT: &'static str = "default";

    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn default_instance() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

//--------------------------------------     WireAccount      ---------------------------------------------------------
/// A bank account the merchant can be paid into. `h_wire` commits to the account and its salt and is what the
/// exchange sees in deposits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAccount {
    pub payto_uri: String,
    pub salt: HashCode,
    pub h_wire: HashCode,
    pub active: bool,
}

impl WireAccount {
    /// Creates an active account for `payto_uri` with a fresh random salt.
    pub fn new(payto_uri: &str) -> Result<Self, CryptoError> {
        let salt = HashCode::random();
        let h_wire = Self::compute_h_wire(payto_uri, &salt)?;
        Ok(Self { payto_uri: payto_uri.to_string(), salt, h_wire, active: true })
    }

    pub fn compute_h_wire(payto_uri: &str, salt: &HashCode) -> Result<HashCode, CryptoError> {
        hash_json(&serde_json::json!({ "payto_uri": payto_uri, "salt": salt }))
    }

    /// The wire method is the authority part of the payto URI, e.g. `x-taler-bank` for
    /// `payto://x-taler-bank/bank.example.com/42`.
    pub fn wire_method(&self) -> Option<&str> {
        wire_method_of(&self.payto_uri)
    }
}

pub fn wire_method_of(payto_uri: &str) -> Option<&str> {
    payto_uri.strip_prefix("payto://").and_then(|rest| rest.split('/').next()).filter(|m| !m.is_empty())
}

//--------------------------------------       Instance       ---------------------------------------------------------
/// A merchant identity as held in storage.
///
/// `merchant_priv` is `None` once the instance has been deleted without purging; such an instance can no longer sign
/// and is treated as unknown by every public operation.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub merchant_pub: EddsaPublicKey,
    pub merchant_priv: Option<Secret<EddsaPrivateKey>>,
    pub address: Option<Value>,
    pub jurisdiction: Option<Value>,
    pub default_max_deposit_fee: Amount,
    pub default_max_wire_fee: Amount,
    pub default_wire_fee_amortization: u32,
    pub default_pay_delay: RelativeTime,
    pub default_wire_transfer_delay: RelativeTime,
    pub tip_exchange: Option<String>,
    pub tip_reserve_priv: Option<Secret<EddsaPrivateKey>>,
    pub accounts: Vec<WireAccount>,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// The account new contracts are wired to: the first active one.
    pub fn active_account(&self) -> Option<&WireAccount> {
        self.accounts.iter().find(|a| a.active)
    }

    pub fn is_active(&self) -> bool {
        self.merchant_priv.is_some()
    }
}

/// The public view of an instance, as returned by the admin endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDetails {
    pub id: InstanceId,
    pub name: String,
    pub merchant_pub: EddsaPublicKey,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<Value>,
    pub default_max_deposit_fee: Amount,
    pub default_max_wire_fee: Amount,
    pub default_wire_fee_amortization: u32,
    pub default_pay_delay: RelativeTime,
    pub default_wire_transfer_delay: RelativeTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tip_exchange: Option<String>,
    pub accounts: Vec<WireAccount>,
}

impl From<&Instance> for InstanceDetails {
    fn from(i: &Instance) -> Self {
        Self {
            id: i.id.clone(),
            name: i.name.clone(),
            merchant_pub: i.merchant_pub,
            active: i.is_active(),
            address: i.address.clone(),
            jurisdiction: i.jurisdiction.clone(),
            default_max_deposit_fee: i.default_max_deposit_fee.clone(),
            default_max_wire_fee: i.default_max_wire_fee.clone(),
            default_wire_fee_amortization: i.default_wire_fee_amortization,
            default_pay_delay: i.default_pay_delay,
            default_wire_transfer_delay: i.default_wire_transfer_delay,
            tip_exchange: i.tip_exchange.clone(),
            accounts: i.accounts.clone(),
        }
    }
}

/// Everything needed to create an instance. Key material and account salts are generated when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInstance {
    pub id: InstanceId,
    pub name: String,
    #[serde(default)]
    pub private_key: Option<EddsaPrivateKey>,
    pub payto_uris: Vec<String>,
    #[serde(default)]
    pub address: Option<Value>,
    #[serde(default)]
    pub jurisdiction: Option<Value>,
    pub default_max_deposit_fee: Amount,
    pub default_max_wire_fee: Amount,
    pub default_wire_fee_amortization: u32,
    pub default_pay_delay: RelativeTime,
    pub default_wire_transfer_delay: RelativeTime,
    #[serde(default)]
    pub tip_exchange: Option<String>,
    #[serde(default)]
    pub tip_reserve_priv: Option<EddsaPrivateKey>,
}

/// A partial update to an instance. `None` fields are left unchanged. When `payto_uris` is given, accounts not in
/// the list are deactivated (never deleted, since existing contracts refer to their `h_wire`) and new ones are added.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstancePatch {
    pub name: Option<String>,
    pub payto_uris: Option<Vec<String>>,
    pub address: Option<Value>,
    pub jurisdiction: Option<Value>,
    pub default_max_deposit_fee: Option<Amount>,
    pub default_max_wire_fee: Option<Amount>,
    pub default_wire_fee_amortization: Option<u32>,
    pub default_pay_delay: Option<RelativeTime>,
    pub default_wire_transfer_delay: Option<RelativeTime>,
    pub tip_exchange: Option<String>,
    pub tip_reserve_priv: Option<EddsaPrivateKey>,
}

impl InstancePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() &&
            self.payto_uris.is_none() &&
            self.address.is_none() &&
            self.jurisdiction.is_none() &&
            self.default_max_deposit_fee.is_none() &&
            self.default_max_wire_fee.is_none() &&
            self.default_wire_fee_amortization.is_none() &&
            self.default_pay_delay.is_none() &&
            self.default_wire_transfer_delay.is_none() &&
            self.tip_exchange.is_none() &&
            self.tip_reserve_priv.is_none()
    }
}

//--------------------------------------       Product        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub description: String,
    #[serde(default)]
    pub unit: String,
    pub price: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub taxes: Vec<Value>,
    /// Units ever stocked; -1 means the product is never out of stock.
    pub total_stock: i64,
    #[serde(default)]
    pub total_sold: i64,
}

impl Product {
    pub fn available(&self) -> Option<i64> {
        if self.total_stock < 0 {
            None
        } else {
            Some(self.total_stock - self.total_sold)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductPatch {
    pub description: Option<String>,
    pub unit: Option<String>,
    pub price: Option<Amount>,
    pub image: Option<String>,
    pub taxes: Option<Vec<Value>>,
    pub total_stock: Option<i64>,
}

/// A request to take `quantity` units of `product_id` out of stock when an order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryClaim {
    pub product_id: String,
    pub quantity: i64,
}

//--------------------------------------        Orders        ---------------------------------------------------------
/// A normalized, not yet claimed order.
#[derive(Debug, Clone)]
pub struct NewOrderRecord {
    pub instance_id: InstanceId,
    pub order_id: OrderId,
    pub order: Value,
    pub amount: Amount,
    pub summary: String,
    pub timestamp: Timestamp,
    pub pay_deadline: Timestamp,
}

#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub row_id: i64,
    pub instance_id: InstanceId,
    pub order_id: OrderId,
    pub order: Value,
    pub amount: Amount,
    pub summary: String,
    pub timestamp: Timestamp,
    pub pay_deadline: Timestamp,
}

/// A claimed order. `contract_text` is the canonical serialization that was hashed into `h_contract_terms`; it never
/// changes once stored.
#[derive(Debug, Clone)]
pub struct ContractTermsRecord {
    pub row_id: i64,
    pub instance_id: InstanceId,
    pub order_id: OrderId,
    pub contract_text: String,
    pub h_contract_terms: HashCode,
    pub merchant_pub: EddsaPublicKey,
    pub nonce: String,
    pub timestamp: Timestamp,
    pub fulfillment_url: String,
    pub paid: bool,
    pub wired: bool,
    pub last_session_id: Option<String>,
}

impl ContractTermsRecord {
    pub fn contract_terms(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.contract_text)
    }
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The order was claimed by this call.
    Claimed(ContractTermsRecord),
    /// The order had been claimed before with the same nonce.
    Existing(ContractTermsRecord),
    NonceMismatch,
    OrderNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YesNoAll {
    Yes,
    No,
    #[default]
    All,
}

impl YesNoAll {
    pub fn matches(&self, flag: bool) -> bool {
        match self {
            YesNoAll::Yes => flag,
            YesNoAll::No => !flag,
            YesNoAll::All => true,
        }
    }
}

/// Filters for listing orders. A negative `delta` walks backwards from `start` (newest first), a positive one walks
/// forwards.
#[derive(Debug, Clone)]
pub struct OrderListFilter {
    pub paid: YesNoAll,
    pub refunded: YesNoAll,
    pub wired: YesNoAll,
    pub date: Timestamp,
    pub start: i64,
    pub delta: i64,
}

impl Default for OrderListFilter {
    fn default() -> Self {
        Self {
            paid: YesNoAll::All,
            refunded: YesNoAll::All,
            wired: YesNoAll::All,
            date: Timestamp::never(),
            start: i64::MAX,
            delta: -20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub row_id: i64,
    pub timestamp: Timestamp,
    pub amount: Amount,
    pub summary: String,
    pub paid: bool,
    pub refunded: bool,
    pub wired: bool,
}

//--------------------------------------       Deposits       ---------------------------------------------------------
/// A coin the exchange accepted towards a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRecord {
    pub h_contract_terms: HashCode,
    pub coin_pub: EddsaPublicKey,
    pub exchange_url: String,
    pub amount_with_fee: Amount,
    pub deposit_fee: Amount,
    pub refund_fee: Amount,
    pub wire_fee: Amount,
    pub exchange_pub: EddsaPublicKey,
    pub exchange_sig: EddsaSignature,
    pub exchange_proof: Value,
}

//--------------------------------------      Transfers       ---------------------------------------------------------
/// What the exchange told us about an aggregated wire transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProof {
    pub exchange_url: String,
    pub wtid: WireTransferId,
    pub execution_time: Timestamp,
    pub exchange_pub: EddsaPublicKey,
    pub exchange_sig: EddsaSignature,
    pub total_amount: Amount,
    pub wire_fee: Amount,
    pub h_wire: HashCode,
    pub merchant_pub: EddsaPublicKey,
    pub proof: Value,
}

/// A coin observed inside a wire transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinTransfer {
    pub h_contract_terms: HashCode,
    pub coin_pub: EddsaPublicKey,
    pub wtid: WireTransferId,
    pub exchange_url: String,
    pub deposit_value: Amount,
    pub deposit_fee: Amount,
    pub execution_time: Timestamp,
}

//--------------------------------------       Refunds        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundExchangeStatus {
    /// Authorized locally, not yet submitted to the exchange.
    Pending,
    Confirmed { exchange_pub: EddsaPublicKey, exchange_sig: EddsaSignature },
    Failed { http_status: u16, code: Option<u32>, reply: Value },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRecord {
    pub row_id: i64,
    pub h_contract_terms: HashCode,
    pub coin_pub: EddsaPublicKey,
    pub exchange_url: String,
    pub rtransaction_id: u64,
    pub refund_amount: Amount,
    pub refund_fee: Amount,
    pub reason: String,
    pub status: RefundExchangeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundIncreaseOutcome {
    /// New refund rows were created; carries the new total.
    Increased(Amount),
    /// The requested refund does not exceed what was already granted.
    NoChange,
    ExceedsPayment,
    NotPaid,
    UnknownOrder,
}

//--------------------------------------         Tips         ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct TipReserve {
    pub reserve_pub: EddsaPublicKey,
    pub instance_id: InstanceId,
    pub exchange_url: String,
    pub expiration: Timestamp,
    pub amount_authorized: Amount,
    pub amount_picked_up: Amount,
}

#[derive(Debug, Clone)]
pub struct NewTip {
    pub instance_id: InstanceId,
    pub reserve_pub: EddsaPublicKey,
    pub exchange_url: String,
    pub amount: Amount,
    pub justification: String,
    pub extra: Value,
    pub next_url: String,
    pub pickup_url: String,
    pub expiration: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tip {
    pub tip_id: HashCode,
    pub instance_id: InstanceId,
    pub reserve_pub: EddsaPublicKey,
    pub exchange_url: String,
    pub justification: String,
    pub amount_authorized: Amount,
    pub amount_remaining: Amount,
    pub expiration: Timestamp,
    pub extra: Value,
    pub next_url: String,
    pub pickup_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeTipOutcome {
    Authorized(Tip),
    InsufficientFunds { available: Amount },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickupOutcome {
    /// The pickup is new (or an earlier attempt never got its signatures); the tip balance has been debited.
    Debited,
    /// The pickup already completed; these are the signatures handed out the first time.
    Completed(Vec<Blob>),
    Overdrawn { remaining: Amount },
    UnknownTip,
}

//--------------------------------------       Sessions       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPayment {
    pub session_id: String,
    pub fulfillment_url: String,
    pub order_id: OrderId,
}
