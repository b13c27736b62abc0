use std::collections::HashMap;

use merchant_common::{Amount, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    crypto::{Blob, EddsaPublicKey, EddsaSignature, HashCode, WireTransferId},
    exchange::ExchangeRejection,
};

//--------------------------------------        /keys         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denomination {
    pub denom_pub: Blob,
    pub value: Amount,
    pub fee_withdraw: Amount,
    pub fee_deposit: Amount,
    pub fee_refund: Amount,
    pub stamp_start: Timestamp,
    pub stamp_expire_withdraw: Timestamp,
    pub stamp_expire_deposit: Timestamp,
    pub stamp_expire_legal: Timestamp,
}

impl Denomination {
    pub fn hash(&self) -> HashCode {
        HashCode::of(self.denom_pub.as_bytes())
    }

    pub fn deposit_expired(&self, now: Timestamp) -> bool {
        self.stamp_expire_deposit <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSigningKey {
    pub key: EddsaPublicKey,
    pub stamp_start: Timestamp,
    pub stamp_expire: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditedDenomination {
    pub denom_pub_h: HashCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeAuditor {
    pub auditor_pub: EddsaPublicKey,
    pub auditor_url: String,
    #[serde(default)]
    pub denomination_keys: Vec<AuditedDenomination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeKeys {
    pub master_public_key: EddsaPublicKey,
    pub denoms: Vec<Denomination>,
    pub signkeys: Vec<ExchangeSigningKey>,
    #[serde(default)]
    pub auditors: Vec<ExchangeAuditor>,
}

impl ExchangeKeys {
    pub fn find_denomination(&self, denom_pub: &Blob) -> Option<&Denomination> {
        self.denoms.iter().find(|d| &d.denom_pub == denom_pub)
    }

    pub fn find_denomination_by_hash(&self, h_denom_pub: &HashCode) -> Option<&Denomination> {
        self.denoms.iter().find(|d| &d.hash() == h_denom_pub)
    }

    /// Whether `key` is one of the exchange's online signing keys and valid at `at`.
    pub fn is_signing_key(&self, key: &EddsaPublicKey, at: Timestamp) -> bool {
        self.signkeys.iter().any(|k| &k.key == key && k.stamp_start <= at && at < k.stamp_expire)
    }

    /// The public keys of the auditors that vouch for the denomination with hash `h_denom_pub`.
    pub fn auditors_of<'a>(&'a self, h_denom_pub: &'a HashCode) -> impl Iterator<Item = &'a EddsaPublicKey> + 'a {
        self.auditors
            .iter()
            .filter(move |a| a.denomination_keys.iter().any(|d| &d.denom_pub_h == h_denom_pub))
            .map(|a| &a.auditor_pub)
    }
}

//--------------------------------------        /wire         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFee {
    pub wire_fee: Amount,
    pub closing_fee: Amount,
    pub start_date: Timestamp,
    pub end_date: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFees {
    /// Fee schedule per wire method
    pub fees: HashMap<String, Vec<WireFee>>,
}

impl WireFees {
    pub fn fee_for(&self, wire_method: &str, at: Timestamp) -> Option<&Amount> {
        self.fees
            .get(wire_method)?
            .iter()
            .find(|f| f.start_date <= at && at < f.end_date)
            .map(|f| &f.wire_fee)
    }
}

//--------------------------------------       /deposit       ---------------------------------------------------------
/// A coin deposit as forwarded to the exchange. The wallet's `coin_sig` covers every field the exchange checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub contribution: Amount,
    pub merchant_payto_uri: String,
    pub wire_salt: HashCode,
    pub h_wire: HashCode,
    pub h_contract_terms: HashCode,
    pub coin_pub: EddsaPublicKey,
    pub denom_pub: Blob,
    pub ub_sig: Blob,
    pub timestamp: Timestamp,
    pub merchant_pub: EddsaPublicKey,
    pub refund_deadline: Timestamp,
    pub wire_transfer_deadline: Timestamp,
    pub coin_sig: EddsaSignature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositConfirmation {
    pub exchange_pub: EddsaPublicKey,
    pub exchange_sig: EddsaSignature,
    pub reply: Value,
}

/// One operation in a coin's spending history, as reported with a double-spending rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinHistoryEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: Amount,
}

impl CoinHistoryEntry {
    /// Refunds give value back to the coin; every other operation spends it.
    pub fn is_credit(&self) -> bool {
        self.kind.eq_ignore_ascii_case("REFUND")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositOutcome {
    Accepted(DepositConfirmation),
    /// HTTP 409 with the coin's history as proof.
    DoubleSpent { history: Vec<CoinHistoryEntry>, reply: Value },
    Rejected(ExchangeRejection),
}

//--------------------------------------  deposit tracking    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionWire {
    pub wtid: WireTransferId,
    pub execution_time: Timestamp,
    pub coin_contribution: Amount,
    pub exchange_sig: EddsaSignature,
    pub exchange_pub: EddsaPublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackTransactionOutcome {
    Wired { wire: TransactionWire, reply: Value },
    /// HTTP 202: the deposit is known but has not been wired yet.
    Pending { execution_time: Option<Timestamp>, reply: Value },
    Rejected(ExchangeRejection),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDeposit {
    pub h_contract_terms: HashCode,
    pub coin_pub: EddsaPublicKey,
    pub deposit_value: Amount,
    pub deposit_fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDetails {
    pub total: Amount,
    pub wire_fee: Amount,
    pub merchant_pub: EddsaPublicKey,
    pub h_wire: HashCode,
    pub execution_time: Timestamp,
    pub deposits: Vec<TransferDeposit>,
    pub exchange_sig: EddsaSignature,
    pub exchange_pub: EddsaPublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackTransferOutcome {
    Found { details: TransferDetails, reply: Value },
    Rejected(ExchangeRejection),
}

//--------------------------------------       refunds        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub h_contract_terms: HashCode,
    pub merchant_pub: EddsaPublicKey,
    pub rtransaction_id: u64,
    pub refund_amount: Amount,
    pub refund_fee: Amount,
    pub merchant_sig: EddsaSignature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    Confirmed { exchange_pub: EddsaPublicKey, exchange_sig: EddsaSignature, reply: Value },
    Rejected(ExchangeRejection),
}

//--------------------------------------       reserves       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveHistoryEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStatus {
    pub balance: Amount,
    #[serde(default)]
    pub history: Vec<ReserveHistoryEntry>,
}

impl ReserveStatus {
    /// Everything ever paid into the reserve.
    pub fn total_credit(&self) -> Result<Amount, merchant_common::AmountError> {
        Amount::sum(
            self.balance.currency(),
            self.history.iter().filter(|e| e.kind.eq_ignore_ascii_case("CREDIT")).map(|e| &e.amount),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub denom_pub_hash: HashCode,
    pub coin_ev: Blob,
    pub reserve_sig: EddsaSignature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Signed(Blob),
    Rejected(ExchangeRejection),
}
