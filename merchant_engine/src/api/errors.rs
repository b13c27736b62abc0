use merchant_common::{Amount, AmountError};
use serde_json::Value;
use thiserror::Error;

use crate::{
    crypto::CryptoError,
    db_types::{InstanceId, OrderId},
    exchange::{ExchangeError, ExchangeRejection},
    traits::MerchantDbError,
};

#[derive(Debug, Clone, Error)]
pub enum InstanceApiError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] MerchantDbError),
    #[error("Instance {0} does not exist")]
    UnknownInstance(InstanceId),
    #[error("Instance {0} already exists")]
    AlreadyExists(InstanceId),
    #[error("Invalid instance: {0}")]
    InvalidInstance(String),
    #[error("Product {0} does not exist")]
    UnknownProduct(String),
    #[error("Product {0} already exists")]
    ProductAlreadyExists(String),
    #[error("Invalid product: {0}")]
    InvalidProduct(String),
}

#[derive(Debug, Clone, Error)]
pub enum OrderApiError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] MerchantDbError),
    #[error("Instance {0} does not exist")]
    UnknownInstance(InstanceId),
    #[error("Order {0} does not exist")]
    UnknownOrder(OrderId),
    #[error("Order ID {0} already exists")]
    AlreadyExists(OrderId),
    #[error("Order {0} was already claimed with a different nonce")]
    AlreadyClaimed(OrderId),
    #[error("Missing field in order: {0}")]
    MissingField(String),
    #[error("Malformed field in order: {0}")]
    MalformedField(String),
    #[error("Order currency {found} does not match the merchant currency {expected}")]
    CurrencyMismatch { expected: String, found: String },
    #[error("The wire transfer deadline is before the refund deadline")]
    WireDeadlineBeforeRefundDeadline,
    #[error("Product #{0} of the order has no description")]
    ProductMissingDescription(usize),
    #[error("Product {0} does not exist")]
    UnknownProduct(String),
    #[error("Product {0} is out of stock")]
    OutOfStock(String),
    #[error("The order list delta must not be zero")]
    DeltaZero,
    #[error("Could not process contract terms: {0}")]
    ContractTerms(String),
}

impl From<CryptoError> for OrderApiError {
    fn from(e: CryptoError) -> Self {
        OrderApiError::ContractTerms(e.to_string())
    }
}

/// The fate of a single coin in a failed payment.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CoinRejection {
    pub coin_pub: String,
    pub exchange_url: String,
    pub exchange_http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_code: Option<u32>,
    pub exchange_reply: Value,
}

#[derive(Debug, Clone, Error)]
pub enum PaymentApiError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] MerchantDbError),
    #[error("Instance {0} does not exist")]
    UnknownInstance(InstanceId),
    #[error("Invalid payment mode: {0}")]
    InvalidMode(String),
    #[error("The payment contains no coins")]
    NoCoins,
    #[error("No contract is known for order {0}")]
    UnknownContract(OrderId),
    #[error("Order {0} has already been paid with other coins")]
    AlreadyPaid(OrderId),
    #[error("The payment deadline for order {0} has passed")]
    DeadlineExpired(OrderId),
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),
    #[error("Denomination of coin {0} is not accepted")]
    DenominationNotAccepted(String),
    #[error("Denomination of coin {0} can no longer be deposited")]
    DenominationExpired(String),
    #[error("The coins cover {paid}, but the contract requires {required}")]
    PaymentInsufficient { paid: Amount, required: Amount },
    #[error("After fees beyond the allowance, the coins cover {paid}, but the contract requires {required}")]
    FeesExceedAllowance { paid: Amount, required: Amount },
    #[error("Invalid signature for coin {0}")]
    InvalidCoinSignature(String),
    #[error("Coin {coin_pub} has already been spent")]
    DoubleSpend { coin_pub: String, exchange_url: String, reply: Value },
    #[error("The exchange misbehaved: {0}")]
    ExchangeFaulty(String),
    #[error("The exchange rejected {} coin(s)", .0.len())]
    ExchangeRejected(Vec<CoinRejection>),
    #[error("The exchange did not answer in time")]
    ExchangeTimeout,
    #[error("Exchange {url} failed: {error}")]
    Exchange { url: String, error: ExchangeError },
    #[error("Exchange signature is invalid: {0}")]
    ExchangeSignatureInvalid(String),
    #[error("Payment for order {0} has completed and can no longer be aborted")]
    AbortRefused(OrderId),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AmountError> for PaymentApiError {
    fn from(e: AmountError) -> Self {
        PaymentApiError::CurrencyMismatch(e.to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum StatusApiError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] MerchantDbError),
    #[error("Instance {0} does not exist")]
    UnknownInstance(InstanceId),
    #[error("Order {0} does not exist")]
    UnknownOrder(OrderId),
    #[error("The contract hash does not match order {0}")]
    ContractHashMismatch(OrderId),
    #[error("Invalid refund amount: {0}")]
    InvalidRefundAmount(String),
    #[error("Stored contract is unreadable: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Error)]
pub enum TrackingApiError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] MerchantDbError),
    #[error("Instance {0} does not exist")]
    UnknownInstance(InstanceId),
    #[error("Order {0} does not exist")]
    UnknownOrder(OrderId),
    #[error("Order {0} has no deposits")]
    NoDeposits(OrderId),
    #[error("The exchange returned conflicting reports")]
    ConflictingReports { exchange_transfer_proof: Value, exchange_transaction_proof: Value },
    #[error("The exchange reports a deposit valuation that differs from our records")]
    ConflictingDeposit { exchange_deposit: Value, local_deposit: Value },
    #[error("Exchange {url} failed tracking a transaction")]
    TransactionTrackingFailed { url: String, rejection: ExchangeRejection },
    #[error("Exchange {url} failed tracking a transfer")]
    TransferTrackingFailed { url: String, rejection: ExchangeRejection },
    #[error("Exchange signature is invalid: {0}")]
    ExchangeSignatureInvalid(String),
    #[error("Exchange {url} failed: {error}")]
    Exchange { url: String, error: ExchangeError },
    #[error("The exchange did not answer in time")]
    ExchangeTimeout,
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Error)]
pub enum RefundApiError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] MerchantDbError),
    #[error("Instance {0} does not exist")]
    UnknownInstance(InstanceId),
    #[error("Order {0} does not exist")]
    UnknownOrder(OrderId),
    #[error("Order {0} has not been paid")]
    NotPaid(OrderId),
    #[error("The refund exceeds the amount paid for order {0}")]
    InconsistentAmount(OrderId),
    #[error("Refund currency {found} does not match {expected}")]
    CurrencyMismatch { expected: String, found: String },
    #[error("Exchange signature is invalid: {0}")]
    ExchangeSignatureInvalid(String),
    #[error("The exchange did not answer in time")]
    ExchangeTimeout,
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Error)]
pub enum TipApiError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] MerchantDbError),
    #[error("Instance {0} does not exist")]
    UnknownInstance(InstanceId),
    #[error("Instance {0} is not configured for tipping")]
    InstanceDoesNotTip(InstanceId),
    #[error("The tip reserve only has {available} left")]
    InsufficientFunds { available: Amount },
    #[error("Tip {0} does not exist")]
    UnknownTip(String),
    #[error("Tip {0} has expired")]
    TipExpired(String),
    #[error("The pickup exceeds the remaining tip amount of {remaining}")]
    Overdrawn { remaining: Amount },
    #[error("A pickup may contain at most {max} planchets, but {count} were given")]
    TooManyPlanchets { count: usize, max: usize },
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),
    #[error("The exchange does not offer denomination {0}")]
    UnknownDenomination(String),
    #[error("Exchange {url} failed")]
    ExchangeRejected { url: String, rejection: ExchangeRejection },
    #[error("Exchange {url} failed: {error}")]
    Exchange { url: String, error: ExchangeError },
    #[error("The exchange did not answer in time")]
    ExchangeTimeout,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AmountError> for TipApiError {
    fn from(e: AmountError) -> Self {
        TipApiError::CurrencyMismatch(e.to_string())
    }
}
