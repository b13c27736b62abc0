use crate::crypto::{CryptoError, EddsaPrivateKey, EddsaPublicKey, EddsaSignature, HashCode};
use merchant_common::{Amount, Timestamp};

/// The purpose tag at the start of every signed message. It binds a signature to the kind of statement being made, so
/// that a signature over one message type can never be replayed as another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    MerchantContract,
    MerchantRefund,
    MerchantTrackTransaction,
    MerchantPaymentOk,
    WalletReserveWithdraw,
    WalletCoinDeposit,
    ExchangeConfirmDeposit,
    ExchangeConfirmWireDeposit,
    ExchangeConfirmWire,
    ExchangeConfirmRefund,
}

impl Purpose {
    pub fn code(&self) -> u32 {
        match self {
            Purpose::MerchantContract => 1101,
            Purpose::MerchantRefund => 1102,
            Purpose::MerchantTrackTransaction => 1103,
            Purpose::MerchantPaymentOk => 1104,
            Purpose::WalletReserveWithdraw => 1200,
            Purpose::WalletCoinDeposit => 1201,
            Purpose::ExchangeConfirmDeposit => 1033,
            Purpose::ExchangeConfirmWireDeposit => 1035,
            Purpose::ExchangeConfirmWire => 1036,
            Purpose::ExchangeConfirmRefund => 1037,
        }
    }
}

/// A message under construction. The signed bytes are `size: u32be || purpose: u32be || content`, where `size`
/// covers the whole message including the 8-byte header.
#[derive(Debug, Clone)]
pub struct SignedMessage {
    purpose: Purpose,
    content: Vec<u8>,
}

impl SignedMessage {
    pub fn new(purpose: Purpose) -> Self {
        Self { purpose, content: Vec::with_capacity(256) }
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.content.extend_from_slice(data);
        self
    }

    pub fn amount(self, amount: &Amount) -> Self {
        self.bytes(&amount.to_nbo())
    }

    pub fn time(self, ts: Timestamp) -> Self {
        self.bytes(&ts.to_be_micros())
    }

    pub fn u64(self, value: u64) -> Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let size = u32::try_from(self.content.len() + 8).unwrap_or(u32::MAX);
        let mut out = Vec::with_capacity(self.content.len() + 8);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&self.purpose.code().to_be_bytes());
        out.extend_from_slice(&self.content);
        out
    }

    pub fn sign(&self, key: &EddsaPrivateKey) -> EddsaSignature {
        key.sign(&self.to_bytes())
    }

    pub fn verify(&self, key: &EddsaPublicKey, sig: &EddsaSignature) -> Result<(), CryptoError> {
        key.verify(&self.to_bytes(), sig)
    }
}

/// Constructors for every message the merchant signs or verifies.
pub mod messages {
    use super::{Purpose, SignedMessage};
    use crate::crypto::{EddsaPublicKey, HashCode, WireTransferId};
    use merchant_common::{Amount, Timestamp};

    pub fn contract(h_contract_terms: &HashCode) -> SignedMessage {
        SignedMessage::new(Purpose::MerchantContract).bytes(h_contract_terms.as_bytes())
    }

    pub fn payment_ok(h_contract_terms: &HashCode) -> SignedMessage {
        SignedMessage::new(Purpose::MerchantPaymentOk).bytes(h_contract_terms.as_bytes())
    }

    /// The fields a wallet signs when it deposits a coin towards a contract.
    #[derive(Debug, Clone)]
    pub struct CoinDeposit<'a> {
        pub h_contract_terms: &'a HashCode,
        pub h_wire: &'a HashCode,
        pub timestamp: Timestamp,
        pub refund_deadline: Timestamp,
        pub merchant_pub: &'a EddsaPublicKey,
        pub coin_pub: &'a EddsaPublicKey,
        pub amount_with_fee: &'a Amount,
        pub deposit_fee: &'a Amount,
    }

    pub fn coin_deposit(d: &CoinDeposit<'_>) -> SignedMessage {
        SignedMessage::new(Purpose::WalletCoinDeposit)
            .bytes(d.h_contract_terms.as_bytes())
            .bytes(d.h_wire.as_bytes())
            .time(d.timestamp)
            .time(d.refund_deadline)
            .bytes(d.merchant_pub.as_bytes())
            .bytes(d.coin_pub.as_bytes())
            .amount(d.amount_with_fee)
            .amount(d.deposit_fee)
    }

    /// The exchange's confirmation that it accepted a deposit.
    #[allow(clippy::too_many_arguments)]
    pub fn deposit_confirmation(
        h_contract_terms: &HashCode,
        h_wire: &HashCode,
        timestamp: Timestamp,
        refund_deadline: Timestamp,
        amount_without_fee: &Amount,
        coin_pub: &EddsaPublicKey,
        merchant_pub: &EddsaPublicKey,
    ) -> SignedMessage {
        SignedMessage::new(Purpose::ExchangeConfirmDeposit)
            .bytes(h_contract_terms.as_bytes())
            .bytes(h_wire.as_bytes())
            .time(timestamp)
            .time(refund_deadline)
            .amount(amount_without_fee)
            .bytes(coin_pub.as_bytes())
            .bytes(merchant_pub.as_bytes())
    }

    /// The refund permission the merchant signs, and (under [`Purpose::ExchangeConfirmRefund`]) the statement the
    /// exchange signs once it has executed the refund.
    #[allow(clippy::too_many_arguments)]
    pub fn refund(
        purpose: Purpose,
        h_contract_terms: &HashCode,
        coin_pub: &EddsaPublicKey,
        merchant_pub: &EddsaPublicKey,
        rtransaction_id: u64,
        refund_amount: &Amount,
        refund_fee: &Amount,
    ) -> SignedMessage {
        SignedMessage::new(purpose)
            .bytes(h_contract_terms.as_bytes())
            .bytes(coin_pub.as_bytes())
            .bytes(merchant_pub.as_bytes())
            .u64(rtransaction_id)
            .amount(refund_amount)
            .amount(refund_fee)
    }

    pub fn track_transaction(
        h_wire: &HashCode,
        h_contract_terms: &HashCode,
        coin_pub: &EddsaPublicKey,
        merchant_pub: &EddsaPublicKey,
    ) -> SignedMessage {
        SignedMessage::new(Purpose::MerchantTrackTransaction)
            .bytes(h_wire.as_bytes())
            .bytes(h_contract_terms.as_bytes())
            .bytes(coin_pub.as_bytes())
            .bytes(merchant_pub.as_bytes())
    }

    /// The exchange's statement that a coin was settled as part of wire transfer `wtid`.
    pub fn wire_confirmation(
        h_wire: &HashCode,
        h_contract_terms: &HashCode,
        wtid: &WireTransferId,
        coin_pub: &EddsaPublicKey,
        execution_time: Timestamp,
        coin_contribution: &Amount,
    ) -> SignedMessage {
        SignedMessage::new(Purpose::ExchangeConfirmWire)
            .bytes(h_wire.as_bytes())
            .bytes(h_contract_terms.as_bytes())
            .bytes(wtid.as_bytes())
            .bytes(coin_pub.as_bytes())
            .time(execution_time)
            .amount(coin_contribution)
    }

    /// The exchange's statement about the contents of an aggregated wire transfer. `h_deposits` commits to the list of
    /// aggregated deposits (see [`super::hash_transfer_deposits`]).
    #[allow(clippy::too_many_arguments)]
    pub fn wire_deposit(
        total_amount: &Amount,
        wire_fee: &Amount,
        merchant_pub: &EddsaPublicKey,
        h_wire: &HashCode,
        wtid: &WireTransferId,
        execution_time: Timestamp,
        h_deposits: &HashCode,
    ) -> SignedMessage {
        SignedMessage::new(Purpose::ExchangeConfirmWireDeposit)
            .amount(total_amount)
            .amount(wire_fee)
            .bytes(merchant_pub.as_bytes())
            .bytes(h_wire.as_bytes())
            .bytes(wtid.as_bytes())
            .time(execution_time)
            .bytes(h_deposits.as_bytes())
    }

    pub fn reserve_withdraw(
        reserve_pub: &EddsaPublicKey,
        amount_with_fee: &Amount,
        withdraw_fee: &Amount,
        h_denom_pub: &HashCode,
        h_coin_ev: &HashCode,
    ) -> SignedMessage {
        SignedMessage::new(Purpose::WalletReserveWithdraw)
            .bytes(reserve_pub.as_bytes())
            .amount(amount_with_fee)
            .amount(withdraw_fee)
            .bytes(h_denom_pub.as_bytes())
            .bytes(h_coin_ev.as_bytes())
    }
}

/// Hashes the per-coin entries of a wire transfer, in the order the exchange lists them.
pub fn hash_transfer_deposits<'a, I>(deposits: I) -> HashCode
where I: IntoIterator<Item = (&'a HashCode, &'a EddsaPublicKey, &'a Amount, &'a Amount)> {
    let mut buf = Vec::new();
    for (h_contract_terms, coin_pub, value, fee) in deposits {
        buf.extend_from_slice(h_contract_terms.as_bytes());
        buf.extend_from_slice(coin_pub.as_bytes());
        buf.extend_from_slice(&value.to_nbo());
        buf.extend_from_slice(&fee.to_nbo());
    }
    HashCode::of(&buf)
}
