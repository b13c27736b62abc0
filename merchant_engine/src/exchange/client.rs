use crate::{
    crypto::{EddsaPublicKey, EddsaSignature, HashCode, WireTransferId},
    exchange::{
        DepositOutcome,
        DepositRequest,
        ExchangeError,
        ExchangeKeys,
        RefundOutcome,
        RefundRequest,
        ReserveStatus,
        TrackTransactionOutcome,
        TrackTransferOutcome,
        WireFees,
        WithdrawOutcome,
        WithdrawRequest,
    },
};

/// The operations the merchant invokes on an exchange. `exchange_url` is always the exchange's base URL.
///
/// Transport failures (unreachable, timeout, unparseable reply) are `Err`. A well-formed refusal from the exchange is
/// a successful call whose outcome is `Rejected`, because most callers need to relay the exchange's reply.
#[allow(async_fn_in_trait)]
pub trait ExchangeClient {
    /// The exchange's denominations, online signing keys and auditors. May be served from a cache.
    async fn keys(&self, exchange_url: &str) -> Result<ExchangeKeys, ExchangeError>;

    /// The exchange's wire fee schedule per wire method. May be served from a cache.
    async fn wire_fees(&self, exchange_url: &str) -> Result<WireFees, ExchangeError>;

    async fn deposit(&self, exchange_url: &str, deposit: &DepositRequest) -> Result<DepositOutcome, ExchangeError>;

    /// Asks which wire transfer settled `coin_pub`'s deposit into contract `h_contract_terms`. `merchant_sig` is the
    /// merchant's signature over the track-transaction request.
    async fn track_transaction(
        &self,
        exchange_url: &str,
        h_wire: &HashCode,
        merchant_pub: &EddsaPublicKey,
        h_contract_terms: &HashCode,
        coin_pub: &EddsaPublicKey,
        merchant_sig: &EddsaSignature,
    ) -> Result<TrackTransactionOutcome, ExchangeError>;

    async fn track_transfer(
        &self,
        exchange_url: &str,
        wtid: &WireTransferId,
    ) -> Result<TrackTransferOutcome, ExchangeError>;

    async fn refund(
        &self,
        exchange_url: &str,
        coin_pub: &EddsaPublicKey,
        refund: &RefundRequest,
    ) -> Result<RefundOutcome, ExchangeError>;

    async fn reserve_status(&self, exchange_url: &str, reserve_pub: &EddsaPublicKey)
        -> Result<ReserveStatus, ExchangeError>;

    async fn withdraw(
        &self,
        exchange_url: &str,
        reserve_pub: &EddsaPublicKey,
        request: &WithdrawRequest,
    ) -> Result<WithdrawOutcome, ExchangeError>;
}
