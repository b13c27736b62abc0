use merchant_engine::{
    crypto::{EddsaPublicKey, EddsaSignature, HashCode, WireTransferId},
    exchange::{
        DepositOutcome,
        DepositRequest,
        ExchangeClient,
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
use mockall::mock;

mock! {
    pub Exchange {}
    impl ExchangeClient for Exchange {
        async fn keys(&self, exchange_url: &str) -> Result<ExchangeKeys, ExchangeError>;
        async fn wire_fees(&self, exchange_url: &str) -> Result<WireFees, ExchangeError>;
        async fn deposit(&self, exchange_url: &str, deposit: &DepositRequest) -> Result<DepositOutcome, ExchangeError>;
        async fn track_transaction(
            &self,
            exchange_url: &str,
            h_wire: &HashCode,
            merchant_pub: &EddsaPublicKey,
            h_contract_terms: &HashCode,
            coin_pub: &EddsaPublicKey,
            merchant_sig: &EddsaSignature,
        ) -> Result<TrackTransactionOutcome, ExchangeError>;
        async fn track_transfer(&self, exchange_url: &str, wtid: &WireTransferId) -> Result<TrackTransferOutcome, ExchangeError>;
        async fn refund(&self, exchange_url: &str, coin_pub: &EddsaPublicKey, refund: &RefundRequest) -> Result<RefundOutcome, ExchangeError>;
        async fn reserve_status(&self, exchange_url: &str, reserve_pub: &EddsaPublicKey) -> Result<ReserveStatus, ExchangeError>;
        async fn withdraw(&self, exchange_url: &str, reserve_pub: &EddsaPublicKey, request: &WithdrawRequest) -> Result<WithdrawOutcome, ExchangeError>;
    }
}
