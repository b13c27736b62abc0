use crate::{
    crypto::{HashCode, WireTransferId},
    db_types::{CoinTransfer, TransferProof},
    traits::MerchantDbError,
};

#[allow(async_fn_in_trait)]
pub trait TransferManagement {
    async fn fetch_transfer_proof(
        &self,
        exchange_url: &str,
        wtid: &WireTransferId,
    ) -> Result<Option<TransferProof>, MerchantDbError>;

    /// Stores a transfer proof and the coins it settles, and marks the affected contracts as wired. Existing rows are
    /// left untouched, so storing the same proof twice is harmless.
    async fn insert_transfer(&self, proof: TransferProof, coins: &[CoinTransfer]) -> Result<(), MerchantDbError>;

    async fn fetch_coin_transfers(&self, h_contract_terms: &HashCode) -> Result<Vec<CoinTransfer>, MerchantDbError>;

    async fn fetch_coin_transfers_by_wtid(
        &self,
        exchange_url: &str,
        wtid: &WireTransferId,
    ) -> Result<Vec<CoinTransfer>, MerchantDbError>;
}
