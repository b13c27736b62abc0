use merchant_common::{Amount, Timestamp};

use crate::{
    crypto::{Blob, EddsaPublicKey, HashCode},
    db_types::{AuthorizeTipOutcome, NewTip, PickupOutcome, Tip, TipReserve},
    traits::MerchantDbError,
};

#[allow(async_fn_in_trait)]
pub trait TipManagement {
    async fn fetch_tip_reserve(&self, reserve_pub: &EddsaPublicKey) -> Result<Option<TipReserve>, MerchantDbError>;

    /// Records a new tip against the reserve, provided the reserve's already-authorized total plus the new tip does
    /// not exceed `reserve_credit`. Creates the reserve record on first use and extends its expiration.
    async fn authorize_tip(
        &self,
        tip: NewTip,
        reserve_credit: &Amount,
        reserve_expiration: Timestamp,
    ) -> Result<AuthorizeTipOutcome, MerchantDbError>;

    async fn fetch_tip(&self, tip_id: &HashCode) -> Result<Option<Tip>, MerchantDbError>;

    /// Debits `amount` from the tip for a new pickup, unless the pickup is already known.
    async fn start_pickup(
        &self,
        tip_id: &HashCode,
        pickup_id: &HashCode,
        amount: &Amount,
    ) -> Result<PickupOutcome, MerchantDbError>;

    /// Stores the blind signatures for a pickup, in planchet order.
    async fn complete_pickup(&self, pickup_id: &HashCode, blind_sigs: &[Blob]) -> Result<(), MerchantDbError>;
}
