use merchant_common::{Amount, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{Blob, EddsaPublicKey, HashCode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipAuthorizeRequest {
    pub amount: Amount,
    pub justification: String,
    #[serde(default)]
    pub pickup_url: String,
    #[serde(default)]
    pub next_url: String,
    #[serde(default)]
    pub extra: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipAuthorizeResponse {
    pub tip_id: HashCode,
    pub taler_tip_uri: String,
    pub tip_expiration: Timestamp,
}

/// A blinded coin candidate to be signed by the tip reserve's exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Planchet {
    pub denom_pub_hash: HashCode,
    pub coin_ev: Blob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipPickupRequest {
    pub tip_id: HashCode,
    pub planchets: Vec<Planchet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindSignature {
    pub blind_sig: Blob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipPickupResponse {
    pub blind_sigs: Vec<BlindSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipQueryResponse {
    pub reserve_pub: EddsaPublicKey,
    pub reserve_expiration: Timestamp,
    pub amount_authorized: Amount,
    pub amount_picked_up: Amount,
    pub amount_available: Amount,
}

/// What a wallet learns about a tip before picking it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipInfo {
    pub exchange_url: String,
    pub amount: Amount,
    pub amount_left: Amount,
    pub stamp_expire: Timestamp,
    pub extra: Value,
}
