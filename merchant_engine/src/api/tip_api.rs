use std::{fmt::Debug, sync::Arc};

use futures_util::future::join_all;
use log::*;
use merchant_common::{Amount, RelativeTime, Timestamp};

use crate::{
    api::{
        active_instance,
        tip_objects::{
            BlindSignature,
            TipAuthorizeRequest,
            TipAuthorizeResponse,
            TipInfo,
            TipPickupRequest,
            TipPickupResponse,
            TipQueryResponse,
        },
        TipApiError,
    },
    crypto::{messages, Blob, EddsaPrivateKey, HashCode},
    db_types::{AuthorizeTipOutcome, Instance, InstanceId, NewTip, PickupOutcome},
    exchange::{ExchangeClient, ExchangeError, WithdrawOutcome, WithdrawRequest},
    helpers::{with_retries, MerchantUrls, INSERT_RETRIES, RMW_RETRIES},
    settings::MerchantSettings,
    traits::{InstanceManagement, TipManagement},
};

/// How long an authorized tip can be picked up, in seconds.
pub const TIP_LIFETIME_SECS: i64 = 30 * 24 * 60 * 60;
/// The most planchets a single pickup may ask to have signed.
pub const MAX_PLANCHETS: usize = 1024;

fn exchange_error(url: &str, error: ExchangeError) -> TipApiError {
    match error {
        ExchangeError::Timeout => TipApiError::ExchangeTimeout,
        error => TipApiError::Exchange { url: url.to_string(), error },
    }
}

/// The pickup id commits to the tip and to every planchet, so a wallet repeating a pickup gets the same answer.
pub fn pickup_id(tip_id: &HashCode, planchets: &[(HashCode, Blob)]) -> HashCode {
    let mut parts: Vec<&[u8]> = Vec::with_capacity(1 + 2 * planchets.len());
    parts.push(tip_id.as_bytes());
    for (denom, coin_ev) in planchets {
        parts.push(denom.as_bytes());
        parts.push(coin_ev.as_bytes());
    }
    HashCode::of_parts(&parts)
}

/// Tipping lets a merchant give away small amounts from a reserve it holds at an exchange. The merchant authorizes a
/// tip, and the customer's wallet picks it up by having the exchange sign blinded coins against the reserve.
pub struct TipApi<B, E> {
    db: B,
    exchange: Arc<E>,
    settings: Arc<MerchantSettings>,
}

impl<B, E> Debug for TipApi<B, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TipApi")
    }
}

impl<B, E> TipApi<B, E> {
    pub fn new(db: B, exchange: Arc<E>, settings: Arc<MerchantSettings>) -> Self {
        Self { db, exchange, settings }
    }
}

impl<B, E> TipApi<B, E>
where
    B: InstanceManagement + TipManagement,
    E: ExchangeClient,
{
    /// The tipping instance, its tip exchange and its reserve key.
    async fn tipping_instance(&self, id: &InstanceId) -> Result<(Instance, String, EddsaPrivateKey), TipApiError> {
        let instance = active_instance(&self.db, id).await?.ok_or_else(|| TipApiError::UnknownInstance(id.clone()))?;
        let exchange = instance.tip_exchange.clone();
        let reserve_priv = instance.tip_reserve_priv.as_ref().map(|k| k.reveal().clone());
        match (exchange, reserve_priv) {
            (Some(exchange), Some(reserve_priv)) => Ok((instance, exchange, reserve_priv)),
            _ => Err(TipApiError::InstanceDoesNotTip(id.clone())),
        }
    }

    async fn reserve_credit(&self, exchange_url: &str, reserve_priv: &EddsaPrivateKey) -> Result<Amount, TipApiError> {
        let status = self
            .exchange
            .reserve_status(exchange_url, &reserve_priv.public_key())
            .await
            .map_err(|e| exchange_error(exchange_url, e))?;
        Ok(status.total_credit()?)
    }

    pub async fn authorize(
        &self,
        instance_id: &InstanceId,
        urls: &MerchantUrls,
        request: TipAuthorizeRequest,
    ) -> Result<TipAuthorizeResponse, TipApiError> {
        let (instance, exchange_url, reserve_priv) = self.tipping_instance(instance_id).await?;
        if !request.amount.same_currency(&instance.default_max_deposit_fee) {
            return Err(TipApiError::CurrencyMismatch(format!(
                "tip in {}, merchant uses {}",
                request.amount.currency(),
                self.settings.currency
            )));
        }
        let credit = self.reserve_credit(&exchange_url, &reserve_priv).await?;
        let expiration = Timestamp::now() + RelativeTime::from_secs(TIP_LIFETIME_SECS);
        let tip = NewTip {
            instance_id: instance_id.clone(),
            reserve_pub: reserve_priv.public_key(),
            exchange_url,
            amount: request.amount.clone(),
            justification: request.justification,
            extra: request.extra,
            next_url: request.next_url,
            pickup_url: request.pickup_url,
            expiration,
        };
        let db = &self.db;
        let outcome = with_retries(RMW_RETRIES, || db.authorize_tip(tip.clone(), &credit, expiration)).await?;
        match outcome {
            AuthorizeTipOutcome::Authorized(tip) => {
                info!("🎁️ Tip {} of {} authorized for instance {instance_id}", tip.tip_id, tip.amount_authorized);
                let tip_id = tip.tip_id.to_string();
                Ok(TipAuthorizeResponse {
                    tip_id: tip.tip_id,
                    taler_tip_uri: urls.tip_uri(&tip_id),
                    tip_expiration: tip.expiration,
                })
            },
            AuthorizeTipOutcome::InsufficientFunds { available } => {
                info!("🎁️ Tip of {} refused, the reserve only has {available} left", request.amount);
                Err(TipApiError::InsufficientFunds { available })
            },
        }
    }

    /// Signs the wallet's planchets against the tip.
    ///
    /// The tip is debited before the exchange is asked to sign. Repeating a pickup with the same planchets never
    /// debits twice: a completed pickup returns the stored signatures, and an interrupted one asks the exchange again.
    pub async fn pickup(
        &self,
        instance_id: &InstanceId,
        request: TipPickupRequest,
    ) -> Result<TipPickupResponse, TipApiError> {
        if request.planchets.len() > MAX_PLANCHETS {
            return Err(TipApiError::TooManyPlanchets { count: request.planchets.len(), max: MAX_PLANCHETS });
        }
        let (_, _, reserve_priv) = self.tipping_instance(instance_id).await?;
        let tip_id = request.tip_id;
        let tip = self
            .db
            .fetch_tip(&tip_id)
            .await?
            .filter(|t| &t.instance_id == instance_id)
            .ok_or_else(|| TipApiError::UnknownTip(tip_id.to_string()))?;
        if tip.expiration.has_passed() {
            return Err(TipApiError::TipExpired(tip_id.to_string()));
        }
        let reserve_pub = reserve_priv.public_key();
        if tip.reserve_pub != reserve_pub {
            return Err(TipApiError::Internal(format!("The reserve of tip {tip_id} is no longer configured")));
        }
        let url = tip.exchange_url.as_str();
        let keys = self.exchange.keys(url).await.map_err(|e| exchange_error(url, e))?;
        let mut denoms = Vec::with_capacity(request.planchets.len());
        let mut total = Amount::zero(tip.amount_authorized.currency());
        for planchet in &request.planchets {
            let denom = keys
                .find_denomination_by_hash(&planchet.denom_pub_hash)
                .ok_or_else(|| TipApiError::UnknownDenomination(planchet.denom_pub_hash.to_string()))?;
            let amount_with_fee = denom.value.checked_add(&denom.fee_withdraw)?;
            total = total.checked_add(&amount_with_fee)?;
            denoms.push((denom, amount_with_fee));
        }
        let planchets =
            request.planchets.iter().map(|p| (p.denom_pub_hash, p.coin_ev.clone())).collect::<Vec<_>>();
        let pickup_id = pickup_id(&tip_id, &planchets);

        let db = &self.db;
        match with_retries(RMW_RETRIES, || db.start_pickup(&tip_id, &pickup_id, &total)).await? {
            PickupOutcome::Completed(sigs) => {
                debug!("🎁️ Pickup {pickup_id} was completed before, returning the stored signatures");
                let blind_sigs = sigs.into_iter().map(|blind_sig| BlindSignature { blind_sig }).collect();
                return Ok(TipPickupResponse { blind_sigs });
            },
            PickupOutcome::Overdrawn { remaining } => return Err(TipApiError::Overdrawn { remaining }),
            PickupOutcome::UnknownTip => return Err(TipApiError::UnknownTip(tip_id.to_string())),
            PickupOutcome::Debited => trace!("🎁️ Tip {tip_id} debited {total} for pickup {pickup_id}"),
        }

        let withdrawals = request.planchets.iter().zip(&denoms).map(|(planchet, (denom, amount_with_fee))| {
            let reserve_priv = &reserve_priv;
            async move {
                let reserve_sig = messages::reserve_withdraw(
                    &reserve_pub,
                    amount_with_fee,
                    &denom.fee_withdraw,
                    &planchet.denom_pub_hash,
                    &HashCode::of(planchet.coin_ev.as_bytes()),
                )
                .sign(reserve_priv);
                let request = WithdrawRequest {
                    denom_pub_hash: planchet.denom_pub_hash,
                    coin_ev: planchet.coin_ev.clone(),
                    reserve_sig,
                };
                self.exchange.withdraw(url, &reserve_pub, &request).await.map_err(|e| exchange_error(url, e))
            }
        });
        let outcomes = tokio::time::timeout(self.settings.exchange_timeout, join_all(withdrawals))
            .await
            .map_err(|_| TipApiError::ExchangeTimeout)?;
        let mut blind_sigs = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome? {
                WithdrawOutcome::Signed(sig) => blind_sigs.push(sig),
                WithdrawOutcome::Rejected(rejection) => {
                    warn!("🎁️ {url} refused to sign a planchet of tip {tip_id}: {}", rejection.http_status);
                    return Err(TipApiError::ExchangeRejected { url: url.to_string(), rejection });
                },
            }
        }
        with_retries(INSERT_RETRIES, || db.complete_pickup(&pickup_id, &blind_sigs)).await?;
        info!("🎁️ Tip {tip_id} picked up: {} coin(s) worth {total}", blind_sigs.len());
        let blind_sigs = blind_sigs.into_iter().map(|blind_sig| BlindSignature { blind_sig }).collect();
        Ok(TipPickupResponse { blind_sigs })
    }

    /// The state of the instance's tip reserve.
    pub async fn query(&self, instance_id: &InstanceId) -> Result<TipQueryResponse, TipApiError> {
        let (_, exchange_url, reserve_priv) = self.tipping_instance(instance_id).await?;
        let reserve_pub = reserve_priv.public_key();
        let credit = self.reserve_credit(&exchange_url, &reserve_priv).await?;
        let reserve = self.db.fetch_tip_reserve(&reserve_pub).await?;
        let zero = Amount::zero(credit.currency());
        let (reserve_expiration, amount_authorized, amount_picked_up) = match reserve {
            Some(r) => (r.expiration, r.amount_authorized, r.amount_picked_up),
            None => (Timestamp::zero(), zero.clone(), zero),
        };
        let amount_available = credit.saturating_sub(&amount_authorized)?;
        Ok(TipQueryResponse { reserve_pub, reserve_expiration, amount_authorized, amount_picked_up, amount_available })
    }

    /// What a wallet needs to know before picking up a tip.
    pub async fn tip_info(&self, instance_id: &InstanceId, tip_id: &HashCode) -> Result<TipInfo, TipApiError> {
        let tip = self
            .db
            .fetch_tip(tip_id)
            .await?
            .filter(|t| &t.instance_id == instance_id)
            .ok_or_else(|| TipApiError::UnknownTip(tip_id.to_string()))?;
        Ok(TipInfo {
            exchange_url: tip.exchange_url,
            amount: tip.amount_authorized,
            amount_left: tip.amount_remaining,
            stamp_expire: tip.expiration,
            extra: tip.extra,
        })
    }
}
