use std::{collections::HashMap, fmt::Debug, sync::Arc};

use futures_util::future::join_all;
use log::*;
use merchant_common::Timestamp;
use serde_json::json;

use crate::{
    api::{
        active_instance,
        payment_objects::{RefundDetail, RefundIncreaseRequest, RefundIncreaseResponse, RefundLookupResponse},
        PollRegistries,
        RefundApiError,
    },
    crypto::{messages, EddsaPrivateKey, Purpose},
    db_types::{Instance, InstanceId, OrderId, RefundExchangeStatus, RefundIncreaseOutcome, RefundRecord},
    events::{EventProducers, RefundIncreasedEvent},
    exchange::{ExchangeClient, ExchangeError, ExchangeKeys, RefundOutcome, RefundRequest},
    helpers::{with_retries, MerchantUrls, RMW_RETRIES},
    long_poll::payment_resume_key,
    settings::MerchantSettings,
    traits::{InstanceManagement, OrderManagement, RefundManagement},
};

/// Grants refunds on paid orders, and reports to wallets how the exchanges responded to them.
///
/// Increasing a refund only writes to the database. The refund rows are submitted to the exchange lazily, the first
/// time a wallet looks them up.
pub struct RefundApi<B, E> {
    db: B,
    exchange: Arc<E>,
    settings: Arc<MerchantSettings>,
    pollers: PollRegistries,
    producers: EventProducers,
}

impl<B, E> Debug for RefundApi<B, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RefundApi")
    }
}

impl<B, E> RefundApi<B, E> {
    pub fn new(
        db: B,
        exchange: Arc<E>,
        settings: Arc<MerchantSettings>,
        pollers: PollRegistries,
        producers: EventProducers,
    ) -> Self {
        Self { db, exchange, settings, pollers, producers }
    }
}

fn detail(record: &RefundRecord) -> RefundDetail {
    let mut detail = RefundDetail {
        coin_pub: record.coin_pub,
        rtransaction_id: record.rtransaction_id,
        refund_amount: record.refund_amount.clone(),
        refund_fee: record.refund_fee.clone(),
        exchange_http_status: 0,
        exchange_pub: None,
        exchange_sig: None,
        exchange_code: None,
        exchange_reply: None,
    };
    match &record.status {
        RefundExchangeStatus::Pending => {},
        RefundExchangeStatus::Confirmed { exchange_pub, exchange_sig } => {
            detail.exchange_http_status = 200;
            detail.exchange_pub = Some(*exchange_pub);
            detail.exchange_sig = Some(*exchange_sig);
        },
        RefundExchangeStatus::Failed { http_status, code, reply } => {
            detail.exchange_http_status = *http_status;
            detail.exchange_code = *code;
            detail.exchange_reply = Some(reply.clone());
        },
    }
    detail
}

impl<B, E> RefundApi<B, E>
where
    B: InstanceManagement + OrderManagement + RefundManagement,
    E: ExchangeClient,
{
    async fn instance(&self, id: &InstanceId) -> Result<Instance, RefundApiError> {
        active_instance(&self.db, id).await?.ok_or_else(|| RefundApiError::UnknownInstance(id.clone()))
    }

    /// Raises the refund granted on a paid order to `request.refund`.
    ///
    /// A refund that does not exceed what was granted already succeeds without changing anything.
    pub async fn increase(
        &self,
        instance_id: &InstanceId,
        urls: &MerchantUrls,
        request: RefundIncreaseRequest,
    ) -> Result<RefundIncreaseResponse, RefundApiError> {
        let instance = self.instance(instance_id).await?;
        if !request.refund.same_currency(&instance.default_max_deposit_fee) {
            return Err(RefundApiError::CurrencyMismatch {
                expected: instance.default_max_deposit_fee.currency().to_string(),
                found: request.refund.currency().to_string(),
            });
        }
        let order_id = &request.order_id;
        let db = &self.db;
        let outcome =
            with_retries(RMW_RETRIES, || db.increase_refund(instance_id, order_id, &request.refund, &request.reason))
                .await?;
        let contract = match outcome {
            RefundIncreaseOutcome::UnknownOrder => return Err(RefundApiError::UnknownOrder(order_id.clone())),
            RefundIncreaseOutcome::NotPaid => return Err(RefundApiError::NotPaid(order_id.clone())),
            RefundIncreaseOutcome::ExceedsPayment => {
                info!("↩️ Refund of {} for [{order_id}] exceeds what was paid", request.refund);
                return Err(RefundApiError::InconsistentAmount(order_id.clone()));
            },
            RefundIncreaseOutcome::NoChange | RefundIncreaseOutcome::Increased(_) => self
                .db
                .fetch_contract_terms(instance_id, order_id)
                .await?
                .ok_or_else(|| RefundApiError::UnknownOrder(order_id.clone()))?,
        };
        if let RefundIncreaseOutcome::Increased(total) = outcome {
            info!("↩️ Refund for [{order_id}] increased to {total}");
            let woken = self.pollers.payments.resume(&payment_resume_key(order_id, &instance.merchant_pub));
            trace!("↩️ {woken} refund poller(s) notified");
            let event = RefundIncreasedEvent {
                instance: instance_id.clone(),
                order_id: order_id.clone(),
                h_contract_terms: contract.h_contract_terms,
                refund_total: total,
                reason: request.reason.clone(),
            };
            self.producers.publish_refund_increased(event).await;
        } else {
            debug!("↩️ Refund for [{order_id}] already covers {}", request.refund);
        }
        Ok(RefundIncreaseResponse {
            h_contract_terms: contract.h_contract_terms,
            taler_refund_url: urls.refund_uri(order_id),
        })
    }

    /// Lists the refunds of an order.
    ///
    /// Refund rows the exchange has not seen yet are submitted first. Confirmations are only accepted, and stored,
    /// when the exchange's signature checks out. Refusals with a 4xx status are final and stored as well; anything
    /// else is reported but left pending so that the next lookup tries again.
    pub async fn lookup(
        &self,
        instance_id: &InstanceId,
        order_id: &OrderId,
    ) -> Result<RefundLookupResponse, RefundApiError> {
        let instance = self.instance(instance_id).await?;
        let key = instance
            .merchant_priv
            .as_ref()
            .map(|k| k.reveal())
            .ok_or_else(|| RefundApiError::UnknownInstance(instance_id.clone()))?;
        let contract = self
            .db
            .fetch_contract_terms(instance_id, order_id)
            .await?
            .ok_or_else(|| RefundApiError::UnknownOrder(order_id.clone()))?;
        let h = contract.h_contract_terms;
        let mut records = self.db.fetch_refunds(&h).await?;
        let pending = records.iter().filter(|r| r.status == RefundExchangeStatus::Pending).count();
        if pending > 0 {
            debug!("↩️ Submitting {pending} refund(s) of [{order_id}] to the exchange");
            self.submit_pending(&instance, key, &mut records).await?;
        }
        let refunds = records.iter().map(detail).collect();
        Ok(RefundLookupResponse { h_contract_terms: h, merchant_pub: instance.merchant_pub, refunds })
    }

    async fn submit_pending(
        &self,
        instance: &Instance,
        key: &EddsaPrivateKey,
        records: &mut [RefundRecord],
    ) -> Result<(), RefundApiError> {
        let merchant_pub = instance.merchant_pub;
        let submissions = records.iter().filter(|r| r.status == RefundExchangeStatus::Pending).map(|r| {
            let merchant_sig = messages::refund(
                Purpose::MerchantRefund,
                &r.h_contract_terms,
                &r.coin_pub,
                &merchant_pub,
                r.rtransaction_id,
                &r.refund_amount,
                &r.refund_fee,
            )
            .sign(key);
            let request = RefundRequest {
                h_contract_terms: r.h_contract_terms,
                merchant_pub,
                rtransaction_id: r.rtransaction_id,
                refund_amount: r.refund_amount.clone(),
                refund_fee: r.refund_fee.clone(),
                merchant_sig,
            };
            async move { (r.row_id, self.exchange.refund(&r.exchange_url, &r.coin_pub, &request).await) }
        });
        let outcomes = tokio::time::timeout(self.settings.exchange_timeout, join_all(submissions))
            .await
            .map_err(|_| RefundApiError::ExchangeTimeout)?
            .into_iter()
            .collect::<HashMap<_, _>>();

        let mut keys: HashMap<String, Result<ExchangeKeys, ExchangeError>> = HashMap::new();
        for record in records.iter_mut() {
            let Some(outcome) = outcomes.get(&record.row_id) else {
                continue;
            };
            let status = match outcome {
                Ok(RefundOutcome::Confirmed { exchange_pub, exchange_sig, .. }) => {
                    if !keys.contains_key(&record.exchange_url) {
                        let fetched = self.exchange.keys(&record.exchange_url).await;
                        keys.insert(record.exchange_url.clone(), fetched);
                    }
                    let signing_key_ok = match keys.get(&record.exchange_url) {
                        Some(Ok(k)) => k.is_signing_key(exchange_pub, Timestamp::now()),
                        _ => false,
                    };
                    let sig_ok = messages::refund(
                        Purpose::ExchangeConfirmRefund,
                        &record.h_contract_terms,
                        &record.coin_pub,
                        &merchant_pub,
                        record.rtransaction_id,
                        &record.refund_amount,
                        &record.refund_fee,
                    )
                    .verify(exchange_pub, exchange_sig)
                    .is_ok();
                    if !signing_key_ok || !sig_ok {
                        warn!("↩️ {} confirmed refund of coin {} with an invalid signature", record.exchange_url, record.coin_pub);
                        return Err(RefundApiError::ExchangeSignatureInvalid(format!(
                            "refund confirmation for coin {}",
                            record.coin_pub
                        )));
                    }
                    RefundExchangeStatus::Confirmed { exchange_pub: *exchange_pub, exchange_sig: *exchange_sig }
                },
                Ok(RefundOutcome::Rejected(rejection)) => {
                    let status = RefundExchangeStatus::Failed {
                        http_status: rejection.http_status,
                        code: rejection.code,
                        reply: rejection.reply.clone(),
                    };
                    if !(400..500).contains(&rejection.http_status) {
                        debug!("↩️ {} answered {} for coin {}, will retry", record.exchange_url, rejection.http_status, record.coin_pub);
                        record.status = status;
                        continue;
                    }
                    info!("↩️ {} refused the refund of coin {}", record.exchange_url, record.coin_pub);
                    status
                },
                Err(e) => {
                    warn!("↩️ Refund of coin {} could not be submitted to {}: {e}", record.coin_pub, record.exchange_url);
                    record.status =
                        RefundExchangeStatus::Failed { http_status: 0, code: None, reply: json!({ "hint": e.to_string() }) };
                    continue;
                },
            };
            let db = &self.db;
            with_retries(RMW_RETRIES, || db.update_refund_status(record.row_id, &status)).await?;
            record.status = status;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{EddsaPublicKey, EddsaSignature, HashCode};

    fn record(status: RefundExchangeStatus) -> RefundRecord {
        RefundRecord {
            row_id: 1,
            h_contract_terms: HashCode::of(b"contract"),
            coin_pub: EddsaPublicKey::random(),
            exchange_url: "https://exchange.example.com/".into(),
            rtransaction_id: 7,
            refund_amount: "EUR:1".parse().unwrap(),
            refund_fee: "EUR:0.01".parse().unwrap(),
            reason: "broken".into(),
            status,
        }
    }

    #[test]
    fn confirmed_refunds_carry_the_signature() {
        let (exchange_pub, exchange_sig) = (EddsaPublicKey::random(), EddsaSignature::random());
        let d = detail(&record(RefundExchangeStatus::Confirmed { exchange_pub, exchange_sig }));
        assert_eq!(d.exchange_http_status, 200);
        assert_eq!(d.exchange_pub, Some(exchange_pub));
        assert_eq!(d.exchange_sig, Some(exchange_sig));
        assert!(d.exchange_reply.is_none());
    }

    #[test]
    fn failed_refunds_carry_the_reply() {
        let reply = json!({ "code": 1234, "hint": "coin unknown" });
        let d = detail(&record(RefundExchangeStatus::Failed { http_status: 404, code: Some(1234), reply: reply.clone() }));
        assert_eq!(d.exchange_http_status, 404);
        assert_eq!(d.exchange_code, Some(1234));
        assert_eq!(d.exchange_reply, Some(reply));
        assert!(d.exchange_sig.is_none());
    }

    #[test]
    fn pending_refunds_have_no_exchange_data() {
        let d = detail(&record(RefundExchangeStatus::Pending));
        assert_eq!(d.exchange_http_status, 0);
        assert_eq!(d.rtransaction_id, 7);
        assert!(d.exchange_pub.is_none() && d.exchange_code.is_none());
    }
}
