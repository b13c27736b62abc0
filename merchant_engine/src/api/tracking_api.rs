//! Reconciling orders with the exchange's wire transfers.
//!
//! Tracking a transaction asks each exchange which wire transfer settled each of the order's coins, then fetches the
//! full contents of every such transfer. Both answers are signed by the exchange, both signatures are checked, and
//! the results are cached so that later queries are answered locally.
use std::{
    collections::{BTreeMap, HashMap},
    fmt::{Debug, Display},
    sync::Arc,
};

use log::*;
use merchant_common::{Amount, Timestamp};
use serde_json::{json, Value};

use crate::{
    api::{
        active_instance,
        order_objects::ContractTermsView,
        payment_objects::{TrackTransactionResponse, TrackTransactionResult, TransferSummary, TransferredCoin},
        TrackingApiError,
    },
    crypto::{hash_transfer_deposits, messages, EddsaPrivateKey, WireTransferId},
    db_types::{CoinTransfer, DepositRecord, Instance, InstanceId, OrderId, TransferProof},
    exchange::{ExchangeClient, ExchangeError, ExchangeKeys, TrackTransactionOutcome, TrackTransferOutcome},
    helpers::{with_retries, INSERT_RETRIES},
    settings::MerchantSettings,
    traits::{InstanceManagement, OrderManagement, PaymentManagement, TransferManagement},
};

/// Where a transaction trace currently is. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraceState {
    NeedExchange,
    AwaitingKeys,
    TracingTransaction,
    TracingTransfer,
    Done,
}

impl Display for TraceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TraceState::NeedExchange => "need_exchange",
            TraceState::AwaitingKeys => "awaiting_keys",
            TraceState::TracingTransaction => "tracing_transaction",
            TraceState::TracingTransfer => "tracing_transfer",
            TraceState::Done => "done",
        };
        f.write_str(s)
    }
}

fn exchange_error(url: &str, error: ExchangeError) -> TrackingApiError {
    match error {
        ExchangeError::Timeout => TrackingApiError::ExchangeTimeout,
        error => TrackingApiError::Exchange { url: url.to_string(), error },
    }
}

fn deposit_json(d: &DepositRecord) -> Value {
    json!({
        "h_contract_terms": d.h_contract_terms,
        "coin_pub": d.coin_pub,
        "exchange_url": d.exchange_url,
        "amount_with_fee": d.amount_with_fee,
        "deposit_fee": d.deposit_fee,
    })
}

/// Groups coin transfers by `(exchange, wtid)` into the summaries returned to the merchant.
pub fn summarize_transfers<'a, I>(coins: I) -> Result<Vec<TransferSummary>, TrackingApiError>
where I: IntoIterator<Item = &'a CoinTransfer> {
    let mut groups: BTreeMap<(String, WireTransferId), Vec<&CoinTransfer>> = BTreeMap::new();
    for coin in coins {
        groups.entry((coin.exchange_url.clone(), coin.wtid)).or_default().push(coin);
    }
    groups
        .into_iter()
        .map(|((exchange, wtid), coins)| {
            let currency = coins.first().map(|c| c.deposit_value.currency()).unwrap_or_default();
            let amount = Amount::sum(currency, coins.iter().map(|c| &c.deposit_value))
                .map_err(|e| TrackingApiError::Internal(e.to_string()))?;
            let execution_time = coins.first().map(|c| c.execution_time).unwrap_or_else(Timestamp::zero);
            let coins = coins
                .into_iter()
                .map(|c| TransferredCoin {
                    coin_pub: c.coin_pub,
                    amount_with_fee: c.deposit_value.clone(),
                    deposit_fee: c.deposit_fee.clone(),
                })
                .collect();
            Ok(TransferSummary { exchange, wtid, execution_time, amount, coins })
        })
        .collect()
}

pub struct TrackingApi<B, E> {
    db: B,
    exchange: Arc<E>,
    settings: Arc<MerchantSettings>,
}

impl<B, E> Debug for TrackingApi<B, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TrackingApi")
    }
}

impl<B, E> TrackingApi<B, E> {
    pub fn new(db: B, exchange: Arc<E>, settings: Arc<MerchantSettings>) -> Self {
        Self { db, exchange, settings }
    }
}

impl<B, E> TrackingApi<B, E>
where
    B: InstanceManagement + OrderManagement + PaymentManagement + TransferManagement,
    E: ExchangeClient,
{
    async fn instance(&self, id: &InstanceId) -> Result<(Instance, EddsaPrivateKey), TrackingApiError> {
        let instance =
            active_instance(&self.db, id).await?.ok_or_else(|| TrackingApiError::UnknownInstance(id.clone()))?;
        let key = instance
            .merchant_priv
            .as_ref()
            .map(|k| k.reveal().clone())
            .ok_or_else(|| TrackingApiError::UnknownInstance(id.clone()))?;
        Ok((instance, key))
    }

    async fn keys(
        &self,
        cache: &mut HashMap<String, ExchangeKeys>,
        url: &str,
    ) -> Result<ExchangeKeys, TrackingApiError> {
        if let Some(keys) = cache.get(url) {
            return Ok(keys.clone());
        }
        let keys = self.exchange.keys(url).await.map_err(|e| exchange_error(url, e))?;
        cache.insert(url.to_string(), keys.clone());
        Ok(keys)
    }

    /// Reports the wire transfers that settled an order.
    ///
    /// Coins whose transfer is already known are answered from the database. If the exchange has not wired one of
    /// the remaining coins yet, its reply is relayed as [`TrackTransactionResult::Pending`].
    pub async fn track_transaction(
        &self,
        instance_id: &InstanceId,
        order_id: &OrderId,
    ) -> Result<TrackTransactionResult, TrackingApiError> {
        let timeout = self.settings.exchange_timeout;
        tokio::time::timeout(timeout, self.trace_transaction(instance_id, order_id)).await.map_err(|_| {
            warn!("🛰️ Tracking order [{order_id}] timed out after {timeout:?}");
            TrackingApiError::ExchangeTimeout
        })?
    }

    async fn trace_transaction(
        &self,
        instance_id: &InstanceId,
        order_id: &OrderId,
    ) -> Result<TrackTransactionResult, TrackingApiError> {
        let (instance, key) = self.instance(instance_id).await?;
        let contract = self
            .db
            .fetch_contract_terms(instance_id, order_id)
            .await?
            .ok_or_else(|| TrackingApiError::UnknownOrder(order_id.clone()))?;
        let terms = ContractTermsView::from_record(&contract).map_err(|e| TrackingApiError::Internal(e.to_string()))?;
        let h = contract.h_contract_terms;
        let mut deposits = self.db.fetch_deposits(&h).await?;
        if deposits.is_empty() {
            return Err(TrackingApiError::NoDeposits(order_id.clone()));
        }
        deposits.sort_by(|a, b| a.exchange_url.cmp(&b.exchange_url));
        let mut known = self
            .db
            .fetch_coin_transfers(&h)
            .await?
            .into_iter()
            .map(|c| (c.coin_pub, c))
            .collect::<HashMap<_, _>>();
        let mut keys_cache = HashMap::new();
        let mut current_exchange: Option<&str> = None;

        for deposit in &deposits {
            if known.contains_key(&deposit.coin_pub) {
                continue;
            }
            let url = deposit.exchange_url.as_str();
            if current_exchange != Some(url) {
                trace!("🛰️ [{order_id}] {}: {url}", TraceState::NeedExchange);
                current_exchange = Some(url);
            }
            trace!("🛰️ [{order_id}] {}", TraceState::AwaitingKeys);
            let keys = self.keys(&mut keys_cache, url).await?;

            trace!("🛰️ [{order_id}] {}: coin {}", TraceState::TracingTransaction, deposit.coin_pub);
            let merchant_sig =
                messages::track_transaction(&terms.h_wire, &h, &deposit.coin_pub, &instance.merchant_pub).sign(&key);
            let outcome = self
                .exchange
                .track_transaction(url, &terms.h_wire, &instance.merchant_pub, &h, &deposit.coin_pub, &merchant_sig)
                .await
                .map_err(|e| exchange_error(url, e))?;
            let (wire, transaction_reply) = match outcome {
                TrackTransactionOutcome::Wired { wire, reply } => (wire, reply),
                TrackTransactionOutcome::Pending { execution_time, reply } => {
                    info!("🛰️ Coin {} of [{order_id}] is not wired yet (expected {execution_time:?})", deposit.coin_pub);
                    return Ok(TrackTransactionResult::Pending { exchange_url: url.to_string(), reply });
                },
                TrackTransactionOutcome::Rejected(rejection) => {
                    warn!("🛰️ {url} refused to track coin {}: {}", deposit.coin_pub, rejection.http_status);
                    return Err(TrackingApiError::TransactionTrackingFailed { url: url.to_string(), rejection });
                },
            };
            if !keys.is_signing_key(&wire.exchange_pub, Timestamp::now()) {
                return Err(TrackingApiError::ExchangeSignatureInvalid(format!(
                    "{} is not a signing key of {url}",
                    wire.exchange_pub
                )));
            }
            messages::wire_confirmation(
                &terms.h_wire,
                &h,
                &wire.wtid,
                &deposit.coin_pub,
                wire.execution_time,
                &wire.coin_contribution,
            )
            .verify(&wire.exchange_pub, &wire.exchange_sig)
            .map_err(|_| TrackingApiError::ExchangeSignatureInvalid(format!("wire confirmation from {url}")))?;

            // The coins of the transfer the exchange attributes this coin to, and the signed transfer report
            let (transfer_coins, transfer_proof) = match self.db.fetch_transfer_proof(url, &wire.wtid).await? {
                Some(proof) => {
                    if proof.execution_time != wire.execution_time || proof.h_wire != terms.h_wire {
                        error!("🛰️ {url} gave conflicting reports for wire transfer {}", wire.wtid);
                        return Err(TrackingApiError::ConflictingReports {
                            exchange_transfer_proof: proof.proof,
                            exchange_transaction_proof: transaction_reply,
                        });
                    }
                    (self.db.fetch_coin_transfers_by_wtid(url, &wire.wtid).await?, proof.proof)
                },
                None => {
                    trace!("🛰️ [{order_id}] {}: {}", TraceState::TracingTransfer, wire.wtid);
                    self.fetch_transfer(&instance, &keys, url, &wire.wtid).await?
                },
            };
            let mut listed = false;
            for coin in transfer_coins.into_iter().filter(|c| c.h_contract_terms == h) {
                listed |= coin.coin_pub == deposit.coin_pub;
                known.insert(coin.coin_pub, coin);
            }
            if !listed {
                error!(
                    "🛰️ {url} says coin {} was wired in {}, but that transfer does not list it",
                    deposit.coin_pub, wire.wtid
                );
                return Err(TrackingApiError::ConflictingReports {
                    exchange_transfer_proof: transfer_proof,
                    exchange_transaction_proof: transaction_reply,
                });
            }
        }
        trace!("🛰️ [{order_id}] {}", TraceState::Done);
        let transfers = summarize_transfers(known.values())?;
        debug!("🛰️ Order [{order_id}] was settled by {} wire transfer(s)", transfers.len());
        Ok(TrackTransactionResult::Settled(TrackTransactionResponse { transfers }))
    }

    /// Returns the exchange's report on a wire transfer.
    ///
    /// A transfer that has been tracked before is answered from the database without contacting the exchange.
    pub async fn track_transfer(
        &self,
        instance_id: &InstanceId,
        exchange_url: &str,
        wtid: &WireTransferId,
    ) -> Result<Value, TrackingApiError> {
        let timeout = self.settings.exchange_timeout;
        tokio::time::timeout(timeout, self.lookup_transfer(instance_id, exchange_url, wtid))
            .await
            .map_err(|_| TrackingApiError::ExchangeTimeout)?
    }

    async fn lookup_transfer(
        &self,
        instance_id: &InstanceId,
        exchange_url: &str,
        wtid: &WireTransferId,
    ) -> Result<Value, TrackingApiError> {
        let (instance, _) = self.instance(instance_id).await?;
        if let Some(proof) = self.db.fetch_transfer_proof(exchange_url, wtid).await? {
            debug!("🛰️ Wire transfer {wtid} answered from the local proof cache");
            return Ok(proof.proof);
        }
        let keys = self.exchange.keys(exchange_url).await.map_err(|e| exchange_error(exchange_url, e))?;
        self.fetch_transfer(&instance, &keys, exchange_url, wtid).await?;
        self.db
            .fetch_transfer_proof(exchange_url, wtid)
            .await?
            .map(|p| p.proof)
            .ok_or_else(|| TrackingApiError::Internal(format!("Wire transfer {wtid} could not be stored")))
    }

    /// Fetches a wire transfer from the exchange, verifies it, cross-checks it against our deposits and stores it.
    /// Returns the coin transfers of this merchant's deposits found in the transfer, and the exchange's reply.
    async fn fetch_transfer(
        &self,
        instance: &Instance,
        keys: &ExchangeKeys,
        url: &str,
        wtid: &WireTransferId,
    ) -> Result<(Vec<CoinTransfer>, Value), TrackingApiError> {
        let outcome = self.exchange.track_transfer(url, wtid).await.map_err(|e| exchange_error(url, e))?;
        let (details, reply) = match outcome {
            TrackTransferOutcome::Found { details, reply } => (details, reply),
            TrackTransferOutcome::Rejected(rejection) => {
                warn!("🛰️ {url} refused to report wire transfer {wtid}: {}", rejection.http_status);
                return Err(TrackingApiError::TransferTrackingFailed { url: url.to_string(), rejection });
            },
        };
        if details.merchant_pub != instance.merchant_pub {
            return Err(TrackingApiError::ExchangeSignatureInvalid(format!(
                "wire transfer {wtid} is addressed to another merchant"
            )));
        }
        if !keys.is_signing_key(&details.exchange_pub, Timestamp::now()) {
            return Err(TrackingApiError::ExchangeSignatureInvalid(format!(
                "{} is not a signing key of {url}",
                details.exchange_pub
            )));
        }
        let h_deposits = hash_transfer_deposits(
            details.deposits.iter().map(|d| (&d.h_contract_terms, &d.coin_pub, &d.deposit_value, &d.deposit_fee)),
        );
        messages::wire_deposit(
            &details.total,
            &details.wire_fee,
            &details.merchant_pub,
            &details.h_wire,
            wtid,
            details.execution_time,
            &h_deposits,
        )
        .verify(&details.exchange_pub, &details.exchange_sig)
        .map_err(|_| TrackingApiError::ExchangeSignatureInvalid(format!("wire transfer {wtid} from {url}")))?;

        let mut coins = Vec::with_capacity(details.deposits.len());
        let mut local_cache: HashMap<_, Vec<DepositRecord>> = HashMap::new();
        for d in &details.deposits {
            if !local_cache.contains_key(&d.h_contract_terms) {
                local_cache.insert(d.h_contract_terms, self.db.fetch_deposits(&d.h_contract_terms).await?);
            }
            let local = local_cache
                .get(&d.h_contract_terms)
                .and_then(|deposits| deposits.iter().find(|l| l.coin_pub == d.coin_pub));
            let Some(local) = local else {
                trace!("🛰️ Wire transfer {wtid} lists coin {} that we have no deposit for", d.coin_pub);
                continue;
            };
            if local.amount_with_fee != d.deposit_value || local.deposit_fee != d.deposit_fee {
                error!("🛰️ {url} values coin {} differently than our deposit record", d.coin_pub);
                return Err(TrackingApiError::ConflictingDeposit {
                    exchange_deposit: json!(d),
                    local_deposit: deposit_json(local),
                });
            }
            coins.push(CoinTransfer {
                h_contract_terms: d.h_contract_terms,
                coin_pub: d.coin_pub,
                wtid: *wtid,
                exchange_url: url.to_string(),
                deposit_value: d.deposit_value.clone(),
                deposit_fee: d.deposit_fee.clone(),
                execution_time: details.execution_time,
            });
        }
        let proof = TransferProof {
            exchange_url: url.to_string(),
            wtid: *wtid,
            execution_time: details.execution_time,
            exchange_pub: details.exchange_pub,
            exchange_sig: details.exchange_sig,
            total_amount: details.total.clone(),
            wire_fee: details.wire_fee.clone(),
            h_wire: details.h_wire,
            merchant_pub: details.merchant_pub,
            proof: reply.clone(),
        };
        let db = &self.db;
        match with_retries(INSERT_RETRIES, || db.insert_transfer(proof.clone(), &coins)).await {
            Ok(()) => info!("🛰️ Stored wire transfer {wtid} from {url} covering {} of our coin(s)", coins.len()),
            Err(e) => error!("🛰️ Could not store wire transfer {wtid}: {e}"),
        }
        Ok((coins, reply))
    }
}
