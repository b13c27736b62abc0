use std::time::Duration;

use log::*;
use merchant_common::{helpers::join_url, Timestamp};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use url::Url;

use crate::{
    crypto::{Blob, EddsaPublicKey, EddsaSignature, HashCode, WireTransferId},
    exchange::{
        CoinHistoryEntry,
        DepositConfirmation,
        DepositOutcome,
        DepositRequest,
        ExchangeClient,
        ExchangeError,
        ExchangeKeys,
        ExchangeRejection,
        RefundOutcome,
        RefundRequest,
        ReserveStatus,
        TrackTransactionOutcome,
        TrackTransferOutcome,
        TransactionWire,
        TransferDetails,
        TtlCache,
        WireFees,
        WithdrawOutcome,
        WithdrawRequest,
    },
};

pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KEYS_CACHE_TTL: Duration = Duration::from_secs(300);

/// An [`ExchangeClient`] that talks JSON over HTTP. `/keys` and `/wire` replies are cached per exchange URL.
#[derive(Debug)]
pub struct HttpExchangeClient {
    client: Client,
    timeout: Duration,
    keys: TtlCache<ExchangeKeys>,
    wire_fees: TtlCache<WireFees>,
}

impl Default for HttpExchangeClient {
    fn default() -> Self {
        Self::new(DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_KEYS_CACHE_TTL)
    }
}

#[derive(Deserialize)]
struct SignedReply {
    exchange_sig: EddsaSignature,
    exchange_pub: EddsaPublicKey,
}

#[derive(Deserialize)]
struct DoubleSpendReply {
    #[serde(default)]
    history: Vec<CoinHistoryEntry>,
}

#[derive(Deserialize)]
struct PendingReply {
    #[serde(default)]
    execution_time: Option<Timestamp>,
}

#[derive(Deserialize)]
struct WithdrawReply {
    ev_sig: Blob,
}

fn parse<T: DeserializeOwned>(reply: &Value, context: &str) -> Result<T, ExchangeError> {
    serde_json::from_value(reply.clone()).map_err(|e| ExchangeError::Protocol(format!("{context}: {e}")))
}

fn endpoint(exchange_url: &str, path: &str) -> Result<Url, ExchangeError> {
    Url::parse(&join_url(exchange_url, path)).map_err(|e| ExchangeError::InvalidUrl(format!("{exchange_url}: {e}")))
}

impl HttpExchangeClient {
    pub fn new(timeout: Duration, keys_ttl: Duration) -> Self {
        Self { client: Client::new(), timeout, keys: TtlCache::new(keys_ttl), wire_fees: TtlCache::new(keys_ttl) }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends the request and returns the status together with the JSON body. An empty body is returned as `null`.
    async fn send(&self, request: RequestBuilder, context: &str) -> Result<(u16, Value), ExchangeError> {
        let response = request.timeout(self.timeout).send().await.map_err(|e| {
            warn!("🏦️ {context} failed: {e}");
            ExchangeError::from(e)
        })?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| {
                warn!("🏦️ {context} returned HTTP {status} with a body that is not JSON. {e}");
                ExchangeError::Protocol(format!("{context}: reply is not JSON. {e}"))
            })?
        };
        trace!("🏦️ {context} returned HTTP {status}");
        Ok((status, body))
    }

    async fn get(&self, url: Url, context: &str) -> Result<(u16, Value), ExchangeError> {
        self.send(self.client.get(url), context).await
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
        context: &str,
    ) -> Result<(u16, Value), ExchangeError> {
        self.send(self.client.post(url).json(body), context).await
    }

    /// GETs `path` and parses a 200 reply. Anything else is an error.
    async fn fetch<T: DeserializeOwned>(&self, exchange_url: &str, path: &str) -> Result<T, ExchangeError> {
        let context = format!("GET {path} on {exchange_url}");
        let (status, reply) = self.get(endpoint(exchange_url, path)?, &context).await?;
        if status != 200 {
            return Err(ExchangeError::Rejected(ExchangeRejection::from_reply(status, reply)));
        }
        parse(&reply, &context)
    }
}

impl ExchangeClient for HttpExchangeClient {
    async fn keys(&self, exchange_url: &str) -> Result<ExchangeKeys, ExchangeError> {
        if let Some(keys) = self.keys.get(exchange_url).await {
            return Ok(keys);
        }
        debug!("🏦️ Fetching /keys from {exchange_url}");
        let keys: ExchangeKeys = self.fetch(exchange_url, "keys").await?;
        self.keys.insert(exchange_url, keys.clone()).await;
        Ok(keys)
    }

    async fn wire_fees(&self, exchange_url: &str) -> Result<WireFees, ExchangeError> {
        if let Some(fees) = self.wire_fees.get(exchange_url).await {
            return Ok(fees);
        }
        debug!("🏦️ Fetching /wire from {exchange_url}");
        let fees: WireFees = self.fetch(exchange_url, "wire").await?;
        self.wire_fees.insert(exchange_url, fees.clone()).await;
        Ok(fees)
    }

    async fn deposit(&self, exchange_url: &str, deposit: &DepositRequest) -> Result<DepositOutcome, ExchangeError> {
        let context = format!("POST /deposit on {exchange_url}");
        let (status, reply) = self.post(endpoint(exchange_url, "deposit")?, deposit, &context).await?;
        match status {
            200 => {
                let signed: SignedReply = parse(&reply, &context)?;
                Ok(DepositOutcome::Accepted(DepositConfirmation {
                    exchange_pub: signed.exchange_pub,
                    exchange_sig: signed.exchange_sig,
                    reply,
                }))
            },
            409 => {
                let DoubleSpendReply { history } = parse(&reply, &context)?;
                info!("🏦️ {exchange_url} reports coin {} as double-spent", deposit.coin_pub);
                Ok(DepositOutcome::DoubleSpent { history, reply })
            },
            _ => {
                info!("🏦️ {exchange_url} rejected the deposit of coin {} with HTTP {status}", deposit.coin_pub);
                Ok(DepositOutcome::Rejected(ExchangeRejection::from_reply(status, reply)))
            },
        }
    }

    async fn track_transaction(
        &self,
        exchange_url: &str,
        h_wire: &HashCode,
        merchant_pub: &EddsaPublicKey,
        h_contract_terms: &HashCode,
        coin_pub: &EddsaPublicKey,
        merchant_sig: &EddsaSignature,
    ) -> Result<TrackTransactionOutcome, ExchangeError> {
        let path = format!("deposits/{h_wire}/{merchant_pub}/{h_contract_terms}/{coin_pub}");
        let mut url = endpoint(exchange_url, &path)?;
        url.query_pairs_mut().append_pair("merchant_sig", &merchant_sig.to_string());
        let context = format!("GET /deposits on {exchange_url}");
        let (status, reply) = self.get(url, &context).await?;
        match status {
            200 => {
                let wire: TransactionWire = parse(&reply, &context)?;
                Ok(TrackTransactionOutcome::Wired { wire, reply })
            },
            202 => {
                let PendingReply { execution_time } = parse(&reply, &context)?;
                Ok(TrackTransactionOutcome::Pending { execution_time, reply })
            },
            _ => Ok(TrackTransactionOutcome::Rejected(ExchangeRejection::from_reply(status, reply))),
        }
    }

    async fn track_transfer(
        &self,
        exchange_url: &str,
        wtid: &WireTransferId,
    ) -> Result<TrackTransferOutcome, ExchangeError> {
        let context = format!("GET /transfers/{wtid} on {exchange_url}");
        let (status, reply) = self.get(endpoint(exchange_url, &format!("transfers/{wtid}"))?, &context).await?;
        match status {
            200 => {
                let details: TransferDetails = parse(&reply, &context)?;
                Ok(TrackTransferOutcome::Found { details, reply })
            },
            _ => Ok(TrackTransferOutcome::Rejected(ExchangeRejection::from_reply(status, reply))),
        }
    }

    async fn refund(
        &self,
        exchange_url: &str,
        coin_pub: &EddsaPublicKey,
        refund: &RefundRequest,
    ) -> Result<RefundOutcome, ExchangeError> {
        let context = format!("POST /coins/{coin_pub}/refund on {exchange_url}");
        let url = endpoint(exchange_url, &format!("coins/{coin_pub}/refund"))?;
        let (status, reply) = self.post(url, refund, &context).await?;
        match status {
            200 => {
                let signed: SignedReply = parse(&reply, &context)?;
                Ok(RefundOutcome::Confirmed {
                    exchange_pub: signed.exchange_pub,
                    exchange_sig: signed.exchange_sig,
                    reply,
                })
            },
            _ => Ok(RefundOutcome::Rejected(ExchangeRejection::from_reply(status, reply))),
        }
    }

    async fn reserve_status(
        &self,
        exchange_url: &str,
        reserve_pub: &EddsaPublicKey,
    ) -> Result<ReserveStatus, ExchangeError> {
        self.fetch(exchange_url, &format!("reserves/{reserve_pub}")).await
    }

    async fn withdraw(
        &self,
        exchange_url: &str,
        reserve_pub: &EddsaPublicKey,
        request: &WithdrawRequest,
    ) -> Result<WithdrawOutcome, ExchangeError> {
        let context = format!("POST /reserves/{reserve_pub}/withdraw on {exchange_url}");
        let url = endpoint(exchange_url, &format!("reserves/{reserve_pub}/withdraw"))?;
        let (status, reply) = self.post(url, request, &context).await?;
        match status {
            200 => {
                let WithdrawReply { ev_sig } = parse(&reply, &context)?;
                Ok(WithdrawOutcome::Signed(ev_sig))
            },
            _ => Ok(WithdrawOutcome::Rejected(ExchangeRejection::from_reply(status, reply))),
        }
    }
}
