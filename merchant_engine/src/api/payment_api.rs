//! Accepting coins for a contract.
//!
//! A payment runs through three stages. First every coin is checked locally: the contract must be payable, the
//! coin's denomination must come from an exchange or auditor the merchant trusts, the coins must cover the price plus
//! any fees beyond what the merchant agreed to absorb, and the wallet's signature must be valid. Then all coins are
//! deposited with their exchanges concurrently. Only when every exchange accepted its coins are the deposits stored,
//! the contract marked as paid and the pollers waiting on the order woken up.
use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    sync::Arc,
};

use futures_util::future::join_all;
use log::*;
use merchant_common::{Amount, Timestamp};

use crate::{
    api::{
        active_instance,
        order_objects::ContractTermsView,
        payment_objects::{
            AbortRefundResponse,
            CoinPaymentDetails,
            PayMode,
            PayRequest,
            PayResponse,
            PayResult,
            RefundPermission,
        },
        CoinRejection,
        PaymentApiError,
        PollRegistries,
    },
    crypto::{messages, EddsaPrivateKey, Purpose},
    db_types::{ContractTermsRecord, DepositRecord, Instance, InstanceId, WireAccount},
    events::{EventProducers, OrderPaidEvent},
    exchange::{
        CoinHistoryEntry,
        Denomination,
        DepositOutcome,
        DepositRequest,
        ExchangeClient,
        ExchangeError,
        ExchangeKeys,
        WireFees,
    },
    helpers::{with_retries, RMW_RETRIES},
    long_poll::payment_resume_key,
    settings::MerchantSettings,
    traits::{InstanceManagement, OrderManagement, PaymentManagement},
};

/// What the merchant knows about an exchange for the duration of one payment.
struct ExchangeInfo {
    keys: ExchangeKeys,
    wire_fees: WireFees,
}

/// A coin that passed the local checks, together with its denomination.
struct CheckedCoin<'a> {
    coin: &'a CoinPaymentDetails,
    denom: Denomination,
}

/// The amounts the fee check works with.
#[derive(Debug, Clone)]
pub struct FeeCheck<'a> {
    pub amount: &'a Amount,
    pub max_fee: &'a Amount,
    pub max_wire_fee: &'a Amount,
    pub wire_fee_amortization: u32,
    pub contributions: Vec<&'a Amount>,
    pub deposit_fees: Vec<&'a Amount>,
    /// The wire fees of the exchanges involved, one entry per exchange
    pub wire_fees: Vec<&'a Amount>,
}

impl FeeCheck<'_> {
    /// The deposit fees the merchant covers: `max_fee`, plus a share of `max_fee` for every `wire_fee_amortization`
    /// coins beyond the first.
    pub fn fee_allowance(&self) -> Result<Amount, PaymentApiError> {
        let amortization = self.wire_fee_amortization.max(1);
        let extra_coins = u64::try_from(self.contributions.len().saturating_sub(1)).unwrap_or(u64::MAX);
        let shares = extra_coins.div_ceil(u64::from(amortization));
        let share = self.max_fee.divide(amortization);
        Ok(self.max_fee.checked_add(&share.checked_mul(shares)?)?)
    }

    /// Checks that the coins cover the contract amount, plus the fees the customer has to bear.
    pub fn verify(&self) -> Result<(), PaymentApiError> {
        let currency = self.amount.currency();
        let paid = Amount::sum(currency, self.contributions.iter().copied())?;
        if paid.try_cmp(self.amount)?.is_lt() {
            return Err(PaymentApiError::PaymentInsufficient { paid, required: self.amount.clone() });
        }
        let deposit_fees = Amount::sum(currency, self.deposit_fees.iter().copied())?;
        let fee_excess = deposit_fees.saturating_sub(&self.fee_allowance()?)?;
        let wire_fees = Amount::sum(currency, self.wire_fees.iter().copied())?;
        let wire_excess = wire_fees.saturating_sub(self.max_wire_fee)?.divide(self.wire_fee_amortization.max(1));
        let customer_share = fee_excess.checked_add(&wire_excess)?;
        let net = paid.saturating_sub(&customer_share)?;
        if net.try_cmp(self.amount)?.is_lt() {
            return Err(PaymentApiError::FeesExceedAllowance { paid: net, required: self.amount.clone() });
        }
        Ok(())
    }
}

/// Whether a coin's spending history proves that it cannot cover `contribution` on top of what it already spent.
pub fn proves_double_spend(
    history: &[CoinHistoryEntry],
    contribution: &Amount,
    denom_value: &Amount,
) -> Result<bool, PaymentApiError> {
    let currency = contribution.currency();
    let spent = Amount::sum(currency, history.iter().filter(|e| !e.is_credit()).map(|e| &e.amount))?;
    let credited = Amount::sum(currency, history.iter().filter(|e| e.is_credit()).map(|e| &e.amount))?;
    let total = spent.saturating_sub(&credited)?.checked_add(contribution)?;
    Ok(total.try_cmp(denom_value)?.is_gt())
}

fn exchange_error(url: &str, error: ExchangeError) -> PaymentApiError {
    match error {
        ExchangeError::Timeout => PaymentApiError::ExchangeTimeout,
        error => PaymentApiError::Exchange { url: url.to_string(), error },
    }
}

pub struct PaymentApi<B, E> {
    db: B,
    exchange: Arc<E>,
    settings: Arc<MerchantSettings>,
    pollers: PollRegistries,
    producers: EventProducers,
}

impl<B, E> Debug for PaymentApi<B, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentApi")
    }
}

impl<B, E> PaymentApi<B, E> {
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

impl<B, E> PaymentApi<B, E>
where
    B: InstanceManagement + OrderManagement + PaymentManagement,
    E: ExchangeClient,
{
    /// Handles a wallet's pay request, in either `pay` or `abort-refund` mode.
    pub async fn pay(&self, instance_id: &InstanceId, request: PayRequest) -> Result<PayResult, PaymentApiError> {
        let mode = request.mode.parse::<PayMode>().map_err(PaymentApiError::InvalidMode)?;
        if request.coins.is_empty() {
            return Err(PaymentApiError::NoCoins);
        }
        let instance = active_instance(&self.db, instance_id)
            .await?
            .ok_or_else(|| PaymentApiError::UnknownInstance(instance_id.clone()))?;
        let contract = self
            .db
            .fetch_contract_terms(instance_id, &request.order_id)
            .await?
            .filter(|c| c.merchant_pub == request.merchant_pub)
            .ok_or_else(|| PaymentApiError::UnknownContract(request.order_id.clone()))?;
        let terms = ContractTermsView::from_record(&contract)
            .map_err(|e| PaymentApiError::Internal(format!("Stored contract terms are unreadable. {e}")))?;
        let key = instance
            .merchant_priv
            .as_ref()
            .map(|k| k.reveal())
            .ok_or_else(|| PaymentApiError::UnknownInstance(instance_id.clone()))?;
        debug!("💸️ {mode} request for order [{}] with {} coin(s)", request.order_id, request.coins.len());
        match mode {
            PayMode::Pay => self.process_payment(&instance, key, &contract, &terms, &request).await.map(PayResult::Paid),
            PayMode::AbortRefund => {
                self.abort_refund(key, &contract, &terms, &request).await.map(PayResult::Aborted)
            },
        }
    }

    async fn process_payment(
        &self,
        instance: &Instance,
        key: &EddsaPrivateKey,
        contract: &ContractTermsRecord,
        terms: &ContractTermsView,
        request: &PayRequest,
    ) -> Result<PayResponse, PaymentApiError> {
        let h = contract.h_contract_terms;
        let order_id = &request.order_id;
        let session_id = request.session_id.as_deref();
        let db = &self.db;
        let existing = self.db.fetch_deposits(&h).await?;
        if contract.paid {
            let known = existing.iter().map(|d| d.coin_pub).collect::<HashSet<_>>();
            if request.coins.iter().all(|c| known.contains(&c.coin_pub)) {
                debug!("💸️ Order [{order_id}] was already paid with these coins. Replaying the confirmation.");
                with_retries(RMW_RETRIES, || db.mark_contract_paid(&h, session_id)).await?;
                return Ok(Self::payment_ok(key, contract));
            }
            return Err(PaymentApiError::AlreadyPaid(order_id.clone()));
        }
        if terms.pay_deadline.has_passed() {
            info!("💸️ Payment for [{order_id}] arrived after the deadline of {}", terms.pay_deadline);
            return Err(PaymentApiError::DeadlineExpired(order_id.clone()));
        }
        for coin in &request.coins {
            if !coin.contribution.same_currency(&terms.amount) {
                return Err(PaymentApiError::CurrencyMismatch(format!(
                    "coin {} contributes {}, but the contract is in {}",
                    coin.coin_pub,
                    coin.contribution,
                    terms.amount.currency()
                )));
            }
        }

        let exchanges = self.exchange_info(&request.coins, terms).await?;
        let checked = self.check_coins(&request.coins, &exchanges)?;
        let currency = terms.amount.currency();
        let wire_fees = exchanges
            .iter()
            .map(|(url, info)| match info.wire_fees.fee_for(&terms.wire_method, terms.timestamp) {
                Some(fee) => fee.clone(),
                None => {
                    trace!("💸️ {url} publishes no {} wire fee, assuming none", terms.wire_method);
                    Amount::zero(currency)
                },
            })
            .collect::<Vec<_>>();
        FeeCheck {
            amount: &terms.amount,
            max_fee: &terms.max_fee,
            max_wire_fee: &terms.max_wire_fee,
            wire_fee_amortization: terms.wire_fee_amortization,
            contributions: checked.iter().map(|c| &c.coin.contribution).collect(),
            deposit_fees: checked.iter().map(|c| &c.denom.fee_deposit).collect(),
            wire_fees: wire_fees.iter().collect(),
        }
        .verify()?;
        for c in &checked {
            let msg = messages::coin_deposit(&messages::CoinDeposit {
                h_contract_terms: &h,
                h_wire: &terms.h_wire,
                timestamp: terms.timestamp,
                refund_deadline: terms.refund_deadline,
                merchant_pub: &terms.merchant_pub,
                coin_pub: &c.coin.coin_pub,
                amount_with_fee: &c.coin.contribution,
                deposit_fee: &c.denom.fee_deposit,
            });
            msg.verify(&c.coin.coin_pub, &c.coin.coin_sig)
                .map_err(|_| PaymentApiError::InvalidCoinSignature(c.coin.coin_pub.to_string()))?;
        }

        let account = instance.accounts.iter().find(|a| a.h_wire == terms.h_wire).ok_or_else(|| {
            PaymentApiError::Internal(format!("The wire account of order [{order_id}] no longer exists"))
        })?;
        let deposited = existing.iter().map(|d| d.coin_pub).collect::<HashSet<_>>();
        let pending = checked.iter().filter(|c| !deposited.contains(&c.coin.coin_pub)).collect::<Vec<_>>();
        let records = self.deposit_coins(&pending, &exchanges, account, contract, terms).await?;

        let fresh = with_retries(RMW_RETRIES, || db.record_payment(&h, &records, session_id)).await?;
        trace!("💸️ Recorded {fresh} new deposit(s) of {} for [{order_id}]", records.len());
        let paid = Amount::sum(currency, checked.iter().map(|c| &c.coin.contribution))?;
        info!("💸️ Order [{order_id}] has been paid ({paid} for {})", terms.amount);
        let woken = self.pollers.payments.resume(&payment_resume_key(order_id, &terms.merchant_pub));
        trace!("💸️ {woken} payment poller(s) notified");
        let event = OrderPaidEvent {
            instance: contract.instance_id.clone(),
            order_id: order_id.clone(),
            h_contract_terms: h,
            amount: terms.amount.clone(),
            session_id: request.session_id.clone(),
        };
        self.producers.publish_order_paid(event).await;
        Ok(Self::payment_ok(key, contract))
    }

    fn payment_ok(key: &EddsaPrivateKey, contract: &ContractTermsRecord) -> PayResponse {
        let sig = messages::payment_ok(&contract.h_contract_terms).sign(key);
        PayResponse { sig, h_contract_terms: Some(contract.h_contract_terms) }
    }

    /// Fetches keys and wire fees of every exchange the coins come from, concurrently.
    async fn exchange_info(
        &self,
        coins: &[CoinPaymentDetails],
        terms: &ContractTermsView,
    ) -> Result<HashMap<String, ExchangeInfo>, PaymentApiError> {
        let urls = coins.iter().map(|c| c.exchange_url.as_str()).collect::<HashSet<_>>();
        let lookups = urls.into_iter().map(|url| async move {
            let keys = self.exchange.keys(url).await;
            let wire_fees = match self.exchange.wire_fees(url).await {
                Ok(fees) => fees,
                Err(e) => {
                    warn!("💸️ Could not fetch the wire fees of {url}: {e}. Assuming no {} fee.", terms.wire_method);
                    WireFees::default()
                },
            };
            (url, keys, wire_fees)
        });
        let results = tokio::time::timeout(self.settings.exchange_timeout, join_all(lookups))
            .await
            .map_err(|_| PaymentApiError::ExchangeTimeout)?;
        let mut exchanges = HashMap::with_capacity(results.len());
        for (url, keys, wire_fees) in results {
            let keys = keys.map_err(|e| exchange_error(url, e))?;
            exchanges.insert(url.to_string(), ExchangeInfo { keys, wire_fees });
        }
        Ok(exchanges)
    }

    /// Checks that each coin's denomination is acceptable and still depositable.
    ///
    /// A denomination is acceptable if its exchange is one the merchant trusts, or if one of the auditors the merchant
    /// accepts vouches for it.
    fn check_coins<'a>(
        &self,
        coins: &'a [CoinPaymentDetails],
        exchanges: &HashMap<String, ExchangeInfo>,
    ) -> Result<Vec<CheckedCoin<'a>>, PaymentApiError> {
        let now = Timestamp::now();
        let mut checked = Vec::with_capacity(coins.len());
        for coin in coins {
            let info = exchanges
                .get(&coin.exchange_url)
                .ok_or_else(|| PaymentApiError::Internal(format!("No keys for {}", coin.exchange_url)))?;
            let denom = info
                .keys
                .find_denomination(&coin.denom_pub)
                .ok_or_else(|| PaymentApiError::DenominationNotAccepted(coin.coin_pub.to_string()))?;
            let trusted = self
                .settings
                .trusted_exchange(&coin.exchange_url)
                .map(|t| t.master_pub == info.keys.master_public_key)
                .unwrap_or(false);
            let h_denom = denom.hash();
            let audited = info.keys.auditors_of(&h_denom).any(|a| self.settings.accepts_auditor(a));
            if !trusted && !audited {
                debug!("💸️ Coin {} is from an untrusted, unaudited denomination", coin.coin_pub);
                return Err(PaymentApiError::DenominationNotAccepted(coin.coin_pub.to_string()));
            }
            if denom.deposit_expired(now) {
                return Err(PaymentApiError::DenominationExpired(coin.coin_pub.to_string()));
            }
            checked.push(CheckedCoin { coin, denom: denom.clone() });
        }
        Ok(checked)
    }

    /// Deposits the coins with their exchanges and turns the answers into deposit records.
    ///
    /// Nothing is stored here. If any coin fails, the whole payment fails.
    async fn deposit_coins(
        &self,
        coins: &[&CheckedCoin<'_>],
        exchanges: &HashMap<String, ExchangeInfo>,
        account: &WireAccount,
        contract: &ContractTermsRecord,
        terms: &ContractTermsView,
    ) -> Result<Vec<DepositRecord>, PaymentApiError> {
        let h = contract.h_contract_terms;
        let deposits = coins.iter().map(|c| {
            let request = DepositRequest {
                contribution: c.coin.contribution.clone(),
                merchant_payto_uri: account.payto_uri.clone(),
                wire_salt: account.salt,
                h_wire: terms.h_wire,
                h_contract_terms: h,
                coin_pub: c.coin.coin_pub,
                denom_pub: c.coin.denom_pub.clone(),
                ub_sig: c.coin.ub_sig.clone(),
                timestamp: terms.timestamp,
                merchant_pub: terms.merchant_pub,
                refund_deadline: terms.refund_deadline,
                wire_transfer_deadline: terms.wire_transfer_deadline,
                coin_sig: c.coin.coin_sig,
            };
            async move {
                trace!("💸️ Depositing coin {} with {}", request.coin_pub, c.coin.exchange_url);
                self.exchange.deposit(&c.coin.exchange_url, &request).await
            }
        });
        let outcomes = tokio::time::timeout(self.settings.exchange_timeout, join_all(deposits))
            .await
            .map_err(|_| {
                warn!("💸️ Exchanges did not answer deposits for [{}] in time", contract.order_id);
                PaymentApiError::ExchangeTimeout
            })?;

        let mut confirmations = Vec::with_capacity(coins.len());
        let mut rejections = Vec::new();
        for (c, outcome) in coins.iter().zip(outcomes) {
            let url = &c.coin.exchange_url;
            match outcome.map_err(|e| exchange_error(url, e))? {
                DepositOutcome::Accepted(confirmation) => confirmations.push((c, confirmation)),
                DepositOutcome::DoubleSpent { history, reply } => {
                    return if proves_double_spend(&history, &c.coin.contribution, &c.denom.value)? {
                        info!("💸️ Coin {} has been spent already. Relaying the exchange's proof.", c.coin.coin_pub);
                        Err(PaymentApiError::DoubleSpend { coin_pub: c.coin.coin_pub.to_string(), exchange_url: url.clone(), reply })
                    } else {
                        error!("💸️ {url} claims coin {} is double spent, but its history says otherwise", c.coin.coin_pub);
                        Err(PaymentApiError::ExchangeFaulty(format!(
                            "{url} reported a double spend of coin {} without proof",
                            c.coin.coin_pub
                        )))
                    };
                },
                DepositOutcome::Rejected(rejection) => {
                    debug!("💸️ {url} rejected coin {} with status {}", c.coin.coin_pub, rejection.http_status);
                    rejections.push(CoinRejection {
                        coin_pub: c.coin.coin_pub.to_string(),
                        exchange_url: url.clone(),
                        exchange_http_status: rejection.http_status,
                        exchange_code: rejection.code,
                        exchange_reply: rejection.reply,
                    });
                },
            }
        }
        if !rejections.is_empty() {
            return Err(PaymentApiError::ExchangeRejected(rejections));
        }

        let now = Timestamp::now();
        let mut records = Vec::with_capacity(confirmations.len());
        for (c, confirmation) in confirmations {
            let url = &c.coin.exchange_url;
            let info = exchanges.get(url).ok_or_else(|| PaymentApiError::Internal(format!("No keys for {url}")))?;
            if !info.keys.is_signing_key(&confirmation.exchange_pub, now) {
                return Err(PaymentApiError::ExchangeSignatureInvalid(format!(
                    "{} is not a signing key of {url}",
                    confirmation.exchange_pub
                )));
            }
            let amount_without_fee = c.coin.contribution.saturating_sub(&c.denom.fee_deposit)?;
            messages::deposit_confirmation(
                &h,
                &terms.h_wire,
                terms.timestamp,
                terms.refund_deadline,
                &amount_without_fee,
                &c.coin.coin_pub,
                &terms.merchant_pub,
            )
            .verify(&confirmation.exchange_pub, &confirmation.exchange_sig)
            .map_err(|_| {
                PaymentApiError::ExchangeSignatureInvalid(format!("deposit confirmation for coin {}", c.coin.coin_pub))
            })?;
            let wire_fee = info
                .wire_fees
                .fee_for(&terms.wire_method, terms.timestamp)
                .cloned()
                .unwrap_or_else(|| Amount::zero(terms.amount.currency()));
            records.push(DepositRecord {
                h_contract_terms: h,
                coin_pub: c.coin.coin_pub,
                exchange_url: url.clone(),
                amount_with_fee: c.coin.contribution.clone(),
                deposit_fee: c.denom.fee_deposit.clone(),
                refund_fee: c.denom.fee_refund.clone(),
                wire_fee,
                exchange_pub: confirmation.exchange_pub,
                exchange_sig: confirmation.exchange_sig,
                exchange_proof: confirmation.reply,
            });
        }
        Ok(records)
    }

    /// Hands the wallet a refund permission for every coin it lists, so it can recover coins the exchange accepted
    /// for a payment that did not complete. Nothing is stored. A contract that has been paid cannot be aborted.
    async fn abort_refund(
        &self,
        key: &EddsaPrivateKey,
        contract: &ContractTermsRecord,
        terms: &ContractTermsView,
        request: &PayRequest,
    ) -> Result<AbortRefundResponse, PaymentApiError> {
        if contract.paid {
            info!("💸️ Refusing to abort order [{}], which has been paid", request.order_id);
            return Err(PaymentApiError::AbortRefused(request.order_id.clone()));
        }
        let h = contract.h_contract_terms;
        let exchanges = self.exchange_info(&request.coins, terms).await?;
        let mut refund_permissions = Vec::with_capacity(request.coins.len());
        for coin in &request.coins {
            let denom = exchanges
                .get(&coin.exchange_url)
                .and_then(|info| info.keys.find_denomination(&coin.denom_pub))
                .ok_or_else(|| PaymentApiError::DenominationNotAccepted(coin.coin_pub.to_string()))?;
            messages::coin_deposit(&messages::CoinDeposit {
                h_contract_terms: &h,
                h_wire: &terms.h_wire,
                timestamp: terms.timestamp,
                refund_deadline: terms.refund_deadline,
                merchant_pub: &terms.merchant_pub,
                coin_pub: &coin.coin_pub,
                amount_with_fee: &coin.contribution,
                deposit_fee: &denom.fee_deposit,
            })
            .verify(&coin.coin_pub, &coin.coin_sig)
            .map_err(|_| PaymentApiError::InvalidCoinSignature(coin.coin_pub.to_string()))?;
            let rtransaction_id = 0;
            let merchant_sig = messages::refund(
                Purpose::MerchantRefund,
                &h,
                &coin.coin_pub,
                &terms.merchant_pub,
                rtransaction_id,
                &coin.contribution,
                &denom.fee_refund,
            )
            .sign(key);
            refund_permissions.push(RefundPermission {
                coin_pub: coin.coin_pub,
                rtransaction_id,
                refund_amount: coin.contribution.clone(),
                refund_fee: denom.fee_refund.clone(),
                merchant_sig,
            });
        }
        info!("💸️ Payment of order [{}] aborted. {} refund permission(s) issued.", request.order_id, refund_permissions.len());
        Ok(AbortRefundResponse { merchant_pub: terms.merchant_pub, h_contract_terms: h, refund_permissions })
    }
}
