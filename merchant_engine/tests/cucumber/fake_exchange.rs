use std::{collections::HashMap, sync::Mutex};

use merchant_common::{Amount, RelativeTime, Timestamp};
use merchant_engine::{
    crypto::{messages, Blob, EddsaPrivateKey, EddsaPublicKey, EddsaSignature, HashCode, Purpose, WireTransferId},
    exchange::{
        CoinHistoryEntry,
        Denomination,
        DepositConfirmation,
        DepositOutcome,
        DepositRequest,
        ExchangeClient,
        ExchangeError,
        ExchangeKeys,
        ExchangeRejection,
        ExchangeSigningKey,
        RefundOutcome,
        RefundRequest,
        ReserveHistoryEntry,
        ReserveStatus,
        TrackTransactionOutcome,
        TrackTransferOutcome,
        WireFees,
        WithdrawOutcome,
        WithdrawRequest,
    },
};
use serde_json::json;

pub const EXCHANGE_URL: &str = "https://exchange.test/";

/// An in-memory exchange with a single one-euro denomination. It keeps just enough state to detect double spending
/// and to know how much has been paid into its reserves.
pub struct FakeExchange {
    pub master_priv: EddsaPrivateKey,
    pub signing_priv: EddsaPrivateKey,
    pub denom: Denomination,
    spent: Mutex<HashMap<EddsaPublicKey, Vec<CoinHistoryEntry>>>,
    reserves: Mutex<HashMap<EddsaPublicKey, Amount>>,
    withdrawals: Mutex<usize>,
}

impl std::fmt::Debug for FakeExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FakeExchange")
    }
}

fn eur(s: &str) -> Amount {
    format!("EUR:{s}").parse().expect("Invalid test amount")
}

impl FakeExchange {
    pub fn new() -> Self {
        let now = Timestamp::now();
        let year = RelativeTime::from_secs(365 * 24 * 3600);
        let denom = Denomination {
            denom_pub: Blob::new(HashCode::random().as_bytes().to_vec()),
            value: eur("1"),
            fee_withdraw: eur("0.01"),
            fee_deposit: eur("0.01"),
            fee_refund: eur("0.01"),
            stamp_start: Timestamp::zero(),
            stamp_expire_withdraw: now + year,
            stamp_expire_deposit: now + year,
            stamp_expire_legal: now + year,
        };
        Self {
            master_priv: EddsaPrivateKey::generate(),
            signing_priv: EddsaPrivateKey::generate(),
            denom,
            spent: Mutex::new(HashMap::new()),
            reserves: Mutex::new(HashMap::new()),
            withdrawals: Mutex::new(0),
        }
    }

    pub fn fund_reserve(&self, reserve_pub: EddsaPublicKey, amount: Amount) {
        self.reserves.lock().expect("Poisoned lock").insert(reserve_pub, amount);
    }

    pub fn withdrawal_count(&self) -> usize {
        *self.withdrawals.lock().expect("Poisoned lock")
    }
}

impl ExchangeClient for FakeExchange {
    async fn keys(&self, _exchange_url: &str) -> Result<ExchangeKeys, ExchangeError> {
        Ok(ExchangeKeys {
            master_public_key: self.master_priv.public_key(),
            denoms: vec![self.denom.clone()],
            signkeys: vec![ExchangeSigningKey {
                key: self.signing_priv.public_key(),
                stamp_start: Timestamp::zero(),
                stamp_expire: self.denom.stamp_expire_legal,
            }],
            auditors: vec![],
        })
    }

    async fn wire_fees(&self, _exchange_url: &str) -> Result<WireFees, ExchangeError> {
        Ok(WireFees::default())
    }

    async fn deposit(&self, _exchange_url: &str, deposit: &DepositRequest) -> Result<DepositOutcome, ExchangeError> {
        let mut spent = self.spent.lock().expect("Poisoned lock");
        let history = spent.entry(deposit.coin_pub).or_default();
        let protocol = |e: merchant_common::AmountError| ExchangeError::Protocol(e.to_string());
        let already = Amount::sum("EUR", history.iter().map(|e| &e.amount)).map_err(protocol)?;
        let total = already.checked_add(&deposit.contribution).map_err(protocol)?;
        if total.try_cmp(&self.denom.value).map_err(protocol)?.is_gt() {
            let reply = json!({ "code": 1205, "hint": "insufficient funds", "history": history });
            return Ok(DepositOutcome::DoubleSpent { history: history.clone(), reply });
        }
        history.push(CoinHistoryEntry { kind: "DEPOSIT".into(), amount: deposit.contribution.clone() });
        let without_fee = deposit
            .contribution
            .saturating_sub(&self.denom.fee_deposit)
            .map_err(protocol)?;
        let exchange_sig = messages::deposit_confirmation(
            &deposit.h_contract_terms,
            &deposit.h_wire,
            deposit.timestamp,
            deposit.refund_deadline,
            &without_fee,
            &deposit.coin_pub,
            &deposit.merchant_pub,
        )
        .sign(&self.signing_priv);
        let exchange_pub = self.signing_priv.public_key();
        let reply = json!({ "exchange_pub": exchange_pub, "exchange_sig": exchange_sig });
        Ok(DepositOutcome::Accepted(DepositConfirmation { exchange_pub, exchange_sig, reply }))
    }

    async fn track_transaction(
        &self,
        _exchange_url: &str,
        _h_wire: &HashCode,
        _merchant_pub: &EddsaPublicKey,
        _h_contract_terms: &HashCode,
        _coin_pub: &EddsaPublicKey,
        _merchant_sig: &EddsaSignature,
    ) -> Result<TrackTransactionOutcome, ExchangeError> {
        let reply = json!({ "execution_time": { "t_ms": "never" } });
        Ok(TrackTransactionOutcome::Pending { execution_time: None, reply })
    }

    async fn track_transfer(
        &self,
        _exchange_url: &str,
        _wtid: &WireTransferId,
    ) -> Result<TrackTransferOutcome, ExchangeError> {
        let reply = json!({ "code": 1814, "hint": "wire transfer unknown" });
        Ok(TrackTransferOutcome::Rejected(ExchangeRejection::from_reply(404, reply)))
    }

    async fn refund(
        &self,
        _exchange_url: &str,
        coin_pub: &EddsaPublicKey,
        refund: &RefundRequest,
    ) -> Result<RefundOutcome, ExchangeError> {
        let known = self.spent.lock().expect("Poisoned lock").contains_key(coin_pub);
        if !known {
            let reply = json!({ "code": 1500, "hint": "coin unknown" });
            return Ok(RefundOutcome::Rejected(ExchangeRejection::from_reply(404, reply)));
        }
        let exchange_sig = messages::refund(
            Purpose::ExchangeConfirmRefund,
            &refund.h_contract_terms,
            coin_pub,
            &refund.merchant_pub,
            refund.rtransaction_id,
            &refund.refund_amount,
            &refund.refund_fee,
        )
        .sign(&self.signing_priv);
        let exchange_pub = self.signing_priv.public_key();
        let reply = json!({ "exchange_pub": exchange_pub, "exchange_sig": exchange_sig });
        Ok(RefundOutcome::Confirmed { exchange_pub, exchange_sig, reply })
    }

    async fn reserve_status(
        &self,
        _exchange_url: &str,
        reserve_pub: &EddsaPublicKey,
    ) -> Result<ReserveStatus, ExchangeError> {
        match self.reserves.lock().expect("Poisoned lock").get(reserve_pub) {
            Some(credit) => Ok(ReserveStatus {
                balance: credit.clone(),
                history: vec![ReserveHistoryEntry { kind: "CREDIT".into(), amount: credit.clone() }],
            }),
            None => Err(ExchangeError::Rejected(ExchangeRejection::from_reply(
                404,
                json!({ "code": 1601, "hint": "reserve unknown" }),
            ))),
        }
    }

    async fn withdraw(
        &self,
        _exchange_url: &str,
        _reserve_pub: &EddsaPublicKey,
        request: &WithdrawRequest,
    ) -> Result<WithdrawOutcome, ExchangeError> {
        *self.withdrawals.lock().expect("Poisoned lock") += 1;
        let sig = self.signing_priv.sign(request.coin_ev.as_bytes());
        Ok(WithdrawOutcome::Signed(Blob::new(sig.as_bytes().to_vec())))
    }
}
