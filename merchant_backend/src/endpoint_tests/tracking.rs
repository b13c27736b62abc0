use std::sync::{Arc, Mutex};

use actix_web::http::StatusCode;
use merchant_common::Timestamp;
use merchant_engine::{
    api::order_objects::ContractTermsView,
    crypto::{
        hash_transfer_deposits,
        messages,
        EddsaPrivateKey,
        EddsaPublicKey,
        EddsaSignature,
        HashCode,
        Nonce,
        WireTransferId,
    },
    db_types::{DepositRecord, InstanceId, OrderId},
    exchange::{
        ExchangeError,
        ExchangeKeys,
        ExchangeSigningKey,
        TrackTransactionOutcome,
        TrackTransferOutcome,
        TransactionWire,
        TransferDeposit,
        TransferDetails,
    },
    OrderManagement,
    PaymentManagement,
};
use serde_json::json;

use super::{
    helpers::{book_order, eur, TestBackend, EXCHANGE_URL},
    mocks::MockExchange,
};

const EXCHANGE_PARAM: &str = "exchange=https%3A%2F%2Fexchange.test%2F";

/// An exchange that aggregates every deposit it is asked about into the same wire transfer.
struct WiringExchange {
    key: EddsaPrivateKey,
    wtid: WireTransferId,
    execution_time: Timestamp,
    report: Arc<Mutex<Option<TransferDetails>>>,
}

impl WiringExchange {
    fn new() -> Self {
        Self {
            key: EddsaPrivateKey::generate(),
            wtid: WireTransferId::random(),
            execution_time: Timestamp::from_millis(1_700_000_000_000),
            report: Arc::new(Mutex::new(None)),
        }
    }

    fn keys(&self) -> ExchangeKeys {
        ExchangeKeys {
            master_public_key: EddsaPrivateKey::generate().public_key(),
            denoms: vec![],
            signkeys: vec![ExchangeSigningKey {
                key: self.key.public_key(),
                stamp_start: Timestamp::zero(),
                stamp_expire: Timestamp::never(),
            }],
            auditors: vec![],
        }
    }

    /// Expects exactly `tracked` deposit lookups and `fetched` transfer lookups.
    fn mock(&self, tracked: usize, fetched: usize) -> MockExchange {
        let mut exchange = MockExchange::new();
        let keys = self.keys();
        exchange.expect_keys().returning(move |_| Ok(keys.clone()));
        let (key, wtid, execution_time) = (self.key.clone(), self.wtid, self.execution_time);
        exchange.expect_track_transaction().times(tracked).returning(
            move |_url: &str,
                  h_wire: &HashCode,
                  _merchant_pub: &EddsaPublicKey,
                  h: &HashCode,
                  coin_pub: &EddsaPublicKey,
                  _sig: &EddsaSignature| {
                let coin_contribution = eur("4.99");
                let exchange_sig =
                    messages::wire_confirmation(h_wire, h, &wtid, coin_pub, execution_time, &coin_contribution)
                        .sign(&key);
                let wire =
                    TransactionWire { wtid, execution_time, coin_contribution, exchange_sig, exchange_pub: key.public_key() };
                let reply = json!(wire);
                Ok(TrackTransactionOutcome::Wired { wire, reply })
            },
        );
        let report = Arc::clone(&self.report);
        exchange.expect_track_transfer().times(fetched).returning(move |_, _| {
            let details = report.lock().unwrap().clone().expect("The transfer report was not prepared");
            Ok(TrackTransferOutcome::Found { reply: json!(details), details })
        });
        exchange
    }

    /// Prepares the signed report of the transfer, listing `deposits`.
    fn wire(&self, merchant_pub: EddsaPublicKey, h_wire: HashCode, deposits: Vec<TransferDeposit>) {
        let (total, wire_fee) = (eur("4.98"), eur("0.01"));
        let h_deposits = hash_transfer_deposits(
            deposits.iter().map(|d| (&d.h_contract_terms, &d.coin_pub, &d.deposit_value, &d.deposit_fee)),
        );
        let exchange_sig = messages::wire_deposit(
            &total,
            &wire_fee,
            &merchant_pub,
            &h_wire,
            &self.wtid,
            self.execution_time,
            &h_deposits,
        )
        .sign(&self.key);
        let details = TransferDetails {
            total,
            wire_fee,
            merchant_pub,
            h_wire,
            execution_time: self.execution_time,
            deposits,
            exchange_sig,
            exchange_pub: self.key.public_key(),
        };
        *self.report.lock().unwrap() = Some(details);
    }
}

struct PaidOrder {
    order_id: String,
    merchant_pub: EddsaPublicKey,
    h_wire: HashCode,
    deposit: TransferDeposit,
}

/// Creates, claims and pays an order with a single coin worth EUR:5.
async fn paid_order(backend: &TestBackend) -> PaidOrder {
    let order_id = backend.create_order(book_order()).await;
    let reply = backend.post(&format!("/orders/{order_id}/claim"), json!({ "nonce": Nonce::random() })).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let db = &backend.ctx.db;
    let contract =
        db.fetch_contract_terms(&InstanceId::new("default"), &OrderId::from(order_id.as_str())).await.unwrap().unwrap();
    let terms = ContractTermsView::from_record(&contract).unwrap();
    let h = contract.h_contract_terms;
    let exchange_key = EddsaPrivateKey::generate();
    let record = DepositRecord {
        h_contract_terms: h,
        coin_pub: EddsaPrivateKey::generate().public_key(),
        exchange_url: EXCHANGE_URL.into(),
        amount_with_fee: eur("5"),
        deposit_fee: eur("0.01"),
        refund_fee: eur("0.01"),
        wire_fee: eur("0.01"),
        exchange_pub: exchange_key.public_key(),
        exchange_sig: exchange_key.sign(b"deposit"),
        exchange_proof: json!({}),
    };
    db.record_payment(&h, std::slice::from_ref(&record), None).await.unwrap();
    let deposit = TransferDeposit {
        h_contract_terms: h,
        coin_pub: record.coin_pub,
        deposit_value: record.amount_with_fee,
        deposit_fee: record.deposit_fee,
    };
    PaidOrder { order_id, merchant_pub: contract.merchant_pub, h_wire: terms.h_wire, deposit }
}

#[actix_web::test]
async fn track_unknown_transaction() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.get("/track/transaction?order_id=ghost").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2400);
}

#[actix_web::test]
async fn track_unpaid_transaction() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let order_id = backend.create_order(book_order()).await;
    let reply = backend.get(&format!("/track/transaction?order_id={order_id}")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2400);
}

#[actix_web::test]
async fn track_transfer_with_unreachable_exchange() {
    let mut exchange = MockExchange::new();
    exchange
        .expect_keys()
        .withf(|url: &str| url == EXCHANGE_URL)
        .times(1)
        .returning(|_| Err(ExchangeError::Unreachable("connection refused".into())));
    let backend = TestBackend::new(exchange).await;
    let wtid = WireTransferId::random();
    let reply = backend.get(&format!("/track/transfer?exchange=https%3A%2F%2Fexchange.test%2F&wtid={wtid}")).await;
    assert_eq!(reply.status, StatusCode::FAILED_DEPENDENCY);
    assert_eq!(reply.code(), 2800);
}

#[actix_web::test]
async fn track_transfer_with_slow_exchange() {
    let mut exchange = MockExchange::new();
    exchange.expect_keys().returning(|_| Err(ExchangeError::Timeout));
    let backend = TestBackend::new(exchange).await;
    let wtid = WireTransferId::random();
    let reply = backend.get(&format!("/track/transfer?exchange=https%3A%2F%2Fexchange.test%2F&wtid={wtid}")).await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.code(), 2213);
}

#[actix_web::test]
async fn track_transfer_arguments() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.get("/track/transfer?exchange=https%3A%2F%2Fexchange.test%2F").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["parameter"], "wtid");
    let reply = backend.get("/track/transfer?exchange=https%3A%2F%2Fexchange.test%2F&wtid=not-base32!").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 26);
}

#[actix_web::test]
async fn track_settled_transaction() {
    let wiring = WiringExchange::new();
    let backend = TestBackend::new(wiring.mock(1, 1)).await;
    let order = paid_order(&backend).await;
    wiring.wire(order.merchant_pub, order.h_wire, vec![order.deposit.clone()]);

    let reply = backend.get(&format!("/track/transaction?order_id={}", order.order_id)).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let transfers = reply.json()["transfers"].clone();
    assert_eq!(transfers.as_array().unwrap().len(), 1);
    assert_eq!(transfers[0]["wtid"], wiring.wtid.to_string());
    assert_eq!(transfers[0]["exchange"], EXCHANGE_URL);
    assert_eq!(transfers[0]["amount"], "EUR:5");
    assert_eq!(transfers[0]["coins"][0]["coin_pub"], order.deposit.coin_pub.to_string());

    // Both answers are stored, so the exchange is not asked again
    let again = backend.get(&format!("/track/transaction?order_id={}", order.order_id)).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.json()["transfers"], transfers);
    let reply = backend.get(&format!("/track/transfer?{EXCHANGE_PARAM}&wtid={}", wiring.wtid)).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.json()["total"], "EUR:4.98");
}

#[actix_web::test]
async fn track_pending_transaction() {
    let mut exchange = MockExchange::new();
    let keys = WiringExchange::new().keys();
    exchange.expect_keys().returning(move |_| Ok(keys.clone()));
    exchange.expect_track_transaction().times(1).returning(|_, _, _, _, _, _| {
        Ok(TrackTransactionOutcome::Pending {
            execution_time: Some(Timestamp::from_millis(1_800_000_000_000)),
            reply: json!({ "execution_time": { "t_ms": 1_800_000_000_000i64 } }),
        })
    });
    let backend = TestBackend::new(exchange).await;
    let order = paid_order(&backend).await;
    let reply = backend.get(&format!("/track/transaction?order_id={}", order.order_id)).await;
    assert_eq!(reply.status, StatusCode::ACCEPTED, "{}", reply.body);
    assert_eq!(reply.json()["execution_time"]["t_ms"], 1_800_000_000_000i64);
}

#[actix_web::test]
async fn transfer_that_does_not_list_the_coin() {
    // The second lookup finds the stored transfer report, which still does not list the coin
    let wiring = WiringExchange::new();
    let backend = TestBackend::new(wiring.mock(2, 1)).await;
    let order = paid_order(&backend).await;
    let mut stranger = order.deposit.clone();
    stranger.coin_pub = EddsaPrivateKey::generate().public_key();
    wiring.wire(order.merchant_pub, order.h_wire, vec![stranger]);

    for _ in 0..2 {
        let reply = backend.get(&format!("/track/transaction?order_id={}", order.order_id)).await;
        assert_eq!(reply.status, StatusCode::FAILED_DEPENDENCY, "{}", reply.body);
        assert_eq!(reply.code(), 2401);
        let body = reply.json();
        assert_eq!(body["exchange_transfer_proof"]["total"], "EUR:4.98");
        assert_eq!(body["exchange_transaction_proof"]["wtid"], wiring.wtid.to_string());
    }
}

#[actix_web::test]
async fn track_fresh_transfer() {
    let wiring = WiringExchange::new();
    let backend = TestBackend::new(wiring.mock(0, 1)).await;
    let order = paid_order(&backend).await;
    wiring.wire(order.merchant_pub, order.h_wire, vec![order.deposit.clone()]);

    let reply = backend.get(&format!("/track/transfer?{EXCHANGE_PARAM}&wtid={}", wiring.wtid)).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let report = reply.json();
    assert_eq!(report["deposits"][0]["coin_pub"], order.deposit.coin_pub.to_string());
    assert_eq!(report["exchange_pub"], wiring.key.public_key().to_string());

    // The coin's transfer is now known, so tracking the order needs no exchange
    let reply = backend.get(&format!("/track/transaction?order_id={}", order.order_id)).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.json()["transfers"][0]["wtid"], wiring.wtid.to_string());
}

#[actix_web::test]
async fn transfer_with_conflicting_deposit_value() {
    let wiring = WiringExchange::new();
    let backend = TestBackend::new(wiring.mock(0, 1)).await;
    let order = paid_order(&backend).await;
    let mut cheaper = order.deposit.clone();
    cheaper.deposit_value = eur("4");
    wiring.wire(order.merchant_pub, order.h_wire, vec![cheaper]);

    let reply = backend.get(&format!("/track/transfer?{EXCHANGE_PARAM}&wtid={}", wiring.wtid)).await;
    assert_eq!(reply.status, StatusCode::CONFLICT, "{}", reply.body);
    assert_eq!(reply.code(), 2405);
    let body = reply.json();
    assert_eq!(body["exchange_deposit"]["deposit_value"], "EUR:4");
    assert_eq!(body["local_deposit"]["amount_with_fee"], "EUR:5");
}
