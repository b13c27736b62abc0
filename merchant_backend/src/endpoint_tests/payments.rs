use std::time::{Duration, Instant};

use actix_web::http::StatusCode;
use merchant_engine::{
    api::payment_objects::{CoinPaymentDetails, PayRequest},
    crypto::{Blob, EddsaPrivateKey, HashCode, Nonce},
    db_types::OrderId,
};
use serde_json::json;

use super::{
    helpers::{book_order, eur, TestBackend, EXCHANGE_URL},
    mocks::MockExchange,
};

fn pay_request(order_id: &str, mode: &str) -> PayRequest {
    let coin_priv = EddsaPrivateKey::generate();
    PayRequest {
        mode: mode.into(),
        order_id: OrderId::from(order_id),
        merchant_pub: EddsaPrivateKey::generate().public_key(),
        coins: vec![CoinPaymentDetails {
            contribution: eur("5"),
            coin_pub: coin_priv.public_key(),
            exchange_url: EXCHANGE_URL.into(),
            denom_pub: Blob::new(vec![1, 2, 3, 4]),
            ub_sig: Blob::new(vec![5, 6, 7, 8]),
            coin_sig: coin_priv.sign(b"not a deposit"),
        }],
        session_id: None,
    }
}

#[actix_web::test]
async fn pay_for_unknown_contract() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let body = serde_json::to_value(pay_request("never-created", "pay")).unwrap();
    let reply = backend.post("/public/pay", body).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2201);
}

#[actix_web::test]
async fn pay_with_bad_mode_or_no_coins() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let body = serde_json::to_value(pay_request("o1", "steal")).unwrap();
    let reply = backend.post("/public/pay", body).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 2200);

    let mut request = pay_request("o1", "pay");
    request.coins.clear();
    let reply = backend.post("/public/pay", serde_json::to_value(request).unwrap()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 2215);
}

#[actix_web::test]
async fn check_payment_arguments() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.get("/check-payment").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 25);
    assert_eq!(reply.json()["parameter"], "order_id");

    let reply = backend.get("/check-payment?order_id=ghost").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2300);
}

#[actix_web::test]
async fn unpaid_orders() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let order_id = backend.create_order(book_order()).await;

    // Not claimed yet
    let reply = backend.get(&format!("/check-payment?order_id={order_id}")).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let status = reply.json();
    assert_eq!(status["paid"], false);
    assert!(status["taler_pay_uri"].as_str().unwrap().starts_with("taler://pay/"));
    assert!(status["contract_url"].as_str().unwrap().contains(&order_id));

    let nonce = Nonce::random().to_string();
    let claim = backend.post(&format!("/orders/{order_id}/claim"), json!({ "nonce": nonce })).await;
    assert_eq!(claim.status, StatusCode::OK);

    let reply = backend.get(&format!("/check-payment?order_id={order_id}&session_id=sess-1")).await;
    assert_eq!(reply.status, StatusCode::OK);
    let status = reply.json();
    assert_eq!(status["paid"], false);
    assert!(status["taler_pay_uri"].as_str().unwrap().contains("/sess-1"));

    let reply = backend.get(&format!("/instances/default/check-payment?order_id={order_id}")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["paid"], false);
}

#[actix_web::test]
async fn check_payment_long_poll_times_out() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let order_id = backend.create_order(book_order()).await;
    let start = Instant::now();
    let reply = backend.get(&format!("/check-payment?order_id={order_id}&timeout=1")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["paid"], false);
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[actix_web::test]
async fn poll_payment() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let order_id = backend.create_order(book_order()).await;
    let reply = backend.get(&format!("/public/poll-payment?order_id={order_id}")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["parameter"], "h_contract");

    let h = HashCode::of(b"some other contract");
    let reply = backend.get(&format!("/public/poll-payment?order_id=ghost&h_contract={h}")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2300);

    let nonce = Nonce::random().to_string();
    backend.post(&format!("/orders/{order_id}/claim"), json!({ "nonce": nonce })).await;
    let reply = backend.get(&format!("/public/poll-payment?order_id={order_id}&h_contract={h}")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2301);
}

#[actix_web::test]
async fn trigger_pay() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let h = HashCode::of(b"contract");
    let reply = backend
        .get(&format!(
            "/public/trigger-pay?contract_url=https%3A%2F%2Fshop.test%2Fproposal&session_id=s-42&h_contract_terms={h}&\
             confirm_url=https%3A%2F%2Fshop.test%2Fconfirm"
        ))
        .await;
    assert_eq!(reply.status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(reply.header("X-Taler-Session-Id"), Some("s-42"));
    assert_eq!(reply.header("X-Taler-Contract-Url"), Some("https://shop.test/proposal"));
    assert_eq!(reply.header("X-Taler-Contract-Hash"), Some(h.to_string().as_str()));
    assert_eq!(reply.header("X-Taler-Confirm-Url"), Some("https://shop.test/confirm"));
    assert_eq!(reply.header("X-Taler-Resource-Url"), Some("https://shop.test/confirm"));
    assert_eq!(reply.body, "Processing payment ...\n");

    let reply = backend.get("/public/trigger-pay?contract_url=https%3A%2F%2Fshop.test%2Fproposal").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["parameter"], "session_id");
}
