use actix_web::http::StatusCode;
use merchant_engine::crypto::Nonce;
use serde_json::json;

use super::{
    helpers::{book_order, TestBackend},
    mocks::MockExchange,
};

#[actix_web::test]
async fn create_and_claim_order() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let order_id = backend.create_order(book_order()).await;
    assert!(!order_id.is_empty());

    let nonce = Nonce::random().to_string();
    let reply = backend.post(&format!("/orders/{order_id}/claim"), json!({ "nonce": nonce })).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let claim = reply.json();
    assert!(claim["sig"].is_string());
    let terms = &claim["contract_terms"];
    assert_eq!(terms["order_id"], order_id.as_str());
    assert_eq!(terms["amount"], "EUR:5");
    assert_eq!(terms["nonce"], nonce.as_str());
    assert_eq!(terms["exchanges"][0]["url"], "https://exchange.test/");

    // Claiming again with the same nonce hands out the same contract
    let again = backend.post(&format!("/orders/{order_id}/claim"), json!({ "nonce": nonce })).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.json()["sig"], claim["sig"]);

    let other = Nonce::random().to_string();
    let reply = backend.post(&format!("/orders/{order_id}/claim"), json!({ "nonce": other })).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.code(), 2101);
}

#[actix_web::test]
async fn claim_unknown_order() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let nonce = Nonce::random().to_string();
    let reply = backend.post("/orders/nope/claim", json!({ "nonce": nonce })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2102);
}

#[actix_web::test]
async fn duplicate_order_ids() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let mut order = book_order();
    order["order_id"] = json!("fixed-1");
    assert_eq!(backend.create_order(order.clone()).await, "fixed-1");
    let reply = backend.post("/orders", json!({ "order": order })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 2100);
}

#[actix_web::test]
async fn incomplete_orders() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.post("/orders", json!({ "order": { "amount": "EUR:5", "fulfillment_url": "https://a.test/" } })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 2106);
    assert_eq!(reply.json()["field"], "summary");
}

#[actix_web::test]
async fn orders_for_unknown_instances() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.post("/instances/nobody/orders", json!({ "order": book_order() })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2000);
    let reply = backend.post("/orders?instance=nobody", json!({ "order": book_order() })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2000);
}

#[actix_web::test]
async fn legacy_proposal_routes() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.post("/proposal", json!({ "order": book_order() })).await;
    assert_eq!(reply.status, StatusCode::OK);
    let order_id = reply.json()["order_id"].as_str().unwrap().to_string();

    let reply = backend.get(&format!("/public/proposal?order_id={order_id}")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 25);
    assert_eq!(reply.json()["parameter"], "nonce");

    let nonce = Nonce::random();
    let reply = backend.get(&format!("/public/proposal?order_id={order_id}&nonce={nonce}")).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.json()["contract_terms"]["nonce"], nonce.to_string());
}

#[actix_web::test]
async fn list_orders() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let first = backend.create_order(book_order()).await;
    let second = backend.create_order(book_order()).await;
    let reply = backend.get("/orders").await;
    assert_eq!(reply.status, StatusCode::OK);
    let orders = reply.json()["orders"].as_array().cloned().unwrap();
    let ids = orders.iter().map(|o| o["order_id"].as_str().unwrap()).collect::<Vec<_>>();
    // Newest first by default
    assert_eq!(ids, vec![second.as_str(), first.as_str()]);
    assert!(orders.iter().all(|o| o["paid"] == false));

    let reply = backend.get("/orders?delta=1").await;
    let orders = reply.json()["orders"].as_array().cloned().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["order_id"], first.as_str());

    let reply = backend.get("/orders?paid=yes").await;
    assert!(reply.json()["orders"].as_array().unwrap().is_empty());

    let reply = backend.get("/orders?paid=perhaps").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 26);
}

#[actix_web::test]
async fn instance_prefixed_routes() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.post("/instances/default/orders", json!({ "order": book_order() })).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let order_id = reply.json()["order_id"].as_str().unwrap().to_string();
    let reply = backend.get("/instances/default/orders").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["orders"][0]["order_id"], order_id.as_str());
}

#[actix_web::test]
async fn order_listing_long_poll_times_out() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let start = std::time::Instant::now();
    let reply = backend.get("/orders?delta=5&timeout_ms=200").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.json()["orders"].as_array().unwrap().is_empty());
    assert!(start.elapsed() >= std::time::Duration::from_millis(150));
}
