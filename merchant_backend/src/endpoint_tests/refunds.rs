use actix_web::http::StatusCode;
use merchant_engine::crypto::Nonce;
use serde_json::json;

use super::{
    helpers::{book_order, TestBackend},
    mocks::MockExchange,
};

#[actix_web::test]
async fn refund_unknown_order() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.post("/refund", json!({ "order_id": "ghost", "refund": "EUR:1", "reason": "broken" })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2500);

    let reply = backend.get("/refund?order_id=ghost").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2500);
}

#[actix_web::test]
async fn refunds_in_foreign_currency() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let order_id = backend.create_order(book_order()).await;
    let reply = backend.post("/refund", json!({ "order_id": order_id, "refund": "KUDOS:1" })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 2503);
}

#[actix_web::test]
async fn refund_unpaid_order() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let order_id = backend.create_order(book_order()).await;
    let reply = backend.post("/refund", json!({ "order_id": order_id, "refund": "EUR:1" })).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.code(), 2502);

    let nonce = Nonce::random().to_string();
    backend.post(&format!("/orders/{order_id}/claim"), json!({ "nonce": nonce })).await;
    let reply = backend.post("/refund", json!({ "order_id": order_id, "refund": "EUR:1" })).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.code(), 2502);

    // Nothing was refunded, and there is nothing to submit to the exchange
    let reply = backend.get(&format!("/refund?order_id={order_id}")).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert!(reply.json()["refunds"].as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn refund_requires_order_id() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.get("/refund").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["parameter"], "order_id");
    let reply = backend.post("/refund", json!({ "refund": "EUR:1" })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 25);
    assert_eq!(reply.json()["error"], "missing parameter");
    assert_eq!(reply.json()["parameter"], "order_id");
}
