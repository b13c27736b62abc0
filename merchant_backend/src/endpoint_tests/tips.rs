use actix_web::http::StatusCode;
use merchant_engine::{
    crypto::HashCode,
    exchange::{ReserveHistoryEntry, ReserveStatus},
};
use serde_json::json;

use super::{
    helpers::{eur, TestBackend},
    mocks::MockExchange,
};

fn funded_reserve() -> MockExchange {
    let mut exchange = MockExchange::new();
    exchange.expect_reserve_status().returning(|_, _| {
        Ok(ReserveStatus {
            balance: eur("10"),
            history: vec![ReserveHistoryEntry { kind: "CREDIT".into(), amount: eur("10") }],
        })
    });
    exchange
}

#[actix_web::test]
async fn instances_without_tipping() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.post("/tip-authorize", json!({ "amount": "EUR:1", "justification": "thanks" })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2600);
    let reply = backend.get("/tip-query").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2600);
}

#[actix_web::test]
async fn authorize_and_query_tips() {
    let backend = TestBackend::tipping(funded_reserve()).await;
    let reply = backend.get("/tip-query").await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.json()["amount_available"], "EUR:10");

    let reply = backend
        .post("/tip-authorize", json!({ "amount": "EUR:2", "justification": "thanks", "next_url": "https://shop.test/" }))
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let tip = reply.json();
    let tip_id = tip["tip_id"].as_str().unwrap().to_string();
    assert!(tip["taler_tip_uri"].as_str().unwrap().starts_with("taler://tip/"));
    assert!(tip["taler_tip_uri"].as_str().unwrap().contains(&tip_id));

    let reply = backend.get("/tip-query").await;
    let query = reply.json();
    assert_eq!(query["amount_authorized"], "EUR:2");
    assert_eq!(query["amount_available"], "EUR:8");

    let reply = backend.get(&format!("/public/tip-pickup?tip_id={tip_id}")).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let info = reply.json();
    assert_eq!(info["amount"], "EUR:2");
    assert_eq!(info["amount_left"], "EUR:2");
    assert_eq!(info["exchange_url"], "https://exchange.test/");
}

#[actix_web::test]
async fn tips_the_reserve_cannot_cover() {
    let backend = TestBackend::tipping(funded_reserve()).await;
    let reply = backend.post("/tip-authorize", json!({ "amount": "EUR:11", "justification": "too generous" })).await;
    assert_eq!(reply.status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(reply.code(), 2601);

    let reply = backend.post("/tip-authorize", json!({ "amount": "KUDOS:1", "justification": "wrong money" })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 2606);
}

#[actix_web::test]
async fn unknown_tips() {
    let backend = TestBackend::tipping(funded_reserve()).await;
    let tip_id = HashCode::of(b"no such tip");
    let reply = backend.get(&format!("/public/tip-pickup?tip_id={tip_id}")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2602);

    let reply = backend.post("/tip-pickup", json!({ "tip_id": tip_id, "planchets": [] })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2602);
}
