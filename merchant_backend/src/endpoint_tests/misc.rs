use actix_web::{http::StatusCode, test::TestRequest};

use super::{helpers::TestBackend, mocks::MockExchange};

#[actix_web::test]
async fn health() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.get("/health").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "👍️\n");
}

#[actix_web::test]
async fn config() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.get("/config").await;
    assert_eq!(reply.status, StatusCode::OK);
    let body = reply.json();
    assert_eq!(body["currency"], "EUR");
    assert_eq!(body["version"], "0:0:0");
}

#[actix_web::test]
async fn unknown_endpoints() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let reply = backend.get("/no/such/thing").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 10);
    assert_eq!(reply.json()["path"], "/no/such/thing");
    // Known path, wrong method
    let reply = backend.call(TestRequest::delete().uri("/orders")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn malformed_json_bodies() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let req = TestRequest::post()
        .uri("/orders")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{\"order\": {\"amount\": ");
    let reply = backend.call(req).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 20);
}

#[actix_web::test]
async fn oversized_bodies() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let summary = "x".repeat(2 * 1024 * 1024);
    let req = TestRequest::post()
        .uri("/orders")
        .insert_header(("Content-Type", "application/json"))
        .set_payload(format!("{{\"order\": {{\"summary\": \"{summary}\"}}}}"));
    let reply = backend.call(req).await;
    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(reply.code(), 27);
}
