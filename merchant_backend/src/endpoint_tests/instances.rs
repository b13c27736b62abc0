use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::json;

use super::{
    helpers::{book_order, new_instance, TestBackend},
    mocks::MockExchange,
};

#[actix_web::test]
async fn instance_life_cycle() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let books = serde_json::to_value(new_instance("books")).unwrap();
    let reply = backend.post("/instances", books.clone()).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let created = reply.json();
    assert_eq!(created["id"], "books");
    assert_eq!(created["active"], true);
    assert!(created["merchant_pub"].is_string());
    assert_eq!(created["accounts"].as_array().unwrap().len(), 1);

    let reply = backend.post("/instances", books).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.code(), 2001);

    let reply = backend.get("/instances").await;
    assert_eq!(reply.status, StatusCode::OK);
    let ids = reply.json()["instances"].as_array().unwrap().iter().map(|i| i["id"].clone()).collect::<Vec<_>>();
    assert!(ids.contains(&json!("default")));
    assert!(ids.contains(&json!("books")));

    let req = TestRequest::patch().uri("/instances/books").set_json(json!({ "name": "Second hand books" }));
    let reply = backend.call(req).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.json()["name"], "Second hand books");
    assert_eq!(backend.get("/instances/books").await.json()["name"], "Second hand books");

    // Orders go to the instance named in the path
    let reply = backend.post("/instances/books/orders", json!({ "order": book_order() })).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let reply = backend.get("/instances/books/orders").await;
    assert_eq!(reply.json()["orders"].as_array().unwrap().len(), 1);
    let reply = backend.get("/orders").await;
    assert!(reply.json()["orders"].as_array().unwrap().is_empty());

    // Deleting without purging keeps the instance, but it stops trading
    let reply = backend.call(TestRequest::delete().uri("/instances/books")).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert_eq!(backend.get("/instances/books").await.json()["active"], false);
    let reply = backend.post("/instances/books/orders", json!({ "order": book_order() })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2000);

    let reply = backend.call(TestRequest::delete().uri("/instances/books?purge=yes")).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let reply = backend.get("/instances/books").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2000);
}

#[actix_web::test]
async fn invalid_instances() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let mut bad_id = new_instance("books");
    bad_id.id = "no spaces please".into();
    let reply = backend.post("/instances", serde_json::to_value(bad_id).unwrap()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 2003);

    let mut bad_account = new_instance("books");
    bad_account.payto_uris = vec!["iban:DE89370400440532013000".into()];
    let reply = backend.post("/instances", serde_json::to_value(bad_account).unwrap()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.code(), 2003);

    let reply = backend.call(TestRequest::delete().uri("/instances/nobody")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2000);
}

#[actix_web::test]
async fn product_inventory() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let product = json!({
        "product_id": "cat-book",
        "description": "A book about cats",
        "unit": "book",
        "price": "EUR:5",
        "total_stock": 2,
    });
    let reply = backend.post("/instances/default/products", product.clone()).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.json()["total_sold"], 0);

    let reply = backend.post("/instances/default/products", product).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.code(), 2701);

    let reply = backend.get("/instances/default/products").await;
    assert_eq!(reply.json()["products"][0]["product_id"], "cat-book");

    let req = TestRequest::patch().uri("/instances/default/products/cat-book").set_json(json!({ "total_stock": 5 }));
    let reply = backend.call(req).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.json()["total_stock"], 5);

    let reply = backend.call(TestRequest::delete().uri("/instances/default/products/cat-book")).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let reply = backend.get("/instances/default/products/cat-book").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2700);

    let reply = backend.get("/instances/nobody/products").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.code(), 2000);
}

#[actix_web::test]
async fn orders_take_products_out_of_stock() {
    let backend = TestBackend::new(MockExchange::new()).await;
    let product = json!({ "product_id": "mug", "description": "A mug", "price": "EUR:3", "total_stock": 1 });
    backend.post("/instances/default/products", product).await;
    let order = json!({ "amount": "EUR:3", "summary": "Mug", "fulfillment_url": "https://shop.test/mug" });
    let claim = json!([{ "product_id": "mug", "quantity": 1 }]);
    let reply = backend.post("/orders", json!({ "order": order, "inventory_products": claim })).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(backend.get("/instances/default/products/mug").await.json()["total_sold"], 1);

    let reply = backend.post("/orders", json!({ "order": order, "inventory_products": claim })).await;
    assert_eq!(reply.status, StatusCode::GONE);
    assert_eq!(reply.code(), 2108);
}
