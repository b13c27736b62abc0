use std::sync::Arc;

use actix_web::{
    http::{header::HeaderMap, StatusCode},
    test,
    test::TestRequest,
    web,
    App,
};
use log::debug;
use merchant_common::{Amount, RelativeTime};
use merchant_engine::{
    crypto::EddsaPrivateKey,
    db_types::{InstanceId, NewInstance},
    events::EventProducers,
    settings::{MerchantSettings, TrustedExchange},
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    InstanceApi,
    PollRegistries,
    SqliteDatabase,
};
use serde_json::{json, Value};

use super::mocks::MockExchange;
use crate::{config::ServerOptions, routes::unknown_endpoint, server::MerchantContext};

pub const EXCHANGE_URL: &str = "https://exchange.test/";

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|e| panic!("Reply is not JSON ({e}): {}", self.body))
    }

    /// The `code` field of an error reply
    pub fn code(&self) -> u64 {
        self.json()["code"].as_u64().expect("Reply has no error code")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A backend on a fresh SQLite database, with the `default` instance set up and `exchange` standing in for every
/// exchange.
pub struct TestBackend {
    pub ctx: MerchantContext<SqliteDatabase, MockExchange>,
}

impl TestBackend {
    pub async fn new(exchange: MockExchange) -> Self {
        Self::with_default_instance(exchange, false).await
    }

    pub async fn tipping(exchange: MockExchange) -> Self {
        Self::with_default_instance(exchange, true).await
    }

    async fn with_default_instance(exchange: MockExchange, tips: bool) -> Self {
        let db = prepare_test_env(&random_db_path()).await;
        let settings = Arc::new(MerchantSettings::new("EUR").with_exchange(TrustedExchange {
            url: EXCHANGE_URL.into(),
            master_pub: EddsaPrivateKey::generate().public_key(),
            currency: "EUR".into(),
        }));
        let mut instance = new_instance("default");
        if tips {
            instance.tip_exchange = Some(EXCHANGE_URL.into());
            instance.tip_reserve_priv = Some(EddsaPrivateKey::generate());
        }
        InstanceApi::new(db.clone(), settings.clone()).create_instance(instance).await.expect("Default instance");
        let ctx = MerchantContext {
            db,
            exchange: Arc::new(exchange),
            settings,
            pollers: PollRegistries::default(),
            producers: EventProducers::default(),
            options: ServerOptions::default(),
        };
        Self { ctx }
    }

    pub async fn call(&self, req: TestRequest) -> Reply {
        let ctx = self.ctx.clone();
        let app = App::new().configure(|cfg| ctx.configure(cfg)).default_service(web::to(unknown_endpoint));
        let service = test::init_service(app).await;
        let res = test::call_service(&service, req.to_request()).await;
        let status = res.status();
        let headers = res.headers().clone();
        let body = String::from_utf8_lossy(&test::read_body(res).await).into_owned();
        debug!("🚀️ Reply {status}: {body}");
        Reply { status, headers, body }
    }

    pub async fn get(&self, path: &str) -> Reply {
        self.call(TestRequest::get().uri(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Reply {
        self.call(TestRequest::post().uri(path).set_json(body)).await
    }

    /// Creates an order in the default instance and returns its id.
    pub async fn create_order(&self, order: Value) -> String {
        let reply = self.post("/orders", json!({ "order": order })).await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        reply.json()["order_id"].as_str().expect("order_id").to_string()
    }
}

pub fn new_instance(id: &str) -> NewInstance {
    NewInstance {
        id: InstanceId::new(id),
        name: format!("The {id} shop"),
        private_key: None,
        payto_uris: vec![format!("payto://x-taler-bank/bank.test/{id}")],
        address: None,
        jurisdiction: None,
        default_max_deposit_fee: eur("0.1"),
        default_max_wire_fee: eur("0.1"),
        default_wire_fee_amortization: 1,
        default_pay_delay: RelativeTime::from_secs(3600),
        default_wire_transfer_delay: RelativeTime::from_secs(7200),
        tip_exchange: None,
        tip_reserve_priv: None,
    }
}

pub fn eur(value: &str) -> Amount {
    format!("EUR:{value}").parse().expect("Invalid amount")
}

pub fn book_order() -> Value {
    json!({
        "amount": "EUR:5",
        "summary": "A book about cats",
        "fulfillment_url": "https://shop.test/books/cats",
    })
}
