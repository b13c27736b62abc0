use std::sync::Arc;

use merchant_common::RelativeTime;
use merchant_engine::{
    api::order_objects::PostOrderRequest,
    crypto::{EddsaPrivateKey, EddsaSignature, HashCode, Nonce},
    db_types::{ContractTermsRecord, DepositRecord, InstanceId, NewInstance, OrderId},
    helpers::MerchantUrls,
    settings::MerchantSettings,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    InstanceApi,
    MerchantDatabase,
    OrderApi,
    OrderManagement,
    PaymentManagement,
    PollRegistries,
    SqliteDatabase,
};
use serde_json::json;
use sqlx::{migrate::MigrateDatabase, Sqlite};
use tokio::runtime::Runtime;

async fn claimed_order(db: &SqliteDatabase) -> ContractTermsRecord {
    let settings = Arc::new(MerchantSettings::new("EUR"));
    let instance = NewInstance {
        id: InstanceId::new("shop"),
        name: "Shop".into(),
        private_key: None,
        payto_uris: vec!["payto://x-taler-bank/bank.test/shop".into()],
        address: None,
        jurisdiction: None,
        default_max_deposit_fee: "EUR:0.05".parse().unwrap(),
        default_max_wire_fee: "EUR:0.05".parse().unwrap(),
        default_wire_fee_amortization: 1,
        default_pay_delay: RelativeTime::from_secs(3600),
        default_wire_transfer_delay: RelativeTime::from_secs(86400),
        tip_exchange: None,
        tip_reserve_priv: None,
    };
    InstanceApi::new(db.clone(), settings.clone()).create_instance(instance).await.unwrap();
    let api = OrderApi::new(db.clone(), settings, PollRegistries::default());
    let id = InstanceId::new("shop");
    let urls = MerchantUrls::new("shop.test", None, id.clone(), true);
    let order = json!({"order_id": "tea", "amount": "EUR:3", "summary": "Tea", "fulfillment_url": "https://shop.test/"});
    api.create_order(&id, &urls, PostOrderRequest { order, inventory_products: vec![] }).await.unwrap();
    let order_id = OrderId::from("tea");
    api.claim_order(&id, &order_id, &Nonce::random()).await.unwrap();
    db.fetch_contract_terms(&id, &order_id).await.unwrap().unwrap()
}

fn deposit(h_contract_terms: HashCode, value: &str) -> DepositRecord {
    let exchange_key = EddsaPrivateKey::generate();
    DepositRecord {
        h_contract_terms,
        coin_pub: EddsaPrivateKey::generate().public_key(),
        exchange_url: "https://exchange.test/".into(),
        amount_with_fee: value.parse().unwrap(),
        deposit_fee: "EUR:0.01".parse().unwrap(),
        refund_fee: "EUR:0.01".parse().unwrap(),
        wire_fee: "EUR:0.01".parse().unwrap(),
        exchange_pub: exchange_key.public_key(),
        exchange_sig: EddsaSignature::random(),
        exchange_proof: json!({"status": "ok"}),
    }
}

#[test]
fn deposits_and_paid_flag_are_stored_together() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async move {
        let url = random_db_path();
        let mut db = prepare_test_env(&url).await;
        let contract = claimed_order(&db).await;
        let h = contract.h_contract_terms;
        assert!(!contract.paid);

        let deposits = vec![deposit(h, "EUR:1"), deposit(h, "EUR:2")];
        assert_eq!(db.record_payment(&h, &deposits, Some("sess-1")).await.unwrap(), 2);
        // Replaying the same payment stores nothing new
        assert_eq!(db.record_payment(&h, &deposits, Some("sess-1")).await.unwrap(), 0);
        assert_eq!(db.fetch_deposits(&h).await.unwrap().len(), 2);
        let contract = db.fetch_contract_terms(&contract.instance_id, &contract.order_id).await.unwrap().unwrap();
        assert!(contract.paid);
        assert!(db.is_paid_in_session(&contract.instance_id, "sess-1", &contract.order_id).await.unwrap());

        db.close().await.unwrap();
        Sqlite::drop_database(&url).await.unwrap();
    });
}

#[test]
fn failed_payment_records_leave_no_deposits_behind() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async move {
        let url = random_db_path();
        let mut db = prepare_test_env(&url).await;
        let contract = claimed_order(&db).await;
        // No contract has this hash, so marking it paid fails after the deposits were written
        let unknown = HashCode::of(b"no such contract");
        let deposits = vec![deposit(unknown, "EUR:1"), deposit(unknown, "EUR:2")];
        assert!(db.record_payment(&unknown, &deposits, None).await.is_err());
        assert!(db.fetch_deposits(&unknown).await.unwrap().is_empty());
        let contract = db.fetch_contract_terms(&contract.instance_id, &contract.order_id).await.unwrap().unwrap();
        assert!(!contract.paid);

        db.close().await.unwrap();
        Sqlite::drop_database(&url).await.unwrap();
    });
}
