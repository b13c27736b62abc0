use std::sync::Arc;

use futures_util::future::join_all;
use log::*;
use merchant_common::RelativeTime;
use merchant_engine::{
    api::{order_objects::PostOrderRequest, OrderApiError},
    crypto::Nonce,
    db_types::{InstanceId, NewInstance, OrderId},
    helpers::MerchantUrls,
    settings::MerchantSettings,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    InstanceApi,
    MerchantDatabase,
    OrderApi,
    PollRegistries,
};
use serde_json::json;
use sqlx::{migrate::MigrateDatabase, Sqlite};
use tokio::runtime::Runtime;

const NUM_WALLETS: usize = 10;

#[test]
fn exactly_one_concurrent_claim_wins() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async move {
        let url = random_db_path();
        let mut db = prepare_test_env(&url).await;
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
        let order = json!({"order_id": "race", "amount": "EUR:1", "summary": "Race", "fulfillment_url": "https://shop.test/"});
        api.create_order(&id, &urls, PostOrderRequest { order, inventory_products: vec![] }).await.unwrap();

        let order_id = OrderId::from("race");
        let nonces = (0..NUM_WALLETS).map(|_| Nonce::random()).collect::<Vec<_>>();
        info!("🚀️ {NUM_WALLETS} wallets claiming the same order");
        let claims = join_all(nonces.iter().map(|n| api.claim_order(&id, &order_id, n))).await;
        let won = claims.iter().filter(|c| c.is_ok()).count();
        let lost = claims.iter().filter(|c| matches!(c, Err(OrderApiError::AlreadyClaimed(_)))).count();
        assert_eq!(won, 1, "{claims:?}");
        assert_eq!(lost, NUM_WALLETS - 1);

        db.close().await.unwrap();
        Sqlite::drop_database(&url).await.unwrap();
    });
}
