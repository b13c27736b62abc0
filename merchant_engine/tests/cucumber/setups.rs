use cucumber::given;
use merchant_common::{Amount, RelativeTime};
use merchant_engine::{
    crypto::EddsaPrivateKey,
    db_types::{InstanceId, NewInstance},
};

use crate::cucumber::{
    fake_exchange::EXCHANGE_URL,
    merchant_world::{MerchantSystem, MerchantWorld},
};

fn new_instance(id: &str, payto: &str) -> NewInstance {
    NewInstance {
        id: InstanceId::new(id),
        name: format!("The {id} shop"),
        private_key: None,
        payto_uris: vec![payto.to_string()],
        address: None,
        jurisdiction: None,
        default_max_deposit_fee: "EUR:0.05".parse().expect("Invalid amount"),
        default_max_wire_fee: "EUR:0.05".parse().expect("Invalid amount"),
        default_wire_fee_amortization: 1,
        default_pay_delay: RelativeTime::from_secs(3600),
        default_wire_transfer_delay: RelativeTime::from_secs(86400),
        tip_exchange: None,
        tip_reserve_priv: None,
    }
}

#[given("a fresh install")]
async fn fresh_database(world: &mut MerchantWorld) {
    let system = MerchantSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "an instance {string} paying into {string}")]
async fn instance(world: &mut MerchantWorld, id: String, payto: String) {
    world.system().instances.create_instance(new_instance(&id, &payto)).await.expect("Error creating instance");
}

#[given(expr = "an instance {string} tipping from a reserve holding {string}")]
async fn tipping_instance(world: &mut MerchantWorld, id: String, credit: String) {
    let reserve_priv = EddsaPrivateKey::generate();
    let credit = credit.parse::<Amount>().expect("Invalid amount");
    world.system().exchange.fund_reserve(reserve_priv.public_key(), credit);
    let mut instance = new_instance(&id, &format!("payto://x-taler-bank/bank.test/{id}"));
    instance.tip_exchange = Some(EXCHANGE_URL.into());
    instance.tip_reserve_priv = Some(reserve_priv);
    world.system().instances.create_instance(instance).await.expect("Error creating instance");
}
