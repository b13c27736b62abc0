use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};

use cucumber::World;
use log::*;
use merchant_common::Amount;
use merchant_engine::{
    api::{
        order_objects::{ClaimResponse, ContractTermsView},
        payment_objects::{CoinPaymentDetails, PayRequest, PayResult, RefundDetail},
        tip_objects::{Planchet, TipAuthorizeResponse},
    },
    crypto::{messages, Blob, EddsaPrivateKey, HashCode, Nonce},
    db_types::{InstanceId, OrderId},
    helpers::MerchantUrls,
    settings::{MerchantSettings, TrustedExchange},
    test_utils::prepare_env::{create_database, random_db_path, run_migrations},
    InstanceApi,
    OrderApi,
    PaymentApi,
    PollRegistries,
    RefundApi,
    SqliteDatabase,
    StatusApi,
    TipApi,
};
use tokio::time::sleep;

use crate::cucumber::fake_exchange::{FakeExchange, EXCHANGE_URL};

/// A coin in the test wallet. Every coin is worth one euro.
#[derive(Debug, Clone)]
pub struct WalletCoin {
    pub coin_priv: EddsaPrivateKey,
    pub contribution: Amount,
}

impl WalletCoin {
    pub fn new(contribution: Amount) -> Self {
        Self { coin_priv: EddsaPrivateKey::generate(), contribution }
    }
}

#[derive(Default, Debug, World)]
pub struct MerchantWorld {
    pub system: Option<MerchantSystem>,
    pub nonces: HashMap<String, Nonce>,
    pub contracts: HashMap<OrderId, ClaimResponse>,
    pub coins: HashMap<OrderId, Vec<WalletCoin>>,
    pub last_claim: Option<ClaimResponse>,
    pub last_error: Option<String>,
    pub tip: Option<TipAuthorizeResponse>,
    pub planchets: Vec<Planchet>,
    pub blind_sigs: usize,
    pub listed: Vec<OrderId>,
    pub last_pay: Option<PayResult>,
    pub refunds: Vec<RefundDetail>,
    /// Whether a long poll saw the order paid, and how long it took
    pub polled: Option<(bool, Duration)>,
}

pub struct MerchantSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub exchange: Arc<FakeExchange>,
    pub settings: Arc<MerchantSettings>,
    pub pollers: PollRegistries,
    pub instances: InstanceApi<SqliteDatabase>,
    pub orders: OrderApi<SqliteDatabase>,
    pub payments: PaymentApi<SqliteDatabase, FakeExchange>,
    pub status: StatusApi<SqliteDatabase>,
    pub refunds: RefundApi<SqliteDatabase, FakeExchange>,
    pub tips: TipApi<SqliteDatabase, FakeExchange>,
}

impl Debug for MerchantSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MerchantSystem({})", self.db_path)
    }
}

impl MerchantSystem {
    pub async fn new() -> Self {
        let db_path = prepare_test_env().await;
        let db = SqliteDatabase::new_with_url(&db_path, 5).await.expect("Error creating connection to database");
        debug!("Created database: {db_path}");
        sleep(Duration::from_millis(50)).await;
        let exchange = Arc::new(FakeExchange::new());
        let settings = MerchantSettings::new("EUR")
            .with_exchange(TrustedExchange {
                url: EXCHANGE_URL.into(),
                master_pub: exchange.master_priv.public_key(),
                currency: "EUR".into(),
            })
            .with_exchange_timeout(Duration::from_secs(5));
        let settings = Arc::new(settings);
        let pollers = PollRegistries::default();
        let producers = Default::default();
        Self {
            instances: InstanceApi::new(db.clone(), settings.clone()),
            orders: OrderApi::new(db.clone(), settings.clone(), pollers.clone()),
            payments: PaymentApi::new(
                db.clone(),
                exchange.clone(),
                settings.clone(),
                pollers.clone(),
                Default::default(),
            ),
            status: StatusApi::new(db.clone(), pollers.clone()),
            refunds: RefundApi::new(db.clone(), exchange.clone(), settings.clone(), pollers.clone(), producers),
            tips: TipApi::new(db.clone(), exchange.clone(), settings.clone()),
            db_path,
            db,
            exchange,
            settings,
            pollers,
        }
    }
}

impl MerchantWorld {
    pub fn system(&self) -> &MerchantSystem {
        self.system.as_ref().expect("Merchant system not initialised")
    }

    pub fn urls(instance: &str) -> MerchantUrls {
        MerchantUrls::new("shop.test", None, InstanceId::new(instance), true)
    }

    pub fn nonce(&mut self, name: &str) -> Nonce {
        *self.nonces.entry(name.to_string()).or_insert_with(Nonce::random)
    }

    pub fn contract(&self, order_id: &OrderId) -> &ClaimResponse {
        self.contracts.get(order_id).unwrap_or_else(|| panic!("Order {order_id} has not been claimed"))
    }

    pub fn record_error<E: Debug>(&mut self, error: E) {
        let error = format!("{error:?}");
        debug!("Request failed: {error}");
        self.last_error = Some(error);
    }

    /// Builds a pay request for `coins`, each signed over the claimed contract of `order_id`.
    pub fn pay_request(&self, order_id: &OrderId, coins: &[WalletCoin], mode: &str) -> PayRequest {
        let claim = self.contract(order_id);
        let terms: ContractTermsView =
            serde_json::from_value(claim.contract_terms.clone()).expect("Contract terms are incomplete");
        let h = claim.h_contract_terms.expect("Claim has no contract hash");
        let denom = &self.system().exchange.denom;
        let coins = coins
            .iter()
            .map(|coin| {
                let coin_pub = coin.coin_priv.public_key();
                let coin_sig = messages::coin_deposit(&messages::CoinDeposit {
                    h_contract_terms: &h,
                    h_wire: &terms.h_wire,
                    timestamp: terms.timestamp,
                    refund_deadline: terms.refund_deadline,
                    merchant_pub: &terms.merchant_pub,
                    coin_pub: &coin_pub,
                    amount_with_fee: &coin.contribution,
                    deposit_fee: &denom.fee_deposit,
                })
                .sign(&coin.coin_priv);
                CoinPaymentDetails {
                    contribution: coin.contribution.clone(),
                    coin_pub,
                    exchange_url: EXCHANGE_URL.into(),
                    denom_pub: denom.denom_pub.clone(),
                    ub_sig: Blob::new(HashCode::random().as_bytes().to_vec()),
                    coin_sig,
                }
            })
            .collect();
        PayRequest {
            mode: mode.into(),
            order_id: order_id.clone(),
            merchant_pub: terms.merchant_pub,
            coins,
            session_id: None,
        }
    }
}

pub async fn prepare_test_env() -> String {
    let path = random_db_path();
    create_database(&path).await;
    run_migrations(&path).await;
    path
}
