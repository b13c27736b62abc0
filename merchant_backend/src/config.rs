use std::{env, path::Path, time::Duration};

use log::*;
use merchant_common::{helpers::parse_boolean_flag, Amount, RelativeTime};
use merchant_engine::{
    crypto::{EddsaPrivateKey, EddsaPublicKey},
    db_types::{InstanceId, NewInstance},
    exchange::{DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_KEYS_CACHE_TTL},
    settings::{Auditor, MerchantSettings, TrustedExchange},
};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::ServerError;

const DEFAULT_MERCHANT_HOST: &str = "127.0.0.1";
const DEFAULT_MERCHANT_PORT: u16 = 9966;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/merchant.db";
const DEFAULT_CONFIG_FILE: &str = "merchant.toml";
const DEFAULT_MAX_DB_CONNECTIONS: u32 = 25;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Path to the TOML file holding the currency, trusted exchanges, auditors and instances.
    pub config_file: String,
    pub max_db_connections: u32,
    /// Upper bound for a single request's dealings with an exchange.
    pub exchange_timeout: Duration,
    /// How long an exchange's `/keys` reply is reused before it is downloaded again.
    pub keys_cache_ttl: Duration,
    /// If true, `X-Forwarded-Host`, `X-Forwarded-Proto`, `X-Forwarded-Prefix` and `Forwarded` headers are used when
    /// building URLs that are handed back to clients.
    pub honor_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MERCHANT_HOST.to_string(),
            port: DEFAULT_MERCHANT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            config_file: DEFAULT_CONFIG_FILE.to_string(),
            max_db_connections: DEFAULT_MAX_DB_CONNECTIONS,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            keys_cache_ttl: DEFAULT_KEYS_CACHE_TTL,
            honor_forwarded_headers: true,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T
where T: std::fmt::Display {
    match env::var(name) {
        Ok(s) => s.parse::<T>().unwrap_or_else(|_| {
            error!("🪛️ {s} is not a valid value for {name}. Using the default, {default}, instead.");
            default
        }),
        Err(_) => default,
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("MERCHANT_HOST").ok().unwrap_or_else(|| DEFAULT_MERCHANT_HOST.into());
        let port = parse_env("MERCHANT_PORT", DEFAULT_MERCHANT_PORT);
        let database_url = env::var("MERCHANT_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ MERCHANT_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let config_file = env::var("MERCHANT_CONFIG_FILE").ok().unwrap_or_else(|| DEFAULT_CONFIG_FILE.into());
        let max_db_connections = parse_env("MERCHANT_MAX_DB_CONNECTIONS", DEFAULT_MAX_DB_CONNECTIONS);
        let exchange_timeout =
            Duration::from_secs(parse_env("MERCHANT_EXCHANGE_TIMEOUT", DEFAULT_EXCHANGE_TIMEOUT.as_secs()));
        let keys_cache_ttl =
            Duration::from_secs(parse_env("MERCHANT_KEYS_CACHE_TTL", DEFAULT_KEYS_CACHE_TTL.as_secs()));
        let honor_forwarded_headers = parse_boolean_flag(env::var("MERCHANT_HONOR_FORWARDED_HEADERS").ok(), true);
        Self {
            host,
            port,
            database_url,
            config_file,
            max_db_connections,
            exchange_timeout,
            keys_cache_ttl,
            honor_forwarded_headers,
        }
    }

    pub fn options(&self) -> ServerOptions {
        ServerOptions { honor_forwarded_headers: self.honor_forwarded_headers }
    }
}

/// The subset of the configuration that request handlers need.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServerOptions {
    pub honor_forwarded_headers: bool,
}

//--------------------------------------   Merchant config file   ---------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MerchantFile {
    pub merchant: MerchantSection,
    #[serde(default)]
    pub exchanges: Vec<ExchangeSection>,
    #[serde(default)]
    pub auditors: Vec<Auditor>,
    #[serde(default)]
    pub instances: Vec<InstanceSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MerchantSection {
    pub currency: String,
    pub default_max_deposit_fee: Option<Amount>,
    pub default_max_wire_fee: Option<Amount>,
    #[serde(default = "default_amortization")]
    pub default_wire_fee_amortization: u32,
    /// Seconds a wallet has to pay an order
    #[serde(default = "default_pay_delay")]
    pub default_pay_delay: i64,
    /// Seconds before the exchange is asked to wire the money
    #[serde(default = "default_wire_transfer_delay")]
    pub default_wire_transfer_delay: i64,
}

fn default_amortization() -> u32 {
    1
}

fn default_pay_delay() -> i64 {
    3600
}

fn default_wire_transfer_delay() -> i64 {
    3 * 24 * 3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSection {
    pub url: String,
    pub master_key: EddsaPublicKey,
    pub currency: String,
}

/// An instance to provision at start-up. Values left out fall back to the `[merchant]` defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceSection {
    pub id: String,
    pub name: String,
    pub private_key: Option<EddsaPrivateKey>,
    pub accounts: Vec<String>,
    pub address: Option<Value>,
    pub jurisdiction: Option<Value>,
    pub max_deposit_fee: Option<Amount>,
    pub max_wire_fee: Option<Amount>,
    pub wire_fee_amortization: Option<u32>,
    pub pay_delay: Option<i64>,
    pub wire_transfer_delay: Option<i64>,
    pub tip_exchange: Option<String>,
    pub tip_reserve_priv: Option<EddsaPrivateKey>,
}

impl MerchantFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ServerError> {
        let path = path.as_ref();
        info!("🪛️ Loading merchant configuration from {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ServerError::ConfigurationError(format!("Could not read {}. {e}", path.display()))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ServerError> {
        let file = toml::from_str::<Self>(contents)
            .map_err(|e| ServerError::ConfigurationError(format!("Invalid merchant configuration. {e}")))?;
        if Amount::zero(&file.merchant.currency).to_string().parse::<Amount>().is_err() {
            return Err(ServerError::ConfigurationError(format!(
                "'{}' is not a valid currency",
                file.merchant.currency
            )));
        }
        Ok(file)
    }

    /// Builds the process-wide settings. Exchanges and auditors in other currencies are dropped with a warning.
    pub fn settings(&self, exchange_timeout: Duration) -> Result<MerchantSettings, ServerError> {
        let mut settings = MerchantSettings::new(&self.merchant.currency).with_exchange_timeout(exchange_timeout);
        for ex in &self.exchanges {
            settings = settings.with_exchange(TrustedExchange {
                url: ex.url.clone(),
                master_pub: ex.master_key.clone(),
                currency: ex.currency.clone(),
            });
        }
        for auditor in &self.auditors {
            settings = settings.with_auditor(auditor.clone());
        }
        if settings.exchanges.is_empty() {
            return Err(ServerError::ConfigurationError(format!(
                "No trusted exchange for {} is configured",
                settings.currency
            )));
        }
        Ok(settings)
    }

    fn default_fee(&self, fee: &Option<Amount>) -> Amount {
        fee.clone().unwrap_or_else(|| Amount::zero(&self.merchant.currency))
    }

    /// The instances listed in the file, with the merchant-wide defaults filled in.
    pub fn instances(&self) -> Result<Vec<NewInstance>, ServerError> {
        let m = &self.merchant;
        self.instances
            .iter()
            .map(|i| {
                Ok(NewInstance {
                    id: InstanceId::new(i.id.as_str()),
                    name: i.name.clone(),
                    private_key: i.private_key.clone(),
                    payto_uris: i.accounts.clone(),
                    address: i.address.clone(),
                    jurisdiction: i.jurisdiction.clone(),
                    default_max_deposit_fee: match &i.max_deposit_fee {
                        Some(a) => a.clone(),
                        None => self.default_fee(&m.default_max_deposit_fee),
                    },
                    default_max_wire_fee: match &i.max_wire_fee {
                        Some(a) => a.clone(),
                        None => self.default_fee(&m.default_max_wire_fee),
                    },
                    default_wire_fee_amortization: i.wire_fee_amortization.unwrap_or(m.default_wire_fee_amortization),
                    default_pay_delay: RelativeTime::from_secs(i.pay_delay.unwrap_or(m.default_pay_delay)),
                    default_wire_transfer_delay: RelativeTime::from_secs(
                        i.wire_transfer_delay.unwrap_or(m.default_wire_transfer_delay),
                    ),
                    tip_exchange: i.tip_exchange.clone(),
                    tip_reserve_priv: i.tip_reserve_priv.clone(),
                })
            })
            .collect()
    }
}
