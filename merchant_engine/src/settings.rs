//! Process-wide merchant settings: the currency, the exchanges the merchant trusts and the auditors it accepts.
//!
//! These are loaded once at start-up and never change afterwards, so the APIs share them behind an `Arc`.
use std::time::Duration;

use log::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{crypto::EddsaPublicKey, exchange::DEFAULT_EXCHANGE_TIMEOUT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedExchange {
    pub url: String,
    pub master_pub: EddsaPublicKey,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auditor {
    pub name: String,
    pub url: String,
    pub public_key: EddsaPublicKey,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct MerchantSettings {
    pub currency: String,
    pub exchanges: Vec<TrustedExchange>,
    pub auditors: Vec<Auditor>,
    /// Upper bound for any interaction with an exchange during a single request
    pub exchange_timeout: Duration,
}

/// Exchange URLs are compared without trailing slashes.
fn same_url(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

impl MerchantSettings {
    pub fn new(currency: &str) -> Self {
        Self {
            currency: currency.to_string(),
            exchanges: Vec::new(),
            auditors: Vec::new(),
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Adds a trusted exchange. Exchanges dealing in another currency are skipped.
    pub fn with_exchange(mut self, exchange: TrustedExchange) -> Self {
        if exchange.currency != self.currency {
            warn!(
                "🪛️ Exchange {} uses currency {}, but this merchant uses {}. It will be ignored.",
                exchange.url, exchange.currency, self.currency
            );
            return self;
        }
        self.exchanges.push(exchange);
        self
    }

    /// Adds an accepted auditor. Auditors for another currency are skipped.
    pub fn with_auditor(mut self, auditor: Auditor) -> Self {
        if auditor.currency != self.currency {
            warn!(
                "🪛️ Auditor {} audits currency {}, but this merchant uses {}. It will be ignored.",
                auditor.name, auditor.currency, self.currency
            );
            return self;
        }
        self.auditors.push(auditor);
        self
    }

    pub fn trusted_exchange(&self, url: &str) -> Option<&TrustedExchange> {
        self.exchanges.iter().find(|e| same_url(&e.url, url))
    }

    pub fn accepts_auditor(&self, auditor_pub: &EddsaPublicKey) -> bool {
        self.auditors.iter().any(|a| &a.public_key == auditor_pub)
    }

    /// The `exchanges` array placed into every contract.
    pub fn exchanges_json(&self) -> Value {
        Value::Array(self.exchanges.iter().map(|e| json!({ "url": e.url, "master_pub": e.master_pub })).collect())
    }

    /// The `auditors` array placed into every contract.
    pub fn auditors_json(&self) -> Value {
        Value::Array(
            self.auditors.iter().map(|a| json!({ "name": a.name, "auditor_pub": a.public_key, "url": a.url })).collect(),
        )
    }
}
