use std::time::Duration;

use merchant_common::Timestamp;
use merchant_engine::{
    api::order_objects::{StatusQuery, StatusRequest},
    crypto::HashCode,
    db_types::{InstanceDetails, OrderId, OrderListFilter, Product, YesNoAll},
};
use serde::{Deserialize, Serialize};

use crate::{errors::ServerError, helpers::QueryArgs};

/// `current:revision:age` of the protocol this backend speaks.
pub const PROTOCOL_VERSION: &str = "0:0:0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub currency: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceList {
    pub instances: Vec<InstanceDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductList {
    pub products: Vec<Product>,
}

fn yes_no_all(args: &QueryArgs, name: &str) -> Result<YesNoAll, ServerError> {
    match args.optional(name).map(str::to_ascii_lowercase).as_deref() {
        None | Some("all") => Ok(YesNoAll::All),
        Some("yes") => Ok(YesNoAll::Yes),
        Some("no") => Ok(YesNoAll::No),
        Some(_) => Err(ServerError::InvalidParameter(name.to_string())),
    }
}

/// Reads the order listing filter from `paid`, `refunded`, `wired`, `date` (seconds), `start`, `delta` and
/// `timeout_ms`.
pub fn order_list_query(args: &QueryArgs) -> Result<(OrderListFilter, Duration), ServerError> {
    let mut filter = OrderListFilter {
        paid: yes_no_all(args, "paid")?,
        refunded: yes_no_all(args, "refunded")?,
        wired: yes_no_all(args, "wired")?,
        ..Default::default()
    };
    if let Some(secs) = args.parse_optional::<i64>("date")? {
        filter.date = Timestamp::from_millis(secs.saturating_mul(1000));
    }
    if let Some(delta) = args.parse_optional::<i64>("delta")? {
        filter.delta = delta;
    }
    filter.start = match args.parse_optional::<i64>("start")? {
        Some(start) => start,
        None if filter.delta > 0 => 0,
        None => i64::MAX,
    };
    let timeout = args.timeout_ms("timeout_ms")?;
    Ok((filter, timeout))
}

/// Common arguments of `/check-payment` and `/public/poll-payment`. The caller fills in the query kind.
pub fn status_request(args: &QueryArgs, query: StatusQuery) -> Result<StatusRequest, ServerError> {
    Ok(StatusRequest {
        order_id: OrderId::from(args.required("order_id")?),
        query,
        session_id: args.optional("session_id").map(String::from),
        contract_url: args.optional("contract_url").map(String::from),
        min_refund: args.parse_optional("refund")?,
        timeout: args.timeout_secs("timeout")?,
    })
}

/// What a paywall passes to `/public/trigger-pay` so that the wallet can pick up the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPay {
    pub contract_url: String,
    pub session_id: String,
    pub h_contract_terms: Option<HashCode>,
    pub confirm_url: Option<String>,
    pub resource_url: Option<String>,
}

impl TriggerPay {
    pub fn from_args(args: &QueryArgs) -> Result<Self, ServerError> {
        Ok(Self {
            contract_url: args.required("contract_url")?.to_string(),
            session_id: args.required("session_id")?.to_string(),
            h_contract_terms: args.parse_optional("h_contract_terms")?,
            confirm_url: args.optional("confirm_url").map(String::from),
            resource_url: args.optional("resource_url").map(String::from),
        })
    }
}
