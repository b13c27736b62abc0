//! Turns a merchant-supplied order into a complete, self-contained contract proposal.
//!
//! Missing fields are filled from the instance defaults and the process settings. Fields the wallet relies on to
//! identify the merchant (`merchant_pub`, `h_wire`, `wire_method`) are always set by the backend, whatever the order
//! says. Everything is validated before anything touches storage.
use merchant_common::{Amount, Timestamp};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::{
    api::OrderApiError,
    db_types::{Instance, NewOrderRecord, OrderId, Product},
    helpers::{new_order_id, MerchantUrls},
    settings::MerchantSettings,
};

/// Location keys the merchant's own address and jurisdiction are stored under.
pub const MERCHANT_ADDRESS_KEY: &str = "_ma";
pub const MERCHANT_JURISDICTION_KEY: &str = "_mj";

fn field<T: DeserializeOwned>(map: &Map<String, Value>, name: &str) -> Result<Option<T>, OrderApiError> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| OrderApiError::MalformedField(format!("{name} ({e})"))),
    }
}

fn required<T: DeserializeOwned>(map: &Map<String, Value>, name: &str) -> Result<T, OrderApiError> {
    field(map, name)?.ok_or_else(|| OrderApiError::MissingField(name.to_string()))
}

fn to_value<T: serde::Serialize>(name: &str, v: &T) -> Result<Value, OrderApiError> {
    serde_json::to_value(v).map_err(|e| OrderApiError::MalformedField(format!("{name} ({e})")))
}

fn check_currency(settings: &MerchantSettings, amount: &Amount) -> Result<(), OrderApiError> {
    if amount.currency().eq_ignore_ascii_case(&settings.currency) {
        Ok(())
    } else {
        Err(OrderApiError::CurrencyMismatch {
            expected: settings.currency.clone(),
            found: amount.currency().to_string(),
        })
    }
}

/// Builds the contract `products` entry for `quantity` units of an inventory product.
pub fn inventory_entry(product: &Product, quantity: i64) -> Result<Value, OrderApiError> {
    let units = u64::try_from(quantity)
        .map_err(|_| OrderApiError::MalformedField(format!("quantity of {}", product.product_id)))?;
    let price = product
        .price
        .checked_mul(units)
        .map_err(|e| OrderApiError::MalformedField(format!("price of {} ({e})", product.product_id)))?;
    let mut entry = json!({
        "product_id": product.product_id,
        "description": product.description,
        "quantity": quantity,
        "unit": product.unit,
        "price": price,
        "taxes": product.taxes,
    });
    if let (Some(image), Some(map)) = (&product.image, entry.as_object_mut()) {
        map.insert("image".into(), Value::String(image.clone()));
    }
    Ok(entry)
}

/// Fills in the defaults of an order and validates it.
///
/// `inventory` holds the contract entries for products taken from the instance's inventory; they are appended to the
/// order's own `products`.
pub fn normalize_order(
    order: Value,
    instance: &Instance,
    urls: &MerchantUrls,
    settings: &MerchantSettings,
    inventory: Vec<Value>,
) -> Result<NewOrderRecord, OrderApiError> {
    let Value::Object(mut map) = order else {
        return Err(OrderApiError::MalformedField("order must be a JSON object".into()));
    };

    let amount: Amount = required(&map, "amount")?;
    check_currency(settings, &amount)?;
    let summary: String = required(&map, "summary")?;
    let _fulfillment_url: String = required(&map, "fulfillment_url")?;

    let order_id = match field::<String>(&map, "order_id")? {
        Some(id) if id.trim().is_empty() => return Err(OrderApiError::MalformedField("order_id".into())),
        Some(id) => OrderId::new(id),
        None => new_order_id(),
    };
    map.insert("order_id".into(), Value::String(order_id.to_string()));

    let now = Timestamp::now();
    let timestamp = field::<Timestamp>(&map, "timestamp")?.unwrap_or(now).round_to_seconds();
    map.insert("timestamp".into(), to_value("timestamp", &timestamp)?);

    let refund_deadline = field::<Timestamp>(&map, "refund_deadline")?.unwrap_or_else(Timestamp::zero);
    map.insert("refund_deadline".into(), to_value("refund_deadline", &refund_deadline)?);

    let pay_deadline = field::<Timestamp>(&map, "pay_deadline")?.unwrap_or(now + instance.default_pay_delay);
    map.insert("pay_deadline".into(), to_value("pay_deadline", &pay_deadline)?);

    let wire_deadline =
        field::<Timestamp>(&map, "wire_transfer_deadline")?.unwrap_or(now + instance.default_wire_transfer_delay);
    if wire_deadline < refund_deadline {
        return Err(OrderApiError::WireDeadlineBeforeRefundDeadline);
    }
    map.insert("wire_transfer_deadline".into(), to_value("wire_transfer_deadline", &wire_deadline)?);

    let max_fee = field::<Amount>(&map, "max_fee")?.unwrap_or_else(|| instance.default_max_deposit_fee.clone());
    check_currency(settings, &max_fee)?;
    map.insert("max_fee".into(), to_value("max_fee", &max_fee)?);

    let max_wire_fee = field::<Amount>(&map, "max_wire_fee")?.unwrap_or_else(|| instance.default_max_wire_fee.clone());
    check_currency(settings, &max_wire_fee)?;
    map.insert("max_wire_fee".into(), to_value("max_wire_fee", &max_wire_fee)?);

    let amortization =
        field::<u32>(&map, "wire_fee_amortization")?.unwrap_or(instance.default_wire_fee_amortization);
    if amortization == 0 {
        return Err(OrderApiError::MalformedField("wire_fee_amortization must be at least 1".into()));
    }
    map.insert("wire_fee_amortization".into(), Value::from(amortization));

    if field::<String>(&map, "merchant_base_url")?.is_none() {
        map.insert("merchant_base_url".into(), Value::String(urls.merchant_base_url()));
    }

    let mut products = field::<Vec<Value>>(&map, "products")?.unwrap_or_default();
    for (i, product) in products.iter().enumerate() {
        let described = product.get("description").map(Value::is_string).unwrap_or(false);
        if !described {
            return Err(OrderApiError::ProductMissingDescription(i));
        }
    }
    products.extend(inventory);
    map.insert("products".into(), Value::Array(products));

    if !map.contains_key("merchant") {
        let mut locations = field::<Map<String, Value>>(&map, "locations")?.unwrap_or_default();
        let mut merchant = json!({ "name": instance.name, "instance": instance.id });
        if let Some(address) = &instance.address {
            locations.insert(MERCHANT_ADDRESS_KEY.into(), address.clone());
            merchant["address"] = Value::String(MERCHANT_ADDRESS_KEY.into());
        }
        if let Some(jurisdiction) = &instance.jurisdiction {
            locations.insert(MERCHANT_JURISDICTION_KEY.into(), jurisdiction.clone());
            merchant["jurisdiction"] = Value::String(MERCHANT_JURISDICTION_KEY.into());
        }
        if !locations.is_empty() {
            map.insert("locations".into(), Value::Object(locations));
        }
        map.insert("merchant".into(), merchant);
    }

    let account = instance
        .active_account()
        .ok_or_else(|| OrderApiError::ContractTerms(format!("Instance {} has no active wire account", instance.id)))?;
    let wire_method = account.wire_method().ok_or_else(|| {
        OrderApiError::ContractTerms(format!("Account {} has no wire method", account.payto_uri))
    })?;
    map.insert("h_wire".into(), to_value("h_wire", &account.h_wire)?);
    map.insert("wire_method".into(), Value::String(wire_method.to_string()));
    map.insert("merchant_pub".into(), to_value("merchant_pub", &instance.merchant_pub)?);

    if !map.contains_key("exchanges") {
        map.insert("exchanges".into(), settings.exchanges_json());
    }
    if !map.contains_key("auditors") {
        map.insert("auditors".into(), settings.auditors_json());
    }

    Ok(NewOrderRecord {
        instance_id: instance.id.clone(),
        order_id,
        order: Value::Object(map),
        amount,
        summary,
        timestamp,
        pay_deadline,
    })
}
