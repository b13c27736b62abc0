use std::{fmt::Debug, sync::Arc, time::Duration};

use log::*;
use merchant_common::Timestamp;

use crate::{
    api::{
        active_instance,
        normalize::{inventory_entry, normalize_order},
        order_objects::{ClaimResponse, OrderListResponse, PostOrderRequest, PostOrderResponse},
        OrderApiError,
        PollRegistries,
    },
    crypto::{messages, Nonce},
    db_types::{ClaimOutcome, ContractTermsRecord, Instance, InstanceId, OrderId, OrderListFilter},
    helpers::{with_retries, MerchantUrls, INSERT_RETRIES, RMW_RETRIES},
    long_poll::WakeReason,
    settings::MerchantSettings,
    traits::{InstanceManagement, MerchantDbError, OrderManagement},
};

/// `OrderApi` covers the first half of the order life cycle: the merchant creates an order, a wallet claims it and
/// receives the signed contract terms. It also lets the merchant list its orders.
pub struct OrderApi<B> {
    db: B,
    settings: Arc<MerchantSettings>,
    pollers: PollRegistries,
}

impl<B> Debug for OrderApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderApi")
    }
}

impl<B> OrderApi<B> {
    pub fn new(db: B, settings: Arc<MerchantSettings>, pollers: PollRegistries) -> Self {
        Self { db, settings, pollers }
    }
}

impl<B> OrderApi<B>
where B: InstanceManagement + OrderManagement
{
    async fn instance(&self, id: &InstanceId) -> Result<Instance, OrderApiError> {
        active_instance(&self.db, id).await?.ok_or_else(|| OrderApiError::UnknownInstance(id.clone()))
    }

    /// Normalizes a new order and stores it, taking any referenced inventory products out of stock.
    ///
    /// The order is validated completely before anything is written. An order id that is already in use for this
    /// instance is rejected with [`OrderApiError::AlreadyExists`]; the existing order is left untouched.
    pub async fn create_order(
        &self,
        instance_id: &InstanceId,
        urls: &MerchantUrls,
        request: PostOrderRequest,
    ) -> Result<PostOrderResponse, OrderApiError> {
        let instance = self.instance(instance_id).await?;
        let mut inventory = Vec::with_capacity(request.inventory_products.len());
        for claim in &request.inventory_products {
            if claim.quantity <= 0 {
                return Err(OrderApiError::MalformedField(format!("quantity of {}", claim.product_id)));
            }
            let product = self
                .db
                .fetch_product(instance_id, &claim.product_id)
                .await?
                .ok_or_else(|| OrderApiError::UnknownProduct(claim.product_id.clone()))?;
            inventory.push(inventory_entry(&product, claim.quantity)?);
        }
        let record = normalize_order(request.order, &instance, urls, &self.settings, inventory)?;
        let order_id = record.order_id.clone();
        let db = &self.db;
        let claims = &request.inventory_products;
        let result = with_retries(INSERT_RETRIES, || db.insert_order(record.clone(), claims)).await;
        match result {
            Ok(row_id) => {
                info!("🧾️ Order [{order_id}] created for instance {instance_id} (row {row_id})");
                let woken = self.pollers.orders.resume(instance_id);
                trace!("🧾️ {woken} order listing(s) notified");
                Ok(PostOrderResponse { order_id })
            },
            Err(MerchantDbError::AlreadyExists(e)) => {
                if self.db.fetch_order(instance_id, &order_id).await?.is_some() {
                    debug!("🧾️ Order [{order_id}] already exists for instance {instance_id}");
                    Err(OrderApiError::AlreadyExists(order_id))
                } else {
                    Err(MerchantDbError::AlreadyExists(e).into())
                }
            },
            Err(MerchantDbError::OutOfStock(product)) => {
                debug!("🧾️ Order [{order_id}] asks for more of {product} than is in stock");
                Err(OrderApiError::OutOfStock(product))
            },
            Err(MerchantDbError::NotFound(what)) => Err(OrderApiError::UnknownProduct(what)),
            Err(e) => Err(e.into()),
        }
    }

    /// Binds an order to the wallet's `nonce` and returns the signed contract terms.
    ///
    /// Claiming is idempotent for the same nonce: the stored contract, and hence the signature, is returned unchanged.
    /// A claim with a different nonce fails with [`OrderApiError::AlreadyClaimed`] and changes nothing.
    pub async fn claim_order(
        &self,
        instance_id: &InstanceId,
        order_id: &OrderId,
        nonce: &Nonce,
    ) -> Result<ClaimResponse, OrderApiError> {
        let instance = self.instance(instance_id).await?;
        let db = &self.db;
        let outcome = with_retries(RMW_RETRIES, || db.claim_order(instance_id, order_id, nonce)).await?;
        let record = match outcome {
            ClaimOutcome::Claimed(record) => {
                info!("🧾️ Order [{order_id}] claimed");
                record
            },
            ClaimOutcome::Existing(record) => {
                debug!("🧾️ Order [{order_id}] claimed again with the same nonce");
                record
            },
            ClaimOutcome::NonceMismatch => return Err(OrderApiError::AlreadyClaimed(order_id.clone())),
            ClaimOutcome::OrderNotFound => return Err(OrderApiError::UnknownOrder(order_id.clone())),
        };
        self.sign_contract(&instance, &record)
    }

    /// The legacy proposal lookup. It claims the order exactly like [`Self::claim_order`].
    pub async fn fetch_proposal(
        &self,
        instance_id: &InstanceId,
        order_id: &OrderId,
        nonce: &Nonce,
    ) -> Result<ClaimResponse, OrderApiError> {
        trace!("🧾️ Legacy proposal request for [{order_id}]");
        self.claim_order(instance_id, order_id, nonce).await
    }

    fn sign_contract(&self, instance: &Instance, record: &ContractTermsRecord) -> Result<ClaimResponse, OrderApiError> {
        let key = instance.merchant_priv.as_ref().ok_or_else(|| OrderApiError::UnknownInstance(instance.id.clone()))?;
        let sig = messages::contract(&record.h_contract_terms).sign(key.reveal());
        let contract_terms = record.contract_terms().map_err(|e| OrderApiError::ContractTerms(e.to_string()))?;
        Ok(ClaimResponse { contract_terms, sig, h_contract_terms: Some(record.h_contract_terms) })
    }

    /// Lists the orders of an instance.
    ///
    /// When `timeout` is non-zero and the filter walks forward (`delta > 0`), an empty result is not returned straight
    /// away: the call waits until a new order is created for the instance or the timeout elapses, and then reads once
    /// more.
    pub async fn list_orders(
        &self,
        instance_id: &InstanceId,
        mut filter: OrderListFilter,
        timeout: Duration,
    ) -> Result<OrderListResponse, OrderApiError> {
        if filter.delta == 0 {
            return Err(OrderApiError::DeltaZero);
        }
        self.instance(instance_id).await?;
        if filter.delta > 0 && filter.date.is_never() {
            filter.date = Timestamp::zero();
        }
        let long_poll = filter.delta > 0 && !timeout.is_zero();
        let suspension = long_poll.then(|| self.pollers.orders.suspend(instance_id.clone(), timeout));
        let orders = self.db.list_orders(instance_id, &filter).await?;
        if !orders.is_empty() {
            return Ok(OrderListResponse { orders });
        }
        let Some(suspension) = suspension else {
            return Ok(OrderListResponse { orders });
        };
        let reason = suspension.wait().await;
        trace!("⏳️ Order listing for {instance_id} woke up: {reason:?}");
        if reason == WakeReason::Cancelled {
            return Ok(OrderListResponse { orders });
        }
        let orders = self.db.list_orders(instance_id, &filter).await?;
        Ok(OrderListResponse { orders })
    }
}
