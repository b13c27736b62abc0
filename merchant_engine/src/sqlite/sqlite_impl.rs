//! `SqliteDatabase` is the concrete storage backend of the merchant engine.
//!
//! It implements all the traits defined in the [`crate::traits`] module on top of a SQLite connection pool. Every
//! operation that touches more than one row runs inside a single transaction.
use std::{cmp::Ordering, fmt::Debug};

use log::*;
use merchant_common::{Amount, Timestamp};
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};

use super::db::{
    contracts,
    db_url,
    deposits,
    instances,
    new_pool,
    orders,
    products,
    refunds,
    sessions,
    tips,
    transfers,
};
use crate::{
    crypto::{canonical_json, Blob, EddsaPublicKey, HashCode, Nonce, WireTransferId},
    db_types::{
        AuthorizeTipOutcome,
        ClaimOutcome,
        CoinTransfer,
        ContractTermsRecord,
        DepositRecord,
        Instance,
        InstanceId,
        InstancePatch,
        InventoryClaim,
        NewInstance,
        NewOrderRecord,
        NewTip,
        OrderId,
        OrderListFilter,
        OrderRecord,
        OrderSummary,
        PickupOutcome,
        Product,
        ProductPatch,
        RefundExchangeStatus,
        RefundIncreaseOutcome,
        RefundRecord,
        SessionPayment,
        Tip,
        TipReserve,
        TransferProof,
    },
    traits::{
        InstanceManagement,
        MerchantDatabase,
        MerchantDbError,
        OrderManagement,
        PaymentManagement,
        RefundManagement,
        TipManagement,
        TransferManagement,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

fn amount_error(context: &str, e: merchant_common::AmountError) -> MerchantDbError {
    MerchantDbError::Inconsistent(format!("{context}: {e}"))
}

/// Pulls a typed field out of stored contract terms.
fn contract_field<T: serde::de::DeserializeOwned>(terms: &Value, field: &str) -> Result<T, MerchantDbError> {
    let value = terms
        .get(field)
        .cloned()
        .ok_or_else(|| MerchantDbError::Inconsistent(format!("Order has no '{field}' field")))?;
    serde_json::from_value(value)
        .map_err(|e| MerchantDbError::Inconsistent(format!("Order field '{field}' is malformed: {e}")))
}

impl MerchantDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn close(&mut self) -> Result<(), MerchantDbError> {
        self.pool.close().await;
        Ok(())
    }
}

impl InstanceManagement for SqliteDatabase {
    async fn fetch_instance(&self, id: &InstanceId) -> Result<Option<Instance>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        instances::fetch_instance(id, &mut conn).await
    }

    async fn fetch_instances(&self) -> Result<Vec<Instance>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        instances::fetch_instances(&mut conn).await
    }

    async fn insert_instance(&self, instance: NewInstance) -> Result<Instance, MerchantDbError> {
        let id = instance.id.clone();
        let mut tx = self.pool.begin().await?;
        instances::insert_instance(instance, &mut tx).await.map_err(|e| match e {
            MerchantDbError::AlreadyExists(_) => MerchantDbError::AlreadyExists(format!("Instance {id}")),
            other => other,
        })?;
        let result = instances::fetch_instance(&id, &mut tx)
            .await?
            .ok_or_else(|| MerchantDbError::Inconsistent(format!("Instance {id} vanished after insert")))?;
        tx.commit().await?;
        Ok(result)
    }

    async fn update_instance(&self, id: &InstanceId, patch: InstancePatch) -> Result<Instance, MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        instances::update_instance(id, patch, &mut tx).await?;
        let result = instances::fetch_instance(id, &mut tx)
            .await?
            .ok_or_else(|| MerchantDbError::NotFound(format!("Instance {id}")))?;
        tx.commit().await?;
        Ok(result)
    }

    async fn delete_instance(&self, id: &InstanceId, purge: bool) -> Result<bool, MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        let deleted = if purge {
            instances::purge_instance(id, &mut tx).await?
        } else {
            instances::revoke_instance_key(id, &mut tx).await?
        };
        tx.commit().await?;
        if deleted {
            info!("🗃️ Instance {id} deleted (purge: {purge})");
        }
        Ok(deleted)
    }

    async fn fetch_products(&self, id: &InstanceId) -> Result<Vec<Product>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        products::fetch_products(id, &mut conn).await
    }

    async fn fetch_product(&self, id: &InstanceId, product_id: &str) -> Result<Option<Product>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        products::fetch_product(id, product_id, &mut conn).await
    }

    async fn insert_product(&self, id: &InstanceId, product: Product) -> Result<Product, MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        products::insert_product(id, &product, &mut tx).await?;
        let result = products::fetch_product(id, &product.product_id, &mut tx)
            .await?
            .ok_or_else(|| MerchantDbError::Inconsistent(format!("Product {} vanished after insert", product.product_id)))?;
        tx.commit().await?;
        Ok(result)
    }

    async fn update_product(
        &self,
        id: &InstanceId,
        product_id: &str,
        patch: ProductPatch,
    ) -> Result<Product, MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        products::update_product(id, product_id, patch, &mut tx).await?;
        let result = products::fetch_product(id, product_id, &mut tx)
            .await?
            .ok_or_else(|| MerchantDbError::NotFound(format!("Product {product_id}")))?;
        tx.commit().await?;
        Ok(result)
    }

    async fn delete_product(&self, id: &InstanceId, product_id: &str) -> Result<bool, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        products::delete_product(id, product_id, &mut conn).await
    }
}

impl OrderManagement for SqliteDatabase {
    async fn insert_order(&self, order: NewOrderRecord, inventory: &[InventoryClaim]) -> Result<i64, MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        for claim in inventory {
            orders::lock_inventory(&order.instance_id, claim, &mut tx).await?;
        }
        let row_id = orders::insert_order(order, &mut tx).await?;
        tx.commit().await?;
        Ok(row_id)
    }

    async fn fetch_order(&self, instance: &InstanceId, order_id: &OrderId) -> Result<Option<OrderRecord>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order(instance, order_id, &mut conn).await
    }

    async fn fetch_contract_terms(
        &self,
        instance: &InstanceId,
        order_id: &OrderId,
    ) -> Result<Option<ContractTermsRecord>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        contracts::fetch_contract_terms(instance, order_id, &mut conn).await
    }

    async fn fetch_contract_terms_by_hash(
        &self,
        h_contract_terms: &HashCode,
    ) -> Result<Option<ContractTermsRecord>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        contracts::fetch_contract_terms_by_hash(h_contract_terms, &mut conn).await
    }

    async fn claim_order(
        &self,
        instance: &InstanceId,
        order_id: &OrderId,
        nonce: &Nonce,
    ) -> Result<ClaimOutcome, MerchantDbError> {
        let nonce_str = nonce.to_string();
        let mut tx = self.pool.begin().await?;
        if let Some(existing) = contracts::fetch_contract_terms(instance, order_id, &mut tx).await? {
            return if existing.nonce == nonce_str {
                trace!("🗃️ Order [{order_id}] re-claimed with the same nonce");
                Ok(ClaimOutcome::Existing(existing))
            } else {
                debug!("🗃️ Order [{order_id}] is already claimed with a different nonce");
                Ok(ClaimOutcome::NonceMismatch)
            };
        }
        let Some(order) = orders::fetch_order(instance, order_id, &mut tx).await? else {
            return Ok(ClaimOutcome::OrderNotFound);
        };
        let mut terms = order.order;
        match terms.as_object_mut() {
            Some(map) => {
                map.insert("nonce".to_string(), Value::String(nonce_str.clone()));
            },
            None => return Err(MerchantDbError::Inconsistent(format!("Order [{order_id}] is not a JSON object"))),
        }
        let contract_text = canonical_json(&terms)
            .map_err(|e| MerchantDbError::Inconsistent(format!("Order [{order_id}] cannot be canonicalized: {e}")))?;
        let h_contract_terms = HashCode::of(contract_text.as_bytes());
        let merchant_pub: EddsaPublicKey = contract_field(&terms, "merchant_pub")?;
        let fulfillment_url: String = contract_field(&terms, "fulfillment_url")?;
        let contract = contracts::NewContractTerms {
            instance_id: instance,
            order_id,
            contract_text: &contract_text,
            h_contract_terms: &h_contract_terms,
            merchant_pub: &merchant_pub,
            nonce: &nonce_str,
            timestamp: order.timestamp,
            fulfillment_url: &fulfillment_url,
        };
        let record = contracts::insert_contract_terms(contract, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Order [{order_id}] claimed. Contract hash is {h_contract_terms}");
        Ok(ClaimOutcome::Claimed(record))
    }

    async fn list_orders(
        &self,
        instance: &InstanceId,
        filter: &OrderListFilter,
    ) -> Result<Vec<OrderSummary>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        orders::list_orders(instance, filter, &mut conn).await
    }
}

impl PaymentManagement for SqliteDatabase {
    async fn fetch_deposits(&self, h_contract_terms: &HashCode) -> Result<Vec<DepositRecord>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        deposits::fetch_deposits(h_contract_terms, &mut conn).await
    }

    async fn record_payment(
        &self,
        h_contract_terms: &HashCode,
        deposits: &[DepositRecord],
        session_id: Option<&str>,
    ) -> Result<usize, MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        let mut fresh = 0;
        for deposit in deposits {
            if deposits::idempotent_insert(deposit.clone(), &mut tx).await? {
                fresh += 1;
            }
        }
        mark_paid(h_contract_terms, session_id, &mut tx).await?;
        tx.commit().await?;
        Ok(fresh)
    }

    async fn mark_contract_paid(
        &self,
        h_contract_terms: &HashCode,
        session_id: Option<&str>,
    ) -> Result<(), MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        mark_paid(h_contract_terms, session_id, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_session_payment(
        &self,
        instance: &InstanceId,
        session_id: &str,
        fulfillment_url: &str,
    ) -> Result<Option<SessionPayment>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        sessions::fetch_session_payment(instance, session_id, fulfillment_url, &mut conn).await
    }

    async fn is_paid_in_session(
        &self,
        instance: &InstanceId,
        session_id: &str,
        order_id: &OrderId,
    ) -> Result<bool, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        sessions::is_paid_in_session(instance, session_id, order_id, &mut conn).await
    }
}

async fn mark_paid(
    h_contract_terms: &HashCode,
    session_id: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    let contract = contracts::fetch_contract_terms_by_hash(h_contract_terms, &mut *conn)
        .await?
        .ok_or_else(|| MerchantDbError::NotFound(format!("Contract {h_contract_terms}")))?;
    contracts::mark_paid(h_contract_terms, session_id, &mut *conn).await?;
    if let Some(session_id) = session_id {
        sessions::upsert_session(
            &contract.instance_id,
            session_id,
            &contract.fulfillment_url,
            &contract.order_id,
            &contract.merchant_pub,
            &mut *conn,
        )
        .await?;
    }
    debug!("🗃️ Order [{}] marked as paid", contract.order_id);
    Ok(())
}

impl RefundManagement for SqliteDatabase {
    async fn increase_refund(
        &self,
        instance: &InstanceId,
        order_id: &OrderId,
        refund: &Amount,
        reason: &str,
    ) -> Result<RefundIncreaseOutcome, MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        let Some(contract) = contracts::fetch_contract_terms(instance, order_id, &mut tx).await? else {
            let known = orders::fetch_order(instance, order_id, &mut tx).await?.is_some();
            return Ok(if known { RefundIncreaseOutcome::NotPaid } else { RefundIncreaseOutcome::UnknownOrder });
        };
        if !contract.paid {
            return Ok(RefundIncreaseOutcome::NotPaid);
        }
        let h = contract.h_contract_terms;
        let currency = refund.currency();
        let deposits = deposits::fetch_deposits(&h, &mut tx).await?;
        let existing = refunds::fetch_refunds(&h, &mut tx).await?;
        let paid = Amount::sum(currency, deposits.iter().map(|d| &d.amount_with_fee))
            .map_err(|e| amount_error("Summing deposits", e))?;
        let granted = Amount::sum(currency, existing.iter().map(|r| &r.refund_amount))
            .map_err(|e| amount_error("Summing refunds", e))?;
        if refund.try_cmp(&granted).map_err(|e| amount_error("Comparing refunds", e))? != Ordering::Greater {
            debug!("🗃️ Refund of {refund} on [{order_id}] does not exceed the {granted} already granted");
            return Ok(RefundIncreaseOutcome::NoChange);
        }
        if refund.try_cmp(&paid).map_err(|e| amount_error("Comparing refund to payment", e))? == Ordering::Greater {
            return Ok(RefundIncreaseOutcome::ExceedsPayment);
        }
        let mut left = refund.checked_sub(&granted).map_err(|e| amount_error("Refund increase", e))?;
        let rtransaction_id = refunds::next_rtransaction_id(&h, &mut tx).await?;
        for deposit in &deposits {
            if left.is_zero() {
                break;
            }
            let coin_refunded = Amount::sum(
                currency,
                existing.iter().filter(|r| r.coin_pub == deposit.coin_pub).map(|r| &r.refund_amount),
            )
            .map_err(|e| amount_error("Summing coin refunds", e))?;
            let capacity = deposit
                .amount_with_fee
                .saturating_sub(&coin_refunded)
                .map_err(|e| amount_error("Coin refund capacity", e))?;
            if capacity.is_zero() {
                continue;
            }
            let share = match capacity.try_cmp(&left).map_err(|e| amount_error("Coin refund share", e))? {
                Ordering::Less => capacity,
                _ => left.clone(),
            };
            let new_refund = refunds::NewRefund {
                h_contract_terms: &h,
                coin_pub: &deposit.coin_pub,
                exchange_url: &deposit.exchange_url,
                rtransaction_id,
                refund_amount: &share,
                refund_fee: &deposit.refund_fee,
                reason,
            };
            refunds::insert_refund(new_refund, &mut tx).await?;
            left = left.checked_sub(&share).map_err(|e| amount_error("Refund remainder", e))?;
        }
        if !left.is_zero() {
            return Err(MerchantDbError::Inconsistent(format!(
                "Refund on [{order_id}] could not be placed on any coin, {left} left over"
            )));
        }
        tx.commit().await?;
        info!("🗃️ Refund on order [{order_id}] increased to {refund}");
        Ok(RefundIncreaseOutcome::Increased(refund.clone()))
    }

    async fn fetch_refunds(&self, h_contract_terms: &HashCode) -> Result<Vec<RefundRecord>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        refunds::fetch_refunds(h_contract_terms, &mut conn).await
    }

    async fn update_refund_status(&self, row_id: i64, status: &RefundExchangeStatus) -> Result<(), MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        refunds::update_status(row_id, status, &mut conn).await
    }
}

impl TransferManagement for SqliteDatabase {
    async fn fetch_transfer_proof(
        &self,
        exchange_url: &str,
        wtid: &WireTransferId,
    ) -> Result<Option<TransferProof>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        transfers::fetch_proof(exchange_url, wtid, &mut conn).await
    }

    async fn insert_transfer(&self, proof: TransferProof, coins: &[CoinTransfer]) -> Result<(), MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        transfers::idempotent_insert_proof(&proof, &mut tx).await?;
        for coin in coins {
            transfers::idempotent_insert_coin(coin, &mut tx).await?;
            contracts::mark_wired(&coin.h_contract_terms, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_coin_transfers(&self, h_contract_terms: &HashCode) -> Result<Vec<CoinTransfer>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        transfers::fetch_coin_transfers(h_contract_terms, &mut conn).await
    }

    async fn fetch_coin_transfers_by_wtid(
        &self,
        exchange_url: &str,
        wtid: &WireTransferId,
    ) -> Result<Vec<CoinTransfer>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        transfers::fetch_coin_transfers_by_wtid(exchange_url, wtid, &mut conn).await
    }
}

impl TipManagement for SqliteDatabase {
    async fn fetch_tip_reserve(&self, reserve_pub: &EddsaPublicKey) -> Result<Option<TipReserve>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        tips::fetch_reserve(reserve_pub, &mut conn).await
    }

    async fn authorize_tip(
        &self,
        tip: NewTip,
        reserve_credit: &Amount,
        reserve_expiration: Timestamp,
    ) -> Result<AuthorizeTipOutcome, MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        let reserve = tips::upsert_reserve(&tip, reserve_expiration, &mut tx).await?;
        let authorized = reserve
            .amount_authorized
            .checked_add(&tip.amount)
            .map_err(|e| amount_error("Tip reserve authorization", e))?;
        if authorized.try_cmp(reserve_credit).map_err(|e| amount_error("Tip reserve balance", e))? == Ordering::Greater {
            let available = reserve_credit
                .saturating_sub(&reserve.amount_authorized)
                .map_err(|e| amount_error("Tip reserve balance", e))?;
            debug!("🗃️ Tip of {} refused. Only {available} left in reserve {}", tip.amount, tip.reserve_pub);
            return Ok(AuthorizeTipOutcome::InsufficientFunds { available });
        }
        let tip_id = HashCode::random();
        let record = tips::insert_tip(&tip, &tip_id, &mut tx).await?;
        tips::set_reserve_authorized(&tip.reserve_pub, &authorized, &mut tx).await?;
        tx.commit().await?;
        Ok(AuthorizeTipOutcome::Authorized(record))
    }

    async fn fetch_tip(&self, tip_id: &HashCode) -> Result<Option<Tip>, MerchantDbError> {
        let mut conn = self.pool.acquire().await?;
        tips::fetch_tip(tip_id, &mut conn).await
    }

    async fn start_pickup(
        &self,
        tip_id: &HashCode,
        pickup_id: &HashCode,
        amount: &Amount,
    ) -> Result<PickupOutcome, MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        if tips::fetch_pickup_amount(pickup_id, &mut tx).await?.is_some() {
            let sigs = tips::fetch_pickup_signatures(pickup_id, &mut tx).await?;
            trace!("🗃️ Pickup {pickup_id} is a repeat ({} signatures stored)", sigs.len());
            return Ok(if sigs.is_empty() { PickupOutcome::Debited } else { PickupOutcome::Completed(sigs) });
        }
        let Some(tip) = tips::fetch_tip(tip_id, &mut tx).await? else {
            return Ok(PickupOutcome::UnknownTip);
        };
        let remaining = tip.amount_remaining;
        if remaining.try_cmp(amount).map_err(|e| amount_error("Tip pickup", e))? == Ordering::Less {
            return Ok(PickupOutcome::Overdrawn { remaining });
        }
        let left = remaining.checked_sub(amount).map_err(|e| amount_error("Tip pickup", e))?;
        tips::set_tip_remaining(tip_id, &left, &mut tx).await?;
        tips::insert_pickup(pickup_id, tip_id, amount, &mut tx).await?;
        tips::add_reserve_picked_up(&tip.reserve_pub, amount, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Tip {tip_id} debited by {amount}, {left} left");
        Ok(PickupOutcome::Debited)
    }

    async fn complete_pickup(&self, pickup_id: &HashCode, blind_sigs: &[Blob]) -> Result<(), MerchantDbError> {
        let mut tx = self.pool.begin().await?;
        tips::insert_pickup_signatures(pickup_id, blind_sigs, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL in `MERCHANT_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date. Safe to call on every start-up.
    pub async fn migrate(&self) -> Result<(), MerchantDbError> {
        sqlx::migrate!("./src/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| MerchantDbError::DatabaseError(format!("Migration failed: {e}")))?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
