use std::{fmt::Debug, sync::Arc};

use log::*;
use merchant_common::Amount;
use regex::Regex;

use crate::{
    api::InstanceApiError,
    db_types::{InstanceDetails, InstanceId, InstancePatch, NewInstance, Product, ProductPatch},
    settings::MerchantSettings,
    traits::{InstanceManagement, MerchantDbError},
};

const INSTANCE_ID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.-]*$";
const PAYTO_PATTERN: &str = r"^payto://[A-Za-z0-9-]+/.+$";

fn is_match(pattern: &str, value: &str) -> Result<bool, InstanceApiError> {
    let re = Regex::new(pattern).map_err(|e| InstanceApiError::InvalidInstance(e.to_string()))?;
    Ok(re.is_match(value))
}

/// Administrative access to merchant instances and their product inventory.
pub struct InstanceApi<B> {
    db: B,
    settings: Arc<MerchantSettings>,
}

impl<B> Debug for InstanceApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InstanceApi")
    }
}

impl<B> InstanceApi<B> {
    pub fn new(db: B, settings: Arc<MerchantSettings>) -> Self {
        Self { db, settings }
    }

    fn check_fee(&self, name: &str, fee: &Amount) -> Result<(), InstanceApiError> {
        if fee.currency() != self.settings.currency {
            return Err(InstanceApiError::InvalidInstance(format!(
                "{name} is in {}, but the merchant uses {}",
                fee.currency(),
                self.settings.currency
            )));
        }
        Ok(())
    }

    fn check_payto_uris(&self, uris: &[String]) -> Result<(), InstanceApiError> {
        if uris.is_empty() {
            return Err(InstanceApiError::InvalidInstance("at least one payto URI is required".into()));
        }
        for uri in uris {
            if !is_match(PAYTO_PATTERN, uri)? {
                return Err(InstanceApiError::InvalidInstance(format!("{uri} is not a payto URI")));
            }
        }
        Ok(())
    }

    fn check_amortization(amortization: u32) -> Result<(), InstanceApiError> {
        if amortization == 0 {
            return Err(InstanceApiError::InvalidInstance("wire fee amortization must be at least 1".into()));
        }
        Ok(())
    }

    /// Checks a new instance against the merchant configuration.
    pub fn validate_instance(&self, instance: &NewInstance) -> Result<(), InstanceApiError> {
        if !is_match(INSTANCE_ID_PATTERN, instance.id.as_str())? {
            return Err(InstanceApiError::InvalidInstance(format!("'{}' is not a valid instance id", instance.id)));
        }
        if instance.name.trim().is_empty() {
            return Err(InstanceApiError::InvalidInstance("name must not be empty".into()));
        }
        self.check_payto_uris(&instance.payto_uris)?;
        self.check_fee("default_max_deposit_fee", &instance.default_max_deposit_fee)?;
        self.check_fee("default_max_wire_fee", &instance.default_max_wire_fee)?;
        Self::check_amortization(instance.default_wire_fee_amortization)
    }

    pub fn validate_patch(&self, patch: &InstancePatch) -> Result<(), InstanceApiError> {
        if let Some(uris) = &patch.payto_uris {
            self.check_payto_uris(uris)?;
        }
        if let Some(fee) = &patch.default_max_deposit_fee {
            self.check_fee("default_max_deposit_fee", fee)?;
        }
        if let Some(fee) = &patch.default_max_wire_fee {
            self.check_fee("default_max_wire_fee", fee)?;
        }
        if let Some(amortization) = patch.default_wire_fee_amortization {
            Self::check_amortization(amortization)?;
        }
        Ok(())
    }

    fn validate_product(&self, product: &Product) -> Result<(), InstanceApiError> {
        if product.product_id.trim().is_empty() {
            return Err(InstanceApiError::InvalidProduct("product_id must not be empty".into()));
        }
        if product.description.trim().is_empty() {
            return Err(InstanceApiError::InvalidProduct(format!("{} has no description", product.product_id)));
        }
        if product.price.currency() != self.settings.currency {
            return Err(InstanceApiError::InvalidProduct(format!(
                "{} is priced in {}, but the merchant uses {}",
                product.product_id,
                product.price.currency(),
                self.settings.currency
            )));
        }
        if product.total_stock < -1 {
            return Err(InstanceApiError::InvalidProduct("total_stock must be -1 or more".into()));
        }
        Ok(())
    }
}

impl<B> InstanceApi<B>
where B: InstanceManagement
{
    pub async fn instances(&self) -> Result<Vec<InstanceDetails>, InstanceApiError> {
        let instances = self.db.fetch_instances().await?;
        Ok(instances.iter().map(InstanceDetails::from).collect())
    }

    pub async fn instance(&self, id: &InstanceId) -> Result<InstanceDetails, InstanceApiError> {
        let instance = self.db.fetch_instance(id).await?.ok_or_else(|| InstanceApiError::UnknownInstance(id.clone()))?;
        Ok(InstanceDetails::from(&instance))
    }

    /// Creates an instance. A signing key is generated if none is supplied.
    pub async fn create_instance(&self, instance: NewInstance) -> Result<InstanceDetails, InstanceApiError> {
        self.validate_instance(&instance)?;
        let id = instance.id.clone();
        match self.db.insert_instance(instance).await {
            Ok(instance) => {
                info!("🪛️ Instance {id} created with merchant key {}", instance.merchant_pub);
                Ok(InstanceDetails::from(&instance))
            },
            Err(MerchantDbError::AlreadyExists(_)) => Err(InstanceApiError::AlreadyExists(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update_instance(
        &self,
        id: &InstanceId,
        patch: InstancePatch,
    ) -> Result<InstanceDetails, InstanceApiError> {
        self.validate_patch(&patch)?;
        match self.db.update_instance(id, patch).await {
            Ok(instance) => {
                debug!("🪛️ Instance {id} updated");
                Ok(InstanceDetails::from(&instance))
            },
            Err(MerchantDbError::NotFound(_)) => Err(InstanceApiError::UnknownInstance(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes an instance. Without `purge`, only its signing key is dropped and its history is kept.
    pub async fn delete_instance(&self, id: &InstanceId, purge: bool) -> Result<(), InstanceApiError> {
        if self.db.delete_instance(id, purge).await? {
            info!("🪛️ Instance {id} deleted{}", if purge { " and purged" } else { "" });
            Ok(())
        } else {
            Err(InstanceApiError::UnknownInstance(id.clone()))
        }
    }

    async fn existing(&self, id: &InstanceId) -> Result<(), InstanceApiError> {
        match self.db.fetch_instance(id).await? {
            Some(_) => Ok(()),
            None => Err(InstanceApiError::UnknownInstance(id.clone())),
        }
    }

    pub async fn products(&self, id: &InstanceId) -> Result<Vec<Product>, InstanceApiError> {
        self.existing(id).await?;
        Ok(self.db.fetch_products(id).await?)
    }

    pub async fn product(&self, id: &InstanceId, product_id: &str) -> Result<Product, InstanceApiError> {
        self.existing(id).await?;
        self.db
            .fetch_product(id, product_id)
            .await?
            .ok_or_else(|| InstanceApiError::UnknownProduct(product_id.to_string()))
    }

    pub async fn create_product(&self, id: &InstanceId, product: Product) -> Result<Product, InstanceApiError> {
        self.validate_product(&product)?;
        self.existing(id).await?;
        let product_id = product.product_id.clone();
        match self.db.insert_product(id, product).await {
            Ok(product) => {
                debug!("🪛️ Product {product_id} added to instance {id}");
                Ok(product)
            },
            Err(MerchantDbError::AlreadyExists(_)) => Err(InstanceApiError::ProductAlreadyExists(product_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update_product(
        &self,
        id: &InstanceId,
        product_id: &str,
        patch: ProductPatch,
    ) -> Result<Product, InstanceApiError> {
        if let Some(price) = &patch.price {
            if price.currency() != self.settings.currency {
                return Err(InstanceApiError::InvalidProduct(format!("price must be in {}", self.settings.currency)));
            }
        }
        if matches!(patch.total_stock, Some(stock) if stock < -1) {
            return Err(InstanceApiError::InvalidProduct("total_stock must be -1 or more".into()));
        }
        self.existing(id).await?;
        match self.db.update_product(id, product_id, patch).await {
            Ok(product) => Ok(product),
            Err(MerchantDbError::NotFound(_)) => Err(InstanceApiError::UnknownProduct(product_id.to_string())),
            Err(MerchantDbError::Inconsistent(reason)) => Err(InstanceApiError::InvalidProduct(reason)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_product(&self, id: &InstanceId, product_id: &str) -> Result<(), InstanceApiError> {
        self.existing(id).await?;
        if self.db.delete_product(id, product_id).await? {
            debug!("🪛️ Product {product_id} removed from instance {id}");
            Ok(())
        } else {
            Err(InstanceApiError::UnknownProduct(product_id.to_string()))
        }
    }
}
