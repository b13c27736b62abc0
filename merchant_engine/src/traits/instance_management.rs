use crate::{
    db_types::{Instance, InstanceId, InstancePatch, NewInstance, Product, ProductPatch},
    traits::MerchantDbError,
};

#[allow(async_fn_in_trait)]
pub trait InstanceManagement {
    /// Fetch an instance with its wire accounts. Deleted (key-less) instances are returned too; callers decide
    /// whether they are usable.
    async fn fetch_instance(&self, id: &InstanceId) -> Result<Option<Instance>, MerchantDbError>;

    async fn fetch_instances(&self) -> Result<Vec<Instance>, MerchantDbError>;

    /// Creates the instance. Missing key material is generated. Fails with `AlreadyExists` if the id is taken.
    async fn insert_instance(&self, instance: NewInstance) -> Result<Instance, MerchantDbError>;

    async fn update_instance(&self, id: &InstanceId, patch: InstancePatch) -> Result<Instance, MerchantDbError>;

    /// Deletes an instance. Without `purge` only the private key is removed, which leaves the instance's history
    /// intact but makes it unusable. With `purge`, every row belonging to the instance is removed.
    /// Returns `false` if the instance does not exist.
    async fn delete_instance(&self, id: &InstanceId, purge: bool) -> Result<bool, MerchantDbError>;

    async fn fetch_products(&self, id: &InstanceId) -> Result<Vec<Product>, MerchantDbError>;

    async fn fetch_product(&self, id: &InstanceId, product_id: &str) -> Result<Option<Product>, MerchantDbError>;

    async fn insert_product(&self, id: &InstanceId, product: Product) -> Result<Product, MerchantDbError>;

    async fn update_product(
        &self,
        id: &InstanceId,
        product_id: &str,
        patch: ProductPatch,
    ) -> Result<Product, MerchantDbError>;

    async fn delete_product(&self, id: &InstanceId, product_id: &str) -> Result<bool, MerchantDbError>;
}
