use log::debug;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, SqliteConnection};

use super::json_column;
use crate::{
    db_types::{InstanceId, Product, ProductPatch},
    traits::MerchantDbError,
};

fn product_from_row(row: &SqliteRow) -> Result<Product, MerchantDbError> {
    let taxes = json_column(row, "taxes")?;
    let taxes = match taxes {
        serde_json::Value::Array(items) => items,
        other => return Err(MerchantDbError::Inconsistent(format!("Product taxes are not a list: {other}"))),
    };
    Ok(Product {
        product_id: row.try_get("product_id")?,
        description: row.try_get("description")?,
        unit: row.try_get("unit")?,
        price: row.try_get("price")?,
        image: row.try_get("image")?,
        taxes,
        total_stock: row.try_get("total_stock")?,
        total_sold: row.try_get("total_sold")?,
    })
}

pub async fn fetch_products(instance: &InstanceId, conn: &mut SqliteConnection) -> Result<Vec<Product>, MerchantDbError> {
    let rows = sqlx::query("SELECT * FROM products WHERE instance_id = $1 ORDER BY product_id")
        .bind(instance)
        .fetch_all(conn)
        .await?;
    rows.iter().map(product_from_row).collect()
}

pub async fn fetch_product(
    instance: &InstanceId,
    product_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Product>, MerchantDbError> {
    let row = sqlx::query("SELECT * FROM products WHERE instance_id = $1 AND product_id = $2")
        .bind(instance)
        .bind(product_id)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(product_from_row).transpose()
}

pub async fn insert_product(
    instance: &InstanceId,
    product: &Product,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    sqlx::query(
        r#"
            INSERT INTO products (instance_id, product_id, description, unit, price, image, taxes, total_stock)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(instance)
    .bind(&product.product_id)
    .bind(&product.description)
    .bind(&product.unit)
    .bind(&product.price)
    .bind(&product.image)
    .bind(serde_json::Value::from(product.taxes.clone()).to_string())
    .bind(product.total_stock)
    .execute(conn)
    .await
    .map_err(|e| match MerchantDbError::from(e) {
        MerchantDbError::AlreadyExists(_) => MerchantDbError::AlreadyExists(format!("Product {}", product.product_id)),
        other => other,
    })?;
    debug!("🗃️ Product {} added to instance {instance}", product.product_id);
    Ok(())
}

/// Applies a patch to a product. Stock can only ever grow past what has already been sold; a lower `total_stock` is
/// rejected with `Inconsistent`.
pub async fn update_product(
    instance: &InstanceId,
    product_id: &str,
    patch: ProductPatch,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    let current = fetch_product(instance, product_id, &mut *conn)
        .await?
        .ok_or_else(|| MerchantDbError::NotFound(format!("Product {product_id}")))?;
    if let Some(stock) = patch.total_stock {
        if stock >= 0 && stock < current.total_sold {
            return Err(MerchantDbError::Inconsistent(format!(
                "Product {product_id} has sold {} units, stock cannot drop to {stock}",
                current.total_sold
            )));
        }
    }
    let mut builder = QueryBuilder::new("UPDATE products SET ");
    let mut set_clause = builder.separated(", ");
    if let Some(description) = patch.description {
        set_clause.push("description = ");
        set_clause.push_bind_unseparated(description);
    }
    if let Some(unit) = patch.unit {
        set_clause.push("unit = ");
        set_clause.push_bind_unseparated(unit);
    }
    if let Some(price) = patch.price {
        set_clause.push("price = ");
        set_clause.push_bind_unseparated(price);
    }
    if let Some(image) = patch.image {
        set_clause.push("image = ");
        set_clause.push_bind_unseparated(image);
    }
    if let Some(taxes) = patch.taxes {
        set_clause.push("taxes = ");
        set_clause.push_bind_unseparated(serde_json::Value::from(taxes).to_string());
    }
    if let Some(stock) = patch.total_stock {
        set_clause.push("total_stock = ");
        set_clause.push_bind_unseparated(stock);
    }
    set_clause.push("product_id = product_id");
    builder.push(" WHERE instance_id = ");
    builder.push_bind(instance);
    builder.push(" AND product_id = ");
    builder.push_bind(product_id);
    builder.build().execute(conn).await?;
    Ok(())
}

pub async fn delete_product(
    instance: &InstanceId,
    product_id: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, MerchantDbError> {
    let res = sqlx::query("DELETE FROM products WHERE instance_id = $1 AND product_id = $2")
        .bind(instance)
        .bind(product_id)
        .execute(conn)
        .await?;
    Ok(res.rows_affected() > 0)
}
