use log::{debug, trace};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, SqliteConnection};

use super::json_column;
use crate::{
    db_types::{InstanceId, InventoryClaim, NewOrderRecord, OrderId, OrderListFilter, OrderRecord, OrderSummary, YesNoAll},
    traits::MerchantDbError,
};

fn order_from_row(row: &SqliteRow) -> Result<OrderRecord, MerchantDbError> {
    Ok(OrderRecord {
        row_id: row.try_get("row_id")?,
        instance_id: row.try_get("instance_id")?,
        order_id: row.try_get("order_id")?,
        order: json_column(row, "order_json")?,
        amount: row.try_get("amount")?,
        summary: row.try_get("summary")?,
        timestamp: row.try_get("timestamp")?,
        pay_deadline: row.try_get("pay_deadline")?,
    })
}

/// Takes `claim.quantity` units out of stock. Fails with `OutOfStock` when not enough units are left, and with
/// `NotFound` if the product does not exist.
pub async fn lock_inventory(
    instance: &InstanceId,
    claim: &InventoryClaim,
    conn: &mut SqliteConnection,
) -> Result<(), MerchantDbError> {
    let res = sqlx::query(
        r#"
            UPDATE products SET total_sold = total_sold + $1
            WHERE instance_id = $2 AND product_id = $3 AND (total_stock < 0 OR total_stock - total_sold >= $1)
        "#,
    )
    .bind(claim.quantity)
    .bind(instance)
    .bind(&claim.product_id)
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() > 0 {
        trace!("🗃️ {} units of {} taken out of stock", claim.quantity, claim.product_id);
        return Ok(());
    }
    let exists = sqlx::query("SELECT 1 FROM products WHERE instance_id = $1 AND product_id = $2")
        .bind(instance)
        .bind(&claim.product_id)
        .fetch_optional(conn)
        .await?
        .is_some();
    if exists {
        Err(MerchantDbError::OutOfStock(claim.product_id.clone()))
    } else {
        Err(MerchantDbError::NotFound(format!("Product {}", claim.product_id)))
    }
}

/// Inserts a new order. This is not atomic. Embed the call in a transaction together with [`lock_inventory`].
pub async fn insert_order(order: NewOrderRecord, conn: &mut SqliteConnection) -> Result<i64, MerchantDbError> {
    let row_id: i64 = sqlx::query_scalar(
        r#"
            INSERT INTO orders (instance_id, order_id, order_json, amount, summary, timestamp, pay_deadline)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING row_id
        "#,
    )
    .bind(&order.instance_id)
    .bind(&order.order_id)
    .bind(order.order.to_string())
    .bind(&order.amount)
    .bind(&order.summary)
    .bind(order.timestamp)
    .bind(order.pay_deadline)
    .fetch_one(conn)
    .await
    .map_err(|e| match MerchantDbError::from(e) {
        MerchantDbError::AlreadyExists(_) => MerchantDbError::AlreadyExists(format!("Order {}", order.order_id)),
        other => other,
    })?;
    debug!("🗃️ Order [{}] for instance {} stored with row id {row_id}", order.order_id, order.instance_id);
    Ok(row_id)
}

pub async fn fetch_order(
    instance: &InstanceId,
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<OrderRecord>, MerchantDbError> {
    let row = sqlx::query("SELECT * FROM orders WHERE instance_id = $1 AND order_id = $2")
        .bind(instance)
        .bind(order_id)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(order_from_row).transpose()
}

fn push_flag_filter(builder: &mut QueryBuilder<'_, sqlx::Sqlite>, expr: &str, filter: YesNoAll) {
    match filter {
        YesNoAll::Yes => {
            builder.push(format!(" AND {expr} = 1"));
        },
        YesNoAll::No => {
            builder.push(format!(" AND {expr} = 0"));
        },
        YesNoAll::All => {},
    }
}

/// Lists orders of an instance. A negative `delta` returns up to `|delta|` orders with a row id below `start` and a
/// timestamp at or before `date`, newest first. A positive `delta` returns up to `delta` orders with a row id above
/// `start` and a timestamp at or after `date`, oldest first.
pub async fn list_orders(
    instance: &InstanceId,
    filter: &OrderListFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderSummary>, MerchantDbError> {
    let mut builder = QueryBuilder::new(
        r#"
        SELECT
            o.row_id AS row_id,
            o.order_id AS order_id,
            o.timestamp AS timestamp,
            o.amount AS amount,
            o.summary AS summary,
            COALESCE(c.paid, 0) AS paid,
            COALESCE(c.wired, 0) AS wired,
            EXISTS (SELECT 1 FROM refunds r WHERE r.h_contract_terms = c.h_contract_terms) AS refunded
        FROM orders o
        LEFT JOIN contract_terms c ON c.instance_id = o.instance_id AND c.order_id = o.order_id
        WHERE o.instance_id = "#,
    );
    builder.push_bind(instance);
    let forward = filter.delta > 0;
    if forward {
        builder.push(" AND o.row_id > ");
        builder.push_bind(filter.start);
        builder.push(" AND o.timestamp >= ");
        builder.push_bind(filter.date);
    } else {
        builder.push(" AND o.row_id < ");
        builder.push_bind(filter.start);
        builder.push(" AND o.timestamp <= ");
        builder.push_bind(filter.date);
    }
    push_flag_filter(&mut builder, "COALESCE(c.paid, 0)", filter.paid);
    push_flag_filter(&mut builder, "COALESCE(c.wired, 0)", filter.wired);
    push_flag_filter(
        &mut builder,
        "EXISTS (SELECT 1 FROM refunds r WHERE r.h_contract_terms = c.h_contract_terms)",
        filter.refunded,
    );
    builder.push(if forward { " ORDER BY o.row_id ASC" } else { " ORDER BY o.row_id DESC" });
    builder.push(" LIMIT ");
    builder.push_bind(filter.delta.saturating_abs());
    trace!("🗃️ Executing query: {}", builder.sql());
    let rows = builder.build().fetch_all(conn).await?;
    rows.iter()
        .map(|row| {
            Ok(OrderSummary {
                order_id: row.try_get("order_id")?,
                row_id: row.try_get("row_id")?,
                timestamp: row.try_get("timestamp")?,
                amount: row.try_get("amount")?,
                summary: row.try_get("summary")?,
                paid: row.try_get("paid")?,
                refunded: row.try_get("refunded")?,
                wired: row.try_get("wired")?,
            })
        })
        .collect()
}
