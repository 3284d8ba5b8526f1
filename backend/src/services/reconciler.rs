//! Purchase order received-quantity reconciliation against the database

use rust_decimal::Decimal;
use shared::{reconcile_received, OrderLineState, ReceiptDirection};
use sqlx::{FromRow, PgConnection};

use crate::error::{AppError, AppResult};
use crate::services::stock::StockEngine;

#[derive(Debug, FromRow)]
struct OrderLineRow {
    id: i32,
    medicine_id: i32,
    order_qty: Decimal,
    received_qty: Decimal,
    unit_id: i32,
}

pub struct PurchaseOrderReconciler;

impl PurchaseOrderReconciler {
    /// Live purchase order id for `number`
    pub async fn order_id(conn: &mut PgConnection, number: i32) -> AppResult<Option<i32>> {
        let id = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM purchase_orders WHERE number = $1 AND deleted_at IS NULL \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(number)
        .fetch_optional(conn)
        .await?;
        Ok(id)
    }

    /// Move the matching order line's `received_qty` by one invoice line.
    ///
    /// No-op for unlinked invoices (`order_number == 0`) and for medicines the
    /// order does not list.
    pub async fn apply(
        conn: &mut PgConnection,
        order_number: i32,
        medicine_id: i32,
        unit_id: i32,
        qty: Decimal,
        direction: ReceiptDirection,
    ) -> AppResult<()> {
        if order_number == 0 {
            return Ok(());
        }

        let order_id = Self::order_id(&mut *conn, order_number)
            .await?
            .ok_or_else(|| {
                AppError::ReferenceNotFound(format!("purchase order number {}", order_number))
            })?;

        let row = sqlx::query_as::<_, OrderLineRow>(
            r#"
            SELECT id, medicine_id, order_qty, received_qty, unit_id
            FROM purchase_order_items
            WHERE purchase_order_id = $1 AND medicine_id = $2
            ORDER BY id
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .bind(medicine_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            tracing::debug!(
                "medicine {} not on purchase order {}, nothing to reconcile",
                medicine_id,
                order_number
            );
            return Ok(());
        };

        let medicine = StockEngine::lock(&mut *conn, medicine_id).await?;
        let line = OrderLineState {
            medicine_id: row.medicine_id,
            order_qty: row.order_qty,
            received_qty: row.received_qty,
            unit_id: row.unit_id,
        };

        if let Some(received) = reconcile_received(&line, &medicine, unit_id, qty, direction)? {
            sqlx::query("UPDATE purchase_order_items SET received_qty = $1 WHERE id = $2")
                .bind(received)
                .bind(row.id)
                .execute(&mut *conn)
                .await?;
            tracing::debug!(
                "purchase order {} {}: received {} -> {}",
                order_number,
                medicine.name,
                row.received_qty,
                received
            );
        }
        Ok(())
    }
}
