//! Purchase orders: ordered quantities per medicine, with received
//! quantities moved by linked purchase invoices

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    validate_amount, validate_document_number, AuditAction, DateWindow, DocumentKind, ListFilter,
    NextNumber,
};
use sqlx::{FromRow, PgConnection, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::audit::{AuditLog, AuditTrail};
use crate::services::auth::AuthUser;
use crate::services::catalog::{CatalogKind, CatalogService};
use crate::services::document::{
    abort, artifact_bytes, document_timestamp, live_count, publish, soft_delete, Condition,
    DocumentOutcome, DocumentStore, ListQuery,
};
use crate::services::renderer::{DocumentRenderer, RenderPayload};
use crate::services::stock::StockEngine;
use crate::services::unit::UnitCatalog;

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderInput {
    pub number: i32,
    pub supplier_id: i32,
    #[serde(default)]
    pub total_item: i32,
    #[validate(length(min = 1))]
    pub invoice_date: String,
    #[validate(length(min = 1))]
    pub purchase_order_medicine_list: Vec<PurchaseOrderLineInput>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderLineInput {
    pub medicine_barcode: String,
    pub medicine_name: String,
    pub order_qty: Decimal,
    #[serde(default)]
    pub received_qty: Decimal,
    pub unit: String,
    #[serde(default)]
    pub remarks: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyPurchaseOrderInput {
    pub id: i32,
    pub new_data: PurchaseOrderInput,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderSummary {
    pub id: i32,
    pub number: i32,
    pub supplier_id: i32,
    pub supplier_name: String,
    pub user_name: String,
    pub total_item: i32,
    pub invoice_date: DateTime<Local>,
    pub last_modified: DateTime<Local>,
    pub pdf_url: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderLine {
    pub id: i32,
    pub medicine_id: i32,
    pub medicine_barcode: String,
    pub medicine_name: String,
    pub order_qty: Decimal,
    pub received_qty: Decimal,
    pub unit_name: String,
    pub remarks: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderDetail {
    #[serde(flatten)]
    pub header: PurchaseOrderSummary,
    pub lines: Vec<PurchaseOrderLine>,
}

const SUMMARY_SELECT: &str = r#"
    SELECT h.id, h.number, h.supplier_id, s.name AS supplier_name, u.name AS user_name,
           h.total_item, h.invoice_date, h.last_modified, h.pdf_url
    FROM purchase_orders h
    JOIN suppliers s ON s.id = h.supplier_id
    JOIN users u ON u.id = h.user_id
"#;

/// `(number, supplierId, invoiceDate)`
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseOrderIdentity {
    pub number: i32,
    pub supplier_id: i32,
    pub invoice_date: DateTime<FixedOffset>,
}

pub struct PurchaseOrderStore;

#[axum::async_trait]
impl DocumentStore for PurchaseOrderStore {
    type Identity = PurchaseOrderIdentity;

    fn kind(&self) -> DocumentKind {
        DocumentKind::PurchaseOrder
    }

    fn table(&self) -> &'static str {
        "purchase_orders"
    }

    async fn find_identity(
        &self,
        conn: &mut PgConnection,
        identity: &PurchaseOrderIdentity,
    ) -> AppResult<Option<i32>> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT id FROM purchase_orders
            WHERE number = $1 AND supplier_id = $2 AND invoice_date = $3 AND deleted_at IS NULL
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(identity.number)
        .bind(identity.supplier_id)
        .bind(identity.invoice_date)
        .fetch_optional(conn)
        .await?;
        Ok(id)
    }

    async fn hard_delete_lines(&self, conn: &mut PgConnection, id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM purchase_order_items WHERE purchase_order_id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

impl PurchaseOrderInput {
    fn check(&self) -> AppResult<PurchaseOrderIdentity> {
        self.validate()?;
        validate_document_number(self.number).map_err(|m| AppError::validation("number", m))?;
        for line in &self.purchase_order_medicine_list {
            validate_amount(line.order_qty).map_err(|m| AppError::validation("orderQty", m))?;
            validate_amount(line.received_qty)
                .map_err(|m| AppError::validation("receivedQty", m))?;
            if line.received_qty > line.order_qty {
                return Err(AppError::validation(
                    "receivedQty",
                    "received quantity is larger than the ordered quantity",
                ));
            }
        }
        Ok(PurchaseOrderIdentity {
            number: self.number,
            supplier_id: self.supplier_id,
            invoice_date: document_timestamp(&self.invoice_date)?,
        })
    }

    fn total_item(&self) -> i32 {
        if self.total_item > 0 {
            self.total_item
        } else {
            self.purchase_order_medicine_list.len() as i32
        }
    }
}

async fn insert_lines(
    conn: &mut PgConnection,
    order_id: i32,
    lines: &[PurchaseOrderLineInput],
) -> AppResult<()> {
    for line in lines {
        let unit = UnitCatalog::get_or_create(&mut *conn, &line.unit).await?;
        let medicine =
            StockEngine::lock_by_barcode(&mut *conn, &line.medicine_barcode, &line.medicine_name)
                .await?;
        // the ordered unit must be one the medicine carries
        medicine.to_first_unit(unit.id, line.order_qty)?;

        sqlx::query(
            r#"
            INSERT INTO purchase_order_items
                (purchase_order_id, medicine_id, order_qty, received_qty, unit_id, remarks)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order_id)
        .bind(medicine.id)
        .bind(line.order_qty)
        .bind(line.received_qty)
        .bind(unit.id)
        .bind(&line.remarks)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub fn render_payload(detail: &PurchaseOrderDetail) -> RenderPayload {
    let h = &detail.header;
    let kind = DocumentKind::PurchaseOrder.artifact();
    let mut payload = RenderPayload::document(kind, "Purchase Order")
        .field("Number", h.number)
        .field("Date", h.invoice_date.format("%Y-%m-%d"))
        .field("Supplier", &h.supplier_name)
        .field("User", &h.user_name);
    for (i, line) in detail.lines.iter().enumerate() {
        payload = payload.line(format!(
            "{}. {} {} - {} {} (received {}) {}",
            i + 1,
            line.medicine_barcode,
            line.medicine_name,
            line.order_qty,
            line.unit_name,
            line.received_qty,
            line.remarks
        ));
    }
    payload.total("Total item", h.total_item)
}

#[derive(Clone)]
pub struct PurchaseOrderService {
    db: PgPool,
    audit: AuditLog,
    renderer: Arc<dyn DocumentRenderer>,
}

impl PurchaseOrderService {
    pub fn new(db: PgPool, audit: AuditLog, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self {
            db,
            audit,
            renderer,
        }
    }

    pub async fn create(
        &self,
        input: PurchaseOrderInput,
        actor: &AuthUser,
    ) -> AppResult<DocumentOutcome> {
        let identity = input.check()?;
        let store = PurchaseOrderStore;

        let mut tx = self.db.begin().await?;
        CatalogService::get_by_id(&mut tx, CatalogKind::Supplier, input.supplier_id).await?;
        store.ensure_absent(&mut tx, &identity).await?;

        let written = async {
            sqlx::query(
                r#"
                INSERT INTO purchase_orders
                    (number, supplier_id, user_id, total_item, invoice_date,
                     last_modified_by_user_id)
                VALUES ($1, $2, $3, $4, $5, $3)
                "#,
            )
            .bind(input.number)
            .bind(input.supplier_id)
            .bind(actor.id)
            .bind(input.total_item())
            .bind(identity.invoice_date)
            .execute(&mut *tx)
            .await?;
            let id = store.persisted_id(&mut tx, &identity).await?;
            insert_lines(&mut tx, id, &input.purchase_order_medicine_list).await?;
            Ok::<_, AppError>(id)
        }
        .await;

        let id = match written {
            Ok(id) => id,
            Err(err) => return Err(abort(tx, &store, &self.db, &identity, err).await),
        };
        tx.commit().await?;
        tracing::info!("purchase order {} created by {}", input.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Create, store.kind(), &actor.name, id, &input);
        self.finish(id, input.number, trail).await
    }

    /// Audit flush and render once the command committed
    async fn finish(&self, id: i32, number: i32, trail: AuditTrail) -> AppResult<DocumentOutcome> {
        let mut outcome = DocumentOutcome::new(id, number);
        outcome.logs = trail.flush(&self.audit).await;
        let detail = self.detail(id).await?;
        outcome.pdf_url =
            Some(publish(&self.db, &self.renderer, id, &render_payload(&detail)).await?);
        Ok(outcome)
    }

    pub async fn get_summary(&self, id: i32) -> AppResult<PurchaseOrderSummary> {
        sqlx::query_as::<_, PurchaseOrderSummary>(&format!(
            "{} WHERE h.id = $1 AND h.deleted_at IS NULL",
            SUMMARY_SELECT
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("purchase order id {}", id)))
    }

    pub async fn detail(&self, id: i32) -> AppResult<PurchaseOrderDetail> {
        let header = self.get_summary(id).await?;
        let lines = sqlx::query_as::<_, PurchaseOrderLine>(
            r#"
            SELECT l.id, l.medicine_id, m.barcode AS medicine_barcode, m.name AS medicine_name,
                   l.order_qty, l.received_qty, un.name AS unit_name, l.remarks
            FROM purchase_order_items l
            JOIN medicines m ON m.id = l.medicine_id
            JOIN units un ON un.id = l.unit_id
            WHERE l.purchase_order_id = $1
            ORDER BY l.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        Ok(PurchaseOrderDetail { header, lines })
    }

    pub async fn list(
        &self,
        filter: &ListFilter,
        window: &DateWindow,
    ) -> AppResult<Vec<PurchaseOrderSummary>> {
        let query = ListQuery {
            select: SUMMARY_SELECT,
            date_column: "invoice_date",
        };
        query
            .run(&self.db, window, filter, |filter| match filter {
                ListFilter::Supplier(name) => Some(Condition::text("s.name = $3", name)),
                _ => None,
            })
            .await
    }

    pub async fn next_number(&self) -> AppResult<NextNumber> {
        Ok(NextNumber::after(live_count(&self.db, "purchase_orders").await?))
    }

    /// Replace header fields and lines in one transaction
    pub async fn modify(
        &self,
        input: ModifyPurchaseOrderInput,
        actor: &AuthUser,
    ) -> AppResult<DocumentOutcome> {
        let identity = input.new_data.check()?;
        let before = self.detail(input.id).await?;
        let store = PurchaseOrderStore;
        let data = &input.new_data;

        let mut tx = self.db.begin().await?;
        CatalogService::get_by_id(&mut tx, CatalogKind::Supplier, data.supplier_id).await?;
        if let Some(other) = store.find_identity(&mut tx, &identity).await? {
            if other != input.id {
                return Err(AppError::DuplicateDocument(format!("purchase-order {:?}", identity)));
            }
        }

        store.hard_delete_lines(&mut tx, input.id).await?;
        sqlx::query(
            r#"
            UPDATE purchase_orders SET
                number = $1, supplier_id = $2, total_item = $3, invoice_date = $4,
                last_modified = NOW(), last_modified_by_user_id = $5
            WHERE id = $6 AND deleted_at IS NULL
            "#,
        )
        .bind(data.number)
        .bind(data.supplier_id)
        .bind(data.total_item())
        .bind(identity.invoice_date)
        .bind(actor.id)
        .bind(input.id)
        .execute(&mut *tx)
        .await?;
        insert_lines(&mut tx, input.id, &data.purchase_order_medicine_list).await?;
        tx.commit().await?;
        tracing::info!("purchase order {} modified by {}", before.header.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Modify, store.kind(), &actor.name, input.id, &before);
        self.finish(input.id, data.number, trail).await
    }

    pub async fn delete(&self, id: i32, actor: &AuthUser) -> AppResult<Vec<String>> {
        let before = self.detail(id).await?;
        let store = PurchaseOrderStore;

        let mut tx = self.db.begin().await?;
        store.hard_delete_lines(&mut tx, id).await?;
        soft_delete(&mut tx, store.table(), id, actor.id).await?;
        tx.commit().await?;
        tracing::info!("purchase order {} deleted by {}", before.header.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Delete, store.kind(), &actor.name, id, &before);
        Ok(trail.flush(&self.audit).await)
    }

    /// PDF of the order, rendered on demand when missing
    pub async fn print(&self, id: i32) -> AppResult<(String, Vec<u8>)> {
        let detail = self.detail(id).await?;
        let name = if detail.header.pdf_url.is_empty() {
            publish(&self.db, &self.renderer, id, &render_payload(&detail)).await?
        } else {
            detail.header.pdf_url.clone()
        };
        let kind = DocumentKind::PurchaseOrder.artifact();
        let bytes = artifact_bytes(&self.renderer, kind, &name).await?;
        Ok((name, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn input() -> PurchaseOrderInput {
        PurchaseOrderInput {
            number: 10,
            supplier_id: 1,
            total_item: 0,
            invoice_date: "2024-03-01 +0700WIB".to_string(),
            purchase_order_medicine_list: vec![PurchaseOrderLineInput {
                medicine_barcode: "899001".to_string(),
                medicine_name: "PARACETAMOL-500".to_string(),
                order_qty: dec("100"),
                received_qty: Decimal::ZERO,
                unit: "tab".to_string(),
                remarks: String::new(),
            }],
        }
    }

    #[test]
    fn test_identity_uses_client_offset() {
        let identity = input().check().unwrap();
        assert_eq!(identity.number, 10);
        assert_eq!(identity.invoice_date.offset().local_minus_utc(), 7 * 3600);
    }

    #[test]
    fn test_total_item_defaults_to_line_count() {
        assert_eq!(input().total_item(), 1);
    }

    #[test]
    fn test_received_above_ordered_is_rejected() {
        let mut po = input();
        po.purchase_order_medicine_list[0].received_qty = dec("101");
        assert!(matches!(po.check(), Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_empty_order_is_rejected() {
        let mut po = input();
        po.purchase_order_medicine_list.clear();
        assert!(po.check().is_err());
    }
}
