//! Purchase invoices: goods receipt into stock, reconciled against the
//! linked purchase order

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    validate_amount, validate_document_number, validate_expiry_date, validate_line_totals,
    validate_percentage, AuditAction, DateWindow, DocumentDate, DocumentKind, ListFilter,
    NextNumber, ReceiptDirection, StockRequirement,
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
use crate::services::reconciler::PurchaseOrderReconciler;
use crate::services::renderer::{DocumentRenderer, RenderPayload};
use crate::services::stock::{StockEngine, StockLine};
use crate::services::unit::UnitCatalog;

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseInvoiceInput {
    pub number: i32,
    pub supplier_id: i32,
    /// 0 leaves the invoice unlinked
    #[serde(default, alias = "purchaseOrderInvoiceNumber")]
    pub purchase_order_number: i32,
    pub subtotal: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub tax_percentage: Decimal,
    #[serde(default)]
    pub tax_amount: Decimal,
    pub total_price: Decimal,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1))]
    pub invoice_date: String,
    #[validate(length(min = 1))]
    pub purchase_medicine_list: Vec<PurchaseLineInput>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseLineInput {
    pub medicine_barcode: String,
    pub medicine_name: String,
    pub qty: Decimal,
    pub unit: String,
    pub price: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub tax_percentage: Decimal,
    #[serde(default)]
    pub tax_amount: Decimal,
    pub subtotal: Decimal,
    #[serde(default)]
    pub batch_number: String,
    pub exp_date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyPurchaseInvoiceInput {
    pub id: i32,
    pub new_data: PurchaseInvoiceInput,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseInvoiceSummary {
    pub id: i32,
    pub number: i32,
    pub supplier_id: i32,
    pub supplier_name: String,
    pub purchase_order_number: i32,
    pub subtotal: Decimal,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub tax_percentage: Decimal,
    pub tax_amount: Decimal,
    pub total_price: Decimal,
    pub description: String,
    pub user_name: String,
    pub invoice_date: DateTime<Local>,
    pub last_modified: DateTime<Local>,
    pub pdf_url: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseInvoiceLine {
    pub id: i32,
    pub medicine_id: i32,
    pub medicine_barcode: String,
    pub medicine_name: String,
    pub qty: Decimal,
    pub unit_name: String,
    pub price: Decimal,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub tax_percentage: Decimal,
    pub tax_amount: Decimal,
    pub subtotal: Decimal,
    pub batch_number: String,
    pub expired_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseInvoiceDetail {
    #[serde(flatten)]
    pub header: PurchaseInvoiceSummary,
    pub lines: Vec<PurchaseInvoiceLine>,
}

const SUMMARY_SELECT: &str = r#"
    SELECT h.id, h.number, h.supplier_id, s.name AS supplier_name, h.purchase_order_number,
           h.subtotal, h.discount_percentage, h.discount_amount, h.tax_percentage, h.tax_amount,
           h.total_price, h.description, u.name AS user_name, h.invoice_date, h.last_modified,
           h.pdf_url
    FROM purchase_invoices h
    JOIN suppliers s ON s.id = h.supplier_id
    JOIN users u ON u.id = h.user_id
"#;

/// `(number, supplierId, subtotal, totalPrice, invoiceDate)`
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseInvoiceIdentity {
    pub number: i32,
    pub supplier_id: i32,
    pub subtotal: Decimal,
    pub total_price: Decimal,
    pub invoice_date: DateTime<FixedOffset>,
}

pub struct PurchaseInvoiceStore;

#[axum::async_trait]
impl DocumentStore for PurchaseInvoiceStore {
    type Identity = PurchaseInvoiceIdentity;

    fn kind(&self) -> DocumentKind {
        DocumentKind::PurchaseInvoice
    }

    fn table(&self) -> &'static str {
        "purchase_invoices"
    }

    async fn find_identity(
        &self,
        conn: &mut PgConnection,
        identity: &PurchaseInvoiceIdentity,
    ) -> AppResult<Option<i32>> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT id FROM purchase_invoices
            WHERE number = $1 AND supplier_id = $2 AND subtotal = $3 AND total_price = $4
              AND invoice_date = $5 AND deleted_at IS NULL
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(identity.number)
        .bind(identity.supplier_id)
        .bind(identity.subtotal)
        .bind(identity.total_price)
        .bind(identity.invoice_date)
        .fetch_optional(conn)
        .await?;
        Ok(id)
    }

    async fn hard_delete_lines(&self, conn: &mut PgConnection, id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM purchase_medicine_items WHERE purchase_invoice_id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// A line with its expiry date parsed
struct CheckedLine<'a> {
    input: &'a PurchaseLineInput,
    expired_date: NaiveDate,
}

impl PurchaseInvoiceInput {
    fn check(
        &self,
        today: NaiveDate,
    ) -> AppResult<(PurchaseInvoiceIdentity, Vec<CheckedLine<'_>>)> {
        self.validate()?;
        validate_document_number(self.number).map_err(|m| AppError::validation("number", m))?;
        validate_amount(self.total_price).map_err(|m| AppError::validation("totalPrice", m))?;
        validate_percentage(self.discount_percentage)
            .map_err(|m| AppError::validation("discountPercentage", m))?;
        validate_percentage(self.tax_percentage)
            .map_err(|m| AppError::validation("taxPercentage", m))?;
        if self.purchase_order_number < 0 {
            return Err(AppError::validation("purchaseOrderNumber", "cannot be negative"));
        }

        let mut lines = Vec::with_capacity(self.purchase_medicine_list.len());
        for line in &self.purchase_medicine_list {
            if line.qty <= Decimal::ZERO {
                return Err(AppError::validation("qty", "quantity must be positive"));
            }
            validate_amount(line.price).map_err(|m| AppError::validation("price", m))?;
            let expired_date = DocumentDate::parse(&line.exp_date)?.date;
            validate_expiry_date(expired_date, today)
                .map_err(|m| AppError::validation("expDate", m))?;
            lines.push(CheckedLine {
                input: line,
                expired_date,
            });
        }
        let subtotals: Vec<Decimal> =
            self.purchase_medicine_list.iter().map(|l| l.subtotal).collect();
        validate_line_totals(&subtotals, self.subtotal)
            .map_err(|m| AppError::validation("subtotal", m))?;

        let identity = PurchaseInvoiceIdentity {
            number: self.number,
            supplier_id: self.supplier_id,
            subtotal: self.subtotal,
            total_price: self.total_price,
            invoice_date: document_timestamp(&self.invoice_date)?,
        };
        Ok((identity, lines))
    }
}

/// Phase 1 references: supplier and, when linked, the purchase order
async fn check_references(conn: &mut PgConnection, input: &PurchaseInvoiceInput) -> AppResult<()> {
    CatalogService::get_by_id(&mut *conn, CatalogKind::Supplier, input.supplier_id).await?;
    if input.purchase_order_number != 0
        && PurchaseOrderReconciler::order_id(&mut *conn, input.purchase_order_number)
            .await?
            .is_none()
    {
        return Err(AppError::ReferenceNotFound(format!(
            "purchase order number {}",
            input.purchase_order_number
        )));
    }
    Ok(())
}

/// Insert lines, receive them into stock and move the order's received
/// quantities
async fn receive_lines(
    conn: &mut PgConnection,
    invoice_id: i32,
    order_number: i32,
    lines: &[CheckedLine<'_>],
    actor_id: i32,
) -> AppResult<()> {
    for line in lines {
        let item = line.input;
        let unit = UnitCatalog::get_or_create(&mut *conn, &item.unit).await?;
        let medicine =
            StockEngine::lock_by_barcode(&mut *conn, &item.medicine_barcode, &item.medicine_name)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO purchase_medicine_items (
                purchase_invoice_id, medicine_id, qty, unit_id, price,
                discount_percentage, discount_amount, tax_percentage, tax_amount,
                subtotal, batch_number, expired_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(invoice_id)
        .bind(medicine.id)
        .bind(item.qty)
        .bind(unit.id)
        .bind(item.price)
        .bind(item.discount_percentage)
        .bind(item.discount_amount)
        .bind(item.tax_percentage)
        .bind(item.tax_amount)
        .bind(item.subtotal)
        .bind(&item.batch_number)
        .bind(line.expired_date)
        .execute(&mut *conn)
        .await?;

        StockEngine::add(&mut *conn, medicine.id, unit.id, item.qty, actor_id).await?;
        PurchaseOrderReconciler::apply(
            &mut *conn,
            order_number,
            medicine.id,
            unit.id,
            item.qty,
            ReceiptDirection::Receive,
        )
        .await?;
    }
    Ok(())
}

/// Take stored lines back out of stock and out of the order's received
/// quantities
async fn revert_lines(
    conn: &mut PgConnection,
    order_number: i32,
    lines: &[StockLine],
    actor_id: i32,
) -> AppResult<()> {
    for line in lines {
        StockEngine::subtract(&mut *conn, line.medicine_id, line.unit_id, line.qty, actor_id)
            .await?;
        PurchaseOrderReconciler::apply(
            &mut *conn,
            order_number,
            line.medicine_id,
            line.unit_id,
            line.qty,
            ReceiptDirection::Revert,
        )
        .await?;
    }
    Ok(())
}

async fn stock_lines(conn: &mut PgConnection, invoice_id: i32) -> AppResult<Vec<StockLine>> {
    let lines = sqlx::query_as::<_, StockLine>(
        "SELECT medicine_id, unit_id, qty FROM purchase_medicine_items \
         WHERE purchase_invoice_id = $1 ORDER BY id",
    )
    .bind(invoice_id)
    .fetch_all(conn)
    .await?;
    Ok(lines)
}

pub fn render_payload(detail: &PurchaseInvoiceDetail) -> RenderPayload {
    let h = &detail.header;
    let kind = DocumentKind::PurchaseInvoice.artifact();
    let mut payload = RenderPayload::document(kind, "Purchase Invoice")
        .field("Number", h.number)
        .field("Date", h.invoice_date.format("%Y-%m-%d"))
        .field("Supplier", &h.supplier_name)
        .field("User", &h.user_name);
    if h.purchase_order_number != 0 {
        payload = payload.field("Purchase order", h.purchase_order_number);
    }
    for (i, line) in detail.lines.iter().enumerate() {
        payload = payload.line(format!(
            "{}. {} {} - {} {} x {} = {} (batch {}, exp {})",
            i + 1,
            line.medicine_barcode,
            line.medicine_name,
            line.qty,
            line.unit_name,
            line.price,
            line.subtotal,
            line.batch_number,
            line.expired_date
        ));
    }
    payload
        .total("Subtotal", h.subtotal)
        .total("Discount", h.discount_amount)
        .total("Tax", h.tax_amount)
        .total("Total", h.total_price)
}

#[derive(Clone)]
pub struct PurchaseInvoiceService {
    db: PgPool,
    audit: AuditLog,
    renderer: Arc<dyn DocumentRenderer>,
}

impl PurchaseInvoiceService {
    pub fn new(db: PgPool, audit: AuditLog, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self {
            db,
            audit,
            renderer,
        }
    }

    pub async fn create(
        &self,
        input: PurchaseInvoiceInput,
        actor: &AuthUser,
    ) -> AppResult<DocumentOutcome> {
        let (identity, lines) = input.check(Local::now().date_naive())?;
        let store = PurchaseInvoiceStore;

        let mut tx = self.db.begin().await?;
        check_references(&mut tx, &input).await?;
        store.ensure_absent(&mut tx, &identity).await?;

        let written = async {
            sqlx::query(
                r#"
                INSERT INTO purchase_invoices (
                    number, supplier_id, purchase_order_number, subtotal,
                    discount_percentage, discount_amount, tax_percentage, tax_amount,
                    total_price, description, user_id, invoice_date, last_modified_by_user_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $11)
                "#,
            )
            .bind(input.number)
            .bind(input.supplier_id)
            .bind(input.purchase_order_number)
            .bind(input.subtotal)
            .bind(input.discount_percentage)
            .bind(input.discount_amount)
            .bind(input.tax_percentage)
            .bind(input.tax_amount)
            .bind(input.total_price)
            .bind(&input.description)
            .bind(actor.id)
            .bind(identity.invoice_date)
            .execute(&mut *tx)
            .await?;
            let id = store.persisted_id(&mut tx, &identity).await?;
            receive_lines(&mut tx, id, input.purchase_order_number, &lines, actor.id).await?;
            Ok::<_, AppError>(id)
        }
        .await;

        let id = match written {
            Ok(id) => id,
            Err(err) => return Err(abort(tx, &store, &self.db, &identity, err).await),
        };
        tx.commit().await?;
        tracing::info!("purchase invoice {} created by {}", input.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Create, store.kind(), &actor.name, id, &input);
        self.finish(id, input.number, trail).await
    }

    async fn finish(&self, id: i32, number: i32, trail: AuditTrail) -> AppResult<DocumentOutcome> {
        let mut outcome = DocumentOutcome::new(id, number);
        outcome.logs = trail.flush(&self.audit).await;
        let detail = self.detail(id).await?;
        outcome.pdf_url =
            Some(publish(&self.db, &self.renderer, id, &render_payload(&detail)).await?);
        Ok(outcome)
    }

    pub async fn get_summary(&self, id: i32) -> AppResult<PurchaseInvoiceSummary> {
        sqlx::query_as::<_, PurchaseInvoiceSummary>(&format!(
            "{} WHERE h.id = $1 AND h.deleted_at IS NULL",
            SUMMARY_SELECT
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("purchase invoice id {}", id)))
    }

    pub async fn detail(&self, id: i32) -> AppResult<PurchaseInvoiceDetail> {
        let header = self.get_summary(id).await?;
        let lines = sqlx::query_as::<_, PurchaseInvoiceLine>(
            r#"
            SELECT l.id, l.medicine_id, m.barcode AS medicine_barcode, m.name AS medicine_name,
                   l.qty, un.name AS unit_name, l.price, l.discount_percentage, l.discount_amount,
                   l.tax_percentage, l.tax_amount, l.subtotal, l.batch_number, l.expired_date
            FROM purchase_medicine_items l
            JOIN medicines m ON m.id = l.medicine_id
            JOIN units un ON un.id = l.unit_id
            WHERE l.purchase_invoice_id = $1
            ORDER BY l.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        Ok(PurchaseInvoiceDetail { header, lines })
    }

    pub async fn list(
        &self,
        filter: &ListFilter,
        window: &DateWindow,
    ) -> AppResult<Vec<PurchaseInvoiceSummary>> {
        let query = ListQuery {
            select: SUMMARY_SELECT,
            date_column: "invoice_date",
        };
        query
            .run(&self.db, window, filter, |filter| match filter {
                ListFilter::Supplier(name) => Some(Condition::text("s.name = $3", name)),
                ListFilter::PurchaseOrder(number) => {
                    Some(Condition::int("h.purchase_order_number = $3", *number))
                }
                _ => None,
            })
            .await
    }

    pub async fn next_number(&self) -> AppResult<NextNumber> {
        Ok(NextNumber::after(live_count(&self.db, "purchase_invoices").await?))
    }

    /// Reverse the stored lines, then receive the new ones; the whole swap
    /// is one transaction and the artifact is rendered once afterwards
    pub async fn modify(
        &self,
        input: ModifyPurchaseInvoiceInput,
        actor: &AuthUser,
    ) -> AppResult<DocumentOutcome> {
        let data = &input.new_data;
        let (identity, lines) = data.check(Local::now().date_naive())?;
        let before = self.detail(input.id).await?;
        let store = PurchaseInvoiceStore;

        let mut tx = self.db.begin().await?;
        check_references(&mut tx, data).await?;
        if let Some(other) = store.find_identity(&mut tx, &identity).await? {
            if other != input.id {
                return Err(AppError::DuplicateDocument(format!("purchase-invoice {:?}", identity)));
            }
        }

        let old_lines = stock_lines(&mut tx, input.id).await?;
        let mut requirements: Vec<StockRequirement> =
            old_lines.iter().map(StockLine::outflow).collect();
        for line in &lines {
            let item = line.input;
            let unit = UnitCatalog::get_or_create(&mut tx, &item.unit).await?;
            let medicine =
                StockEngine::lock_by_barcode(&mut tx, &item.medicine_barcode, &item.medicine_name)
                    .await?;
            requirements.push(StockRequirement {
                medicine_id: medicine.id,
                unit_id: unit.id,
                qty: -item.qty,
            });
        }
        StockEngine::preflight(&mut tx, &requirements).await?;

        revert_lines(&mut tx, before.header.purchase_order_number, &old_lines, actor.id).await?;
        store.hard_delete_lines(&mut tx, input.id).await?;
        sqlx::query(
            r#"
            UPDATE purchase_invoices SET
                number = $1, supplier_id = $2, purchase_order_number = $3, subtotal = $4,
                discount_percentage = $5, discount_amount = $6, tax_percentage = $7,
                tax_amount = $8, total_price = $9, description = $10, invoice_date = $11,
                last_modified = NOW(), last_modified_by_user_id = $12
            WHERE id = $13 AND deleted_at IS NULL
            "#,
        )
        .bind(data.number)
        .bind(data.supplier_id)
        .bind(data.purchase_order_number)
        .bind(data.subtotal)
        .bind(data.discount_percentage)
        .bind(data.discount_amount)
        .bind(data.tax_percentage)
        .bind(data.tax_amount)
        .bind(data.total_price)
        .bind(&data.description)
        .bind(identity.invoice_date)
        .bind(actor.id)
        .bind(input.id)
        .execute(&mut *tx)
        .await?;
        receive_lines(&mut tx, input.id, data.purchase_order_number, &lines, actor.id).await?;
        tx.commit().await?;
        tracing::info!("purchase invoice {} modified by {}", before.header.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Modify, store.kind(), &actor.name, input.id, &before);
        self.finish(input.id, data.number, trail).await
    }

    pub async fn delete(&self, id: i32, actor: &AuthUser) -> AppResult<Vec<String>> {
        let before = self.detail(id).await?;
        let store = PurchaseInvoiceStore;

        let mut tx = self.db.begin().await?;
        let old_lines = stock_lines(&mut tx, id).await?;
        let requirements: Vec<StockRequirement> =
            old_lines.iter().map(StockLine::outflow).collect();
        StockEngine::preflight(&mut tx, &requirements).await?;
        revert_lines(&mut tx, before.header.purchase_order_number, &old_lines, actor.id).await?;
        store.hard_delete_lines(&mut tx, id).await?;
        soft_delete(&mut tx, store.table(), id, actor.id).await?;
        tx.commit().await?;
        tracing::info!("purchase invoice {} deleted by {}", before.header.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Delete, store.kind(), &actor.name, id, &before);
        Ok(trail.flush(&self.audit).await)
    }

    pub async fn print(&self, id: i32) -> AppResult<(String, Vec<u8>)> {
        let detail = self.detail(id).await?;
        let name = if detail.header.pdf_url.is_empty() {
            publish(&self.db, &self.renderer, id, &render_payload(&detail)).await?
        } else {
            detail.header.pdf_url.clone()
        };
        let kind = DocumentKind::PurchaseInvoice.artifact();
        let bytes = artifact_bytes(&self.renderer, kind, &name).await?;
        Ok((name, bytes))
    }
}
