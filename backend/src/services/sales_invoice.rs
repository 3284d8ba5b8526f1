//! Sales invoices. Stock leaves through the prescriptions attached to an
//! invoice, never through the invoice itself.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    validate_amount, validate_document_number, validate_percentage, ArtifactKind, AuditAction,
    DateWindow, DocumentKind, ListFilter, NextNumber, StockRequirement,
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
pub struct SalesInvoiceInput {
    pub number: i32,
    pub customer_id: i32,
    pub subtotal: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
    #[serde(default, alias = "discount")]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub tax_percentage: Decimal,
    #[serde(default, alias = "tax")]
    pub tax_amount: Decimal,
    pub total_price: Decimal,
    pub paid_amount: Decimal,
    #[serde(default)]
    pub change_amount: Decimal,
    #[validate(length(min = 1))]
    pub payment_method_name: String,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1))]
    pub invoice_date: String,
    #[validate(length(min = 1))]
    pub medicine_lists: Vec<SalesLineInput>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesLineInput {
    pub medicine_barcode: String,
    pub medicine_name: String,
    pub qty: Decimal,
    pub unit: String,
    pub price: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifySalesInvoiceInput {
    pub id: i32,
    pub new_data: SalesInvoiceInput,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SalesInvoiceSummary {
    pub id: i32,
    pub number: i32,
    pub customer_id: i32,
    pub customer_name: String,
    pub subtotal: Decimal,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub tax_percentage: Decimal,
    pub tax_amount: Decimal,
    pub total_price: Decimal,
    pub paid_amount: Decimal,
    pub change_amount: Decimal,
    pub payment_method_name: String,
    pub description: String,
    pub user_name: String,
    pub invoice_date: DateTime<Local>,
    pub last_modified: DateTime<Local>,
    pub pdf_url: String,
    pub receipt_pdf_url: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SalesInvoiceLine {
    pub id: i32,
    pub medicine_id: i32,
    pub medicine_barcode: String,
    pub medicine_name: String,
    pub qty: Decimal,
    pub unit_name: String,
    pub price: Decimal,
    pub discount: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesInvoiceDetail {
    #[serde(flatten)]
    pub header: SalesInvoiceSummary,
    pub lines: Vec<SalesInvoiceLine>,
}

const SUMMARY_SELECT: &str = r#"
    SELECT h.id, h.number, h.customer_id, c.name AS customer_name, h.subtotal,
           h.discount_percentage, h.discount_amount, h.tax_percentage, h.tax_amount,
           h.total_price, h.paid_amount, h.change_amount, pm.name AS payment_method_name,
           h.description, u.name AS user_name, h.invoice_date, h.last_modified,
           h.pdf_url, h.receipt_pdf_url
    FROM sales_invoices h
    JOIN customers c ON c.id = h.customer_id
    JOIN payment_methods pm ON pm.id = h.payment_method_id
    JOIN users u ON u.id = h.user_id
"#;

/// `(number, customerId, invoiceDate)`
#[derive(Debug, Clone, PartialEq)]
pub struct SalesInvoiceIdentity {
    pub number: i32,
    pub customer_id: i32,
    pub invoice_date: DateTime<FixedOffset>,
}

pub struct SalesInvoiceStore;

#[axum::async_trait]
impl DocumentStore for SalesInvoiceStore {
    type Identity = SalesInvoiceIdentity;

    fn kind(&self) -> DocumentKind {
        DocumentKind::SalesInvoice
    }

    fn table(&self) -> &'static str {
        "sales_invoices"
    }

    async fn find_identity(
        &self,
        conn: &mut PgConnection,
        identity: &SalesInvoiceIdentity,
    ) -> AppResult<Option<i32>> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT id FROM sales_invoices
            WHERE number = $1 AND customer_id = $2 AND invoice_date = $3 AND deleted_at IS NULL
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(identity.number)
        .bind(identity.customer_id)
        .bind(identity.invoice_date)
        .fetch_optional(conn)
        .await?;
        Ok(id)
    }

    async fn hard_delete_lines(&self, conn: &mut PgConnection, id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM sales_medicine_items WHERE sales_invoice_id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

impl SalesInvoiceInput {
    fn check(&self) -> AppResult<SalesInvoiceIdentity> {
        self.validate()?;
        validate_document_number(self.number).map_err(|m| AppError::validation("number", m))?;
        validate_amount(self.total_price).map_err(|m| AppError::validation("totalPrice", m))?;
        validate_amount(self.paid_amount).map_err(|m| AppError::validation("paidAmount", m))?;
        validate_percentage(self.discount_percentage)
            .map_err(|m| AppError::validation("discountPercentage", m))?;
        validate_percentage(self.tax_percentage)
            .map_err(|m| AppError::validation("taxPercentage", m))?;
        for line in &self.medicine_lists {
            if line.qty <= Decimal::ZERO {
                return Err(AppError::validation("qty", "quantity must be positive"));
            }
        }
        Ok(SalesInvoiceIdentity {
            number: self.number,
            customer_id: self.customer_id,
            invoice_date: document_timestamp(&self.invoice_date)?,
        })
    }
}

/// Lines are checked against the balance but never move it
async fn insert_lines(
    conn: &mut PgConnection,
    invoice_id: i32,
    lines: &[SalesLineInput],
) -> AppResult<()> {
    let mut requirements = Vec::with_capacity(lines.len());
    for line in lines {
        let unit = UnitCatalog::get_or_create(&mut *conn, &line.unit).await?;
        let medicine =
            StockEngine::lock_by_barcode(&mut *conn, &line.medicine_barcode, &line.medicine_name)
                .await?;
        medicine.to_first_unit(unit.id, line.qty)?;
        requirements.push(StockRequirement {
            medicine_id: medicine.id,
            unit_id: unit.id,
            qty: line.qty,
        });

        sqlx::query(
            r#"
            INSERT INTO sales_medicine_items
                (sales_invoice_id, medicine_id, qty, unit_id, price, discount, subtotal)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(invoice_id)
        .bind(medicine.id)
        .bind(line.qty)
        .bind(unit.id)
        .bind(line.price)
        .bind(line.discount)
        .bind(line.subtotal)
        .execute(&mut *conn)
        .await?;
    }
    StockEngine::preflight(conn, &requirements).await
}

fn line_text(i: usize, line: &SalesInvoiceLine) -> String {
    format!(
        "{}. {} - {} {} x {} - {} = {}",
        i + 1,
        line.medicine_name,
        line.qty,
        line.unit_name,
        line.price,
        line.discount,
        line.subtotal
    )
}

pub fn render_payload(detail: &SalesInvoiceDetail) -> RenderPayload {
    let h = &detail.header;
    let mut payload = RenderPayload::document(ArtifactKind::Invoice, "Invoice")
        .field("Number", h.number)
        .field("Date", h.invoice_date.format("%Y-%m-%d"))
        .field("Customer", &h.customer_name)
        .field("Cashier", &h.user_name);
    for (i, line) in detail.lines.iter().enumerate() {
        payload = payload.line(line_text(i, line));
    }
    payload
        .total("Subtotal", h.subtotal)
        .total("Discount", h.discount_amount)
        .total("Tax", h.tax_amount)
        .total("Total", h.total_price)
}

/// Short cashier receipt of the same invoice
pub fn receipt_payload(detail: &SalesInvoiceDetail) -> RenderPayload {
    let h = &detail.header;
    let mut payload = RenderPayload::document(ArtifactKind::Receipt, "Receipt")
        .field("No", h.number)
        .field("Date", h.invoice_date.format("%Y-%m-%d"));
    for (i, line) in detail.lines.iter().enumerate() {
        payload = payload.line(line_text(i, line));
    }
    payload
        .total("Total", h.total_price)
        .total(&h.payment_method_name, h.paid_amount)
        .total("Change", h.change_amount)
}

#[derive(Clone)]
pub struct SalesInvoiceService {
    db: PgPool,
    audit: AuditLog,
    renderer: Arc<dyn DocumentRenderer>,
}

impl SalesInvoiceService {
    pub fn new(db: PgPool, audit: AuditLog, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self {
            db,
            audit,
            renderer,
        }
    }

    pub async fn create(
        &self,
        input: SalesInvoiceInput,
        actor: &AuthUser,
    ) -> AppResult<DocumentOutcome> {
        let identity = input.check()?;
        let store = SalesInvoiceStore;

        let mut tx = self.db.begin().await?;
        CatalogService::get_by_id(&mut tx, CatalogKind::Customer, input.customer_id).await?;
        store.ensure_absent(&mut tx, &identity).await?;

        let written = async {
            let payment = CatalogService::get_or_create(
                &mut tx,
                CatalogKind::PaymentMethod,
                &input.payment_method_name,
            )
            .await?;
            sqlx::query(
                r#"
                INSERT INTO sales_invoices (
                    number, user_id, customer_id, subtotal, discount_percentage, discount_amount,
                    tax_percentage, tax_amount, total_price, paid_amount, change_amount,
                    payment_method_id, description, invoice_date, last_modified_by_user_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $2)
                "#,
            )
            .bind(input.number)
            .bind(actor.id)
            .bind(input.customer_id)
            .bind(input.subtotal)
            .bind(input.discount_percentage)
            .bind(input.discount_amount)
            .bind(input.tax_percentage)
            .bind(input.tax_amount)
            .bind(input.total_price)
            .bind(input.paid_amount)
            .bind(input.change_amount)
            .bind(payment.id)
            .bind(&input.description)
            .bind(identity.invoice_date)
            .execute(&mut *tx)
            .await?;
            let id = store.persisted_id(&mut tx, &identity).await?;
            insert_lines(&mut tx, id, &input.medicine_lists).await?;
            Ok::<_, AppError>(id)
        }
        .await;

        let id = match written {
            Ok(id) => id,
            Err(err) => return Err(abort(tx, &store, &self.db, &identity, err).await),
        };
        tx.commit().await?;
        tracing::info!("invoice {} created by {}", input.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Create, store.kind(), &actor.name, id, &input);
        self.finish(id, input.number, trail).await
    }

    /// Both the invoice and the receipt are rendered after commit
    async fn finish(&self, id: i32, number: i32, trail: AuditTrail) -> AppResult<DocumentOutcome> {
        let mut outcome = DocumentOutcome::new(id, number);
        outcome.logs = trail.flush(&self.audit).await;
        let detail = self.detail(id).await?;
        outcome.pdf_url =
            Some(publish(&self.db, &self.renderer, id, &render_payload(&detail)).await?);
        outcome.receipt_pdf_url =
            Some(publish(&self.db, &self.renderer, id, &receipt_payload(&detail)).await?);
        Ok(outcome)
    }

    pub async fn get_summary(&self, id: i32) -> AppResult<SalesInvoiceSummary> {
        sqlx::query_as::<_, SalesInvoiceSummary>(&format!(
            "{} WHERE h.id = $1 AND h.deleted_at IS NULL",
            SUMMARY_SELECT
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("invoice id {}", id)))
    }

    pub async fn detail(&self, id: i32) -> AppResult<SalesInvoiceDetail> {
        let header = self.get_summary(id).await?;
        let lines = sqlx::query_as::<_, SalesInvoiceLine>(
            r#"
            SELECT l.id, l.medicine_id, m.barcode AS medicine_barcode, m.name AS medicine_name,
                   l.qty, un.name AS unit_name, l.price, l.discount, l.subtotal
            FROM sales_medicine_items l
            JOIN medicines m ON m.id = l.medicine_id
            JOIN units un ON un.id = l.unit_id
            WHERE l.sales_invoice_id = $1
            ORDER BY l.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        Ok(SalesInvoiceDetail { header, lines })
    }

    pub async fn list(
        &self,
        filter: &ListFilter,
        window: &DateWindow,
    ) -> AppResult<Vec<SalesInvoiceSummary>> {
        let query = ListQuery {
            select: SUMMARY_SELECT,
            date_column: "invoice_date",
        };
        query
            .run(&self.db, window, filter, |filter| match filter {
                ListFilter::Customer(name) => Some(Condition::text("c.name = $3", name)),
                ListFilter::PaymentMethod(name) => Some(Condition::text("pm.name = $3", name)),
                _ => None,
            })
            .await
    }

    pub async fn next_number(&self) -> AppResult<NextNumber> {
        Ok(NextNumber::after(live_count(&self.db, "sales_invoices").await?))
    }

    pub async fn modify(
        &self,
        input: ModifySalesInvoiceInput,
        actor: &AuthUser,
    ) -> AppResult<DocumentOutcome> {
        let data = &input.new_data;
        let identity = data.check()?;
        let before = self.detail(input.id).await?;
        let store = SalesInvoiceStore;

        let mut tx = self.db.begin().await?;
        CatalogService::get_by_id(&mut tx, CatalogKind::Customer, data.customer_id).await?;
        if let Some(other) = store.find_identity(&mut tx, &identity).await? {
            if other != input.id {
                return Err(AppError::DuplicateDocument(format!("invoice {:?}", identity)));
            }
        }
        let payment = CatalogService::get_or_create(
            &mut tx,
            CatalogKind::PaymentMethod,
            &data.payment_method_name,
        )
        .await?;

        store.hard_delete_lines(&mut tx, input.id).await?;
        sqlx::query(
            r#"
            UPDATE sales_invoices SET
                number = $1, customer_id = $2, subtotal = $3, discount_percentage = $4,
                discount_amount = $5, tax_percentage = $6, tax_amount = $7, total_price = $8,
                paid_amount = $9, change_amount = $10, payment_method_id = $11,
                description = $12, invoice_date = $13,
                last_modified = NOW(), last_modified_by_user_id = $14
            WHERE id = $15 AND deleted_at IS NULL
            "#,
        )
        .bind(data.number)
        .bind(data.customer_id)
        .bind(data.subtotal)
        .bind(data.discount_percentage)
        .bind(data.discount_amount)
        .bind(data.tax_percentage)
        .bind(data.tax_amount)
        .bind(data.total_price)
        .bind(data.paid_amount)
        .bind(data.change_amount)
        .bind(payment.id)
        .bind(&data.description)
        .bind(identity.invoice_date)
        .bind(actor.id)
        .bind(input.id)
        .execute(&mut *tx)
        .await?;
        insert_lines(&mut tx, input.id, &data.medicine_lists).await?;
        tx.commit().await?;
        tracing::info!("invoice {} modified by {}", before.header.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Modify, store.kind(), &actor.name, input.id, &before);
        self.finish(input.id, data.number, trail).await
    }

    pub async fn delete(&self, id: i32, actor: &AuthUser) -> AppResult<Vec<String>> {
        let before = self.detail(id).await?;
        let store = SalesInvoiceStore;

        let mut tx = self.db.begin().await?;
        store.hard_delete_lines(&mut tx, id).await?;
        soft_delete(&mut tx, store.table(), id, actor.id).await?;
        tx.commit().await?;
        tracing::info!("invoice {} deleted by {}", before.header.number, actor.name);

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
        let bytes = artifact_bytes(&self.renderer, ArtifactKind::Invoice, &name).await?;
        Ok((name, bytes))
    }

    pub async fn print_receipt(&self, id: i32) -> AppResult<(String, Vec<u8>)> {
        let detail = self.detail(id).await?;
        let name = if detail.header.receipt_pdf_url.is_empty() {
            publish(&self.db, &self.renderer, id, &receipt_payload(&detail)).await?
        } else {
            detail.header.receipt_pdf_url.clone()
        };
        let bytes = artifact_bytes(&self.renderer, ArtifactKind::Receipt, &name).await?;
        Ok((name, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{MedicineStock, MedicineUnits};

    fn detail() -> SalesInvoiceDetail {
        let now = Local::now();
        SalesInvoiceDetail {
            header: SalesInvoiceSummary {
                id: 1,
                number: 5,
                customer_id: 1,
                customer_name: "UMUM".to_string(),
                subtotal: Decimal::from(20000),
                discount_percentage: Decimal::ZERO,
                discount_amount: Decimal::ZERO,
                tax_percentage: Decimal::ZERO,
                tax_amount: Decimal::ZERO,
                total_price: Decimal::from(20000),
                paid_amount: Decimal::from(50000),
                change_amount: Decimal::from(30000),
                payment_method_name: "CASH".to_string(),
                description: String::new(),
                user_name: "kasir".to_string(),
                invoice_date: now,
                last_modified: now,
                pdf_url: String::new(),
                receipt_pdf_url: String::new(),
            },
            lines: vec![SalesInvoiceLine {
                id: 1,
                medicine_id: 7,
                medicine_barcode: "899001".to_string(),
                medicine_name: "PARACETAMOL-500".to_string(),
                qty: Decimal::from(2),
                unit_name: "STRIP".to_string(),
                price: Decimal::from(10000),
                discount: Decimal::ZERO,
                subtotal: Decimal::from(20000),
            }],
        }
    }

    #[test]
    fn test_invoice_and_receipt_target_their_own_kinds() {
        let d = detail();
        assert_eq!(render_payload(&d).kind, ArtifactKind::Invoice);
        let receipt = receipt_payload(&d);
        assert_eq!(receipt.kind, ArtifactKind::Receipt);
        assert!(receipt.totals.iter().any(|(label, v)| label == "CASH" && v == "50000"));
    }

    fn amoxicillin(qty: i64) -> MedicineStock {
        MedicineStock {
            id: 9,
            name: "AMOXICILLIN-500".to_string(),
            qty: Decimal::from(qty),
            units: MedicineUnits::single(CAP).with_second(STRIP, Decimal::from(10)),
        }
    }

    const CAP: i32 = 1;
    const STRIP: i32 = 2;

    fn sold(unit_id: i32, qty: i64) -> StockRequirement {
        StockRequirement {
            medicine_id: 9,
            unit_id,
            qty: Decimal::from(qty),
        }
    }

    #[test]
    fn test_sale_beyond_balance_is_refused() {
        let err = StockEngine::refuse_shortfall(&[amoxicillin(4)], &[sold(CAP, 500)]).unwrap_err();
        match err {
            AppError::InsufficientStock {
                medicine,
                needed,
                available,
            } => {
                assert_eq!(medicine, "AMOXICILLIN-500");
                assert_eq!(needed, Decimal::from(500));
                assert_eq!(available, Decimal::from(4));
            }
            other => panic!("expected InsufficientStock, got {:?}", other),
        }
    }

    #[test]
    fn test_sale_lines_of_one_medicine_are_summed() {
        // 1 STRIP and 5 CAP is 15 CAP against 14 on hand
        let lines = [sold(STRIP, 1), sold(CAP, 5)];
        assert!(StockEngine::refuse_shortfall(&[amoxicillin(15)], &lines).is_ok());
        assert!(matches!(
            StockEngine::refuse_shortfall(&[amoxicillin(14)], &lines),
            Err(AppError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn test_legacy_discount_field_maps_to_amount() {
        let body = serde_json::json!({
            "number": 5,
            "customerId": 1,
            "subtotal": 1000,
            "discount": 100,
            "totalPrice": 900,
            "paidAmount": 1000,
            "paymentMethodName": "CASH",
            "invoiceDate": "2024-03-01",
            "medicineLists": []
        });
        let input: SalesInvoiceInput = serde_json::from_value(body).unwrap();
        assert_eq!(input.discount_amount, Decimal::from(100));
    }
}
