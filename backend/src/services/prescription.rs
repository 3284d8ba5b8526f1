//! Prescriptions: compounded set items dispensed from stock, each with an
//! optional e-ticket label
//!
//! Numbers are unique per calendar day of the prescription date, taken in
//! the client's offset. Stock is checked for every line of the document
//! before anything is subtracted.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    parse_positive_quantity, validate_document_number, validate_eticket_size,
    validate_line_totals, ArtifactKind, AuditAction, DateWindow, DocumentDate, DocumentKind,
    ListFilter, NextNumber, StockRequirement,
};
use sqlx::{FromRow, PgConnection, PgPool};
use validator::Validate;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{AppError, AppResult};
use crate::services::audit::{AuditLog, AuditTrail};
use crate::services::auth::AuthUser;
use crate::services::catalog::{CatalogKind, CatalogService};
use crate::services::document::{
    abort, artifact_bytes, document_timestamp, publish, soft_delete, Condition, DocumentOutcome,
    DocumentStore, ListQuery,
};
use crate::services::renderer::{DocumentRenderer, PageSize, RenderPayload};
use crate::services::sales_invoice::{SalesInvoiceIdentity, SalesInvoiceStore};
use crate::services::stock::{StockEngine, StockLine};
use crate::services::unit::UnitCatalog;

pub const ZIP_FILE_NAME: &str = "pdfFiles.zip";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceReference {
    pub number: i32,
    pub customer_name: String,
    pub invoice_date: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionInput {
    pub invoice: InvoiceReference,
    pub number: i32,
    #[validate(length(min = 1))]
    pub prescription_date: String,
    #[validate(length(min = 1))]
    pub patient_name: String,
    #[serde(default)]
    pub patient_age: i32,
    #[validate(length(min = 1))]
    pub doctor_name: String,
    #[serde(default)]
    pub qty: Decimal,
    #[serde(default)]
    pub price: Decimal,
    pub total_price: Decimal,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1))]
    pub set_items: Vec<SetItemInput>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetItemInput {
    pub medicine_lists: Vec<PrescriptionLineInput>,
    #[serde(default)]
    pub mf: String,
    #[serde(default)]
    pub dose: String,
    #[serde(default)]
    pub set_unit: String,
    #[serde(default)]
    pub consume_time: String,
    #[serde(default)]
    pub det: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub must_finish: bool,
    #[serde(default)]
    pub print_eticket: bool,
    #[serde(default)]
    pub eticket: EticketInput,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EticketInput {
    #[serde(default)]
    pub number: i32,
    #[serde(default)]
    pub medicine_qty: Decimal,
    #[serde(default = "default_eticket_size")]
    pub size: String,
}

impl Default for EticketInput {
    fn default() -> Self {
        Self {
            number: 0,
            medicine_qty: Decimal::ZERO,
            size: default_eticket_size(),
        }
    }
}

fn default_eticket_size() -> String {
    "7x4".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionLineInput {
    pub medicine_barcode: String,
    pub medicine_name: String,
    /// Plain number or fraction, e.g. `1/2`
    pub qty: String,
    pub unit: String,
    pub price: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyPrescriptionInput {
    pub id: i32,
    pub new_data: PrescriptionInput,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionSummary {
    pub id: i32,
    pub invoice_id: i32,
    pub invoice_number: i32,
    pub customer_name: String,
    pub number: i32,
    pub prescription_date: DateTime<Local>,
    pub patient_name: String,
    pub doctor_name: String,
    pub qty: Decimal,
    pub price: Decimal,
    pub total_price: Decimal,
    pub description: String,
    pub user_name: String,
    pub last_modified: DateTime<Local>,
    pub pdf_url: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SetItemRow {
    pub id: i32,
    pub mf: String,
    pub dose: String,
    pub set_unit: String,
    pub consume_time: String,
    pub det: String,
    pub usage: String,
    pub must_finish: bool,
    pub print_eticket: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionLine {
    pub id: i32,
    #[serde(skip)]
    pub prescription_set_item_id: i32,
    pub medicine_id: i32,
    pub medicine_barcode: String,
    pub medicine_name: String,
    pub qty_text: String,
    pub qty: Decimal,
    pub unit_name: String,
    pub price: Decimal,
    pub discount: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EticketRow {
    pub id: i32,
    #[serde(skip)]
    pub prescription_set_item_id: i32,
    pub number: i32,
    pub medicine_qty: Decimal,
    pub size: String,
    pub pdf_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetItemDetail {
    #[serde(flatten)]
    pub item: SetItemRow,
    pub medicine_lists: Vec<PrescriptionLine>,
    pub eticket: Option<EticketRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionDetail {
    #[serde(flatten)]
    pub header: PrescriptionSummary,
    pub set_items: Vec<SetItemDetail>,
}

const SUMMARY_SELECT: &str = r#"
    SELECT h.id, h.invoice_id, i.number AS invoice_number, c.name AS customer_name, h.number,
           h.prescription_date, p.name AS patient_name, d.name AS doctor_name, h.qty, h.price,
           h.total_price, h.description, u.name AS user_name, h.last_modified, h.pdf_url
    FROM prescriptions h
    JOIN sales_invoices i ON i.id = h.invoice_id
    JOIN customers c ON c.id = i.customer_id
    JOIN patients p ON p.id = h.patient_id
    JOIN doctors d ON d.id = h.doctor_id
    JOIN users u ON u.id = h.user_id
"#;

/// `(number, calendar day)`
#[derive(Debug, Clone, PartialEq)]
pub struct PrescriptionIdentity {
    pub number: i32,
    pub day: NaiveDate,
}

pub struct PrescriptionStore;

#[axum::async_trait]
impl DocumentStore for PrescriptionStore {
    type Identity = PrescriptionIdentity;

    fn kind(&self) -> DocumentKind {
        DocumentKind::Prescription
    }

    fn table(&self) -> &'static str {
        "prescriptions"
    }

    async fn find_identity(
        &self,
        conn: &mut PgConnection,
        identity: &PrescriptionIdentity,
    ) -> AppResult<Option<i32>> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT id FROM prescriptions
            WHERE number = $1 AND prescription_day = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(identity.number)
        .bind(identity.day)
        .fetch_optional(conn)
        .await?;
        Ok(id)
    }

    async fn hard_delete_lines(&self, conn: &mut PgConnection, id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM etickets WHERE prescription_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query(
            r#"
            DELETE FROM prescription_medicine_items
            WHERE prescription_set_item_id IN
                (SELECT id FROM prescription_set_items WHERE prescription_id = $1)
            "#,
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;
        sqlx::query("DELETE FROM prescription_set_items WHERE prescription_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// Validated input: parsed dates and per-line quantities
struct Checked {
    identity: PrescriptionIdentity,
    prescription_date: DateTime<FixedOffset>,
    invoice_date: DateTime<FixedOffset>,
    /// `qtys[set][line]`
    qtys: Vec<Vec<Decimal>>,
}

impl PrescriptionInput {
    fn check(&self) -> AppResult<Checked> {
        self.validate()?;
        validate_document_number(self.number).map_err(|m| AppError::validation("number", m))?;

        let mut subtotals = Vec::new();
        let mut qtys = Vec::with_capacity(self.set_items.len());
        for set in &self.set_items {
            if set.medicine_lists.is_empty() {
                return Err(AppError::validation("medicineLists", "set item has no medicine"));
            }
            if set.print_eticket {
                validate_eticket_size(&set.eticket.size)
                    .map_err(|m| AppError::validation("eticket.size", m))?;
            }
            let mut set_qtys = Vec::with_capacity(set.medicine_lists.len());
            for line in &set.medicine_lists {
                set_qtys.push(parse_positive_quantity(&line.qty)?);
                subtotals.push(line.subtotal);
            }
            qtys.push(set_qtys);
        }
        validate_line_totals(&subtotals, self.total_price)
            .map_err(|m| AppError::validation("totalPrice", m))?;

        let date = DocumentDate::parse(&self.prescription_date)?;
        Ok(Checked {
            identity: PrescriptionIdentity {
                number: self.number,
                day: date.date,
            },
            prescription_date: date.start()?,
            invoice_date: document_timestamp(&self.invoice.invoice_date)?,
            qtys,
        })
    }
}

/// A line bound to its medicine and unit rows
struct ResolvedLine {
    medicine_id: i32,
    unit_id: i32,
    qty: Decimal,
}

/// Sales invoice the prescription belongs to
async fn resolve_invoice(
    conn: &mut PgConnection,
    reference: &InvoiceReference,
    invoice_date: DateTime<FixedOffset>,
) -> AppResult<i32> {
    let name = &reference.customer_name;
    let customer = CatalogService::get_by_name(&mut *conn, CatalogKind::Customer, name)
        .await?
        .ok_or_else(|| AppError::ReferenceNotFound(format!("customer {}", name)))?;
    let identity = SalesInvoiceIdentity {
        number: reference.number,
        customer_id: customer.id,
        invoice_date,
    };
    SalesInvoiceStore
        .find_identity(&mut *conn, &identity)
        .await?
        .ok_or_else(|| AppError::ReferenceNotFound(format!("invoice number {}", reference.number)))
}

/// Bind every line to medicine and unit ids, in declared order
async fn resolve_lines(
    conn: &mut PgConnection,
    input: &PrescriptionInput,
    checked: &Checked,
) -> AppResult<Vec<Vec<ResolvedLine>>> {
    let mut sets = Vec::with_capacity(input.set_items.len());
    for (set, qtys) in input.set_items.iter().zip(&checked.qtys) {
        let mut lines = Vec::with_capacity(set.medicine_lists.len());
        for (line, qty) in set.medicine_lists.iter().zip(qtys) {
            let unit = UnitCatalog::get_or_create(&mut *conn, &line.unit).await?;
            let medicine = StockEngine::lock_by_barcode(
                &mut *conn,
                &line.medicine_barcode,
                &line.medicine_name,
            )
            .await?;
            medicine.to_first_unit(unit.id, *qty)?;
            lines.push(ResolvedLine {
                medicine_id: medicine.id,
                unit_id: unit.id,
                qty: *qty,
            });
        }
        sets.push(lines);
    }
    Ok(sets)
}

fn requirements(resolved: &[Vec<ResolvedLine>]) -> Vec<StockRequirement> {
    resolved
        .iter()
        .flatten()
        .map(|l| StockRequirement {
            medicine_id: l.medicine_id,
            unit_id: l.unit_id,
            qty: l.qty,
        })
        .collect()
}

/// Insert set items, lines and e-tickets of `prescription_id`, taking every
/// line out of stock
async fn dispense(
    conn: &mut PgConnection,
    prescription_id: i32,
    input: &PrescriptionInput,
    resolved: &[Vec<ResolvedLine>],
    actor_id: i32,
) -> AppResult<()> {
    for (set, lines) in input.set_items.iter().zip(resolved) {
        let mf = CatalogService::get_or_create(&mut *conn, CatalogKind::Mf, &set.mf).await?;
        let dose = CatalogService::get_or_create(&mut *conn, CatalogKind::Dose, &set.dose).await?;
        let set_unit = UnitCatalog::get_or_create(&mut *conn, &set.set_unit).await?;
        let consume_time =
            CatalogService::get_or_create(&mut *conn, CatalogKind::ConsumeTime, &set.consume_time)
                .await?;
        let det = CatalogService::get_or_create(&mut *conn, CatalogKind::Det, &set.det).await?;
        let usage =
            CatalogService::get_or_create(&mut *conn, CatalogKind::Usage, &set.usage).await?;

        let set_id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO prescription_set_items (
                prescription_id, mf_id, dose_id, set_unit_id, consume_time_id, det_id,
                usage_id, must_finish, print_eticket
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(prescription_id)
        .bind(mf.id)
        .bind(dose.id)
        .bind(set_unit.id)
        .bind(consume_time.id)
        .bind(det.id)
        .bind(usage.id)
        .bind(set.must_finish)
        .bind(set.print_eticket)
        .fetch_one(&mut *conn)
        .await?;

        for (line, res) in set.medicine_lists.iter().zip(lines) {
            sqlx::query(
                r#"
                INSERT INTO prescription_medicine_items (
                    prescription_set_item_id, medicine_id, qty_text, qty, unit_id,
                    price, discount, subtotal
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(set_id)
            .bind(res.medicine_id)
            .bind(line.qty.trim())
            .bind(res.qty)
            .bind(res.unit_id)
            .bind(line.price)
            .bind(line.discount)
            .bind(line.subtotal)
            .execute(&mut *conn)
            .await?;
            StockEngine::subtract(&mut *conn, res.medicine_id, res.unit_id, res.qty, actor_id)
                .await?;
        }

        if set.print_eticket {
            sqlx::query(
                r#"
                INSERT INTO etickets
                    (prescription_id, prescription_set_item_id, number, medicine_qty, size)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(prescription_id)
            .bind(set_id)
            .bind(set.eticket.number)
            .bind(set.eticket.medicine_qty)
            .bind(&set.eticket.size)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

async fn stock_lines(conn: &mut PgConnection, prescription_id: i32) -> AppResult<Vec<StockLine>> {
    let lines = sqlx::query_as::<_, StockLine>(
        r#"
        SELECT l.medicine_id, l.unit_id, l.qty
        FROM prescription_medicine_items l
        JOIN prescription_set_items s ON s.id = l.prescription_set_item_id
        WHERE s.prescription_id = $1
        ORDER BY l.id
        "#,
    )
    .bind(prescription_id)
    .fetch_all(conn)
    .await?;
    Ok(lines)
}

/// Put stored lines back into stock
async fn restore_lines(
    conn: &mut PgConnection,
    lines: &[StockLine],
    actor_id: i32,
) -> AppResult<()> {
    for line in lines {
        StockEngine::add(&mut *conn, line.medicine_id, line.unit_id, line.qty, actor_id).await?;
    }
    Ok(())
}

pub fn render_payload(detail: &PrescriptionDetail) -> RenderPayload {
    let h = &detail.header;
    let mut payload = RenderPayload::document(ArtifactKind::Prescription, "Prescription")
        .field("Number", h.number)
        .field("Date", h.prescription_date.format("%Y-%m-%d"))
        .field("Invoice", h.invoice_number)
        .field("Patient", &h.patient_name)
        .field("Doctor", &h.doctor_name);
    for (i, set) in detail.set_items.iter().enumerate() {
        payload = payload.line(format!(
            "R/{} {} {} {} - {} {}",
            i + 1,
            set.item.mf,
            set.item.set_unit,
            set.item.dose,
            set.item.usage,
            set.item.consume_time
        ));
        for line in &set.medicine_lists {
            payload = payload.line(format!(
                "    {} {} {} = {}",
                line.medicine_name, line.qty_text, line.unit_name, line.subtotal
            ));
        }
    }
    payload.total("Total", h.total_price)
}

/// Label of one set item
pub fn eticket_payload(
    header: &PrescriptionSummary,
    set: &SetItemRow,
    eticket: &EticketRow,
) -> AppResult<RenderPayload> {
    let title = format!("No. {}", eticket.number);
    let mut payload = RenderPayload::document(ArtifactKind::Eticket, title)
        .field("Date", header.prescription_date.format("%d-%m-%Y"))
        .field("Patient", &header.patient_name)
        .line(format!("{} {}", set.dose, set.set_unit))
        .line(&set.usage)
        .line(&set.consume_time)
        .line(format!("Qty: {}", eticket.medicine_qty));
    if set.must_finish {
        payload = payload.line("MUST BE FINISHED");
    }
    payload.page = PageSize::for_eticket(&eticket.size)?;
    payload.with_company_header = false;
    Ok(payload)
}

#[derive(Clone)]
pub struct PrescriptionService {
    db: PgPool,
    audit: AuditLog,
    renderer: Arc<dyn DocumentRenderer>,
}

impl PrescriptionService {
    pub fn new(db: PgPool, audit: AuditLog, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self {
            db,
            audit,
            renderer,
        }
    }

    pub async fn create(
        &self,
        input: PrescriptionInput,
        actor: &AuthUser,
    ) -> AppResult<DocumentOutcome> {
        let checked = input.check()?;
        let identity = checked.identity.clone();
        let store = PrescriptionStore;

        let mut tx = self.db.begin().await?;
        let invoice_id = resolve_invoice(&mut tx, &input.invoice, checked.invoice_date).await?;
        store.ensure_absent(&mut tx, &identity).await?;
        let resolved = resolve_lines(&mut tx, &input, &checked).await?;
        StockEngine::preflight(&mut tx, &requirements(&resolved)).await?;

        let written = async {
            let patient =
                CatalogService::get_or_create(&mut tx, CatalogKind::Patient, &input.patient_name)
                    .await?;
            let doctor =
                CatalogService::get_or_create(&mut tx, CatalogKind::Doctor, &input.doctor_name)
                    .await?;
            sqlx::query(
                r#"
                INSERT INTO prescriptions (
                    invoice_id, number, prescription_date, prescription_day, patient_id,
                    doctor_id, qty, price, total_price, description, user_id,
                    last_modified_by_user_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
                "#,
            )
            .bind(invoice_id)
            .bind(input.number)
            .bind(checked.prescription_date)
            .bind(identity.day)
            .bind(patient.id)
            .bind(doctor.id)
            .bind(input.qty)
            .bind(input.price)
            .bind(input.total_price)
            .bind(&input.description)
            .bind(actor.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| duplicate_number(e, &identity))?;
            let id = store.persisted_id(&mut tx, &identity).await?;
            dispense(&mut tx, id, &input, &resolved, actor.id).await?;
            Ok::<_, AppError>(id)
        }
        .await;

        let id = match written {
            Ok(id) => id,
            Err(err) => return Err(abort(tx, &store, &self.db, &identity, err).await),
        };
        tx.commit().await?;
        tracing::info!(
            "prescription {} ({}) created by {}",
            input.number,
            identity.day,
            actor.name
        );

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Create, store.kind(), &actor.name, id, &input);
        self.finish(id, input.number, trail).await
    }

    /// Audit flush, then the prescription and its e-tickets are rendered
    async fn finish(&self, id: i32, number: i32, trail: AuditTrail) -> AppResult<DocumentOutcome> {
        let mut outcome = DocumentOutcome::new(id, number);
        outcome.logs = trail.flush(&self.audit).await;
        let detail = self.detail(id).await?;
        outcome.pdf_url =
            Some(publish(&self.db, &self.renderer, id, &render_payload(&detail)).await?);
        for set in &detail.set_items {
            if let Some(eticket) = &set.eticket {
                let payload = eticket_payload(&detail.header, &set.item, eticket)?;
                let name = publish(&self.db, &self.renderer, eticket.id, &payload).await?;
                outcome.eticket_pdf_urls.push(name);
            }
        }
        Ok(outcome)
    }

    pub async fn get_summary(&self, id: i32) -> AppResult<PrescriptionSummary> {
        sqlx::query_as::<_, PrescriptionSummary>(&format!(
            "{} WHERE h.id = $1 AND h.deleted_at IS NULL",
            SUMMARY_SELECT
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("prescription id {}", id)))
    }

    pub async fn detail(&self, id: i32) -> AppResult<PrescriptionDetail> {
        let header = self.get_summary(id).await?;
        let items = sqlx::query_as::<_, SetItemRow>(
            r#"
            SELECT s.id, mf.name AS mf, dose.name AS dose, un.name AS set_unit,
                   ct.name AS consume_time, det.name AS det, us.name AS usage,
                   s.must_finish, s.print_eticket
            FROM prescription_set_items s
            JOIN mfs mf ON mf.id = s.mf_id
            JOIN doses dose ON dose.id = s.dose_id
            JOIN units un ON un.id = s.set_unit_id
            JOIN consume_times ct ON ct.id = s.consume_time_id
            JOIN dets det ON det.id = s.det_id
            JOIN prescription_set_usages us ON us.id = s.usage_id
            WHERE s.prescription_id = $1
            ORDER BY s.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        let lines = sqlx::query_as::<_, PrescriptionLine>(
            r#"
            SELECT l.id, l.prescription_set_item_id, l.medicine_id, m.barcode AS medicine_barcode,
                   m.name AS medicine_name, l.qty_text, l.qty, un.name AS unit_name, l.price,
                   l.discount, l.subtotal
            FROM prescription_medicine_items l
            JOIN prescription_set_items s ON s.id = l.prescription_set_item_id
            JOIN medicines m ON m.id = l.medicine_id
            JOIN units un ON un.id = l.unit_id
            WHERE s.prescription_id = $1
            ORDER BY l.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        let etickets = sqlx::query_as::<_, EticketRow>(
            r#"
            SELECT id, prescription_set_item_id, number, medicine_qty, size, pdf_url
            FROM etickets WHERE prescription_id = $1 ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        Ok(PrescriptionDetail {
            header,
            set_items: assemble(items, lines, etickets),
        })
    }

    pub async fn list(
        &self,
        filter: &ListFilter,
        window: &DateWindow,
    ) -> AppResult<Vec<PrescriptionSummary>> {
        let query = ListQuery {
            select: SUMMARY_SELECT,
            date_column: "prescription_date",
        };
        query
            .run(&self.db, window, filter, |filter| match filter {
                ListFilter::Patient(name) => Some(Condition::text("p.name = $3", name)),
                ListFilter::Doctor(name) => Some(Condition::text("d.name = $3", name)),
                ListFilter::InvoiceId(id) => Some(Condition::int("h.invoice_id = $3", *id)),
                ListFilter::Customer(name) => Some(Condition::text("c.name = $3", name)),
                _ => None,
            })
            .await
    }

    /// Prescriptions restart their numbering every day
    pub async fn next_number(&self) -> AppResult<NextNumber> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM prescriptions \
             WHERE deleted_at IS NULL AND prescription_day = CURRENT_DATE",
        )
        .fetch_one(&self.db)
        .await?;
        Ok(NextNumber::after(count))
    }

    /// Put the stored lines back, then dispense the new ones in the same
    /// transaction
    pub async fn modify(
        &self,
        input: ModifyPrescriptionInput,
        actor: &AuthUser,
    ) -> AppResult<DocumentOutcome> {
        let data = &input.new_data;
        let checked = data.check()?;
        let identity = checked.identity.clone();
        let before = self.detail(input.id).await?;
        let store = PrescriptionStore;

        let mut tx = self.db.begin().await?;
        let invoice_id = resolve_invoice(&mut tx, &data.invoice, checked.invoice_date).await?;
        if let Some(other) = store.find_identity(&mut tx, &identity).await? {
            if other != input.id {
                return Err(AppError::DuplicateDocument(format!("prescription {:?}", identity)));
            }
        }

        let old_lines = stock_lines(&mut tx, input.id).await?;
        let resolved = resolve_lines(&mut tx, data, &checked).await?;
        let mut needed = requirements(&resolved);
        needed.extend(old_lines.iter().map(StockLine::inflow));
        StockEngine::preflight(&mut tx, &needed).await?;

        restore_lines(&mut tx, &old_lines, actor.id).await?;
        store.hard_delete_lines(&mut tx, input.id).await?;
        let patient =
            CatalogService::get_or_create(&mut tx, CatalogKind::Patient, &data.patient_name)
                .await?;
        let doctor =
            CatalogService::get_or_create(&mut tx, CatalogKind::Doctor, &data.doctor_name).await?;
        sqlx::query(
            r#"
            UPDATE prescriptions SET
                invoice_id = $1, number = $2, prescription_date = $3, prescription_day = $4,
                patient_id = $5, doctor_id = $6, qty = $7, price = $8, total_price = $9,
                description = $10, last_modified = NOW(), last_modified_by_user_id = $11
            WHERE id = $12 AND deleted_at IS NULL
            "#,
        )
        .bind(invoice_id)
        .bind(data.number)
        .bind(checked.prescription_date)
        .bind(identity.day)
        .bind(patient.id)
        .bind(doctor.id)
        .bind(data.qty)
        .bind(data.price)
        .bind(data.total_price)
        .bind(&data.description)
        .bind(actor.id)
        .bind(input.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_number(e, &identity))?;
        dispense(&mut tx, input.id, data, &resolved, actor.id).await?;
        tx.commit().await?;
        tracing::info!("prescription {} modified by {}", before.header.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Modify, store.kind(), &actor.name, input.id, &before);
        self.finish(input.id, data.number, trail).await
    }

    pub async fn delete(&self, id: i32, actor: &AuthUser) -> AppResult<Vec<String>> {
        let before = self.detail(id).await?;
        let store = PrescriptionStore;

        let mut tx = self.db.begin().await?;
        let old_lines = stock_lines(&mut tx, id).await?;
        restore_lines(&mut tx, &old_lines, actor.id).await?;
        store.hard_delete_lines(&mut tx, id).await?;
        soft_delete(&mut tx, store.table(), id, actor.id).await?;
        tx.commit().await?;
        tracing::info!("prescription {} deleted by {}", before.header.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Delete, store.kind(), &actor.name, id, &before);
        Ok(trail.flush(&self.audit).await)
    }

    /// ZIP of the prescription PDF and one PDF per e-ticket; missing
    /// artifacts are rendered first
    pub async fn print(&self, id: i32) -> AppResult<Vec<u8>> {
        let detail = self.detail(id).await?;
        let mut files = Vec::new();

        let name = if detail.header.pdf_url.is_empty() {
            publish(&self.db, &self.renderer, id, &render_payload(&detail)).await?
        } else {
            detail.header.pdf_url.clone()
        };
        let bytes = artifact_bytes(&self.renderer, ArtifactKind::Prescription, &name).await?;
        files.push((name, bytes));

        for set in &detail.set_items {
            let Some(eticket) = &set.eticket else { continue };
            let name = if eticket.pdf_url.is_empty() {
                let payload = eticket_payload(&detail.header, &set.item, eticket)?;
                publish(&self.db, &self.renderer, eticket.id, &payload).await?
            } else {
                eticket.pdf_url.clone()
            };
            let bytes = artifact_bytes(&self.renderer, ArtifactKind::Eticket, &name).await?;
            files.push((name, bytes));
        }

        zip_files(&files)
    }
}

/// Group lines and e-tickets under their set items
fn assemble(
    items: Vec<SetItemRow>,
    lines: Vec<PrescriptionLine>,
    etickets: Vec<EticketRow>,
) -> Vec<SetItemDetail> {
    let mut lines_by_set: HashMap<i32, Vec<PrescriptionLine>> = HashMap::new();
    for line in lines {
        lines_by_set.entry(line.prescription_set_item_id).or_default().push(line);
    }
    let mut eticket_by_set: HashMap<i32, EticketRow> = etickets
        .into_iter()
        .map(|e| (e.prescription_set_item_id, e))
        .collect();

    items
        .into_iter()
        .map(|item| SetItemDetail {
            medicine_lists: lines_by_set.remove(&item.id).unwrap_or_default(),
            eticket: eticket_by_set.remove(&item.id),
            item,
        })
        .collect()
}

pub fn zip_files(files: &[(String, Vec<u8>)]) -> AppResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in files {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| AppError::Storage(format!("zip entry {}: {}", name, e)))?;
        writer.write_all(bytes)?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| AppError::Storage(format!("zip finalize: {}", e)))?;
    Ok(cursor.into_inner())
}

/// The per-day unique index backs up the identity check under concurrency
fn duplicate_number(e: sqlx::Error, identity: &PrescriptionIdentity) -> AppError {
    let err = AppError::from(e);
    if err.is_unique_violation() {
        AppError::DuplicateDocument(format!("prescription {} on {}", identity.number, identity.day))
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn line(qty: &str, subtotal: &str) -> PrescriptionLineInput {
        PrescriptionLineInput {
            medicine_barcode: "AMX500".to_string(),
            medicine_name: "AMOX500".to_string(),
            qty: qty.to_string(),
            unit: "CAP".to_string(),
            price: dec("1000"),
            discount: Decimal::ZERO,
            subtotal: dec(subtotal),
        }
    }

    fn input(date: &str, lines: Vec<PrescriptionLineInput>, total: &str) -> PrescriptionInput {
        PrescriptionInput {
            invoice: InvoiceReference {
                number: 1,
                customer_name: "UMUM".to_string(),
                invoice_date: "2024-03-01 +0700WIB".to_string(),
            },
            number: 42,
            prescription_date: date.to_string(),
            patient_name: "BUDI".to_string(),
            patient_age: 30,
            doctor_name: "DR. SITI".to_string(),
            qty: Decimal::ONE,
            price: dec(total),
            total_price: dec(total),
            description: String::new(),
            set_items: vec![SetItemInput {
                medicine_lists: lines,
                mf: "MF PULV".to_string(),
                dose: "3 DD 1".to_string(),
                set_unit: "PULV".to_string(),
                consume_time: "AFTER MEAL".to_string(),
                det: "DTD".to_string(),
                usage: "ORAL".to_string(),
                must_finish: true,
                print_eticket: true,
                eticket: EticketInput::default(),
            }],
        }
    }

    #[test]
    fn test_fraction_qty_is_parsed_per_line() {
        let p = input("2024-03-01 +0700WIB", vec![line("1/2", "500"), line("2", "2000")], "2500");
        let checked = p.check().unwrap();
        assert_eq!(checked.qtys, vec![vec![dec("0.5"), dec("2")]]);
    }

    #[test]
    fn test_identity_is_number_and_day() {
        let a = input("2024-03-01 +0700WIB", vec![line("1", "1000")], "1000").check().unwrap();
        let b = input("2024-03-02 +0700WIB", vec![line("1", "1000")], "1000").check().unwrap();
        assert_eq!(a.identity.number, b.identity.number);
        assert_ne!(a.identity, b.identity);
        assert_eq!(a.identity.day, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn test_subtotals_must_match_total() {
        let p = input("2024-03-01", vec![line("1", "1000"), line("1", "1000")], "2100");
        assert!(matches!(p.check(), Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_zero_qty_is_rejected() {
        let p = input("2024-03-01", vec![line("0", "0")], "0");
        assert!(matches!(p.check(), Err(AppError::Domain(_))));
    }

    #[test]
    fn test_unknown_eticket_size_is_rejected() {
        let mut p = input("2024-03-01", vec![line("1", "1000")], "1000");
        p.set_items[0].eticket.size = "5x5".to_string();
        assert!(p.check().is_err());
    }

    #[test]
    fn test_assemble_groups_lines_and_etickets() {
        let item = |id| SetItemRow {
            id,
            mf: String::new(),
            dose: String::new(),
            set_unit: String::new(),
            consume_time: String::new(),
            det: String::new(),
            usage: String::new(),
            must_finish: false,
            print_eticket: id == 2,
        };
        let pl = |id, set| PrescriptionLine {
            id,
            prescription_set_item_id: set,
            medicine_id: 1,
            medicine_barcode: String::new(),
            medicine_name: String::new(),
            qty_text: "1".to_string(),
            qty: Decimal::ONE,
            unit_name: String::new(),
            price: Decimal::ZERO,
            discount: Decimal::ZERO,
            subtotal: Decimal::ZERO,
        };
        let eticket = EticketRow {
            id: 9,
            prescription_set_item_id: 2,
            number: 1,
            medicine_qty: dec("10"),
            size: "7x5".to_string(),
            pdf_url: String::new(),
        };

        let sets = assemble(
            vec![item(1), item(2)],
            vec![pl(1, 1), pl(2, 2), pl(3, 2)],
            vec![eticket],
        );
        assert_eq!(sets[0].medicine_lists.len(), 1);
        assert!(sets[0].eticket.is_none());
        assert_eq!(sets[1].medicine_lists.len(), 2);
        assert_eq!(sets[1].eticket.as_ref().map(|e| e.id), Some(9));
    }

    #[test]
    fn test_eticket_payload_uses_label_page() {
        let now = Local::now();
        let header = PrescriptionSummary {
            id: 1,
            invoice_id: 1,
            invoice_number: 1,
            customer_name: "UMUM".to_string(),
            number: 42,
            prescription_date: now,
            patient_name: "BUDI".to_string(),
            doctor_name: "DR. SITI".to_string(),
            qty: Decimal::ONE,
            price: Decimal::ZERO,
            total_price: Decimal::ZERO,
            description: String::new(),
            user_name: "apoteker".to_string(),
            last_modified: now,
            pdf_url: String::new(),
        };
        let set = SetItemRow {
            id: 2,
            mf: "MF PULV".to_string(),
            dose: "3 DD 1".to_string(),
            set_unit: "PULV".to_string(),
            consume_time: "AFTER MEAL".to_string(),
            det: "DTD".to_string(),
            usage: "ORAL".to_string(),
            must_finish: true,
            print_eticket: true,
        };
        let eticket = EticketRow {
            id: 9,
            prescription_set_item_id: 2,
            number: 1,
            medicine_qty: dec("10"),
            size: "7x5".to_string(),
            pdf_url: String::new(),
        };
        let payload = eticket_payload(&header, &set, &eticket).unwrap();
        assert_eq!(payload.page, PageSize::Label7x5);
        assert!(!payload.with_company_header);
        assert!(payload.lines.iter().any(|l| l == "MUST BE FINISHED"));
    }

    #[test]
    fn test_zip_contains_every_file() {
        let files = vec![
            ("p-aaaaaaaa-bbbbbbbb.pdf".to_string(), b"%PDF-1.4 one".to_vec()),
            ("e-cccccccc-dddddddd.pdf".to_string(), b"%PDF-1.4 two".to_vec()),
        ];
        let bytes = zip_files(&files).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let names: Vec<&str> = archive.file_names().collect();
        assert!(names.contains(&"e-cccccccc-dddddddd.pdf"));
    }
}
