//! In-house production of compounded medicines
//!
//! Ingredients always leave stock. The produced quantity enters stock only
//! while `updated_to_stock` is set, and every later change reverses exactly
//! what the stored document applied.

use std::sync::Arc;

use chrono::{DateTime, Local};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    validate_amount, validate_document_number, AuditAction, DateWindow, DocumentKind, ListFilter,
    NextNumber, StockRequirement,
};
use sqlx::{FromRow, PgConnection, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::audit::{AuditLog, AuditTrail};
use crate::services::auth::AuthUser;
use crate::services::document::{
    abort, artifact_bytes, document_timestamp, live_count, publish, soft_delete, Condition,
    DocumentOutcome, DocumentStore, ListQuery,
};
use crate::services::renderer::{DocumentRenderer, RenderPayload};
use crate::services::stock::{StockEngine, StockLine};
use crate::services::unit::UnitCatalog;

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductionInput {
    pub number: i32,
    #[validate(length(min = 1))]
    pub produced_medicine_barcode: String,
    #[validate(length(min = 1))]
    pub produced_medicine_name: String,
    pub produced_qty: Decimal,
    #[validate(length(min = 1))]
    pub produced_unit: String,
    #[validate(length(min = 1))]
    pub production_date: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub updated_to_stock: bool,
    #[serde(default)]
    pub updated_to_account: bool,
    pub total_cost: Decimal,
    #[validate(length(min = 1))]
    pub production_medicine_list: Vec<ProductionLineInput>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionLineInput {
    pub medicine_barcode: String,
    pub medicine_name: String,
    pub qty: Decimal,
    pub unit: String,
    #[serde(default)]
    pub cost: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyProductionInput {
    pub id: i32,
    pub new_data: ProductionInput,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductionSummary {
    pub id: i32,
    pub number: i32,
    #[serde(skip)]
    pub produced_medicine_id: i32,
    pub produced_medicine_barcode: String,
    pub produced_medicine_name: String,
    pub produced_qty: Decimal,
    #[serde(skip)]
    pub produced_unit_id: i32,
    pub produced_unit: String,
    pub production_date: DateTime<Local>,
    pub description: String,
    pub updated_to_stock: bool,
    pub updated_to_account: bool,
    pub total_cost: Decimal,
    pub user_name: String,
    pub created_at: DateTime<Local>,
    pub last_modified: DateTime<Local>,
    pub last_modified_by_user_name: String,
    pub pdf_url: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductionLine {
    pub id: i32,
    pub medicine_barcode: String,
    pub medicine_name: String,
    pub qty: Decimal,
    pub unit: String,
    pub cost: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionDetail {
    #[serde(flatten)]
    pub header: ProductionSummary,
    pub medicine_lists: Vec<ProductionLine>,
}

impl ProductionSummary {
    /// Produced output the stored document put into stock, if any
    fn output(&self) -> Option<StockLine> {
        self.updated_to_stock.then(|| StockLine {
            medicine_id: self.produced_medicine_id,
            unit_id: self.produced_unit_id,
            qty: self.produced_qty,
        })
    }
}

const SUMMARY_SELECT: &str = r#"
    SELECT h.id, h.number, h.produced_medicine_id, m.barcode AS produced_medicine_barcode,
           m.name AS produced_medicine_name, h.produced_qty, h.produced_unit_id,
           un.name AS produced_unit, h.production_date, h.description, h.updated_to_stock,
           h.updated_to_account, h.total_cost, u.name AS user_name, h.created_at,
           h.last_modified, lm.name AS last_modified_by_user_name, h.pdf_url
    FROM productions h
    JOIN medicines m ON m.id = h.produced_medicine_id
    JOIN units un ON un.id = h.produced_unit_id
    JOIN users u ON u.id = h.user_id
    JOIN users lm ON lm.id = h.last_modified_by_user_id
"#;

/// Live production number
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionIdentity {
    pub number: i32,
}

pub struct ProductionStore;

#[axum::async_trait]
impl DocumentStore for ProductionStore {
    type Identity = ProductionIdentity;

    fn kind(&self) -> DocumentKind {
        DocumentKind::Production
    }

    fn table(&self) -> &'static str {
        "productions"
    }

    async fn find_identity(
        &self,
        conn: &mut PgConnection,
        identity: &ProductionIdentity,
    ) -> AppResult<Option<i32>> {
        let id = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM productions WHERE number = $1 AND deleted_at IS NULL",
        )
        .bind(identity.number)
        .fetch_optional(conn)
        .await?;
        Ok(id)
    }

    async fn hard_delete_lines(&self, conn: &mut PgConnection, id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM production_medicine_items WHERE production_id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

impl ProductionInput {
    fn check(&self) -> AppResult<ProductionIdentity> {
        self.validate()?;
        validate_document_number(self.number).map_err(|m| AppError::validation("number", m))?;
        if self.produced_qty <= Decimal::ZERO {
            return Err(AppError::validation("producedQty", "must be greater than 0"));
        }
        validate_amount(self.total_cost).map_err(|m| AppError::validation("totalCost", m))?;
        for line in &self.production_medicine_list {
            if line.qty <= Decimal::ZERO {
                return Err(AppError::validation("qty", "must be greater than 0"));
            }
            validate_amount(line.cost).map_err(|m| AppError::validation("cost", m))?;
        }
        Ok(ProductionIdentity { number: self.number })
    }
}

/// Ingredient and output rows bound to medicine and unit ids
struct Resolved {
    produced: StockLine,
    ingredients: Vec<StockLine>,
}

impl Resolved {
    /// Net movements of applying this document
    fn requirements(&self, updated_to_stock: bool) -> Vec<StockRequirement> {
        let mut needed: Vec<StockRequirement> =
            self.ingredients.iter().map(StockLine::outflow).collect();
        if updated_to_stock {
            needed.push(self.produced.inflow());
        }
        needed
    }
}

async fn resolve(conn: &mut PgConnection, input: &ProductionInput) -> AppResult<Resolved> {
    let unit = UnitCatalog::get_or_create(&mut *conn, &input.produced_unit).await?;
    let medicine = StockEngine::lock_by_barcode(
        &mut *conn,
        &input.produced_medicine_barcode,
        &input.produced_medicine_name,
    )
    .await?;
    medicine.to_first_unit(unit.id, input.produced_qty)?;
    let produced = StockLine {
        medicine_id: medicine.id,
        unit_id: unit.id,
        qty: input.produced_qty,
    };

    let mut ingredients = Vec::with_capacity(input.production_medicine_list.len());
    for line in &input.production_medicine_list {
        let unit = UnitCatalog::get_or_create(&mut *conn, &line.unit).await?;
        let medicine =
            StockEngine::lock_by_barcode(&mut *conn, &line.medicine_barcode, &line.medicine_name)
                .await?;
        medicine.to_first_unit(unit.id, line.qty)?;
        ingredients.push(StockLine {
            medicine_id: medicine.id,
            unit_id: unit.id,
            qty: line.qty,
        });
    }
    Ok(Resolved {
        produced,
        ingredients,
    })
}

/// Insert ingredient lines of `production_id` and apply the document to stock
async fn produce(
    conn: &mut PgConnection,
    production_id: i32,
    input: &ProductionInput,
    resolved: &Resolved,
    actor_id: i32,
) -> AppResult<()> {
    for (line, res) in input.production_medicine_list.iter().zip(&resolved.ingredients) {
        sqlx::query(
            r#"
            INSERT INTO production_medicine_items (production_id, medicine_id, qty, unit_id, cost)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(production_id)
        .bind(res.medicine_id)
        .bind(res.qty)
        .bind(res.unit_id)
        .bind(line.cost)
        .execute(&mut *conn)
        .await?;
        StockEngine::subtract(&mut *conn, res.medicine_id, res.unit_id, res.qty, actor_id).await?;
    }
    if input.updated_to_stock {
        let out = &resolved.produced;
        StockEngine::add(&mut *conn, out.medicine_id, out.unit_id, out.qty, actor_id).await?;
    }
    Ok(())
}

async fn ingredient_lines(
    conn: &mut PgConnection,
    production_id: i32,
) -> AppResult<Vec<StockLine>> {
    let lines = sqlx::query_as::<_, StockLine>(
        r#"
        SELECT medicine_id, unit_id, qty FROM production_medicine_items
        WHERE production_id = $1 ORDER BY id
        "#,
    )
    .bind(production_id)
    .fetch_all(conn)
    .await?;
    Ok(lines)
}

/// Movements that undo the stored document
fn reversal(ingredients: &[StockLine], output: Option<&StockLine>) -> Vec<StockRequirement> {
    let mut needed: Vec<StockRequirement> = ingredients.iter().map(StockLine::inflow).collect();
    if let Some(out) = output {
        needed.push(out.outflow());
    }
    needed
}

/// Take the stored output back out and return ingredients to stock
async fn unproduce(
    conn: &mut PgConnection,
    ingredients: &[StockLine],
    output: Option<&StockLine>,
    actor_id: i32,
) -> AppResult<()> {
    if let Some(out) = output {
        StockEngine::subtract(&mut *conn, out.medicine_id, out.unit_id, out.qty, actor_id).await?;
    }
    for line in ingredients {
        StockEngine::add(&mut *conn, line.medicine_id, line.unit_id, line.qty, actor_id).await?;
    }
    Ok(())
}

pub fn render_payload(detail: &ProductionDetail) -> RenderPayload {
    let h = &detail.header;
    let kind = DocumentKind::Production;
    let mut payload = RenderPayload::document(kind.artifact(), kind.title())
        .field("Number", h.number)
        .field("Date", h.production_date.format("%Y-%m-%d"))
        .field(
            "Produced",
            format!("{} {} {}", h.produced_medicine_name, h.produced_qty, h.produced_unit),
        )
        .field("Updated to stock", if h.updated_to_stock { "yes" } else { "no" });
    for line in &detail.medicine_lists {
        payload = payload.line(format!(
            "{} {} {} {} = {}",
            line.medicine_barcode, line.medicine_name, line.qty, line.unit, line.cost
        ));
    }
    payload.total("Total cost", h.total_cost)
}

fn duplicate_number(e: sqlx::Error, number: i32) -> AppError {
    let err = AppError::from(e);
    if err.is_unique_violation() {
        AppError::DuplicateDocument(format!("production number {}", number))
    } else {
        err
    }
}

#[derive(Clone)]
pub struct ProductionService {
    db: PgPool,
    audit: AuditLog,
    renderer: Arc<dyn DocumentRenderer>,
}

impl ProductionService {
    pub fn new(db: PgPool, audit: AuditLog, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self {
            db,
            audit,
            renderer,
        }
    }

    pub async fn create(
        &self,
        input: ProductionInput,
        actor: &AuthUser,
    ) -> AppResult<DocumentOutcome> {
        let identity = input.check()?;
        let production_date = document_timestamp(&input.production_date)?;
        let store = ProductionStore;

        let mut tx = self.db.begin().await?;
        store.ensure_absent(&mut tx, &identity).await?;
        let resolved = resolve(&mut tx, &input).await?;
        StockEngine::preflight(&mut tx, &resolved.requirements(input.updated_to_stock)).await?;

        let written = async {
            sqlx::query(
                r#"
                INSERT INTO productions (
                    number, produced_medicine_id, produced_qty, produced_unit_id, production_date,
                    description, updated_to_stock, updated_to_account, total_cost, user_id,
                    last_modified_by_user_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
                "#,
            )
            .bind(input.number)
            .bind(resolved.produced.medicine_id)
            .bind(input.produced_qty)
            .bind(resolved.produced.unit_id)
            .bind(production_date)
            .bind(&input.description)
            .bind(input.updated_to_stock)
            .bind(input.updated_to_account)
            .bind(input.total_cost)
            .bind(actor.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| duplicate_number(e, input.number))?;
            let id = store.persisted_id(&mut tx, &identity).await?;
            produce(&mut tx, id, &input, &resolved, actor.id).await?;
            Ok::<_, AppError>(id)
        }
        .await;

        let id = match written {
            Ok(id) => id,
            Err(err) => return Err(abort(tx, &store, &self.db, &identity, err).await),
        };
        tx.commit().await?;
        tracing::info!("production {} created by {}", input.number, actor.name);

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

    pub async fn get_summary(&self, id: i32) -> AppResult<ProductionSummary> {
        sqlx::query_as::<_, ProductionSummary>(&format!(
            "{} WHERE h.id = $1 AND h.deleted_at IS NULL",
            SUMMARY_SELECT
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("production id {}", id)))
    }

    pub async fn detail(&self, id: i32) -> AppResult<ProductionDetail> {
        let header = self.get_summary(id).await?;
        let medicine_lists = sqlx::query_as::<_, ProductionLine>(
            r#"
            SELECT l.id, m.barcode AS medicine_barcode, m.name AS medicine_name, l.qty,
                   un.name AS unit, l.cost
            FROM production_medicine_items l
            JOIN medicines m ON m.id = l.medicine_id
            JOIN units un ON un.id = l.unit_id
            WHERE l.production_id = $1
            ORDER BY l.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        Ok(ProductionDetail {
            header,
            medicine_lists,
        })
    }

    pub async fn list(
        &self,
        filter: &ListFilter,
        window: &DateWindow,
    ) -> AppResult<Vec<ProductionSummary>> {
        let query = ListQuery {
            select: SUMMARY_SELECT,
            date_column: "production_date",
        };
        query
            .run(&self.db, window, filter, |filter| match filter {
                ListFilter::ProducedMedicineName(name) => {
                    Some(Condition::text("m.name = $3", name))
                }
                ListFilter::UpdatedToStock(flag) => {
                    Some(Condition::flag("h.updated_to_stock = $3", *flag))
                }
                ListFilter::UpdatedToAccount(flag) => {
                    Some(Condition::flag("h.updated_to_account = $3", *flag))
                }
                _ => None,
            })
            .await
    }

    pub async fn next_number(&self) -> AppResult<NextNumber> {
        Ok(NextNumber::after(live_count(&self.db, "productions").await?))
    }

    /// Reverse the stored document, then apply the new data in the same
    /// transaction
    pub async fn modify(
        &self,
        input: ModifyProductionInput,
        actor: &AuthUser,
    ) -> AppResult<DocumentOutcome> {
        let data = &input.new_data;
        let identity = data.check()?;
        let production_date = document_timestamp(&data.production_date)?;
        let before = self.detail(input.id).await?;
        let store = ProductionStore;

        let mut tx = self.db.begin().await?;
        if let Some(other) = store.find_identity(&mut tx, &identity).await? {
            if other != input.id {
                return Err(AppError::DuplicateDocument(format!(
                    "production number {}",
                    data.number
                )));
            }
        }

        let old_ingredients = ingredient_lines(&mut tx, input.id).await?;
        let old_output = before.header.output();
        let resolved = resolve(&mut tx, data).await?;
        let mut needed = reversal(&old_ingredients, old_output.as_ref());
        needed.extend(resolved.requirements(data.updated_to_stock));
        StockEngine::preflight(&mut tx, &needed).await?;

        unproduce(&mut tx, &old_ingredients, old_output.as_ref(), actor.id).await?;
        store.hard_delete_lines(&mut tx, input.id).await?;
        sqlx::query(
            r#"
            UPDATE productions SET
                number = $1, produced_medicine_id = $2, produced_qty = $3, produced_unit_id = $4,
                production_date = $5, description = $6, updated_to_stock = $7,
                updated_to_account = $8, total_cost = $9, last_modified = NOW(),
                last_modified_by_user_id = $10
            WHERE id = $11 AND deleted_at IS NULL
            "#,
        )
        .bind(data.number)
        .bind(resolved.produced.medicine_id)
        .bind(data.produced_qty)
        .bind(resolved.produced.unit_id)
        .bind(production_date)
        .bind(&data.description)
        .bind(data.updated_to_stock)
        .bind(data.updated_to_account)
        .bind(data.total_cost)
        .bind(actor.id)
        .bind(input.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_number(e, data.number))?;
        produce(&mut tx, input.id, data, &resolved, actor.id).await?;
        tx.commit().await?;
        tracing::info!("production {} modified by {}", before.header.number, actor.name);

        let mut trail = AuditTrail::new();
        trail.document(AuditAction::Modify, store.kind(), &actor.name, input.id, &before);
        self.finish(input.id, data.number, trail).await
    }

    pub async fn delete(&self, id: i32, actor: &AuthUser) -> AppResult<Vec<String>> {
        let before = self.detail(id).await?;
        let store = ProductionStore;

        let mut tx = self.db.begin().await?;
        let old_ingredients = ingredient_lines(&mut tx, id).await?;
        let old_output = before.header.output();
        StockEngine::preflight(&mut tx, &reversal(&old_ingredients, old_output.as_ref())).await?;
        unproduce(&mut tx, &old_ingredients, old_output.as_ref(), actor.id).await?;
        store.hard_delete_lines(&mut tx, id).await?;
        soft_delete(&mut tx, store.table(), id, actor.id).await?;
        tx.commit().await?;
        tracing::info!("production {} deleted by {}", before.header.number, actor.name);

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
        let bytes =
            artifact_bytes(&self.renderer, DocumentKind::Production.artifact(), &name).await?;
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

    fn input() -> ProductionInput {
        ProductionInput {
            number: 3,
            produced_medicine_barcode: "TONIC".to_string(),
            produced_medicine_name: "TONIC".to_string(),
            produced_qty: dec("20"),
            produced_unit: "BOT".to_string(),
            production_date: "2024-03-01 +0700WIB".to_string(),
            description: String::new(),
            updated_to_stock: true,
            updated_to_account: false,
            total_cost: dec("50000"),
            production_medicine_list: vec![ProductionLineInput {
                medicine_barcode: "SYR".to_string(),
                medicine_name: "SYRUP BASE".to_string(),
                qty: dec("2"),
                unit: "L".to_string(),
                cost: dec("50000"),
            }],
        }
    }

    fn line(medicine_id: i32, qty: &str) -> StockLine {
        StockLine {
            medicine_id,
            unit_id: 1,
            qty: dec(qty),
        }
    }

    #[test]
    fn test_check_accepts_valid_input() {
        assert_eq!(input().check().unwrap(), ProductionIdentity { number: 3 });
    }

    #[test]
    fn test_check_rejects_zero_output() {
        let mut p = input();
        p.produced_qty = Decimal::ZERO;
        assert!(matches!(p.check(), Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_output_only_when_updated_to_stock() {
        let resolved = Resolved {
            produced: line(9, "20"),
            ingredients: vec![line(1, "2")],
        };
        let with_output = resolved.requirements(true);
        assert_eq!(with_output.len(), 2);
        assert_eq!(with_output[1].qty, dec("-20"));
        assert_eq!(resolved.requirements(false).len(), 1);
    }

    #[test]
    fn test_reversal_mirrors_application() {
        let ingredients = vec![line(1, "2"), line(2, "1")];
        let output = line(9, "20");
        let needed = reversal(&ingredients, Some(&output));
        assert_eq!(needed[0].qty, dec("-2"));
        assert_eq!(needed[1].qty, dec("-1"));
        assert_eq!(needed[2], output.outflow());
        assert_eq!(reversal(&ingredients, None).len(), 2);
    }
}
