//! Medicine registry: master records, unit layout and stock balance

use chrono::{DateTime, Local};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    fuzzy_pattern, parse_positive_quantity, validate_amount, validate_barcode, validate_unit_ratio,
    AuditAction,
};
use sqlx::{FromRow, PgConnection, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::audit::{AuditLog, AuditTrail};
use crate::services::auth::AuthUser;
use crate::services::stock::StockEngine;
use crate::services::unit::{Unit, UnitCatalog};

/// Medicine with its unit names resolved
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Medicine {
    pub id: i32,
    pub barcode: String,
    pub name: String,
    pub qty: Decimal,
    pub first_unit_id: i32,
    pub first_unit_name: String,
    pub first_subtotal: Decimal,
    pub first_discount: Decimal,
    pub first_price: Decimal,
    pub second_unit_id: Option<i32>,
    pub second_unit_name: Option<String>,
    pub second_unit_to_first_unit_ratio: Decimal,
    pub second_subtotal: Decimal,
    pub second_discount: Decimal,
    pub second_price: Decimal,
    pub third_unit_id: Option<i32>,
    pub third_unit_name: Option<String>,
    pub third_unit_to_first_unit_ratio: Decimal,
    pub third_subtotal: Decimal,
    pub third_discount: Decimal,
    pub third_price: Decimal,
    pub description: String,
    pub created_at: DateTime<Local>,
    pub last_modified: DateTime<Local>,
    pub last_modified_by_user_name: String,
}

const MEDICINE_SELECT: &str = r#"
    SELECT m.id, m.barcode, m.name, m.qty,
           m.first_unit_id, u1.name AS first_unit_name,
           m.first_subtotal, m.first_discount, m.first_price,
           m.second_unit_id, u2.name AS second_unit_name,
           m.second_unit_to_first_unit_ratio,
           m.second_subtotal, m.second_discount, m.second_price,
           m.third_unit_id, u3.name AS third_unit_name,
           m.third_unit_to_first_unit_ratio,
           m.third_subtotal, m.third_discount, m.third_price,
           m.description, m.created_at, m.last_modified,
           u.name AS last_modified_by_user_name
    FROM medicines m
    JOIN units u1 ON u1.id = m.first_unit_id
    LEFT JOIN units u2 ON u2.id = m.second_unit_id
    LEFT JOIN units u3 ON u3.id = m.third_unit_id
    JOIN users u ON u.id = m.last_modified_by_user_id
"#;

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MedicineInput {
    #[validate(length(min = 1, max = 100))]
    pub barcode: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default)]
    pub qty: Decimal,
    pub first_unit: String,
    #[serde(default)]
    pub first_subtotal: Decimal,
    #[serde(default)]
    pub first_discount: Decimal,
    #[serde(default)]
    pub first_price: Decimal,
    #[serde(default)]
    pub second_unit: String,
    #[serde(default)]
    pub second_unit_to_first_unit_ratio: Decimal,
    #[serde(default)]
    pub second_subtotal: Decimal,
    #[serde(default)]
    pub second_discount: Decimal,
    #[serde(default)]
    pub second_price: Decimal,
    #[serde(default)]
    pub third_unit: String,
    #[serde(default)]
    pub third_unit_to_first_unit_ratio: Decimal,
    #[serde(default)]
    pub third_subtotal: Decimal,
    #[serde(default)]
    pub third_discount: Decimal,
    #[serde(default)]
    pub third_price: Decimal,
    #[serde(default)]
    pub description: String,
}

impl MedicineInput {
    fn check(&self) -> AppResult<()> {
        self.validate()?;
        validate_barcode(&self.barcode).map_err(|m| AppError::validation("barcode", m))?;
        validate_amount(self.qty).map_err(|m| AppError::validation("qty", m))?;
        validate_unit_ratio(self.second_unit_to_first_unit_ratio)
            .map_err(|m| AppError::validation("secondUnitToFirstUnitRatio", m))?;
        validate_unit_ratio(self.third_unit_to_first_unit_ratio)
            .map_err(|m| AppError::validation("thirdUnitToFirstUnitRatio", m))?;
        for price in [self.first_price, self.second_price, self.third_price] {
            validate_amount(price).map_err(|m| AppError::validation("price", m))?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyMedicineInput {
    pub id: i32,
    pub new_data: MedicineInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStockInput {
    pub id: i32,
    pub qty: Decimal,
}

/// `qty` accepts the same forms as a prescription line (`"1/2"`)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCheckInput {
    pub id: i32,
    pub unit_id: i32,
    pub qty: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCheck {
    pub medicine_id: i32,
    pub sufficient: bool,
}

/// One CSV row of the medicine export
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicineExportRow {
    pub barcode: String,
    pub name: String,
    pub qty: Decimal,
    pub first_unit: String,
    pub first_price: Decimal,
    pub second_unit: String,
    pub second_unit_to_first_unit_ratio: Decimal,
    pub second_price: Decimal,
    pub third_unit: String,
    pub third_unit_to_first_unit_ratio: Decimal,
    pub third_price: Decimal,
    pub description: String,
}

impl From<Medicine> for MedicineExportRow {
    fn from(m: Medicine) -> Self {
        Self {
            barcode: m.barcode,
            name: m.name,
            qty: m.qty,
            first_unit: m.first_unit_name,
            first_price: m.first_price,
            second_unit: m.second_unit_name.unwrap_or_default(),
            second_unit_to_first_unit_ratio: m.second_unit_to_first_unit_ratio,
            second_price: m.second_price,
            third_unit: m.third_unit_name.unwrap_or_default(),
            third_unit_to_first_unit_ratio: m.third_unit_to_first_unit_ratio,
            third_price: m.third_price,
            description: m.description,
        }
    }
}

/// Resolved unit slots of a medicine input
struct UnitSlots {
    first: i32,
    second: Option<i32>,
    second_ratio: Decimal,
    third: Option<i32>,
    third_ratio: Decimal,
}

async fn resolve_slots(conn: &mut PgConnection, input: &MedicineInput) -> AppResult<UnitSlots> {
    let first = UnitCatalog::get_or_create(&mut *conn, &input.first_unit).await?;
    let second = UnitCatalog::get_or_create_optional(&mut *conn, &input.second_unit).await?;
    let third = UnitCatalog::get_or_create_optional(&mut *conn, &input.third_unit).await?;
    // no unit, no ratio
    let ratio = |unit: &Option<Unit>, ratio: Decimal| match unit {
        Some(_) => ratio,
        None => Decimal::ZERO,
    };
    Ok(UnitSlots {
        first: first.id,
        second_ratio: ratio(&second, input.second_unit_to_first_unit_ratio),
        second: second.map(|u| u.id),
        third_ratio: ratio(&third, input.third_unit_to_first_unit_ratio),
        third: third.map(|u| u.id),
    })
}

#[derive(Clone)]
pub struct MedicineService {
    db: PgPool,
    audit: AuditLog,
}

impl MedicineService {
    pub fn new(db: PgPool, audit: AuditLog) -> Self {
        Self { db, audit }
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<Medicine> {
        sqlx::query_as::<_, Medicine>(&format!(
            "{} WHERE m.id = $1 AND m.deleted_at IS NULL",
            MEDICINE_SELECT
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("medicine id {}", id)))
    }

    pub async fn get_by_barcode(&self, barcode: &str) -> AppResult<Option<Medicine>> {
        let medicine = sqlx::query_as::<_, Medicine>(&format!(
            "{} WHERE m.barcode = $1 AND m.deleted_at IS NULL",
            MEDICINE_SELECT
        ))
        .bind(barcode)
        .fetch_optional(&self.db)
        .await?;
        Ok(medicine)
    }

    pub async fn get_by_name(&self, name: &str) -> AppResult<Option<Medicine>> {
        let medicine = sqlx::query_as::<_, Medicine>(&format!(
            "{} WHERE m.name = $1 AND m.deleted_at IS NULL ORDER BY m.id LIMIT 1",
            MEDICINE_SELECT
        ))
        .bind(name)
        .fetch_optional(&self.db)
        .await?;
        Ok(medicine)
    }

    pub async fn list_all(&self) -> AppResult<Vec<Medicine>> {
        let medicines = sqlx::query_as::<_, Medicine>(&format!(
            "{} WHERE m.deleted_at IS NULL ORDER BY m.name",
            MEDICINE_SELECT
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(medicines)
    }

    /// Exact match on `column`, falling back to the per-character pattern
    async fn search(&self, column: &str, query: &str) -> AppResult<Vec<Medicine>> {
        let exact = sqlx::query_as::<_, Medicine>(&format!(
            "{} WHERE m.{} = $1 AND m.deleted_at IS NULL ORDER BY m.name",
            MEDICINE_SELECT, column
        ))
        .bind(query)
        .fetch_all(&self.db)
        .await?;
        if !exact.is_empty() {
            return Ok(exact);
        }

        let fuzzy = sqlx::query_as::<_, Medicine>(&format!(
            "{} WHERE m.{} ILIKE $1 ESCAPE '\\' AND m.deleted_at IS NULL ORDER BY m.name",
            MEDICINE_SELECT, column
        ))
        .bind(fuzzy_pattern(query))
        .fetch_all(&self.db)
        .await?;
        Ok(fuzzy)
    }

    pub async fn search_by_name(&self, query: &str) -> AppResult<Vec<Medicine>> {
        self.search("name", query).await
    }

    pub async fn search_by_barcode(&self, query: &str) -> AppResult<Vec<Medicine>> {
        self.search("barcode", query).await
    }

    pub async fn search_by_description(&self, query: &str) -> AppResult<Vec<Medicine>> {
        let medicines = sqlx::query_as::<_, Medicine>(&format!(
            "{} WHERE m.description ILIKE $1 ESCAPE '\\' \
             AND m.deleted_at IS NULL ORDER BY m.name",
            MEDICINE_SELECT
        ))
        .bind(fuzzy_pattern(query))
        .fetch_all(&self.db)
        .await?;
        Ok(medicines)
    }

    /// `GET /medicine/{params}/{val}`
    pub async fn list(&self, params: &str, val: &str) -> AppResult<Vec<Medicine>> {
        if val == "all" {
            return self.list_all().await;
        }
        match params {
            "id" => {
                let id = val
                    .parse::<i32>()
                    .map_err(|_| AppError::InvalidPayload(format!("{} is not a number", val)))?;
                Ok(vec![self.get_by_id(id).await?])
            }
            "barcode" => self.search_by_barcode(val).await,
            "name" => self.search_by_name(val).await,
            "description" => self.search_by_description(val).await,
            other => Err(AppError::InvalidPayload(format!("params {} undefined", other))),
        }
    }

    pub async fn create(&self, input: MedicineInput, actor: &AuthUser) -> AppResult<Medicine> {
        input.check()?;
        if self.get_by_barcode(&input.barcode).await?.is_some() {
            return Err(AppError::DuplicateDocument(format!("medicine barcode {}", input.barcode)));
        }

        let mut tx = self.db.begin().await?;
        let slots = resolve_slots(&mut tx, &input).await?;
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO medicines (
                barcode, name, qty,
                first_unit_id, first_subtotal, first_discount, first_price,
                second_unit_id, second_unit_to_first_unit_ratio,
                second_subtotal, second_discount, second_price,
                third_unit_id, third_unit_to_first_unit_ratio,
                third_subtotal, third_discount, third_price,
                description, last_modified_by_user_id
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            RETURNING id
            "#,
        )
        .bind(&input.barcode)
        .bind(&input.name)
        .bind(input.qty)
        .bind(slots.first)
        .bind(input.first_subtotal)
        .bind(input.first_discount)
        .bind(input.first_price)
        .bind(slots.second)
        .bind(slots.second_ratio)
        .bind(input.second_subtotal)
        .bind(input.second_discount)
        .bind(input.second_price)
        .bind(slots.third)
        .bind(slots.third_ratio)
        .bind(input.third_subtotal)
        .bind(input.third_discount)
        .bind(input.third_price)
        .bind(&input.description)
        .bind(actor.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| duplicate_barcode(e, &input.barcode))?;
        tx.commit().await?;

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Create, "medicine", &actor.name, id, &input);
        trail.flush(&self.audit).await;

        tracing::info!("medicine {} ({}) created by {}", input.name, input.barcode, actor.name);
        self.get_by_id(id).await
    }

    /// Replace every field; the previous record is snapshotted first
    pub async fn modify(
        &self,
        input: ModifyMedicineInput,
        actor: &AuthUser,
    ) -> AppResult<Medicine> {
        input.new_data.check()?;
        let before = self.get_by_id(input.id).await?;
        let data = &input.new_data;

        let mut tx = self.db.begin().await?;
        let slots = resolve_slots(&mut tx, data).await?;
        sqlx::query(
            r#"
            UPDATE medicines SET
                barcode = $1, name = $2, qty = $3,
                first_unit_id = $4, first_subtotal = $5, first_discount = $6, first_price = $7,
                second_unit_id = $8, second_unit_to_first_unit_ratio = $9,
                second_subtotal = $10, second_discount = $11, second_price = $12,
                third_unit_id = $13, third_unit_to_first_unit_ratio = $14,
                third_subtotal = $15, third_discount = $16, third_price = $17,
                description = $18, last_modified = NOW(), last_modified_by_user_id = $19
            WHERE id = $20 AND deleted_at IS NULL
            "#,
        )
        .bind(&data.barcode)
        .bind(&data.name)
        .bind(data.qty)
        .bind(slots.first)
        .bind(data.first_subtotal)
        .bind(data.first_discount)
        .bind(data.first_price)
        .bind(slots.second)
        .bind(slots.second_ratio)
        .bind(data.second_subtotal)
        .bind(data.second_discount)
        .bind(data.second_price)
        .bind(slots.third)
        .bind(slots.third_ratio)
        .bind(data.third_subtotal)
        .bind(data.third_discount)
        .bind(data.third_price)
        .bind(&data.description)
        .bind(actor.id)
        .bind(input.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_barcode(e, &data.barcode))?;
        tx.commit().await?;

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Modify, "medicine", &actor.name, before.id, &before);
        trail.flush(&self.audit).await;

        tracing::info!("medicine {} modified by {}", before.id, actor.name);
        self.get_by_id(input.id).await
    }

    /// Set an absolute balance (stock opname)
    pub async fn update_stock(
        &self,
        input: UpdateStockInput,
        actor: &AuthUser,
    ) -> AppResult<Medicine> {
        validate_amount(input.qty).map_err(|m| AppError::validation("qty", m))?;
        let before = self.get_by_id(input.id).await?;

        let mut tx = self.db.begin().await?;
        StockEngine::lock(&mut tx, input.id).await?;
        StockEngine::update_stock(&mut tx, input.id, input.qty, actor.id).await?;
        tx.commit().await?;

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Modify, "medicine", &actor.name, before.id, &before);
        trail.flush(&self.audit).await;

        tracing::info!(
            "medicine {} stock set {} -> {} by {}",
            before.name,
            before.qty,
            input.qty,
            actor.name
        );
        self.get_by_id(input.id).await
    }

    /// Whether the balance covers a quantity in any of the medicine's units
    pub async fn check_stock(&self, input: StockCheckInput) -> AppResult<StockCheck> {
        let qty = parse_positive_quantity(&input.qty)?;
        let mut conn = self.db.acquire().await?;
        let sufficient =
            StockEngine::check_sufficient(&mut conn, input.id, input.unit_id, qty).await?;
        Ok(StockCheck {
            medicine_id: input.id,
            sufficient,
        })
    }

    /// Tombstone the medicine and purge recipes that mention it
    pub async fn soft_delete(&self, id: i32, actor: &AuthUser) -> AppResult<()> {
        let before = self.get_by_id(id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "UPDATE medicines SET deleted_at = NOW(), deleted_by_user_id = $1 \
             WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(actor.id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM main_doctor_presc_medicine_item \
             WHERE medicine_id = $1 OR medicine_content_id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Delete, "medicine", &actor.name, id, &before);
        trail.flush(&self.audit).await;

        tracing::info!("medicine {} deleted by {}", before.name, actor.name);
        Ok(())
    }

    /// All live medicines as CSV
    pub async fn export_csv(&self) -> AppResult<Vec<u8>> {
        let medicines = self.list_all().await?;
        let mut writer = csv::Writer::from_writer(vec![]);
        for medicine in medicines {
            writer
                .serialize(MedicineExportRow::from(medicine))
                .map_err(|e| AppError::Internal(format!("CSV write error: {}", e)))?;
        }
        writer
            .into_inner()
            .map_err(|e| AppError::Internal(format!("CSV finalize error: {}", e)))
    }
}

fn duplicate_barcode(e: sqlx::Error, barcode: &str) -> AppError {
    let err = AppError::from(e);
    if err.is_unique_violation() {
        AppError::DuplicateDocument(format!("medicine barcode {}", barcode))
    } else {
        err
    }
}
