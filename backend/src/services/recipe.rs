//! Main doctor's compounded-drug recipes: which content medicines, in what
//! quantity, make up one compounded medicine

use chrono::{DateTime, Local};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{parse_positive_quantity, AuditAction};
use sqlx::{FromRow, PgConnection, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::audit::{AuditLog, AuditTrail};
use crate::services::auth::AuthUser;
use crate::services::unit::UnitCatalog;

const ENTITY: &str = "main-doctor-prescription-item";

/// First unit given to a compounded medicine created from its recipe
const RECIPE_UNIT: &str = "KAP";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeContent {
    pub name: String,
    /// Plain number or fraction
    pub qty: String,
    pub unit: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecipeInput {
    #[validate(length(min = 1))]
    pub medicine_name: String,
    #[validate(length(min = 1))]
    pub medicine_contents: Vec<RecipeContent>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ModifyRecipeInput {
    pub medicine_id: i32,
    #[validate(length(min = 1))]
    pub new_medicine_contents: Vec<RecipeContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeMedicineInput {
    pub medicine_id: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub medicine_id: i32,
    #[serde(rename = "medicine")]
    pub medicine_name: String,
    pub medicine_contents: Vec<RecipeContent>,
    pub last_modified: DateTime<Local>,
    pub last_modified_by_user_name: String,
}

#[derive(Debug, FromRow)]
struct RecipeRow {
    medicine_id: i32,
    medicine_name: String,
    content_name: String,
    qty: Decimal,
    unit_name: String,
    last_modified: DateTime<Local>,
    last_modified_by_user_name: String,
}

const RECIPE_SELECT: &str = r#"
    SELECT r.medicine_id, m.name AS medicine_name, c.name AS content_name, r.qty,
           un.name AS unit_name, r.last_modified, u.name AS last_modified_by_user_name
    FROM main_doctor_presc_medicine_item r
    JOIN medicines m ON m.id = r.medicine_id
    JOIN medicines c ON c.id = r.medicine_content_id
    JOIN units un ON un.id = r.unit_id
    JOIN users u ON u.id = r.last_modified_by_user_id
"#;

/// Fold content rows, ordered by medicine, into one recipe per medicine
fn group(rows: Vec<RecipeRow>) -> Vec<Recipe> {
    let mut recipes: Vec<Recipe> = Vec::new();
    for row in rows {
        let content = RecipeContent {
            name: row.content_name,
            qty: row.qty.normalize().to_string(),
            unit: row.unit_name,
        };
        match recipes.last_mut() {
            Some(recipe) if recipe.medicine_id == row.medicine_id => {
                recipe.medicine_contents.push(content);
                if row.last_modified > recipe.last_modified {
                    recipe.last_modified = row.last_modified;
                    recipe.last_modified_by_user_name = row.last_modified_by_user_name;
                }
            }
            _ => recipes.push(Recipe {
                medicine_id: row.medicine_id,
                medicine_name: row.medicine_name,
                medicine_contents: vec![content],
                last_modified: row.last_modified,
                last_modified_by_user_name: row.last_modified_by_user_name,
            }),
        }
    }
    recipes
}

/// `RO-` followed by three digits
fn recipe_barcode() -> String {
    format!("RO-{:03}", rand::thread_rng().gen_range(0..1000))
}

async fn medicine_id_by_name(conn: &mut PgConnection, name: &str) -> AppResult<Option<i32>> {
    let id = sqlx::query_scalar::<_, i32>(
        "SELECT id FROM medicines WHERE name = $1 AND deleted_at IS NULL ORDER BY id LIMIT 1",
    )
    .bind(name)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

/// Register an empty compounded medicine under a fresh `RO-` barcode
async fn create_compounded_medicine(
    conn: &mut PgConnection,
    name: &str,
    actor_id: i32,
) -> AppResult<i32> {
    let unit = UnitCatalog::get_or_create(&mut *conn, RECIPE_UNIT).await?;
    let barcode = loop {
        let candidate = recipe_barcode();
        let taken =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM medicines WHERE barcode = $1")
                .bind(&candidate)
                .fetch_one(&mut *conn)
                .await?;
        if taken == 0 {
            break candidate;
        }
    };

    let id = sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO medicines (barcode, name, qty, first_unit_id, last_modified_by_user_id)
        VALUES ($1, $2, 0, $3, $4)
        RETURNING id
        "#,
    )
    .bind(&barcode)
    .bind(name.to_uppercase())
    .bind(unit.id)
    .bind(actor_id)
    .fetch_one(&mut *conn)
    .await?;
    tracing::info!("compounded medicine {} registered as {}", name, barcode);
    Ok(id)
}

async fn has_recipe(conn: &mut PgConnection, medicine_id: i32) -> AppResult<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM main_doctor_presc_medicine_item WHERE medicine_id = $1",
    )
    .bind(medicine_id)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

async fn insert_contents(
    conn: &mut PgConnection,
    medicine_id: i32,
    contents: &[RecipeContent],
    actor_id: i32,
) -> AppResult<()> {
    for content in contents {
        let qty = parse_positive_quantity(&content.qty)?;
        let content_id = medicine_id_by_name(&mut *conn, &content.name)
            .await?
            .ok_or_else(|| AppError::ReferenceNotFound(format!("medicine {}", content.name)))?;
        let unit = UnitCatalog::get_or_create(&mut *conn, &content.unit).await?;
        sqlx::query(
            r#"
            INSERT INTO main_doctor_presc_medicine_item
                (medicine_id, medicine_content_id, qty, unit_id, user_id, last_modified_by_user_id)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(medicine_id)
        .bind(content_id)
        .bind(qty)
        .bind(unit.id)
        .bind(actor_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn delete_contents(conn: &mut PgConnection, medicine_id: i32) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM main_doctor_presc_medicine_item WHERE medicine_id = $1")
        .bind(medicine_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

#[derive(Clone)]
pub struct RecipeService {
    db: PgPool,
    audit: AuditLog,
}

impl RecipeService {
    pub fn new(db: PgPool, audit: AuditLog) -> Self {
        Self { db, audit }
    }

    /// Store the recipe of a medicine, registering the medicine if it is new
    pub async fn create(&self, input: RecipeInput, actor: &AuthUser) -> AppResult<Recipe> {
        input.validate()?;

        let mut tx = self.db.begin().await?;
        let medicine_id = match medicine_id_by_name(&mut tx, &input.medicine_name).await? {
            Some(id) => id,
            None => create_compounded_medicine(&mut tx, &input.medicine_name, actor.id).await?,
        };
        if has_recipe(&mut tx, medicine_id).await? {
            return Err(AppError::DuplicateDocument(format!(
                "recipe for {}",
                input.medicine_name
            )));
        }
        insert_contents(&mut tx, medicine_id, &input.medicine_contents, actor.id).await?;
        tx.commit().await?;
        tracing::info!("recipe for {} created by {}", input.medicine_name, actor.name);

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Create, ENTITY, &actor.name, medicine_id, &input);
        trail.flush(&self.audit).await;
        self.detail(medicine_id).await
    }

    /// Replace every content row of an existing recipe
    pub async fn modify(&self, input: ModifyRecipeInput, actor: &AuthUser) -> AppResult<Recipe> {
        input.validate()?;
        let before = self.detail(input.medicine_id).await?;

        let mut tx = self.db.begin().await?;
        delete_contents(&mut tx, input.medicine_id).await?;
        insert_contents(&mut tx, input.medicine_id, &input.new_medicine_contents, actor.id).await?;
        tx.commit().await?;
        tracing::info!("recipe for {} modified by {}", before.medicine_name, actor.name);

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Modify, ENTITY, &actor.name, input.medicine_id, &before);
        trail.flush(&self.audit).await;
        self.detail(input.medicine_id).await
    }

    pub async fn list(&self) -> AppResult<Vec<Recipe>> {
        let rows = sqlx::query_as::<_, RecipeRow>(&format!(
            "{} WHERE m.deleted_at IS NULL ORDER BY m.name, r.medicine_id, r.id",
            RECIPE_SELECT
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(group(rows))
    }

    pub async fn detail(&self, medicine_id: i32) -> AppResult<Recipe> {
        let rows = sqlx::query_as::<_, RecipeRow>(&format!(
            "{} WHERE r.medicine_id = $1 ORDER BY r.id",
            RECIPE_SELECT
        ))
        .bind(medicine_id)
        .fetch_all(&self.db)
        .await?;
        group(rows)
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("recipe for medicine id {}", medicine_id)))
    }

    /// Recipe of the live medicine named `name`
    pub async fn detail_by_name(&self, name: &str) -> AppResult<Recipe> {
        let mut conn = self.db.acquire().await?;
        let id = medicine_id_by_name(&mut conn, name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("medicine {}", name)))?;
        drop(conn);
        self.detail(id).await
    }

    pub async fn delete(&self, medicine_id: i32, actor: &AuthUser) -> AppResult<()> {
        let before = self.detail(medicine_id).await?;
        let mut conn = self.db.acquire().await?;
        delete_contents(&mut conn, medicine_id).await?;
        tracing::info!("recipe for {} deleted by {}", before.medicine_name, actor.name);

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Delete, ENTITY, &actor.name, medicine_id, &before);
        trail.flush(&self.audit).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::str::FromStr;

    fn row(medicine_id: i32, content: &str, qty: &str, minutes: i64, user: &str) -> RecipeRow {
        let base = Local.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        RecipeRow {
            medicine_id,
            medicine_name: format!("PULV {}", medicine_id),
            content_name: content.to_string(),
            qty: Decimal::from_str(qty).unwrap(),
            unit_name: "TAB".to_string(),
            last_modified: base + Duration::minutes(minutes),
            last_modified_by_user_name: user.to_string(),
        }
    }

    #[test]
    fn test_group_folds_rows_per_medicine() {
        let recipes = group(vec![
            row(1, "PARACETAMOL", "0.5000", 0, "a"),
            row(1, "CTM", "0.2500", 5, "b"),
            row(2, "AMBROXOL", "1.0000", 0, "a"),
        ]);
        assert_eq!(recipes.len(), 2);
        assert_eq!(recipes[0].medicine_contents.len(), 2);
        assert_eq!(recipes[0].medicine_contents[0].qty, "0.5");
        assert_eq!(recipes[0].last_modified_by_user_name, "b");
        assert_eq!(recipes[1].medicine_contents[0].qty, "1");
    }

    #[test]
    fn test_recipe_barcode_shape() {
        for _ in 0..50 {
            let code = recipe_barcode();
            assert_eq!(code.len(), 6);
            assert!(code.starts_with("RO-"));
            assert!(code[3..].chars().all(|c| c.is_ascii_digit()));
        }
    }
}
