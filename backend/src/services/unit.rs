//! Unit catalog: case-normalized unit names created on first reference

use chrono::{DateTime, Local};
use serde::Serialize;
use shared::{is_unused_unit_name, normalize_unit_name};
use sqlx::{FromRow, PgConnection};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: i32,
    pub name: String,
    pub created_at: DateTime<Local>,
}

/// Unit lookups run on whatever connection the caller holds, so a document
/// transaction sees the units it created itself.
pub struct UnitCatalog;

impl UnitCatalog {
    pub async fn get_by_id(conn: &mut PgConnection, id: i32) -> AppResult<Unit> {
        sqlx::query_as::<_, Unit>("SELECT id, name, created_at FROM units WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| AppError::ReferenceNotFound(format!("unit id {}", id)))
    }

    pub async fn get_by_name(conn: &mut PgConnection, name: &str) -> AppResult<Option<Unit>> {
        let unit = sqlx::query_as::<_, Unit>(
            "SELECT id, name, created_at FROM units WHERE name = $1",
        )
        .bind(normalize_unit_name(name))
        .fetch_optional(conn)
        .await?;
        Ok(unit)
    }

    /// Look the unit up by its uppercased name, inserting it when absent.
    /// A concurrent insert of the same name is resolved by re-reading.
    pub async fn get_or_create(conn: &mut PgConnection, raw: &str) -> AppResult<Unit> {
        let name = normalize_unit_name(raw);
        if name.is_empty() {
            return Err(AppError::validation("unit", "unit name is required"));
        }

        if let Some(unit) = Self::get_by_name(&mut *conn, &name).await? {
            return Ok(unit);
        }

        sqlx::query("INSERT INTO units (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(&name)
            .execute(&mut *conn)
            .await?;
        tracing::debug!("unit {} created", name);

        Self::get_by_name(&mut *conn, &name)
            .await?
            .ok_or_else(|| AppError::Internal(format!("unit {} vanished after insert", name)))
    }

    /// Optional second/third unit slot: empty or `NONE` leaves the slot unused
    pub async fn get_or_create_optional(
        conn: &mut PgConnection,
        raw: &str,
    ) -> AppResult<Option<Unit>> {
        if is_unused_unit_name(raw) {
            return Ok(None);
        }
        Self::get_or_create(conn, raw).await.map(Some)
    }
}
