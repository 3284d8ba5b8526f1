//! Small named lookup tables: suppliers, customers, doctors, patients,
//! payment methods and the prescription label vocabularies

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use shared::fuzzy_pattern;
use sqlx::{FromRow, PgConnection, PgPool};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Supplier,
    Customer,
    Doctor,
    Patient,
    PaymentMethod,
    ConsumeTime,
    Det,
    Dose,
    Mf,
    Usage,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 10] = [
        CatalogKind::Supplier,
        CatalogKind::Customer,
        CatalogKind::Doctor,
        CatalogKind::Patient,
        CatalogKind::PaymentMethod,
        CatalogKind::ConsumeTime,
        CatalogKind::Det,
        CatalogKind::Dose,
        CatalogKind::Mf,
        CatalogKind::Usage,
    ];

    /// Path segment of `/catalog/{kind}`
    pub fn slug(&self) -> &'static str {
        match self {
            CatalogKind::Supplier => "supplier",
            CatalogKind::Customer => "customer",
            CatalogKind::Doctor => "doctor",
            CatalogKind::Patient => "patient",
            CatalogKind::PaymentMethod => "payment-method",
            CatalogKind::ConsumeTime => "consume-time",
            CatalogKind::Det => "det",
            CatalogKind::Dose => "dose",
            CatalogKind::Mf => "mf",
            CatalogKind::Usage => "usage",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            CatalogKind::Supplier => "suppliers",
            CatalogKind::Customer => "customers",
            CatalogKind::Doctor => "doctors",
            CatalogKind::Patient => "patients",
            CatalogKind::PaymentMethod => "payment_methods",
            CatalogKind::ConsumeTime => "consume_times",
            CatalogKind::Det => "dets",
            CatalogKind::Dose => "doses",
            CatalogKind::Mf => "mfs",
            CatalogKind::Usage => "prescription_set_usages",
        }
    }

    pub fn from_slug(slug: &str) -> AppResult<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.slug() == slug)
            .ok_or_else(|| AppError::NotFound(format!("catalog {}", slug)))
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: i32,
    pub name: String,
    pub created_at: DateTime<Local>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogEntryInput {
    pub name: String,
}

#[derive(Clone)]
pub struct CatalogService {
    db: PgPool,
}

impl CatalogService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list(
        &self,
        kind: CatalogKind,
        search: Option<&str>,
    ) -> AppResult<Vec<CatalogEntry>> {
        let mut conn = self.db.acquire().await?;
        match search {
            None => {
                let rows = sqlx::query_as::<_, CatalogEntry>(&format!(
                    "SELECT id, name, created_at FROM {} ORDER BY name",
                    kind.table()
                ))
                .fetch_all(&mut *conn)
                .await?;
                Ok(rows)
            }
            Some(query) => {
                if let Some(entry) = Self::get_by_name(&mut conn, kind, query).await? {
                    return Ok(vec![entry]);
                }
                let rows = sqlx::query_as::<_, CatalogEntry>(&format!(
                    "SELECT id, name, created_at FROM {} \
                     WHERE name ILIKE $1 ESCAPE '\\' ORDER BY name",
                    kind.table()
                ))
                .bind(fuzzy_pattern(query))
                .fetch_all(&mut *conn)
                .await?;
                Ok(rows)
            }
        }
    }

    pub async fn create(
        &self,
        kind: CatalogKind,
        input: CatalogEntryInput,
    ) -> AppResult<CatalogEntry> {
        let mut conn = self.db.acquire().await?;
        Self::get_or_create(&mut conn, kind, &input.name).await
    }

    pub async fn get_by_id(
        conn: &mut PgConnection,
        kind: CatalogKind,
        id: i32,
    ) -> AppResult<CatalogEntry> {
        sqlx::query_as::<_, CatalogEntry>(&format!(
            "SELECT id, name, created_at FROM {} WHERE id = $1",
            kind.table()
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::ReferenceNotFound(format!("{} id {}", kind.slug(), id)))
    }

    pub async fn get_by_name(
        conn: &mut PgConnection,
        kind: CatalogKind,
        name: &str,
    ) -> AppResult<Option<CatalogEntry>> {
        let entry = sqlx::query_as::<_, CatalogEntry>(&format!(
            "SELECT id, name, created_at FROM {} WHERE name = $1",
            kind.table()
        ))
        .bind(name.trim())
        .fetch_optional(conn)
        .await?;
        Ok(entry)
    }

    /// Existing entry by name, or a fresh one; concurrent inserts re-read
    pub async fn get_or_create(
        conn: &mut PgConnection,
        kind: CatalogKind,
        name: &str,
    ) -> AppResult<CatalogEntry> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation(kind.slug(), "name is required"));
        }
        if let Some(entry) = Self::get_by_name(&mut *conn, kind, name).await? {
            return Ok(entry);
        }

        sqlx::query(&format!(
            "INSERT INTO {} (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
            kind.table()
        ))
        .bind(name)
        .execute(&mut *conn)
        .await?;
        tracing::debug!("{} {} created", kind.slug(), name);

        Self::get_by_name(&mut *conn, kind, name)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("{} {} vanished after insert", kind.slug(), name))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugs_round_trip() {
        for kind in CatalogKind::ALL {
            assert_eq!(CatalogKind::from_slug(kind.slug()).unwrap(), kind);
        }
        assert!(CatalogKind::from_slug("company").is_err());
    }

    #[test]
    fn test_usage_lives_in_prescription_set_usages() {
        assert_eq!(CatalogKind::Usage.table(), "prescription_set_usages");
    }
}
