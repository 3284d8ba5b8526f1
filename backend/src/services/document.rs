//! Shared document lifecycle plumbing
//!
//! Every document type has a header table, line tables hanging off it and an
//! identity tuple used to detect duplicates and to find a half-written header
//! again. Creates run inside one transaction; when a step after the header
//! insert fails the transaction is rolled back and the header identity is
//! absolutely deleted as well, which is a no-op once the rollback went
//! through.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use shared::{ArtifactKind, DateWindow, DocumentDate, DocumentKind, ListFilter};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Transaction};

use crate::error::{AppError, AppResult};
use crate::services::artifact;
use crate::services::renderer::{render_blocking, DocumentRenderer, RenderPayload};

/// Identity lookup and physical removal for one document type
#[axum::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Identity tuple of a header
    type Identity: std::fmt::Debug + Send + Sync;

    fn kind(&self) -> DocumentKind;

    /// Id of the live header matching `identity`
    async fn find_identity(
        &self,
        conn: &mut PgConnection,
        identity: &Self::Identity,
    ) -> AppResult<Option<i32>>;

    /// Physically remove every line row of header `id`
    async fn hard_delete_lines(&self, conn: &mut PgConnection, id: i32) -> AppResult<()>;

    /// Header table name
    fn table(&self) -> &'static str;

    /// Remove the header matching `identity` and all its lines. Returns
    /// whether anything was found.
    async fn absolute_delete(
        &self,
        conn: &mut PgConnection,
        identity: &Self::Identity,
    ) -> AppResult<bool> {
        let Some(id) = self.find_identity(&mut *conn, identity).await? else {
            return Ok(false);
        };
        self.hard_delete_lines(&mut *conn, id).await?;
        sqlx::query(&format!("DELETE FROM {} WHERE id = $1", self.table()))
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(true)
    }

    /// Fail with `DuplicateDocument` when the identity is already taken
    async fn ensure_absent(
        &self,
        conn: &mut PgConnection,
        identity: &Self::Identity,
    ) -> AppResult<()> {
        if self.find_identity(conn, identity).await?.is_some() {
            return Err(AppError::DuplicateDocument(format!(
                "{} {:?}",
                self.kind().entity(),
                identity
            )));
        }
        Ok(())
    }

    /// Re-read the header id after insert. A miss removes whatever was
    /// written and fails with `HeaderNotPersisted`.
    async fn persisted_id(
        &self,
        conn: &mut PgConnection,
        identity: &Self::Identity,
    ) -> AppResult<i32> {
        match self.find_identity(&mut *conn, identity).await? {
            Some(id) => Ok(id),
            None => {
                self.absolute_delete(&mut *conn, identity).await?;
                Err(AppError::HeaderNotPersisted(self.kind().entity().to_string()))
            }
        }
    }
}

/// Run the compensating absolute delete after a failed command and hand the
/// original error back
pub async fn compensate<S: DocumentStore>(
    store: &S,
    db: &PgPool,
    identity: &S::Identity,
    err: AppError,
) -> AppError {
    let entity = store.kind().entity();
    tracing::warn!("{} {:?} failed, compensating: {}", entity, identity, err);

    let result = match db.acquire().await {
        Ok(mut conn) => store.absolute_delete(&mut conn, identity).await,
        Err(e) => Err(AppError::from(e)),
    };
    match result {
        Ok(true) => tracing::warn!("{} {:?} absolutely deleted", entity, identity),
        Ok(false) => tracing::debug!("{} {:?} left nothing behind", entity, identity),
        Err(e) => tracing::error!("absolute delete of {} {:?} failed: {}", entity, identity, e),
    }
    err
}

/// Roll the command's transaction back, then compensate
pub async fn abort<S: DocumentStore>(
    tx: Transaction<'_, Postgres>,
    store: &S,
    db: &PgPool,
    identity: &S::Identity,
    err: AppError,
) -> AppError {
    if let Err(e) = tx.rollback().await {
        tracing::error!("rollback of {} failed: {}", store.kind().entity(), e);
    }
    compensate(store, db, identity, err).await
}

/// Timestamp of a `YYYY-MM-DD -0700MST` document date: midnight in the
/// client's offset
pub fn document_timestamp(raw: &str) -> AppResult<DateTime<FixedOffset>> {
    Ok(DocumentDate::parse(raw)?.start()?)
}

/// Tombstone header `id` of `table`
pub async fn soft_delete(
    conn: &mut PgConnection,
    table: &str,
    id: i32,
    actor_id: i32,
) -> AppResult<()> {
    let result = sqlx::query(&format!(
        "UPDATE {} SET deleted_at = NOW(), deleted_by_user_id = $1 \
         WHERE id = $2 AND deleted_at IS NULL",
        table
    ))
    .bind(actor_id)
    .bind(id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("{} id {}", table, id)));
    }
    Ok(())
}

/// `COUNT(*)` of live headers, the basis of next-number hints
pub async fn live_count(db: &PgPool, table: &str) -> AppResult<i64> {
    let count = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {} WHERE deleted_at IS NULL",
        table
    ))
    .fetch_one(db)
    .await?;
    Ok(count)
}

/// Name, render and attach the header artifact of a committed document
pub async fn publish(
    db: &PgPool,
    renderer: &Arc<dyn DocumentRenderer>,
    id: i32,
    payload: &RenderPayload,
) -> AppResult<String> {
    let mut conn = db.acquire().await?;
    let name = artifact::name_for(&mut conn, payload.kind).await?;
    render_blocking(Arc::clone(renderer), payload.clone(), name.clone()).await?;
    artifact::update_pdf_url(&mut conn, payload.kind, id, &name).await?;
    tracing::info!("{} #{} rendered to {}", payload.kind.directory(), id, name);
    Ok(name)
}

/// Read an artifact back from the renderer's directory
pub async fn artifact_bytes(
    renderer: &Arc<dyn DocumentRenderer>,
    kind: ArtifactKind,
    name: &str,
) -> AppResult<Vec<u8>> {
    let path = renderer.path_of(kind, name);
    tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::Storage(format!("{}: {}", path.display(), e)))
}

/// Value bound as `$3` of a list condition
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Int(i32),
    Text(String),
    Bool(bool),
}

/// Extra `WHERE` condition on top of the date window
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub sql: &'static str,
    pub value: FilterValue,
}

impl Condition {
    pub fn int(sql: &'static str, value: i32) -> Self {
        Self {
            sql,
            value: FilterValue::Int(value),
        }
    }

    pub fn text(sql: &'static str, value: &str) -> Self {
        Self {
            sql,
            value: FilterValue::Text(value.to_string()),
        }
    }

    pub fn flag(sql: &'static str, value: bool) -> Self {
        Self {
            sql,
            value: FilterValue::Bool(value),
        }
    }
}

/// Query shape shared by the list endpoints. `select` aliases the header as
/// `h` and joins the creator as `u`.
pub struct ListQuery {
    pub select: &'static str,
    pub date_column: &'static str,
}

impl ListQuery {
    fn sql(&self, condition: Option<&Condition>) -> String {
        let mut sql = format!(
            "{} WHERE h.deleted_at IS NULL AND h.{} BETWEEN $1 AND $2",
            self.select, self.date_column
        );
        if let Some(c) = condition {
            sql.push_str(" AND ");
            sql.push_str(c.sql);
        }
        sql.push_str(&format!(" ORDER BY h.{} DESC, h.id DESC", self.date_column));
        sql
    }

    async fn fetch<T>(
        &self,
        db: &PgPool,
        window: &DateWindow,
        condition: Option<&Condition>,
    ) -> AppResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let sql = self.sql(condition);
        let mut query = sqlx::query_as::<_, T>(&sql).bind(window.start).bind(window.end);
        if let Some(c) = condition {
            query = match &c.value {
                FilterValue::Int(v) => query.bind(*v),
                FilterValue::Text(v) => query.bind(v.clone()),
                FilterValue::Bool(v) => query.bind(*v),
            };
        }
        Ok(query.fetch_all(db).await?)
    }

    /// Headers inside `window` matching `filter`. `all`, `id`, `number` and
    /// `user` are common; `specific` maps the kind's own filters.
    pub async fn run<T>(
        &self,
        db: &PgPool,
        window: &DateWindow,
        filter: &ListFilter,
        specific: fn(&ListFilter) -> Option<Condition>,
    ) -> AppResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let condition = match filter {
            ListFilter::All => None,
            ListFilter::Id(id) => Some(Condition::int("h.id = $3", *id)),
            ListFilter::User(name) => Some(Condition::text("u.name = $3", name)),
            ListFilter::Number(_) => {
                let Some((exact, pattern)) = number_filter(filter) else {
                    return Err(filter.unsupported().into());
                };
                if let Some(number) = exact {
                    let rows = self
                        .fetch(db, window, Some(&Condition::int("h.number = $3", number)))
                        .await?;
                    if !rows.is_empty() {
                        return Ok(rows);
                    }
                }
                Some(Condition::text("h.number::TEXT ILIKE $3 ESCAPE '\\'", &pattern))
            }
            other => Some(specific(other).ok_or_else(|| AppError::from(other.unsupported()))?),
        };
        self.fetch(db, window, condition.as_ref()).await
    }
}

/// Split a document-number filter into its exact value and fuzzy pattern
pub fn number_filter(filter: &ListFilter) -> Option<(Option<i32>, String)> {
    match filter {
        ListFilter::Number(raw) => Some((raw.trim().parse().ok(), shared::fuzzy_pattern(raw))),
        _ => None,
    }
}

/// Result of a committed document command
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOutcome {
    pub id: i32,
    pub number: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub eticket_pdf_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_pdf_url: Option<String>,
    /// Error-log names of side effects that failed after commit
    #[serde(skip)]
    pub logs: Vec<String>,
}

impl DocumentOutcome {
    pub fn new(id: i32, number: i32) -> Self {
        Self {
            id,
            number,
            pdf_url: None,
            eticket_pdf_urls: Vec::new(),
            receipt_pdf_url: None,
            logs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_filter_keeps_exact_and_fuzzy_forms() {
        let (exact, pattern) = number_filter(&ListFilter::Number("42".to_string())).unwrap();
        assert_eq!(exact, Some(42));
        assert_eq!(pattern, "%4%2%");

        let (exact, pattern) = number_filter(&ListFilter::Number("4x".to_string())).unwrap();
        assert_eq!(exact, None);
        assert_eq!(pattern, "%4%x%");

        let (exact, pattern) = number_filter(&ListFilter::Number("%".to_string())).unwrap();
        assert_eq!(exact, None);
        assert_eq!(pattern, r"%\%%");

        assert!(number_filter(&ListFilter::All).is_none());
    }

    #[test]
    fn test_list_sql_appends_condition_before_order() {
        let query = ListQuery {
            select: "SELECT h.id FROM productions h JOIN users u ON u.id = h.user_id",
            date_column: "production_date",
        };
        let cond = Condition::flag("h.updated_to_stock = $3", true);
        let sql = query.sql(Some(&cond));
        assert!(sql.contains(
            "h.production_date BETWEEN $1 AND $2 AND h.updated_to_stock = $3 ORDER BY"
        ));
        assert!(!query.sql(None).contains("$3"));
    }

    #[test]
    fn test_document_timestamp_is_midnight_in_offset() {
        let ts = document_timestamp("2024-03-01 +0700WIB").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T00:00:00+07:00");
        assert!(document_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_outcome_hides_logs() {
        let mut outcome = DocumentOutcome::new(3, 7);
        outcome.logs.push("x.log".to_string());
        let body = serde_json::to_value(&outcome).unwrap();
        assert_eq!(body["id"], 3);
        assert!(body.get("logs").is_none());
        assert!(body.get("pdfUrl").is_none());
    }
}
