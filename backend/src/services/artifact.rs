//! Collision-free artifact names checked against the owning store

use shared::{candidate_artifact_name, ArtifactKind};
use sqlx::PgConnection;

use crate::error::AppResult;

/// Table and column that own the file names of `kind`
fn owner(kind: ArtifactKind) -> (&'static str, &'static str) {
    match kind {
        ArtifactKind::Invoice => ("sales_invoices", "pdf_url"),
        ArtifactKind::Receipt => ("sales_invoices", "receipt_pdf_url"),
        ArtifactKind::PurchaseInvoice => ("purchase_invoices", "pdf_url"),
        ArtifactKind::PurchaseOrder => ("purchase_orders", "pdf_url"),
        ArtifactKind::Prescription => ("prescriptions", "pdf_url"),
        ArtifactKind::Eticket => ("etickets", "pdf_url"),
        ArtifactKind::Production => ("productions", "pdf_url"),
    }
}

/// Whether any row of the owning store already uses `name`, tombstoned rows
/// included
pub async fn is_pdf_url_exist(
    conn: &mut PgConnection,
    kind: ArtifactKind,
    name: &str,
) -> AppResult<bool> {
    let (table, column) = owner(kind);
    let count = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {} WHERE {} = $1",
        table, column
    ))
    .bind(name)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

/// Draw names until one is unused by the owning store
pub async fn name_for(conn: &mut PgConnection, kind: ArtifactKind) -> AppResult<String> {
    loop {
        let name = candidate_artifact_name(kind);
        if !is_pdf_url_exist(&mut *conn, kind, &name).await? {
            return Ok(name);
        }
        tracing::debug!("artifact name {} already taken, drawing again", name);
    }
}

/// Store `name` on the row `id` of the owning store
pub async fn update_pdf_url(
    conn: &mut PgConnection,
    kind: ArtifactKind,
    id: i32,
    name: &str,
) -> AppResult<()> {
    let (table, column) = owner(kind);
    sqlx::query(&format!("UPDATE {} SET {} = $1 WHERE id = $2", table, column))
        .bind(name)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_an_owner() {
        for kind in [
            ArtifactKind::Invoice,
            ArtifactKind::Receipt,
            ArtifactKind::PurchaseInvoice,
            ArtifactKind::PurchaseOrder,
            ArtifactKind::Prescription,
            ArtifactKind::Eticket,
            ArtifactKind::Production,
        ] {
            let (table, column) = owner(kind);
            assert!(!table.is_empty());
            assert!(column.ends_with("pdf_url"));
        }
    }
}
