//! Stock engine applied to the medicine table
//!
//! Every balance change goes through here: the medicine row is locked, the
//! line quantity is converted to first-unit terms and the new balance is
//! written back with the acting user. Callers hold the transaction.

use rust_decimal::Decimal;
use shared::{first_shortfall, MedicineStock, MedicineUnits, StockDirection, StockRequirement};
use sqlx::{FromRow, PgConnection};

use crate::error::{AppError, AppResult};

#[derive(Debug, FromRow)]
struct StockRow {
    id: i32,
    name: String,
    qty: Decimal,
    first_unit_id: i32,
    second_unit_id: Option<i32>,
    second_unit_to_first_unit_ratio: Decimal,
    third_unit_id: Option<i32>,
    third_unit_to_first_unit_ratio: Decimal,
}

impl From<StockRow> for MedicineStock {
    fn from(row: StockRow) -> Self {
        MedicineStock {
            id: row.id,
            name: row.name,
            qty: row.qty,
            units: MedicineUnits {
                first_unit_id: row.first_unit_id,
                second_unit_id: row.second_unit_id,
                second_unit_to_first_unit_ratio: row.second_unit_to_first_unit_ratio,
                third_unit_id: row.third_unit_id,
                third_unit_to_first_unit_ratio: row.third_unit_to_first_unit_ratio,
            },
        }
    }
}

/// A stored document line as far as stock is concerned
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StockLine {
    pub medicine_id: i32,
    pub unit_id: i32,
    pub qty: Decimal,
}

impl StockLine {
    /// Requirement taking this line out of stock
    pub fn outflow(&self) -> StockRequirement {
        StockRequirement {
            medicine_id: self.medicine_id,
            unit_id: self.unit_id,
            qty: self.qty,
        }
    }

    /// Requirement putting this line into stock, offsetting outflows
    pub fn inflow(&self) -> StockRequirement {
        StockRequirement {
            medicine_id: self.medicine_id,
            unit_id: self.unit_id,
            qty: -self.qty,
        }
    }
}

const STOCK_COLUMNS: &str = "id, name, qty, first_unit_id, second_unit_id, \
     second_unit_to_first_unit_ratio, third_unit_id, third_unit_to_first_unit_ratio";

pub struct StockEngine;

impl StockEngine {
    /// Lock a live medicine by id
    pub async fn lock(conn: &mut PgConnection, medicine_id: i32) -> AppResult<MedicineStock> {
        let row = sqlx::query_as::<_, StockRow>(&format!(
            "SELECT {} FROM medicines WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
            STOCK_COLUMNS
        ))
        .bind(medicine_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::ReferenceNotFound(format!("medicine id {}", medicine_id)))?;
        Ok(row.into())
    }

    /// Lock a live medicine by the barcode and name a document line carries
    pub async fn lock_by_barcode(
        conn: &mut PgConnection,
        barcode: &str,
        name: &str,
    ) -> AppResult<MedicineStock> {
        let row = sqlx::query_as::<_, StockRow>(&format!(
            "SELECT {} FROM medicines WHERE barcode = $1 AND deleted_at IS NULL FOR UPDATE",
            STOCK_COLUMNS
        ))
        .bind(barcode)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::ReferenceNotFound(format!("medicine {} ({})", name, barcode)))?;
        Ok(row.into())
    }

    /// Write an absolute balance
    pub async fn update_stock(
        conn: &mut PgConnection,
        medicine_id: i32,
        new_qty: Decimal,
        actor_id: i32,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE medicines
            SET qty = $1, last_modified = NOW(), last_modified_by_user_id = $2
            WHERE id = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(new_qty)
        .bind(actor_id)
        .bind(medicine_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Move `qty` of `unit_id` in `direction`, re-reading the locked row so
    /// several lines against the same medicine accumulate.
    ///
    /// Taking stock out never refuses a negative balance; use
    /// [`StockEngine::preflight`] first.
    pub async fn apply(
        conn: &mut PgConnection,
        medicine_id: i32,
        unit_id: i32,
        qty: Decimal,
        direction: StockDirection,
        actor_id: i32,
    ) -> AppResult<Decimal> {
        let medicine = Self::lock(&mut *conn, medicine_id).await?;
        let new_qty = medicine.balance_after(unit_id, qty, direction)?;
        Self::update_stock(&mut *conn, medicine.id, new_qty, actor_id).await?;
        tracing::debug!(
            "stock {} {:?} {} (unit {}): {} -> {}",
            medicine.name,
            direction,
            qty,
            unit_id,
            medicine.qty,
            new_qty
        );
        Ok(new_qty)
    }

    pub async fn add(
        conn: &mut PgConnection,
        medicine_id: i32,
        unit_id: i32,
        qty: Decimal,
        actor_id: i32,
    ) -> AppResult<Decimal> {
        Self::apply(conn, medicine_id, unit_id, qty, StockDirection::In, actor_id).await
    }

    pub async fn subtract(
        conn: &mut PgConnection,
        medicine_id: i32,
        unit_id: i32,
        qty: Decimal,
        actor_id: i32,
    ) -> AppResult<Decimal> {
        Self::apply(conn, medicine_id, unit_id, qty, StockDirection::Out, actor_id).await
    }

    /// `true` when the medicine's balance covers `qty` of `unit_id`
    pub async fn check_sufficient(
        conn: &mut PgConnection,
        medicine_id: i32,
        unit_id: i32,
        qty: Decimal,
    ) -> AppResult<bool> {
        let medicine = Self::lock(conn, medicine_id).await?;
        Ok(medicine.is_sufficient(unit_id, qty)?)
    }

    /// Refuse a set of movements before any of them is applied. Lines against
    /// the same medicine are netted together; a negative quantity is an
    /// inflow.
    pub async fn preflight(
        conn: &mut PgConnection,
        requirements: &[StockRequirement],
    ) -> AppResult<()> {
        let mut ids: Vec<i32> = requirements.iter().map(|r| r.medicine_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut medicines = Vec::with_capacity(ids.len());
        for id in ids {
            medicines.push(Self::lock(&mut *conn, id).await?);
        }

        Self::refuse_shortfall(&medicines, requirements)
    }

    /// `InsufficientStock` for the first medicine the requirements overdraw
    pub fn refuse_shortfall(
        medicines: &[MedicineStock],
        requirements: &[StockRequirement],
    ) -> AppResult<()> {
        if let Some((medicine, needed)) = first_shortfall(medicines, requirements)? {
            return Err(AppError::InsufficientStock {
                medicine: medicine.name.clone(),
                needed,
                available: medicine.qty,
            });
        }
        Ok(())
    }
}
