//! Stock arithmetic in first-unit terms
//!
//! A line quantity is expressed in whatever unit the document line uses. Before
//! it touches a medicine's balance it is converted to the medicine's first unit
//! through the slot ratios. A ratio of zero converts everything to zero, it
//! never divides.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::models::{MedicineStock, MedicineUnits};

/// Direction of a stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockDirection {
    In,
    Out,
}

impl StockDirection {
    pub fn reversed(&self) -> Self {
        match self {
            StockDirection::In => StockDirection::Out,
            StockDirection::Out => StockDirection::In,
        }
    }
}

impl MedicineUnits {
    /// Convert `qty` expressed in `unit_id` to first-unit terms
    pub fn to_first_unit(&self, unit_id: i32, qty: Decimal) -> Option<Decimal> {
        self.ratio_of(unit_id).map(|ratio| qty * ratio)
    }

    /// Convert a first-unit quantity back to `unit_id`
    pub fn from_first_unit(&self, unit_id: i32, qty: Decimal) -> Option<Decimal> {
        self.ratio_of(unit_id).map(|ratio| {
            if ratio.is_zero() {
                Decimal::ZERO
            } else {
                qty / ratio
            }
        })
    }
}

impl MedicineStock {
    /// Convert a line quantity to first-unit terms, failing on a unit the
    /// medicine does not carry
    pub fn to_first_unit(&self, unit_id: i32, qty: Decimal) -> DomainResult<Decimal> {
        self.units
            .to_first_unit(unit_id, qty)
            .ok_or_else(|| DomainError::UnknownUnitForMedicine {
                medicine: self.name.clone(),
            })
    }

    pub fn from_first_unit(&self, unit_id: i32, qty: Decimal) -> DomainResult<Decimal> {
        self.units
            .from_first_unit(unit_id, qty)
            .ok_or_else(|| DomainError::UnknownUnitForMedicine {
                medicine: self.name.clone(),
            })
    }

    /// Balance after moving `qty` of `unit_id` in `direction`.
    ///
    /// Negative results are returned as-is; callers guard with
    /// [`MedicineStock::is_sufficient`] before taking stock out.
    pub fn balance_after(
        &self,
        unit_id: i32,
        qty: Decimal,
        direction: StockDirection,
    ) -> DomainResult<Decimal> {
        let q1 = self.to_first_unit(unit_id, qty)?;
        Ok(match direction {
            StockDirection::In => self.qty + q1,
            StockDirection::Out => self.qty - q1,
        })
    }

    /// `true` when the balance covers `qty` of `unit_id` (equality allowed)
    pub fn is_sufficient(&self, unit_id: i32, qty: Decimal) -> DomainResult<bool> {
        Ok(self.qty >= self.to_first_unit(unit_id, qty)?)
    }

    /// Apply a movement to this in-memory view and return the new balance
    pub fn apply(
        &mut self,
        unit_id: i32,
        qty: Decimal,
        direction: StockDirection,
    ) -> DomainResult<Decimal> {
        self.qty = self.balance_after(unit_id, qty, direction)?;
        Ok(self.qty)
    }
}

/// One requested movement against a medicine, used for preflight checks
#[derive(Debug, Clone, PartialEq)]
pub struct StockRequirement {
    pub medicine_id: i32,
    pub unit_id: i32,
    pub qty: Decimal,
}

/// Find the first medicine whose combined outgoing requirement exceeds its
/// balance. Requirements against the same medicine are summed in first-unit
/// terms, so two lines of 3 against a balance of 5 fail together.
pub fn first_shortfall<'a>(
    medicines: &'a [MedicineStock],
    requirements: &[StockRequirement],
) -> DomainResult<Option<(&'a MedicineStock, Decimal)>> {
    for medicine in medicines {
        let mut needed = Decimal::ZERO;
        for req in requirements.iter().filter(|r| r.medicine_id == medicine.id) {
            needed += medicine.to_first_unit(req.unit_id, req.qty)?;
        }
        if needed > medicine.qty {
            return Ok(Some((medicine, needed)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    const TAB: i32 = 1;
    const BOX: i32 = 2;
    const STRIP: i32 = 3;
    const BOTTLE: i32 = 4;

    fn paracetamol(qty: &str) -> MedicineStock {
        MedicineStock {
            id: 7,
            name: "PARACETAMOL-500".to_string(),
            qty: dec(qty),
            units: MedicineUnits::single(TAB)
                .with_second(BOX, dec("10"))
                .with_third(STRIP, dec("4")),
        }
    }

    #[test]
    fn test_first_unit_is_identity() {
        let med = paracetamol("0");
        assert_eq!(med.to_first_unit(TAB, dec("12.5")).unwrap(), dec("12.5"));
    }

    #[test]
    fn test_second_and_third_units_use_ratio() {
        let med = paracetamol("0");
        assert_eq!(med.to_first_unit(BOX, dec("5")).unwrap(), dec("50"));
        assert_eq!(med.to_first_unit(STRIP, dec("0.5")).unwrap(), dec("2"));
    }

    #[test]
    fn test_unknown_unit_is_rejected() {
        let med = paracetamol("0");
        let err = med.to_first_unit(BOTTLE, dec("1")).unwrap_err();
        assert_eq!(
            err,
            DomainError::UnknownUnitForMedicine {
                medicine: "PARACETAMOL-500".to_string()
            }
        );
    }

    #[test]
    fn test_zero_ratio_contributes_nothing() {
        let mut med = paracetamol("10");
        med.units.second_unit_to_first_unit_ratio = Decimal::ZERO;
        assert_eq!(med.balance_after(BOX, dec("3"), StockDirection::In).unwrap(), dec("10"));
        assert_eq!(med.from_first_unit(BOX, dec("30")).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_subtract_does_not_refuse_negative() {
        let med = paracetamol("4");
        assert_eq!(
            med.balance_after(TAB, dec("5"), StockDirection::Out).unwrap(),
            dec("-1")
        );
    }

    #[test]
    fn test_sufficiency_allows_equality() {
        let med = paracetamol("50");
        assert!(med.is_sufficient(BOX, dec("5")).unwrap());
        assert!(!med.is_sufficient(BOX, dec("5.1")).unwrap());
    }

    #[test]
    fn test_first_shortfall_sums_lines_per_medicine() {
        let meds = vec![paracetamol("5")];
        let tablets = |qty: &str| StockRequirement {
            medicine_id: 7,
            unit_id: TAB,
            qty: dec(qty),
        };
        let reqs = vec![tablets("3"), tablets("3")];
        let (med, needed) = first_shortfall(&meds, &reqs).unwrap().unwrap();
        assert_eq!(med.id, 7);
        assert_eq!(needed, dec("6"));

        let reqs = vec![tablets("5")];
        assert!(first_shortfall(&meds, &reqs).unwrap().is_none());
    }

    #[test]
    fn test_direction_reversal() {
        assert_eq!(StockDirection::In.reversed(), StockDirection::Out);
        assert_eq!(StockDirection::Out.reversed(), StockDirection::In);
    }
}
