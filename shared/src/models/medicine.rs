//! Medicine stock view used by unit conversion

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The three unit slots of a medicine.
///
/// Stock is always held in the first unit. The second and third slots are
/// optional and carry their ratio to the first unit (`1 BOX = 10 TAB` is a
/// ratio of 10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicineUnits {
    pub first_unit_id: i32,
    pub second_unit_id: Option<i32>,
    pub second_unit_to_first_unit_ratio: Decimal,
    pub third_unit_id: Option<i32>,
    pub third_unit_to_first_unit_ratio: Decimal,
}

impl MedicineUnits {
    /// A medicine that only knows its first unit
    pub fn single(first_unit_id: i32) -> Self {
        Self {
            first_unit_id,
            second_unit_id: None,
            second_unit_to_first_unit_ratio: Decimal::ZERO,
            third_unit_id: None,
            third_unit_to_first_unit_ratio: Decimal::ZERO,
        }
    }

    pub fn with_second(mut self, unit_id: i32, ratio: Decimal) -> Self {
        self.second_unit_id = Some(unit_id);
        self.second_unit_to_first_unit_ratio = ratio;
        self
    }

    pub fn with_third(mut self, unit_id: i32, ratio: Decimal) -> Self {
        self.third_unit_id = Some(unit_id);
        self.third_unit_to_first_unit_ratio = ratio;
        self
    }

    /// Ratio of `unit_id` to the first unit, `None` when the medicine does not use it.
    ///
    /// Slots are checked first, second, third; the first match wins.
    pub fn ratio_of(&self, unit_id: i32) -> Option<Decimal> {
        if unit_id == self.first_unit_id {
            Some(Decimal::ONE)
        } else if self.second_unit_id == Some(unit_id) {
            Some(self.second_unit_to_first_unit_ratio)
        } else if self.third_unit_id == Some(unit_id) {
            Some(self.third_unit_to_first_unit_ratio)
        } else {
            None
        }
    }
}

/// A medicine's identity, current balance and unit layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicineStock {
    pub id: i32,
    pub name: String,
    /// Balance in first-unit terms
    pub qty: Decimal,
    pub units: MedicineUnits,
}
