//! Medicine stock conversion tests
//!
//! Tests for the stock rules every document applies:
//! - Unit conversion into and out of the first unit
//! - Per-medicine netting of stock requirements before any write
//! - Apply followed by its reversal restores the balance

use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    first_shortfall, DomainError, MedicineStock, MedicineUnits, StockDirection, StockRequirement,
};
use std::str::FromStr;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

const TAB: i32 = 1;
const BOX: i32 = 2;
const STRIP: i32 = 3;
const CAP: i32 = 4;
const BOT: i32 = 5;

fn paracetamol(qty: &str) -> MedicineStock {
    MedicineStock {
        id: 10,
        name: "PARACETAMOL-500".to_string(),
        qty: dec(qty),
        units: MedicineUnits::single(TAB)
            .with_second(BOX, dec("10"))
            .with_third(STRIP, dec("4")),
    }
}

fn amoxicillin(qty: &str) -> MedicineStock {
    MedicineStock {
        id: 20,
        name: "AMOX500".to_string(),
        qty: dec(qty),
        units: MedicineUnits::single(CAP),
    }
}

fn req(medicine_id: i32, unit_id: i32, qty: &str) -> StockRequirement {
    StockRequirement {
        medicine_id,
        unit_id,
        qty: dec(qty),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_box_converts_through_ratio() {
        let med = paracetamol("0");
        assert_eq!(med.to_first_unit(BOX, dec("5")).unwrap(), dec("50"));
        assert_eq!(med.from_first_unit(BOX, dec("50")).unwrap(), dec("5"));
    }

    #[test]
    fn test_fractional_strip() {
        // half a strip of 4 tablets
        let med = paracetamol("0");
        assert_eq!(med.to_first_unit(STRIP, dec("0.5")).unwrap(), dec("2"));
    }

    #[test]
    fn test_purchase_adds_in_first_unit() {
        let mut med = paracetamol("7");
        let balance = med.apply(BOX, dec("3"), StockDirection::In).unwrap();
        assert_eq!(balance, dec("37"));
        assert_eq!(med.qty, dec("37"));
    }

    #[test]
    fn test_unit_outside_medicine_is_rejected() {
        let mut med = amoxicillin("4");
        let err = med.apply(BOX, dec("1"), StockDirection::Out).unwrap_err();
        assert!(matches!(err, DomainError::UnknownUnitForMedicine { .. }));
        assert_eq!(med.qty, dec("4"));
    }

    #[test]
    fn test_zero_ratio_leaves_stock_unchanged() {
        let mut med = MedicineStock {
            units: MedicineUnits::single(TAB).with_second(BOX, Decimal::ZERO),
            ..paracetamol("12")
        };
        med.apply(BOX, dec("9"), StockDirection::Out).unwrap();
        assert_eq!(med.qty, dec("12"));
    }

    #[test]
    fn test_shortfall_reports_needed_total() {
        let meds = vec![paracetamol("20"), amoxicillin("4")];
        let reqs = vec![req(10, BOX, "1"), req(20, CAP, "5")];

        let (med, needed) = first_shortfall(&meds, &reqs).unwrap().unwrap();
        assert_eq!(med.name, "AMOX500");
        assert_eq!(needed, dec("5"));
    }

    #[test]
    fn test_shortfall_nets_lines_of_same_medicine() {
        // 1 BOX + 6 TAB = 16 > 15
        let meds = vec![paracetamol("15")];
        let reqs = vec![req(10, BOX, "1"), req(10, TAB, "6")];
        let (_, needed) = first_shortfall(&meds, &reqs).unwrap().unwrap();
        assert_eq!(needed, dec("16"));
    }

    #[test]
    fn test_shortfall_accepts_exact_balance() {
        let meds = vec![paracetamol("16")];
        let reqs = vec![req(10, BOX, "1"), req(10, TAB, "6")];
        assert!(first_shortfall(&meds, &reqs).unwrap().is_none());
    }

    #[test]
    fn test_returned_stock_offsets_new_requirement() {
        // a modify returns 5 CAP then takes 8: only 3 more are needed
        let meds = vec![amoxicillin("3")];
        let reqs = vec![req(20, CAP, "-5"), req(20, CAP, "8")];
        assert!(first_shortfall(&meds, &reqs).unwrap().is_none());
    }

    #[test]
    fn test_requirements_for_other_medicines_ignored() {
        let meds = vec![amoxicillin("1")];
        let reqs = vec![req(99, BOT, "100")];
        assert!(first_shortfall(&meds, &reqs).unwrap().is_none());
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn qty_strategy() -> impl Strategy<Value = Decimal> {
        (0i64..100_000).prop_map(|n| Decimal::new(n, 2))
    }

    fn unit_strategy() -> impl Strategy<Value = i32> {
        prop_oneof![Just(TAB), Just(BOX), Just(STRIP)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Applying a line and then its reversal restores the starting balance
        #[test]
        fn prop_apply_then_reverse_is_identity(
            start in qty_strategy(),
            qty in qty_strategy(),
            unit in unit_strategy(),
            out in any::<bool>(),
        ) {
            let mut med = paracetamol("0");
            med.qty = start;
            let direction = if out { StockDirection::Out } else { StockDirection::In };

            med.apply(unit, qty, direction).unwrap();
            med.apply(unit, qty, direction.reversed()).unwrap();

            prop_assert_eq!(med.qty, start);
        }

        /// Converting into the first unit and back returns the original quantity
        #[test]
        fn prop_first_unit_round_trip(qty in qty_strategy(), unit in unit_strategy()) {
            let med = paracetamol("0");
            let first = med.to_first_unit(unit, qty).unwrap();
            prop_assert_eq!(med.from_first_unit(unit, first).unwrap(), qty);
        }

        /// No shortfall exactly when the balance covers the summed requirement
        #[test]
        fn prop_shortfall_matches_sum(
            balance in qty_strategy(),
            lines in prop::collection::vec((unit_strategy(), qty_strategy()), 0..6),
        ) {
            let mut med = paracetamol("0");
            med.qty = balance;
            let reqs: Vec<StockRequirement> = lines
                .iter()
                .map(|(unit, qty)| StockRequirement {
                    medicine_id: 10,
                    unit_id: *unit,
                    qty: *qty,
                })
                .collect();
            let needed: Decimal = lines
                .iter()
                .map(|(unit, qty)| med.to_first_unit(*unit, *qty).unwrap())
                .sum();

            let meds = vec![med];
            let shortfall = first_shortfall(&meds, &reqs).unwrap();
            prop_assert_eq!(shortfall.is_none(), needed <= balance);
        }
    }
}
