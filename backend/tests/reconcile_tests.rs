//! Purchase order reconciliation tests
//!
//! Tests for received-quantity tracking on purchase order lines:
//! - Receipts and reverts compared in first-unit terms
//! - Over-receipt and negative received quantities are refused
//! - Received quantity stays within `0..=order_qty`

use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    reconcile_received, DomainError, MedicineStock, MedicineUnits, OrderLineState,
    ReceiptDirection,
};
use std::str::FromStr;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

const TAB: i32 = 1;
const BOX: i32 = 2;

fn paracetamol() -> MedicineStock {
    MedicineStock {
        id: 10,
        name: "PARACETAMOL-500".to_string(),
        qty: Decimal::ZERO,
        units: MedicineUnits::single(TAB).with_second(BOX, dec("10")),
    }
}

fn order_line(order_qty: &str, received_qty: &str, unit_id: i32) -> OrderLineState {
    OrderLineState {
        medicine_id: 10,
        order_qty: dec(order_qty),
        received_qty: dec(received_qty),
        unit_id,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_receive_boxes_against_tablet_order() {
        let line = order_line("100", "0", TAB);
        let received =
            reconcile_received(&line, &paracetamol(), BOX, dec("5"), ReceiptDirection::Receive)
                .unwrap();
        assert_eq!(received, Some(dec("50")));
    }

    #[test]
    fn test_receive_stored_in_order_unit() {
        // order kept in boxes, invoice in tablets
        let line = order_line("10", "2", BOX);
        let received =
            reconcile_received(&line, &paracetamol(), TAB, dec("30"), ReceiptDirection::Receive)
                .unwrap();
        assert_eq!(received, Some(dec("5")));
    }

    #[test]
    fn test_receive_up_to_order_is_accepted() {
        let line = order_line("100", "90", TAB);
        let received =
            reconcile_received(&line, &paracetamol(), BOX, dec("1"), ReceiptDirection::Receive)
                .unwrap();
        assert_eq!(received, Some(dec("100")));
    }

    #[test]
    fn test_over_receipt_is_refused() {
        let line = order_line("100", "0", TAB);
        let err =
            reconcile_received(&line, &paracetamol(), BOX, dec("11"), ReceiptDirection::Receive)
                .unwrap_err();
        assert_eq!(
            err,
            DomainError::ReceivedExceedsOrdered {
                medicine: "PARACETAMOL-500".to_string(),
                received: dec("110"),
                ordered: dec("100"),
            }
        );
    }

    #[test]
    fn test_revert_with_nothing_received_is_noop() {
        let line = order_line("100", "0", TAB);
        let received =
            reconcile_received(&line, &paracetamol(), BOX, dec("5"), ReceiptDirection::Revert)
                .unwrap();
        assert_eq!(received, None);
    }

    #[test]
    fn test_revert_below_zero_is_refused() {
        let line = order_line("100", "20", TAB);
        let err =
            reconcile_received(&line, &paracetamol(), BOX, dec("3"), ReceiptDirection::Revert)
                .unwrap_err();
        assert!(matches!(err, DomainError::ReceivedWouldGoNegative { .. }));
    }

    #[test]
    fn test_revert_returns_remaining() {
        let line = order_line("100", "50", TAB);
        let received =
            reconcile_received(&line, &paracetamol(), BOX, dec("2"), ReceiptDirection::Revert)
                .unwrap();
        assert_eq!(received, Some(dec("30")));
    }

    #[test]
    fn test_partial_box_topped_up_with_tablets() {
        // 1 BOX ordered, 8 TAB received earlier, 2 TAB more fills it
        let line = OrderLineState { received_qty: dec("0.8"), ..order_line("1", "0", BOX) };
        let received =
            reconcile_received(&line, &paracetamol(), TAB, dec("2"), ReceiptDirection::Receive)
                .unwrap();
        assert_eq!(received, Some(dec("1")));
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Whatever sequence of receipts is attempted, received stays within bounds
        #[test]
        fn prop_received_stays_within_order(
            order_qty in 1i64..500,
            receipts in prop::collection::vec((0i64..80, any::<bool>()), 1..12),
        ) {
            let med = paracetamol();
            let mut line = order_line("0", "0", TAB);
            line.order_qty = Decimal::from(order_qty);

            for (qty, revert) in receipts {
                let direction = if revert {
                    ReceiptDirection::Revert
                } else {
                    ReceiptDirection::Receive
                };
                if let Ok(Some(received)) =
                    reconcile_received(&line, &med, TAB, Decimal::from(qty), direction)
                {
                    line.received_qty = received;
                }
                prop_assert!(line.received_qty >= Decimal::ZERO);
                prop_assert!(line.received_qty <= line.order_qty);
            }
        }

        /// Receiving then reverting the same invoice line restores the order line
        #[test]
        fn prop_receive_then_revert_restores(
            order_boxes in 1i64..50,
            received_tabs in 0i64..100,
            boxes in 1i64..50,
        ) {
            prop_assume!(received_tabs <= order_boxes * 10);
            let med = paracetamol();
            let mut line = order_line("0", "0", TAB);
            line.order_qty = Decimal::from(order_boxes * 10);
            line.received_qty = Decimal::from(received_tabs);
            let before = line.received_qty;

            let qty = Decimal::from(boxes);
            if let Some(received) =
                reconcile_received(&line, &med, BOX, qty, ReceiptDirection::Receive)
                    .unwrap_or(None)
            {
                line.received_qty = received;
                let back = reconcile_received(&line, &med, BOX, qty, ReceiptDirection::Revert)
                    .unwrap()
                    .unwrap();
                prop_assert_eq!(back, before);
            }
        }
    }
}
