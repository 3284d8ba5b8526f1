//! Purchase order received-quantity reconciliation
//!
//! When a purchase invoice linked to a purchase order is created, modified or
//! deleted, the matching order line's `received_qty` moves with it. Both the
//! stored received quantity and the incoming invoice quantity are compared in
//! first-unit terms; the result is stored back in the order line's own unit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::models::MedicineStock;

/// Whether an invoice line is being received or reverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptDirection {
    Receive,
    Revert,
}

/// The reconcilable state of one purchase order line
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLineState {
    pub medicine_id: i32,
    pub order_qty: Decimal,
    pub received_qty: Decimal,
    /// Unit both `order_qty` and `received_qty` are stored in
    pub unit_id: i32,
}

/// Compute the new `received_qty` for `line` after applying an invoice line of
/// `qty` in `unit_id`.
///
/// Returns `Ok(None)` when nothing changes: reverting a line that has received
/// nothing yet.
pub fn reconcile_received(
    line: &OrderLineState,
    medicine: &MedicineStock,
    unit_id: i32,
    qty: Decimal,
    direction: ReceiptDirection,
) -> DomainResult<Option<Decimal>> {
    if direction == ReceiptDirection::Revert && line.received_qty.is_zero() {
        return Ok(None);
    }

    let previous = medicine.to_first_unit(line.unit_id, line.received_qty)?;
    let ordered = medicine.to_first_unit(line.unit_id, line.order_qty)?;
    let delta = medicine.to_first_unit(unit_id, qty)?;

    let received = match direction {
        ReceiptDirection::Receive => {
            let received = previous + delta;
            if received > ordered {
                return Err(DomainError::ReceivedExceedsOrdered {
                    medicine: medicine.name.clone(),
                    received,
                    ordered,
                });
            }
            received
        }
        ReceiptDirection::Revert => {
            let received = previous - delta;
            if received < Decimal::ZERO {
                return Err(DomainError::ReceivedWouldGoNegative {
                    medicine: medicine.name.clone(),
                    received,
                });
            }
            received
        }
    };

    medicine.from_first_unit(line.unit_id, received).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MedicineUnits;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    const TAB: i32 = 1;
    const BOX: i32 = 2;

    fn medicine() -> MedicineStock {
        MedicineStock {
            id: 3,
            name: "PARACETAMOL-500".to_string(),
            qty: Decimal::ZERO,
            units: MedicineUnits::single(TAB).with_second(BOX, dec("10")),
        }
    }

    fn line(order: &str, received: &str, unit_id: i32) -> OrderLineState {
        OrderLineState {
            medicine_id: 3,
            order_qty: dec(order),
            received_qty: dec(received),
            unit_id,
        }
    }

    fn receive(line: &OrderLineState, unit_id: i32, qty: &str) -> DomainResult<Option<Decimal>> {
        reconcile_received(line, &medicine(), unit_id, dec(qty), ReceiptDirection::Receive)
    }

    fn revert(line: &OrderLineState, unit_id: i32, qty: &str) -> DomainResult<Option<Decimal>> {
        reconcile_received(line, &medicine(), unit_id, dec(qty), ReceiptDirection::Revert)
    }

    #[test]
    fn test_receive_in_other_unit() {
        let result = receive(&line("100", "0", TAB), BOX, "5").unwrap();
        assert_eq!(result, Some(dec("50")));
    }

    #[test]
    fn test_receive_exactly_ordered_is_allowed() {
        let result = receive(&line("100", "50", TAB), BOX, "5").unwrap();
        assert_eq!(result, Some(dec("100")));
    }

    #[test]
    fn test_over_receipt_is_rejected() {
        let err = receive(&line("100", "0", TAB), BOX, "11").unwrap_err();
        assert!(matches!(err, DomainError::ReceivedExceedsOrdered { .. }));
    }

    #[test]
    fn test_revert_of_nothing_is_noop() {
        let result = revert(&line("100", "0", TAB), BOX, "5").unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_revert_below_zero_is_rejected() {
        let err = revert(&line("100", "20", TAB), BOX, "3").unwrap_err();
        assert!(matches!(err, DomainError::ReceivedWouldGoNegative { .. }));
    }

    #[test]
    fn test_result_is_stored_in_order_line_unit() {
        // Order in boxes, invoice in tablets
        let result = receive(&line("10", "2", BOX), TAB, "30").unwrap();
        assert_eq!(result, Some(dec("5")));
    }
}
