//! Domain errors raised by the pure stock and document rules

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("unknown unit name for {medicine}")]
    UnknownUnitForMedicine { medicine: String },

    #[error("received {medicine} would be {received}, larger than ordered {ordered}")]
    ReceivedExceedsOrdered {
        medicine: String,
        received: Decimal,
        ordered: Decimal,
    },

    #[error("received {medicine} would go below zero ({received})")]
    ReceivedWouldGoNegative { medicine: String, received: Decimal },

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid list filter: {0}")]
    InvalidListFilter(String),
}

impl DomainError {
    /// Stable machine-readable code used in response envelopes
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::UnknownUnitForMedicine { .. } => "UNKNOWN_UNIT_FOR_MEDICINE",
            DomainError::ReceivedExceedsOrdered { .. } => "RECEIVED_EXCEEDS_ORDERED",
            DomainError::ReceivedWouldGoNegative { .. } => "RECEIVED_WOULD_GO_NEGATIVE",
            DomainError::InvalidQuantity(_) => "INVALID_QUANTITY",
            DomainError::InvalidDate(_) => "INVALID_DATE",
            DomainError::InvalidListFilter(_) => "INVALID_LIST_FILTER",
        }
    }

    /// Payload-shaped errors are the caller's fault, the rest are rule violations
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidQuantity(_)
                | DomainError::InvalidDate(_)
                | DomainError::InvalidListFilter(_)
        )
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
