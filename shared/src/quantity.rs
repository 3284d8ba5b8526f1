//! Line quantities written as decimals or simple fractions

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{DomainError, DomainResult};

/// Parse a dispensed quantity such as `"2"`, `"0.25"` or `"1/2"`.
///
/// Fractions are `numerator/denominator` with optional whitespace around
/// either side. A zero denominator is rejected.
pub fn parse_quantity(raw: &str) -> DomainResult<Decimal> {
    let raw = raw.trim();
    let invalid = || DomainError::InvalidQuantity(raw.to_string());

    match raw.split_once('/') {
        None => Decimal::from_str(raw).map_err(|_| invalid()),
        Some((numerator, denominator)) => {
            let numerator = Decimal::from_str(numerator.trim()).map_err(|_| invalid())?;
            let denominator = Decimal::from_str(denominator.trim()).map_err(|_| invalid())?;
            numerator.checked_div(denominator).ok_or_else(invalid)
        }
    }
}

/// Parse and require a strictly positive quantity
pub fn parse_positive_quantity(raw: &str) -> DomainResult<Decimal> {
    let qty = parse_quantity(raw)?;
    if qty <= Decimal::ZERO {
        return Err(DomainError::InvalidQuantity(raw.trim().to_string()));
    }
    Ok(qty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_plain_numbers() {
        assert_eq!(parse_quantity("5").unwrap(), dec("5"));
        assert_eq!(parse_quantity(" 0.25 ").unwrap(), dec("0.25"));
    }

    #[test]
    fn test_fractions() {
        assert_eq!(parse_quantity("1/2").unwrap(), dec("0.5"));
        assert_eq!(parse_quantity(" 3 / 4 ").unwrap(), dec("0.75"));
    }

    #[test]
    fn test_zero_denominator() {
        assert!(parse_quantity("1/0").is_err());
    }

    #[test]
    fn test_garbage() {
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("abc").is_err());
        assert!(parse_quantity("1/2/3").is_err());
    }

    #[test]
    fn test_positive_required() {
        assert!(parse_positive_quantity("0").is_err());
        assert!(parse_positive_quantity("-1").is_err());
        assert!(parse_positive_quantity("1/4").is_ok());
    }
}
