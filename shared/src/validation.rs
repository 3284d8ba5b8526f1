//! Validation utilities for pharmacy documents and master data

use chrono::NaiveDate;
use rust_decimal::Decimal;

// ============================================================================
// Document Validations
// ============================================================================

/// One currency minor unit, the tolerance for total checks
pub fn total_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// Validate that line subtotals add up to the document total within one
/// minor unit
pub fn validate_line_totals(subtotals: &[Decimal], total: Decimal) -> Result<(), &'static str> {
    let sum: Decimal = subtotals.iter().sum();
    if (sum - total).abs() > total_tolerance() {
        return Err("Sum of line subtotals does not match the document total");
    }
    Ok(())
}

/// Validate a purchase line expiry date; expiring today is still accepted
pub fn validate_expiry_date(expired: NaiveDate, today: NaiveDate) -> Result<(), &'static str> {
    if expired < today {
        return Err("Expiry date is already past");
    }
    Ok(())
}

/// Validate a unit-to-first-unit ratio
pub fn validate_unit_ratio(ratio: Decimal) -> Result<(), &'static str> {
    if ratio < Decimal::ZERO {
        return Err("Unit ratio cannot be negative");
    }
    Ok(())
}

/// Validate a document number
pub fn validate_document_number(number: i32) -> Result<(), &'static str> {
    if number <= 0 {
        return Err("Document number must be positive");
    }
    Ok(())
}

/// Validate a money amount
pub fn validate_amount(amount: Decimal) -> Result<(), &'static str> {
    if amount < Decimal::ZERO {
        return Err("Amount cannot be negative");
    }
    Ok(())
}

/// Validate a percentage in 0..=100
pub fn validate_percentage(pct: Decimal) -> Result<(), &'static str> {
    if pct < Decimal::ZERO || pct > Decimal::from(100) {
        return Err("Percentage must be between 0 and 100");
    }
    Ok(())
}

/// E-ticket label sizes that can be printed
pub fn validate_eticket_size(size: &str) -> Result<(), &'static str> {
    match size {
        "7x4" | "7x5" => Ok(()),
        _ => Err("Unknown eticket size, expected 7x4 or 7x5"),
    }
}

// ============================================================================
// Master Data Validations
// ============================================================================

/// Normalize a unit name: trimmed and uppercased
pub fn normalize_unit_name(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Empty or `NONE` unit names mean "slot not used"
pub fn is_unused_unit_name(raw: &str) -> bool {
    let name = normalize_unit_name(raw);
    name.is_empty() || name == "NONE"
}

/// Validate a barcode (non-empty, no whitespace)
pub fn validate_barcode(barcode: &str) -> Result<(), &'static str> {
    if barcode.is_empty() {
        return Err("Barcode cannot be empty");
    }
    if barcode.chars().any(char::is_whitespace) {
        return Err("Barcode cannot contain whitespace");
    }
    Ok(())
}

/// Validate phone number (digits with optional leading +, spaces and dashes)
pub fn validate_phone_number(phone: &str) -> Result<(), &'static str> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let allowed = phone
        .chars()
        .enumerate()
        .all(|(i, c)| c.is_ascii_digit() || c == ' ' || c == '-' || (i == 0 && c == '+'));

    if !allowed {
        return Err("Phone number contains invalid characters");
    }
    if digits.len() < 6 || digits.len() > 15 {
        return Err("Phone number must have 6 to 15 digits");
    }
    Ok(())
}

/// Validate a password
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.chars().count() < 6 {
        return Err("Password must be at least 6 characters");
    }
    Ok(())
}
