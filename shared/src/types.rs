//! Common request types: document dates, date windows and list filters

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{DomainError, DomainResult};

/// A calendar date with the client's UTC offset, written `2024-03-01 +0700WIB`.
///
/// The trailing zone abbreviation is informational and ignored. A bare
/// `2024-03-01` is read as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentDate {
    pub date: NaiveDate,
    pub offset: FixedOffset,
}

impl DocumentDate {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let raw = raw.trim();
        let invalid = || DomainError::InvalidDate(raw.to_string());

        let (date_part, zone_part) = match raw.split_once(' ') {
            Some((d, z)) => (d, Some(z.trim())),
            None => (raw, None),
        };

        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| invalid())?;
        let offset = match zone_part {
            Some(zone) if !zone.is_empty() => parse_offset(zone).ok_or_else(invalid)?,
            _ => FixedOffset::east_opt(0).ok_or_else(invalid)?,
        };

        Ok(Self { date, offset })
    }

    /// Midnight at the start of the day in the client's offset
    pub fn start(&self) -> DomainResult<DateTime<FixedOffset>> {
        self.date
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| dt.and_local_timezone(self.offset).single())
            .ok_or_else(|| DomainError::InvalidDate(self.date.to_string()))
    }

    /// Last instant of the day in the client's offset
    pub fn end(&self) -> DomainResult<DateTime<FixedOffset>> {
        self.date
            .and_hms_nano_opt(23, 59, 59, 999_999_999)
            .and_then(|dt| dt.and_local_timezone(self.offset).single())
            .ok_or_else(|| DomainError::InvalidDate(self.date.to_string()))
    }
}

/// Parse `+0700`, `-0330` or `+07:00`, optionally followed by a zone name
fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let mut chars = zone.chars();
    let sign = match chars.next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let digits: String = chars
        .filter(|c| *c != ':')
        .take_while(|c| c.is_ascii_digit())
        .take(4)
        .collect();
    if digits.len() != 4 {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Inclusive time window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl DateWindow {
    /// From the start of `start_raw`'s day to the end of `end_raw`'s day
    pub fn parse(start_raw: &str, end_raw: &str) -> DomainResult<Self> {
        let start = DocumentDate::parse(start_raw)?.start()?;
        let end = DocumentDate::parse(end_raw)?.end()?;
        if end < start {
            return Err(DomainError::InvalidDate(format!(
                "end date {} is before start date {}",
                end_raw, start_raw
            )));
        }
        Ok(Self { start, end })
    }

    /// The single day containing `date`
    pub fn day(date: &DocumentDate) -> DomainResult<Self> {
        Ok(Self {
            start: date.start()?,
            end: date.end()?,
        })
    }
}

/// Body of every list endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListWindowRequest {
    #[validate(length(min = 1))]
    pub start_date: String,
    #[validate(length(min = 1))]
    pub end_date: String,
}

impl ListWindowRequest {
    pub fn window(&self) -> DomainResult<DateWindow> {
        DateWindow::parse(&self.start_date, &self.end_date)
    }
}

/// The `{params}/{val}` selector of list endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Id(i32),
    /// Document number, searched exact-then-fuzzy
    Number(String),
    User(String),
    Supplier(String),
    Customer(String),
    Patient(String),
    Doctor(String),
    PaymentMethod(String),
    PurchaseOrder(i32),
    InvoiceId(i32),
    ProducedMedicineName(String),
    UpdatedToStock(bool),
    UpdatedToAccount(bool),
}

impl ListFilter {
    /// `val == "all"` selects everything whatever `params` says
    pub fn parse(params: &str, val: &str) -> DomainResult<Self> {
        if val == "all" {
            return Ok(ListFilter::All);
        }

        let int = |v: &str| {
            v.parse::<i32>()
                .map_err(|_| DomainError::InvalidListFilter(format!("{} is not a number", v)))
        };

        Ok(match params {
            "id" => ListFilter::Id(int(val)?),
            "number" | "batch-number" => ListFilter::Number(val.to_string()),
            "user" => ListFilter::User(val.to_string()),
            "supplier" => ListFilter::Supplier(val.to_string()),
            "customer" => ListFilter::Customer(val.to_string()),
            "patient" => ListFilter::Patient(val.to_string()),
            "doctor" => ListFilter::Doctor(val.to_string()),
            "payment-method" => ListFilter::PaymentMethod(val.to_string()),
            "purchase-order" => ListFilter::PurchaseOrder(int(val)?),
            "invoice-id" => ListFilter::InvoiceId(int(val)?),
            "produced-medicine-name" => ListFilter::ProducedMedicineName(val.to_string()),
            "updated-to-stock" => ListFilter::UpdatedToStock(val == "true"),
            "updated-to-account" => ListFilter::UpdatedToAccount(val == "true"),
            other => {
                return Err(DomainError::InvalidListFilter(format!(
                    "params {} undefined",
                    other
                )))
            }
        })
    }

    /// Name of the selector, for error messages
    pub fn name(&self) -> &'static str {
        match self {
            ListFilter::All => "all",
            ListFilter::Id(_) => "id",
            ListFilter::Number(_) => "number",
            ListFilter::User(_) => "user",
            ListFilter::Supplier(_) => "supplier",
            ListFilter::Customer(_) => "customer",
            ListFilter::Patient(_) => "patient",
            ListFilter::Doctor(_) => "doctor",
            ListFilter::PaymentMethod(_) => "payment-method",
            ListFilter::PurchaseOrder(_) => "purchase-order",
            ListFilter::InvoiceId(_) => "invoice-id",
            ListFilter::ProducedMedicineName(_) => "produced-medicine-name",
            ListFilter::UpdatedToStock(_) => "updated-to-stock",
            ListFilter::UpdatedToAccount(_) => "updated-to-account",
        }
    }

    pub fn unsupported(&self) -> DomainError {
        DomainError::InvalidListFilter(format!("params {} not supported here", self.name()))
    }
}

/// `{nextNumber}` hint for document entry screens
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NextNumber {
    pub next_number: i64,
}

impl NextNumber {
    pub fn after(count: i64) -> Self {
        Self {
            next_number: count + 1,
        }
    }
}
