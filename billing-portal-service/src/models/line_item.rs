//! Invoice line item model.
//!
//! A line carries both `quantity * unit_price_cents` inputs and a separately
//! stored `amount_cents`. The stored amount is what gets displayed; the
//! product is only a fallback for rows written without one.

use super::usage::round_cents;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Kind of invoice line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    Project,
    Usage,
    Other,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::Project => "project",
            LineType::Usage => "usage",
            LineType::Other => "other",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "project" => LineType::Project,
            "usage" => LineType::Usage,
            _ => LineType::Other,
        }
    }
}

/// Line item on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceLineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price_cents: i64,
    pub amount_cents: Option<i64>,
    pub line_type: String,
    pub sort_order: i32,
    pub metadata: Option<serde_json::Value>,
    pub processor_line_id: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl InvoiceLineItem {
    /// Amount shown to the client. `None` only for a legacy row whose
    /// product cannot be expressed in cents.
    pub fn display_amount_cents(&self) -> Option<i64> {
        self.amount_cents
            .or_else(|| compute_amount_cents(self.quantity, self.unit_price_cents))
    }

    pub fn kind(&self) -> LineType {
        LineType::from_string(&self.line_type)
    }
}

/// Input for creating a line item.
#[derive(Debug, Clone)]
pub struct CreateLineItem {
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price_cents: i64,
    pub amount_cents: i64,
    pub line_type: LineType,
    pub sort_order: i32,
    pub metadata: Option<serde_json::Value>,
    pub processor_line_id: Option<String>,
}

/// Line item validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineItemError {
    #[error("Description is required")]
    MissingDescription,

    #[error("Quantity must be greater than zero")]
    NonPositiveQuantity,

    #[error("Unit price cannot be negative")]
    NegativeUnitPrice,

    #[error("Amount {supplied} does not match quantity x unit price ({computed})")]
    AmountMismatch { supplied: i64, computed: i64 },

    #[error("Amount exceeds the supported range")]
    AmountOutOfRange,
}

impl From<LineItemError> for AppError {
    fn from(err: LineItemError) -> Self {
        AppError::BadRequest(anyhow::anyhow!("{}", err))
    }
}

/// `quantity * unit_price_cents`, rounded half away from zero.
pub fn compute_amount_cents(quantity: Decimal, unit_price_cents: i64) -> Option<i64> {
    quantity
        .checked_mul(Decimal::from(unit_price_cents))
        .and_then(round_cents)
}

/// Validate line inputs and return the amount to store.
///
/// A supplied amount must agree with the computed one.
pub fn validate_line_amounts(
    description: &str,
    quantity: Decimal,
    unit_price_cents: i64,
    amount_cents: Option<i64>,
) -> Result<i64, LineItemError> {
    if description.trim().is_empty() {
        return Err(LineItemError::MissingDescription);
    }
    if quantity <= Decimal::ZERO {
        return Err(LineItemError::NonPositiveQuantity);
    }
    if unit_price_cents < 0 {
        return Err(LineItemError::NegativeUnitPrice);
    }

    let computed = compute_amount_cents(quantity, unit_price_cents)
        .ok_or(LineItemError::AmountOutOfRange)?;
    match amount_cents {
        Some(supplied) if supplied != computed => {
            Err(LineItemError::AmountMismatch { supplied, computed })
        }
        _ => Ok(computed),
    }
}

/// Sort order for a line appended after `existing`.
pub fn next_sort_order(existing: &[InvoiceLineItem]) -> i32 {
    existing
        .iter()
        .map(|item| item.sort_order)
        .max()
        .map_or(0, |max| max + 1)
}
