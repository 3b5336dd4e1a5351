//! Pending invoice item model.

use super::line_item::compute_amount_cents;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Where a pending charge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingSource {
    Usage,
    Manual,
}

impl PendingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingSource::Usage => "usage",
            PendingSource::Manual => "manual",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "usage" => PendingSource::Usage,
            _ => PendingSource::Manual,
        }
    }
}

/// A charge queued for a future invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingInvoiceItem {
    pub pending_item_id: Uuid,
    pub client_id: Uuid,
    pub project_id: Uuid,
    pub source_type: String,
    pub source_ref: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price_cents: i64,
    pub metadata: Option<serde_json::Value>,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
}

impl PendingInvoiceItem {
    pub fn source(&self) -> PendingSource {
        PendingSource::from_string(&self.source_type)
    }

    pub fn amount_cents(&self) -> Option<i64> {
        compute_amount_cents(self.quantity, self.unit_price_cents)
    }
}

/// Input for inserting a pending item.
#[derive(Debug, Clone)]
pub struct CreatePendingItem {
    pub client_id: Uuid,
    pub project_id: Uuid,
    pub source: PendingSource,
    pub source_ref: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price_cents: i64,
    pub metadata: Option<serde_json::Value>,
    pub created_by: String,
}
