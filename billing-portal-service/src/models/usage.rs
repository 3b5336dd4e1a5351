//! Usage event model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Durable record of one ingestion batch. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageEvent {
    pub usage_event_id: Uuid,
    pub project_id: Uuid,
    pub billing_period_id: Uuid,
    pub event_date: NaiveDate,
    pub metric_type: String,
    pub quantity: Decimal,
    pub unit_price_cents: Decimal,
    pub amount_cents: Option<i64>,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
}

impl UsageEvent {
    /// Cost of this event in cents.
    ///
    /// Uses the stored batch amount when present. Rows without one are priced
    /// as `quantity * unit_price_cents`, rounded half away from zero per event.
    /// `None` when that product does not fit in whole cents.
    pub fn cost_cents(&self) -> Option<i64> {
        match self.amount_cents {
            Some(amount) => Some(amount),
            None => self
                .quantity
                .checked_mul(self.unit_price_cents)
                .and_then(round_cents),
        }
    }
}

/// Input for inserting a usage event.
#[derive(Debug, Clone)]
pub struct CreateUsageEvent {
    pub project_id: Uuid,
    pub billing_period_id: Uuid,
    pub event_date: NaiveDate,
    pub metric_type: String,
    pub quantity: Decimal,
    pub unit_price_cents: Decimal,
    pub amount_cents: Option<i64>,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub created_by: String,
}

/// Filter for reading usage events of a client's projects.
#[derive(Debug, Clone)]
pub struct ListUsageEventsFilter {
    pub project_ids: Vec<Uuid>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Round a fractional cent amount to whole cents, half away from zero.
///
/// `None` when the result is outside the `i64` range.
pub fn round_cents(value: Decimal) -> Option<i64> {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}
