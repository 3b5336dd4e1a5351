//! Batch aggregation of parsed usage rows into one chargeable total.

use super::csv::UsageRow;
use crate::models::round_cents;
use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Metric label used when rows in a batch disagree.
pub const MIXED_METRIC: &str = "mixed";

/// Project and billing period a batch is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeTarget {
    pub project_id: Uuid,
    pub billing_period_id: Uuid,
}

/// One batch reduced to a single monetary total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAggregate {
    pub target: ChargeTarget,
    pub total_cost_cents: i64,
    pub total_cost_dollars: Decimal,
    pub total_quantity: Decimal,
    pub total_tokens: Decimal,
    pub valid_rows: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub metric_type: String,
    pub warnings: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateRejection {
    #[error("No valid usage rows to import")]
    NoValidRows { warnings: Vec<String> },

    #[error("Total usage cost must be greater than zero")]
    NonPositiveTotal { warnings: Vec<String> },

    #[error("Total usage cost exceeds the supported range")]
    OutOfRange { warnings: Vec<String> },
}

impl AggregateRejection {
    pub fn warnings(&self) -> &[String] {
        match self {
            AggregateRejection::NoValidRows { warnings }
            | AggregateRejection::NonPositiveTotal { warnings }
            | AggregateRejection::OutOfRange { warnings } => warnings,
        }
    }

    /// Puts `leading` ahead of the aggregation warnings.
    pub fn prepend_warnings(mut self, leading: Vec<String>) -> Self {
        let warnings = match &mut self {
            AggregateRejection::NoValidRows { warnings }
            | AggregateRejection::NonPositiveTotal { warnings }
            | AggregateRejection::OutOfRange { warnings } => warnings,
        };
        warnings.splice(0..0, leading);
        self
    }
}

impl From<AggregateRejection> for AppError {
    fn from(err: AggregateRejection) -> Self {
        let warnings = err.warnings();
        if warnings.is_empty() {
            AppError::BadRequest(anyhow::anyhow!("{}", err))
        } else {
            AppError::BadRequest(anyhow::anyhow!("{}: {}", err, warnings.join("; ")))
        }
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_usage_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.date_naive())
    })
}

/// Dollar cost of one row, if it is chargeable.
fn row_cost(row: &UsageRow) -> Option<Decimal> {
    if let Some(total) = row.total_cost {
        if total > Decimal::ZERO {
            return Some(total);
        }
    }
    let derived = row.unit_price.checked_mul(row.quantity)?;
    (derived > Decimal::ZERO).then_some(derived)
}

fn is_token_metric(metric_type: &str) -> bool {
    metric_type.to_lowercase().contains("token")
}

fn describe(first: NaiveDate, last: NaiveDate, rows: usize, tokens: Decimal) -> String {
    let range = if first == last {
        first.to_string()
    } else {
        format!("{} to {}", first, last)
    };
    if tokens > Decimal::ZERO {
        format!(
            "Usage {}: {} rows, {} tokens",
            range,
            rows,
            tokens.normalize()
        )
    } else {
        format!("Cost import {}: {} rows", range, rows)
    }
}

/// Fold parsed rows into one aggregate for `target`.
///
/// Dollar costs are summed exactly and converted to cents once for the batch.
pub fn aggregate_usage(
    rows: &[UsageRow],
    target: ChargeTarget,
) -> Result<UsageAggregate, AggregateRejection> {
    let mut warnings = Vec::new();
    let mut total_dollars = Decimal::ZERO;
    let mut total_quantity = Decimal::ZERO;
    let mut total_tokens = Decimal::ZERO;
    let mut valid_rows = 0usize;
    let mut range: Option<(NaiveDate, NaiveDate)> = None;
    let mut metric: Option<String> = None;

    for row in rows {
        let Some(date) = parse_usage_date(&row.date) else {
            warnings.push(format!("Row {}: invalid date '{}'", row.line, row.date));
            continue;
        };

        let Some(cost) = row_cost(row) else {
            warnings.push(format!(
                "Row {}: cost must be greater than zero",
                row.line
            ));
            continue;
        };

        let tokens = if is_token_metric(&row.metric_type) {
            total_tokens.checked_add(row.quantity)
        } else {
            Some(total_tokens)
        };
        let sums = total_dollars
            .checked_add(cost)
            .zip(total_quantity.checked_add(row.quantity))
            .zip(tokens);
        let Some(((dollars, quantity), tokens)) = sums else {
            warnings.push(format!(
                "Row {}: cost exceeds the supported range",
                row.line
            ));
            continue;
        };
        total_dollars = dollars;
        total_quantity = quantity;
        total_tokens = tokens;
        valid_rows += 1;

        range = Some(match range {
            Some((first, last)) => (first.min(date), last.max(date)),
            None => (date, date),
        });
        metric = match metric {
            None => Some(row.metric_type.clone()),
            Some(m) if m == row.metric_type => Some(m),
            Some(_) => Some(MIXED_METRIC.to_string()),
        };
    }

    let Some((first_date, last_date)) = range else {
        return Err(AggregateRejection::NoValidRows { warnings });
    };

    let Some(total_cost_cents) = total_dollars
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(round_cents)
    else {
        return Err(AggregateRejection::OutOfRange { warnings });
    };
    if total_cost_cents <= 0 {
        return Err(AggregateRejection::NonPositiveTotal { warnings });
    }

    Ok(UsageAggregate {
        target,
        total_cost_cents,
        total_cost_dollars: total_dollars,
        total_quantity,
        total_tokens,
        valid_rows,
        first_date,
        last_date,
        metric_type: metric.unwrap_or_else(|| MIXED_METRIC.to_string()),
        warnings,
        description: describe(first_date, last_date, valid_rows, total_tokens),
    })
}
