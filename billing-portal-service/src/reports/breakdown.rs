//! Usage breakdown and daily time series for the portal.
//!
//! Event costs come from [`UsageEvent::cost_cents`]: the stored batch amount
//! when present, per-event rounding otherwise.

use crate::models::{Project, UsageEvent};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use uuid::Uuid;

/// Default report window when the caller gives no start date.
pub const DEFAULT_RANGE_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    Metric,
    Project,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportRange {
    /// Fill in missing bounds relative to `today` and validate order.
    pub fn resolve(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<Self, AppError> {
        let end = end.unwrap_or(today);
        let start = start.unwrap_or(end - Duration::days(DEFAULT_RANGE_DAYS - 1));
        if start > end {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "startDate must not be after endDate"
            )));
        }
        Ok(Self { start, end })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownEntry {
    pub key: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    pub raw_cost_cents: i64,
    pub quantity: Decimal,
    pub events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesPoint {
    pub date: NaiveDate,
    pub cost_cents: i64,
    pub quantity: Decimal,
    pub events: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_cost_cents: i64,
    pub total_quantity: Decimal,
    pub total_events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEventView {
    pub id: Uuid,
    pub project_id: Uuid,
    pub project_name: Option<String>,
    pub date: NaiveDate,
    pub metric_type: String,
    pub quantity: Decimal,
    pub cost_cents: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub summary: UsageSummary,
    pub breakdown: Vec<BreakdownEntry>,
    pub timeseries: Vec<TimeseriesPoint>,
    pub events: Vec<UsageEventView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("Usage totals exceed the supported range (event {0})")]
    OutOfRange(Uuid),
}

impl From<ReportError> for AppError {
    fn from(err: ReportError) -> Self {
        AppError::InternalError(anyhow::anyhow!("{}", err))
    }
}

fn add_cents(total: &mut i64, cost: i64, event_id: Uuid) -> Result<(), ReportError> {
    *total = total
        .checked_add(cost)
        .ok_or(ReportError::OutOfRange(event_id))?;
    Ok(())
}

fn add_quantity(total: &mut Decimal, quantity: Decimal, event_id: Uuid) -> Result<(), ReportError> {
    *total = total
        .checked_add(quantity)
        .ok_or(ReportError::OutOfRange(event_id))?;
    Ok(())
}

/// Summarize `events` for the portal. Fails when a cost or running total
/// does not fit in cents.
pub fn build_usage_report(
    events: &[UsageEvent],
    projects: &[Project],
    group_by: GroupBy,
) -> Result<UsageReport, ReportError> {
    let project_names: HashMap<Uuid, &str> = projects
        .iter()
        .map(|p| (p.project_id, p.name.as_str()))
        .collect();

    let mut summary = UsageSummary::default();
    let mut groups: HashMap<String, BreakdownEntry> = HashMap::new();
    let mut days: BTreeMap<NaiveDate, TimeseriesPoint> = BTreeMap::new();
    let mut views = Vec::with_capacity(events.len());

    for event in events {
        let id = event.usage_event_id;
        let cost = event.cost_cents().ok_or(ReportError::OutOfRange(id))?;
        let project_name = project_names.get(&event.project_id).copied();

        add_cents(&mut summary.total_cost_cents, cost, id)?;
        add_quantity(&mut summary.total_quantity, event.quantity, id)?;
        summary.total_events += 1;

        let (key, entry) = match group_by {
            GroupBy::Metric => (
                event.metric_type.clone(),
                BreakdownEntry {
                    key: event.metric_type.clone(),
                    label: event.metric_type.clone(),
                    metric_type: Some(event.metric_type.clone()),
                    project_id: None,
                    raw_cost_cents: 0,
                    quantity: Decimal::ZERO,
                    events: 0,
                },
            ),
            GroupBy::Project => (
                event.project_id.to_string(),
                BreakdownEntry {
                    key: event.project_id.to_string(),
                    label: project_name.unwrap_or("Unknown project").to_string(),
                    metric_type: None,
                    project_id: Some(event.project_id),
                    raw_cost_cents: 0,
                    quantity: Decimal::ZERO,
                    events: 0,
                },
            ),
        };
        let group = groups.entry(key).or_insert(entry);
        add_cents(&mut group.raw_cost_cents, cost, id)?;
        add_quantity(&mut group.quantity, event.quantity, id)?;
        group.events += 1;

        let day = days.entry(event.event_date).or_insert(TimeseriesPoint {
            date: event.event_date,
            cost_cents: 0,
            quantity: Decimal::ZERO,
            events: 0,
        });
        add_cents(&mut day.cost_cents, cost, id)?;
        add_quantity(&mut day.quantity, event.quantity, id)?;
        day.events += 1;

        views.push(UsageEventView {
            id,
            project_id: event.project_id,
            project_name: project_name.map(String::from),
            date: event.event_date,
            metric_type: event.metric_type.clone(),
            quantity: event.quantity,
            cost_cents: cost,
            description: event.description.clone(),
        });
    }

    let mut breakdown: Vec<BreakdownEntry> = groups.into_values().collect();
    breakdown.sort_by(|a, b| {
        b.raw_cost_cents
            .cmp(&a.raw_cost_cents)
            .then_with(|| a.key.cmp(&b.key))
    });

    views.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));

    Ok(UsageReport {
        summary,
        breakdown,
        timeseries: days.into_values().collect(),
        events: views,
    })
}
