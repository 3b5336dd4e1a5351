//! Usage ingestion: CSV text to a queued pending charge.

pub mod aggregate;
pub mod csv;
pub mod materialize;

pub use aggregate::{aggregate_usage, AggregateRejection, ChargeTarget, UsageAggregate};
pub use csv::{parse_usage_csv, ParsedUsage, UsageRow};
pub use materialize::{ChargeError, ChargeMaterializer, MaterializedCharge};

use crate::services::metrics::{USAGE_IMPORTS_TOTAL, USAGE_ROWS_TOTAL};
use service_core::error::AppError;
use tracing::{info, instrument};

/// Result of a successful import.
#[derive(Debug, Clone)]
pub struct UsageImport {
    pub aggregate: UsageAggregate,
    pub charge: MaterializedCharge,
    /// Parser errors followed by aggregation warnings.
    pub warnings: Vec<String>,
}

/// Parse, aggregate and materialize one usage file.
#[instrument(skip(materializer, text), fields(bytes = text.len()))]
pub async fn import_usage(
    materializer: &ChargeMaterializer,
    text: &str,
    target: ChargeTarget,
    actor: &str,
) -> Result<UsageImport, AppError> {
    let parsed = parse_usage_csv(text);
    let mut warnings = parsed.errors.clone();

    let aggregate = match aggregate_usage(&parsed.rows, target) {
        Ok(aggregate) => aggregate,
        Err(rejection) => {
            USAGE_IMPORTS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(rejection.prepend_warnings(warnings).into());
        }
    };

    USAGE_ROWS_TOTAL
        .with_label_values(&["valid"])
        .inc_by(aggregate.valid_rows as u64);
    USAGE_ROWS_TOTAL
        .with_label_values(&["rejected"])
        .inc_by(parsed.rows.len().saturating_sub(aggregate.valid_rows) as u64);
    warnings.extend(aggregate.warnings.iter().cloned());

    let charge = match materializer
        .materialize_detached(aggregate.clone(), actor.to_string())
        .await
    {
        Ok(charge) => charge,
        Err(e) => {
            USAGE_IMPORTS_TOTAL.with_label_values(&["failed"]).inc();
            return Err(e.into());
        }
    };

    USAGE_IMPORTS_TOTAL.with_label_values(&["imported"]).inc();
    info!(
        valid_rows = aggregate.valid_rows,
        total_cost_cents = aggregate.total_cost_cents,
        warnings = warnings.len(),
        "Usage import complete"
    );

    Ok(UsageImport {
        aggregate,
        charge,
        warnings,
    })
}
