//! Persisting an aggregate as a pending charge.
//!
//! Two writes with one compensating action: insert the usage event, then the
//! pending item that references it. When the second write fails the first is
//! deleted once. There is no retry and no deduplication of repeated imports.

use super::aggregate::UsageAggregate;
use crate::models::{
    CreatePendingItem, CreateUsageEvent, PendingInvoiceItem, PendingSource, Project, UsageEvent,
};
use crate::services::metrics::{CHARGE_AMOUNT_CENTS_TOTAL, CHARGE_COMPENSATIONS_TOTAL, ERRORS_TOTAL};
use crate::services::BillingStore;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ChargeError {
    #[error("Project not found")]
    ProjectNotFound(Uuid),

    #[error("Billing period not found")]
    BillingPeriodNotFound(Uuid),

    #[error("Billing period does not belong to the project's client")]
    ClientMismatch {
        project_client_id: Uuid,
        period_client_id: Uuid,
    },

    #[error("Failed to load charge references: {0}")]
    Lookup(#[source] AppError),

    #[error("Failed to record usage event: {0}")]
    UsageEventFailed(#[source] AppError),

    /// The usage event was written but its pending item was not.
    #[error("{source}")]
    PendingItemFailed {
        usage_event_id: Uuid,
        compensated: bool,
        #[source]
        source: AppError,
    },

    #[error("Charge task ended unexpectedly: {0}")]
    Interrupted(String),
}

impl From<ChargeError> for AppError {
    fn from(err: ChargeError) -> Self {
        match err {
            ChargeError::ProjectNotFound(_) | ChargeError::BillingPeriodNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!("{}", err))
            }
            ChargeError::ClientMismatch { .. } => AppError::BadRequest(anyhow::anyhow!("{}", err)),
            ChargeError::Lookup(source) | ChargeError::UsageEventFailed(source) => source,
            ChargeError::PendingItemFailed { source, .. } => source,
            ChargeError::Interrupted(message) => {
                AppError::InternalError(anyhow::anyhow!("Charge task failed: {}", message))
            }
        }
    }
}

/// Everything written for one imported batch.
#[derive(Debug, Clone)]
pub struct MaterializedCharge {
    pub project: Project,
    pub usage_event: UsageEvent,
    pub pending_item: PendingInvoiceItem,
}

#[derive(Clone)]
pub struct ChargeMaterializer {
    store: Arc<dyn BillingStore>,
}

impl ChargeMaterializer {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Run [`Self::materialize`] on its own task.
    ///
    /// A caller that goes away mid-request cannot stop the saga between its
    /// two writes.
    pub async fn materialize_detached(
        &self,
        aggregate: UsageAggregate,
        actor: String,
    ) -> Result<MaterializedCharge, ChargeError> {
        let materializer = self.clone();
        tokio::spawn(async move { materializer.materialize(&aggregate, &actor).await })
            .await
            .map_err(|e| ChargeError::Interrupted(e.to_string()))?
    }

    #[instrument(
        skip(self, aggregate),
        fields(
            project_id = %aggregate.target.project_id,
            billing_period_id = %aggregate.target.billing_period_id,
            total_cost_cents = aggregate.total_cost_cents
        )
    )]
    pub async fn materialize(
        &self,
        aggregate: &UsageAggregate,
        actor: &str,
    ) -> Result<MaterializedCharge, ChargeError> {
        let target = aggregate.target;

        let project = self
            .store
            .get_project(target.project_id)
            .await
            .map_err(ChargeError::Lookup)?
            .ok_or(ChargeError::ProjectNotFound(target.project_id))?;
        let period = self
            .store
            .get_billing_period(target.billing_period_id)
            .await
            .map_err(ChargeError::Lookup)?
            .ok_or(ChargeError::BillingPeriodNotFound(target.billing_period_id))?;

        if period.client_id != project.client_id {
            warn!(
                project_client_id = %project.client_id,
                period_client_id = %period.client_id,
                "Billing period belongs to a different client"
            );
            return Err(ChargeError::ClientMismatch {
                project_client_id: project.client_id,
                period_client_id: period.client_id,
            });
        }

        let usage_event = self
            .store
            .insert_usage_event(&usage_event_input(aggregate, actor))
            .await
            .map_err(|e| {
                ERRORS_TOTAL.with_label_values(&["usage_event_insert"]).inc();
                ChargeError::UsageEventFailed(e)
            })?;

        let pending_input = CreatePendingItem {
            client_id: project.client_id,
            project_id: project.project_id,
            source: PendingSource::Usage,
            source_ref: Some(usage_event.usage_event_id),
            description: aggregate.description.clone(),
            quantity: Decimal::ONE,
            unit_price_cents: aggregate.total_cost_cents,
            metadata: Some(serde_json::json!({
                "usageEventId": usage_event.usage_event_id,
                "billingPeriodId": period.billing_period_id,
                "metricType": aggregate.metric_type,
            })),
            created_by: actor.to_string(),
        };

        let pending_item = match self.store.insert_pending_item(&pending_input).await {
            Ok(item) => item,
            Err(source) => {
                let compensated = self.compensate(usage_event.usage_event_id).await;
                return Err(ChargeError::PendingItemFailed {
                    usage_event_id: usage_event.usage_event_id,
                    compensated,
                    source,
                });
            }
        };

        CHARGE_AMOUNT_CENTS_TOTAL
            .with_label_values(&[PendingSource::Usage.as_str()])
            .inc_by(aggregate.total_cost_cents.unsigned_abs());
        info!(
            usage_event_id = %usage_event.usage_event_id,
            pending_item_id = %pending_item.pending_item_id,
            "Usage charge queued"
        );

        Ok(MaterializedCharge {
            project,
            usage_event,
            pending_item,
        })
    }

    /// Delete the orphaned usage event. Returns whether it is gone.
    async fn compensate(&self, usage_event_id: Uuid) -> bool {
        ERRORS_TOTAL.with_label_values(&["pending_item_insert"]).inc();
        match self.store.delete_usage_event(usage_event_id).await {
            Ok(()) => {
                CHARGE_COMPENSATIONS_TOTAL
                    .with_label_values(&["compensated"])
                    .inc();
                warn!(%usage_event_id, "Pending item insert failed; usage event removed");
                true
            }
            Err(e) => {
                CHARGE_COMPENSATIONS_TOTAL
                    .with_label_values(&["orphaned"])
                    .inc();
                error!(
                    %usage_event_id,
                    error = %e,
                    "Compensating delete failed; usage event left without a pending item"
                );
                false
            }
        }
    }
}

fn usage_event_input(aggregate: &UsageAggregate, actor: &str) -> CreateUsageEvent {
    let total_cents = Decimal::from(aggregate.total_cost_cents);
    let unit_price_cents = if aggregate.total_quantity > Decimal::ZERO {
        total_cents
            .checked_div(aggregate.total_quantity)
            .unwrap_or(total_cents)
    } else {
        total_cents
    };

    CreateUsageEvent {
        project_id: aggregate.target.project_id,
        billing_period_id: aggregate.target.billing_period_id,
        event_date: aggregate.last_date,
        metric_type: aggregate.metric_type.clone(),
        quantity: aggregate.total_quantity,
        unit_price_cents,
        amount_cents: Some(aggregate.total_cost_cents),
        description: aggregate.description.clone(),
        metadata: Some(serde_json::json!({
            "rowCount": aggregate.valid_rows,
            "totalTokens": aggregate.total_tokens,
            "totalCostDollars": aggregate.total_cost_dollars,
            "firstDate": aggregate.first_date,
            "lastDate": aggregate.last_date,
            "warnings": aggregate.warnings,
        })),
        created_by: actor.to_string(),
    }
}
