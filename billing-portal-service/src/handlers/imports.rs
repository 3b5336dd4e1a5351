//! Operator endpoints: usage import and manual pending charges.

use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;
use tracing::instrument;
use validator::Validate;

use crate::{
    dtos::{
        CreatePendingItemRequest, ImportTotals, ImportUsageRequest, ImportUsageResponse,
        PendingItemResponse,
    },
    ingestion::{import_usage, ChargeTarget},
    middleware::PrivilegedIdentity,
    models::{validate_line_amounts, CreatePendingItem, PendingSource},
    services::metrics::CHARGE_AMOUNT_CENTS_TOTAL,
    startup::AppState,
};

/// Import a usage CSV as one pending charge.
#[instrument(
    skip(state, identity, request),
    fields(project_id = %request.project_id, billing_period_id = %request.billing_period_id)
)]
pub async fn import_usage_csv(
    State(state): State<AppState>,
    PrivilegedIdentity(identity): PrivilegedIdentity,
    Json(request): Json<ImportUsageRequest>,
) -> Result<(StatusCode, Json<ImportUsageResponse>), AppError> {
    request.validate()?;

    let target = ChargeTarget {
        project_id: request.project_id,
        billing_period_id: request.billing_period_id,
    };

    let import = import_usage(&state.materializer, &request.csv, target, &identity.user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(ImportUsageResponse {
            imported: import.aggregate.valid_rows,
            warnings: import.warnings,
            totals: ImportTotals {
                cost_cents: import.aggregate.total_cost_cents,
                tokens: import.aggregate.total_tokens,
            },
            project: import.charge.project.into(),
            pending_item: import.charge.pending_item.into(),
        }),
    ))
}

/// Queue a manual charge against a project.
#[instrument(skip(state, identity, request), fields(project_id = %request.project_id))]
pub async fn create_pending_item(
    State(state): State<AppState>,
    PrivilegedIdentity(identity): PrivilegedIdentity,
    Json(request): Json<CreatePendingItemRequest>,
) -> Result<(StatusCode, Json<PendingItemResponse>), AppError> {
    request.validate()?;
    let amount_cents = validate_line_amounts(
        &request.description,
        request.quantity,
        request.unit_price_cents,
        None,
    )?;

    let project = state
        .store
        .get_project(request.project_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Project not found")))?;

    let item = state
        .store
        .insert_pending_item(&CreatePendingItem {
            client_id: project.client_id,
            project_id: project.project_id,
            source: PendingSource::Manual,
            source_ref: None,
            description: request.description.trim().to_string(),
            quantity: request.quantity,
            unit_price_cents: request.unit_price_cents,
            metadata: request.metadata,
            created_by: identity.user_id,
        })
        .await?;

    CHARGE_AMOUNT_CENTS_TOTAL
        .with_label_values(&[PendingSource::Manual.as_str()])
        .inc_by(amount_cents.unsigned_abs());
    tracing::info!(pending_item_id = %item.pending_item_id, amount_cents, "Manual charge queued");

    Ok((StatusCode::CREATED, Json(item.into())))
}
