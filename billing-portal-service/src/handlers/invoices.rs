//! Operator endpoints that edit draft invoices.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{AddLineItemRequest, LineItemResponse},
    middleware::PrivilegedIdentity,
    models::{next_sort_order, validate_line_amounts, CreateLineItem, Invoice, LineType},
    services::MirrorLineItem,
    startup::AppState,
};

async fn load_draft(state: &AppState, invoice_id: Uuid) -> Result<Invoice, AppError> {
    let invoice = state
        .store
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    if !invoice.is_draft() {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Only draft invoices can be modified (status: {})",
            invoice.status
        )));
    }

    Ok(invoice)
}

/// Append a line item to a draft invoice.
///
/// A mirrored invoice gets the line in the payment processor first; if that
/// fails nothing is written locally. The invoice totals grow by the line
/// amount in the same write.
#[instrument(skip(state, identity, request), fields(user_id = %identity.user_id))]
pub async fn add_line_item(
    State(state): State<AppState>,
    PrivilegedIdentity(identity): PrivilegedIdentity,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<AddLineItemRequest>,
) -> Result<(StatusCode, Json<LineItemResponse>), AppError> {
    request.validate()?;
    let amount_cents = validate_line_amounts(
        &request.description,
        request.quantity,
        request.unit_price_cents,
        request.amount_cents,
    )?;

    let invoice = load_draft(&state, invoice_id).await?;
    let existing = state.store.list_line_items(invoice_id).await?;
    let description = request.description.trim().to_string();

    let processor_line_id = match invoice.processor_invoice_id.as_deref() {
        Some(processor_invoice_id) => {
            let line = MirrorLineItem {
                description: description.clone(),
                quantity: request.quantity,
                unit_amount_cents: request.unit_price_cents,
                amount_cents,
            };
            let line_id = state
                .payments
                .add_line_item(processor_invoice_id, &line)
                .await
                .map_err(|e| {
                    tracing::error!(%invoice_id, error = %e, "Processor rejected line item");
                    AppError::from(e)
                })?;
            Some(line_id)
        }
        None => None,
    };

    let item = state
        .store
        .insert_line_item(&CreateLineItem {
            invoice_id,
            description,
            quantity: request.quantity,
            unit_price_cents: request.unit_price_cents,
            amount_cents,
            line_type: request.line_type.unwrap_or(LineType::Other),
            sort_order: next_sort_order(&existing),
            metadata: request.metadata,
            processor_line_id: processor_line_id.clone(),
        })
        .await?
        .ok_or_else(|| {
            if processor_line_id.is_some() {
                tracing::warn!(
                    %invoice_id,
                    processor_line_id = ?processor_line_id,
                    "Invoice left draft after processor accepted line"
                );
            }
            AppError::Conflict(anyhow::anyhow!("Invoice is no longer a draft"))
        })?;

    tracing::info!(
        %invoice_id,
        line_item_id = %item.line_item_id,
        amount_cents,
        "Line item added"
    );

    Ok((StatusCode::CREATED, Json(item.into())))
}

/// Delete a draft invoice.
///
/// The processor copy is removed best-effort; local deletion proceeds even
/// when that fails.
#[instrument(skip(state, identity), fields(user_id = %identity.user_id))]
pub async fn delete_invoice(
    State(state): State<AppState>,
    PrivilegedIdentity(identity): PrivilegedIdentity,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let invoice = load_draft(&state, invoice_id).await?;

    if let Some(processor_invoice_id) = invoice.processor_invoice_id.as_deref() {
        if let Err(e) = state.payments.delete_draft_invoice(processor_invoice_id).await {
            tracing::warn!(
                %invoice_id,
                error = %e,
                "Failed to delete processor draft; continuing"
            );
        }
    }

    if !state.store.delete_invoice(invoice_id).await? {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Invoice is no longer a draft"
        )));
    }

    tracing::info!(%invoice_id, "Draft invoice deleted");
    Ok(StatusCode::NO_CONTENT)
}
