//! Client portal read endpoints.
//!
//! Every request is authorized once (membership, ownership or share link)
//! and then passed through the portal-enabled gate before any data is read.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::{Duration, Utc};
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    access::{
        authorize, enforce_portal_enabled, list_accessible_clients, AccessGrant,
        AccessibleClient, ClientSelector,
    },
    dtos::{
        InvoiceDetailResponse, InvoiceSummary, PortalQuery, ShareLinkResponse, UsageQuery,
        UsageResponse,
    },
    middleware::{CurrentIdentity, OptionalIdentity},
    models::{Invoice, ListUsageEventsFilter, ShareLink},
    reports::{build_usage_report, render_statement_csv, statement_filename, ReportRange},
    services::Identity,
    startup::AppState,
};

/// Authorize the caller for the selected client and apply the portal gate.
async fn portal_access(
    state: &AppState,
    identity: Option<&Identity>,
    query: &PortalQuery,
) -> Result<AccessGrant, AppError> {
    let selector = ClientSelector {
        client_id: query.client_id,
        share_id: query.share_id.clone(),
    };
    let grant = authorize(state.store.as_ref(), identity, &selector, Utc::now()).await?;
    enforce_portal_enabled(state.store.as_ref(), grant.client_id, true).await?;

    tracing::Span::current().record("client_id", tracing::field::display(grant.client_id));
    Ok(grant)
}

/// Load an invoice that belongs to the granted client.
async fn load_invoice(
    state: &AppState,
    grant: &AccessGrant,
    invoice_id: Uuid,
) -> Result<Invoice, AppError> {
    state
        .store
        .get_invoice(invoice_id)
        .await?
        .filter(|invoice| invoice.client_id == grant.client_id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
}

/// Clients the caller can open, with their role in each.
#[instrument(skip(state, identity), fields(user_id = %identity.user_id))]
pub async fn list_clients(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Json<Vec<AccessibleClient>>, AppError> {
    let clients = list_accessible_clients(state.store.as_ref(), &identity).await?;
    Ok(Json(clients))
}

#[instrument(skip(state, identity, query), fields(client_id))]
pub async fn get_usage(
    State(state): State<AppState>,
    OptionalIdentity(identity): OptionalIdentity,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageResponse>, AppError> {
    let grant = portal_access(&state, identity.as_ref(), &query.selector()).await?;
    let range = ReportRange::resolve(query.start_date, query.end_date, Utc::now().date_naive())?;

    let projects = state.store.list_projects_for_client(grant.client_id).await?;
    let events = if projects.is_empty() {
        Vec::new()
    } else {
        state
            .store
            .list_usage_events(&ListUsageEventsFilter {
                project_ids: projects.iter().map(|p| p.project_id).collect(),
                start_date: range.start,
                end_date: range.end,
            })
            .await?
    };

    Ok(Json(UsageResponse {
        client_id: grant.client_id,
        start_date: range.start,
        end_date: range.end,
        report: build_usage_report(&events, &projects, query.group_by)?,
    }))
}

#[instrument(skip(state, identity, query), fields(client_id))]
pub async fn list_invoices(
    State(state): State<AppState>,
    OptionalIdentity(identity): OptionalIdentity,
    Query(query): Query<PortalQuery>,
) -> Result<Json<Vec<InvoiceSummary>>, AppError> {
    let grant = portal_access(&state, identity.as_ref(), &query).await?;
    let invoices = state.store.list_invoices_for_client(grant.client_id).await?;
    Ok(Json(invoices.iter().map(InvoiceSummary::from).collect()))
}

/// Invoice with line items and payment history.
///
/// Payment history comes from the processor and is omitted if it cannot be
/// fetched.
#[instrument(skip(state, identity, query), fields(client_id))]
pub async fn get_invoice(
    State(state): State<AppState>,
    OptionalIdentity(identity): OptionalIdentity,
    Path(invoice_id): Path<Uuid>,
    Query(query): Query<PortalQuery>,
) -> Result<Json<InvoiceDetailResponse>, AppError> {
    let grant = portal_access(&state, identity.as_ref(), &query).await?;
    let invoice = load_invoice(&state, &grant, invoice_id).await?;
    let line_items = state.store.list_line_items(invoice_id).await?;

    let payments = match invoice.processor_payment_intent_id.as_deref() {
        Some(intent_id) => state.payments.list_charges(intent_id).await.unwrap_or_else(|e| {
            tracing::warn!(%invoice_id, error = %e, "Payment history unavailable");
            Vec::new()
        }),
        None => Vec::new(),
    };

    Ok(Json(InvoiceDetailResponse::new(invoice, line_items, payments)))
}

/// Hosted PDF when one exists, otherwise a generated CSV.
#[instrument(skip(state, identity, query), fields(client_id))]
pub async fn download_statement(
    State(state): State<AppState>,
    OptionalIdentity(identity): OptionalIdentity,
    Path(invoice_id): Path<Uuid>,
    Query(query): Query<PortalQuery>,
) -> Result<Response, AppError> {
    let grant = portal_access(&state, identity.as_ref(), &query).await?;
    let invoice = load_invoice(&state, &grant, invoice_id).await?;

    let mut pdf_url = invoice.hosted_pdf_url.clone();
    if pdf_url.is_none() {
        if let Some(processor_invoice_id) = invoice.processor_invoice_id.as_deref() {
            match state.payments.retrieve_invoice(processor_invoice_id).await {
                Ok(mirrored) => pdf_url = mirrored.hosted_invoice_pdf,
                Err(e) => {
                    tracing::warn!(%invoice_id, error = %e, "Processor invoice unavailable");
                }
            }
        }
    }

    if let Some(url) = pdf_url {
        return Ok(Redirect::to(&url).into_response());
    }

    let line_items = state.store.list_line_items(invoice_id).await?;
    let body = render_statement_csv(&invoice, &line_items);
    let disposition = format!("attachment; filename=\"{}\"", statement_filename(&invoice));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Create or replace an invoice's share link. Portal admins only.
#[instrument(skip(state, identity, query), fields(client_id))]
pub async fn create_share_link(
    State(state): State<AppState>,
    OptionalIdentity(identity): OptionalIdentity,
    Path(invoice_id): Path<Uuid>,
    Query(query): Query<PortalQuery>,
) -> Result<(StatusCode, Json<ShareLinkResponse>), AppError> {
    let grant = portal_access(&state, identity.as_ref(), &query).await?;
    grant.require_admin()?;
    load_invoice(&state, &grant, invoice_id).await?;

    let expires_utc = Duration::try_days(state.portal.share_link_ttl_days)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Invalid share link lifetime")))?;
    let link = ShareLink {
        share_id: Uuid::new_v4().simple().to_string(),
        expires_utc,
    };

    state
        .store
        .set_invoice_share_link(invoice_id, &link)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    tracing::info!(%invoice_id, expires_at = %link.expires_utc, "Share link created");

    Ok((
        StatusCode::CREATED,
        Json(ShareLinkResponse {
            share_id: link.share_id,
            expires_at: link.expires_utc,
        }),
    ))
}
