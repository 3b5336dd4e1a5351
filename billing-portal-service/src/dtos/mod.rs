//! Request and response bodies for the HTTP API.

use crate::models::{
    Invoice, InvoiceLineItem, LineType, PaymentRecord, PendingInvoiceItem, Project,
    UsageDetailLine,
};
use crate::reports::{GroupBy, UsageReport};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImportUsageRequest {
    pub project_id: Uuid,
    pub billing_period_id: Uuid,
    /// Raw CSV text.
    #[validate(length(min = 1, message = "CSV content cannot be empty"))]
    pub csv: String,
}

#[derive(Debug, Serialize)]
pub struct ImportTotals {
    pub cost_cents: i64,
    pub tokens: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportUsageResponse {
    pub imported: usize,
    pub warnings: Vec<String>,
    pub totals: ImportTotals,
    pub project: ProjectResponse,
    pub pending_item: PendingItemResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
}

impl From<Project> for ProjectResponse {
    fn from(project: Project) -> Self {
        Self {
            id: project.project_id,
            client_id: project.client_id,
            name: project.name,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePendingItemRequest {
    pub project_id: Uuid,
    #[validate(length(min = 1, max = 500, message = "Description must be 1-500 characters"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price_cents: i64,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingItemResponse {
    pub id: Uuid,
    pub client_id: Uuid,
    pub project_id: Uuid,
    pub source_type: String,
    pub source_ref: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price_cents: i64,
    pub amount_cents: Option<i64>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<PendingInvoiceItem> for PendingItemResponse {
    fn from(item: PendingInvoiceItem) -> Self {
        let amount_cents = item.amount_cents();
        Self {
            id: item.pending_item_id,
            client_id: item.client_id,
            project_id: item.project_id,
            source_type: item.source_type,
            source_ref: item.source_ref,
            description: item.description,
            quantity: item.quantity,
            unit_price_cents: item.unit_price_cents,
            amount_cents,
            created_by: item.created_by,
            created_at: item.created_utc,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddLineItemRequest {
    #[validate(length(min = 1, max = 500, message = "Description must be 1-500 characters"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price_cents: i64,
    pub amount_cents: Option<i64>,
    pub line_type: Option<LineType>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemResponse {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price_cents: i64,
    pub amount_cents: Option<i64>,
    pub line_type: String,
    pub sort_order: i32,
    pub metadata: Option<serde_json::Value>,
}

impl From<InvoiceLineItem> for LineItemResponse {
    fn from(item: InvoiceLineItem) -> Self {
        let amount_cents = item.display_amount_cents();
        Self {
            id: item.line_item_id,
            invoice_id: item.invoice_id,
            description: item.description,
            quantity: item.quantity,
            unit_price_cents: item.unit_price_cents,
            amount_cents,
            line_type: item.line_type,
            sort_order: item.sort_order,
            metadata: item.metadata,
        }
    }
}

// ---------------------------------------------------------------------------
// Portal
// ---------------------------------------------------------------------------

/// Client selector shared by every portal read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalQuery {
    pub client_id: Option<Uuid>,
    pub share_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuery {
    pub client_id: Option<Uuid>,
    pub share_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub group_by: GroupBy,
}

impl UsageQuery {
    pub fn selector(&self) -> PortalQuery {
        PortalQuery {
            client_id: self.client_id,
            share_id: self.share_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub client_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(flatten)]
    pub report: UsageReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub id: Uuid,
    pub invoice_number: String,
    pub status: String,
    pub due_date: Option<NaiveDate>,
    pub total_cents: i64,
    pub net_amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&Invoice> for InvoiceSummary {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: invoice.invoice_id,
            invoice_number: invoice.invoice_number.clone(),
            status: invoice.status.clone(),
            due_date: invoice.due_date,
            total_cents: invoice.total_cents,
            net_amount_cents: invoice.net_amount_cents,
            created_at: invoice.created_utc,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDetailResponse {
    pub id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    pub status: String,
    pub due_date: Option<NaiveDate>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub net_amount_cents: i64,
    pub line_items: Vec<LineItemResponse>,
    pub usage_breakdown: Vec<UsageDetailLine>,
    pub payments: Vec<PaymentRecord>,
    pub has_statement_pdf: bool,
    pub created_at: DateTime<Utc>,
}

impl InvoiceDetailResponse {
    pub fn new(
        invoice: Invoice,
        line_items: Vec<InvoiceLineItem>,
        payments: Vec<PaymentRecord>,
    ) -> Self {
        let usage_breakdown = invoice.usage_breakdown();
        Self {
            id: invoice.invoice_id,
            client_id: invoice.client_id,
            invoice_number: invoice.invoice_number,
            status: invoice.status,
            due_date: invoice.due_date,
            subtotal_cents: invoice.subtotal_cents,
            tax_cents: invoice.tax_cents,
            total_cents: invoice.total_cents,
            net_amount_cents: invoice.net_amount_cents,
            line_items: line_items.into_iter().map(LineItemResponse::from).collect(),
            usage_breakdown,
            payments,
            has_statement_pdf: invoice.hosted_pdf_url.is_some(),
            created_at: invoice.created_utc,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLinkResponse {
    pub share_id: String,
    pub expires_at: DateTime<Utc>,
}
