//! Datastore seam.
//!
//! Every read and write the service performs goes through [`BillingStore`].
//! The PostgreSQL implementation lives in [`super::database`].

use crate::models::{
    BillingPeriod, Client, ClientPortalMembership, CreateLineItem, CreatePendingItem,
    CreateUsageEvent, Invoice, InvoiceLineItem, ListUsageEventsFilter, PendingInvoiceItem,
    Project, ShareLink, UsageEvent,
};
use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Clients and membership
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError>;
    async fn get_clients(&self, client_ids: &[Uuid]) -> Result<Vec<Client>, AppError>;
    async fn list_clients_created_by(&self, user_id: &str) -> Result<Vec<Client>, AppError>;
    async fn get_membership(
        &self,
        client_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ClientPortalMembership>, AppError>;
    async fn list_memberships_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ClientPortalMembership>, AppError>;

    // Projects and billing periods
    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, AppError>;
    async fn list_projects_for_client(&self, client_id: Uuid) -> Result<Vec<Project>, AppError>;
    async fn get_billing_period(
        &self,
        billing_period_id: Uuid,
    ) -> Result<Option<BillingPeriod>, AppError>;

    // Usage events
    async fn insert_usage_event(&self, input: &CreateUsageEvent) -> Result<UsageEvent, AppError>;
    async fn get_usage_event(&self, usage_event_id: Uuid) -> Result<Option<UsageEvent>, AppError>;
    async fn delete_usage_event(&self, usage_event_id: Uuid) -> Result<(), AppError>;
    async fn list_usage_events(
        &self,
        filter: &ListUsageEventsFilter,
    ) -> Result<Vec<UsageEvent>, AppError>;

    // Pending invoice items
    async fn insert_pending_item(
        &self,
        input: &CreatePendingItem,
    ) -> Result<PendingInvoiceItem, AppError>;

    // Invoices
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;
    async fn get_invoice_by_share_id(&self, share_id: &str) -> Result<Option<Invoice>, AppError>;
    async fn list_invoices_for_client(&self, client_id: Uuid) -> Result<Vec<Invoice>, AppError>;
    async fn set_invoice_share_link(
        &self,
        invoice_id: Uuid,
        link: &ShareLink,
    ) -> Result<Option<Invoice>, AppError>;
    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<bool, AppError>;

    // Line items
    async fn list_line_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceLineItem>, AppError>;
    /// Appends the line and adds its amount to the invoice totals.
    /// `Ok(None)` when the invoice is missing or no longer a draft.
    async fn insert_line_item(
        &self,
        input: &CreateLineItem,
    ) -> Result<Option<InvoiceLineItem>, AppError>;
}
