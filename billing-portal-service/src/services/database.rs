//! PostgreSQL implementation of [`BillingStore`].

use crate::models::{
    BillingPeriod, Client, ClientPortalMembership, CreateLineItem, CreatePendingItem,
    CreateUsageEvent, Invoice, InvoiceLineItem, ListUsageEventsFilter, PendingInvoiceItem,
    Project, ShareLink, UsageEvent,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::BillingStore;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const CLIENT_COLUMNS: &str =
    "client_id, name, company_name, created_by, client_portal_enabled, created_utc";

const USAGE_EVENT_COLUMNS: &str = "usage_event_id, project_id, billing_period_id, event_date, metric_type, quantity, unit_price_cents, amount_cents, description, metadata, created_by, created_utc";

const INVOICE_COLUMNS: &str = "invoice_id, client_id, invoice_number, status, due_date, subtotal_cents, tax_cents, total_cents, net_amount_cents, share_id, share_expires_utc, portal_payload, processor_invoice_id, processor_payment_intent_id, hosted_pdf_url, created_utc";

const LINE_ITEM_COLUMNS: &str = "line_item_id, invoice_id, description, quantity, unit_price_cents, amount_cents, line_type, sort_order, metadata, processor_line_id, created_utc";

fn db_error(operation: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", operation, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-portal-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("run health check", e))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Clients and membership
    // =========================================================================

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_client"])
            .start_timer();

        let client = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE client_id = $1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get client", e))?;

        timer.observe_duration();
        Ok(client)
    }

    #[instrument(skip(self, client_ids), fields(count = client_ids.len()))]
    async fn get_clients(&self, client_ids: &[Uuid]) -> Result<Vec<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_clients"])
            .start_timer();

        let clients = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE client_id = ANY($1) ORDER BY name"
        ))
        .bind(client_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("get clients", e))?;

        timer.observe_duration();
        Ok(clients)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_clients_created_by(&self, user_id: &str) -> Result<Vec<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_clients_created_by"])
            .start_timer();

        let clients = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE created_by = $1 ORDER BY name"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list owned clients", e))?;

        timer.observe_duration();
        Ok(clients)
    }

    #[instrument(skip(self), fields(client_id = %client_id, user_id = %user_id))]
    async fn get_membership(
        &self,
        client_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ClientPortalMembership>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_membership"])
            .start_timer();

        let membership = sqlx::query_as::<_, ClientPortalMembership>(
            r#"
            SELECT client_id, user_id, role, created_utc
            FROM client_portal_members
            WHERE client_id = $1 AND user_id = $2
            "#,
        )
        .bind(client_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get membership", e))?;

        timer.observe_duration();
        Ok(membership)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_memberships_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ClientPortalMembership>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_memberships_for_user"])
            .start_timer();

        let memberships = sqlx::query_as::<_, ClientPortalMembership>(
            r#"
            SELECT client_id, user_id, role, created_utc
            FROM client_portal_members
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list memberships", e))?;

        timer.observe_duration();
        Ok(memberships)
    }

    // =========================================================================
    // Projects and billing periods
    // =========================================================================

    #[instrument(skip(self), fields(project_id = %project_id))]
    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_project"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT project_id, client_id, name, created_utc
            FROM projects
            WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get project", e))?;

        timer.observe_duration();
        Ok(project)
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn list_projects_for_client(&self, client_id: Uuid) -> Result<Vec<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_projects_for_client"])
            .start_timer();

        let projects = sqlx::query_as::<_, Project>(
            r#"
            SELECT project_id, client_id, name, created_utc
            FROM projects
            WHERE client_id = $1
            ORDER BY name
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list projects", e))?;

        timer.observe_duration();
        Ok(projects)
    }

    #[instrument(skip(self), fields(billing_period_id = %billing_period_id))]
    async fn get_billing_period(
        &self,
        billing_period_id: Uuid,
    ) -> Result<Option<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_billing_period"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(
            r#"
            SELECT billing_period_id, client_id, label, period_start, period_end, created_utc
            FROM billing_periods
            WHERE billing_period_id = $1
            "#,
        )
        .bind(billing_period_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get billing period", e))?;

        timer.observe_duration();
        Ok(period)
    }

    // =========================================================================
    // Usage events
    // =========================================================================

    #[instrument(skip(self, input), fields(project_id = %input.project_id, billing_period_id = %input.billing_period_id))]
    async fn insert_usage_event(&self, input: &CreateUsageEvent) -> Result<UsageEvent, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_usage_event"])
            .start_timer();

        let event = sqlx::query_as::<_, UsageEvent>(&format!(
            r#"
            INSERT INTO usage_events (usage_event_id, project_id, billing_period_id, event_date, metric_type, quantity, unit_price_cents, amount_cents, description, metadata, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {USAGE_EVENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.project_id)
        .bind(input.billing_period_id)
        .bind(input.event_date)
        .bind(&input.metric_type)
        .bind(input.quantity)
        .bind(input.unit_price_cents)
        .bind(input.amount_cents)
        .bind(&input.description)
        .bind(&input.metadata)
        .bind(&input.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("insert usage event", e))?;

        timer.observe_duration();
        info!(usage_event_id = %event.usage_event_id, "Usage event created");

        Ok(event)
    }

    #[instrument(skip(self), fields(usage_event_id = %usage_event_id))]
    async fn get_usage_event(&self, usage_event_id: Uuid) -> Result<Option<UsageEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_usage_event"])
            .start_timer();

        let event = sqlx::query_as::<_, UsageEvent>(&format!(
            "SELECT {USAGE_EVENT_COLUMNS} FROM usage_events WHERE usage_event_id = $1"
        ))
        .bind(usage_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get usage event", e))?;

        timer.observe_duration();
        Ok(event)
    }

    #[instrument(skip(self), fields(usage_event_id = %usage_event_id))]
    async fn delete_usage_event(&self, usage_event_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_usage_event"])
            .start_timer();

        sqlx::query("DELETE FROM usage_events WHERE usage_event_id = $1")
            .bind(usage_event_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete usage event", e))?;

        timer.observe_duration();
        info!("Usage event deleted");
        Ok(())
    }

    #[instrument(skip(self, filter), fields(projects = filter.project_ids.len(), start = %filter.start_date, end = %filter.end_date))]
    async fn list_usage_events(
        &self,
        filter: &ListUsageEventsFilter,
    ) -> Result<Vec<UsageEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_usage_events"])
            .start_timer();

        let events = sqlx::query_as::<_, UsageEvent>(&format!(
            r#"
            SELECT {USAGE_EVENT_COLUMNS}
            FROM usage_events
            WHERE project_id = ANY($1)
              AND event_date >= $2
              AND event_date <= $3
            ORDER BY event_date, created_utc
            "#
        ))
        .bind(&filter.project_ids)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list usage events", e))?;

        timer.observe_duration();
        Ok(events)
    }

    // =========================================================================
    // Pending invoice items
    // =========================================================================

    #[instrument(skip(self, input), fields(client_id = %input.client_id, project_id = %input.project_id, source = input.source.as_str()))]
    async fn insert_pending_item(
        &self,
        input: &CreatePendingItem,
    ) -> Result<PendingInvoiceItem, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_pending_item"])
            .start_timer();

        let item = sqlx::query_as::<_, PendingInvoiceItem>(
            r#"
            INSERT INTO pending_invoice_items (pending_item_id, client_id, project_id, source_type, source_ref, description, quantity, unit_price_cents, metadata, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING pending_item_id, client_id, project_id, source_type, source_ref, description, quantity, unit_price_cents, metadata, created_by, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.client_id)
        .bind(input.project_id)
        .bind(input.source.as_str())
        .bind(input.source_ref)
        .bind(&input.description)
        .bind(input.quantity)
        .bind(input.unit_price_cents)
        .bind(&input.metadata)
        .bind(&input.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("insert pending invoice item", e))?;

        timer.observe_duration();
        info!(pending_item_id = %item.pending_item_id, "Pending invoice item created");

        Ok(item)
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get invoice", e))?;

        timer.observe_duration();
        Ok(invoice)
    }

    // The share id is a bearer secret; keep it out of spans.
    #[instrument(skip(self, share_id))]
    async fn get_invoice_by_share_id(&self, share_id: &str) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice_by_share_id"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE share_id = $1"
        ))
        .bind(share_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get invoice by share id", e))?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    async fn list_invoices_for_client(&self, client_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices_for_client"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE client_id = $1 ORDER BY created_utc DESC"
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list invoices", e))?;

        timer.observe_duration();
        Ok(invoices)
    }

    #[instrument(skip(self, link), fields(invoice_id = %invoice_id))]
    async fn set_invoice_share_link(
        &self,
        invoice_id: Uuid,
        link: &ShareLink,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_invoice_share_link"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET share_id = $2, share_expires_utc = $3
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_id)
        .bind(&link.share_id)
        .bind(link.expires_utc)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("set invoice share link", e))?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        // Line items cascade.
        let result = sqlx::query("DELETE FROM invoices WHERE invoice_id = $1 AND status = 'draft'")
            .bind(invoice_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete invoice", e))?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Line items
    // =========================================================================

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn list_line_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceLineItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_line_items"])
            .start_timer();

        let items = sqlx::query_as::<_, InvoiceLineItem>(&format!(
            r#"
            SELECT {LINE_ITEM_COLUMNS}
            FROM invoice_line_items
            WHERE invoice_id = $1
            ORDER BY sort_order, created_utc
            "#
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list line items", e))?;

        timer.observe_duration();
        Ok(items)
    }

    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id, line_type = input.line_type.as_str()))]
    async fn insert_line_item(
        &self,
        input: &CreateLineItem,
    ) -> Result<Option<InvoiceLineItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_line_item"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin line item transaction", e))?;

        // Totals move with the line, and only while the invoice is a draft.
        let updated = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE invoices
            SET subtotal_cents = subtotal_cents + $2,
                total_cents = total_cents + $2,
                net_amount_cents = net_amount_cents + $2
            WHERE invoice_id = $1 AND status = 'draft'
            RETURNING invoice_id
            "#,
        )
        .bind(input.invoice_id)
        .bind(input.amount_cents)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("update invoice totals", e))?;

        if updated.is_none() {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(None);
        }

        let item = sqlx::query_as::<_, InvoiceLineItem>(&format!(
            r#"
            INSERT INTO invoice_line_items (line_item_id, invoice_id, description, quantity, unit_price_cents, amount_cents, line_type, sort_order, metadata, processor_line_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {LINE_ITEM_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.invoice_id)
        .bind(&input.description)
        .bind(input.quantity)
        .bind(input.unit_price_cents)
        .bind(input.amount_cents)
        .bind(input.line_type.as_str())
        .bind(input.sort_order)
        .bind(&input.metadata)
        .bind(&input.processor_line_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("insert line item", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit line item", e))?;

        timer.observe_duration();
        info!(line_item_id = %item.line_item_id, "Line item created");

        Ok(Some(item))
    }
}
