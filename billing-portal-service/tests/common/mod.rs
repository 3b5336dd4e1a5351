//! Shared fixtures for integration tests.
//!
//! Tests run against an in-memory [`BillingStore`] so no PostgreSQL instance
//! is needed. Failure injection switches let tests exercise the error paths
//! of the charge saga and the upstream error mapping.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use billing_portal_service::access::AdminPolicy;
use billing_portal_service::config::PortalSettings;
use billing_portal_service::models::{
    BillingPeriod, Client, ClientPortalMembership, CreateLineItem, CreatePendingItem,
    CreateUsageEvent, Invoice, InvoiceLineItem, ListUsageEventsFilter, PaymentRecord,
    PendingInvoiceItem, PortalRole, Project, ShareLink, UsageEvent,
};
use billing_portal_service::services::{
    BillingStore, Identity, IdentityResolver, MirrorInvoice, MirrorLineItem, PaymentMirror,
    PaymentMirrorError,
};
use billing_portal_service::{build_router, AppState};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

pub const OPERATOR_TOKEN: &str = "operator-token";
pub const OPERATOR_EMAIL: &str = "ops@billing.example.com";

#[derive(Default)]
struct Tables {
    clients: HashMap<Uuid, Client>,
    memberships: Vec<ClientPortalMembership>,
    projects: HashMap<Uuid, Project>,
    periods: HashMap<Uuid, BillingPeriod>,
    usage_events: HashMap<Uuid, UsageEvent>,
    pending_items: Vec<PendingInvoiceItem>,
    invoices: HashMap<Uuid, Invoice>,
    line_items: Vec<InvoiceLineItem>,
}

fn store_failure(operation: &str) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{} failed: connection reset", operation))
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    pub fail_usage_insert: AtomicBool,
    pub fail_pending_insert: AtomicBool,
    pub fail_usage_delete: AtomicBool,
    pub fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn check_reads(&self, operation: &str) -> Result<(), AppError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(store_failure(operation));
        }
        Ok(())
    }

    pub fn add_client(&self, name: &str, created_by: &str, portal_enabled: Option<bool>) -> Client {
        let client = Client {
            client_id: Uuid::new_v4(),
            name: name.to_string(),
            company_name: Some(format!("{} Inc", name)),
            created_by: created_by.to_string(),
            client_portal_enabled: portal_enabled,
            created_utc: Utc::now(),
        };
        self.tables
            .lock()
            .unwrap()
            .clients
            .insert(client.client_id, client.clone());
        client
    }

    pub fn add_membership(&self, client_id: Uuid, user_id: &str, role: PortalRole) {
        self.tables
            .lock()
            .unwrap()
            .memberships
            .push(ClientPortalMembership {
                client_id,
                user_id: user_id.to_string(),
                role: role.as_str().to_string(),
                created_utc: Utc::now(),
            });
    }

    pub fn add_project(&self, client_id: Uuid, name: &str) -> Project {
        let project = Project {
            project_id: Uuid::new_v4(),
            client_id,
            name: name.to_string(),
            created_utc: Utc::now(),
        };
        self.tables
            .lock()
            .unwrap()
            .projects
            .insert(project.project_id, project.clone());
        project
    }

    pub fn add_period(&self, client_id: Uuid, label: &str) -> BillingPeriod {
        let period = BillingPeriod {
            billing_period_id: Uuid::new_v4(),
            client_id,
            label: label.to_string(),
            period_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            created_utc: Utc::now(),
        };
        self.tables
            .lock()
            .unwrap()
            .periods
            .insert(period.billing_period_id, period.clone());
        period
    }

    pub fn add_invoice(&self, client_id: Uuid, number: &str, status: &str) -> Invoice {
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            client_id,
            invoice_number: number.to_string(),
            status: status.to_string(),
            due_date: NaiveDate::from_ymd_opt(2024, 2, 15),
            subtotal_cents: 300,
            tax_cents: 0,
            total_cents: 300,
            net_amount_cents: 300,
            share_id: None,
            share_expires_utc: None,
            portal_payload: None,
            processor_invoice_id: None,
            processor_payment_intent_id: None,
            hosted_pdf_url: None,
            created_utc: Utc::now(),
        };
        self.put_invoice(invoice.clone());
        invoice
    }

    pub fn put_invoice(&self, invoice: Invoice) {
        self.tables
            .lock()
            .unwrap()
            .invoices
            .insert(invoice.invoice_id, invoice);
    }

    pub fn share_invoice(&self, invoice_id: Uuid, share_id: &str, expires: Option<DateTime<Utc>>) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(invoice) = tables.invoices.get_mut(&invoice_id) {
            invoice.share_id = Some(share_id.to_string());
            invoice.share_expires_utc = expires;
        }
    }

    pub fn add_event(
        &self,
        project_id: Uuid,
        date: NaiveDate,
        metric: &str,
        amount_cents: i64,
    ) -> UsageEvent {
        let event = UsageEvent {
            usage_event_id: Uuid::new_v4(),
            project_id,
            billing_period_id: Uuid::new_v4(),
            event_date: date,
            metric_type: metric.to_string(),
            quantity: Decimal::from(100),
            unit_price_cents: Decimal::ZERO,
            amount_cents: Some(amount_cents),
            description: format!("{} usage", metric),
            metadata: None,
            created_by: "importer".to_string(),
            created_utc: Utc::now(),
        };
        self.tables
            .lock()
            .unwrap()
            .usage_events
            .insert(event.usage_event_id, event.clone());
        event
    }

    pub fn usage_events(&self) -> Vec<UsageEvent> {
        self.tables
            .lock()
            .unwrap()
            .usage_events
            .values()
            .cloned()
            .collect()
    }

    pub fn pending_items(&self) -> Vec<PendingInvoiceItem> {
        self.tables.lock().unwrap().pending_items.clone()
    }

    pub fn invoice(&self, invoice_id: Uuid) -> Option<Invoice> {
        self.tables.lock().unwrap().invoices.get(&invoice_id).cloned()
    }

    /// Seed a line without touching invoice totals or status.
    pub fn add_line_item(&self, input: &CreateLineItem) -> InvoiceLineItem {
        let item = line_item_row(input);
        self.tables.lock().unwrap().line_items.push(item.clone());
        item
    }

    pub fn line_items(&self, invoice_id: Uuid) -> Vec<InvoiceLineItem> {
        self.tables
            .lock()
            .unwrap()
            .line_items
            .iter()
            .filter(|l| l.invoice_id == invoice_id)
            .cloned()
            .collect()
    }
}

fn line_item_row(input: &CreateLineItem) -> InvoiceLineItem {
    InvoiceLineItem {
        line_item_id: Uuid::new_v4(),
        invoice_id: input.invoice_id,
        description: input.description.clone(),
        quantity: input.quantity,
        unit_price_cents: input.unit_price_cents,
        amount_cents: Some(input.amount_cents),
        line_type: input.line_type.as_str().to_string(),
        sort_order: input.sort_order,
        metadata: input.metadata.clone(),
        processor_line_id: input.processor_line_id.clone(),
        created_utc: Utc::now(),
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.check_reads("health_check")
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        self.check_reads("get_client")?;
        Ok(self.tables.lock().unwrap().clients.get(&client_id).cloned())
    }

    async fn get_clients(&self, client_ids: &[Uuid]) -> Result<Vec<Client>, AppError> {
        self.check_reads("get_clients")?;
        let tables = self.tables.lock().unwrap();
        let mut clients: Vec<Client> = client_ids
            .iter()
            .filter_map(|id| tables.clients.get(id).cloned())
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clients)
    }

    async fn list_clients_created_by(&self, user_id: &str) -> Result<Vec<Client>, AppError> {
        self.check_reads("list_clients_created_by")?;
        let tables = self.tables.lock().unwrap();
        let mut clients: Vec<Client> = tables
            .clients
            .values()
            .filter(|c| c.created_by == user_id)
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clients)
    }

    async fn get_membership(
        &self,
        client_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ClientPortalMembership>, AppError> {
        self.check_reads("get_membership")?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .memberships
            .iter()
            .find(|m| m.client_id == client_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_memberships_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ClientPortalMembership>, AppError> {
        self.check_reads("list_memberships_for_user")?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>, AppError> {
        self.check_reads("get_project")?;
        Ok(self.tables.lock().unwrap().projects.get(&project_id).cloned())
    }

    async fn list_projects_for_client(&self, client_id: Uuid) -> Result<Vec<Project>, AppError> {
        self.check_reads("list_projects_for_client")?;
        let tables = self.tables.lock().unwrap();
        let mut projects: Vec<Project> = tables
            .projects
            .values()
            .filter(|p| p.client_id == client_id)
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn get_billing_period(
        &self,
        billing_period_id: Uuid,
    ) -> Result<Option<BillingPeriod>, AppError> {
        self.check_reads("get_billing_period")?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .periods
            .get(&billing_period_id)
            .cloned())
    }

    async fn insert_usage_event(&self, input: &CreateUsageEvent) -> Result<UsageEvent, AppError> {
        if self.fail_usage_insert.load(Ordering::SeqCst) {
            return Err(store_failure("insert_usage_event"));
        }
        let event = UsageEvent {
            usage_event_id: Uuid::new_v4(),
            project_id: input.project_id,
            billing_period_id: input.billing_period_id,
            event_date: input.event_date,
            metric_type: input.metric_type.clone(),
            quantity: input.quantity,
            unit_price_cents: input.unit_price_cents,
            amount_cents: input.amount_cents,
            description: input.description.clone(),
            metadata: input.metadata.clone(),
            created_by: input.created_by.clone(),
            created_utc: Utc::now(),
        };
        self.tables
            .lock()
            .unwrap()
            .usage_events
            .insert(event.usage_event_id, event.clone());
        Ok(event)
    }

    async fn get_usage_event(&self, usage_event_id: Uuid) -> Result<Option<UsageEvent>, AppError> {
        self.check_reads("get_usage_event")?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .usage_events
            .get(&usage_event_id)
            .cloned())
    }

    async fn delete_usage_event(&self, usage_event_id: Uuid) -> Result<(), AppError> {
        if self.fail_usage_delete.load(Ordering::SeqCst) {
            return Err(store_failure("delete_usage_event"));
        }
        self.tables
            .lock()
            .unwrap()
            .usage_events
            .remove(&usage_event_id);
        Ok(())
    }

    async fn list_usage_events(
        &self,
        filter: &ListUsageEventsFilter,
    ) -> Result<Vec<UsageEvent>, AppError> {
        self.check_reads("list_usage_events")?;
        let tables = self.tables.lock().unwrap();
        let mut events: Vec<UsageEvent> = tables
            .usage_events
            .values()
            .filter(|e| {
                filter.project_ids.contains(&e.project_id)
                    && e.event_date >= filter.start_date
                    && e.event_date <= filter.end_date
            })
            .cloned()
            .collect();
        events.sort_by(|a, b| a.event_date.cmp(&b.event_date));
        Ok(events)
    }

    async fn insert_pending_item(
        &self,
        input: &CreatePendingItem,
    ) -> Result<PendingInvoiceItem, AppError> {
        if self.fail_pending_insert.load(Ordering::SeqCst) {
            return Err(store_failure("insert_pending_item"));
        }
        let item = PendingInvoiceItem {
            pending_item_id: Uuid::new_v4(),
            client_id: input.client_id,
            project_id: input.project_id,
            source_type: input.source.as_str().to_string(),
            source_ref: input.source_ref,
            description: input.description.clone(),
            quantity: input.quantity,
            unit_price_cents: input.unit_price_cents,
            metadata: input.metadata.clone(),
            created_by: input.created_by.clone(),
            created_utc: Utc::now(),
        };
        self.tables.lock().unwrap().pending_items.push(item.clone());
        Ok(item)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.check_reads("get_invoice")?;
        Ok(self.invoice(invoice_id))
    }

    async fn get_invoice_by_share_id(&self, share_id: &str) -> Result<Option<Invoice>, AppError> {
        self.check_reads("get_invoice_by_share_id")?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .invoices
            .values()
            .find(|i| i.share_id.as_deref() == Some(share_id))
            .cloned())
    }

    async fn list_invoices_for_client(&self, client_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        self.check_reads("list_invoices_for_client")?;
        let tables = self.tables.lock().unwrap();
        let mut invoices: Vec<Invoice> = tables
            .invoices
            .values()
            .filter(|i| i.client_id == client_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(invoices)
    }

    async fn set_invoice_share_link(
        &self,
        invoice_id: Uuid,
        link: &ShareLink,
    ) -> Result<Option<Invoice>, AppError> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables.invoices.get_mut(&invoice_id).map(|invoice| {
            invoice.share_id = Some(link.share_id.clone());
            invoice.share_expires_utc = Some(link.expires_utc);
            invoice.clone()
        }))
    }

    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().unwrap();
        let is_draft = tables
            .invoices
            .get(&invoice_id)
            .is_some_and(|i| i.is_draft());
        if !is_draft {
            return Ok(false);
        }
        tables.invoices.remove(&invoice_id);
        tables.line_items.retain(|l| l.invoice_id != invoice_id);
        Ok(true)
    }

    async fn list_line_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceLineItem>, AppError> {
        self.check_reads("list_line_items")?;
        let mut items = self.line_items(invoice_id);
        items.sort_by_key(|l| l.sort_order);
        Ok(items)
    }

    async fn insert_line_item(
        &self,
        input: &CreateLineItem,
    ) -> Result<Option<InvoiceLineItem>, AppError> {
        let mut tables = self.tables.lock().unwrap();
        let Some(invoice) = tables
            .invoices
            .get_mut(&input.invoice_id)
            .filter(|invoice| invoice.status == "draft")
        else {
            return Ok(None);
        };
        let grow = |value: i64| {
            value.checked_add(input.amount_cents).ok_or_else(|| {
                AppError::DatabaseError(anyhow::anyhow!("bigint out of range"))
            })
        };
        let totals = (
            grow(invoice.subtotal_cents)?,
            grow(invoice.total_cents)?,
            grow(invoice.net_amount_cents)?,
        );
        (invoice.subtotal_cents, invoice.total_cents, invoice.net_amount_cents) = totals;

        let item = line_item_row(input);
        tables.line_items.push(item.clone());
        Ok(Some(item))
    }
}

/// Records calls and answers from canned data.
#[derive(Default)]
pub struct FakePaymentMirror {
    pub fail: AtomicBool,
    pub added_lines: Mutex<Vec<(String, MirrorLineItem)>>,
    pub deleted: Mutex<Vec<String>>,
    pub hosted_pdf: Mutex<Option<String>>,
    pub charges: Mutex<Vec<PaymentRecord>>,
}

impl FakePaymentMirror {
    fn check(&self) -> Result<(), PaymentMirrorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentMirrorError::Api {
                status: 503,
                message: "processor unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentMirror for FakePaymentMirror {
    async fn retrieve_invoice(
        &self,
        processor_invoice_id: &str,
    ) -> Result<MirrorInvoice, PaymentMirrorError> {
        self.check()?;
        Ok(MirrorInvoice {
            id: processor_invoice_id.to_string(),
            status: "open".to_string(),
            hosted_invoice_pdf: self.hosted_pdf.lock().unwrap().clone(),
            payment_intent: None,
        })
    }

    async fn add_line_item(
        &self,
        processor_invoice_id: &str,
        line: &MirrorLineItem,
    ) -> Result<String, PaymentMirrorError> {
        self.check()?;
        let mut lines = self.added_lines.lock().unwrap();
        lines.push((processor_invoice_id.to_string(), line.clone()));
        Ok(format!("il_{}", lines.len()))
    }

    async fn delete_draft_invoice(&self, processor_invoice_id: &str) -> Result<(), PaymentMirrorError> {
        self.check()?;
        self.deleted
            .lock()
            .unwrap()
            .push(processor_invoice_id.to_string());
        Ok(())
    }

    async fn list_charges(
        &self,
        _payment_intent_id: &str,
    ) -> Result<Vec<PaymentRecord>, PaymentMirrorError> {
        self.check()?;
        Ok(self.charges.lock().unwrap().clone())
    }
}

/// Maps fixed bearer tokens to identities.
#[derive(Default)]
pub struct StaticIdentityResolver {
    tokens: Mutex<HashMap<String, Identity>>,
}

impl StaticIdentityResolver {
    pub fn register(&self, token: &str, user_id: &str, email: Option<&str>) {
        self.tokens.lock().unwrap().insert(
            token.to_string(),
            Identity {
                user_id: user_id.to_string(),
                email: email.map(String::from),
            },
        );
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, bearer: &str) -> Result<Option<Identity>, AppError> {
        Ok(self.tokens.lock().unwrap().get(bearer).cloned())
    }
}

/// A router wired to in-memory collaborators.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub payments: Arc<FakePaymentMirror>,
    pub identities: Arc<StaticIdentityResolver>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_portal(PortalSettings::default())
    }

    pub fn with_portal(portal: PortalSettings) -> Self {
        let store = MemoryStore::new();
        let payments = Arc::new(FakePaymentMirror::default());
        let identities = Arc::new(StaticIdentityResolver::default());
        identities.register(OPERATOR_TOKEN, "operator", Some(OPERATOR_EMAIL));

        let state = AppState::new(
            store.clone(),
            payments.clone(),
            identities.clone(),
            AdminPolicy::new([OPERATOR_EMAIL]),
            portal,
        );

        Self {
            store,
            payments,
            identities,
            router: build_router(state),
        }
    }

    /// Register `user_id` with a token equal to `token-{user_id}`.
    pub fn user(&self, user_id: &str) -> String {
        let token = format!("token-{}", user_id);
        self.identities
            .register(&token, user_id, Some(&format!("{}@client.example.com", user_id)));
        token
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> Response {
        let mut builder = Request::builder().method("DELETE").uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn json_body(response: Response) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let bytes = body_bytes(response).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

pub fn days_ago(days: i64) -> NaiveDate {
    (Utc::now() - Duration::days(days)).date_naive()
}
