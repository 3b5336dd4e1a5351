//! Domain models for billing-portal-service.

mod client;
mod invoice;
mod line_item;
mod pending_item;
mod usage;

pub use client::{BillingPeriod, Client, ClientPortalMembership, PortalRole, Project};
pub use invoice::{Invoice, InvoiceStatus, PaymentRecord, ShareLink, UsageDetailLine};
pub use line_item::{
    compute_amount_cents, next_sort_order, validate_line_amounts, CreateLineItem,
    InvoiceLineItem, LineItemError, LineType,
};
pub use pending_item::{CreatePendingItem, PendingInvoiceItem, PendingSource};
pub use usage::{round_cents, CreateUsageEvent, ListUsageEventsFilter, UsageEvent};
