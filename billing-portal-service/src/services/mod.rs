//! Services module for billing-portal-service.

pub mod database;
pub mod identity;
pub mod metrics;
pub mod payments;
pub mod store;

pub use database::Database;
pub use identity::{Identity, IdentityResolver, JwtIdentityResolver};
pub use metrics::{get_metrics, init_metrics};
pub use payments::{HttpPaymentMirror, MirrorInvoice, MirrorLineItem, PaymentMirror, PaymentMirrorError};
pub use store::BillingStore;
