//! HTTP handlers for billing-portal-service.

pub mod health;
pub mod imports;
pub mod invoices;
pub mod portal;

pub use health::{health_check, metrics_handler, readiness_check};
