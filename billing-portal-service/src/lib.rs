//! Billing portal service: usage ingestion, invoice line items and the
//! client portal read path.

pub mod access;
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod ingestion;
pub mod middleware;
pub mod models;
pub mod reports;
pub mod services;
pub mod startup;

pub use startup::{build_router, AppState, Application};
