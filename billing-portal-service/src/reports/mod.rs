//! Read models served by the client portal.

pub mod breakdown;
pub mod statement;

pub use breakdown::{
    build_usage_report, BreakdownEntry, GroupBy, ReportError, ReportRange, TimeseriesPoint,
    UsageEventView, UsageReport, UsageSummary,
};
pub use statement::{csv_field, format_cents, render_statement_csv, statement_filename};
