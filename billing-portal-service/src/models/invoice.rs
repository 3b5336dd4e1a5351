//! Invoice model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status. Only drafts are mutable, so unrecognised values never
/// parse as draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
    Uncollectible,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Open => "open",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
            InvoiceStatus::Uncollectible => "uncollectible",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "draft" => InvoiceStatus::Draft,
            "paid" => InvoiceStatus::Paid,
            "void" => InvoiceStatus::Void,
            "uncollectible" => InvoiceStatus::Uncollectible,
            _ => InvoiceStatus::Open,
        }
    }
}

/// Invoice document.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    pub status: String,
    pub due_date: Option<NaiveDate>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub net_amount_cents: i64,
    pub share_id: Option<String>,
    pub share_expires_utc: Option<DateTime<Utc>>,
    pub portal_payload: Option<serde_json::Value>,
    pub processor_invoice_id: Option<String>,
    pub processor_payment_intent_id: Option<String>,
    pub hosted_pdf_url: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn invoice_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn is_draft(&self) -> bool {
        self.invoice_status() == InvoiceStatus::Draft
    }

    /// A share link is usable until its expiry. Links without an expiry
    /// never lapse.
    pub fn share_link_active(&self, now: DateTime<Utc>) -> bool {
        self.share_expires_utc.map_or(true, |expires| expires >= now)
    }

    /// Usage detail lines attached to the portal payload, if any.
    pub fn usage_breakdown(&self) -> Vec<UsageDetailLine> {
        let Some(payload) = &self.portal_payload else {
            return Vec::new();
        };

        payload
            .get("usageBreakdown")
            .or_else(|| payload.get("usage_breakdown"))
            .and_then(|v| v.as_array())
            .map(|entries| entries.iter().filter_map(UsageDetailLine::from_json).collect())
            .unwrap_or_default()
    }
}

/// One row of a usage breakdown carried in an invoice's portal payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageDetailLine {
    pub label: String,
    pub quantity: String,
    pub cost_cents: i64,
}

impl UsageDetailLine {
    fn from_json(value: &serde_json::Value) -> Option<Self> {
        let label = ["label", "metricType", "metric_type", "description"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))?
            .to_string();

        let quantity = match value.get("quantity") {
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => String::new(),
        };

        let cost_cents = ["costCents", "cost_cents", "amountCents", "amount_cents"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_i64()))
            .unwrap_or(0);

        Some(Self {
            label,
            quantity,
            cost_cents,
        })
    }
}

/// Input for creating or replacing an invoice share link.
#[derive(Debug, Clone)]
pub struct ShareLink {
    pub share_id: String,
    pub expires_utc: DateTime<Utc>,
}

/// A charge recorded against an invoice's payment intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub charge_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub receipt_url: Option<String>,
}
