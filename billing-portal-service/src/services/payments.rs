//! Payment processor mirror.
//!
//! Invoices created here may be mirrored into an external payment processor.
//! The processor is authoritative for line items added to a mirrored draft;
//! everything else (draft deletion, payment history) is best-effort.

use crate::config::PaymentsConfig;
use crate::models::PaymentRecord;
use crate::services::metrics::PAYMENT_MIRROR_CALLS_TOTAL;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::observability::trace_headers;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors from the payment processor.
#[derive(Debug, Error)]
pub enum PaymentMirrorError {
    #[error("Payment processor is not configured")]
    NotConfigured,

    #[error("Payment processor request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Payment processor returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl From<PaymentMirrorError> for AppError {
    fn from(err: PaymentMirrorError) -> Self {
        AppError::BadGateway(err.to_string())
    }
}

/// Invoice as seen by the payment processor.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorInvoice {
    pub id: String,
    pub status: String,
    pub hosted_invoice_pdf: Option<String>,
    pub payment_intent: Option<String>,
}

/// Line item pushed to a mirrored draft invoice.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorLineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
}

#[derive(Debug, Deserialize)]
struct MirrorLineResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChargeList {
    data: Vec<MirrorCharge>,
}

#[derive(Debug, Deserialize)]
struct MirrorCharge {
    id: String,
    amount: i64,
    status: String,
    created: i64,
    receipt_url: Option<String>,
}

impl MirrorCharge {
    fn into_record(self) -> PaymentRecord {
        PaymentRecord {
            charge_id: self.id,
            amount_cents: self.amount,
            status: self.status,
            created_utc: DateTime::<Utc>::from_timestamp(self.created, 0).unwrap_or_default(),
            receipt_url: self.receipt_url,
        }
    }
}

#[async_trait]
pub trait PaymentMirror: Send + Sync {
    async fn retrieve_invoice(
        &self,
        processor_invoice_id: &str,
    ) -> Result<MirrorInvoice, PaymentMirrorError>;

    /// Returns the processor's id for the new line.
    async fn add_line_item(
        &self,
        processor_invoice_id: &str,
        line: &MirrorLineItem,
    ) -> Result<String, PaymentMirrorError>;

    async fn delete_draft_invoice(&self, processor_invoice_id: &str)
        -> Result<(), PaymentMirrorError>;

    async fn list_charges(
        &self,
        payment_intent_id: &str,
    ) -> Result<Vec<PaymentRecord>, PaymentMirrorError>;
}

/// REST client for the payment processor.
#[derive(Clone)]
pub struct HttpPaymentMirror {
    client: Client,
    config: PaymentsConfig,
}

impl HttpPaymentMirror {
    pub fn new(config: PaymentsConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if the processor is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.api_base_url.is_empty() && !self.config.api_key.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn check(
        &self,
        operation: &str,
        response: Response,
    ) -> Result<Response, PaymentMirrorError> {
        let status = response.status();
        if status.is_success() {
            PAYMENT_MIRROR_CALLS_TOTAL
                .with_label_values(&[operation, "ok"])
                .inc();
            return Ok(response);
        }

        PAYMENT_MIRROR_CALLS_TOTAL
            .with_label_values(&[operation, "error"])
            .inc();
        let message = response.text().await.unwrap_or_default();
        warn!(operation, status = %status, "Payment processor call failed");
        Err(PaymentMirrorError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl PaymentMirror for HttpPaymentMirror {
    #[instrument(skip(self))]
    async fn retrieve_invoice(
        &self,
        processor_invoice_id: &str,
    ) -> Result<MirrorInvoice, PaymentMirrorError> {
        if !self.is_configured() {
            return Err(PaymentMirrorError::NotConfigured);
        }

        let response = self
            .client
            .get(self.url(&format!("/invoices/{}", processor_invoice_id)))
            .bearer_auth(self.config.api_key.expose_secret())
            .headers(trace_headers())
            .send()
            .await?;
        let invoice: MirrorInvoice = self
            .check("retrieve_invoice", response)
            .await?
            .json()
            .await?;

        debug!(status = %invoice.status, "Processor invoice retrieved");
        Ok(invoice)
    }

    #[instrument(skip(self, line))]
    async fn add_line_item(
        &self,
        processor_invoice_id: &str,
        line: &MirrorLineItem,
    ) -> Result<String, PaymentMirrorError> {
        if !self.is_configured() {
            return Err(PaymentMirrorError::NotConfigured);
        }

        let response = self
            .client
            .post(self.url(&format!("/invoices/{}/lines", processor_invoice_id)))
            .bearer_auth(self.config.api_key.expose_secret())
            .headers(trace_headers())
            .json(line)
            .send()
            .await?;
        let created: MirrorLineResponse = self
            .check("add_line_item", response)
            .await?
            .json()
            .await?;

        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn delete_draft_invoice(
        &self,
        processor_invoice_id: &str,
    ) -> Result<(), PaymentMirrorError> {
        if !self.is_configured() {
            return Err(PaymentMirrorError::NotConfigured);
        }

        let response = self
            .client
            .delete(self.url(&format!("/invoices/{}", processor_invoice_id)))
            .bearer_auth(self.config.api_key.expose_secret())
            .headers(trace_headers())
            .send()
            .await?;
        self.check("delete_draft_invoice", response).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_charges(
        &self,
        payment_intent_id: &str,
    ) -> Result<Vec<PaymentRecord>, PaymentMirrorError> {
        if !self.is_configured() {
            return Err(PaymentMirrorError::NotConfigured);
        }

        let response = self
            .client
            .get(self.url(&format!("/payment_intents/{}/charges", payment_intent_id)))
            .bearer_auth(self.config.api_key.expose_secret())
            .headers(trace_headers())
            .send()
            .await?;
        let charges: ChargeList = self.check("list_charges", response).await?.json().await?;

        Ok(charges
            .data
            .into_iter()
            .map(MirrorCharge::into_record)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    #[test]
    fn unconfigured_mirror_is_detected() {
        let mirror = HttpPaymentMirror::new(PaymentsConfig {
            api_base_url: "https://payments.example.com/v1/".to_string(),
            api_key: Secret::new(String::new()),
        });
        assert!(!mirror.is_configured());
        assert_eq!(
            mirror.url("/invoices/in_1"),
            "https://payments.example.com/v1/invoices/in_1"
        );
    }

    #[test]
    fn charge_maps_to_payment_record() {
        let charge: MirrorCharge = serde_json::from_value(serde_json::json!({
            "id": "ch_1",
            "amount": 300,
            "status": "succeeded",
            "created": 1704067200,
            "receipt_url": null
        }))
        .unwrap();

        let record = charge.into_record();
        assert_eq!(record.charge_id, "ch_1");
        assert_eq!(record.amount_cents, 300);
        assert_eq!(record.created_utc.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }
}
