//! Operator edits to draft invoices and their payment processor mirror.

mod common;

use axum::http::StatusCode;
use common::{json_body, TestApp, OPERATOR_TOKEN};
use serde_json::json;
use std::sync::atomic::Ordering;
use uuid::Uuid;

#[tokio::test]
async fn line_items_append_in_sort_order() {
    let app = TestApp::new();
    let client = app.store.add_client("Acme", "owner-1", None);
    let invoice = app.store.add_invoice(client.client_id, "INV-0001", "draft");
    let uri = format!("/admin/invoices/{}/line-items", invoice.invoice_id);

    let response = app
        .post_json(
            &uri,
            Some(OPERATOR_TOKEN),
            json!({ "description": "Setup", "quantity": "1", "unitPriceCents": 5000 }),
        )
        .await;
    let (status, first) = json_body(response).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["amountCents"], 5000);
    assert_eq!(first["lineType"], "other");

    let response = app
        .post_json(
            &uri,
            Some(OPERATOR_TOKEN),
            json!({
                "description": "Support hours",
                "quantity": "2.5",
                "unitPriceCents": 1000,
                "amountCents": 2500,
                "lineType": "project",
            }),
        )
        .await;
    let (status, second) = json_body(response).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(second["sortOrder"].as_i64() > first["sortOrder"].as_i64());
    assert_eq!(app.store.line_items(invoice.invoice_id).len(), 2);
}

#[tokio::test]
async fn appended_lines_grow_invoice_totals() {
    let app = TestApp::new();
    let client = app.store.add_client("Acme", "owner-1", None);
    let invoice = app.store.add_invoice(client.client_id, "INV-0001", "draft");
    let uri = format!("/admin/invoices/{}/line-items", invoice.invoice_id);

    for body in [
        json!({ "description": "Setup", "quantity": "1", "unitPriceCents": 5000 }),
        json!({ "description": "Support hours", "quantity": "2.5", "unitPriceCents": 1000 }),
    ] {
        let response = app.post_json(&uri, Some(OPERATOR_TOKEN), body).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let stored = app.store.invoice(invoice.invoice_id).unwrap();
    assert_eq!(stored.subtotal_cents, 300 + 5000 + 2500);
    assert_eq!(stored.total_cents, 7800);
    assert_eq!(stored.net_amount_cents, 7800);
    assert_eq!(stored.tax_cents, 0);
}

#[tokio::test]
async fn line_beyond_cents_range_is_rejected() {
    let app = TestApp::new();
    let client = app.store.add_client("Acme", "owner-1", None);
    let invoice = app.store.add_invoice(client.client_id, "INV-0001", "draft");

    let response = app
        .post_json(
            &format!("/admin/invoices/{}/line-items", invoice.invoice_id),
            Some(OPERATOR_TOKEN),
            json!({
                "description": "Runaway usage",
                "quantity": "100000000000000000000",
                "unitPriceCents": 10_000_000_000i64,
            }),
        )
        .await;
    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Amount exceeds the supported range"));
    assert!(app.store.line_items(invoice.invoice_id).is_empty());
    assert_eq!(app.store.invoice(invoice.invoice_id).unwrap().total_cents, 300);
}

#[tokio::test]
async fn mismatched_amount_is_rejected() {
    let app = TestApp::new();
    let client = app.store.add_client("Acme", "owner-1", None);
    let invoice = app.store.add_invoice(client.client_id, "INV-0001", "draft");

    let response = app
        .post_json(
            &format!("/admin/invoices/{}/line-items", invoice.invoice_id),
            Some(OPERATOR_TOKEN),
            json!({
                "description": "Support hours",
                "quantity": "2",
                "unitPriceCents": 1000,
                "amountCents": 1999,
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.store.line_items(invoice.invoice_id).is_empty());
}

#[tokio::test]
async fn finalized_invoice_cannot_take_line_items() {
    let app = TestApp::new();
    let client = app.store.add_client("Acme", "owner-1", None);
    let invoice = app.store.add_invoice(client.client_id, "INV-0001", "open");

    let response = app
        .post_json(
            &format!("/admin/invoices/{}/line-items", invoice.invoice_id),
            Some(OPERATOR_TOKEN),
            json!({ "description": "Late fee", "quantity": "1", "unitPriceCents": 500 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(app.store.line_items(invoice.invoice_id).is_empty());
    assert_eq!(app.store.invoice(invoice.invoice_id).unwrap().total_cents, 300);
}

#[tokio::test]
async fn mirrored_draft_gets_processor_line_first() {
    let app = TestApp::new();
    let client = app.store.add_client("Acme", "owner-1", None);
    let mut invoice = app.store.add_invoice(client.client_id, "INV-0001", "draft");
    invoice.processor_invoice_id = Some("in_123".to_string());
    app.store.put_invoice(invoice.clone());

    let response = app
        .post_json(
            &format!("/admin/invoices/{}/line-items", invoice.invoice_id),
            Some(OPERATOR_TOKEN),
            json!({ "description": "Setup", "quantity": "1", "unitPriceCents": 5000 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let added = app.payments.added_lines.lock().unwrap().clone();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].0, "in_123");
    assert_eq!(added[0].1.amount_cents, 5000);

    let stored = app.store.line_items(invoice.invoice_id);
    assert_eq!(stored[0].processor_line_id.as_deref(), Some("il_1"));
}

#[tokio::test]
async fn processor_failure_blocks_local_insert() {
    let app = TestApp::new();
    let client = app.store.add_client("Acme", "owner-1", None);
    let mut invoice = app.store.add_invoice(client.client_id, "INV-0001", "draft");
    invoice.processor_invoice_id = Some("in_123".to_string());
    app.store.put_invoice(invoice.clone());
    app.payments.fail.store(true, Ordering::SeqCst);

    let response = app
        .post_json(
            &format!("/admin/invoices/{}/line-items", invoice.invoice_id),
            Some(OPERATOR_TOKEN),
            json!({ "description": "Setup", "quantity": "1", "unitPriceCents": 5000 }),
        )
        .await;
    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Unable to complete request");
    assert!(app.store.line_items(invoice.invoice_id).is_empty());
}

#[tokio::test]
async fn deleting_a_draft_succeeds_even_if_processor_fails() {
    let app = TestApp::new();
    let client = app.store.add_client("Acme", "owner-1", None);
    let mut invoice = app.store.add_invoice(client.client_id, "INV-0001", "draft");
    invoice.processor_invoice_id = Some("in_123".to_string());
    app.store.put_invoice(invoice.clone());
    app.payments.fail.store(true, Ordering::SeqCst);

    let response = app
        .delete(
            &format!("/admin/invoices/{}", invoice.invoice_id),
            Some(OPERATOR_TOKEN),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.store.invoice(invoice.invoice_id).is_none());
}

#[tokio::test]
async fn deleting_a_paid_invoice_conflicts() {
    let app = TestApp::new();
    let client = app.store.add_client("Acme", "owner-1", None);
    let invoice = app.store.add_invoice(client.client_id, "INV-0001", "paid");

    let response = app
        .delete(
            &format!("/admin/invoices/{}", invoice.invoice_id),
            Some(OPERATOR_TOKEN),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(app.store.invoice(invoice.invoice_id).is_some());

    let response = app
        .delete(
            &format!("/admin/invoices/{}", Uuid::new_v4()),
            Some(OPERATOR_TOKEN),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_privileged_caller_is_forbidden() {
    let app = TestApp::new();
    let client = app.store.add_client("Acme", "owner-1", None);
    let invoice = app.store.add_invoice(client.client_id, "INV-0001", "draft");
    let owner = app.user("owner-1");

    let response = app
        .delete(&format!("/admin/invoices/{}", invoice.invoice_id), Some(&owner))
        .await;
    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Privileged access required");
    assert!(app.store.invoice(invoice.invoice_id).is_some());
}
