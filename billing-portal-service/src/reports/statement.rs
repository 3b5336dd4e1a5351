//! Downloadable CSV statement for one invoice.

use crate::models::{Invoice, InvoiceLineItem};
use rust_decimal::Decimal;
use std::borrow::Cow;

/// Cents as a two-decimal string, e.g. `-1234` -> `-12.34`.
pub fn format_cents(cents: i64) -> String {
    Decimal::new(cents, 2).to_string()
}

/// Quote a field when it contains a delimiter, quote, CR or LF.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn push_row<S: AsRef<str>>(out: &mut String, fields: &[S]) {
    let row: Vec<Cow<'_, str>> = fields.iter().map(|f| csv_field(f.as_ref())).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

/// Attachment file name for an invoice statement.
pub fn statement_filename(invoice: &Invoice) -> String {
    let number: String = invoice
        .invoice_number
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("statement-{}.csv", number)
}

/// Render header, line items, totals and any usage detail as CSV.
pub fn render_statement_csv(invoice: &Invoice, line_items: &[InvoiceLineItem]) -> String {
    let mut out = String::new();

    push_row(&mut out, &["Invoice", invoice.invoice_number.as_str()]);
    push_row(&mut out, &["Status", invoice.status.as_str()]);
    let due = invoice
        .due_date
        .map(|d| d.to_string())
        .unwrap_or_default();
    push_row(&mut out, &["Due Date", due.as_str()]);
    out.push('\n');

    push_row(&mut out, &["Description", "Quantity", "Unit Price", "Amount"]);
    let mut items: Vec<&InvoiceLineItem> = line_items.iter().collect();
    items.sort_by_key(|item| item.sort_order);
    for item in items {
        push_row(
            &mut out,
            &[
                item.description.clone(),
                item.quantity.normalize().to_string(),
                format_cents(item.unit_price_cents),
                item.display_amount_cents()
                    .map(format_cents)
                    .unwrap_or_default(),
            ],
        );
    }
    out.push('\n');

    push_row(&mut out, &["Subtotal".to_string(), format_cents(invoice.subtotal_cents)]);
    push_row(&mut out, &["Tax".to_string(), format_cents(invoice.tax_cents)]);
    push_row(&mut out, &["Total".to_string(), format_cents(invoice.total_cents)]);
    push_row(
        &mut out,
        &["Net Amount".to_string(), format_cents(invoice.net_amount_cents)],
    );

    let usage = invoice.usage_breakdown();
    if !usage.is_empty() {
        out.push('\n');
        push_row(&mut out, &["Usage Detail"]);
        push_row(&mut out, &["Item", "Quantity", "Cost"]);
        for line in usage {
            push_row(
                &mut out,
                &[line.label, line.quantity, format_cents(line.cost_cents)],
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn invoice() -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            invoice_number: "INV/0042".to_string(),
            status: "open".to_string(),
            due_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            subtotal_cents: 12345,
            tax_cents: 0,
            total_cents: 12345,
            net_amount_cents: 12345,
            share_id: None,
            share_expires_utc: None,
            portal_payload: Some(serde_json::json!({
                "usageBreakdown": [
                    {"label": "tokens", "quantity": "1500", "costCents": 300}
                ]
            })),
            processor_invoice_id: None,
            processor_payment_intent_id: None,
            hosted_pdf_url: None,
            created_utc: Utc::now(),
        }
    }

    fn line(description: &str, sort_order: i32, amount: i64) -> InvoiceLineItem {
        InvoiceLineItem {
            line_item_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            description: description.to_string(),
            quantity: Decimal::ONE,
            unit_price_cents: amount,
            amount_cents: Some(amount),
            line_type: "other".to_string(),
            sort_order,
            metadata: None,
            processor_line_id: None,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn formats_cents_once() {
        assert_eq!(format_cents(300), "3.00");
        assert_eq!(format_cents(-5), "-0.05");
        assert_eq!(format_cents(0), "0.00");
    }

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn statement_lists_lines_totals_and_usage() {
        let csv = render_statement_csv(
            &invoice(),
            &[line("Support, monthly", 1, 12000), line("Usage", 0, 345)],
        );

        let expected = "Invoice,INV/0042\n\
                        Status,open\n\
                        Due Date,2024-02-01\n\
                        \n\
                        Description,Quantity,Unit Price,Amount\n\
                        Usage,1,3.45,3.45\n\
                        \"Support, monthly\",1,120.00,120.00\n\
                        \n\
                        Subtotal,123.45\n\
                        Tax,0.00\n\
                        Total,123.45\n\
                        Net Amount,123.45\n\
                        \n\
                        Usage Detail\n\
                        Item,Quantity,Cost\n\
                        tokens,1500,3.00\n";
        assert_eq!(csv, expected);
    }

    #[test]
    fn net_amount_follows_total_and_unpriceable_line_is_blank() {
        let mut inv = invoice();
        inv.net_amount_cents = 10000;
        inv.portal_payload = None;
        let mut huge = line("Overflow", 0, 1);
        huge.quantity = Decimal::MAX;
        huge.unit_price_cents = 2;
        huge.amount_cents = None;

        let csv = render_statement_csv(&inv, &[huge]);

        assert!(csv.contains("Overflow,"));
        assert!(csv.contains(",0.02,\n"));
        assert!(csv.ends_with("Total,123.45\nNet Amount,100.00\n"));
    }

    #[test]
    fn filename_is_sanitized() {
        assert_eq!(statement_filename(&invoice()), "statement-INV_0042.csv");
    }
}
