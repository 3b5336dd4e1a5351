//! CSV usage parser.
//!
//! Parsing never fails as a whole. Malformed rows are skipped and reported in
//! [`ParsedUsage::errors`] with their 1-based line number (the header is line 1).

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;

/// Columns every usage file must carry.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "client_name",
    "date",
    "metric_type",
    "quantity",
    "unit_price",
    "description",
];

/// Optional explicit row total, in dollars.
pub const TOTAL_COST_COLUMN: &str = "total_cost";

const DELIMITER: char = ',';

/// One parsed usage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRow {
    pub line: usize,
    pub client_name: String,
    pub date: String,
    pub metric_type: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_cost: Option<Decimal>,
    pub description: String,
}

/// Result of parsing a usage file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedUsage {
    pub rows: Vec<UsageRow>,
    pub errors: Vec<String>,
    pub header: Vec<String>,
}

/// Split one line into fields.
///
/// Delimiters inside double quotes do not split, and `""` inside a quoted
/// field is a literal quote.
pub fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            c if c == DELIMITER && !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    fields.push(current);

    fields
}

fn normalize_header(cell: &str) -> String {
    cell.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Parse a numeric cell, tolerating a leading `$` and thousands separators.
fn parse_number(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

/// Parse raw CSV text into usage rows.
pub fn parse_usage_csv(text: &str) -> ParsedUsage {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();

    let Some(header_index) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return ParsedUsage {
            errors: vec!["File is empty".to_string()],
            ..Default::default()
        };
    };

    let header: Vec<String> = split_line(lines[header_index])
        .iter()
        .map(|cell| normalize_header(cell))
        .collect();

    let mut columns: HashMap<&str, usize> = HashMap::new();
    for (index, name) in header.iter().enumerate() {
        columns.entry(name.as_str()).or_insert(index);
    }

    let mut errors: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|name| !columns.contains_key(*name))
        .map(|name| format!("Missing required column: {}", name))
        .collect();

    let mut rows = Vec::new();

    for (index, raw_line) in lines.iter().enumerate().skip(header_index + 1) {
        if raw_line.trim().is_empty() {
            continue;
        }
        let line = index + 1;
        let fields = split_line(raw_line);
        let cell = |name: &str| -> String {
            columns
                .get(name)
                .and_then(|i| fields.get(*i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let client_name = cell("client_name");
        let metric_type = cell("metric_type");
        let description = cell("description");
        if client_name.is_empty() && metric_type.is_empty() && description.is_empty() {
            continue;
        }

        let quantity_raw = cell("quantity");
        let Some(quantity) = parse_number(&quantity_raw) else {
            errors.push(format!("Row {}: invalid quantity '{}'", line, quantity_raw));
            continue;
        };

        let unit_price_raw = cell("unit_price");
        let Some(unit_price) = parse_number(&unit_price_raw) else {
            errors.push(format!(
                "Row {}: invalid unit_price '{}'",
                line, unit_price_raw
            ));
            continue;
        };

        let total_cost_raw = cell(TOTAL_COST_COLUMN);
        let total_cost = if total_cost_raw.is_empty() {
            None
        } else {
            match parse_number(&total_cost_raw) {
                Some(value) => Some(value),
                None => {
                    errors.push(format!(
                        "Row {}: invalid total_cost '{}'",
                        line, total_cost_raw
                    ));
                    continue;
                }
            }
        };

        rows.push(UsageRow {
            line,
            client_name,
            date: cell("date"),
            metric_type,
            quantity,
            unit_price,
            total_cost,
            description,
        });
    }

    ParsedUsage {
        rows,
        errors,
        header,
    }
}
