use std::fmt::Write as _;

use serde_json::Value;

use crate::core::executor::RowSet;

/// Rows shown in full before the digest truncates.
const MAX_DISPLAY_ROWS: usize = 10;

/// Render a row set as a bounded, human-scannable digest: a count header,
/// up to ten numbered `name: value` lines, and a truncation note. Pure
/// presentation; the same input always yields the same text.
pub fn format_rows(rowset: &RowSet) -> String {
    if rowset.rows.is_empty() {
        return "No results found.".to_string();
    }

    let total = rowset.rows.len();
    let mut out = if total > MAX_DISPLAY_ROWS {
        format!(
            "Found {} results. Here are the top {}:\n\n",
            total, MAX_DISPLAY_ROWS
        )
    } else {
        format!("Found {} results:\n\n", total)
    };

    for (i, row) in rowset.rows.iter().take(MAX_DISPLAY_ROWS).enumerate() {
        let fields: Vec<String> = rowset
            .columns
            .iter()
            .zip(row.iter())
            .map(|(name, value)| format!("{}: {}", name, render_value(value)))
            .collect();
        let _ = writeln!(out, "{}. {}", i + 1, fields.join(", "));
    }

    if total > MAX_DISPLAY_ROWS {
        let _ = write!(out, "\n... and {} more results", total - MAX_DISPLAY_ROWS);
    }
    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => group_thousands(i),
            None => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// 1234567 -> "1,234,567".
fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if n < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}
