// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! CSV input and output.
//!
//! A small RFC 4180 style reader and writer: quoted fields may contain the
//! delimiter, doubled quotes and newlines. Rows become [`Item`]s keyed by the
//! header row, or by `col1..colN` when the file has no headers.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::types::Item;

/// Errors that can occur while reading CSV input.
#[derive(Error, Debug)]
pub enum CsvError {
    #[error("CSV file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read CSV file {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("Duplicate CSV header: {0}")]
    DuplicateHeader(String),

    #[error("Unterminated quoted field starting on line {0}")]
    UnterminatedQuote(usize),

    #[error("CSV input is empty")]
    Empty,
}

/// Parsed CSV content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvData {
    pub headers: Vec<String>,
    pub rows: Vec<Item>,
}

/// Read a CSV file into items.
pub fn read_csv(path: &Path, delimiter: char, has_headers: bool) -> Result<CsvData, CsvError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CsvError::NotFound(path.to_path_buf()),
        _ => CsvError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        },
    })?;

    let data = parse_csv(&content, delimiter, has_headers)?;
    tracing::debug!(
        "Read {} rows with {} columns from {}",
        data.rows.len(),
        data.headers.len(),
        path.display()
    );
    Ok(data)
}

/// Split CSV text into records of raw fields.
fn parse_records(content: &str, delimiter: char) -> Result<Vec<Vec<String>>, CsvError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut quote_line = 0;
    let mut line = 1;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(ch);
                }
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' if field.is_empty() => {
                in_quotes = true;
                quote_line = line;
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                line += 1;
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(ch),
        }
    }

    if in_quotes {
        return Err(CsvError::UnterminatedQuote(quote_line));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    // Blank lines carry no data.
    records.retain(|r| !(r.len() == 1 && r[0].trim().is_empty()));
    Ok(records)
}

/// Parse CSV text into items.
pub fn parse_csv(content: &str, delimiter: char, has_headers: bool) -> Result<CsvData, CsvError> {
    let mut records = parse_records(content, delimiter)?.into_iter();

    let headers: Vec<String> = if has_headers {
        let first = records.next().ok_or(CsvError::Empty)?;
        let mut seen = std::collections::HashSet::new();
        let mut headers = Vec::with_capacity(first.len());
        for (i, raw) in first.iter().enumerate() {
            let name = match raw.trim() {
                "" => format!("col{}", i + 1),
                trimmed => trimmed.to_string(),
            };
            if !seen.insert(name.clone()) {
                return Err(CsvError::DuplicateHeader(name));
            }
            headers.push(name);
        }
        headers
    } else {
        Vec::new()
    };

    let records: Vec<Vec<String>> = records.collect();
    let headers = if has_headers {
        headers
    } else {
        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        (1..=width).map(|i| format!("col{}", i)).collect()
    };

    let rows = records
        .into_iter()
        .map(|record| {
            if record.len() > headers.len() {
                tracing::warn!(
                    "CSV row has {} fields but only {} headers; extra fields ignored",
                    record.len(),
                    headers.len()
                );
            }
            let mut values = record.into_iter();
            headers
                .iter()
                .map(|h| (h.clone(), Value::String(values.next().unwrap_or_default())))
                .collect::<Item>()
        })
        .collect();

    Ok(CsvData { headers, rows })
}

/// Quote a field when it contains the delimiter, quotes, or line breaks.
pub fn escape_csv_field(value: &str, delimiter: char) -> String {
    let needs_quotes = value.contains(delimiter)
        || value.contains('"')
        || value.contains('\n')
        || value.contains('\r');

    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render a header row and data rows as comma separated text.
pub fn write_csv(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    let render = |fields: &[String]| {
        fields
            .iter()
            .map(|f| escape_csv_field(f, ','))
            .collect::<Vec<_>>()
            .join(",")
    };

    out.push_str(&render(headers));
    for row in rows {
        out.push('\n');
        out.push_str(&render(row));
    }
    out
}
