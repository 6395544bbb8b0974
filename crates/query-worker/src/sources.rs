//! File data sources referenced from SQL text
//!
//! A query may name a file inline with a call such as
//! `SELECT * FROM read_csv('/data/sales.csv')`. The accepted form is narrow:
//!
//! ```text
//! read_csv | read_parquet | read_json   (case-insensitive)
//! optional whitespace, '(' , optional whitespace
//! a single-quoted, non-empty path without quotes or line breaks
//! optional whitespace, ')'
//! ```
//!
//! Calls inside comments, string literals and quoted identifiers are not
//! sources. Anything else is left alone and reaches the SQL engine unchanged.

use std::ops::Range;
use std::path::Path;

use crate::error::{Result, WorkerError};

/// File format of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Parquet,
    /// Newline-delimited JSON
    Json,
}

impl SourceFormat {
    const FUNCTIONS: [(&'static str, SourceFormat); 3] = [
        ("read_csv", SourceFormat::Csv),
        ("read_parquet", SourceFormat::Parquet),
        ("read_json", SourceFormat::Json),
    ];

    /// Guess the format from a file extension
    pub fn from_path(path: &str) -> Result<Self> {
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("csv") => Ok(SourceFormat::Csv),
            Some("parquet") | Some("pq") => Ok(SourceFormat::Parquet),
            Some("json") | Some("ndjson") | Some("jsonl") => Ok(SourceFormat::Json),
            _ => Err(WorkerError::UnsupportedFormat(path.to_string())),
        }
    }
}

/// One `read_X('path')` call found in a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub format: SourceFormat,
    pub path: String,
    /// Byte range of the whole call in the query text
    pub span: Range<usize>,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// End of a quoted run starting at `start`; a doubled quote is an escape
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut pos = start + 1;
    while pos < bytes.len() {
        if bytes[pos] == quote {
            if bytes.get(pos + 1) == Some(&quote) {
                pos += 2;
                continue;
            }
            return pos + 1;
        }
        pos += 1;
    }
    bytes.len()
}

/// Find every well-formed source call in `sql`, in order of appearance
pub fn find_sources(sql: &str) -> Vec<SourceRef> {
    // ASCII lowercasing keeps byte offsets valid for the original text
    let lower = sql.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut found = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'-' if bytes.get(pos + 1) == Some(&b'-') => {
                pos = bytes[pos..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |len| pos + len + 1);
            }
            b'/' if bytes.get(pos + 1) == Some(&b'*') => {
                pos = lower[pos + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |len| pos + 2 + len + 2);
            }
            b'\'' | b'"' => pos = skip_quoted(bytes, pos),
            b'r' if pos == 0 || !is_ident_byte(bytes[pos - 1]) => {
                match match_call(sql, bytes, pos) {
                    Some(source) => {
                        pos = source.span.end;
                        found.push(source);
                    }
                    None => pos += 1,
                }
            }
            _ => pos += 1,
        }
    }
    found
}

fn match_call(sql: &str, bytes: &[u8], start: usize) -> Option<SourceRef> {
    let (function, format) = SourceFormat::FUNCTIONS
        .iter()
        .find(|(name, _)| bytes[start..].starts_with(name.as_bytes()))?;

    let mut pos = start + function.len();
    if pos < bytes.len() && is_ident_byte(bytes[pos]) {
        return None;
    }

    pos = skip_whitespace(bytes, pos);
    if bytes.get(pos) != Some(&b'(') {
        return None;
    }
    pos = skip_whitespace(bytes, pos + 1);
    if bytes.get(pos) != Some(&b'\'') {
        return None;
    }

    let path_start = pos + 1;
    let path_len = bytes[path_start..]
        .iter()
        .position(|&b| matches!(b, b'\'' | b'"' | b'\n' | b'\r'))?;
    let path_end = path_start + path_len;
    if path_len == 0 || bytes[path_end] != b'\'' {
        return None;
    }

    pos = skip_whitespace(bytes, path_end + 1);
    if bytes.get(pos) != Some(&b')') {
        return None;
    }

    Some(SourceRef {
        format: *format,
        path: sql[path_start..path_end].to_string(),
        span: start..pos + 1,
    })
}

/// Replace byte ranges of `sql`; ranges must be sorted and disjoint
pub fn rewrite(sql: &str, replacements: &[(Range<usize>, String)]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for (span, text) in replacements {
        out.push_str(&sql[last..span.start]);
        out.push_str(text);
        last = span.end;
    }
    out.push_str(&sql[last..]);
    out
}

/// Table name derived from a file's stem, made unique against `taken`
///
/// `/data/Sales 2024.csv` becomes `sales_2024`; a second file with the same
/// stem becomes `sales_2024_2`.
pub fn table_name_for(path: &str, taken: impl Fn(&str) -> bool) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    let mut base: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if base.is_empty() {
        base.push_str("source");
    }
    if base.starts_with(|c: char| c.is_ascii_digit()) {
        base.insert_str(0, "t_");
    }

    if !taken(&base) {
        return base;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{}_{}", base, suffix);
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
