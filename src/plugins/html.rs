//! Narrow adapter turning the first HTML table under `<body>` into rows.
//!
//! Column names come from the `<th>` cells of the first row when present,
//! otherwise `col0`, `col1`, ... A cell holding a link yields `<col>.href`
//! and `<col>.text`; any other cell yields `<col>.text`.

use crate::core::sink::Row;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table\s*>").unwrap());
static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr\s*>").unwrap());
static TH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<th\b[^>]*>(.*?)</th\s*>").unwrap());
static TD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td\s*>").unwrap());
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#).unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static BODY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<body\b[^>]*>").unwrap());

/// Parse the first table after `<body>` (or anywhere, if there is no body).
pub fn parse_first_table(document: &str) -> Vec<Row> {
    let start = BODY_RE.find(document).map(|m| m.end()).unwrap_or(0);
    let Some(table) = TABLE_RE.captures(&document[start..]) else {
        return Vec::new();
    };
    let table = table.get(1).map(|m| m.as_str()).unwrap_or_default();

    let mut rows = ROW_RE
        .captures_iter(table)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .peekable();

    let header = match rows.peek() {
        Some(first) => TH_RE
            .captures_iter(first)
            .filter_map(|c| c.get(1).map(|m| cell_text(m.as_str())))
            .collect::<Vec<_>>(),
        None => Vec::new(),
    };
    if !header.is_empty() {
        rows.next();
    }

    let mut results = Vec::new();
    for tr in rows {
        let cells = TD_RE
            .captures_iter(tr)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect::<Vec<_>>();
        if cells.is_empty() {
            continue;
        }
        let mut row = Row::new();
        for (idx, cell) in cells.iter().enumerate() {
            let column = header
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("col{}", idx));
            match LINK_RE.captures(cell) {
                Some(link) => {
                    let href = link.get(1).map(|m| decode_entities(m.as_str())).unwrap_or_default();
                    let text = link.get(2).map(|m| cell_text(m.as_str())).unwrap_or_default();
                    row.insert(format!("{}.href", column), Value::String(href));
                    row.insert(format!("{}.text", column), Value::String(text));
                }
                None => {
                    row.insert(format!("{}.text", column), Value::String(cell_text(cell)));
                }
            }
        }
        results.push(row);
    }
    results
}

fn cell_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, "");
    decode_entities(stripped.split_whitespace().collect::<Vec<_>>().join(" ").as_str())
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
