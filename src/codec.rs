//! Scalar extraction from the thermostat's loosely structured responses.
//!
//! Local replies are JSON, sometimes with the interesting part embedded as an
//! escaped string. Portal pages are localized HTML where each value sits in a
//! `<p>` after its `<label>`. Every pattern used to scrape either format lives
//! in this module.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::types::{FieldKind, FieldValue};
use crate::{Error, Result};

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)name="__RequestVerificationToken"[^>]+ value="(.*?)""#)
        .expect("token pattern is valid")
});

static DEVICE_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]{4}-[0-9]{4}-[0-9]{4}_[0-9]{2}-[0-9]{2}-[0-9]{3}-[0-9]{3}")
        .expect("device id pattern is valid")
});

static PAGE_ERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<li class="text-error"><span>(.*?)</span>"#)
        .expect("page error pattern is valid")
});

static NEXT_LABEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<label").expect("label pattern is valid"));

static PARAGRAPH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)<").expect("paragraph pattern is valid")
});

static LEADING_NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?[0-9]+(?:\.[0-9]+)?").expect("number pattern is valid"));

/// Find the first field called `name` in a JSON-ish body and convert it to `kind`.
///
/// Values that are present but do not convert are reported as absent. Firmware
/// revisions change field formats, and one odd field must not sink a whole
/// report. When a parsed document does not hold the key, for instance because
/// it sits in an embedded string that is itself broken JSON, the raw text is
/// scanned instead.
pub fn json_field(text: &str, name: &str, kind: FieldKind) -> Option<FieldValue> {
    let found = serde_json::from_str::<Value>(text.trim())
        .ok()
        .and_then(|doc| find_key(&doc, name));
    match found {
        Some(value) => from_json(&value, kind),
        None => scan_json_field(text, name).and_then(|raw| from_raw(&raw, kind)),
    }
}

pub fn json_decimal(text: &str, name: &str) -> Option<f64> {
    json_field(text, name, FieldKind::Decimal).and_then(|v| v.as_decimal())
}

pub fn json_integer(text: &str, name: &str) -> Option<i64> {
    match json_field(text, name, FieldKind::Integer) {
        Some(FieldValue::Integer(i)) => Some(i),
        _ => None,
    }
}

pub fn json_text(text: &str, name: &str) -> Option<String> {
    match json_field(text, name, FieldKind::Text) {
        Some(FieldValue::Text(s)) => Some(s),
        _ => None,
    }
}

/// Depth-first in document order; string values holding JSON are searched too.
fn find_key(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.iter().find_map(|(key, v)| {
            if key == name {
                Some(v.clone())
            } else {
                find_key(v, name)
            }
        }),
        Value::Array(items) => items.iter().find_map(|v| find_key(v, name)),
        Value::String(s) if s.trim_start().starts_with(['{', '[']) => {
            let inner: Value = serde_json::from_str(s).ok()?;
            find_key(&inner, name)
        }
        _ => None,
    }
}

fn from_json(value: &Value, kind: FieldKind) -> Option<FieldValue> {
    match (kind, value) {
        (_, Value::Null) => None,
        (FieldKind::Text, Value::String(s)) => Some(FieldValue::Text(s.clone())),
        (FieldKind::Text, Value::Number(n)) => Some(FieldValue::Text(n.to_string())),
        (FieldKind::Text, Value::Bool(b)) => Some(FieldValue::Text(b.to_string())),
        (FieldKind::Flag, Value::Bool(b)) => Some(FieldValue::Flag(*b)),
        (FieldKind::Integer, Value::Number(n)) => n.as_i64().map(FieldValue::Integer),
        (FieldKind::Decimal, Value::Number(n)) => n.as_f64().map(FieldValue::Decimal),
        (_, Value::String(s)) => from_raw(s, kind),
        _ => None,
    }
}

fn from_raw(raw: &str, kind: FieldKind) -> Option<FieldValue> {
    let raw = raw.trim();
    if raw == "null" {
        return None;
    }
    match kind {
        FieldKind::Text => Some(FieldValue::Text(raw.to_string())),
        FieldKind::Flag => match raw.to_ascii_lowercase().as_str() {
            "true" => Some(FieldValue::Flag(true)),
            "false" => Some(FieldValue::Flag(false)),
            _ => None,
        },
        FieldKind::Integer => raw.parse().ok().map(FieldValue::Integer),
        FieldKind::Decimal => raw
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite())
            .map(FieldValue::Decimal),
    }
}

/// Pattern scan for text serde_json cannot walk, tolerating `\"` quoting.
fn scan_json_field(text: &str, name: &str) -> Option<String> {
    let name: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    let pattern = String::from(r#"(?s)(?:"|\\")"#)
        + &regex::escape(&name)
        + r#"(?:"|\\")\s*:\s*(?:\\"|")?(.*?)(?:\\"|")?\s*[,}\]]"#;
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(text)?;
    let value = caps[1].trim().trim_end_matches('\\').trim_matches('"');
    Some(value.to_string())
}

/// Value shown after one of `labels` on a portal page.
///
/// Labels are tried in order, matched case-insensitively, and the first
/// non-empty value wins, so Dutch and English pages both work without
/// choosing a locale.
pub fn labeled_html_field(
    html: &str,
    kind: FieldKind,
    labels: &[&str],
) -> Result<Option<FieldValue>> {
    if kind == FieldKind::Integer {
        return Err(Error::IllegalState(format!(
            "Unknown return type requested: '{kind:?}'"
        )));
    }

    for label in labels.iter().filter(|l| !l.trim().is_empty()) {
        let Some(raw) = labeled_text(html, label) else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }
        return Ok(match kind {
            FieldKind::Text => Some(FieldValue::Text(raw)),
            FieldKind::Flag => Some(FieldValue::Flag(
                raw.eq_ignore_ascii_case("aan") || raw.eq_ignore_ascii_case("on"),
            )),
            FieldKind::Decimal => parse_localized_decimal(&raw).map(FieldValue::Decimal),
            FieldKind::Integer => None,
        });
    }
    Ok(None)
}

fn labeled_text(html: &str, label: &str) -> Option<String> {
    let pattern = format!(r"(?is)>\s*{}\s*</label>", regex::escape(label.trim()));
    let found = Regex::new(&pattern).ok()?.find(html)?;
    let rest = &html[found.end()..];
    // A label without a value must not borrow the next label's paragraph.
    let scope = match NEXT_LABEL_PATTERN.find(rest) {
        Some(m) => &rest[..m.start()],
        None => rest,
    };
    let caps = PARAGRAPH_PATTERN.captures(scope)?;
    Some(caps[1].trim().to_string())
}

/// "34,95" and "-2.1°" both parse; a trailing unit is ignored. Anything that
/// keeps going like a number after the match, such as grouped thousands in
/// "9.205,95", is not a value.
pub fn parse_localized_decimal(raw: &str) -> Option<f64> {
    let normalized = raw.trim().replace(',', ".");
    let m = LEADING_NUMBER_PATTERN.find(&normalized)?;
    if normalized[m.end()..].starts_with(|c: char| c == '.' || c.is_ascii_digit()) {
        return None;
    }
    m.as_str().parse().ok()
}

pub fn extract_verification_token(html: &str) -> Option<String> {
    TOKEN_PATTERN
        .captures(html)
        .map(|c| c[1].to_string())
        .filter(|t| !t.is_empty())
}

pub fn extract_device_id(html: &str) -> Option<String> {
    DEVICE_ID_PATTERN.find(html).map(|m| m.as_str().to_string())
}

/// Inline error the portal renders inside an otherwise successful page.
pub fn extract_page_error(body: &str) -> Option<String> {
    if !body.contains('<') {
        return None;
    }
    PAGE_ERROR_PATTERN
        .captures(body)
        .map(|c| c[1].trim().to_string())
        .filter(|m| !m.is_empty())
}
