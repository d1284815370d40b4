//! Normalizing adapter between raw upstream records and canonical types.
//!
//! Upstream tables and snapshot exports name the same logical field in several
//! ways (`id` vs `pollutant_id`, `name` vs `pollutant`, `fYYYY` year columns vs
//! a nested `values` object). This is the only place those variants are known.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::model::{Group, Pollutant, SeriesRow};

const POLLUTANT_ID_FIELDS: &[&str] = &["id", "pollutant_id", "pollutantId"];
const POLLUTANT_NAME_FIELDS: &[&str] = &["pollutant", "name", "title"];
const UNIT_FIELDS: &[&str] = &["emission_unit", "unit", "units"];

const GROUP_ID_FIELDS: &[&str] = &["id", "group_id", "groupId"];
const GROUP_TITLE_FIELDS: &[&str] = &["group_title", "title", "name"];
const ACTIVITY_FLAG_FIELDS: &[&str] = &["has_activity_data", "hasActivityData"];

const ROW_POLLUTANT_FIELDS: &[&str] = &["pollutant_id", "pollutantId"];
const ROW_GROUP_FIELDS: &[&str] = &["group_id", "groupId"];

fn first<'a>(obj: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .filter_map(|f| obj.get(*f))
        .find(|v| !v.is_null())
}

fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a cell into a number. Numeric strings are accepted; blanks are `None`.
pub fn parse_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse().ok()
            }
        }
        _ => None,
    }
}

/// Parse a year column key: `f2023`, `F2023` or `2023`.
pub fn parse_year_key(key: &str) -> Option<i32> {
    let digits = key
        .strip_prefix('f')
        .or_else(|| key.strip_prefix('F'))
        .unwrap_or(key);
    if digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// Normalize one pollutant record. Records without a name are dropped.
pub fn pollutant(value: &Value) -> Option<Pollutant> {
    let obj = value.as_object()?;
    let name = first(obj, POLLUTANT_NAME_FIELDS).and_then(as_text)?;
    Some(Pollutant {
        id: first(obj, POLLUTANT_ID_FIELDS).and_then(as_id),
        name,
        unit: first(obj, UNIT_FIELDS).and_then(as_text),
    })
}

/// Normalize one group record. Records without a title are dropped.
pub fn group(value: &Value) -> Option<Group> {
    let obj = value.as_object()?;
    let title = first(obj, GROUP_TITLE_FIELDS).and_then(as_text)?;
    Some(Group {
        id: first(obj, GROUP_ID_FIELDS).and_then(as_id),
        title,
        has_activity_data: first(obj, ACTIVITY_FLAG_FIELDS).cloned(),
    })
}

/// Normalize one series row. Rows missing either foreign key are dropped.
pub fn series_row(value: &Value) -> Option<SeriesRow> {
    let obj = value.as_object()?;
    let pollutant_id = first(obj, ROW_POLLUTANT_FIELDS).and_then(as_id)?;
    let group_id = first(obj, ROW_GROUP_FIELDS).and_then(as_id)?;

    let mut values = BTreeMap::new();
    for (key, cell) in obj {
        if let Some(year) = parse_year_key(key) {
            values.insert(year, parse_value(cell));
        }
    }
    if let Some(Value::Object(nested)) = obj.get("values") {
        for (key, cell) in nested {
            if let Some(year) = parse_year_key(key) {
                values.insert(year, parse_value(cell));
            }
        }
    }

    Some(SeriesRow {
        pollutant_id,
        group_id,
        values,
    })
}

fn collect<T>(kind: &str, records: &[Value], f: impl Fn(&Value) -> Option<T>) -> Vec<T> {
    let out: Vec<T> = records.iter().filter_map(f).collect();
    let dropped = records.len() - out.len();
    if dropped > 0 {
        debug!(kind, dropped, "Dropped records that could not be normalized");
    }
    out
}

pub fn pollutants(records: &[Value]) -> Vec<Pollutant> {
    collect("pollutant", records, pollutant)
}

pub fn groups(records: &[Value]) -> Vec<Group> {
    collect("group", records, group)
}

pub fn series_rows(records: &[Value]) -> Vec<SeriesRow> {
    collect("series_row", records, series_row)
}
