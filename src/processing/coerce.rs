use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};
use tracing::warn;

use crate::cli::config::{FieldType, TargetType};
use crate::error::ProcessingError;

const DATETIME_OUT: &str = "%Y-%m-%dT%H:%M:%S";
const DATE_OUT: &str = "%Y-%m-%d";

const TRUE_WORDS: [&str; 5] = ["true", "1", "yes", "y", "on"];

const ISO_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Convert one non-null field value to its configured type.
///
/// Unparseable input becomes `Null` with a warning. Only a non-finite float is an error.
pub fn coerce(field: &str, value: &Value, field_type: &FieldType) -> Result<Value, ProcessingError> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => return Ok(Value::Null),
        other => other.to_string(),
    };

    if text.is_empty() && field_type.target != TargetType::String {
        return Ok(Value::Null);
    }

    let converted = match field_type.target {
        TargetType::String => Some(Value::String(text.clone())),
        TargetType::Boolean => Some(match value {
            Value::Bool(b) => Value::Bool(*b),
            _ => Value::Bool(TRUE_WORDS.contains(&text.to_lowercase().as_str())),
        }),
        TargetType::Int => to_int(value, &text),
        TargetType::Float => match to_float(value, &text) {
            Some(f) if !f.is_finite() => {
                return Err(ProcessingError::NonFinite {
                    field: field.to_string(),
                })
            }
            Some(f) => Number::from_f64(f).map(Value::Number),
            None => None,
        },
        TargetType::Datetime => parse_datetime(&text, field_type.format.as_deref())
            .map(|dt| Value::String(dt.format(DATETIME_OUT).to_string())),
        TargetType::Date => parse_datetime(&text, field_type.format.as_deref())
            .map(|dt| Value::String(dt.date().format(DATE_OUT).to_string())),
    };

    Ok(converted.unwrap_or_else(|| {
        warn!("Type conversion of field '{}' to {:?} failed for value {}", field, field_type.target, value);
        Value::Null
    }))
}

/// Keep digits, sign and decimal point: `"$1,234.50"` becomes `"1234.50"`
fn numeric_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
        .collect()
}

fn to_int(value: &Value, text: &str) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => return Some(Value::Number(n.clone())),
        Value::Bool(b) => return Some(Value::from(*b as i64)),
        _ => {}
    }
    let cleaned = numeric_text(text);
    if let Ok(i) = cleaned.parse::<i64>() {
        return Some(Value::from(i));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && f.abs() < 9.2e18)
        .map(|f| Value::from(f.trunc() as i64))
}

fn to_float(value: &Value, text: &str) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(*b as i64 as f64),
        _ => numeric_text(text).parse::<f64>().ok(),
    }
}

/// Configured format first, then ISO date-time forms, then a bare ISO date
fn parse_datetime(text: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    if let Some(format) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, format) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    ISO_DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, DATE_OUT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
