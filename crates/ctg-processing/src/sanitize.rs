//! JSON sanitization for payloads leaving the pipeline
//!
//! Every boundary-crossing payload goes through [`to_clean_json`]: NaN and
//! infinite numbers become `null`, everything else is left untouched.

use ctg_core::{CtgError, CtgResult};
use serde::Serialize;
use serde_json::Value;

/// Serialize a value and replace every non-finite number with `null`
pub fn to_clean_json<T: Serialize + ?Sized>(value: &T) -> CtgResult<Value> {
    let json = serde_json::to_value(value).map_err(|e| CtgError::Serialization {
        reason: format!("Failed to serialize payload: {}", e),
    })?;
    Ok(sanitize_value(json))
}

/// Recursively null out non-finite numbers
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Number(number) => match number.as_f64() {
            Some(x) if !x.is_finite() => Value::Null,
            _ => Value::Number(number),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, sanitize_value(item)))
                .collect(),
        ),
        other => other,
    }
}

/// Finite float or `None`
pub fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}
