//! Parameter extraction helpers.
//!
//! The wire convention is camelCase, but the catalogue historically spells
//! a few fields in snake case; extractors take the accepted spellings in
//! preference order.

use serde_json::Value;

use crate::strategy::Selector;

pub fn opt_value<'a>(params: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| params.get(*k))
}

pub fn opt_str(params: &Value, keys: &[&str]) -> Option<String> {
    opt_value(params, keys)?.as_str().map(str::to_string)
}

pub fn opt_u64(params: &Value, keys: &[&str]) -> Option<u64> {
    opt_value(params, keys)?.as_u64()
}

pub fn opt_i64(params: &Value, keys: &[&str]) -> Option<i64> {
    opt_value(params, keys)?.as_i64()
}

pub fn opt_i32(params: &Value, keys: &[&str]) -> Option<i32> {
    opt_i64(params, keys).map(|v| v as i32)
}

pub fn opt_bool(params: &Value, keys: &[&str]) -> Option<bool> {
    opt_value(params, keys)?.as_bool()
}

/// For `validate`: the field must be present and a string.
pub fn req_str(params: &Value, keys: &[&str]) -> Result<String, String> {
    opt_str(params, keys).ok_or_else(|| format!("{} is required", keys[0]))
}

/// For `validate`: the field must be present and an integer.
pub fn req_i32(params: &Value, keys: &[&str]) -> Result<i32, String> {
    opt_i32(params, keys).ok_or_else(|| format!("{} is required", keys[0]))
}

/// The optional `selector` object. Absent means "not supplied", which some
/// methods treat as the wildcard and others as an error.
pub fn opt_selector(params: &Value) -> Result<Option<Selector>, String> {
    match params.get("selector") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => Selector::parse(v).map(Some),
    }
}

/// `(x, y)` when both coordinates are supplied.
pub fn opt_point(params: &Value) -> Option<(i32, i32)> {
    Some((opt_i32(params, &["x"])?, opt_i32(params, &["y"])?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extractors_honor_spelling_preference() {
        let p = json!({"timeoutMs": 100, "timeout_ms": 200, "packageName": "com.x"});
        assert_eq!(opt_u64(&p, &["timeoutMs", "timeout_ms"]), Some(100));
        assert_eq!(opt_u64(&p, &["pollMs", "poll_ms"]), None);
        assert_eq!(opt_str(&p, &["packageName"]).as_deref(), Some("com.x"));
    }

    #[test]
    fn required_fields_report_the_canonical_name() {
        let p = json!({});
        let err = req_str(&p, &["packageName", "package_name"]).unwrap_err();
        assert!(err.contains("packageName"));
    }

    #[test]
    fn point_requires_both_coordinates() {
        assert_eq!(opt_point(&json!({"x": 1, "y": 2})), Some((1, 2)));
        assert_eq!(opt_point(&json!({"x": 1})), None);
    }

    #[test]
    fn selector_handles_absent_null_and_invalid() {
        assert!(opt_selector(&json!({})).unwrap().is_none());
        assert!(opt_selector(&json!({"selector": null})).unwrap().is_none());
        assert!(opt_selector(&json!({"selector": {"text": "OK"}}))
            .unwrap()
            .is_some());
        assert!(opt_selector(&json!({"selector": 42})).is_err());
    }
}
