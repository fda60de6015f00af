//! Canonical string keys for "what the user is looking at".
//!
//! Two inputs that serialize to the same effective JSON (modulo key order and
//! `null` members) produce the same fingerprint.

use serde::Serialize;
use serde_json::Value;

const ARRAY_DELIMITER: &str = ",";

pub fn fingerprint<T: Serialize>(state: &T) -> anyhow::Result<String> {
    let value = serde_json::to_value(state)?;
    Ok(canonical(&value))
}

/// Renders a JSON value with object keys sorted and nulls dropped.
pub fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter(|v| !v.is_null()).map(canonical).collect();
            out.push_str(&parts.join(ARRAY_DELIMITER));
        }
        Value::Object(map) => {
            // Sorted explicitly: serde_json's map order depends on crate features.
            let mut entries: Vec<(&String, &Value)> = map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(';');
                }
                out.push_str(key);
                out.push('=');
                write_value(out, value);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FilterState, RangeFilter, SortDirection, SortSpec};
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":[1,2]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":[1,2],"y":2},"b":1}"#).unwrap();
        assert_eq!(canonical(&a), canonical(&b));
        assert_eq!(canonical(&a), "{a={x=1,2;y=2};b=1}");
    }

    #[test]
    fn nulls_are_omitted() {
        let with_null = json!({ "currency": null, "pnl": { "min": 1, "max": null } });
        let without = json!({ "pnl": { "min": 1 } });
        assert_eq!(canonical(&with_null), canonical(&without));
    }

    #[test]
    fn arrays_keep_their_order() {
        assert_ne!(canonical(&json!({ "p": ["a", "b"] })), canonical(&json!({ "p": ["b", "a"] })));
    }

    #[test]
    fn equal_filters_share_a_fingerprint() {
        let mut a = FilterState::default();
        a.leverage = Some(RangeFilter::between(2.0, 10.0));
        a.include_pairs = vec!["BTC-USD".into()];
        let b = a.clone();
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn empty_lists_match_absent_lists() {
        let a = FilterState::default();
        let b: FilterState = serde_json::from_value(json!({ "include_pairs": [], "sort": SortSpec::default() })).unwrap();
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn any_field_change_moves_the_fingerprint() {
        let base = FilterState::default();
        let base_fp = fingerprint(&base).unwrap();

        let mut sorted = base.clone();
        sorted.sort = SortSpec::new("pnl", SortDirection::Asc);
        let mut ranged = base.clone();
        ranged.fee = Some(RangeFilter { min: Some(0.5), max: None });
        let mut currency = base.clone();
        currency.currency = Some("USDC".into());

        for changed in [sorted, ranged, currency] {
            assert_ne!(fingerprint(&changed).unwrap(), base_fp);
        }
    }
}
