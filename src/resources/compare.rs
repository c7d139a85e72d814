//! # Semantic comparison
//!
//! Compares a generated payload against what the API server returned. The server
//! fills in defaults (protocols, termination message paths, `nodePort`s, ...) and
//! rewrites resource quantities into canonical form, so a plain equality check
//! would report drift on every pass.
//!
//! The comparison is a structural subset check: every field the desired payload
//! sets must be present and equal in the existing one. Arrays must match
//! element-wise and have the same length. Quantities under `resources` are
//! normalized first, so `1000m` equals `1` and `1Gi` equals `1024Mi`.

use serde::Serialize;
use serde_json::Value;

/// Whether `existing` contains everything `desired` specifies
pub fn semantically_contains<T: Serialize>(existing: &T, desired: &T) -> bool {
    match (serde_json::to_value(existing), serde_json::to_value(desired)) {
        (Ok(mut existing), Ok(mut desired)) => {
            normalize_quantities(&mut existing);
            normalize_quantities(&mut desired);
            json_contains(&existing, &desired)
        }
        _ => false,
    }
}

/// Structural subset check over JSON values
pub fn json_contains(existing: &Value, desired: &Value) -> bool {
    match (existing, desired) {
        (_, Value::Null) => true,
        (Value::Object(existing), Value::Object(desired)) => desired.iter().all(|(key, want)| {
            match existing.get(key) {
                Some(have) => json_contains(have, want),
                None => is_empty(want),
            }
        }),
        (Value::Array(existing), Value::Array(desired)) => {
            existing.len() == desired.len()
                && existing
                    .iter()
                    .zip(desired)
                    .all(|(have, want)| json_contains(have, want))
        }
        (Value::Null, want) => is_empty(want),
        (have, want) => have == want,
    }
}

/// Empty collections are equivalent to absent fields
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.values().all(is_empty),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Rewrite every quantity found under a `resources` key into canonical form
pub fn normalize_quantities(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "resources" {
                    normalize_resource_block(child);
                } else {
                    normalize_quantities(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_quantities),
        _ => {}
    }
}

fn normalize_resource_block(block: &mut Value) {
    let Value::Object(map) = block else {
        return;
    };
    for key in ["limits", "requests"] {
        if let Some(Value::Object(quantities)) = map.get_mut(key) {
            for quantity in quantities.values_mut() {
                if let Some(canonical) = quantity.as_str().and_then(canonical_quantity) {
                    *quantity = Value::String(canonical);
                }
            }
        }
    }
}

/// Canonical form of a Kubernetes quantity: its value in nano-units.
///
/// Returns `None` for strings that are not quantities.
pub fn canonical_quantity(quantity: &str) -> Option<String> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);
    let (negative, number) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    if number.is_empty() {
        return None;
    }
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    // Parse as an integer mantissa with a decimal exponent
    let digits = format!("{whole}{fraction}");
    let mut mantissa: i128 = if digits.is_empty() { 0 } else { digits.parse().ok()? };
    let mut exponent = -i32::try_from(fraction.len()).ok()?;

    let (binary_multiplier, decimal_exponent) = suffix_scale(suffix)?;
    mantissa = mantissa.checked_mul(binary_multiplier)?;
    exponent += decimal_exponent;

    // Scale to nano-units, dropping sub-nano precision
    exponent += 9;
    let nanos = if exponent >= 0 {
        mantissa.checked_mul(10_i128.checked_pow(u32::try_from(exponent).ok()?)?)?
    } else {
        mantissa / 10_i128.checked_pow(u32::try_from(-exponent).ok()?)?
    };
    Some(if negative { (-nanos).to_string() } else { nanos.to_string() })
}

/// (binary multiplier, decimal exponent) of a quantity suffix
fn suffix_scale(suffix: &str) -> Option<(i128, i32)> {
    let scale = match suffix {
        "" => (1, 0),
        "n" => (1, -9),
        "u" => (1, -6),
        "m" => (1, -3),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        "Ki" => (1 << 10, 0),
        "Mi" => (1 << 20, 0),
        "Gi" => (1 << 30, 0),
        "Ti" => (1 << 40, 0),
        "Pi" => (1 << 50, 0),
        "Ei" => (1 << 60, 0),
        exp => {
            let exp = exp.strip_prefix('e').or_else(|| exp.strip_prefix('E'))?;
            (1, exp.parse().ok()?)
        }
    };
    Some(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_quantity_equivalences() {
        assert_eq!(canonical_quantity("1"), canonical_quantity("1000m"));
        assert_eq!(canonical_quantity("0.5"), canonical_quantity("500m"));
        assert_eq!(canonical_quantity("1Gi"), canonical_quantity("1024Mi"));
        assert_eq!(canonical_quantity("1k"), canonical_quantity("1e3"));
        assert_ne!(canonical_quantity("1G"), canonical_quantity("1Gi"));
        assert_eq!(canonical_quantity("abc"), None);
        assert_eq!(canonical_quantity("1Zi"), None);
    }

    #[test]
    fn test_server_defaults_are_ignored() {
        let existing = json!({
            "containers": [{
                "name": "controller",
                "image": "kic:3.4",
                "imagePullPolicy": "IfNotPresent",
                "terminationMessagePath": "/dev/termination-log",
                "resources": {"limits": {"cpu": "1", "memory": "1Gi"}}
            }],
            "dnsPolicy": "ClusterFirst"
        });
        let desired = json!({
            "containers": [{
                "name": "controller",
                "image": "kic:3.4",
                "resources": {"limits": {"cpu": "1000m", "memory": "1024Mi"}}
            }]
        });
        assert!(semantically_contains(&existing, &desired));
    }

    #[test]
    fn test_changed_field_is_detected() {
        let existing = json!({"containers": [{"name": "c", "image": "kic:3.4"}]});
        let desired = json!({"containers": [{"name": "c", "image": "kic:3.5"}]});
        assert!(!json_contains(&existing, &desired));
    }

    #[test]
    fn test_array_length_mismatch_is_detected() {
        let existing = json!({"env": [{"name": "A"}, {"name": "B"}]});
        let desired = json!({"env": [{"name": "A"}]});
        assert!(!json_contains(&existing, &desired));
    }

    #[test]
    fn test_empty_desired_collections_match_absent() {
        let existing = json!({"metadata": {}});
        let desired = json!({"metadata": {"labels": {}}, "volumes": []});
        assert!(json_contains(&existing, &desired));
    }
}
