//! Stable keys for tool calls.
//!
//! A *call key* identifies one exact request (`name:` + canonical JSON). A
//! *fingerprint* is a SHA-256 over the tool name and arguments with volatile
//! keys removed and long strings clipped, so retries that only differ in a
//! timestamp or request id collapse onto the same value.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Argument keys ignored when fingerprinting (compared case-insensitively).
pub const VOLATILE_KEYS: [&str; 5] = ["timestamp", "id", "created_at", "updated_at", "uuid"];

/// Strings longer than this many characters are clipped before hashing.
pub const MAX_STRING_CHARS: usize = 100;

/// `name:{sorted json}`. No keys are dropped.
pub fn call_key(tool_name: &str, arguments: &Value) -> String {
    format!("{tool_name}:{}", canonical_json(arguments))
}

pub fn fingerprint(tool_name: &str, arguments: &Value) -> String {
    let normalized = normalize_arguments(arguments);
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b":");
    hasher.update(canonical_json(&normalized).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash of one iteration's observable outcome, used for no-progress detection.
pub fn state_hash<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut hasher = Sha256::new();
    for (key, outcome) in pairs {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(outcome.as_bytes());
        hasher.update([0xffu8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Drop volatile keys and clip long strings, at every nesting level.
pub fn normalize_arguments(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !is_volatile(k))
                .map(|(k, v)| (k.clone(), normalize_arguments(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(normalize_arguments).collect()),
        Value::String(s) if s.chars().count() > MAX_STRING_CHARS => {
            let clipped: String = s.chars().take(MAX_STRING_CHARS).collect();
            Value::String(format!("{clipped}..."))
        }
        other => other.clone(),
    }
}

fn is_volatile(key: &str) -> bool {
    VOLATILE_KEYS.iter().any(|v| v.eq_ignore_ascii_case(key))
}

/// Compact JSON with object keys sorted at every level, independent of how
/// `serde_json::Map` happens to be ordered.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        assert_eq!(
            fingerprint("tool", &json!({"a": 1, "b": 2})),
            fingerprint("tool", &json!({"b": 2, "a": 1}))
        );
    }

    #[test]
    fn volatile_keys_are_excluded() {
        assert_eq!(
            fingerprint("t", &json!({"id": "x", "q": 1})),
            fingerprint("t", &json!({"id": "y", "q": 1}))
        );
        assert_eq!(
            fingerprint("t", &json!({"Timestamp": 1, "q": 1})),
            fingerprint("t", &json!({"TIMESTAMP": 2, "q": 1}))
        );
    }

    #[test]
    fn tool_name_is_part_of_fingerprint() {
        let args = json!({"query": "select 1"});
        assert_ne!(fingerprint("sql_query", &args), fingerprint("slack_post", &args));
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        let fp = fingerprint("t", &json!({}));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn long_strings_are_clipped() {
        let long = "a".repeat(150);
        let normalized = normalize_arguments(&json!({"q": long}));
        let clipped = normalized["q"].as_str().unwrap();
        assert_eq!(clipped.len(), 103);
        assert!(clipped.ends_with("..."));

        // Differences past the clip point are invisible to the fingerprint.
        let a = format!("{}{}", "x".repeat(100), "tail-one");
        let b = format!("{}{}", "x".repeat(100), "tail-two");
        assert_eq!(fingerprint("t", &json!({"q": a})), fingerprint("t", &json!({"q": b})));
    }

    #[test]
    fn exactly_100_chars_is_untouched() {
        let s = "b".repeat(100);
        assert_eq!(normalize_arguments(&json!(s.clone())), json!(s));
    }

    #[test]
    fn nested_volatile_keys_are_excluded() {
        let a = json!({"filter": {"uuid": "1", "status": "open"}, "items": [{"id": 1, "n": 2}]});
        let b = json!({"filter": {"status": "open", "uuid": "2"}, "items": [{"n": 2, "id": 9}]});
        assert_eq!(fingerprint("t", &a), fingerprint("t", &b));
    }

    #[test]
    fn call_key_keeps_every_key() {
        let a = call_key("sql_query", &json!({"id": 1, "query": "q"}));
        let b = call_key("sql_query", &json!({"query": "q", "id": 2}));
        assert_ne!(a, b);
        assert_eq!(a, r#"sql_query:{"id":1,"query":"q"}"#);
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"z": {"b": 1, "a": [true, null]}, "a": "s"});
        assert_eq!(canonical_json(&value), r#"{"a":"s","z":{"a":[true,null],"b":1}}"#);
    }

    #[test]
    fn state_hash_depends_on_order_and_content() {
        let one = state_hash([("k1", "ok"), ("k2", "ok")]);
        let same = state_hash([("k1", "ok"), ("k2", "ok")]);
        let swapped = state_hash([("k2", "ok"), ("k1", "ok")]);
        let changed = state_hash([("k1", "ok"), ("k2", "err")]);
        assert_eq!(one, same);
        assert_ne!(one, swapped);
        assert_ne!(one, changed);
    }

    fn arg_map() -> impl Strategy<Value = Vec<(String, i64)>> {
        prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8)
            .prop_map(|m| m.into_iter().collect())
    }

    fn object(pairs: &[(String, i64)]) -> Value {
        Value::Object(pairs.iter().map(|(k, v)| (k.clone(), json!(v))).collect())
    }

    proptest! {
        #[test]
        fn fingerprint_ignores_insertion_order(pairs in arg_map()) {
            let mut reversed = pairs.clone();
            reversed.reverse();
            prop_assert_eq!(fingerprint("t", &object(&pairs)), fingerprint("t", &object(&reversed)));
        }

        #[test]
        fn fingerprint_ignores_volatile_values(pairs in arg_map(), a in any::<u64>(), b in any::<u64>()) {
            let mut with_a = object(&pairs);
            let mut with_b = object(&pairs);
            with_a["created_at"] = json!(a);
            with_b["created_at"] = json!(b);
            prop_assert_eq!(fingerprint("t", &with_a), fingerprint("t", &with_b));
        }

        #[test]
        fn normalization_is_idempotent(pairs in arg_map(), s in ".{0,200}") {
            let mut value = object(&pairs);
            value["text"] = json!(s);
            let once = normalize_arguments(&value);
            let twice = normalize_arguments(&once);
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(fingerprint("t", &value), fingerprint("t", &once));
        }
    }
}
