//! Query string parsing with bracket nesting.
//!
//! ```text
//! price[gte]=5&sort=price&fields=name&fields=price&tags[]=a
//! ```
//!
//! becomes
//!
//! ```json
//! {"price": {"gte": "5"}, "sort": "price", "fields": ["name", "price"], "tags": ["a"]}
//! ```
//!
//! Leaves are always strings. Repeated keys become arrays. A key whose
//! shape conflicts with an earlier one (`a=1&a[b]=2`) keeps the earlier
//! value.

use serde_json::{Map, Value};

/// Deepest bracket nesting honored; deeper keys stay one literal key.
pub const MAX_DEPTH: usize = 5;

/// Parses a raw (still percent-encoded) query string into a JSON object.
///
/// # Example
///
/// ```
/// use trailhead_middleware::query::parse_query;
/// use serde_json::json;
///
/// assert_eq!(
///     parse_query("duration[lt]=10&page=2"),
///     json!({"duration": {"lt": "10"}, "page": "2"})
/// );
/// ```
pub fn parse_query(raw: &str) -> Value {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw).unwrap_or_default();

    let mut root = Value::Object(Map::new());
    for (key, value) in pairs {
        let segments = split_key(&key);
        if segments.first().is_some_and(|s| !s.is_empty()) {
            assign(&mut root, &segments, value);
        }
    }
    root
}

/// Splits `a[b][c]` into `["a", "b", "c"]`. Malformed or too deeply nested
/// keys come back as a single literal segment.
fn split_key(key: &str) -> Vec<&str> {
    let Some(open) = key.find('[') else {
        return vec![key];
    };
    if open == 0 {
        return vec![key];
    }

    let mut segments = vec![&key[..open]];
    let mut rest = &key[open..];
    while segments.len() <= MAX_DEPTH {
        let Some(inner) = rest.strip_prefix('[') else {
            break;
        };
        let Some(close) = inner.find(']') else {
            break;
        };
        segments.push(&inner[..close]);
        rest = &inner[close + 1..];
    }
    if !rest.is_empty() {
        return vec![key];
    }
    segments
}

fn assign(slot: &mut Value, segments: &[&str], value: String) {
    let Some((head, rest)) = segments.split_first() else {
        merge_leaf(slot, value);
        return;
    };

    if head.is_empty() {
        // `key[]` appends.
        if slot.is_null() {
            *slot = Value::Array(Vec::new());
        }
        if let Value::Array(items) = slot {
            if rest.is_empty() {
                items.push(Value::String(value));
            } else {
                let mut child = Value::Null;
                assign(&mut child, rest, value);
                items.push(child);
            }
        }
        return;
    }

    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(map) = slot {
        let child = map.entry((*head).to_string()).or_insert(Value::Null);
        assign(child, rest, value);
    }
}

fn merge_leaf(slot: &mut Value, value: String) {
    match slot {
        Value::Null => *slot = Value::String(value),
        Value::String(existing) => {
            let first = std::mem::take(existing);
            *slot = Value::Array(vec![Value::String(first), Value::String(value)]);
        }
        Value::Array(items) => items.push(Value::String(value)),
        _ => {}
    }
}
