use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::foundation::error::{StatcastError, StatcastResult};

/// One `{value, count}` entry of a counter API response.
#[derive(Debug, Deserialize)]
struct Pair {
    value: String,
    #[serde(default)]
    count: Value,
}

/// Collapse a counter API document into a `value -> count` mapping.
///
/// Accepts either a top-level array of pairs or an object whose top-level array fields hold
/// pairs (`{"counts": [...], "user": [...]}`). Entries that are not pairs are ignored; later
/// duplicates win.
pub fn collapse_pairs(doc: &Value) -> StatcastResult<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    match doc {
        Value::Array(items) => collect_pairs(items, &mut out),
        Value::Object(fields) => {
            for field in fields.values() {
                if let Value::Array(items) = field {
                    collect_pairs(items, &mut out);
                }
            }
        }
        _ => {
            return Err(StatcastError::malformed(
                "expected an array of {value, count} pairs or an object holding such arrays",
            ));
        }
    }
    Ok(out)
}

fn collect_pairs(items: &[Value], out: &mut BTreeMap<String, Value>) {
    for item in items {
        if let Ok(pair) = Pair::deserialize(item) {
            out.insert(pair.value, pair.count);
        }
    }
}

fn required<'a>(pairs: &'a BTreeMap<String, Value>, key: &str) -> StatcastResult<&'a Value> {
    pairs
        .get(key)
        .ok_or_else(|| StatcastError::malformed(format!("missing required key '{key}'")))
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Channel aggregates. Counter fields stay raw; the animator coerces them.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelStats {
    pub name: String,
    pub avatar_url: String,
    pub subscribers: Value,
    pub views: Value,
    pub videos: Value,
}

impl ChannelStats {
    pub fn from_document(doc: &Value) -> StatcastResult<Self> {
        let pairs = collapse_pairs(doc)?;
        Ok(Self {
            name: text(required(&pairs, "name")?),
            avatar_url: text(required(&pairs, "pfp")?),
            subscribers: required(&pairs, "subscribers")?.clone(),
            views: required(&pairs, "views")?.clone(),
            videos: required(&pairs, "videos")?.clone(),
        })
    }
}

/// Live-session aggregates.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamStats {
    pub viewers: Value,
    pub likes: Value,
}

impl StreamStats {
    pub fn from_document(doc: &Value) -> StatcastResult<Self> {
        let pairs = collapse_pairs(doc)?;
        Ok(Self {
            viewers: required(&pairs, "viewers")?.clone(),
            likes: required(&pairs, "likes")?.clone(),
        })
    }
}
