//! Partition Key-Value Pairs
//!
//! This module implements the Hadoop/Hive partition path convention:
//! an **ordered** list of `(key, value)` string pairs rendered as
//! `key1=val1/key2=val2/...` with both sides percent-escaped.
//!
//! ## Why a list and not a map?
//!
//! Partition order is significant; `year=2024/month=07` and
//! `month=07/year=2024` are different paths, so the type is an ordered
//! list rather than a `HashMap`. [`KeyValues::as_map`] exists for callers
//! that only need lookups.
//!
//! ## Escaping
//!
//! Keys and values are escaped with the query-escape rules most partition
//! tooling expects: unreserved characters (`A-Z a-z 0-9 - _ . ~`) pass
//! through, space becomes `+`, everything else becomes uppercase
//! percent-hex. [`KeyValues::from_path`] is the exact inverse.
//!
//! ## Usage
//!
//! ```ignore
//! use hivestream_core::keyvalue::{KeyValue, KeyValues};
//!
//! let kvs = KeyValues::from(vec![
//!     KeyValue::new("bucket", "7"),
//!     KeyValue::new("is_even", "true"),
//! ]);
//! assert_eq!(kvs.partition_path(), "bucket=7/is_even=true");
//! assert!(kvs.matches_name("bucket=7/is_even=true/data_host_b0_1_2.json.gz"));
//! ```

use std::borrow::Cow;
use std::collections::HashMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters escaped in partition tokens: everything except the
/// unreserved set `A-Z a-z 0-9 - _ . ~`. Space is special-cased to `+`.
const PARTITION_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b' ');

fn query_escape(s: &str) -> String {
    let escaped = utf8_percent_encode(s, PARTITION_ESCAPE).to_string();
    escaped.replace(' ', "+")
}

fn query_unescape(s: &str) -> Option<String> {
    let plus_decoded: Cow<'_, str> = if s.contains('+') {
        Cow::Owned(s.replace('+', " "))
    } else {
        Cow::Borrowed(s)
    };
    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .ok()
        .map(|c| c.into_owned())
}

/// A single `(key, value)` string pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Render as one escaped `key=value` partition token.
    pub fn partition_token(&self) -> String {
        format!("{}={}", query_escape(&self.key), query_escape(&self.value))
    }
}

/// An ordered list of [`KeyValue`] pairs describing one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues(Vec<KeyValue>);

impl KeyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kv: KeyValue) {
        self.0.push(kv);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    /// Render as `k1=v1/k2=v2/...`, keys and values escaped.
    pub fn partition_path(&self) -> String {
        self.0
            .iter()
            .map(KeyValue::partition_token)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Render as a path prefix: `k1=v1/.../kN=vN/`, or `""` when empty.
    ///
    /// This is the form prepended to blob names by the record streamer.
    pub fn partition_prefix(&self) -> String {
        if self.0.is_empty() {
            String::new()
        } else {
            let mut p = self.partition_path();
            p.push('/');
            p
        }
    }

    /// Parse every `k=v` path segment of `s` back into pairs.
    ///
    /// Segments that are not exactly `k=v`, or whose escaping does not
    /// decode, are skipped. Inverse of [`KeyValues::partition_path`] for
    /// paths that `partition_path` produced.
    pub fn from_path(s: &str) -> Self {
        let mut res = KeyValues::new();
        for part in s.split('/') {
            let halves: Vec<&str> = part.split('=').collect();
            let [raw_key, raw_value] = halves.as_slice() else {
                continue;
            };
            if let (Some(key), Some(value)) = (query_unescape(raw_key), query_unescape(raw_value)) {
                res.push(KeyValue::new(key, value));
            }
        }
        res
    }

    /// The pairs as an unordered map.
    pub fn as_map(&self) -> HashMap<String, String> {
        self.0
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect()
    }

    /// True iff every rendered `k=v/` token appears somewhere in `name`.
    ///
    /// Used as a blob-name predicate during prefix scans. Only exact
    /// token matches count; `bucket=77/` does not satisfy `bucket=7`.
    pub fn matches_name(&self, name: &str) -> bool {
        self.0
            .iter()
            .all(|kv| name.contains(&(kv.partition_token() + "/")))
    }
}

impl From<Vec<KeyValue>> for KeyValues {
    fn from(pairs: Vec<KeyValue>) -> Self {
        Self(pairs)
    }
}

impl IntoIterator for KeyValues {
    type Item = KeyValue;
    type IntoIter = std::vec::IntoIter<KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
