//! Attribute sets and the attribute-match relation.
//!
//! A connection matches a query when every key present in both sets carries
//! the same value **and** at least one key is shared. Overlap is mandatory:
//! a query whose keys are disjoint from the connection's attributes never
//! matches, and an empty set on either side never matches.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unordered key/value tags. Keys are unique.
///
/// Backed by a `BTreeMap` so that rendering (logs, uplink query strings)
/// is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    /// Create an empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build attributes from URL query pairs.
    ///
    /// Pairs with an empty key are skipped. When a key repeats, the first
    /// value wins.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (key, value) in pairs {
            let key = key.into();
            if key.is_empty() {
                continue;
            }
            let _ = map.entry(key).or_insert_with(|| value.into());
        }
        Self(map)
    }

    /// Insert a tag, returning the previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether a connection tagged with `self` should receive a message
    /// addressed to `query`.
    pub fn matches(&self, query: &Attributes) -> bool {
        let mut shared = false;
        for (key, value) in &self.0 {
            if let Some(wanted) = query.0.get(key) {
                if wanted != value {
                    return false;
                }
                shared = true;
            }
        }
        shared
    }

    /// The subset of tags whose key appears in `keys`.
    pub fn select<S: AsRef<str>>(&self, keys: &[S]) -> Attributes {
        Self(
            keys.iter()
                .filter_map(|key| {
                    let key = key.as_ref();
                    self.0.get(key).map(|v| (key.to_owned(), v.clone()))
                })
                .collect(),
        )
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, String>> for Attributes {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().copied().collect()
    }

    #[test]
    fn matches_when_all_keys_equal() {
        let conn = attrs(&[("a", "b"), ("c", "d")]);
        assert!(conn.matches(&attrs(&[("a", "b"), ("c", "d")])));
    }

    #[test]
    fn matches_on_partial_overlap() {
        let conn = attrs(&[("a", "b"), ("c", "d")]);
        assert!(conn.matches(&attrs(&[("c", "d")])));
    }

    #[test]
    fn disjoint_keys_do_not_match() {
        let conn = attrs(&[("a", "b"), ("c", "d")]);
        assert!(!conn.matches(&attrs(&[("v", "d")])));
    }

    #[test]
    fn conflicting_value_does_not_match() {
        let conn = attrs(&[("a", "b"), ("c", "d")]);
        assert!(!conn.matches(&attrs(&[("a", "b"), ("c", "x")])));
    }

    #[test]
    fn extra_query_keys_are_ignored() {
        let conn = attrs(&[("customer", "acme")]);
        assert!(conn.matches(&attrs(&[("customer", "acme"), ("cluster", "c1")])));
    }

    #[test]
    fn empty_sides_never_match() {
        let conn = attrs(&[("customer", "acme")]);
        assert!(!conn.matches(&Attributes::new()));
        assert!(!Attributes::new().matches(&conn));
        assert!(!Attributes::new().matches(&Attributes::new()));
    }

    #[test]
    fn customer_cluster_scenario() {
        let a = attrs(&[("customer", "acme"), ("cluster", "c1")]);
        let b = attrs(&[("customer", "acme")]);
        let query = attrs(&[("customer", "acme"), ("cluster", "c1")]);
        assert!(a.matches(&query));
        assert!(b.matches(&query));

        let other = attrs(&[("customer", "other")]);
        assert!(!a.matches(&other));
        assert!(!b.matches(&other));
    }

    #[test]
    fn query_pairs_first_value_wins() {
        let parsed = Attributes::from_query_pairs(vec![
            ("customer", "first"),
            ("", "ignored"),
            ("customer", "second"),
            ("cluster", "kube"),
        ]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get("customer"), Some("first"));
        assert_eq!(parsed.get("cluster"), Some("kube"));
    }

    #[test]
    fn select_keeps_requested_keys_only() {
        let conn = attrs(&[("customer", "acme"), ("cluster", "c1")]);
        let selected = conn.select(&["customer", "missing"]);
        assert_eq!(selected, attrs(&[("customer", "acme")]));
        assert!(conn.select::<&str>(&[]).is_empty());
    }

    #[test]
    fn display_is_sorted() {
        let conn = attrs(&[("z", "1"), ("a", "2")]);
        assert_eq!(conn.to_string(), "{a=2, z=1}");
    }

    #[test]
    fn serde_is_a_plain_map() {
        let conn = attrs(&[("customer", "acme")]);
        let json = serde_json::to_value(&conn).unwrap();
        assert_eq!(json, serde_json::json!({"customer": "acme"}));
        let back: Attributes = serde_json::from_value(json).unwrap();
        assert_eq!(back, conn);
    }

    fn small_map() -> impl Strategy<Value = BTreeMap<String, String>> {
        prop::collection::btree_map("[a-d]", "[xy]", 0..4)
    }

    proptest! {
        #[test]
        fn match_relation_definition(conn in small_map(), query in small_map()) {
            let shared: Vec<_> = conn.keys().filter(|k| query.contains_key(*k)).collect();
            let expected = !shared.is_empty() && shared.iter().all(|k| conn[*k] == query[*k]);
            let conn = Attributes::from(conn);
            let query = Attributes::from(query);
            prop_assert_eq!(conn.matches(&query), expected);
        }

        #[test]
        fn match_relation_is_symmetric(conn in small_map(), query in small_map()) {
            let conn = Attributes::from(conn);
            let query = Attributes::from(query);
            prop_assert_eq!(conn.matches(&query), query.matches(&conn));
        }
    }
}
