//! Metadata index (spec.md §4.5, component C5)

use std::collections::{BTreeSet, HashMap};

use crate::VolumeId;

/// Operators supported by [`MetadataFilter`] (spec.md §4.5).
#[derive(Debug, Clone)]
pub enum MetadataMode {
    Eq(String),
    Ne(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    In(Vec<String>),
    NotIn(Vec<String>),
    Gt(String),
    Gte(String),
    Lt(String),
    Lte(String),
    /// Inclusive on both ends.
    Between(String, String),
}

#[derive(Debug, Clone)]
pub struct MetadataFilter {
    pub key: String,
    pub mode: MetadataMode,
}

/// `key -> (value -> set<volumeId>)`, plus a reverse map for deletion and a
/// numeric shadow used by the range operators.
#[derive(Debug, Default)]
pub struct MetadataIndex {
    by_key_value: HashMap<String, HashMap<String, BTreeSet<VolumeId>>>,
    by_id: HashMap<VolumeId, HashMap<String, String>>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: &VolumeId, metadata: &HashMap<String, String>) {
        for (k, v) in metadata {
            self.by_key_value
                .entry(k.clone())
                .or_default()
                .entry(v.clone())
                .or_default()
                .insert(id.clone());
        }
        self.by_id.insert(id.clone(), metadata.clone());
    }

    pub fn delete(&mut self, id: &VolumeId) {
        if let Some(metadata) = self.by_id.remove(id) {
            for (k, v) in metadata {
                if let Some(values) = self.by_key_value.get_mut(&k) {
                    if let Some(ids) = values.get_mut(&v) {
                        ids.remove(id);
                    }
                }
            }
        }
    }

    /// Equivalent to `delete` then `add` with the new metadata.
    pub fn relocate(&mut self, id: &VolumeId, metadata: &HashMap<String, String>) {
        self.delete(id);
        self.add(id, metadata);
    }

    fn entries_for_key(&self, key: &str) -> Vec<(&str, &VolumeId)> {
        self.by_key_value
            .get(key)
            .map(|values| {
                values
                    .iter()
                    .flat_map(|(v, ids)| ids.iter().map(move |id| (v.as_str(), id)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn all_ids_for_key(&self, key: &str) -> BTreeSet<VolumeId> {
        self.entries_for_key(key).into_iter().map(|(_, id)| id.clone()).collect()
    }

    fn apply_one(&self, filter: &MetadataFilter) -> BTreeSet<VolumeId> {
        match &filter.mode {
            MetadataMode::Eq(v) => self
                .by_key_value
                .get(&filter.key)
                .and_then(|values| values.get(v))
                .cloned()
                .unwrap_or_default(),
            MetadataMode::Ne(v) => {
                let all = self.all_ids_for_key(&filter.key);
                let eq: BTreeSet<VolumeId> = self
                    .by_key_value
                    .get(&filter.key)
                    .and_then(|values| values.get(v))
                    .cloned()
                    .unwrap_or_default();
                all.difference(&eq).cloned().collect()
            }
            MetadataMode::Contains(needle) => {
                let needle = needle.to_lowercase();
                self.entries_for_key(&filter.key)
                    .into_iter()
                    .filter(|(v, _)| v.to_lowercase().contains(&needle))
                    .map(|(_, id)| id.clone())
                    .collect()
            }
            MetadataMode::StartsWith(prefix) => {
                let prefix = prefix.to_lowercase();
                self.entries_for_key(&filter.key)
                    .into_iter()
                    .filter(|(v, _)| v.to_lowercase().starts_with(&prefix))
                    .map(|(_, id)| id.clone())
                    .collect()
            }
            MetadataMode::EndsWith(suffix) => {
                let suffix = suffix.to_lowercase();
                self.entries_for_key(&filter.key)
                    .into_iter()
                    .filter(|(v, _)| v.to_lowercase().ends_with(&suffix))
                    .map(|(_, id)| id.clone())
                    .collect()
            }
            MetadataMode::In(set) => {
                let mut out = BTreeSet::new();
                for v in set {
                    if let Some(values) = self.by_key_value.get(&filter.key) {
                        if let Some(ids) = values.get(v) {
                            out.extend(ids.iter().cloned());
                        }
                    }
                }
                out
            }
            MetadataMode::NotIn(set) => {
                let all = self.all_ids_for_key(&filter.key);
                let in_set: BTreeSet<VolumeId> = set
                    .iter()
                    .filter_map(|v| self.by_key_value.get(&filter.key).and_then(|m| m.get(v)))
                    .flat_map(|ids| ids.iter().cloned())
                    .collect();
                all.difference(&in_set).cloned().collect()
            }
            MetadataMode::Gt(n) => self.numeric_filter(&filter.key, n, n, false, false),
            MetadataMode::Gte(n) => self.numeric_filter(&filter.key, n, n, true, false),
            MetadataMode::Lt(n) => self.numeric_filter_upper(&filter.key, n, false),
            MetadataMode::Lte(n) => self.numeric_filter_upper(&filter.key, n, true),
            MetadataMode::Between(lo, hi) => self.numeric_filter(&filter.key, lo, hi, true, true),
        }
    }

    /// Numeric lower-bound filter (and `between` when an upper bound is
    /// also supplied). Parses both sides as `f64`; a parse failure makes the
    /// comparison false for that entry (spec.md §4.5).
    fn numeric_filter(
        &self,
        key: &str,
        lo: &str,
        hi: &str,
        lo_inclusive: bool,
        use_hi: bool,
    ) -> BTreeSet<VolumeId> {
        let Ok(lo_n) = lo.parse::<f64>() else { return BTreeSet::new() };
        let hi_n = if use_hi { hi.parse::<f64>().ok() } else { None };
        if use_hi && hi_n.is_none() {
            return BTreeSet::new();
        }
        self.entries_for_key(key)
            .into_iter()
            .filter(|(v, _)| {
                let Ok(n) = v.parse::<f64>() else { return false };
                let lo_ok = if lo_inclusive { n >= lo_n } else { n > lo_n };
                let hi_ok = match hi_n {
                    Some(h) => n <= h,
                    None => true,
                };
                lo_ok && hi_ok
            })
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn numeric_filter_upper(&self, key: &str, hi: &str, inclusive: bool) -> BTreeSet<VolumeId> {
        let Ok(hi_n) = hi.parse::<f64>() else { return BTreeSet::new() };
        self.entries_for_key(key)
            .into_iter()
            .filter(|(v, _)| {
                let Ok(n) = v.parse::<f64>() else { return false };
                if inclusive {
                    n <= hi_n
                } else {
                    n < hi_n
                }
            })
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Combines filters with AND (spec.md §4.5).
    pub fn filter(&self, filters: &[MetadataFilter]) -> BTreeSet<VolumeId> {
        let mut iter = filters.iter();
        let Some(first) = iter.next() else { return BTreeSet::new() };
        let mut result = self.apply_one(first);
        for f in iter {
            if result.is_empty() {
                break;
            }
            let next = self.apply_one(f);
            result = result.intersection(&next).cloned().collect();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn between_is_inclusive_on_both_ends() {
        let mut idx = MetadataIndex::new();
        idx.add(&"a".into(), &meta(&[("score", "10")]));
        idx.add(&"b".into(), &meta(&[("score", "5")]));
        idx.add(&"c".into(), &meta(&[("score", "1")]));

        let result = idx.filter(&[MetadataFilter {
            key: "score".into(),
            mode: MetadataMode::Between("3".into(), "8".into()),
        }]);
        assert_eq!(result.len(), 1);
        assert!(result.contains("b"));
    }

    #[test]
    fn multiple_filters_combine_with_and() {
        let mut idx = MetadataIndex::new();
        idx.add(&"a".into(), &meta(&[("lang", "rust"), ("level", "advanced")]));
        idx.add(&"b".into(), &meta(&[("lang", "rust"), ("level", "beginner")]));

        let result = idx.filter(&[
            MetadataFilter { key: "lang".into(), mode: MetadataMode::Eq("rust".into()) },
            MetadataFilter { key: "level".into(), mode: MetadataMode::Eq("advanced".into()) },
        ]);
        assert_eq!(result.len(), 1);
        assert!(result.contains("a"));
    }

    #[test]
    fn non_numeric_value_fails_range_comparison_safely() {
        let mut idx = MetadataIndex::new();
        idx.add(&"a".into(), &meta(&[("score", "not-a-number")]));
        let result = idx.filter(&[MetadataFilter {
            key: "score".into(),
            mode: MetadataMode::Gt("1".into()),
        }]);
        assert!(result.is_empty());
    }

    #[test]
    fn delete_removes_from_all_value_buckets() {
        let mut idx = MetadataIndex::new();
        idx.add(&"a".into(), &meta(&[("tag", "x")]));
        idx.delete(&"a".into());
        let result = idx.filter(&[MetadataFilter {
            key: "tag".into(),
            mode: MetadataMode::Eq("x".into()),
        }]);
        assert!(result.is_empty());
    }
}
