//! Two-tier memoization for retrieved data.
//!
//! Tier one maps canonical concrete keys to loaded records, one store per
//! data kind. Tier two remembers which queries have already been fully
//! satisfied: alongside each query's as-supplied key we record the exact set
//! of concrete keys it produced. A later query is answerable from cache only
//! when its own concrete-key set is a subset of keys already loaded, so a
//! narrow earlier query never masquerades as having answered a broader one.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

/// Memoizer for one kind of data, keyed by canonical concrete key.
#[derive(Debug)]
pub struct Memoizer<T> {
    entries: HashMap<String, T>,
    /// as-supplied query key → concrete keys that satisfied it.
    done: HashMap<String, BTreeSet<String>>,
}

impl<T> Default for Memoizer<T> {
    fn default() -> Self {
        Memoizer { entries: HashMap::new(), done: HashMap::new() }
    }
}

impl<T> Memoizer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, concrete_key: &str) -> Option<&T> {
        self.entries.get(concrete_key)
    }

    pub fn contains(&self, concrete_key: &str) -> bool {
        self.entries.contains_key(concrete_key)
    }

    pub fn insert(&mut self, concrete_key: String, value: T) {
        self.entries.insert(concrete_key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record that `query_key` has been fully satisfied by exactly
    /// `concrete_keys`.
    pub fn mark_done(&mut self, query_key: String, concrete_keys: BTreeSet<String>) {
        self.done.insert(query_key, concrete_keys);
    }

    /// Answer a query from cache when possible.
    ///
    /// `wanted` is the concrete-key set this query resolves to against the
    /// current repository listing. A hit requires either that the same query
    /// key was satisfied before, or that every wanted key is already loaded.
    /// On a hit the corresponding values are returned in key order.
    pub fn resolve(&mut self, query_key: &str, wanted: &BTreeSet<String>) -> Option<Vec<(&String, &T)>> {
        let hit = match self.done.get(query_key) {
            Some(satisfied) => wanted.is_subset(satisfied),
            None => !wanted.is_empty() && wanted.iter().all(|k| self.entries.contains_key(k)),
        };
        if !hit {
            return None;
        }
        debug!(query = query_key, keys = wanted.len(), "cache hit");
        // mark_done so an identical later query (including an empty one)
        // short-circuits without re-listing.
        self.done.insert(query_key.to_string(), wanted.clone());
        let mut out = Vec::with_capacity(wanted.len());
        for k in wanted {
            let (key, value) = self.entries.get_key_value(k)?;
            out.push((key, value));
        }
        Some(out)
    }

    /// True when this exact query key has been satisfied before, regardless
    /// of what it produced. Used for queries whose result is a side effect
    /// on another store (e.g. match retrieval filling the source cache).
    pub fn is_done(&self, query_key: &str) -> bool {
        self.done.contains_key(query_key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.done.clear();
    }
}

/// Per-kind stores grouped so a whole dataset's caches drop together.
///
/// Maps handed out to callers are `BTreeMap` keyed by canonical concrete key,
/// so iteration over sensors is always in key order.
pub type KeyedMap<T> = BTreeMap<String, T>;

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(v: &[&str]) -> BTreeSet<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn miss_then_hit_after_fill() {
        let mut m: Memoizer<u32> = Memoizer::new();
        let wanted = keys(&["visit1-ccd0", "visit1-ccd1"]);
        assert!(m.resolve("visit1-ccd.*", &wanted).is_none());

        m.insert("visit1-ccd0".into(), 10);
        m.insert("visit1-ccd1".into(), 11);
        m.mark_done("visit1-ccd.*".into(), wanted.clone());

        let hit = m.resolve("visit1-ccd.*", &wanted).unwrap();
        assert_eq!(hit.len(), 2);
        assert_eq!(*hit[0].1, 10);
    }

    #[test]
    fn narrow_query_does_not_satisfy_broad_one() {
        let mut m: Memoizer<u32> = Memoizer::new();
        m.insert("visit1-ccd0".into(), 10);
        m.mark_done("visit1-ccd0".into(), keys(&["visit1-ccd0"]));

        // The broad query wants a key that was never loaded.
        let broad = keys(&["visit1-ccd0", "visit1-ccd1"]);
        assert!(m.resolve("visit1-ccd.*", &broad).is_none());
    }

    #[test]
    fn broad_fill_answers_narrow_query() {
        let mut m: Memoizer<u32> = Memoizer::new();
        m.insert("visit1-ccd0".into(), 10);
        m.insert("visit1-ccd1".into(), 11);
        m.mark_done("visit1-ccd.*".into(), keys(&["visit1-ccd0", "visit1-ccd1"]));

        let narrow = keys(&["visit1-ccd1"]);
        let hit = m.resolve("visit1-ccd1", &narrow).unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(*hit[0].1, 11);
    }

    #[test]
    fn empty_result_is_remembered_per_query_key() {
        let mut m: Memoizer<u32> = Memoizer::new();
        // Nothing matched; the backend records the (empty) satisfied set.
        m.mark_done("visit9-ccd.*".into(), BTreeSet::new());
        let hit = m.resolve("visit9-ccd.*", &BTreeSet::new()).unwrap();
        assert!(hit.is_empty());
        // A different empty query is still a miss.
        assert!(m.resolve("visit8-ccd.*", &BTreeSet::new()).is_none());
    }

    #[test]
    fn clear_drops_both_tiers() {
        let mut m: Memoizer<u32> = Memoizer::new();
        m.insert("k".into(), 1);
        m.mark_done("q".into(), keys(&["k"]));
        m.clear();
        assert!(m.is_empty());
        assert!(!m.is_done("q"));
    }
}
