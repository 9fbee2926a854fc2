//! Index Manager (spec §4.F): per-attribute equality / presence /
//! substring postings lists, organized as ordered key-value stores so
//! range scans on equality indexes are possible (spec §4.G rule 4).

use std::collections::{BTreeMap, BTreeSet};

use crate::dn::Dn;
use crate::entry::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Equality,
    Presence,
    Substring,
}

/// Minimum substring component length that can drive an index lookup
/// (spec §4.F: "key on lowercased 3-gram or prefix of length >= 3").
pub const MIN_SUBSTRING_KEY_LEN: usize = 3;

#[derive(Debug, Default, Clone)]
struct EqualityIndex {
    postings: BTreeMap<String, BTreeSet<Dn>>,
}

#[derive(Debug, Default, Clone)]
struct PresenceIndex {
    postings: BTreeSet<Dn>,
}

#[derive(Debug, Default, Clone)]
struct SubstringIndex {
    postings: BTreeMap<String, BTreeSet<Dn>>,
}

#[derive(Clone)]
enum IndexStorage {
    Equality(EqualityIndex),
    Presence(PresenceIndex),
    Substring(SubstringIndex),
}

#[derive(Clone)]
struct IndexEntry {
    kind: IndexKind,
    storage: IndexStorage,
}

/// Per-attribute index catalog. Mutated only inside a storage write
/// transaction (spec §5); the engine holds one `IndexManager` behind the
/// same lock that guards the main store.
#[derive(Default, Clone)]
pub struct IndexManager {
    indexes: BTreeMap<String, IndexEntry>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_index(&mut self, attr: &str, kind: IndexKind) {
        let attr = attr.to_ascii_lowercase();
        let storage = match kind {
            IndexKind::Equality => IndexStorage::Equality(EqualityIndex::default()),
            IndexKind::Presence => IndexStorage::Presence(PresenceIndex::default()),
            IndexKind::Substring => IndexStorage::Substring(SubstringIndex::default()),
        };
        self.indexes.insert(attr, IndexEntry { kind, storage });
    }

    pub fn drop_index(&mut self, attr: &str) {
        self.indexes.remove(&attr.to_ascii_lowercase());
    }

    pub fn lookup_index(&self, attr: &str) -> Option<IndexKind> {
        self.indexes.get(&attr.to_ascii_lowercase()).map(|e| e.kind)
    }

    pub fn has_index(&self, attr: &str, kind: IndexKind) -> bool {
        self.lookup_index(attr) == Some(kind)
    }

    /// Removes every posting referencing `dn` across all indexes (used on
    /// delete and before re-inserting an updated entry's postings).
    pub fn remove_entry(&mut self, dn: &Dn, entry: &Entry) {
        for (attr, index) in self.indexes.iter_mut() {
            match &mut index.storage {
                IndexStorage::Equality(eq) => {
                    for value in entry.get_strings(attr) {
                        if let Some(set) = eq.postings.get_mut(&value.to_ascii_lowercase()) {
                            set.remove(dn);
                        }
                    }
                }
                IndexStorage::Presence(pr) => {
                    pr.postings.remove(dn);
                }
                IndexStorage::Substring(sub) => {
                    for value in entry.get_strings(attr) {
                        for key in substring_keys(&value) {
                            if let Some(set) = sub.postings.get_mut(&key) {
                                set.remove(dn);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Inserts postings for `entry`'s current attribute values.
    pub fn insert_entry(&mut self, dn: &Dn, entry: &Entry) {
        for (attr, index) in self.indexes.iter_mut() {
            if !entry.has_attribute(attr) {
                continue;
            }
            match &mut index.storage {
                IndexStorage::Equality(eq) => {
                    for value in entry.get_strings(attr) {
                        eq.postings
                            .entry(value.to_ascii_lowercase())
                            .or_default()
                            .insert(dn.clone());
                    }
                }
                IndexStorage::Presence(pr) => {
                    pr.postings.insert(dn.clone());
                }
                IndexStorage::Substring(sub) => {
                    for value in entry.get_strings(attr) {
                        for key in substring_keys(&value) {
                            sub.postings.entry(key).or_default().insert(dn.clone());
                        }
                    }
                }
            }
        }
    }

    /// Reindexes an entry's postings after a mutation: remove the old
    /// version's postings, then insert the new version's.
    pub fn reindex(&mut self, dn: &Dn, old: Option<&Entry>, new: &Entry) {
        if let Some(old) = old {
            self.remove_entry(dn, old);
        }
        self.insert_entry(dn, new);
    }

    pub fn equality_lookup(&self, attr: &str, value: &str) -> Option<BTreeSet<Dn>> {
        let index = self.indexes.get(&attr.to_ascii_lowercase())?;
        match &index.storage {
            IndexStorage::Equality(eq) => Some(
                eq.postings
                    .get(&value.to_ascii_lowercase())
                    .cloned()
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }

    pub fn equality_range(&self, attr: &str, lower_bound: &str) -> Option<BTreeSet<Dn>> {
        let index = self.indexes.get(&attr.to_ascii_lowercase())?;
        match &index.storage {
            IndexStorage::Equality(eq) => {
                let lower = lower_bound.to_ascii_lowercase();
                let mut out = BTreeSet::new();
                for (_, dns) in eq.postings.range(lower..) {
                    out.extend(dns.iter().cloned());
                }
                Some(out)
            }
            _ => None,
        }
    }

    /// Symmetric counterpart to `equality_range` for `<=` predicates (spec
    /// §4.G rule 4: range predicates on an equality index drive a range
    /// scan, with the original predicate kept as post-filter for safety).
    pub fn equality_range_upto(&self, attr: &str, upper_bound: &str) -> Option<BTreeSet<Dn>> {
        let index = self.indexes.get(&attr.to_ascii_lowercase())?;
        match &index.storage {
            IndexStorage::Equality(eq) => {
                let upper = upper_bound.to_ascii_lowercase();
                let mut out = BTreeSet::new();
                for (_, dns) in eq.postings.range(..=upper) {
                    out.extend(dns.iter().cloned());
                }
                Some(out)
            }
            _ => None,
        }
    }

    pub fn presence_lookup(&self, attr: &str) -> Option<BTreeSet<Dn>> {
        let index = self.indexes.get(&attr.to_ascii_lowercase())?;
        match &index.storage {
            IndexStorage::Presence(pr) => Some(pr.postings.clone()),
            _ => None,
        }
    }

    /// Looks up candidates for one substring component. Returns `None` if
    /// there's no substring index, or if the component is shorter than
    /// `MIN_SUBSTRING_KEY_LEN` (the planner falls through to full scan).
    /// Postings are keyed by length-3 n-gram (`substring_keys`), so a
    /// component longer than 3 chars is reduced to its leading 3-gram
    /// before lookup; the caller's post-filter discards the resulting
    /// superset (spec §4.F: "returns candidate supersets requiring
    /// post-filter").
    pub fn substring_lookup(&self, attr: &str, key: &str) -> Option<BTreeSet<Dn>> {
        if key.len() < MIN_SUBSTRING_KEY_LEN {
            return None;
        }
        let index = self.indexes.get(&attr.to_ascii_lowercase())?;
        let lower = key.to_ascii_lowercase();
        let ngram: String = lower.chars().take(MIN_SUBSTRING_KEY_LEN).collect();
        match &index.storage {
            IndexStorage::Substring(sub) => {
                Some(sub.postings.get(&ngram).cloned().unwrap_or_default())
            }
            _ => None,
        }
    }
}

/// Breaks a value into lowercased length-3 n-gram keys (spec §4.F).
fn substring_keys(value: &str) -> BTreeSet<String> {
    let lower = value.to_ascii_lowercase();
    let chars: Vec<char> = lower.chars().collect();
    let mut keys = BTreeSet::new();
    if chars.len() < MIN_SUBSTRING_KEY_LEN {
        return keys;
    }
    for window in chars.windows(MIN_SUBSTRING_KEY_LEN) {
        keys.insert(window.iter().collect());
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::normalize;

    fn dn(s: &str) -> Dn {
        normalize(s).unwrap()
    }

    fn entry_with(dn_str: &str, attr: &str, value: &str) -> Entry {
        let mut e = Entry::new(dn(dn_str));
        e.set_strings(attr, vec![value.to_string()]);
        e
    }

    #[test]
    fn equality_index_roundtrips() {
        let mut idx = IndexManager::new();
        idx.create_index("uid", IndexKind::Equality);
        let e = entry_with("uid=alice,dc=example,dc=com", "uid", "alice");
        idx.insert_entry(&e.dn, &e);
        let hits = idx.equality_lookup("uid", "ALICE").unwrap();
        assert!(hits.contains(&e.dn));
    }

    #[test]
    fn remove_entry_clears_postings() {
        let mut idx = IndexManager::new();
        idx.create_index("uid", IndexKind::Equality);
        idx.create_index("uid", IndexKind::Equality); // idempotent re-create
        let e = entry_with("uid=alice,dc=example,dc=com", "uid", "alice");
        idx.insert_entry(&e.dn, &e);
        idx.remove_entry(&e.dn, &e);
        assert!(idx.equality_lookup("uid", "alice").unwrap().is_empty());
    }

    #[test]
    fn presence_index_tracks_any_value() {
        let mut idx = IndexManager::new();
        idx.create_index("mail", IndexKind::Presence);
        let e = entry_with("uid=alice,dc=example,dc=com", "mail", "a@example.com");
        idx.insert_entry(&e.dn, &e);
        assert!(idx.presence_lookup("mail").unwrap().contains(&e.dn));
    }

    #[test]
    fn substring_index_returns_superset_candidates() {
        let mut idx = IndexManager::new();
        idx.create_index("cn", IndexKind::Substring);
        let e = entry_with("uid=alice,dc=example,dc=com", "cn", "Alice Smith");
        idx.insert_entry(&e.dn, &e);
        assert!(idx.substring_lookup("cn", "ali").unwrap().contains(&e.dn));
        assert!(idx.substring_lookup("cn", "zzz").unwrap().is_empty());
    }

    #[test]
    fn substring_lookup_falls_through_for_short_key() {
        let mut idx = IndexManager::new();
        idx.create_index("cn", IndexKind::Substring);
        assert!(idx.substring_lookup("cn", "al").is_none());
    }

    #[test]
    fn substring_lookup_reduces_long_component_to_leading_ngram() {
        let mut idx = IndexManager::new();
        idx.create_index("cn", IndexKind::Substring);
        let e = entry_with("uid=alice,dc=example,dc=com", "cn", "Alice Smith");
        idx.insert_entry(&e.dn, &e);
        // "alic" has no posting of its own (postings are 3-grams); the
        // lookup must fall back to its leading 3-gram "ali" and still find
        // the entry, leaving the caller's post-filter to discard any
        // false positives from the superset.
        assert!(idx.substring_lookup("cn", "alic").unwrap().contains(&e.dn));
    }

    #[test]
    fn equality_range_supports_ordered_scan() {
        let mut idx = IndexManager::new();
        idx.create_index("uidnumber", IndexKind::Equality);
        let e1 = entry_with("uid=a,dc=example,dc=com", "uidnumber", "100");
        let e2 = entry_with("uid=b,dc=example,dc=com", "uidnumber", "999");
        idx.insert_entry(&e1.dn, &e1);
        idx.insert_entry(&e2.dn, &e2);
        let hits = idx.equality_range("uidnumber", "500").unwrap();
        assert!(hits.contains(&e2.dn));
        assert!(!hits.contains(&e1.dn));
    }

    #[test]
    fn equality_range_upto_bounds_above() {
        let mut idx = IndexManager::new();
        idx.create_index("uidnumber", IndexKind::Equality);
        let e1 = entry_with("uid=a,dc=example,dc=com", "uidnumber", "100");
        let e2 = entry_with("uid=b,dc=example,dc=com", "uidnumber", "999");
        idx.insert_entry(&e1.dn, &e1);
        idx.insert_entry(&e2.dn, &e2);
        let hits = idx.equality_range_upto("uidnumber", "500").unwrap();
        assert!(hits.contains(&e1.dn));
        assert!(!hits.contains(&e2.dn));
    }
}
