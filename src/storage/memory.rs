//! The one concrete `StorageBackend`: an in-memory `BTreeMap<Dn, Entry>`
//! snapshot with optional WAL-backed durability, optimistic write conflict
//! detection, and a versioned main-store checkpoint file.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::{unsupported_format, EngineError, ErrorKind, Result};
use crate::index::{IndexKind, IndexManager};
use crate::storage::wal::{Wal, WalOp};
use crate::storage::{Scope, StorageBackend, StorageTransaction};

pub const FORMAT_VERSION: u8 = 1;

/// How many recent commits' dirty key sets are retained for conflict
/// detection. Bounded so long-lived backends don't grow this unboundedly;
/// a write transaction open longer than this many intervening commits is
/// conservatively treated as conflicting.
const CONFLICT_WINDOW: usize = 4096;

struct Inner {
    entries: BTreeMap<Dn, Entry>,
    index: IndexManager,
    version: u64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<Entry>,
}

pub struct MemoryBackend {
    inner: RwLock<Inner>,
    write_lock: Mutex<()>,
    wal: Mutex<Wal>,
    recent_commits: Mutex<VecDeque<(u64, BTreeSet<Dn>)>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryBackend {
    /// A purely in-memory backend with no durability — convenient for tests.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: BTreeMap::new(),
                index: IndexManager::new(),
                version: 0,
            }),
            write_lock: Mutex::new(()),
            wal: Mutex::new(Wal::in_memory()),
            recent_commits: Mutex::new(VecDeque::new()),
            snapshot_path: None,
        }
    }

    /// Opens (or creates) a backend persisted at `snapshot_path` with a WAL
    /// at `wal_path`. Loads the snapshot, checks its format version, then
    /// replays any WAL frames committed since the last checkpoint.
    pub fn open(snapshot_path: impl AsRef<Path>, wal_path: impl AsRef<Path>) -> Result<Self> {
        let snapshot_path = snapshot_path.as_ref().to_path_buf();
        let mut entries = BTreeMap::new();

        if snapshot_path.exists() {
            let mut buf = Vec::new();
            std::fs::File::open(&snapshot_path)
                .map_err(EngineError::backend)?
                .read_to_end(&mut buf)
                .map_err(EngineError::backend)?;
            let Some((&version, body)) = buf.split_first() else {
                return Err(unsupported_format("empty main store file"));
            };
            if version > FORMAT_VERSION {
                return Err(unsupported_format(format!(
                    "main store format version {version} exceeds compiled {FORMAT_VERSION}"
                )));
            }
            let snapshot: Snapshot = serde_json::from_slice(body).map_err(EngineError::backend)?;
            for entry in snapshot.entries {
                entries.insert(entry.dn.clone(), entry);
            }
        }

        let mut index = IndexManager::new();
        for entry in entries.values() {
            index.insert_entry(&entry.dn, entry);
        }

        let mut wal = Wal::open(wal_path)?;
        for op in wal.replay()? {
            match op {
                WalOp::Put(entry) => {
                    if let Some(old) = entries.get(&entry.dn) {
                        index.remove_entry(&entry.dn, old);
                    }
                    index.insert_entry(&entry.dn, &entry);
                    entries.insert(entry.dn.clone(), entry);
                }
                WalOp::Delete(dn) => {
                    let dn = Dn::from_canonical(dn);
                    if let Some(old) = entries.remove(&dn) {
                        index.remove_entry(&dn, &old);
                    }
                }
            }
        }

        Ok(Self {
            inner: RwLock::new(Inner {
                entries,
                index,
                version: 0,
            }),
            write_lock: Mutex::new(()),
            wal: Mutex::new(wal),
            recent_commits: Mutex::new(VecDeque::new()),
            snapshot_path: Some(snapshot_path),
        })
    }

    fn conflicts(&self, began_version: u64, dirty: &BTreeSet<Dn>) -> bool {
        let recent = self.recent_commits.lock().unwrap();
        recent
            .iter()
            .any(|(v, keys)| *v > began_version && keys.intersection(dirty).next().is_some())
    }

    fn record_commit(&self, version: u64, dirty: BTreeSet<Dn>) {
        let mut recent = self.recent_commits.lock().unwrap();
        recent.push_back((version, dirty));
        while recent.len() > CONFLICT_WINDOW {
            recent.pop_front();
        }
    }
}

#[async_trait(?Send)]
impl StorageBackend for MemoryBackend {
    async fn begin_read(&self) -> Result<Box<dyn StorageTransaction + '_>> {
        let inner = self.inner.read().unwrap();
        Ok(Box::new(MemoryTransaction {
            backend: self,
            began_version: inner.version,
            entries: inner.entries.clone(),
            index: inner.index.clone(),
            dirty: BTreeSet::new(),
            read_only: true,
        }))
    }

    async fn begin_write(&self) -> Result<Box<dyn StorageTransaction + '_>> {
        let inner = self.inner.read().unwrap();
        Ok(Box::new(MemoryTransaction {
            backend: self,
            began_version: inner.version,
            entries: inner.entries.clone(),
            index: inner.index.clone(),
            dirty: BTreeSet::new(),
            read_only: false,
        }))
    }

    async fn checkpoint(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let inner = self.inner.read().unwrap();
        if let Some(path) = &self.snapshot_path {
            let snapshot = Snapshot {
                entries: inner.entries.values().cloned().collect(),
            };
            let body = serde_json::to_vec(&snapshot).map_err(EngineError::backend)?;
            let mut out = Vec::with_capacity(body.len() + 1);
            out.push(FORMAT_VERSION);
            out.extend_from_slice(&body);
            std::fs::File::create(path)
                .map_err(EngineError::backend)?
                .write_all(&out)
                .map_err(EngineError::backend)?;
        }
        self.wal.lock().unwrap().truncate()?;
        Ok(())
    }

    /// Bypasses the WAL: the index catalog is derived state, rebuildable
    /// from stored entries, so creating or dropping an index is not itself
    /// a logged commit (only the postings it produces matter, and those
    /// are recomputed from `entries` here).
    async fn create_index(&self, attr: &str, kind: IndexKind) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut inner = self.inner.write().unwrap();
        inner.index.create_index(attr, kind);
        let entries: Vec<Entry> = inner.entries.values().cloned().collect();
        for entry in &entries {
            inner.index.insert_entry(&entry.dn, entry);
        }
        Ok(())
    }

    async fn drop_index(&self, attr: &str) -> Result<()> {
        self.inner.write().unwrap().index.drop_index(attr);
        Ok(())
    }
}

struct MemoryTransaction<'a> {
    backend: &'a MemoryBackend,
    began_version: u64,
    entries: BTreeMap<Dn, Entry>,
    index: IndexManager,
    dirty: BTreeSet<Dn>,
    read_only: bool,
}

impl<'a> MemoryTransaction<'a> {
    fn require_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(EngineError::new(
                ErrorKind::StorageError,
                "write attempted on a read-only transaction",
            ));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl<'a> StorageTransaction for MemoryTransaction<'a> {
    fn get(&self, dn: &Dn) -> Result<Entry> {
        self.entries
            .get(dn)
            .cloned()
            .ok_or_else(|| crate::error::entry_not_found(dn.as_str().to_string()))
    }

    fn put(&mut self, entry: Entry) -> Result<()> {
        self.require_writable()?;
        let dn = entry.dn.clone();
        let old = self.entries.get(&dn).cloned();
        self.index.reindex(&dn, old.as_ref(), &entry);
        self.entries.insert(dn.clone(), entry);
        self.dirty.insert(dn);
        Ok(())
    }

    fn delete(&mut self, dn: &Dn) -> Result<()> {
        self.require_writable()?;
        let old = self
            .entries
            .remove(dn)
            .ok_or_else(|| crate::error::entry_not_found(dn.as_str().to_string()))?;
        self.index.remove_entry(dn, &old);
        self.dirty.insert(dn.clone());
        Ok(())
    }

    fn has_children(&self, dn: &Dn) -> bool {
        let suffix = format!(",{}", dn.as_str());
        self.entries.keys().any(|k| k.as_str().ends_with(&suffix))
    }

    fn index(&self) -> &IndexManager {
        &self.index
    }

    fn search_by_dn(&self, base_dn: &Dn, scope: Scope) -> Vec<Entry> {
        match scope {
            Scope::Base => self.entries.get(base_dn).cloned().into_iter().collect(),
            Scope::One => self
                .entries
                .values()
                .filter(|e| crate::dn::is_immediate_child(&e.dn, base_dn))
                .cloned()
                .collect(),
            Scope::Subtree => self
                .entries
                .values()
                .filter(|e| crate::dn::is_descendant_or_equal(&e.dn, base_dn))
                .cloned()
                .collect(),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.read_only || self.dirty.is_empty() {
            return Ok(());
        }
        let _guard = self.backend.write_lock.lock().unwrap();
        if self.backend.conflicts(self.began_version, &self.dirty) {
            return Err(crate::error::conflict(
                "concurrent commit touched overlapping entries",
            ));
        }

        let mut wal = self.backend.wal.lock().unwrap();
        for dn in &self.dirty {
            match self.entries.get(dn) {
                Some(entry) => wal.append(&WalOp::Put(entry.clone()))?,
                None => wal.append(&WalOp::Delete(dn.as_str().to_string()))?,
            }
        }
        drop(wal);

        let mut inner = self.backend.inner.write().unwrap();
        for dn in &self.dirty {
            match self.entries.get(dn) {
                Some(entry) => {
                    inner.entries.insert(dn.clone(), entry.clone());
                }
                None => {
                    inner.entries.remove(dn);
                }
            }
        }
        inner.index = self.index;
        inner.version += 1;
        let version = inner.version;
        drop(inner);

        self.backend.record_commit(version, self.dirty);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::normalize;

    fn alice() -> Entry {
        let mut e = Entry::new(normalize("uid=alice,ou=users,dc=example,dc=com").unwrap());
        e.set_strings("objectclass", vec!["inetOrgPerson".to_string()]);
        e
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let backend = MemoryBackend::in_memory();
        let mut txn = backend.begin_write().await.unwrap();
        let e = alice();
        txn.put(e.clone()).unwrap();
        txn.commit().await.unwrap();

        let read = backend.begin_read().await.unwrap();
        assert_eq!(read.get(&e.dn).unwrap(), e);
    }

    #[tokio::test]
    async fn delete_missing_entry_fails_not_found() {
        let backend = MemoryBackend::in_memory();
        let mut txn = backend.begin_write().await.unwrap();
        let missing = normalize("uid=ghost,dc=example,dc=com").unwrap();
        let err = txn.delete(&missing).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EntryNotFound);
    }

    #[tokio::test]
    async fn has_children_detects_subordinates() {
        let backend = MemoryBackend::in_memory();
        let mut txn = backend.begin_write().await.unwrap();
        let ou = Entry::new(normalize("ou=users,dc=example,dc=com").unwrap());
        txn.put(ou.clone()).unwrap();
        txn.put(alice()).unwrap();
        txn.commit().await.unwrap();

        let read = backend.begin_read().await.unwrap();
        assert!(read.has_children(&ou.dn));
        assert!(!read.has_children(&alice().dn));
    }

    #[tokio::test]
    async fn search_by_dn_respects_scope() {
        let backend = MemoryBackend::in_memory();
        let mut txn = backend.begin_write().await.unwrap();
        let base = normalize("dc=example,dc=com").unwrap();
        let ou = Entry::new(normalize("ou=users,dc=example,dc=com").unwrap());
        txn.put(ou.clone()).unwrap();
        txn.put(alice()).unwrap();
        txn.commit().await.unwrap();

        let read = backend.begin_read().await.unwrap();
        assert_eq!(read.search_by_dn(&base, Scope::Base).len(), 0);
        assert_eq!(read.search_by_dn(&base, Scope::One).len(), 1);
        assert_eq!(read.search_by_dn(&base, Scope::Subtree).len(), 2);
    }

    #[tokio::test]
    async fn concurrent_writers_touching_same_dn_conflict() {
        let backend = MemoryBackend::in_memory();
        let mut seed = backend.begin_write().await.unwrap();
        seed.put(alice()).unwrap();
        seed.commit().await.unwrap();

        let mut txn_a = backend.begin_write().await.unwrap();
        let mut txn_b = backend.begin_write().await.unwrap();
        let mut updated = alice();
        updated.set_strings("cn", vec!["Alice A".to_string()]);
        txn_a.put(updated.clone()).unwrap();
        txn_b.put(updated).unwrap();

        txn_a.commit().await.unwrap();
        let err = txn_b.commit().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn checkpoint_and_reopen_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("store.db");
        let wal_path = dir.path().join("wal.log");
        {
            let backend = MemoryBackend::open(&snapshot_path, &wal_path).unwrap();
            let mut txn = backend.begin_write().await.unwrap();
            txn.put(alice()).unwrap();
            txn.commit().await.unwrap();
            backend.checkpoint().await.unwrap();
        }
        let reopened = MemoryBackend::open(&snapshot_path, &wal_path).unwrap();
        let read = reopened.begin_read().await.unwrap();
        assert_eq!(read.get(&alice().dn).unwrap(), alice());
    }

    #[tokio::test]
    async fn create_index_backfills_existing_entries() {
        let backend = MemoryBackend::in_memory();
        let mut entry = alice();
        entry.set_strings("uid", vec!["alice".to_string()]);
        let mut seed = backend.begin_write().await.unwrap();
        seed.put(entry.clone()).unwrap();
        seed.commit().await.unwrap();

        backend
            .create_index("uid", crate::index::IndexKind::Equality)
            .await
            .unwrap();

        let read = backend.begin_read().await.unwrap();
        let hits = read.index().equality_lookup("uid", "alice").unwrap();
        assert!(hits.contains(&entry.dn));
    }

    #[tokio::test]
    async fn uncheckpointed_wal_replays_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("store.db");
        let wal_path = dir.path().join("wal.log");
        {
            let backend = MemoryBackend::open(&snapshot_path, &wal_path).unwrap();
            let mut txn = backend.begin_write().await.unwrap();
            txn.put(alice()).unwrap();
            txn.commit().await.unwrap();
            // No checkpoint: recovery must come entirely from the WAL.
        }
        let reopened = MemoryBackend::open(&snapshot_path, &wal_path).unwrap();
        let read = reopened.begin_read().await.unwrap();
        assert_eq!(read.get(&alice().dn).unwrap(), alice());
    }
}
