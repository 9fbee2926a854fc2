//! Storage Engine (spec §4.D): transactions, DN-keyed get/put/delete, scope
//! iterators, index maintenance, persistence and recovery.
//!
//! One concrete backend (`memory::MemoryBackend`) ships today, but the trait
//! boundary mirrors the teacher's `LixBackend`/`LixTransaction` split so an
//! on-disk engine can be swapped in later without touching the Operation
//! Layer.

pub mod memory;
pub mod wal;

use async_trait::async_trait;

use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::Result;
use crate::index::{IndexKind, IndexManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base,
    One,
    Subtree,
}

/// A result row for `search_by_filter`: the entry plus whether the post
/// filter still needs to run (the planner decides; the storage layer just
/// returns plan-selected candidates).
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub entry: Entry,
}

#[async_trait(?Send)]
pub trait StorageBackend: Send + Sync {
    async fn begin_read(&self) -> Result<Box<dyn StorageTransaction + '_>>;

    async fn begin_write(&self) -> Result<Box<dyn StorageTransaction + '_>>;

    /// Flushes the in-memory index to disk and truncates the log (spec
    /// §4.D: "Checkpoint flushes the in-memory index to disk and truncates
    /// the log").
    async fn checkpoint(&self) -> Result<()>;

    /// Creates a secondary index and backfills it from every currently
    /// stored entry (spec §4.F `createIndex`). Visible to every
    /// transaction begun after this call returns.
    async fn create_index(&self, attr: &str, kind: IndexKind) -> Result<()>;

    /// Drops a secondary index (spec §4.F `dropIndex`).
    async fn drop_index(&self, attr: &str) -> Result<()>;
}

#[async_trait(?Send)]
pub trait StorageTransaction {
    fn get(&self, dn: &Dn) -> Result<Entry>;

    /// Upsert. Index maintenance for changed attributes happens inside the
    /// implementation so it stays inside the same snapshot as the write.
    fn put(&mut self, entry: Entry) -> Result<()>;

    /// Fails with `EntryNotFound` if absent. Unconditional: the
    /// `NotAllowedOnNonLeaf` check belongs to the Operation Layer, not here
    /// (spec §4.D).
    fn delete(&mut self, dn: &Dn) -> Result<()>;

    fn has_children(&self, dn: &Dn) -> bool;

    /// The index catalog visible to this transaction's snapshot. The
    /// Query Planner consults this to choose a plan; it never mutates it
    /// directly (index maintenance happens only through `put`/`delete`).
    fn index(&self) -> &IndexManager;

    /// `scope=base` yields only `base_dn`; `one` yields immediate children;
    /// `subtree` yields `base_dn` and all descendants. Order is
    /// unspecified — callers relying on order should sort explicitly.
    fn search_by_dn(&self, base_dn: &Dn, scope: Scope) -> Vec<Entry>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
