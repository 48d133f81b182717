// Copyright 2026 The kb-sync Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The interface the engine requires of the embedded relational store.
//! The store's own schema and query implementation are out
//! of scope; this module only states the operations the engine calls, plus
//! the guarantee every implementation must uphold: every method can be
//! nested inside a caller-opened transaction, and a transaction started by
//! the coordinator around pull/push is invisible to readers until committed.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::record::{Entry, EntryType, Link, LinkType, Status};

#[derive(Debug, Clone, PartialEq)]
pub struct LockRow {
    pub holder_pid: i32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub const LOCK_NAME: &str = "sync";

/// A transaction-scoped handle over the store. The coordinator opens one
/// transaction per pull or push pass; every mutation within that pass goes
/// through the same `Tx` so a crash mid-pass leaves nothing partially
/// applied: sync mutations inside pull/push are wrapped in transactions so
/// partial pulls are never visible.
pub trait Tx {
    // --- Entry operations ---
    fn get_entry(&mut self, id: Uuid) -> anyhow::Result<Option<Entry>>;
    fn all_entries(&mut self) -> anyhow::Result<Vec<Entry>>;
    fn all_entry_ids(&mut self) -> anyhow::Result<Vec<Uuid>>;
    /// Inserts a brand-new, locally authored entry.
    fn insert_entry(&mut self, entry: &Entry) -> anyhow::Result<()>;
    /// Inserts an entry that arrived from a peer, keeping its id and
    /// version as given (as opposed to `insert_entry`, which is for
    /// locally-originated records).
    fn import_entry_with_id(&mut self, entry: &Entry) -> anyhow::Result<()>;
    /// Overwrites the content-bearing fields of an existing entry (used by
    /// both local update tools and `remote_wins` pull resolution).
    fn update_entry_content_fields(&mut self, entry: &Entry) -> anyhow::Result<()>;
    fn update_synced_version(&mut self, id: Uuid, synced_version: u64) -> anyhow::Result<()>;
    /// Deletes an entry and every link where it is a source or target.
    fn delete_entry_cascade(&mut self, id: Uuid) -> anyhow::Result<()>;
    fn set_status(&mut self, id: Uuid, status: Status) -> anyhow::Result<()>;
    fn set_inaccuracy(&mut self, id: Uuid, inaccuracy: f64) -> anyhow::Result<()>;

    // --- Link operations ---
    fn get_all_links(&mut self) -> anyhow::Result<Vec<Link>>;
    fn insert_link(&mut self, link: &Link) -> anyhow::Result<()>;
    /// Upserts a peer-originated link by its deterministic id: inserting a
    /// link whose id already exists overwrites it rather than erroring, so
    /// re-imports are idempotent.
    fn import_link_with_id(&mut self, link: &Link) -> anyhow::Result<()>;
    fn delete_link(&mut self, id: Uuid) -> anyhow::Result<()>;
    fn outgoing(&mut self, id: Uuid) -> anyhow::Result<Vec<Link>>;
    fn incoming(&mut self, id: Uuid, types: Option<&[LinkType]>) -> anyhow::Result<Vec<Link>>;

    // --- Sync lock row operations ---
    fn read_lock(&mut self) -> anyhow::Result<Option<LockRow>>;
    fn write_lock(&mut self, row: &LockRow) -> anyhow::Result<()>;
    /// Deletes the lock row iff its `holder_pid` equals `holder_pid`;
    /// returns whether a row was deleted. Never deletes a foreign holder's
    /// row.
    fn delete_lock_if_held_by(&mut self, holder_pid: i32) -> anyhow::Result<bool>;
}

/// The store itself: opens transactions over `Tx`. One instance is opened
/// per process and shared between tool handlers and the sync coordinator.
pub trait Store: Send + Sync {
    fn transaction<R>(&self, f: impl FnOnce(&mut dyn Tx) -> anyhow::Result<R>) -> anyhow::Result<R>;
}

/// Looks up an entry's current `EntryType`, used by callers that only have
/// an id (e.g. `repo_fs::delete_entry`'s `entry_type` hint).
pub fn entry_type_of(tx: &mut dyn Tx, id: Uuid) -> anyhow::Result<Option<EntryType>> {
    Ok(tx.get_entry(id)?.map(|e| e.entry_type))
}
