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

//! An in-memory `Store`/`Tx` implementation for fast unit tests. Mutations
//! are applied to a scratch clone of the state and only copied back into the
//! shared state once the caller's closure returns `Ok`, so a failing
//! transaction leaves nothing behind, the same guarantee a real transactional
//! backend gives.

use std::collections::HashMap;
use std::sync::Mutex;

use kb_sync::record::{Entry, EntryType, Link, LinkType, Status};
use kb_sync::store::{LockRow, Store, Tx};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct State {
    entries: HashMap<Uuid, Entry>,
    links: HashMap<Uuid, Link>,
    lock: Option<LockRow>,
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Seeds the store with pre-built entries/links, for tests that want to
    /// start from a non-empty graph.
    pub fn seed(entries: Vec<Entry>, links: Vec<Link>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap();
            for entry in entries {
                state.entries.insert(entry.id, entry);
            }
            for link in links {
                state.links.insert(link.id, link);
            }
        }
        store
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn transaction<R>(&self, f: impl FnOnce(&mut dyn Tx) -> anyhow::Result<R>) -> anyhow::Result<R> {
        let mut scratch = self.state.lock().unwrap().clone();
        let mut tx = MemoryTx { state: &mut scratch };
        let result = f(&mut tx);
        if result.is_ok() {
            *self.state.lock().unwrap() = scratch;
        }
        result
    }
}

struct MemoryTx<'a> {
    state: &'a mut State,
}

impl Tx for MemoryTx<'_> {
    fn get_entry(&mut self, id: Uuid) -> anyhow::Result<Option<Entry>> {
        Ok(self.state.entries.get(&id).cloned())
    }

    fn all_entries(&mut self) -> anyhow::Result<Vec<Entry>> {
        Ok(self.state.entries.values().cloned().collect())
    }

    fn all_entry_ids(&mut self) -> anyhow::Result<Vec<Uuid>> {
        Ok(self.state.entries.keys().copied().collect())
    }

    fn insert_entry(&mut self, entry: &Entry) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.state.entries.contains_key(&entry.id),
            "entry {} already exists",
            entry.id
        );
        self.state.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    fn import_entry_with_id(&mut self, entry: &Entry) -> anyhow::Result<()> {
        self.state.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    fn update_entry_content_fields(&mut self, entry: &Entry) -> anyhow::Result<()> {
        self.state.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    fn update_synced_version(&mut self, id: Uuid, synced_version: u64) -> anyhow::Result<()> {
        if let Some(e) = self.state.entries.get_mut(&id) {
            e.synced_version = Some(synced_version);
        }
        Ok(())
    }

    fn delete_entry_cascade(&mut self, id: Uuid) -> anyhow::Result<()> {
        self.state.entries.remove(&id);
        self.state.links.retain(|_, l| l.source_id != id && l.target_id != id);
        Ok(())
    }

    fn set_status(&mut self, id: Uuid, status: Status) -> anyhow::Result<()> {
        if let Some(e) = self.state.entries.get_mut(&id) {
            e.status = status;
        }
        Ok(())
    }

    fn set_inaccuracy(&mut self, id: Uuid, inaccuracy: f64) -> anyhow::Result<()> {
        if let Some(e) = self.state.entries.get_mut(&id) {
            e.inaccuracy = inaccuracy;
        }
        Ok(())
    }

    fn get_all_links(&mut self) -> anyhow::Result<Vec<Link>> {
        Ok(self.state.links.values().cloned().collect())
    }

    fn insert_link(&mut self, link: &Link) -> anyhow::Result<()> {
        self.state.links.insert(link.id, link.clone());
        Ok(())
    }

    fn import_link_with_id(&mut self, link: &Link) -> anyhow::Result<()> {
        self.state.links.insert(link.id, link.clone());
        Ok(())
    }

    fn delete_link(&mut self, id: Uuid) -> anyhow::Result<()> {
        self.state.links.remove(&id);
        Ok(())
    }

    fn outgoing(&mut self, id: Uuid) -> anyhow::Result<Vec<Link>> {
        Ok(self.state.links.values().filter(|l| l.source_id == id).cloned().collect())
    }

    fn incoming(&mut self, id: Uuid, types: Option<&[LinkType]>) -> anyhow::Result<Vec<Link>> {
        Ok(self
            .state
            .links
            .values()
            .filter(|l| l.target_id == id)
            .filter(|l| types.map_or(true, |ts| ts.contains(&l.link_type)))
            .cloned()
            .collect())
    }

    fn read_lock(&mut self) -> anyhow::Result<Option<LockRow>> {
        Ok(self.state.lock.clone())
    }

    fn write_lock(&mut self, row: &LockRow) -> anyhow::Result<()> {
        self.state.lock = Some(row.clone());
        Ok(())
    }

    fn delete_lock_if_held_by(&mut self, holder_pid: i32) -> anyhow::Result<bool> {
        match &self.state.lock {
            Some(row) if row.holder_pid == holder_pid => {
                self.state.lock = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Looks up an entry's type directly, without going through a transaction;
/// convenient for test assertions.
pub fn entry_type(store: &MemoryStore, id: Uuid) -> Option<EntryType> {
    store.state.lock().unwrap().entries.get(&id).map(|e| e.entry_type)
}
