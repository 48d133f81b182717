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

//! The cross-process sync lock: a singleton row in the
//! embedded store, self-healing against both a dead holder and a stale TTL.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::store::{LockRow, Tx};

/// How long a lock is valid for before it is considered stale, absent any
/// renewal. Chosen generously relative to a single sync pass (subprocess
/// calls plus a handful of file writes).
pub const LOCK_TTL: Duration = Duration::minutes(10);

/// RAII guard returned by [`try_acquire`]. Releasing on `Drop` means a
/// panicking sync pass still frees the lock, the same pattern used for the
/// `running` flag in comparable sync engines in this codebase's lineage.
pub struct LockGuard<'a> {
    tx: &'a mut dyn Tx,
    holder_pid: i32,
    released: bool,
}

impl<'a> LockGuard<'a> {
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.released {
            return;
        }
        match self.tx.delete_lock_if_held_by(self.holder_pid) {
            Ok(true) => info!(pid = self.holder_pid, "released sync lock"),
            Ok(false) => warn!(pid = self.holder_pid, "lock was no longer ours at release time"),
            Err(err) => warn!(error = %err, "failed to release sync lock"),
        }
        self.released = true;
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.do_release();
    }
}

/// The acquisition decision, shared by both entry points below: (a) no row
/// exists, (b) the row is already held by us, (c) the holder pid is no
/// longer alive, or (d) the row's `expires_at` is in the past.
fn can_take(existing: &Option<LockRow>, holder_pid: i32, now: DateTime<Utc>) -> bool {
    match existing {
        None => true,
        Some(row) if row.holder_pid == holder_pid => true,
        Some(row) if row.expires_at < now => {
            warn!(holder = row.holder_pid, "sync lock expired, taking over");
            true
        }
        Some(row) if !process_alive(row.holder_pid) => {
            warn!(holder = row.holder_pid, "sync lock holder is dead, taking over");
            true
        }
        Some(row) => {
            info!(holder = row.holder_pid, "sync already in progress");
            false
        }
    }
}

/// `try_acquire()`, for callers that hold the lock only for the
/// lifetime of a single transaction: returns a [`LockGuard`] that releases on
/// `Drop`. Cases (c)/(d) overwrite the stale row atomically within the same
/// transaction.
pub fn try_acquire<'a>(tx: &'a mut dyn Tx, holder_pid: i32, now: DateTime<Utc>) -> anyhow::Result<Option<LockGuard<'a>>> {
    let existing = tx.read_lock()?;
    if !can_take(&existing, holder_pid, now) {
        return Ok(None);
    }
    tx.write_lock(&LockRow {
        holder_pid,
        acquired_at: now,
        expires_at: now + LOCK_TTL,
    })?;
    Ok(Some(LockGuard {
        tx,
        holder_pid,
        released: false,
    }))
}

/// Same decision as [`try_acquire`], but for callers (the sync coordinator)
/// whose critical section spans multiple transactions: writes the row and
/// returns whether it was taken, with no RAII guard. The caller is
/// responsible for calling `delete_lock_if_held_by` once the pass completes.
pub fn acquire_row(tx: &mut dyn Tx, holder_pid: i32, now: DateTime<Utc>) -> anyhow::Result<bool> {
    let existing = tx.read_lock()?;
    if !can_take(&existing, holder_pid, now) {
        return Ok(false);
    }
    tx.write_lock(&LockRow {
        holder_pid,
        acquired_at: now,
        expires_at: now + LOCK_TTL,
    })?;
    Ok(true)
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // Signal 0 performs no-op permission/existence checks only; this is the
    // standard unix liveness probe for an arbitrary pid.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    // Conservative default: if we can't check, assume the holder is alive
    // and fall back to the TTL to eventually reclaim the lock.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_testutils::memory_store::MemoryStore;

    #[test]
    fn no_row_means_free() {
        let store = MemoryStore::new();
        store
            .transaction(|tx| {
                let guard = try_acquire(tx, 111, Utc::now())?;
                assert!(guard.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn same_holder_can_reacquire() {
        let store = MemoryStore::new();
        store
            .transaction(|tx| {
                try_acquire(tx, 111, Utc::now())?.unwrap().release();
                let guard = try_acquire(tx, 111, Utc::now())?;
                assert!(guard.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn foreign_live_holder_blocks() {
        let store = MemoryStore::new();
        store
            .transaction(|tx| {
                try_acquire(tx, std::process::id() as i32, Utc::now())?.unwrap().release();
                tx.write_lock(&LockRow {
                    holder_pid: std::process::id() as i32,
                    acquired_at: Utc::now(),
                    expires_at: Utc::now() + LOCK_TTL,
                })?;
                let guard = try_acquire(tx, 999_999, Utc::now())?;
                assert!(guard.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn expired_lock_is_reclaimed() {
        let store = MemoryStore::new();
        store
            .transaction(|tx| {
                tx.write_lock(&LockRow {
                    holder_pid: 42,
                    acquired_at: Utc::now() - Duration::hours(2),
                    expires_at: Utc::now() - Duration::hours(1),
                })?;
                let guard = try_acquire(tx, 43, Utc::now())?;
                assert!(guard.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn release_never_deletes_a_foreign_holders_row() {
        let store = MemoryStore::new();
        store
            .transaction(|tx| {
                tx.write_lock(&LockRow {
                    holder_pid: 55,
                    acquired_at: Utc::now(),
                    expires_at: Utc::now() + LOCK_TTL,
                })?;
                assert!(!tx.delete_lock_if_held_by(999)?);
                assert!(tx.read_lock()?.is_some());
                Ok(())
            })
            .unwrap();
    }
}
