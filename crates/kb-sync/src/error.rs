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

//! The sync-pass error taxonomy, collected into one enum so the
//! coordinator can apply the propagation policy (per-record errors are
//! swallowed with a log; per-pass errors bubble up and release the lock).

use std::path::PathBuf;

use crate::record::MalformedRecord;
use crate::vcs::GitSubprocessError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A remote file failed validation. Callers that hit this for a single
    /// file should log and continue; it is only constructed as a typed error
    /// for the unit that parses one file, never surfaced pass-wide.
    #[error("malformed record at {path}: {source}")]
    MalformedRecord {
        path: PathBuf,
        #[source]
        source: MalformedRecord,
    },

    /// The version-control tool failed to fetch or upload. Fatal for the
    /// current pass; retryable on the next tick.
    #[error("could not reach remote for repo {repo}: {source}")]
    UnreachableRemote {
        repo: String,
        #[source]
        source: GitSubprocessError,
    },

    /// Another sync pass already holds the lock. Not an error condition by
    /// itself; the coordinator turns this into a clean early return.
    #[error("a sync pass is already in progress (held by pid {holder_pid})")]
    LockContention { holder_pid: i32 },

    /// The store rejected a write (e.g. a duplicate link id on import).
    /// Swallowed per-record by the coordinator.
    #[error("store rejected {entity} {id}: {reason}")]
    StoreConstraintViolation {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// Disk full, permission denied, or similar. Fatal for the pass; the
    /// coordinator releases the lock before propagating this.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Startup misconfiguration (bad sync-config file, missing repo path
    /// with no remote to clone from, duplicate repo names, more than one
    /// fallback repo). Fatal; the process should exit non-zero.
    #[error("sync configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// True for the error classes that are fatal to the whole pass (as
    /// opposed to a single record).
    pub fn is_pass_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnreachableRemote { .. } | Self::Io { .. } | Self::Configuration(_)
        )
    }
}
