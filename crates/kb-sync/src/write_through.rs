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

//! Write-through: every local tool handler that mutates an entry calls this
//! after committing to the store, so the on-disk file and the in-memory
//! touched-repos set stay consistent with it. Never called by the sync
//! coordinator itself, which writes files directly during push.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use uuid::Uuid;

use crate::config::RepoConfig;
use crate::record::{Entry, EntryType};
use crate::repo_fs;
use crate::routing::choose_repo;

#[derive(Debug, thiserror::Error)]
pub enum WriteThroughError {
    #[error("no repo configured for scope {scope:?} / project {project:?}")]
    NoRepoForRecord { scope: crate::record::Scope, project: Option<String> },
    #[error(transparent)]
    RepoFs(#[from] repo_fs::RepoFsError),
}

type Result<T> = std::result::Result<T, WriteThroughError>;

/// Tracks which configured repos have had a write since the last commit.
/// Purely an optimization for the sync pass to know which repos to inspect;
/// the file system remains the source of truth.
#[derive(Default)]
pub struct TouchedRepos {
    names: Mutex<HashSet<String>>,
}

impl TouchedRepos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, repo_name: &str) {
        self.names.lock().unwrap().insert(repo_name.to_string());
    }

    pub fn drain(&self) -> HashSet<String> {
        std::mem::take(&mut self.names.lock().unwrap())
    }

    pub fn is_touched(&self, repo_name: &str) -> bool {
        self.names.lock().unwrap().contains(repo_name)
    }
}

/// Writes `entry` to its routed repo, following a rename to a new scope or
/// project by deleting the stale copy out of the old repo first. Marks the
/// destination repo (and, on a cross-repo move, the origin repo) touched.
pub fn write_entry(
    repos: &[RepoConfig],
    touched: &TouchedRepos,
    entry: &Entry,
    previous: Option<&Entry>,
) -> Result<PathBuf> {
    let repo = choose_repo(entry.scope, entry.project.as_deref(), repos)
        .ok_or_else(|| WriteThroughError::NoRepoForRecord {
            scope: entry.scope,
            project: entry.project.clone(),
        })?;

    if let Some(previous) = previous {
        let previous_repo = choose_repo(previous.scope, previous.project.as_deref(), repos);
        if let Some(previous_repo) = previous_repo {
            if previous_repo.name != repo.name {
                repo_fs::delete_entry(&previous_repo.path, entry.id, Some(previous.entry_type))?;
                touched.mark(&previous_repo.name);
            }
        }
    }

    let links: Vec<_> = entry
        .links
        .iter()
        .filter(|l| !matches!(l.link_type, crate::record::LinkType::ConflictsWith))
        .cloned()
        .collect();
    let path = repo_fs::write_entry(&repo.path, entry, &links)?;
    touched.mark(&repo.name);
    Ok(path)
}

/// Deletes `id` from its routed repo, marking that repo touched.
pub fn delete_entry(
    repos: &[RepoConfig],
    touched: &TouchedRepos,
    scope: crate::record::Scope,
    project: Option<&str>,
    entry_type: EntryType,
    id: Uuid,
) -> Result<bool> {
    let repo = choose_repo(scope, project, repos).ok_or_else(|| WriteThroughError::NoRepoForRecord {
        scope,
        project: project.map(str::to_string),
    })?;
    let deleted = repo_fs::delete_entry(&repo.path, id, Some(entry_type))?;
    if deleted {
        touched.mark(&repo.name);
    }
    Ok(deleted)
}
