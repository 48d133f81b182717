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

//! The sync coordinator: ties the lock, the merge detector, the repo FS
//! layer, and the version-control driver together into `pull()`, `push()`,
//! and a periodic scheduler. Pull always runs before push within one pass;
//! entries are imported before links within pull, and written together with
//! links before `commit_all` within push.

use std::collections::{HashMap, HashSet};
use std::time::Duration as StdDuration;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::inaccuracy;
use crate::lock;
use crate::merge::{self, ConflictAction};
use crate::record::{deterministic_link_id, EmbeddedLink, Entry, LinkType};
use crate::repo_fs;
use crate::serializer;
use crate::store::Store;
use crate::vcs::VcsDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Pull,
    Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictDetail {
    pub original_id: Uuid,
    pub conflict_id: Uuid,
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullResult {
    pub new_entries: u64,
    pub updated: u64,
    pub deleted: u64,
    pub conflicts: u64,
    pub conflict_details: Vec<ConflictDetail>,
    pub new_links: u64,
    pub deleted_links: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushResult {
    pub pushed: bool,
    pub new_entries: u64,
    pub deleted: u64,
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Pull(PullResult),
    Push(PushResult),
    Both(PullResult, PushResult),
    /// Another pass already holds the lock; the caller should treat this as
    /// a clean no-op, not an error.
    Contended { holder_pid: i32 },
}

pub struct SyncCoordinator<S, V> {
    store: S,
    vcs: V,
    config: SyncConfig,
    holder_pid: i32,
}

impl<S: Store, V: VcsDriver> SyncCoordinator<S, V> {
    pub fn new(store: S, vcs: V, config: SyncConfig) -> Self {
        Self {
            store,
            vcs,
            config,
            holder_pid: std::process::id() as i32,
        }
    }

    /// The underlying store, for callers (tool handlers) that need to read or
    /// mutate records directly rather than through a sync pass.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The version-control driver, for callers that need history operations
    /// (`file_log`/`show_file`) the coordinator itself never calls.
    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    /// Acquires the sync lock, runs `direction`, and always releases the
    /// lock afterward (even on error). Returns `Contended` without doing any
    /// work if another pass already holds it.
    pub fn sync(&self, direction: Direction) -> SyncResult<SyncOutcome> {
        let now = Utc::now();
        let acquired_locally = self
            .store
            .transaction(|tx| lock::acquire_row(tx, self.holder_pid, now))
            .map_err(SyncError::Store)?;

        if !acquired_locally {
            let holder_pid = self
                .store
                .transaction(|tx| Ok(tx.read_lock()?.map(|row| row.holder_pid).unwrap_or(self.holder_pid)))
                .map_err(SyncError::Store)?;
            return Ok(SyncOutcome::Contended { holder_pid });
        }

        let result = self.run_locked(direction);

        // Best-effort release regardless of how the locked pass went; a
        // crash mid-pass is also covered by the TTL in `lock.rs`.
        let _ = self.store.transaction(|tx| {
            tx.delete_lock_if_held_by(self.holder_pid)?;
            Ok(())
        });

        result
    }

    fn run_locked(&self, direction: Direction) -> SyncResult<SyncOutcome> {
        match direction {
            Direction::Pull => Ok(SyncOutcome::Pull(self.pull()?)),
            Direction::Push => Ok(SyncOutcome::Push(self.push()?)),
            Direction::Both => {
                let pull_result = self.pull()?;
                let push_result = self.push()?;
                Ok(SyncOutcome::Both(pull_result, push_result))
            }
        }
    }

    /// Fetches every configured repo, reconciles entries then
    /// links, detects deletions, and propagates inaccuracy for remote-won
    /// changes.
    pub fn pull(&self) -> SyncResult<PullResult> {
        for repo in &self.config.repos {
            if let Some(remote) = &repo.remote {
                if !repo.path.exists() {
                    info!(repo = %repo.name, remote, "repo path absent, cloning before first pull");
                    self.vcs.clone(remote, &repo.path).map_err(|source| SyncError::UnreachableRemote {
                        repo: repo.name.clone(),
                        source,
                    })?;
                }
            }
            if !self.vcs.is_vc_root(&repo.path) {
                continue;
            }
            self.vcs.pull(&repo.path).map_err(|source| SyncError::UnreachableRemote {
                repo: repo.name.clone(),
                source,
            })?;
        }

        // First configured repo wins on id collisions across repos.
        let mut remote_map: IndexMap<Uuid, Entry> = IndexMap::new();
        for repo in &self.config.repos {
            for entry in repo_fs::read_all_entries(&repo.path).map_err(|e| SyncError::Io {
                path: repo.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })? {
                remote_map.entry(entry.id).or_insert(entry);
            }
        }

        let now = Utc::now();
        self.store
            .transaction(|tx| {
                let mut result = PullResult::default();
                let mut remote_won: Vec<(Uuid, String, String)> = Vec::new();

                for (id, remote) in &remote_map {
                    let local = tx.get_entry(*id)?;
                    match local {
                        None => {
                            let mut imported = remote.clone();
                            imported.synced_version = Some(remote.version);
                            tx.import_entry_with_id(&imported)?;
                            result.new_entries += 1;
                            debug!(id = %id, "imported new remote entry");
                        }
                        Some(local) => match merge::detect(&local, remote) {
                            ConflictAction::NoChange => {
                                tx.update_synced_version(*id, remote.version)?;
                            }
                            ConflictAction::RemoteWins => {
                                let mut canonical = remote.clone();
                                canonical.synced_version = Some(remote.version);
                                tx.update_entry_content_fields(&canonical)?;
                                tx.update_synced_version(*id, remote.version)?;
                                result.updated += 1;
                                remote_won.push((*id, local.content.clone(), remote.content.clone()));
                            }
                            ConflictAction::LocalWins => {
                                tx.update_synced_version(*id, remote.version)?;
                            }
                            ConflictAction::Conflict => {
                                let resolution = merge::resolve_conflict(&local, remote, now);
                                let mut canonical = remote.clone();
                                canonical.synced_version = Some(remote.version);
                                tx.update_entry_content_fields(&canonical)?;
                                tx.update_synced_version(*id, remote.version)?;
                                tx.insert_entry(&resolution.conflict_copy)?;
                                tx.insert_link(&resolution.link)?;
                                result.conflicts += 1;
                                result.conflict_details.push(ConflictDetail {
                                    original_id: *id,
                                    conflict_id: resolution.conflict_copy.id,
                                    title: resolution.conflict_copy.title.clone(),
                                    reason: "local and remote content diverged".to_string(),
                                });
                                remote_won.push((*id, local.content.clone(), remote.content.clone()));
                            }
                        },
                    }
                }

                // Deletion detection: synced, non-conflict-copy locals absent
                // from the remote map.
                for id in tx.all_entry_ids()? {
                    if remote_map.contains_key(&id) {
                        continue;
                    }
                    let Some(entry) = tx.get_entry(id)? else { continue };
                    if entry.is_conflict_copy() {
                        continue;
                    }
                    if entry.synced_version.unwrap_or(0) == 0 {
                        continue;
                    }
                    tx.delete_entry_cascade(id)?;
                    result.deleted += 1;
                }

                // Link reconciliation: re-derive the remote-implied link set
                // from every entry now present in the remote map.
                let mut remote_triples: HashSet<(Uuid, Uuid, LinkType)> = HashSet::new();
                for (id, remote) in &remote_map {
                    for embedded in &remote.links {
                        if matches!(embedded.link_type, LinkType::ConflictsWith) {
                            continue;
                        }
                        remote_triples.insert((*id, embedded.target, embedded.link_type));
                    }
                }

                let existing_link_ids: HashSet<Uuid> = tx.get_all_links()?.iter().map(|l| l.id).collect();
                for (source_id, target_id, link_type) in &remote_triples {
                    if tx.get_entry(*source_id)?.is_none() || tx.get_entry(*target_id)?.is_none() {
                        continue;
                    }
                    let id = deterministic_link_id(*source_id, *target_id, *link_type);
                    let link = crate::record::Link {
                        id,
                        source_id: *source_id,
                        target_id: *target_id,
                        link_type: *link_type,
                        description: None,
                        source: "sync:remote".to_string(),
                        created_at: now.to_rfc3339(),
                        synced_at: Some(now.to_rfc3339()),
                    };
                    if !existing_link_ids.contains(&id) {
                        result.new_links += 1;
                    }
                    tx.import_link_with_id(&link)?;
                }

                for link in tx.get_all_links()? {
                    if link.synced_at.is_none() || link.is_conflict_provenance() {
                        continue;
                    }
                    let triple = (link.source_id, link.target_id, link.link_type);
                    if !remote_triples.contains(&triple) {
                        tx.delete_link(link.id)?;
                        result.deleted_links += 1;
                    }
                }

                // Inaccuracy propagation for every remote-won content change.
                for (id, old_content, new_content) in &remote_won {
                    let d = inaccuracy::diff_factor(old_content, new_content);
                    inaccuracy::propagate(tx, *id, d)?;
                }

                Ok(result)
            })
            .map_err(SyncError::Store)
    }

    /// Pulls first, then writes every non-conflict-copy local
    /// record to its routed repo (skipping byte-identical files), delete
    /// files whose id is gone from the store, commit and push each touched
    /// repo, and advance `synced_version`/`synced_at` for everything pushed.
    pub fn push(&self) -> SyncResult<PushResult> {
        self.pull()?;

        let mut result = PushResult::default();
        let now = Utc::now();

        let entries_and_links = self
            .store
            .transaction(|tx| {
                let mut out = Vec::new();
                for entry in tx.all_entries()? {
                    if entry.is_conflict_copy() {
                        continue;
                    }
                    let outgoing: Vec<EmbeddedLink> = tx
                        .outgoing(entry.id)?
                        .into_iter()
                        .filter(|l| !l.is_conflict_provenance())
                        .map(|l| EmbeddedLink {
                            target: l.target_id,
                            link_type: l.link_type,
                            description: l.description,
                        })
                        .collect();
                    out.push((entry, outgoing));
                }
                Ok(out)
            })
            .map_err(SyncError::Store)?;

        let mut touched_repo_names: HashSet<String> = HashSet::new();
        let mut by_repo_ids: HashMap<String, HashSet<Uuid>> = HashMap::new();

        for (entry, outgoing) in &entries_and_links {
            let Some(repo) = crate::routing::choose_repo(entry.scope, entry.project.as_deref(), &self.config.repos)
            else {
                warn!(id = %entry.id, "no repo configured for this record's scope/project, skipping push");
                continue;
            };
            by_repo_ids.entry(repo.name.clone()).or_default().insert(entry.id);

            let existing = repo_fs::read_entry_raw(&repo.path, entry.entry_type, entry.id).map_err(|e| {
                SyncError::Io {
                    path: repo.path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                }
            })?;
            let body = serializer::serialize(entry, outgoing);
            let is_new = existing.is_none();
            if existing.as_deref().map(|b| b == body.as_bytes()).unwrap_or(false) {
                continue;
            }
            repo_fs::write_entry(&repo.path, entry, outgoing).map_err(|e| SyncError::Io {
                path: repo.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
            touched_repo_names.insert(repo.name.clone());
            if is_new {
                result.new_entries += 1;
            }
        }

        // Files on disk whose id is gone from the local store.
        for repo in &self.config.repos {
            let known_ids = by_repo_ids.get(&repo.name).cloned().unwrap_or_default();
            for on_disk in repo_fs::read_all_entries(&repo.path).map_err(|e| SyncError::Io {
                path: repo.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })? {
                if known_ids.contains(&on_disk.id) {
                    continue;
                }
                repo_fs::delete_entry(&repo.path, on_disk.id, Some(on_disk.entry_type)).map_err(|e| {
                    SyncError::Io {
                        path: repo.path.clone(),
                        source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                    }
                })?;
                touched_repo_names.insert(repo.name.clone());
                result.deleted += 1;
            }
        }

        for repo in &self.config.repos {
            if !touched_repo_names.contains(&repo.name) {
                continue;
            }
            let committed = self
                .vcs
                .commit_all(&repo.path, "kb-sync: write-through update")
                .map_err(|source| SyncError::UnreachableRemote {
                    repo: repo.name.clone(),
                    source,
                })?;
            if committed {
                self.vcs.push(&repo.path).map_err(|source| SyncError::UnreachableRemote {
                    repo: repo.name.clone(),
                    source,
                })?;
                result.pushed = true;
                info!(repo = %repo.name, "pushed sync commit");
            }
        }

        self.store
            .transaction(|tx| {
                for (entry, _) in &entries_and_links {
                    tx.update_synced_version(entry.id, entry.version)?;
                }
                for link in tx.get_all_links()? {
                    if link.is_conflict_provenance() {
                        continue;
                    }
                    let mut updated = link.clone();
                    updated.synced_at = Some(now.to_rfc3339());
                    tx.import_link_with_id(&updated)?;
                }
                Ok(())
            })
            .map_err(SyncError::Store)?;

        Ok(result)
    }

    /// Runs `sync(Both)` every `interval`; an interval of zero returns
    /// immediately without syncing, so periodic sync can be disabled at any
    /// time by setting its interval to 0.
    pub async fn run_periodic(&self, interval: StdDuration) {
        if interval.is_zero() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.sync(Direction::Both) {
                Ok(SyncOutcome::Contended { holder_pid }) => {
                    info!(holder_pid, "skipped periodic sync: pass already in progress");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "periodic sync pass failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoConfig;
    use crate::record::Scope;
    use crate::store::Tx;
    use crate::vcs::GitCli;
    use kb_testutils::fixtures;
    use kb_testutils::git_sandbox::{git_available, GitSandbox};
    use kb_testutils::memory_store::MemoryStore;

    fn coordinator_for(agent: &str, clone_path: &std::path::Path) -> SyncCoordinator<MemoryStore, GitCli> {
        let config = SyncConfig {
            repos: vec![RepoConfig {
                name: "main".to_string(),
                path: clone_path.to_path_buf(),
                remote: None,
                scope: None,
                project: None,
            }],
        };
        SyncCoordinator::new(MemoryStore::new(), GitCli::new(agent), config)
    }

    #[test]
    fn single_entry_propagates_from_a_to_b() {
        if !git_available() {
            return;
        }
        let sandbox = GitSandbox::new().unwrap();
        let a_clone = sandbox.clone_agent("agent-a").unwrap();
        let b_clone = sandbox.clone_agent("agent-b").unwrap();

        let a = coordinator_for("agent-a", a_clone.path());
        let mut entry = fixtures::entry("Alice discovery");
        entry.entry_type = crate::record::EntryType::Pattern;
        entry.content = "Found a useful pattern for error handling".to_string();
        a.store.transaction(|tx| tx.insert_entry(&entry)).unwrap();
        let push_result = a.push().unwrap();
        assert!(push_result.pushed);
        assert_eq!(push_result.new_entries, 1);

        let b = coordinator_for("agent-b", b_clone.path());
        let pull_result = b.pull().unwrap();
        assert_eq!(pull_result.new_entries, 1);

        let imported = b.store.transaction(|tx| tx.get_entry(entry.id)).unwrap().unwrap();
        assert_eq!(imported.title, "Alice discovery");
    }

    #[test]
    fn divergent_edits_produce_a_conflict_copy_that_is_never_pushed() {
        if !git_available() {
            return;
        }
        let sandbox = GitSandbox::new().unwrap();
        let a_clone = sandbox.clone_agent("agent-a").unwrap();
        let b_clone = sandbox.clone_agent("agent-b").unwrap();

        let a = coordinator_for("agent-a", a_clone.path());
        let mut shared = fixtures::entry("Shared entry");
        shared.content = "Original".to_string();
        a.store.transaction(|tx| tx.insert_entry(&shared)).unwrap();
        a.push().unwrap();

        let b = coordinator_for("agent-b", b_clone.path());
        b.pull().unwrap();

        let mut a_copy = a.store.transaction(|tx| tx.get_entry(shared.id)).unwrap().unwrap();
        a_copy.title = "Alice version".to_string();
        a_copy.content = "Alice modified this".to_string();
        a_copy.version += 1;
        a.store.transaction(|tx| tx.update_entry_content_fields(&a_copy)).unwrap();

        let mut b_copy = b.store.transaction(|tx| tx.get_entry(shared.id)).unwrap().unwrap();
        b_copy.title = "Bob version".to_string();
        b_copy.content = "Bob modified this".to_string();
        b_copy.version += 1;
        b.store.transaction(|tx| tx.update_entry_content_fields(&b_copy)).unwrap();

        a.push().unwrap();
        let pull_result = b.pull().unwrap();

        assert_eq!(pull_result.conflicts, 1);
        let canonical = b.store.transaction(|tx| tx.get_entry(shared.id)).unwrap().unwrap();
        assert_eq!(canonical.title, "Alice version");

        let conflict_detail = &pull_result.conflict_details[0];
        let conflict_copy = b
            .store
            .transaction(|tx| tx.get_entry(conflict_detail.conflict_id))
            .unwrap()
            .unwrap();
        assert!(conflict_copy.is_conflict_copy());
        assert_eq!(conflict_copy.content, "Bob modified this");

        // Pushing B must never write the conflict copy to disk.
        b.push().unwrap();
        let on_disk = repo_fs::read_all_entries(b_clone.path()).unwrap();
        assert!(on_disk.iter().all(|e| !e.is_conflict_copy()));
    }

    #[test]
    fn convergent_edit_produces_no_conflict() {
        if !git_available() {
            return;
        }
        let sandbox = GitSandbox::new().unwrap();
        let a_clone = sandbox.clone_agent("agent-a").unwrap();
        let b_clone = sandbox.clone_agent("agent-b").unwrap();

        let a = coordinator_for("agent-a", a_clone.path());
        let mut shared = fixtures::entry("Converged entry");
        shared.content = "Will be edited".to_string();
        a.store.transaction(|tx| tx.insert_entry(&shared)).unwrap();
        a.push().unwrap();

        let b = coordinator_for("agent-b", b_clone.path());
        b.pull().unwrap();

        for coordinator in [&a, &b] {
            let mut copy = coordinator
                .store
                .transaction(|tx| tx.get_entry(shared.id))
                .unwrap()
                .unwrap();
            copy.title = "Converged title".to_string();
            copy.content = "Both agents wrote exactly this".to_string();
            copy.version += 1;
            coordinator
                .store
                .transaction(|tx| tx.update_entry_content_fields(&copy))
                .unwrap();
        }

        a.push().unwrap();
        let pull_result = b.pull().unwrap();
        assert_eq!(pull_result.conflicts, 0);
        let final_entry = b.store.transaction(|tx| tx.get_entry(shared.id)).unwrap().unwrap();
        assert_eq!(final_entry.title, "Converged title");
    }

    #[test]
    fn remote_deletion_propagates() {
        if !git_available() {
            return;
        }
        let sandbox = GitSandbox::new().unwrap();
        let a_clone = sandbox.clone_agent("agent-a").unwrap();
        let b_clone = sandbox.clone_agent("agent-b").unwrap();

        let a = coordinator_for("agent-a", a_clone.path());
        let entry = fixtures::entry("Delete me");
        a.store.transaction(|tx| tx.insert_entry(&entry)).unwrap();
        a.push().unwrap();

        let b = coordinator_for("agent-b", b_clone.path());
        b.pull().unwrap();
        assert!(b.store.transaction(|tx| tx.get_entry(entry.id)).unwrap().is_some());

        a.store.transaction(|tx| tx.delete_entry_cascade(entry.id)).unwrap();
        a.push().unwrap();

        let pull_result = b.pull().unwrap();
        assert!(pull_result.deleted >= 1);
        assert!(b.store.transaction(|tx| tx.get_entry(entry.id)).unwrap().is_none());
    }

    #[test]
    fn multi_repo_routing_places_files_by_scope() {
        if !git_available() {
            return;
        }
        let sandbox_company = GitSandbox::new().unwrap();
        let sandbox_project = GitSandbox::new().unwrap();
        let company_clone = sandbox_company.clone_agent("agent-a").unwrap();
        let project_clone = sandbox_project.clone_agent("agent-a").unwrap();

        let config = SyncConfig {
            repos: vec![
                RepoConfig {
                    name: "company".to_string(),
                    path: company_clone.path().to_path_buf(),
                    remote: None,
                    scope: Some(Scope::Company),
                    project: None,
                },
                RepoConfig {
                    name: "project".to_string(),
                    path: project_clone.path().to_path_buf(),
                    remote: None,
                    scope: Some(Scope::Project),
                    project: None,
                },
            ],
        };
        let coordinator = SyncCoordinator::new(MemoryStore::new(), GitCli::new("agent-a"), config);

        let mut company_entry = fixtures::entry("Company convention");
        company_entry.entry_type = crate::record::EntryType::Convention;
        company_entry.scope = Scope::Company;
        let mut project_entry = fixtures::entry("Project fact");
        project_entry.entry_type = crate::record::EntryType::Fact;
        project_entry.scope = Scope::Project;

        coordinator
            .store
            .transaction(|tx| {
                tx.insert_entry(&company_entry)?;
                tx.insert_entry(&project_entry)?;
                Ok(())
            })
            .unwrap();
        coordinator.push().unwrap();

        let company_entries = repo_fs::read_all_entries(company_clone.path()).unwrap();
        assert_eq!(company_entries.len(), 1);
        assert_eq!(company_entries[0].title, "Company convention");

        let project_entries = repo_fs::read_all_entries(project_clone.path()).unwrap();
        assert_eq!(project_entries.len(), 1);
        assert_eq!(project_entries[0].title, "Project fact");
    }

    #[test]
    fn second_push_with_no_changes_produces_no_commit() {
        if !git_available() {
            return;
        }
        let sandbox = GitSandbox::new().unwrap();
        let clone = sandbox.clone_agent("agent-a").unwrap();
        let coordinator = coordinator_for("agent-a", clone.path());

        let entry = fixtures::entry("Stable entry");
        coordinator.store.transaction(|tx| tx.insert_entry(&entry)).unwrap();
        assert!(coordinator.push().unwrap().pushed);
        assert!(!coordinator.push().unwrap().pushed);
    }

    #[test]
    fn contention_is_reported_without_running_the_pass() {
        // A real, currently-alive, foreign process to hold the lock, so the
        // "holder is dead" takeover path doesn't mask the contention case.
        let mut holder = std::process::Command::new("sleep").arg("5").spawn().unwrap();

        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .transaction(|tx| {
                tx.write_lock(&crate::store::LockRow {
                    holder_pid: holder.id() as i32,
                    acquired_at: now,
                    expires_at: now + crate::lock::LOCK_TTL,
                })
            })
            .unwrap();

        let config = SyncConfig::single_repo(std::env::temp_dir().join("kb-sync-contended"));
        let coordinator = SyncCoordinator::new(store, GitCli::new("agent-a"), config);
        let outcome = coordinator.sync(Direction::Pull).unwrap();

        holder.kill().ok();
        holder.wait().ok();

        match outcome {
            SyncOutcome::Contended { .. } => {}
            other => panic!("expected contention, got {other:?}"),
        }
    }

    #[test]
    fn pull_clones_a_configured_remote_whose_path_does_not_exist_yet() {
        if !git_available() {
            return;
        }
        let sandbox = GitSandbox::new().unwrap();
        let seeder = sandbox.clone_agent("seeder").unwrap();
        let seeded = fixtures::entry("Seeded before anyone else clones");
        let seeder_coordinator = coordinator_for("seeder", seeder.path());
        seeder_coordinator.store.transaction(|tx| tx.insert_entry(&seeded)).unwrap();
        seeder_coordinator.push().unwrap();

        let never_cloned = tempfile::tempdir().unwrap();
        let not_yet_a_repo = never_cloned.path().join("does-not-exist-yet");
        let config = SyncConfig {
            repos: vec![RepoConfig {
                name: "main".to_string(),
                path: not_yet_a_repo.clone(),
                remote: Some(sandbox.bare_path.to_string_lossy().into_owned()),
                scope: None,
                project: None,
            }],
        };
        let coordinator = SyncCoordinator::new(MemoryStore::new(), GitCli::new("agent-b"), config);

        assert!(!not_yet_a_repo.exists());
        let pull_result = coordinator.pull().unwrap();

        assert!(not_yet_a_repo.join(".git").exists());
        assert_eq!(pull_result.new_entries, 1);
        let imported = coordinator.store.transaction(|tx| tx.get_entry(seeded.id)).unwrap();
        assert!(imported.is_some());
    }
}
