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

//! The tool verbs dispatched over RPC to peer agents and UIs: one `clap`
//! subcommand per verb, backed by `kb_sync::write_through` for local
//! mutation and `kb_sync::coordinator` for sync. Query/search ranking, wiki
//! rendering, and embeddings are out of scope; `query_knowledge` and
//! `list_knowledge` do a plain substring/tag filter.

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use uuid::Uuid;

use kb_sync::coordinator::{Direction, SyncCoordinator};
use kb_sync::inaccuracy;
use kb_sync::record::{deterministic_link_id, EntryType, Link, LinkType, Scope, Status};
use kb_sync::store::{Store, Tx};
use kb_sync::vcs::VcsDriver;
use kb_sync::write_through::{self, TouchedRepos};

#[derive(Subcommand, Debug)]
pub enum ToolCommand {
    StoreKnowledge(StoreKnowledgeArgs),
    UpdateKnowledge(UpdateKnowledgeArgs),
    DeleteKnowledge(DeleteKnowledgeArgs),
    DeprecateKnowledge(DeprecateKnowledgeArgs),
    LinkKnowledge(LinkKnowledgeArgs),
    QueryKnowledge(QueryKnowledgeArgs),
    ListKnowledge(ListKnowledgeArgs),
    GetKnowledge(GetKnowledgeArgs),
    SyncKnowledge(SyncKnowledgeArgs),
    GetEntryHistory(GetEntryHistoryArgs),
    GetEntryAtVersion(GetEntryAtVersionArgs),
}

#[derive(Args, Debug)]
pub struct StoreKnowledgeArgs {
    #[arg(long, value_parser = parse_entry_type)]
    entry_type: EntryType,
    #[arg(long)]
    title: String,
    #[arg(long)]
    content: String,
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
    #[arg(long)]
    project: Option<String>,
    #[arg(long, value_parser = parse_scope, default_value = "company")]
    scope: Scope,
    #[arg(long, default_value = "unknown")]
    source: String,
}

#[derive(Args, Debug)]
pub struct UpdateKnowledgeArgs {
    id: Uuid,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    content: Option<String>,
    #[arg(long, value_delimiter = ',')]
    tags: Option<Vec<String>>,
}

#[derive(Args, Debug)]
pub struct DeleteKnowledgeArgs {
    id: Uuid,
}

#[derive(Args, Debug)]
pub struct DeprecateKnowledgeArgs {
    id: Uuid,
    #[arg(long)]
    reason: String,
}

#[derive(Args, Debug)]
pub struct LinkKnowledgeArgs {
    source_id: Uuid,
    target_id: Uuid,
    #[arg(long, value_parser = parse_link_type, default_value = "related")]
    link_type: LinkType,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, default_value = "unknown")]
    source: String,
}

#[derive(Args, Debug)]
pub struct QueryKnowledgeArgs {
    query: String,
    #[arg(long, value_parser = parse_entry_type)]
    entry_type: Option<EntryType>,
    #[arg(long)]
    include_inactive: bool,
}

#[derive(Args, Debug)]
pub struct ListKnowledgeArgs {
    #[arg(long, value_parser = parse_entry_type)]
    entry_type: Option<EntryType>,
    #[arg(long, value_parser = parse_scope)]
    scope: Option<Scope>,
    #[arg(long)]
    project: Option<String>,
}

#[derive(Args, Debug)]
pub struct GetKnowledgeArgs {
    id: Uuid,
}

#[derive(Args, Debug)]
pub struct SyncKnowledgeArgs {
    #[arg(long, value_parser = parse_direction, default_value = "both")]
    direction: Direction,
}

#[derive(Args, Debug)]
pub struct GetEntryHistoryArgs {
    id: Uuid,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Args, Debug)]
pub struct GetEntryAtVersionArgs {
    id: Uuid,
    revision: String,
}

fn parse_entry_type(raw: &str) -> Result<EntryType, String> {
    EntryType::from_dir_name(raw).ok_or_else(|| format!("unknown entry type {raw:?}"))
}

fn parse_scope(raw: &str) -> Result<Scope, String> {
    match raw {
        "company" => Ok(Scope::Company),
        "project" => Ok(Scope::Project),
        "repo" => Ok(Scope::Repo),
        other => Err(format!("unknown scope {other:?}")),
    }
}

fn parse_link_type(raw: &str) -> Result<LinkType, String> {
    match raw {
        "related" => Ok(LinkType::Related),
        "derived" => Ok(LinkType::Derived),
        "depends" => Ok(LinkType::Depends),
        "elaborates" => Ok(LinkType::Elaborates),
        "supersedes" => Ok(LinkType::Supersedes),
        "conflicts_with" | "contradicts" => Ok(LinkType::ConflictsWith),
        other => Err(format!("unknown link type {other:?}")),
    }
}

fn parse_direction(raw: &str) -> Result<Direction, String> {
    match raw {
        "push" => Ok(Direction::Push),
        "pull" => Ok(Direction::Pull),
        "both" => Ok(Direction::Both),
        other => Err(format!("unknown sync direction {other:?}, expected push|pull|both")),
    }
}

pub fn dispatch<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    command: ToolCommand,
) -> anyhow::Result<Value> {
    match command {
        ToolCommand::StoreKnowledge(args) => store_knowledge(coordinator, args),
        ToolCommand::UpdateKnowledge(args) => update_knowledge(coordinator, args),
        ToolCommand::DeleteKnowledge(args) => delete_knowledge(coordinator, args),
        ToolCommand::DeprecateKnowledge(args) => deprecate_knowledge(coordinator, args),
        ToolCommand::LinkKnowledge(args) => link_knowledge(coordinator, args),
        ToolCommand::QueryKnowledge(args) => query_knowledge(coordinator, args),
        ToolCommand::ListKnowledge(args) => list_knowledge(coordinator, args),
        ToolCommand::GetKnowledge(args) => get_knowledge(coordinator, args),
        ToolCommand::SyncKnowledge(args) => sync_knowledge(coordinator, args),
        ToolCommand::GetEntryHistory(args) => get_entry_history(coordinator, args),
        ToolCommand::GetEntryAtVersion(args) => get_entry_at_version(coordinator, args),
    }
}

fn entry_summary(entry: &kb_sync::record::Entry) -> Value {
    json!({
        "id": entry.id,
        "type": entry.entry_type.dir_name(),
        "title": entry.title,
        "tags": entry.tags,
        "project": entry.project,
        "scope": entry.scope,
        "status": entry.status,
        "version": entry.version,
    })
}

fn store_knowledge<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: StoreKnowledgeArgs,
) -> anyhow::Result<Value> {
    let now = Utc::now();
    let entry = kb_sync::record::Entry {
        id: Uuid::new_v4(),
        entry_type: args.entry_type,
        title: args.title,
        content: args.content,
        tags: args.tags,
        project: args.project,
        scope: args.scope,
        source: args.source,
        status: Status::Active,
        created_at: now.to_rfc3339(),
        version: 1,
        synced_version: None,
        content_updated_at: Some(now.to_rfc3339()),
        updated_at: Some(now.to_rfc3339()),
        last_accessed_at: None,
        access_count: 0,
        strength: 0.0,
        inaccuracy: 0.0,
        deprecation_reason: None,
        flag_reason: None,
        declaration: None,
        parent_page_id: None,
        links: Vec::new(),
    };

    coordinator.store().transaction(|tx| tx.insert_entry(&entry))?;
    write_through::write_entry(&coordinator.config().repos, &TouchedRepos::new(), &entry, None)?;

    Ok(json!({ "id": entry.id }))
}

fn update_knowledge<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: UpdateKnowledgeArgs,
) -> anyhow::Result<Value> {
    let now = Utc::now();
    let previous = coordinator
        .store()
        .transaction(|tx| tx.get_entry(args.id))?
        .context("no such entry")?;

    let mut updated = previous.clone();
    if let Some(title) = args.title {
        updated.title = title;
    }
    if let Some(content) = args.content {
        updated.content = content;
    }
    if let Some(tags) = args.tags {
        updated.tags = tags;
    }

    let content_changed = updated.content_fields() != previous.content_fields();
    if content_changed {
        updated.version += 1;
        updated.content_updated_at = Some(now.to_rfc3339());
    }
    updated.updated_at = Some(now.to_rfc3339());

    let diff = inaccuracy::diff_factor(&previous.content, &updated.content);
    coordinator.store().transaction(|tx| {
        tx.update_entry_content_fields(&updated)?;
        if content_changed {
            inaccuracy::propagate(tx, updated.id, diff)?;
        }
        Ok(())
    })?;
    write_through::write_entry(&coordinator.config().repos, &TouchedRepos::new(), &updated, Some(&previous))?;

    Ok(json!({ "id": updated.id, "version": updated.version, "changed": content_changed }))
}

fn delete_knowledge<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: DeleteKnowledgeArgs,
) -> anyhow::Result<Value> {
    let entry = coordinator
        .store()
        .transaction(|tx| tx.get_entry(args.id))?
        .context("no such entry")?;

    coordinator.store().transaction(|tx| tx.delete_entry_cascade(args.id))?;
    write_through::delete_entry(
        &coordinator.config().repos,
        &TouchedRepos::new(),
        entry.scope,
        entry.project.as_deref(),
        entry.entry_type,
        args.id,
    )?;

    Ok(json!({ "id": args.id, "deleted": true }))
}

fn deprecate_knowledge<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: DeprecateKnowledgeArgs,
) -> anyhow::Result<Value> {
    let now = Utc::now();
    let previous = coordinator
        .store()
        .transaction(|tx| tx.get_entry(args.id))?
        .context("no such entry")?;

    let mut updated = previous.clone();
    updated.status = Status::Deprecated;
    updated.deprecation_reason = Some(args.reason);
    updated.version += 1;
    updated.content_updated_at = Some(now.to_rfc3339());
    updated.updated_at = Some(now.to_rfc3339());

    let diff = inaccuracy::diff_factor(&previous.content, &updated.content);
    coordinator.store().transaction(|tx| {
        tx.update_entry_content_fields(&updated)?;
        inaccuracy::propagate(tx, updated.id, diff)?;
        Ok(())
    })?;
    write_through::write_entry(&coordinator.config().repos, &TouchedRepos::new(), &updated, Some(&previous))?;

    Ok(json!({ "id": updated.id, "status": updated.status }))
}

fn link_knowledge<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: LinkKnowledgeArgs,
) -> anyhow::Result<Value> {
    let now = Utc::now();
    let id = deterministic_link_id(args.source_id, args.target_id, args.link_type);
    let link = Link {
        id,
        source_id: args.source_id,
        target_id: args.target_id,
        link_type: args.link_type,
        description: args.description,
        source: args.source,
        created_at: now.to_rfc3339(),
        synced_at: None,
    };

    // Upsert by the deterministic id: re-linking the same triple is a no-op,
    // not a constraint violation.
    coordinator.store().transaction(|tx| tx.import_link_with_id(&link))?;

    let source_entry = coordinator
        .store()
        .transaction(|tx| tx.get_entry(args.source_id))?
        .context("no such source entry")?;
    let outgoing = coordinator.store().transaction(|tx| {
        tx.outgoing(args.source_id)?
            .into_iter()
            .filter(|l| !l.is_conflict_provenance())
            .map(|l| {
                Ok(kb_sync::record::EmbeddedLink {
                    target: l.target_id,
                    link_type: l.link_type,
                    description: l.description,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })?;
    write_through::write_entry(&coordinator.config().repos, &TouchedRepos::new(), &{
        let mut e = source_entry;
        e.links = outgoing;
        e
    }, None)?;

    Ok(json!({ "id": link.id }))
}

fn query_knowledge<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: QueryKnowledgeArgs,
) -> anyhow::Result<Value> {
    let needle = args.query.to_lowercase();
    let entries = coordinator.store().transaction(|tx| tx.all_entries())?;
    let results: Vec<_> = entries
        .iter()
        .filter(|e| !e.is_conflict_copy())
        .filter(|e| args.include_inactive || matches!(e.status, Status::Active | Status::NeedsRevalidation))
        .filter(|e| args.entry_type.map_or(true, |t| e.entry_type == t))
        .filter(|e| {
            e.title.to_lowercase().contains(&needle)
                || e.content.to_lowercase().contains(&needle)
                || e.tags.iter().any(|t| t.to_lowercase() == needle)
        })
        .map(entry_summary)
        .collect();

    Ok(json!({ "results": results }))
}

fn list_knowledge<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: ListKnowledgeArgs,
) -> anyhow::Result<Value> {
    let entries = coordinator.store().transaction(|tx| tx.all_entries())?;
    let results: Vec<_> = entries
        .iter()
        .filter(|e| !e.is_conflict_copy())
        .filter(|e| args.entry_type.map_or(true, |t| e.entry_type == t))
        .filter(|e| args.scope.map_or(true, |s| e.scope == s))
        .filter(|e| args.project.is_none() || e.project.as_deref() == args.project.as_deref())
        .map(entry_summary)
        .collect();

    Ok(json!({ "results": results }))
}

fn get_knowledge<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: GetKnowledgeArgs,
) -> anyhow::Result<Value> {
    let now = Utc::now();
    let entry = coordinator
        .store()
        .transaction(|tx| tx.get_entry(args.id))?
        .context("no such entry")?;

    // Access metrics are structural: updating them never bumps `version`.
    let mut touched = entry.clone();
    touched.access_count += 1;
    touched.last_accessed_at = Some(now.to_rfc3339());
    coordinator
        .store()
        .transaction(|tx| tx.update_entry_content_fields(&touched))?;

    Ok(json!({
        "id": entry.id,
        "type": entry.entry_type.dir_name(),
        "title": entry.title,
        "content": entry.content,
        "tags": entry.tags,
        "project": entry.project,
        "scope": entry.scope,
        "status": entry.status,
        "version": entry.version,
        "inaccuracy": entry.inaccuracy,
        "access_count": touched.access_count,
    }))
}

fn sync_knowledge<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: SyncKnowledgeArgs,
) -> anyhow::Result<Value> {
    match coordinator.sync(args.direction)? {
        kb_sync::coordinator::SyncOutcome::Pull(result) => Ok(json!({ "pull": result_to_json_pull(&result) })),
        kb_sync::coordinator::SyncOutcome::Push(result) => Ok(json!({ "push": result_to_json_push(&result) })),
        kb_sync::coordinator::SyncOutcome::Both(pull, push) => Ok(json!({
            "pull": result_to_json_pull(&pull),
            "push": result_to_json_push(&push),
        })),
        kb_sync::coordinator::SyncOutcome::Contended { holder_pid } => {
            Ok(json!({ "contended": true, "holder_pid": holder_pid }))
        }
    }
}

fn result_to_json_pull(result: &kb_sync::coordinator::PullResult) -> Value {
    json!({
        "new_entries": result.new_entries,
        "updated": result.updated,
        "deleted": result.deleted,
        "conflicts": result.conflicts,
        "conflict_details": result.conflict_details.iter().map(|c| json!({
            "original_id": c.original_id,
            "conflict_id": c.conflict_id,
            "title": c.title,
            "reason": c.reason,
        })).collect::<Vec<_>>(),
        "new_links": result.new_links,
        "deleted_links": result.deleted_links,
    })
}

fn result_to_json_push(result: &kb_sync::coordinator::PushResult) -> Value {
    json!({
        "pushed": result.pushed,
        "new_entries": result.new_entries,
        "deleted": result.deleted,
    })
}

/// Resolves an entry's current canonical relative path so `file_log`/
/// `show_file` can be pointed at it.
fn canonical_relative_path(entry: &kb_sync::record::Entry) -> std::path::PathBuf {
    std::path::Path::new("entries")
        .join(entry.entry_type.dir_name())
        .join(kb_sync::serializer::canonical_filename(&entry.title, entry.id))
}

fn get_entry_history<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: GetEntryHistoryArgs,
) -> anyhow::Result<Value> {
    let entry = coordinator
        .store()
        .transaction(|tx| tx.get_entry(args.id))?
        .context("no such entry")?;
    let repo = kb_sync::routing::choose_repo(entry.scope, entry.project.as_deref(), &coordinator.config().repos)
        .context("no repo configured for this entry's scope/project")?;
    let relative = canonical_relative_path(&entry);

    let history = coordinator
        .vcs()
        .file_log(&repo.path, &relative, args.limit)
        .context("failed to read file history")?;

    Ok(json!({
        "id": entry.id,
        "history": history.iter().map(|c| json!({
            "revision": c.hash,
            "date": c.date,
            "message": c.message,
        })).collect::<Vec<_>>(),
    }))
}

fn get_entry_at_version<S: Store, V: VcsDriver>(
    coordinator: &SyncCoordinator<S, V>,
    args: GetEntryAtVersionArgs,
) -> anyhow::Result<Value> {
    let entry = coordinator
        .store()
        .transaction(|tx| tx.get_entry(args.id))?
        .context("no such entry")?;
    let repo = kb_sync::routing::choose_repo(entry.scope, entry.project.as_deref(), &coordinator.config().repos)
        .context("no repo configured for this entry's scope/project")?;
    let relative = canonical_relative_path(&entry);

    let raw = coordinator
        .vcs()
        .show_file(&repo.path, &args.revision, &relative)
        .context("failed to read historic file content")?
        .context("entry did not exist at that revision")?;
    let text = String::from_utf8(raw).context("historic file content was not valid UTF-8")?;
    let parsed = kb_sync::serializer::parse(&text).context("historic file content failed to parse")?;

    Ok(json!({
        "id": parsed.id,
        "title": parsed.title,
        "content": parsed.content,
        "version": parsed.version,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_sync::config::SyncConfig;
    use kb_sync::vcs::GitCli;
    use kb_testutils::fixtures;
    use kb_testutils::memory_store::MemoryStore;

    fn coordinator() -> (SyncCoordinator<MemoryStore, GitCli>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::single_repo(dir.path().to_path_buf());
        (SyncCoordinator::new(MemoryStore::new(), GitCli::new("test-agent"), config), dir)
    }

    #[test]
    fn updating_content_propagates_inaccuracy_to_a_dependent() {
        let (coordinator, _dir) = coordinator();
        let root = fixtures::entry("Root fact");
        let dependent = fixtures::entry("Dependent fact");
        coordinator
            .store()
            .transaction(|tx| {
                tx.insert_entry(&root)?;
                tx.insert_entry(&dependent)?;
                let link = fixtures::link(dependent.id, root.id, LinkType::Depends);
                tx.insert_link(&link)
            })
            .unwrap();

        update_knowledge(
            &coordinator,
            UpdateKnowledgeArgs {
                id: root.id,
                title: None,
                content: Some("A completely different root fact".to_string()),
                tags: None,
            },
        )
        .unwrap();

        let updated_dependent = coordinator.store().transaction(|tx| tx.get_entry(dependent.id)).unwrap().unwrap();
        assert!(updated_dependent.inaccuracy > 0.0, "dependent should pick up nonzero inaccuracy");
    }

    #[test]
    fn a_content_only_metadata_change_does_not_propagate() {
        let (coordinator, _dir) = coordinator();
        let root = fixtures::entry("Root fact");
        let dependent = fixtures::entry("Dependent fact");
        coordinator
            .store()
            .transaction(|tx| {
                tx.insert_entry(&root)?;
                tx.insert_entry(&dependent)?;
                let link = fixtures::link(dependent.id, root.id, LinkType::Depends);
                tx.insert_link(&link)
            })
            .unwrap();

        // Re-sending the same content/tags/title is not a content change.
        update_knowledge(
            &coordinator,
            UpdateKnowledgeArgs {
                id: root.id,
                title: Some(root.title.clone()),
                content: Some(root.content.clone()),
                tags: None,
            },
        )
        .unwrap();

        let updated_dependent = coordinator.store().transaction(|tx| tx.get_entry(dependent.id)).unwrap().unwrap();
        assert_eq!(updated_dependent.inaccuracy, 0.0);
    }

    #[test]
    fn deprecating_an_entry_runs_without_error() {
        let (coordinator, _dir) = coordinator();
        let entry = fixtures::entry("To deprecate");
        coordinator.store().transaction(|tx| tx.insert_entry(&entry)).unwrap();

        let result = deprecate_knowledge(
            &coordinator,
            DeprecateKnowledgeArgs {
                id: entry.id,
                reason: "superseded".to_string(),
            },
        )
        .unwrap();

        assert_eq!(result["status"], json!("deprecated"));
    }
}
