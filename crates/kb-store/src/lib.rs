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

//! A small SQLite-backed implementation of `kb_sync::store::{Store, Tx}`, so
//! the engine has a concrete, durable store to run against outside of tests.
//! Three tables: `entries`, `links`, and a single-row `sync_lock`. This crate
//! is deliberately thin; the interesting logic lives in `kb-sync` and is
//! exercised through the trait, not through anything SQLite-specific here.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use kb_sync::record::{Entry, EntryType, Link, LinkType, Scope, Status};
use kb_sync::store::{LockRow, Store, Tx};

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("failed to open database at {path}: {source}")]
    Connect { path: String, source: rusqlite::Error },
    #[error("failed to initialize schema: {0}")]
    Schema(#[source] rusqlite::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    id                  TEXT PRIMARY KEY,
    entry_type          TEXT NOT NULL,
    title               TEXT NOT NULL,
    content             TEXT NOT NULL,
    tags                TEXT NOT NULL,
    project             TEXT,
    scope               TEXT NOT NULL,
    source              TEXT NOT NULL,
    status              TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    version             INTEGER NOT NULL,
    synced_version      INTEGER,
    content_updated_at  TEXT,
    updated_at          TEXT,
    last_accessed_at    TEXT,
    access_count        INTEGER NOT NULL,
    strength            REAL NOT NULL,
    inaccuracy          REAL NOT NULL,
    deprecation_reason  TEXT,
    flag_reason         TEXT,
    declaration         TEXT,
    parent_page_id      TEXT
);
CREATE TABLE IF NOT EXISTS links (
    id          TEXT PRIMARY KEY,
    source_id   TEXT NOT NULL,
    target_id   TEXT NOT NULL,
    link_type   TEXT NOT NULL,
    description TEXT,
    source      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    synced_at   TEXT
);
CREATE INDEX IF NOT EXISTS links_source_id ON links(source_id);
CREATE INDEX IF NOT EXISTS links_target_id ON links(target_id);
CREATE TABLE IF NOT EXISTS sync_lock (
    id          INTEGER PRIMARY KEY CHECK (id = 0),
    holder_pid  INTEGER NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at  TEXT NOT NULL
);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path` and ensures the
    /// schema exists. WAL mode trades a small amount of durability-on-crash
    /// for write throughput, reasonable for a single-user local store.
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let conn = Connection::open(path).map_err(|source| OpenError::Connect {
            path: path.display().to_string(),
            source,
        })?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(OpenError::Schema)?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(OpenError::Schema)?;
        conn.execute_batch(SCHEMA).map_err(OpenError::Schema)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// An in-memory database, for tests and one-shot CLI invocations that
    /// don't need persistence.
    pub fn open_in_memory() -> Result<Self, OpenError> {
        let conn = Connection::open_in_memory().map_err(|source| OpenError::Connect {
            path: ":memory:".to_string(),
            source,
        })?;
        conn.execute_batch(SCHEMA).map_err(OpenError::Schema)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl Store for SqliteStore {
    fn transaction<R>(&self, f: impl FnOnce(&mut dyn Tx) -> Result<R>) -> Result<R> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let mut wrapper = SqliteTx { tx: &tx };
        let result = f(&mut wrapper);
        match result {
            Ok(value) => {
                tx.commit().context("failed to commit transaction")?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }
}

struct SqliteTx<'conn> {
    tx: &'conn rusqlite::Transaction<'conn>,
}

fn scope_to_text(scope: Scope) -> &'static str {
    match scope {
        Scope::Company => "company",
        Scope::Project => "project",
        Scope::Repo => "repo",
    }
}

fn scope_from_text(text: &str) -> Result<Scope> {
    match text {
        "company" => Ok(Scope::Company),
        "project" => Ok(Scope::Project),
        "repo" => Ok(Scope::Repo),
        other => anyhow::bail!("unknown scope {other:?} in entries table"),
    }
}

fn status_to_text(status: Status) -> &'static str {
    match status {
        Status::Active => "active",
        Status::Deprecated => "deprecated",
        Status::NeedsRevalidation => "needs_revalidation",
        Status::Dormant => "dormant",
    }
}

fn status_from_text(text: &str) -> Result<Status> {
    match text {
        "active" => Ok(Status::Active),
        "deprecated" => Ok(Status::Deprecated),
        "needs_revalidation" => Ok(Status::NeedsRevalidation),
        "dormant" => Ok(Status::Dormant),
        other => anyhow::bail!("unknown status {other:?} in entries table"),
    }
}

fn link_type_from_text(text: &str) -> Result<LinkType> {
    match text {
        "related" => Ok(LinkType::Related),
        "derived" => Ok(LinkType::Derived),
        "depends" => Ok(LinkType::Depends),
        "elaborates" => Ok(LinkType::Elaborates),
        "supersedes" => Ok(LinkType::Supersedes),
        "conflicts_with" => Ok(LinkType::ConflictsWith),
        other => anyhow::bail!("unknown link type {other:?} in links table"),
    }
}

fn entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
    let id: String = row.get("id")?;
    let entry_type: String = row.get("entry_type")?;
    let tags_json: String = row.get("tags")?;
    let scope: String = row.get("scope")?;
    let status: String = row.get("status")?;
    let parent_page_id: Option<String> = row.get("parent_page_id")?;

    Ok(Entry {
        id: id.parse().map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        entry_type: EntryType::from_dir_name(&entry_type).unwrap_or(EntryType::Fact),
        title: row.get("title")?,
        content: row.get("content")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        project: row.get("project")?,
        scope: scope_from_text(&scope).unwrap_or_default(),
        source: row.get("source")?,
        status: status_from_text(&status).unwrap_or_default(),
        created_at: row.get("created_at")?,
        version: row.get::<_, i64>("version")? as u64,
        synced_version: row.get::<_, Option<i64>>("synced_version")?.map(|v| v as u64),
        content_updated_at: row.get("content_updated_at")?,
        updated_at: row.get("updated_at")?,
        last_accessed_at: row.get("last_accessed_at")?,
        access_count: row.get::<_, i64>("access_count")? as u64,
        strength: row.get("strength")?,
        inaccuracy: row.get("inaccuracy")?,
        deprecation_reason: row.get("deprecation_reason")?,
        flag_reason: row.get("flag_reason")?,
        declaration: row.get("declaration")?,
        parent_page_id: parent_page_id.and_then(|s| s.parse().ok()),
        // Never read back: the `links` table is the source of truth once an
        // entry is in the store.
        links: Vec::new(),
    })
}

fn link_from_row(row: &rusqlite::Row) -> rusqlite::Result<Link> {
    let id: String = row.get("id")?;
    let source_id: String = row.get("source_id")?;
    let target_id: String = row.get("target_id")?;
    let link_type: String = row.get("link_type")?;

    Ok(Link {
        id: id.parse().map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        source_id: source_id
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?,
        target_id: target_id
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?,
        link_type: link_type_from_text(&link_type).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        description: row.get("description")?,
        source: row.get("source")?,
        created_at: row.get("created_at")?,
        synced_at: row.get("synced_at")?,
    })
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
}

impl Tx for SqliteTx<'_> {
    fn get_entry(&mut self, id: Uuid) -> Result<Option<Entry>> {
        self.tx
            .query_row("SELECT * FROM entries WHERE id = ?1", params![id.to_string()], entry_from_row)
            .optional()
            .context("get_entry")
    }

    fn all_entries(&mut self) -> Result<Vec<Entry>> {
        let mut stmt = self.tx.prepare("SELECT * FROM entries")?;
        let rows = stmt.query_map([], entry_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("all_entries")
    }

    fn all_entry_ids(&mut self) -> Result<Vec<Uuid>> {
        let mut stmt = self.tx.prepare("SELECT id FROM entries")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("all_entry_ids")?
            .into_iter()
            .map(|s| s.parse().context("malformed entry id in database"))
            .collect()
    }

    fn insert_entry(&mut self, entry: &Entry) -> Result<()> {
        let exists: bool = self
            .tx
            .query_row("SELECT 1 FROM entries WHERE id = ?1", params![entry.id.to_string()], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            anyhow::bail!("entry {} already exists", entry.id);
        }
        insert_or_replace_entry(self.tx, entry)
    }

    fn import_entry_with_id(&mut self, entry: &Entry) -> Result<()> {
        insert_or_replace_entry(self.tx, entry)
    }

    fn update_entry_content_fields(&mut self, entry: &Entry) -> Result<()> {
        insert_or_replace_entry(self.tx, entry)
    }

    fn update_synced_version(&mut self, id: Uuid, synced_version: u64) -> Result<()> {
        self.tx
            .execute(
                "UPDATE entries SET synced_version = ?2 WHERE id = ?1",
                params![id.to_string(), synced_version as i64],
            )
            .context("update_synced_version")?;
        Ok(())
    }

    fn delete_entry_cascade(&mut self, id: Uuid) -> Result<()> {
        let id_text = id.to_string();
        self.tx
            .execute("DELETE FROM links WHERE source_id = ?1 OR target_id = ?1", params![id_text])
            .context("delete_entry_cascade: links")?;
        self.tx
            .execute("DELETE FROM entries WHERE id = ?1", params![id_text])
            .context("delete_entry_cascade: entry")?;
        Ok(())
    }

    fn set_status(&mut self, id: Uuid, status: Status) -> Result<()> {
        self.tx
            .execute(
                "UPDATE entries SET status = ?2 WHERE id = ?1",
                params![id.to_string(), status_to_text(status)],
            )
            .context("set_status")?;
        Ok(())
    }

    fn set_inaccuracy(&mut self, id: Uuid, inaccuracy: f64) -> Result<()> {
        self.tx
            .execute("UPDATE entries SET inaccuracy = ?2 WHERE id = ?1", params![id.to_string(), inaccuracy])
            .context("set_inaccuracy")?;
        Ok(())
    }

    fn get_all_links(&mut self) -> Result<Vec<Link>> {
        let mut stmt = self.tx.prepare("SELECT * FROM links")?;
        let rows = stmt.query_map([], link_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("get_all_links")
    }

    fn insert_link(&mut self, link: &Link) -> Result<()> {
        insert_or_replace_link(self.tx, link)
    }

    fn import_link_with_id(&mut self, link: &Link) -> Result<()> {
        insert_or_replace_link(self.tx, link)
    }

    fn delete_link(&mut self, id: Uuid) -> Result<()> {
        self.tx
            .execute("DELETE FROM links WHERE id = ?1", params![id.to_string()])
            .context("delete_link")?;
        Ok(())
    }

    fn outgoing(&mut self, id: Uuid) -> Result<Vec<Link>> {
        let mut stmt = self.tx.prepare("SELECT * FROM links WHERE source_id = ?1")?;
        let rows = stmt.query_map(params![id.to_string()], link_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("outgoing")
    }

    fn incoming(&mut self, id: Uuid, types: Option<&[LinkType]>) -> Result<Vec<Link>> {
        let mut stmt = self.tx.prepare("SELECT * FROM links WHERE target_id = ?1")?;
        let rows = stmt.query_map(params![id.to_string()], link_from_row)?;
        let all = rows.collect::<rusqlite::Result<Vec<_>>>().context("incoming")?;
        Ok(match types {
            None => all,
            Some(types) => all.into_iter().filter(|l| types.contains(&l.link_type)).collect(),
        })
    }

    fn read_lock(&mut self) -> Result<Option<LockRow>> {
        self.tx
            .query_row("SELECT holder_pid, acquired_at, expires_at FROM sync_lock WHERE id = 0", [], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .optional()
            .context("read_lock")?
            .map(|(holder_pid, acquired_at, expires_at)| {
                Ok(LockRow {
                    holder_pid: holder_pid as i32,
                    acquired_at: parse_timestamp(&acquired_at)?,
                    expires_at: parse_timestamp(&expires_at)?,
                })
            })
            .transpose()
    }

    fn write_lock(&mut self, row: &LockRow) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO sync_lock (id, holder_pid, acquired_at, expires_at) VALUES (0, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET holder_pid = excluded.holder_pid,
                     acquired_at = excluded.acquired_at, expires_at = excluded.expires_at",
                params![row.holder_pid as i64, row.acquired_at.to_rfc3339(), row.expires_at.to_rfc3339()],
            )
            .context("write_lock")?;
        Ok(())
    }

    fn delete_lock_if_held_by(&mut self, holder_pid: i32) -> Result<bool> {
        let changed = self
            .tx
            .execute("DELETE FROM sync_lock WHERE id = 0 AND holder_pid = ?1", params![holder_pid as i64])
            .context("delete_lock_if_held_by")?;
        Ok(changed > 0)
    }
}

fn insert_or_replace_entry(tx: &rusqlite::Transaction, entry: &Entry) -> Result<()> {
    tx.execute(
        "INSERT INTO entries (
            id, entry_type, title, content, tags, project, scope, source, status,
            created_at, version, synced_version, content_updated_at, updated_at,
            last_accessed_at, access_count, strength, inaccuracy, deprecation_reason,
            flag_reason, declaration, parent_page_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)
        ON CONFLICT(id) DO UPDATE SET
            entry_type = excluded.entry_type, title = excluded.title, content = excluded.content,
            tags = excluded.tags, project = excluded.project, scope = excluded.scope,
            source = excluded.source, status = excluded.status, created_at = excluded.created_at,
            version = excluded.version, synced_version = excluded.synced_version,
            content_updated_at = excluded.content_updated_at, updated_at = excluded.updated_at,
            last_accessed_at = excluded.last_accessed_at, access_count = excluded.access_count,
            strength = excluded.strength, inaccuracy = excluded.inaccuracy,
            deprecation_reason = excluded.deprecation_reason, flag_reason = excluded.flag_reason,
            declaration = excluded.declaration, parent_page_id = excluded.parent_page_id",
        params![
            entry.id.to_string(),
            entry.entry_type.dir_name(),
            entry.title,
            entry.content,
            serde_json::to_string(&entry.tags)?,
            entry.project,
            scope_to_text(entry.scope),
            entry.source,
            status_to_text(entry.status),
            entry.created_at,
            entry.version as i64,
            entry.synced_version.map(|v| v as i64),
            entry.content_updated_at,
            entry.updated_at,
            entry.last_accessed_at,
            entry.access_count as i64,
            entry.strength,
            entry.inaccuracy,
            entry.deprecation_reason,
            entry.flag_reason,
            entry.declaration,
            entry.parent_page_id.map(|id| id.to_string()),
        ],
    )
    .context("insert_or_replace_entry")?;
    Ok(())
}

fn insert_or_replace_link(tx: &rusqlite::Transaction, link: &Link) -> Result<()> {
    tx.execute(
        "INSERT INTO links (id, source_id, target_id, link_type, description, source, created_at, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            source_id = excluded.source_id, target_id = excluded.target_id, link_type = excluded.link_type,
            description = excluded.description, source = excluded.source, created_at = excluded.created_at,
            synced_at = excluded.synced_at",
        params![
            link.id.to_string(),
            link.source_id.to_string(),
            link.target_id.to_string(),
            link.link_type.wire_name(),
            link.description,
            link.source,
            link.created_at,
            link.synced_at,
        ],
    )
    .context("insert_or_replace_link")?;
    Ok(())
}
