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

//! The record model: [`Entry`], [`Link`], and the closed vocabularies they're
//! built from. This module owns validation of untrusted (repo-authored)
//! input; everything downstream assumes a `Entry`/`Link` in memory is valid.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of entry types. New variants require a matching directory
/// convention in `repo_fs` (`entries/<type>/...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Fact,
    Decision,
    Convention,
    Pattern,
    Pitfall,
    DebugNote,
    Process,
    Wiki,
}

impl EntryType {
    pub const ALL: [Self; 8] = [
        Self::Fact,
        Self::Decision,
        Self::Convention,
        Self::Pattern,
        Self::Pitfall,
        Self::DebugNote,
        Self::Process,
        Self::Wiki,
    ];

    /// The directory name this type lives under, e.g. `entries/debug_note/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Decision => "decision",
            Self::Convention => "convention",
            Self::Pattern => "pattern",
            Self::Pitfall => "pitfall",
            Self::DebugNote => "debug_note",
            Self::Process => "process",
            Self::Wiki => "wiki",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.dir_name() == name)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Where an entry is homed: company-wide, project-wide, or repo-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Company,
    Project,
    Repo,
}

impl Default for Scope {
    fn default() -> Self {
        Self::Company
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Deprecated,
    NeedsRevalidation,
    Dormant,
}

impl Default for Status {
    fn default() -> Self {
        Self::Active
    }
}

/// Closed set of link types. `ConflictsWith` also accepts the legacy
/// `contradicts` spelling on read, but always serializes as `conflicts_with`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Related,
    Derived,
    Depends,
    Elaborates,
    Supersedes,
    #[serde(alias = "contradicts")]
    ConflictsWith,
}

impl LinkType {
    /// Weight used by inaccuracy propagation.
    pub fn propagation_weight(self) -> f64 {
        match self {
            Self::Derived => 1.0,
            Self::Depends => 0.6,
            Self::Elaborates => 0.4,
            Self::Supersedes => 1.0,
            Self::Related => 0.1,
            Self::ConflictsWith => 0.0,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Related => "related",
            Self::Derived => "derived",
            Self::Depends => "depends",
            Self::Elaborates => "elaborates",
            Self::Supersedes => "supersedes",
            Self::ConflictsWith => "conflicts_with",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Source marker stamped on conflict-provenance state (conflict copy entries
/// and the link connecting them to the canonical record). Never pushed, never
/// embedded.
pub const CONFLICT_SOURCE: &str = "sync:conflict";

/// Inaccuracy is clamped to this value everywhere it is written.
pub const INACCURACY_CAP: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub title: String,
    pub content: String,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub status: Status,
    pub created_at: String,
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default)]
    pub synced_version: Option<u64>,
    #[serde(default)]
    pub content_updated_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub last_accessed_at: Option<String>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub strength: f64,
    #[serde(default)]
    pub inaccuracy: f64,
    #[serde(default)]
    pub deprecation_reason: Option<String>,
    #[serde(default)]
    pub flag_reason: Option<String>,
    #[serde(default)]
    pub declaration: Option<String>,
    #[serde(default)]
    pub parent_page_id: Option<Uuid>,
    /// Outgoing links, embedded at serialize time and re-derived at parse
    /// time; never the source of truth once in the store (the store's
    /// `links` table is).
    #[serde(default)]
    pub links: Vec<EmbeddedLink>,
}

fn default_source() -> String {
    "unknown".to_string()
}

fn default_version() -> u64 {
    1
}

/// Deserializes `tags`, dropping any element that isn't a string instead of
/// failing the whole record. Lets a peer on a newer version write tag shapes
/// this version doesn't understand without locking it out of the entry.
pub(crate) fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(raw.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

/// A link as embedded inside its source entry's metadata block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedLink {
    pub target: Uuid,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A link row as held by the store: full identity plus provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub link_type: LinkType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: String,
    pub created_at: String,
    #[serde(default)]
    pub synced_at: Option<String>,
}

impl Link {
    /// Conflict-provenance links are never embedded and never pushed.
    pub fn is_conflict_provenance(&self) -> bool {
        self.source == CONFLICT_SOURCE || matches!(self.link_type, LinkType::ConflictsWith)
    }
}

/// A stable id for the `(source_id, target_id, link_type)` triple, so two
/// peers deriving the same link from their own embedded-link lists import it
/// under the same id. Built from `blake2b512` over the triple's bytes, truncated to 128 bits
/// with the version/variant nibbles fixed up so the result is always a
/// well-formed UUID.
pub fn deterministic_link_id(source_id: Uuid, target_id: Uuid, link_type: LinkType) -> Uuid {
    use blake2::{Blake2b512, Digest};

    let mut hasher = Blake2b512::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(target_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(link_type.wire_name().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

/// Raised when a repo-authored file fails validation; non-fatal to a pull
/// pass (the file is skipped).
#[derive(Debug, thiserror::Error)]
pub enum MalformedRecord {
    #[error("id {0:?} is not a valid UUIDv4")]
    InvalidId(String),
    #[error("title is empty")]
    EmptyTitle,
    #[error("created_at is empty or missing")]
    EmptyCreatedAt,
    #[error("version must be a positive integer, got {0}")]
    InvalidVersion(i64),
    #[error("parent_page_id {0:?} is not a valid UUID")]
    InvalidParentPageId(String),
    #[error("could not parse front matter: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("entry file has no front-matter block")]
    MissingFrontMatter,
}

/// Title begins with this marker iff it is a conflict copy; conflict copies
/// are excluded from push and must never appear in a repo directory.
pub const CONFLICT_TITLE_PREFIX: &str = "[Sync Conflict] ";

impl Entry {
    pub fn is_conflict_copy(&self) -> bool {
        self.title.starts_with(CONFLICT_TITLE_PREFIX)
    }

    /// Validates an entry that has just been parsed from an untrusted file.
    /// Defaulting of missing optional fields already happened during serde
    /// deserialization (`#[serde(default = ...)]`); this only checks the
    /// invariants serde can't express.
    pub fn validate(&self) -> Result<(), MalformedRecord> {
        if !is_uuid_v4(&self.id) {
            return Err(MalformedRecord::InvalidId(self.id.to_string()));
        }
        if self.title.is_empty() {
            return Err(MalformedRecord::EmptyTitle);
        }
        if self.created_at.is_empty() {
            return Err(MalformedRecord::EmptyCreatedAt);
        }
        if self.version == 0 {
            return Err(MalformedRecord::InvalidVersion(0));
        }
        Ok(())
    }

    /// The content-field tuple compared by the conflict detector's
    /// `content_equal` check. Version numbers and timestamps are
    /// deliberately excluded.
    pub fn content_fields(&self) -> ContentFields<'_> {
        ContentFields {
            entry_type: self.entry_type,
            title: &self.title,
            normalized_content: normalize_content(&self.content),
            tags: &self.tags,
            project: self.project.as_deref(),
            scope: self.scope,
            source: &self.source,
            status: self.status,
            parent_page_id: self.parent_page_id,
            deprecation_reason: self.deprecation_reason.as_deref(),
            declaration: self.declaration.as_deref(),
            flag_reason: self.flag_reason.as_deref(),
        }
    }
}

/// Strips trailing whitespace and collapses trailing newline runs.
pub fn normalize_content(content: &str) -> String {
    content.trim_end_matches(|c: char| c.is_whitespace()).to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentFields<'a> {
    pub entry_type: EntryType,
    pub title: &'a str,
    pub normalized_content: String,
    pub tags: &'a [String],
    pub project: Option<&'a str>,
    pub scope: Scope,
    pub source: &'a str,
    pub status: Status,
    pub parent_page_id: Option<Uuid>,
    pub deprecation_reason: Option<&'a str>,
    pub declaration: Option<&'a str>,
    pub flag_reason: Option<&'a str>,
}

fn is_uuid_v4(id: &Uuid) -> bool {
    id.get_version_num() == 4
}
