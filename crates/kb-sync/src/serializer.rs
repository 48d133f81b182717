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

//! Bijective mapping between an [`Entry`] and its on-disk file: a YAML
//! front-matter block followed by a Markdown body.
//!
//! The two laws this module has to uphold:
//!
//! - **Round-trip**: `parse(serialize(e)) == e` for every field that is
//!   actually persisted (local-only fields like `strength` are not; see
//!   [`FrontMatter`]).
//! - **Stability**: `serialize(e)` is byte-identical across calls regardless
//!   of unset optional fields or trailing whitespace in `content`, so an
//!   unchanged record never produces a commit.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::{
    deserialize_tags, normalize_content, EmbeddedLink, Entry, EntryType, LinkType, MalformedRecord, Scope, Status,
};

const FRONT_MATTER_DELIM: &str = "---";
const FILE_EXTENSION: &str = "md";
const MAX_SLUG_LEN: usize = 60;
const REDIRECT_PREFIX: &str = "#!kb-redirect ";

/// The subset of an [`Entry`] that actually goes to disk. `updated_at` and
/// every local-only usage-state field (`synced_version`, `content_updated_at`,
/// `last_accessed_at`, `access_count`, `strength`) are intentionally absent:
/// the repo is authoritative for shared state, not usage state.
#[derive(Debug, Serialize, Deserialize)]
struct FrontMatter {
    id: Uuid,
    #[serde(rename = "type")]
    entry_type: EntryType,
    title: String,
    #[serde(default, deserialize_with = "deserialize_tags")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    #[serde(default)]
    scope: Scope,
    #[serde(default = "default_source")]
    source: String,
    #[serde(default)]
    status: Status,
    created_at: String,
    #[serde(default = "default_version")]
    version: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    inaccuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deprecation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flag_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    declaration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_page_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    links: Vec<EmbeddedLink>,
}

fn default_source() -> String {
    "unknown".to_string()
}

fn default_version() -> u64 {
    1
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// Serializes an entry to its on-disk file contents. `outgoing_links` must
/// already exclude conflict-provenance links; this function
/// filters defensively anyway so a caller's mistake can't leak one to disk.
pub fn serialize(entry: &Entry, outgoing_links: &[EmbeddedLink]) -> String {
    let front = FrontMatter {
        id: entry.id,
        entry_type: entry.entry_type,
        title: entry.title.clone(),
        tags: entry.tags.clone(),
        project: entry.project.clone(),
        scope: entry.scope,
        source: entry.source.clone(),
        status: entry.status,
        created_at: entry.created_at.clone(),
        version: entry.version,
        inaccuracy: entry.inaccuracy,
        deprecation_reason: entry.deprecation_reason.clone(),
        flag_reason: entry.flag_reason.clone(),
        declaration: entry.declaration.clone(),
        parent_page_id: entry.parent_page_id,
        links: outgoing_links
            .iter()
            .filter(|l| !matches!(l.link_type, LinkType::ConflictsWith))
            .cloned()
            .collect(),
    };

    // serde_yaml emits map keys in struct-field order, which is fixed at
    // compile time, so two calls with equal data always agree byte-for-byte.
    let yaml = serde_yaml::to_string(&front).expect("FrontMatter is always serializable");
    let body = normalize_content(&entry.content);

    let mut out = String::with_capacity(yaml.len() + body.len() + 16);
    out.push_str(FRONT_MATTER_DELIM);
    out.push('\n');
    out.push_str(&yaml);
    out.push_str(FRONT_MATTER_DELIM);
    out.push('\n');
    out.push_str(&body);
    out.push('\n');
    out
}

/// Parses a file's raw contents into an [`Entry`]. Fails with
/// [`MalformedRecord`] on anything that violates the validation
/// contract; callers (the repo FS layer during pull) treat this as non-fatal
/// and skip the file.
pub fn parse(raw: &str) -> Result<Entry, MalformedRecord> {
    let (front_raw, body) = split_front_matter(raw)?;
    let front: FrontMatter = serde_yaml::from_str(front_raw)?;

    let entry = Entry {
        id: front.id,
        entry_type: front.entry_type,
        title: front.title,
        content: normalize_content(body),
        tags: front.tags.into_iter().collect(),
        project: front.project,
        scope: front.scope,
        source: front.source,
        status: front.status,
        created_at: front.created_at,
        version: front.version,
        synced_version: None,
        content_updated_at: None,
        updated_at: None,
        last_accessed_at: None,
        access_count: 0,
        strength: 0.0,
        inaccuracy: front.inaccuracy,
        deprecation_reason: front.deprecation_reason,
        flag_reason: front.flag_reason,
        declaration: front.declaration,
        parent_page_id: front.parent_page_id,
        links: front.links,
    };

    if entry.title.is_empty() {
        return Err(MalformedRecord::EmptyTitle);
    }
    if entry.created_at.is_empty() {
        return Err(MalformedRecord::EmptyCreatedAt);
    }
    if let Some(parent) = entry.parent_page_id {
        if parent.get_version_num() != 4 {
            return Err(MalformedRecord::InvalidParentPageId(parent.to_string()));
        }
    }
    entry.validate()?;
    Ok(entry)
}

fn split_front_matter(raw: &str) -> Result<(&str, &str), MalformedRecord> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let rest = raw
        .strip_prefix(FRONT_MATTER_DELIM)
        .ok_or(MalformedRecord::MissingFrontMatter)?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest
        .find(&format!("\n{FRONT_MATTER_DELIM}\n"))
        .ok_or(MalformedRecord::MissingFrontMatter)?;
    let front = &rest[..end];
    let body = &rest[end + 1 + FRONT_MATTER_DELIM.len() + 1..];
    Ok((front, body))
}

/// Lowercases the title, collapses non-alphanumeric runs to single hyphens,
/// and truncates at 60 characters.
pub fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len().min(MAX_SLUG_LEN));
    let mut pending_hyphen = false;
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
        if out.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    out.truncate(MAX_SLUG_LEN);
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The first 8 hex characters of the entry's UUID, used to locate the record
/// when its slug changes.
pub fn id8(id: Uuid) -> String {
    let hex = id.simple().to_string();
    hex[..8].to_string()
}

/// `<slug>_<id8>.<ext>`, the canonical filename for an entry.
pub fn canonical_filename(title: &str, id: Uuid) -> String {
    let mut name = slug(title);
    write!(name, "_{}.{}", id8(id), FILE_EXTENSION).expect("String write cannot fail");
    name
}

/// Content of a redirect marker left at an entry's old path after a rename.
pub fn redirect_marker(new_filename: &str) -> String {
    format!("{REDIRECT_PREFIX}{new_filename}\n")
}

/// If `raw` is a redirect marker, returns the filename it points to.
pub fn parse_redirect(raw: &str) -> Option<&str> {
    raw.strip_prefix(REDIRECT_PREFIX)
        .map(|rest| rest.trim_end_matches('\n'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EntryType, Scope, Status};

    fn sample_entry() -> Entry {
        Entry {
            id: Uuid::new_v4(),
            entry_type: EntryType::Pattern,
            title: "Alice discovery".to_string(),
            content: "Found a useful pattern for error handling".to_string(),
            tags: vec!["errors".to_string()],
            project: None,
            scope: Scope::Company,
            source: "unknown".to_string(),
            status: Status::Active,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            version: 1,
            synced_version: None,
            content_updated_at: None,
            updated_at: None,
            last_accessed_at: None,
            access_count: 0,
            strength: 0.0,
            inaccuracy: 0.0,
            deprecation_reason: None,
            flag_reason: None,
            declaration: None,
            parent_page_id: None,
            links: vec![],
        }
    }

    #[test]
    fn round_trip_preserves_persisted_fields() {
        let entry = sample_entry();
        let file = serialize(&entry, &entry.links);
        let parsed = parse(&file).unwrap();
        assert_eq!(parsed.id, entry.id);
        assert_eq!(parsed.title, entry.title);
        assert_eq!(parsed.content, entry.content);
        assert_eq!(parsed.version, entry.version);
        assert_eq!(parsed.tags, entry.tags);
    }

    #[test]
    fn serialize_is_stable_across_whitespace_and_unset_optionals() {
        let mut a = sample_entry();
        let mut b = sample_entry();
        b.id = a.id;
        b.created_at = a.created_at.clone();
        a.content.push_str("\n\n   \n");
        assert_eq!(serialize(&a, &a.links), serialize(&b, &b.links));
    }

    #[test]
    fn optional_fields_are_omitted_when_unset() {
        let entry = sample_entry();
        let file = serialize(&entry, &entry.links);
        assert!(!file.contains("deprecation_reason"));
        assert!(!file.contains("parent_page_id"));
        assert!(!file.contains("inaccuracy"));
        assert!(!file.contains("links"));
    }

    #[test]
    fn updated_at_is_never_serialized() {
        let mut entry = sample_entry();
        entry.updated_at = Some("2026-02-02T00:00:00Z".to_string());
        let file = serialize(&entry, &entry.links);
        assert!(!file.contains("updated_at"));
    }

    #[test]
    fn slug_collapses_and_truncates() {
        assert_eq!(slug("Hello, World!!"), "hello-world");
        assert_eq!(slug("   leading and trailing   "), "leading-and-trailing");
        let long = "a".repeat(100);
        assert_eq!(slug(&long).len(), 60);
    }

    #[test]
    fn canonical_filename_shape() {
        let id = Uuid::new_v4();
        let name = canonical_filename("My Title", id);
        assert!(name.starts_with("my-title_"));
        assert!(name.ends_with(".md"));
    }

    #[test]
    fn non_string_tags_are_dropped_instead_of_rejecting_the_entry() {
        let raw = "---\nid: 6ba7b810-9dad-41d1-80b4-00c04fd430c8\ntype: fact\ntitle: Has odd tags\ntags: [errors, 123, true]\ncreated_at: \"2026-01-01T00:00:00Z\"\n---\nbody\n";
        let entry = parse(raw).unwrap();
        assert_eq!(entry.tags, vec!["errors".to_string()]);
    }

    #[test]
    fn redirect_marker_round_trip() {
        let marker = redirect_marker("new-name_abcd1234.md");
        assert_eq!(parse_redirect(&marker), Some("new-name_abcd1234.md"));
        assert_eq!(parse_redirect("not a redirect"), None);
    }
}
