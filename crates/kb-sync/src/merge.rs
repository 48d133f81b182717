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

//! Three-way conflict detection and resolution. The
//! detector is a pure function over two in-memory records; resolution
//! builds the conflict-copy record and its back-link but never writes
//! anything itself — the pull component applies what this module returns.

use chrono::Utc;
use uuid::Uuid;

use crate::record::{ContentFields, Entry, Link, LinkType, CONFLICT_SOURCE, CONFLICT_TITLE_PREFIX, INACCURACY_CAP};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    NoChange,
    LocalWins,
    RemoteWins,
    Conflict,
}

/// True iff the content-field tuple matches, ignoring `version` and all
/// timestamps.
pub fn content_equal(a: &Entry, b: &Entry) -> bool {
    a.content_fields() == b.content_fields()
}

fn content_fields_eq(a: ContentFields<'_>, b: ContentFields<'_>) -> bool {
    a == b
}

/// Classifies a local/remote pair against the version-counter baseline.
/// `local.synced_version = None` is treated as 0 (never synced).
pub fn detect(local: &Entry, remote: &Entry) -> ConflictAction {
    let baseline = local.synced_version.unwrap_or(0);
    let local_changed = local.version > baseline;
    let remote_changed = remote.version > baseline;

    match (local_changed, remote_changed) {
        (false, false) => ConflictAction::NoChange,
        (false, true) => ConflictAction::RemoteWins,
        (true, false) => ConflictAction::LocalWins,
        (true, true) => {
            if content_fields_eq(local.content_fields(), remote.content_fields()) {
                ConflictAction::NoChange
            } else {
                ConflictAction::Conflict
            }
        }
    }
}

/// The result of applying the conflict-resolution protocol: the
/// remote record becomes canonical (already mutated into `local` slot by the
/// caller), plus a brand-new conflict-copy record and the link from it back
/// to the canonical record.
pub struct ConflictResolution {
    pub conflict_copy: Entry,
    pub link: Link,
}

/// Builds the conflict copy and back-link for a detected conflict. `local`
/// is the pre-pull local state (whose body is preserved in the copy);
/// `remote` is what becomes canonical. Neither output is ever pushed or
/// embedded.
pub fn resolve_conflict(local: &Entry, remote: &Entry, now: chrono::DateTime<Utc>) -> ConflictResolution {
    let conflict_copy = Entry {
        id: Uuid::new_v4(),
        entry_type: local.entry_type,
        title: format!("{CONFLICT_TITLE_PREFIX}{}", remote.title),
        content: local.content.clone(),
        tags: local.tags.clone(),
        project: local.project.clone(),
        scope: local.scope,
        source: CONFLICT_SOURCE.to_string(),
        status: crate::record::Status::Active,
        created_at: now.to_rfc3339(),
        version: 1,
        synced_version: None,
        content_updated_at: Some(now.to_rfc3339()),
        updated_at: Some(now.to_rfc3339()),
        last_accessed_at: None,
        access_count: 0,
        strength: 0.0,
        inaccuracy: INACCURACY_CAP.max(1.0),
        deprecation_reason: None,
        flag_reason: None,
        declaration: None,
        parent_page_id: None,
        links: vec![],
    };

    let link = Link {
        id: Uuid::new_v4(),
        source_id: conflict_copy.id,
        target_id: remote.id,
        link_type: LinkType::ConflictsWith,
        description: Some(format!("diverged from {}", remote.title)),
        source: CONFLICT_SOURCE.to_string(),
        created_at: now.to_rfc3339(),
        synced_at: None,
    };

    ConflictResolution { conflict_copy, link }
}
