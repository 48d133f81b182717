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

//! Small builders for the record types, so integration tests don't each
//! repeat every field of a minimal valid entry.

use kb_sync::record::{Entry, EntryType, Link, LinkType, Scope, Status};
use uuid::Uuid;

/// A minimal, valid `Entry`. Callers tweak the fields they care about; every
/// other field is a plausible default.
pub fn entry(title: &str) -> Entry {
    Entry {
        id: Uuid::new_v4(),
        entry_type: EntryType::Fact,
        title: title.to_string(),
        content: format!("Content for {title}"),
        tags: vec![],
        project: None,
        scope: Scope::Company,
        source: "test-agent".to_string(),
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

/// A link between two entries, with today's date and a local source.
pub fn link(source_id: Uuid, target_id: Uuid, link_type: LinkType) -> Link {
    Link {
        id: Uuid::new_v4(),
        source_id,
        target_id,
        link_type,
        description: None,
        source: "test-agent".to_string(),
        created_at: "2026-01-01T00:00:00Z".to_string(),
        synced_at: None,
    }
}
