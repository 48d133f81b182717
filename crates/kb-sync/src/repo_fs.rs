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

//! The repo FS layer: creates the on-disk directory
//! layout, writes/reads/deletes entry files at stable filenames, and
//! enumerates existing IDs. Never trusts a remote-supplied string as a path
//! component without validating it first (the UUID validator in
//! [`crate::record`] is the upstream guard against path traversal).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::record::{Entry, EntryType, MalformedRecord};
use crate::serializer;

const ENTRIES_DIR: &str = "entries";
const META_FILE: &str = "meta.json";
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum RepoFsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, RepoFsError>;

fn io_err(path: &Path, source: std::io::Error) -> RepoFsError {
    RepoFsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Creates missing directories and the schema marker idempotently.
pub fn ensure_structure(repo_root: &Path) -> Result<()> {
    for t in EntryType::ALL {
        let dir = repo_root.join(ENTRIES_DIR).join(t.dir_name());
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    let meta_path = repo_root.join(META_FILE);
    if !meta_path.exists() {
        let body = serde_json::json!({ "schema_version": SCHEMA_VERSION }).to_string();
        atomic_write(&meta_path, body.as_bytes())?;
    }
    Ok(())
}

fn type_dir(repo_root: &Path, t: EntryType) -> PathBuf {
    repo_root.join(ENTRIES_DIR).join(t.dir_name())
}

fn canonical_path(repo_root: &Path, entry: &Entry) -> PathBuf {
    type_dir(repo_root, entry.entry_type).join(serializer::canonical_filename(&entry.title, entry.id))
}

/// Writes the serialized entry at its canonical path, atomically (write to a
/// temp file in the same directory, then rename). If an existing file for
/// this id is found at a different path (slug or type changed since the
/// last write), that old file becomes a redirect marker pointing at the new
/// one.
pub fn write_entry(
    repo_root: &Path,
    entry: &Entry,
    outgoing_links: &[crate::record::EmbeddedLink],
) -> Result<PathBuf> {
    ensure_structure(repo_root)?;
    let new_path = canonical_path(repo_root, entry);
    let new_rel = new_path
        .strip_prefix(repo_root)
        .unwrap_or(&new_path)
        .to_string_lossy()
        .replace('\\', "/");

    if let Some(old_path) = find_existing_path(repo_root, entry.id) {
        if old_path != new_path {
            let body = serializer::serialize(entry, outgoing_links);
            atomic_write(&new_path, body.as_bytes())?;
            let marker = serializer::redirect_marker(&new_rel);
            atomic_write(&old_path, marker.as_bytes())?;
            return Ok(new_path);
        }
    }

    let body = serializer::serialize(entry, outgoing_links);
    atomic_write(&new_path, body.as_bytes())?;
    Ok(new_path)
}

/// Removes the file for `id` under `entry_type`, or scans every type
/// directory if the type is unknown.
pub fn delete_entry(repo_root: &Path, id: Uuid, entry_type: Option<EntryType>) -> Result<bool> {
    let path = match entry_type {
        Some(t) => find_in_dir(&type_dir(repo_root, t), id),
        None => find_existing_path(repo_root, id),
    };
    match path {
        Some(p) => {
            fs::remove_file(&p).map_err(|e| io_err(&p, e))?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Raw bytes of the file backing `id` under `entry_type`, following a
/// redirect marker if present. `None` if nothing exists for that id.
pub fn read_entry_raw(repo_root: &Path, entry_type: EntryType, id: Uuid) -> Result<Option<Vec<u8>>> {
    let dir = type_dir(repo_root, entry_type);
    let Some(path) = find_in_dir(&dir, id) else {
        return Ok(None);
    };
    read_following_redirects(repo_root, &path)
}

fn read_following_redirects(repo_root: &Path, path: &Path) -> Result<Option<Vec<u8>>> {
    let mut current = path.to_path_buf();
    for _ in 0..8 {
        let bytes = match fs::read(&current) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&current, e)),
        };
        let Ok(text) = std::str::from_utf8(&bytes) else {
            return Ok(Some(bytes));
        };
        match serializer::parse_redirect(text) {
            Some(target) => current = repo_root.join(target),
            None => return Ok(Some(bytes)),
        }
    }
    warn!(path = %path.display(), "redirect marker chain too long, giving up");
    Ok(None)
}

/// Every valid entry in the repo. Redirect markers are resolved to their
/// target (and not double-counted); malformed files are skipped with a
/// warning so the rest of the repo still imports.
pub fn read_all_entries(repo_root: &Path) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    for t in EntryType::ALL {
        let dir = type_dir(repo_root, t);
        if !dir.exists() {
            continue;
        }
        let read_dir = fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match read_following_redirects(repo_root, &path)? {
                None => continue,
                Some(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) if serializer::parse_redirect(text).is_some() => {
                        // A redirect target that is itself another redirect
                        // marker: `read_following_redirects` already chased
                        // the chain, so this branch means the final target
                        // doesn't exist on disk (a dangling redirect).
                        continue;
                    }
                    Ok(text) => match serializer::parse(text) {
                        Ok(parsed) => out.push(parsed),
                        Err(err) => {
                            warn!(path = %path.display(), error = %err, "skipping malformed entry file");
                        }
                    },
                    Err(_) => {
                        warn!(path = %path.display(), "skipping non-UTF-8 entry file");
                    }
                },
            }
        }
    }
    Ok(out)
}

/// Returns every id currently present in the repo.
pub fn all_ids(repo_root: &Path) -> Result<Vec<Uuid>> {
    Ok(read_all_entries(repo_root)?.into_iter().map(|e| e.id).collect())
}

fn find_existing_path(repo_root: &Path, id: Uuid) -> Option<PathBuf> {
    EntryType::ALL
        .into_iter()
        .find_map(|t| find_in_dir(&type_dir(repo_root, t), id))
}

fn find_in_dir(dir: &Path, id: Uuid) -> Option<PathBuf> {
    let suffix = format!("_{}.", serializer::id8(id));
    let read_dir = fs::read_dir(dir).ok()?;
    for entry in read_dir.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.contains(&suffix) {
            return Some(entry.path());
        }
    }
    None
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile_path(dir, path);
    loop {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
        {
            Ok(_) => break,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tmp = tempfile_path(dir, path);
            }
            Err(e) => return Err(io_err(&tmp, e)),
        }
    }
    fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

fn tempfile_path(dir: &Path, target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!(".{name}.{}.tmp", Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EntryType, Scope, Status};
    use tempfile::tempdir;

    fn sample(title: &str) -> Entry {
        Entry {
            id: Uuid::new_v4(),
            entry_type: EntryType::Fact,
            title: title.to_string(),
            content: "body".to_string(),
            tags: vec![],
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
    fn ensure_structure_creates_all_type_dirs_and_meta() {
        let dir = tempdir().unwrap();
        ensure_structure(dir.path()).unwrap();
        for t in EntryType::ALL {
            assert!(dir.path().join("entries").join(t.dir_name()).is_dir());
        }
        assert!(dir.path().join("meta.json").is_file());
    }

    #[test]
    fn write_then_read_all_round_trips() {
        let dir = tempdir().unwrap();
        let entry = sample("First Entry");
        write_entry(dir.path(), &entry, &[]).unwrap();
        let all = read_all_entries(dir.path()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, entry.id);
    }

    #[test]
    fn rename_leaves_a_redirect_marker() {
        let dir = tempdir().unwrap();
        let mut entry = sample("Old Title");
        let old_path = write_entry(dir.path(), &entry, &[]).unwrap();

        entry.title = "New Title".to_string();
        entry.version += 1;
        let new_path = write_entry(dir.path(), &entry, &[]).unwrap();

        assert_ne!(old_path, new_path);
        let marker = fs::read_to_string(&old_path).unwrap();
        assert!(serializer::parse_redirect(&marker).is_some());

        // Resolves via the marker.
        let raw = read_entry_raw(dir.path(), EntryType::Fact, entry.id).unwrap().unwrap();
        let parsed = serializer::parse(std::str::from_utf8(&raw).unwrap()).unwrap();
        assert_eq!(parsed.title, "New Title");

        // Only one live (non-redirect) entry.
        assert_eq!(read_all_entries(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn delete_entry_removes_file() {
        let dir = tempdir().unwrap();
        let entry = sample("Doomed");
        write_entry(dir.path(), &entry, &[]).unwrap();
        assert!(delete_entry(dir.path(), entry.id, None).unwrap());
        assert!(read_all_entries(dir.path()).unwrap().is_empty());
        assert!(!delete_entry(dir.path(), entry.id, None).unwrap());
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        ensure_structure(dir.path()).unwrap();
        let bad_path = dir.path().join("entries").join("fact").join("bad_deadbeef.md");
        fs::write(&bad_path, b"not a valid entry file").unwrap();

        let entry = sample("Good Entry");
        write_entry(dir.path(), &entry, &[]).unwrap();

        let all = read_all_entries(dir.path()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Good Entry");
    }
}
