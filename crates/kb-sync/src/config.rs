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

//! Sync configuration: the repo list file format, plus the single-repo CLI
//! shorthand.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::record::Scope;

/// One configured sync repo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub project: Option<String>,
}

impl RepoConfig {
    pub fn is_fallback(&self) -> bool {
        self.scope.is_none() && self.project.is_none()
    }
}

/// The on-disk `--sync-config` file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    pub repos: Vec<RepoConfig>,
}

impl SyncConfig {
    /// Parses a config file and validates its invariants: paths are
    /// absolute, names are unique, and at most one repo may be the
    /// filter-less fallback.
    pub fn from_json(raw: &str) -> Result<Self, SyncError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| SyncError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the one-element config equivalent to `--sync-repo <path>`: a
    /// one-element repos list with no filters.
    pub fn single_repo(path: impl Into<PathBuf>) -> Self {
        Self {
            repos: vec![RepoConfig {
                name: "default".to_string(),
                path: path.into(),
                remote: None,
                scope: None,
                project: None,
            }],
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.repos.is_empty() {
            return Err(SyncError::Configuration("no repos configured".to_string()));
        }
        let mut seen_names = std::collections::HashSet::new();
        let mut fallback_count = 0;
        for repo in &self.repos {
            if !seen_names.insert(&repo.name) {
                return Err(SyncError::Configuration(format!(
                    "duplicate repo name {:?}",
                    repo.name
                )));
            }
            if !repo.path.is_absolute() {
                return Err(SyncError::Configuration(format!(
                    "repo {:?} has a non-absolute path {:?}",
                    repo.name, repo.path
                )));
            }
            if repo.is_fallback() {
                fallback_count += 1;
            }
        }
        if fallback_count > 1 {
            return Err(SyncError::Configuration(
                "at most one repo may omit both scope and project filters".to_string(),
            ));
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.name == name)
    }
}

/// Reads and validates a `--sync-config` file. Cloning an absent repo with a
/// configured `remote` happens lazily in the coordinator's first `pull()`,
/// not here; this function only parses and checks the repo list's shape.
pub fn load_config_file(path: &Path) -> Result<SyncConfig, SyncError> {
    let raw = std::fs::read_to_string(path).map_err(|e| SyncError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    SyncConfig::from_json(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_two_fallback_repos() {
        let config = SyncConfig {
            repos: vec![
                RepoConfig {
                    name: "a".into(),
                    path: PathBuf::from("/a"),
                    remote: None,
                    scope: None,
                    project: None,
                },
                RepoConfig {
                    name: "b".into(),
                    path: PathBuf::from("/b"),
                    remote: None,
                    scope: None,
                    project: None,
                },
            ],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_relative_paths() {
        let config = SyncConfig {
            repos: vec![RepoConfig {
                name: "a".into(),
                path: PathBuf::from("relative/path"),
                remote: None,
                scope: None,
                project: None,
            }],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn single_repo_shorthand_has_no_filters() {
        let config = SyncConfig::single_repo("/abs/path");
        assert_eq!(config.repos.len(), 1);
        assert!(config.repos[0].is_fallback());
    }
}
