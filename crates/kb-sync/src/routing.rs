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

//! `choose_repo`: the single pure function that decides which configured
//! repo owns a record, given its scope and project tag.

use crate::config::RepoConfig;
use crate::record::Scope;

/// First-match-wins routing over the configured repos. Used identically by
/// write-through (to place a file) and by push/pull (to know which files
/// belong to which repo).
pub fn choose_repo<'a>(
    scope: Scope,
    project: Option<&str>,
    repos: &'a [RepoConfig],
) -> Option<&'a RepoConfig> {
    // Rule 1: scope and project both match.
    if let Some(r) = repos.iter().find(|r| {
        r.scope == Some(scope) && project.is_some() && r.project.as_deref() == project
    }) {
        return Some(r);
    }
    // Rule 2: project matches, scope unconstrained.
    if let Some(r) = repos
        .iter()
        .find(|r| r.scope.is_none() && project.is_some() && r.project.as_deref() == project)
    {
        return Some(r);
    }
    // Rule 3: scope matches, project unconstrained.
    if let Some(r) = repos
        .iter()
        .find(|r| r.project.is_none() && r.scope == Some(scope))
    {
        return Some(r);
    }
    // Rule 4: the fallback repo (no filters at all).
    if let Some(r) = repos.iter().find(|r| r.scope.is_none() && r.project.is_none()) {
        return Some(r);
    }
    // Rule 5: otherwise, the first configured repo.
    repos.first()
}
