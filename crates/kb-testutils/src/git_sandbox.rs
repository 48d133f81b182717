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

//! A throwaway bare repo plus N clones, for integration tests that need
//! multiple agents sharing one remote without touching the network.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use kb_sync::vcs::{GitCli, VcsDriver};
use tempfile::TempDir;

/// Checks once whether `git` is on `$PATH`; tests that need a real clone
/// should skip (not fail) when it isn't, since CI sandboxes vary.
pub fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

/// Owns a bare "origin" repo and the [`TempDir`] it lives in. Clones made
/// from it (via [`clone_agent`]) borrow its path, so the sandbox must outlive
/// them.
pub struct GitSandbox {
    _root: TempDir,
    pub bare_path: PathBuf,
}

impl GitSandbox {
    /// Creates a fresh bare repo to act as the shared remote.
    pub fn new() -> anyhow::Result<Self> {
        let root = TempDir::new().context("create sandbox tempdir")?;
        let bare_path = root.path().join("origin.git");
        std::fs::create_dir_all(&bare_path)?;
        Command::new("git")
            .arg("init")
            .arg("--bare")
            .arg(&bare_path)
            .output()
            .context("git init --bare")?;
        Ok(Self { _root: root, bare_path })
    }

    /// Clones the shared remote into a fresh temp directory as `agent_name`,
    /// returning the clone's path, a ready [`GitCli`] scoped to that agent's
    /// identity, and the [`TempDir`] guard that must be kept alive.
    pub fn clone_agent(&self, agent_name: &str) -> anyhow::Result<AgentClone> {
        let root = TempDir::new().context("create clone tempdir")?;
        let dir = root.path().join("repo");
        let driver = GitCli::new(agent_name);
        driver
            .clone(&self.bare_path.to_string_lossy(), &dir)
            .context("clone from sandbox origin")?;
        Ok(AgentClone {
            _root: root,
            path: dir,
            driver,
        })
    }
}

pub struct AgentClone {
    _root: TempDir,
    pub path: PathBuf,
    pub driver: GitCli,
}

impl AgentClone {
    pub fn path(&self) -> &Path {
        &self.path
    }
}
