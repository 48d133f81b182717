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

//! Thin, synchronous wrapper over an external version-control program.
//! No interactive merge; every operation is a single command. A `Command`
//! is built fresh per call, locale is pinned so output is parseable, and
//! errors are a flat enum rather than bubbling up raw `io::Error`s.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

#[derive(Debug, thiserror::Error)]
pub enum GitSubprocessError {
    #[error("could not execute '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },
    #[error("git output was not valid UTF-8")]
    InvalidUtf8,
    #[error("'{0}' is not a version-control root")]
    NotAVcsRoot(PathBuf),
}

type Result<T> = std::result::Result<T, GitSubprocessError>;

#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub hash: String,
    pub date: String,
    pub message: String,
}

/// The operations the sync engine needs from a version-control tool.
/// Implemented here for `git`; a test double lives in `kb-testutils` for
/// unit tests that don't want to spawn a real subprocess.
pub trait VcsDriver: Send + Sync {
    fn init(&self, dir: &Path) -> Result<()>;
    fn clone(&self, url: &str, dir: &Path) -> Result<()>;
    fn is_vc_root(&self, dir: &Path) -> bool;
    /// Stages every change under `dir` and commits if the working tree
    /// differs from HEAD. Returns whether a commit was made.
    fn commit_all(&self, dir: &Path, message: &str) -> Result<bool>;
    fn pull(&self, dir: &Path) -> Result<()>;
    fn push(&self, dir: &Path) -> Result<()>;
    fn file_log(&self, dir: &Path, path: &Path, limit: usize) -> Result<Vec<CommitInfo>>;
    fn show_file(&self, dir: &Path, revision: &str, path: &Path) -> Result<Option<Vec<u8>>>;
}

/// Drives the `git` binary found on `$PATH`. Commits are attributed to a
/// local identity derived from `agent_name` so ephemeral clones (e.g. in
/// tests, or a freshly cloned peer repo) still produce attributable commits
/// even with no prior `user.name`/`user.email` configured.
pub struct GitCli {
    executable: PathBuf,
    agent_name: String,
}

impl GitCli {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            executable: PathBuf::from("git"),
            agent_name: agent_name.into(),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.current_dir(dir)
            // Disable locale-dependent output so stdout/stderr parse reliably.
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        let output = self
            .command(dir)
            .args(args)
            .output()
            .map_err(|source| GitSubprocessError::Spawn {
                program: self.executable.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(GitSubprocessError::NonZeroExit {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    fn run_text(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self.run(dir, args)?;
        String::from_utf8(output.stdout).map_err(|_| GitSubprocessError::InvalidUtf8)
    }

    fn ensure_identity(&self, dir: &Path) -> Result<()> {
        // Only set a local identity if none is configured yet, so we never
        // clobber a user's own config.
        if self.run(dir, &["config", "user.name"]).is_err() {
            self.run(dir, &["config", "user.name", &self.agent_name])?;
            let email = format!("{}@kb-sync.local", self.agent_name.replace(' ', "-"));
            self.run(dir, &["config", "user.email", &email])?;
        }
        Ok(())
    }
}

impl VcsDriver for GitCli {
    fn init(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|source| GitSubprocessError::Spawn {
            program: "mkdir".to_string(),
            source,
        })?;
        self.run(dir, &["init"])?;
        self.ensure_identity(dir)?;
        Ok(())
    }

    fn clone(&self, url: &str, dir: &Path) -> Result<()> {
        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent).map_err(|source| GitSubprocessError::Spawn {
                program: "mkdir".to_string(),
                source,
            })?;
        }
        let dir_str = dir.to_string_lossy().into_owned();
        self.run(Path::new("."), &["clone", url, &dir_str])?;
        self.ensure_identity(dir)?;
        Ok(())
    }

    fn is_vc_root(&self, dir: &Path) -> bool {
        dir.join(".git").exists()
    }

    fn commit_all(&self, dir: &Path, message: &str) -> Result<bool> {
        if !self.is_vc_root(dir) {
            return Err(GitSubprocessError::NotAVcsRoot(dir.to_path_buf()));
        }
        self.ensure_identity(dir)?;
        self.run(dir, &["add", "-A"])?;
        // `git diff --cached --quiet` exits 1 iff there is staged content to
        // commit; treat that (and only that) as "not clean".
        let status = self
            .command(dir)
            .args(["diff", "--cached", "--quiet"])
            .status()
            .map_err(|source| GitSubprocessError::Spawn {
                program: self.executable.display().to_string(),
                source,
            })?;
        if status.success() {
            return Ok(false);
        }
        self.run(dir, &["commit", "-m", message])?;
        Ok(true)
    }

    fn pull(&self, dir: &Path) -> Result<()> {
        self.run(dir, &["pull", "--no-rebase"])?;
        Ok(())
    }

    fn push(&self, dir: &Path) -> Result<()> {
        self.run(dir, &["push"])?;
        Ok(())
    }

    fn file_log(&self, dir: &Path, path: &Path, limit: usize) -> Result<Vec<CommitInfo>> {
        let limit_arg = format!("-{limit}");
        let path_str = path.to_string_lossy().into_owned();
        let out = self.run_text(
            dir,
            &[
                "log",
                &limit_arg,
                "--pretty=format:%H%x1f%cI%x1f%s%x1e",
                "--",
                &path_str,
            ],
        )?;
        Ok(out
            .split('\u{1e}')
            .filter(|record| !record.trim().is_empty())
            .filter_map(|record| {
                let mut fields = record.trim_start_matches('\n').splitn(3, '\u{1f}');
                let hash = fields.next()?.to_string();
                let date = fields.next()?.to_string();
                let message = fields.next().unwrap_or_default().to_string();
                Some(CommitInfo { hash, date, message })
            })
            .collect())
    }

    fn show_file(&self, dir: &Path, revision: &str, path: &Path) -> Result<Option<Vec<u8>>> {
        let path_str = path.to_string_lossy().into_owned();
        let spec = format!("{revision}:{path_str}");
        let output = self.command(dir).args(["show", &spec]).output().map_err(|source| {
            GitSubprocessError::Spawn {
                program: self.executable.display().to_string(),
                source,
            }
        })?;
        if !output.status.success() {
            // git show exits non-zero both for "path didn't exist at that
            // revision" and for actual errors; we can't tell them apart from
            // the exit code alone, so the absent case is the conservative
            // default for this method's `Option<Vec<u8>>` return type.
            return Ok(None);
        }
        Ok(Some(output.stdout))
    }
}
