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

//! The `kb` binary: wires CLI flags to `kb-sync`/`kb-store` and dispatches the
//! tool verbs exposed to peer agents and UIs. Consumer-only — full tool
//! semantics (query ranking, wiki rendering, embeddings) live elsewhere or
//! are out of scope; this binary only shapes the surface.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use kb_store::SqliteStore;
use kb_sync::config::SyncConfig;
use kb_sync::coordinator::SyncCoordinator;
use kb_sync::vcs::GitCli;
use tracing_subscriber::EnvFilter;

use commands::ToolCommand;

#[derive(Parser, Debug)]
#[command(name = "kb", about = "Distributed knowledge store: sync engine CLI")]
struct Cli {
    /// Location of the local SQLite store.
    #[arg(long)]
    db_path: PathBuf,

    /// Single-repo shorthand: equivalent to a one-element sync config with no
    /// scope/project filters.
    #[arg(long, conflicts_with = "sync_config")]
    sync_repo: Option<PathBuf>,

    /// Multi-repo sync configuration file (JSON).
    #[arg(long, conflicts_with = "sync_repo")]
    sync_config: Option<PathBuf>,

    /// Periodic sync interval in seconds. 0 disables periodic sync. Only
    /// meaningful when no tool verb is given (the process then runs as a
    /// standing sync loop instead of a one-shot command).
    #[arg(long, default_value_t = 0)]
    sync_interval: u64,

    /// Local agent identity attributed to commits made by this process.
    #[arg(long, default_value = "kb-cli")]
    agent_name: String,

    #[command(subcommand)]
    command: Option<ToolCommand>,
}

fn load_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    match (&cli.sync_repo, &cli.sync_config) {
        (Some(_), Some(_)) => unreachable!("clap enforces mutual exclusion"),
        (Some(path), None) => Ok(SyncConfig::single_repo(path.clone())),
        (None, Some(path)) => Ok(kb_sync::config::load_config_file(path)?),
        (None, None) => Ok(SyncConfig::default()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let store = match SqliteStore::open(&cli.db_path) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, "failed to open store");
            return ExitCode::FAILURE;
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "sync configuration error");
            return ExitCode::FAILURE;
        }
    };
    if !config.repos.is_empty() {
        if let Err(err) = config.validate() {
            tracing::error!(error = %err, "sync configuration error");
            return ExitCode::FAILURE;
        }
    }

    let vcs = GitCli::new(cli.agent_name.clone());
    let coordinator = SyncCoordinator::new(store, vcs, config.clone());

    match cli.command {
        Some(command) => match commands::dispatch(&coordinator, command) {
            Ok(value) => {
                println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
        None => {
            if cli.sync_interval == 0 {
                tracing::info!("no tool verb given and periodic sync is disabled; nothing to do");
                return ExitCode::SUCCESS;
            }
            let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(err) => {
                    tracing::error!(error = %err, "failed to start async runtime");
                    return ExitCode::FAILURE;
                }
            };
            runtime.block_on(coordinator.run_periodic(Duration::from_secs(cli.sync_interval)));
            ExitCode::SUCCESS
        }
    }
}
