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

//! End-to-end scenarios driving several agent sandboxes against one shared
//! bare repo, exercising the full pull/push/propagate path rather than any
//! single module in isolation.

use std::time::Duration;

use kb_sync::config::SyncConfig;
use kb_sync::coordinator::{Direction, SyncCoordinator, SyncOutcome};
use kb_sync::record::{EntryType, LinkType};
use kb_sync::store::{Store, Tx};
use kb_sync::vcs::GitCli;
use kb_testutils::fixtures;
use kb_testutils::git_sandbox::{git_available, GitSandbox};
use kb_testutils::memory_store::MemoryStore;

fn coordinator_for(agent: &str, clone_path: &std::path::Path) -> SyncCoordinator<MemoryStore, GitCli> {
    let config = SyncConfig::single_repo(clone_path.to_path_buf());
    SyncCoordinator::new(MemoryStore::new(), GitCli::new(agent), config)
}

#[test]
fn three_agents_converge_on_one_entry_and_its_link() {
    if !git_available() {
        return;
    }
    let sandbox = GitSandbox::new().unwrap();
    let a_clone = sandbox.clone_agent("agent-a").unwrap();
    let b_clone = sandbox.clone_agent("agent-b").unwrap();
    let c_clone = sandbox.clone_agent("agent-c").unwrap();

    let a = coordinator_for("agent-a", a_clone.path());
    let source = fixtures::entry("Root cause");
    let mut target = fixtures::entry("Observed symptom");
    target.entry_type = EntryType::Fact;
    a.store()
        .transaction(|tx| {
            tx.insert_entry(&source)?;
            tx.insert_entry(&target)?;
            let link = fixtures::link(source.id, target.id, LinkType::Derived);
            tx.insert_link(&link)
        })
        .unwrap();
    assert!(a.push().unwrap().pushed);

    let b = coordinator_for("agent-b", b_clone.path());
    let pull_b = b.pull().unwrap();
    assert_eq!(pull_b.new_entries, 2);
    assert_eq!(pull_b.new_links, 1);

    let c = coordinator_for("agent-c", c_clone.path());
    let pull_c = c.pull().unwrap();
    assert_eq!(pull_c.new_entries, 2);

    let b_incoming = b
        .store()
        .transaction(|tx| tx.incoming(target.id, Some(&[LinkType::Derived])))
        .unwrap();
    assert_eq!(b_incoming.len(), 1);
    assert_eq!(b_incoming[0].source_id, source.id);

    let c_incoming = c
        .store()
        .transaction(|tx| tx.incoming(target.id, Some(&[LinkType::Derived])))
        .unwrap();
    assert_eq!(c_incoming.len(), 1);
}

#[test]
fn content_change_propagates_inaccuracy_to_a_linked_entry() {
    if !git_available() {
        return;
    }
    let sandbox = GitSandbox::new().unwrap();
    let a_clone = sandbox.clone_agent("agent-a").unwrap();
    let b_clone = sandbox.clone_agent("agent-b").unwrap();

    let a = coordinator_for("agent-a", a_clone.path());
    let source = fixtures::entry("Upstream fact");
    let target = fixtures::entry("Downstream consumer");
    a.store()
        .transaction(|tx| {
            tx.insert_entry(&source)?;
            tx.insert_entry(&target)?;
            // `target` depends on `source`: the link's source is the
            // dependent, its target is the upstream record, matching the
            // direction `inaccuracy::propagate` walks incoming edges in.
            let link = fixtures::link(target.id, source.id, LinkType::Depends);
            tx.insert_link(&link)
        })
        .unwrap();
    a.push().unwrap();

    let b = coordinator_for("agent-b", b_clone.path());
    b.pull().unwrap();
    assert_eq!(
        b.store().transaction(|tx| tx.get_entry(target.id)).unwrap().unwrap().inaccuracy,
        0.0
    );

    let mut changed = a.store().transaction(|tx| tx.get_entry(source.id)).unwrap().unwrap();
    changed.content = "Completely different content now".to_string();
    changed.version += 1;
    a.store().transaction(|tx| tx.update_entry_content_fields(&changed)).unwrap();
    a.push().unwrap();

    b.pull().unwrap();
    let downstream = b.store().transaction(|tx| tx.get_entry(target.id)).unwrap().unwrap();
    assert!(downstream.inaccuracy > 0.0, "linked entry should pick up nonzero inaccuracy");
}

#[tokio::test]
async fn periodic_sync_runs_at_least_once_before_the_interval_elapses_again() {
    if !git_available() {
        return;
    }
    let sandbox = GitSandbox::new().unwrap();
    let a_clone = sandbox.clone_agent("agent-a").unwrap();
    let b_clone = sandbox.clone_agent("agent-b").unwrap();

    let a = coordinator_for("agent-a", a_clone.path());
    let entry = fixtures::entry("Seeded before the loop starts");
    a.store().transaction(|tx| tx.insert_entry(&entry)).unwrap();
    a.push().unwrap();

    let b_store = MemoryStore::new();
    let b_config = SyncConfig::single_repo(b_clone.path().to_path_buf());
    let b = SyncCoordinator::new(b_store, GitCli::new("agent-b"), b_config);

    // `run_periodic` never returns on its own; cut it short after it has had
    // time for several ticks at the configured interval.
    let _ = tokio::time::timeout(Duration::from_millis(300), b.run_periodic(Duration::from_millis(50))).await;

    let imported = b.store().transaction(|tx| tx.get_entry(entry.id)).unwrap();
    assert!(imported.is_some(), "periodic loop should have pulled the seeded entry by now");
}

#[test]
fn contended_lock_blocks_a_coordinator_held_by_a_live_foreign_process() {
    // A real, currently-alive process distinct from this test's own pid, so
    // the dead-holder takeover path in `lock::can_take` doesn't mask the
    // contention case.
    let mut holder = std::process::Command::new("sleep").arg("5").spawn().unwrap();

    let store = MemoryStore::new();
    let now = chrono::Utc::now();
    store
        .transaction(|tx| {
            tx.write_lock(&kb_sync::store::LockRow {
                holder_pid: holder.id() as i32,
                acquired_at: now,
                expires_at: now + kb_sync::lock::LOCK_TTL,
            })
        })
        .unwrap();

    let config = SyncConfig::single_repo(std::env::temp_dir().join("kb-sync-it-contended"));
    let coordinator = SyncCoordinator::new(store, GitCli::new("agent-a"), config);
    let outcome = coordinator.sync(Direction::Pull).unwrap();

    holder.kill().ok();
    holder.wait().ok();

    assert!(matches!(outcome, SyncOutcome::Contended { .. }));
}
