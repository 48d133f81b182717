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

//! The sync engine for a distributed, version-controlled knowledge store:
//! record model and serialization, repo routing, the on-disk repo layout, a
//! version-control driver, three-way conflict detection, write-through, and
//! the coordinator that ties pull/push/lock/scheduling together.
//!
//! Storage is abstracted behind [`store::Store`]/[`store::Tx`] so this crate
//! never depends on a concrete database; `kb-store` supplies one.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod inaccuracy;
pub mod lock;
pub mod merge;
pub mod record;
pub mod repo_fs;
pub mod routing;
pub mod serializer;
pub mod store;
pub mod vcs;
pub mod write_through;
