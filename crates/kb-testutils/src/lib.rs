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

//! Test fixtures shared across the workspace: an in-memory `Store`, a
//! throwaway git remote with multiple clones, and builders for minimal valid
//! records. Kept as its own crate (rather than `#[cfg(test)]` modules in
//! `kb-sync`) so `kb-cli` and `kb-store`'s integration tests can use the same
//! fixtures.

pub mod fixtures;
pub mod git_sandbox;
pub mod memory_store;
