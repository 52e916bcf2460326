// SPDX-License-Identifier: MIT OR Apache-2.0
//! `PatchApplyReport` (§3.2): the result of the patch apply prover (C11)
//! running a `PatchArtifact` against a `RepoSnapshot`.

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single conflict encountered while applying a patch. Conflicts are
/// enumerated, not fatal (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PatchConflict {
    /// Repo-relative path the conflict occurred in.
    pub path: String,
    /// 1-based line number the conflict occurred at.
    pub line: u32,
    /// Human-readable description of the mismatch.
    pub reason: String,
}

/// The result of applying a `PatchArtifact` against a `RepoSnapshot` (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PatchApplyReport {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Self-hash of the `PatchArtifact` this report was produced for.
    #[serde(rename = "patchHash")]
    pub patch_hash: String,
    /// Self-hash of the `RepoSnapshot` the patch was applied against.
    #[serde(rename = "snapshotHash")]
    pub snapshot_hash: String,
    /// Whether every file change applied cleanly.
    pub applied: bool,
    /// Repo-relative paths touched by a clean apply.
    #[serde(rename = "touchedFiles")]
    pub touched_files: Vec<String>,
    /// Every conflict encountered, sorted by path then line (§4.11).
    pub conflicts: Vec<PatchConflict>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(PatchApplyReport);

impl PatchApplyReport {
    /// Structural validation: universal fields, bound-hash shapes, and
    /// the `applied == conflicts.is_empty()` consistency invariant
    /// (a clean apply cannot coexist with reported conflicts, and vice
    /// versa).
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(is_sha256_hex(&self.patch_hash), "patchHash must be a SHA-256 hex digest")?;
        require(
            is_sha256_hex(&self.snapshot_hash),
            "snapshotHash must be a SHA-256 hex digest",
        )?;
        require(
            self.applied == self.conflicts.is_empty(),
            "applied must be true iff conflicts is empty",
        )?;
        let mut sorted = self.conflicts.clone();
        sorted.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        require(
            sorted
                .iter()
                .zip(self.conflicts.iter())
                .all(|(a, b)| a.path == b.path && a.line == b.line),
            "conflicts must be sorted by path then line",
        )?;
        Ok(())
    }
}
