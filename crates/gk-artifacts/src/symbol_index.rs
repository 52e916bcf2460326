// SPDX-License-Identifier: MIT OR Apache-2.0
//! `SymbolIndex` (§3.2): the per-file export/import table derived from a
//! [`crate::RepoSnapshot`], used to check least-privilege symbol scoping.

use crate::support::{is_sha256_hex, require};
use gk_core::{ArtifactMeta, RepoRelativePath};
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Exports/imports extracted from one source file's AST.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceFileSymbols {
    /// Repo-relative path of the file.
    pub path: String,
    /// Symbols this file exports.
    pub exports: Vec<String>,
    /// Symbols (or module paths) this file imports.
    pub imports: Vec<String>,
}

/// The per-file export/import table derived from a `RepoSnapshot` (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SymbolIndex {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Self-hash of the `RepoSnapshot` this index was derived from.
    #[serde(rename = "snapshotHash")]
    pub snapshot_hash: String,
    /// Per-file symbol tables.
    pub files: Vec<SourceFileSymbols>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(SymbolIndex);

impl SymbolIndex {
    /// Structural validation: universal fields, bound-hash shape, unique
    /// file paths, well-formed repo-relative paths.
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(
            is_sha256_hex(&self.snapshot_hash),
            "snapshotHash must be a SHA-256 hex digest",
        )?;

        let mut seen = HashSet::new();
        for file in &self.files {
            RepoRelativePath::from_str(file.path.clone())?;
            require(seen.insert(file.path.clone()), format!("duplicate path in symbol index: {}", file.path))?;
        }
        Ok(())
    }

    /// Returns every exported symbol across all indexed files.
    #[must_use]
    pub fn all_exports(&self) -> HashSet<&str> {
        self.files
            .iter()
            .flat_map(|f| f.exports.iter().map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_core::Actor;

    fn sample() -> SymbolIndex {
        let mut index = SymbolIndex {
            meta: ArtifactMeta::stamp(Actor::system("gk-kernel").unwrap()),
            snapshot_hash: "a".repeat(64),
            files: vec![SourceFileSymbols {
                path: "src/lib.rs".into(),
                exports: vec!["run".into()],
                imports: vec!["std::fs".into()],
            }],
            hash: String::new(),
        };
        index.stamp_hash().unwrap();
        index
    }

    #[test]
    fn valid_index_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn duplicate_path_is_rejected() {
        let mut index = sample();
        let dup = index.files[0].clone();
        index.files.push(dup);
        assert!(index.validate().is_err());
    }

    #[test]
    fn malformed_snapshot_hash_is_rejected() {
        let mut index = sample();
        index.snapshot_hash = "nope".into();
        assert!(index.validate().is_err());
    }

    #[test]
    fn all_exports_collects_across_files() {
        let index = sample();
        assert!(index.all_exports().contains("run"));
    }
}
