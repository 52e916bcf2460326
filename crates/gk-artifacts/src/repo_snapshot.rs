// SPDX-License-Identifier: MIT OR Apache-2.0
//! `RepoSnapshot` (§3.2): a content-addressed record of the repository
//! state a session was executed against.

use crate::support::{is_sha256_hex, require};
use gk_core::{ArtifactMeta, RepoRelativePath};
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// One file captured in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IncludedFile {
    /// Repo-relative path.
    pub path: String,
    /// SHA-256 hex digest of the file's content at snapshot time.
    #[serde(rename = "contentHash")]
    pub content_hash: String,
}

/// A content-addressed record of the repository state a session was
/// executed against (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RepoSnapshot {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// The session this snapshot belongs to.
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    /// The files captured, each with its content hash.
    #[serde(rename = "includedFiles")]
    pub included_files: Vec<IncludedFile>,
    /// Opaque descriptor of the repository root (e.g. a VCS revision or a
    /// directory label); not interpreted by the Kernel.
    #[serde(rename = "rootDescriptor")]
    pub root_descriptor: String,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(RepoSnapshot);

impl RepoSnapshot {
    /// Structural validation: universal fields, non-empty root descriptor,
    /// well-formed repo-relative paths, unique paths, valid content hashes.
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(!self.root_descriptor.trim().is_empty(), "rootDescriptor must not be empty")?;

        let mut seen = HashSet::new();
        for file in &self.included_files {
            RepoRelativePath::from_str(file.path.clone())?;
            require(seen.insert(file.path.clone()), format!("duplicate path in snapshot: {}", file.path))?;
            require(
                is_sha256_hex(&file.content_hash),
                format!("contentHash for '{}' must be a SHA-256 hex digest", file.path),
            )?;
        }
        Ok(())
    }

    /// Looks up a captured file's content hash by repo-relative path.
    #[must_use]
    pub fn content_hash_of(&self, path: &str) -> Option<&str> {
        self.included_files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.content_hash.as_str())
    }
}
