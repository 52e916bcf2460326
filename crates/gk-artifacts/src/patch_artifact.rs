// SPDX-License-Identifier: MIT OR Apache-2.0
//! `PatchArtifact` (§3.2): the declared file changes for a step, consumed
//! by the patch apply prover (C11) and the reviewer pipeline (C9).

use crate::support::require;
use gk_core::{ArtifactMeta, RepoRelativePath};
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The kind of change a [`FileChange`] makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// The file must not already exist.
    Create,
    /// The file must already exist; hunks apply against its current content.
    Modify,
    /// The file must be removed (disabled unless `allowDeletes=true` at
    /// apply time, §4.11).
    Delete,
}

/// One file's declared change.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileChange {
    /// Repo-relative path of the changed file.
    pub path: String,
    /// Whether the file is created, modified, or deleted.
    #[serde(rename = "changeType")]
    pub change_type: ChangeType,
    /// Unified diff text for this file (ignored for `delete`).
    #[serde(default)]
    pub diff: String,
}

/// The declared file changes for a step (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PatchArtifact {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Identity of the `StepPacket` this patch was produced for.
    #[serde(rename = "stepId")]
    pub step_id: String,
    /// Identity of the session.
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    /// The per-file changes.
    #[serde(rename = "filesChanged")]
    pub files_changed: Vec<FileChange>,
    /// Module names this patch declares it imports from, checked by the
    /// reviewer pipeline's "no undeclared imports" rule (§4.9).
    #[serde(rename = "declaredImports", default, skip_serializing_if = "Vec::is_empty")]
    pub declared_imports: Vec<String>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(PatchArtifact);

impl PatchArtifact {
    /// Structural validation: universal fields, non-empty `filesChanged`,
    /// well-formed repo-relative paths, non-empty diff for
    /// create/modify, and the `create ∩ modify ∩ delete = ∅` invariant —
    /// no path may appear under more than one change type (§4.5(b)).
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(!self.step_id.is_empty(), "stepId must not be empty")?;
        require(!self.files_changed.is_empty(), "filesChanged must not be empty")?;

        let mut seen: HashMap<String, ChangeType> = HashMap::new();
        for change in &self.files_changed {
            RepoRelativePath::from_str(change.path.clone())?;
            if let Some(prior) = seen.insert(change.path.clone(), change.change_type) {
                require(
                    prior == change.change_type,
                    format!(
                        "path '{}' appears under more than one changeType",
                        change.path
                    ),
                )?;
            }
            if matches!(change.change_type, ChangeType::Create | ChangeType::Modify) {
                require(
                    !change.diff.trim().is_empty(),
                    format!("diff must not be empty for '{}'", change.path),
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_core::Actor;

    fn sample() -> PatchArtifact {
        let mut patch = PatchArtifact {
            meta: ArtifactMeta::stamp(Actor::system("gk-kernel").unwrap()),
            step_id: "s1".into(),
            session_id: Uuid::new_v4(),
            files_changed: vec![FileChange {
                path: "src/lib.rs".into(),
                change_type: ChangeType::Modify,
                diff: "@@ -1,1 +1,1 @@\n-old\n+new\n".into(),
            }],
            declared_imports: vec![],
            hash: String::new(),
        };
        patch.stamp_hash().unwrap();
        patch
    }

    #[test]
    fn valid_patch_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn empty_diff_on_modify_is_rejected() {
        let mut patch = sample();
        patch.files_changed[0].diff = "".into();
        assert!(patch.validate().is_err());
    }

    #[test]
    fn conflicting_change_type_for_same_path_is_rejected() {
        let mut patch = sample();
        patch.files_changed.push(FileChange {
            path: "src/lib.rs".into(),
            change_type: ChangeType::Delete,
            diff: String::new(),
        });
        assert!(patch.validate().is_err());
    }

    #[test]
    fn traversal_path_is_rejected() {
        let mut patch = sample();
        patch.files_changed[0].path = "../secrets".into();
        assert!(patch.validate().is_err());
    }
}
