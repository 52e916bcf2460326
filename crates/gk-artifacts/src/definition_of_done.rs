// SPDX-License-Identifier: MIT OR Apache-2.0
//! `DefinitionOfDone` (§3.2): the root artifact of a session, enumerating
//! re-verifiable completion items.

use crate::support::{is_bounded_nonempty, require};
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// How a [`DodItem`] is re-verified. Internally tagged on
/// `verificationMethod`; the fields present alongside the tag vary per
/// variant (§3.2 "conditional fields per method").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "verificationMethod", rename_all = "snake_case")]
pub enum VerificationMethod {
    /// Re-run a command and check its exit code.
    CommandExitCode {
        /// Shell-free command description (never executed by the kernel).
        #[serde(rename = "verificationCommand")]
        verification_command: String,
        /// Exit code that constitutes success.
        #[serde(rename = "expectedExitCode")]
        expected_exit_code: i32,
    },
    /// Check that a file exists at a repo-relative path.
    FileExists {
        /// Repo-relative path that must exist.
        #[serde(rename = "targetPath")]
        target_path: String,
    },
    /// Check that a file's content hash matches exactly.
    FileHashMatch {
        /// Repo-relative path whose content is hashed.
        #[serde(rename = "targetPath")]
        target_path: String,
        /// Expected SHA-256 hex digest.
        #[serde(rename = "expectedHash")]
        expected_hash: String,
    },
    /// Re-run a command and check its output against a pattern.
    CommandOutputMatch {
        /// Shell-free command description (never executed by the kernel).
        #[serde(rename = "verificationCommand")]
        verification_command: String,
        /// Pattern the command's output must satisfy.
        #[serde(rename = "expectedOutputPattern")]
        expected_output_pattern: String,
    },
    /// Check that a particular artifact type was recorded for the session.
    ArtifactRecorded {
        /// The artifact type name expected to be present.
        #[serde(rename = "artifactType")]
        artifact_type: String,
    },
    /// A free-text procedure a human attests to having followed.
    Custom {
        /// Description of the manual verification procedure; must be at
        /// least 20 characters (§4.7: "custom requires verificationProcedure
        /// ≥ 20 chars").
        #[serde(rename = "verificationProcedure")]
        verification_procedure: String,
    },
}

impl VerificationMethod {
    /// Structural validation specific to this verification method (§4.5,
    /// §4.7 "re-verifiable" requirement).
    pub fn validate(&self) -> Result<(), KernelError> {
        match self {
            Self::CommandExitCode {
                verification_command,
                ..
            } => require(
                !verification_command.trim().is_empty(),
                "verificationCommand must not be empty for command_exit_code",
            ),
            Self::FileExists { target_path } => {
                require(!target_path.is_empty(), "targetPath must not be empty")
            }
            Self::FileHashMatch {
                target_path,
                expected_hash,
            } => {
                require(!target_path.is_empty(), "targetPath must not be empty")?;
                require(
                    crate::support::is_sha256_hex(expected_hash),
                    "expectedHash must be a 64-char lowercase SHA-256 hex digest",
                )
            }
            Self::CommandOutputMatch {
                verification_command,
                expected_output_pattern,
            } => {
                require(
                    !verification_command.trim().is_empty(),
                    "verificationCommand must not be empty for command_output_match",
                )?;
                require(
                    !expected_output_pattern.is_empty(),
                    "expectedOutputPattern must not be empty",
                )
            }
            Self::ArtifactRecorded { artifact_type } => require(
                !artifact_type.is_empty(),
                "artifactType must not be empty for artifact_recorded",
            ),
            Self::Custom {
                verification_procedure,
            } => require(
                verification_procedure.chars().count() >= 20,
                "verificationProcedure must be at least 20 characters for custom",
            ),
        }
    }
}

/// A single, re-verifiable completion criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DodItem {
    /// Stable identifier, referenced by `ExecutionPlan.steps[].references[]`.
    pub id: String,
    /// Human-readable description of the completion criterion.
    pub description: String,
    /// How this item is re-verified.
    #[serde(flatten)]
    pub method: VerificationMethod,
    /// Conditions under which this item is considered NOT done, used by
    /// reviewers and the gate to surface a concrete failure reason.
    #[serde(default, rename = "notDoneConditions", skip_serializing_if = "Vec::is_empty")]
    pub not_done_conditions: Vec<String>,
}

impl DodItem {
    /// Validates the item's own fields (id/description non-empty, the
    /// method-specific constraints of [`VerificationMethod::validate`]).
    pub fn validate(&self) -> Result<(), KernelError> {
        require(!self.id.is_empty(), "DoD item id must not be empty")?;
        require(
            is_bounded_nonempty(&self.description, 5_000),
            "DoD item description must be 1..5000 bytes",
        )?;
        self.method.validate()
    }
}

/// The root artifact of a session: a title and a set of re-verifiable
/// completion items (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DefinitionOfDone {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// The session this DoD belongs to.
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    /// Short title for this DoD.
    pub title: String,
    /// The completion items. Must be non-empty (§4.7).
    pub items: Vec<DodItem>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(DefinitionOfDone);

impl DefinitionOfDone {
    /// Structural + cross-field validation: universal fields, non-empty
    /// title, non-empty item list, unique item ids, each item valid.
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(!self.title.trim().is_empty(), "DoD title must not be empty")?;
        require(!self.items.is_empty(), "DoD must have at least one item")?;

        let mut seen = HashSet::new();
        for item in &self.items {
            item.validate()?;
            require(seen.insert(item.id.clone()), format!("duplicate DoD item id: {}", item.id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_core::Actor;

    fn sample() -> DefinitionOfDone {
        let mut dod = DefinitionOfDone {
            meta: ArtifactMeta::stamp(Actor::human("alice").unwrap()),
            session_id: Uuid::new_v4(),
            title: "Ship feature X".into(),
            items: vec![DodItem {
                id: "i1".into(),
                description: "tests pass".into(),
                method: VerificationMethod::CommandExitCode {
                    verification_command: "pnpm test".into(),
                    expected_exit_code: 0,
                },
                not_done_conditions: vec!["tests fail".into()],
            }],
            hash: String::new(),
        };
        dod.stamp_hash().unwrap();
        dod
    }

    #[test]
    fn valid_dod_passes_validation() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn empty_items_is_rejected() {
        let mut dod = sample();
        dod.items.clear();
        assert!(dod.validate().is_err());
    }

    #[test]
    fn duplicate_item_ids_are_rejected() {
        let mut dod = sample();
        let dup = dod.items[0].clone();
        dod.items.push(dup);
        assert!(dod.validate().is_err());
    }

    #[test]
    fn custom_method_requires_twenty_characters() {
        let method = VerificationMethod::Custom {
            verification_procedure: "too short".into(),
        };
        assert!(method.validate().is_err());

        let method = VerificationMethod::Custom {
            verification_procedure: "a".repeat(20),
        };
        assert!(method.validate().is_ok());
    }

    #[test]
    fn file_hash_match_requires_valid_sha256() {
        let method = VerificationMethod::FileHashMatch {
            target_path: "src/lib.rs".into(),
            expected_hash: "not-a-hash".into(),
        };
        assert!(method.validate().is_err());
    }

    #[test]
    fn self_hash_round_trips() {
        use crate::SelfHashing;
        let dod = sample();
        assert!(dod.verify_self_hash().unwrap());
    }

    #[test]
    fn tampering_breaks_self_hash() {
        use crate::SelfHashing;
        let mut dod = sample();
        dod.title.push_str(" (tampered)");
        assert!(!dod.verify_self_hash().unwrap());
    }
}
