// SPDX-License-Identifier: MIT OR Apache-2.0
//! The governance kernel's artifact DAG (§3.2): roughly twenty self-hashing,
//! cross-binding artifact types, each with a `validate(&self)` method
//! covering structural constraints and cross-field refinements, and a
//! `self_hash()`/`verify_hash()` pair built on [`gk_codec::hash_excluding`].
//!
//! Each artifact type is its own module; `lib.rs` only holds the shared
//! [`SelfHashing`] trait (so "canonicalize excluding the hash field" has
//! exactly one implementation per type, per §9) and re-exports.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod approval;
mod decision_lock;
mod definition_of_done;
mod execution_plan;
mod patch_apply_report;
mod patch_artifact;
mod policy;
mod prompt_capsule;
mod repo_snapshot;
mod reviewer_report;
mod runner_attestation;
mod runner_evidence;
mod runner_identity;
mod sealed_change_package;
mod session_anchor;
mod step_packet;
mod symbol_index;

pub use approval::{
    ApprovalBundle, ApprovalPolicy, ApprovalRule, ApprovalSignature, Quorum,
    SUPPORTED_APPROVAL_ALGORITHMS,
};
pub use decision_lock::{DecisionLock, DecisionLockStatus};
pub use definition_of_done::{DefinitionOfDone, DodItem, VerificationMethod};
pub use execution_plan::{ExecutionPlan, ExecutionStep, NonExecutableGuarantees};
pub use patch_apply_report::{PatchApplyReport, PatchConflict};
pub use patch_artifact::{ChangeType, FileChange, PatchArtifact};
pub use policy::{
    Policy, PolicyCondition, PolicyEffect, PolicyEvaluation, PolicyOperator, PolicyRule,
    PolicyRuleResult, PolicySeverity,
};
pub use prompt_capsule::{
    CapsuleBoundaries, CapsuleContext, CapsuleInputs, CapsuleModel, ModelIntent, PromptCapsule,
    MAX_CAPSULE_SIZE_BYTES,
};
pub use repo_snapshot::{IncludedFile, RepoSnapshot};
pub use reviewer_report::{ReviewerReport, ReviewerRole, ReviewerViolation};
pub use runner_attestation::{RunnerAttestation, SIGNATURE_ALGORITHM};
pub use runner_evidence::{RunnerEvidence, CAPABILITIES_REQUIRING_CONFIRMATION};
pub use runner_identity::RunnerIdentity;
pub use sealed_change_package::SealedChangePackage;
pub use session_anchor::SessionAnchor;
pub use step_packet::{Excerpt, StepContext, StepPacket, MAX_PACKET_SIZE_BYTES};
pub use symbol_index::{SourceFileSymbols, SymbolIndex};

use gk_error::{KernelError, KernelErrorCode};

/// Every self-hashing artifact type implements this so the "canonicalize
/// excluding the hash field, then compare" check (I1, §3.3) is written
/// once and reused by every validator, by [`gk_binding`](../gk_binding)'s
/// reference resolution, and by the replay verifier.
pub trait SelfHashing: serde::Serialize {
    /// Returns the currently stored self-hash (empty before first stamp).
    fn stored_hash(&self) -> &str;

    /// Overwrites the stored self-hash.
    fn set_stored_hash(&mut self, hash: String);

    /// Recomputes the self-hash from the current field values, excluding
    /// whatever is currently stored in the hash field.
    ///
    /// # Errors
    /// Returns [`KernelError`] if the value cannot be canonicalized.
    fn recompute_hash(&self) -> Result<String, KernelError> {
        gk_codec::hash_excluding(self, "hash").map_err(|e| {
            KernelError::new(KernelErrorCode::SchemaInvalid, format!("canonicalization failed: {e}"))
        })
    }

    /// Computes and stores the self-hash, overwriting any previous value.
    ///
    /// # Errors
    /// Returns [`KernelError`] if canonicalization fails.
    fn stamp_hash(&mut self) -> Result<(), KernelError> {
        let hash = self.recompute_hash()?;
        self.set_stored_hash(hash);
        Ok(())
    }

    /// Recomputes the self-hash and compares it against the stored value
    /// (I1: `hash(canonical(A∖hashField)) == A.hashField`).
    ///
    /// # Errors
    /// Returns [`KernelError`] if canonicalization fails.
    fn verify_self_hash(&self) -> Result<bool, KernelError> {
        Ok(self.recompute_hash()? == self.stored_hash())
    }
}

/// Implements [`SelfHashing`] for a type with a `pub hash: String` field.
/// All nineteen artifact types use this; factoring it into a macro avoids
/// retyping the same four lines nineteen times (§9: "centralize this as a
/// single combinator").
macro_rules! impl_self_hashing {
    ($ty:ty) => {
        impl $crate::SelfHashing for $ty {
            fn stored_hash(&self) -> &str {
                &self.hash
            }
            fn set_stored_hash(&mut self, hash: String) {
                self.hash = hash;
            }
        }
    };
}
pub(crate) use impl_self_hashing;

/// Shared validation helpers used by several artifact modules.
pub(crate) mod support {
    use gk_error::{KernelError, KernelErrorCode};

    /// A fixed-size check: returns a `SCHEMA_INVALID` error with `message`
    /// if `condition` is false.
    pub fn require(condition: bool, message: impl Into<String>) -> Result<(), KernelError> {
        if condition {
            Ok(())
        } else {
            Err(KernelError::new(KernelErrorCode::SchemaInvalid, message))
        }
    }

    /// Checks a string looks like a lowercase 64-char SHA-256 hex digest.
    pub fn is_sha256_hex(value: &str) -> bool {
        value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    }

    /// Checks a string is non-empty and within `max_len` bytes.
    pub fn is_bounded_nonempty(value: &str, max_len: usize) -> bool {
        !value.is_empty() && value.len() <= max_len
    }
}

/// The forbidden-surface token lexicon shared by structural linting and by
/// several artifacts' own self-validation (§3.3 "Forbidden surface", §4.5
/// "forbidden-field checks"). Tokens are matched with word boundaries by
/// `gk-linters`; this list is the single source of truth both crates pull
/// from so the lexicon cannot drift between the two call sites.
pub const FORBIDDEN_SURFACE_TOKENS: &[&str] = &[
    "shell",
    "network",
    "process-spawn",
    "dynamic-eval",
    "filesystem-mutation",
    "TODO",
    "TBD",
    "FIXME",
    "PLACEHOLDER",
    "XXX",
];

/// JSON object keys that must never appear in a `StepPacket`'s serialized
/// form (§4.5): an execution surface sneaking into a step envelope.
pub const FORBIDDEN_STEP_PACKET_KEYS: &[&str] =
    &["command", "exec", "http", "https", "shell", "spawn", "write", "delete"];
