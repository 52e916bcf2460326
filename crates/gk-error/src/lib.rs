// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified, discriminated error taxonomy for the governance kernel.
//!
//! There is no exception hierarchy: every error carries one stable
//! [`KernelErrorCode`] plus a free-form message and a `details` map. Codes
//! and messages are part of the stability contract (§7) — callers and the
//! verifier CLI match on `code`, never on message text.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

/// Broad grouping of [`KernelErrorCode`] values, used for coarse dispatch
/// (for example, deciding whether a failure is retryable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KernelErrorCategory {
    /// Schema/constraint validation failures.
    Schema,
    /// Cross-artifact hash-binding and chain failures.
    Chain,
    /// Session lifecycle / mode violations.
    State,
    /// Store-level integrity failures.
    Integrity,
    /// Policy engine failures.
    Policy,
    /// Reviewer pipeline failures.
    Reviewer,
    /// Cryptographic primitive failures (signing/verification/key parsing).
    Crypto,
}

impl fmt::Display for KernelErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Schema => "schema",
            Self::Chain => "chain",
            Self::State => "state",
            Self::Integrity => "integrity",
            Self::Policy => "policy",
            Self::Reviewer => "reviewer",
            Self::Crypto => "crypto",
        };
        write!(f, "{s}")
    }
}

/// The full, stable error code catalog (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelErrorCode {
    // Schema/constraint
    /// An artifact failed schema or refinement validation.
    SchemaInvalid,
    /// An id referenced by one artifact does not match the expected target.
    IdMismatch,
    /// A `RunnerIdentity` artifact is malformed (bad key, fingerprint, etc).
    RunnerIdentityInvalid,
    /// An `ApprovalPolicy` artifact is malformed.
    ApprovalPolicyInvalid,
    /// A `Policy` artifact is malformed.
    PolicyInvalid,
    /// A `PatchArtifact` is malformed (bad hunk header, empty diff, etc).
    PatchArtifactInvalid,
    /// A step envelope (`StepPacket`) failed structural validation.
    StepEnvelopeInvalid,
    /// A `StepPacket` failed structural-linter checks (C8).
    StepPacketLintFailed,
    /// An `ExecutionPlan` failed structural-linter checks (C8).
    ExecutionPlanLintFailed,
    /// `RunnerEvidence` failed validation.
    EvidenceValidationFailed,

    // Chain/binding
    /// The `RunnerEvidence` chain is broken (sequence, hash, or timestamp).
    EvidenceChainInvalid,
    /// A declared `planHash` does not match the recomputed hash.
    PlanHashMismatch,
    /// A required `planHash` binding is absent.
    PlanHashMissing,
    /// A `PatchApplyReport`'s declared base snapshot does not match.
    PatchBaseMismatch,
    /// A `SealedChangePackage` hash does not match a recomputed value.
    SealHashMismatch,
    /// A `SealedChangePackage` is missing a required upstream dependency.
    SealMissingDependency,
    /// A `SealedChangePackage` violates a cross-artifact binding invariant.
    SealBindingViolation,
    /// A `SealedChangePackage` is otherwise structurally invalid.
    SealInvalid,

    // State/mode
    /// The referenced session has no recorded artifacts.
    SessionNotFound,
    /// An operation requires a `DefinitionOfDone` that has not been recorded.
    DodMissing,
    /// An operation requires a `DecisionLock` that has not been recorded.
    LockMissing,
    /// The recorded `DecisionLock` exists but is not `approved`.
    LockNotApproved,
    /// An operation was attempted from an incompatible session status.
    ModeViolation,
    /// The execution gate (C7) evaluated to "do not proceed".
    GateFailed,

    // Integrity
    /// The event chain failed hash or sequence verification.
    ChainVerificationFailed,
    /// A stored artifact's bytes do not match its content-address hash.
    ArtifactVerificationFailed,
    /// An event with a duplicate `eventId` was submitted.
    EventIdConflict,
    /// The first event in a run's log was not a run-started event.
    FirstEventNotRunStarted,

    // Policy
    /// A policy rule's `deny` effect matched.
    PolicyDenied,
    /// A policy rule's `require` effect did not match.
    PolicyRequirementFailed,
    /// A policy rule's field path could not be resolved.
    PolicyFieldPathInvalid,
    /// A policy rule named an unsupported operator.
    PolicyOperatorUnsupported,

    // Reviewer
    /// A reviewer in the sequential pipeline reported a failure.
    ReviewerFailed,
    /// The same reviewer role appears more than once in a sequence.
    ReviewerDuplicate,

    // Crypto
    /// A cryptographic key (PEM, PKCS#1/PKCS#8) failed to parse or is unfit
    /// for the requested operation.
    CryptoKeyInvalid,
}

impl KernelErrorCode {
    /// Returns the stable wire-format string for this code, e.g.
    /// `"SCHEMA_INVALID"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaInvalid => "SCHEMA_INVALID",
            Self::IdMismatch => "ID_MISMATCH",
            Self::RunnerIdentityInvalid => "RUNNER_IDENTITY_INVALID",
            Self::ApprovalPolicyInvalid => "APPROVAL_POLICY_INVALID",
            Self::PolicyInvalid => "POLICY_INVALID",
            Self::PatchArtifactInvalid => "PATCH_ARTIFACT_INVALID",
            Self::StepEnvelopeInvalid => "STEP_ENVELOPE_INVALID",
            Self::StepPacketLintFailed => "STEP_PACKET_LINT_FAILED",
            Self::ExecutionPlanLintFailed => "EXECUTION_PLAN_LINT_FAILED",
            Self::EvidenceValidationFailed => "EVIDENCE_VALIDATION_FAILED",
            Self::EvidenceChainInvalid => "EVIDENCE_CHAIN_INVALID",
            Self::PlanHashMismatch => "PLAN_HASH_MISMATCH",
            Self::PlanHashMissing => "PLAN_HASH_MISSING",
            Self::PatchBaseMismatch => "PATCH_BASE_MISMATCH",
            Self::SealHashMismatch => "SEAL_HASH_MISMATCH",
            Self::SealMissingDependency => "SEAL_MISSING_DEPENDENCY",
            Self::SealBindingViolation => "SEAL_BINDING_VIOLATION",
            Self::SealInvalid => "SEAL_INVALID",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::DodMissing => "DOD_MISSING",
            Self::LockMissing => "LOCK_MISSING",
            Self::LockNotApproved => "LOCK_NOT_APPROVED",
            Self::ModeViolation => "MODE_VIOLATION",
            Self::GateFailed => "GATE_FAILED",
            Self::ChainVerificationFailed => "CHAIN_VERIFICATION_FAILED",
            Self::ArtifactVerificationFailed => "ARTIFACT_VERIFICATION_FAILED",
            Self::EventIdConflict => "EVENT_ID_CONFLICT",
            Self::FirstEventNotRunStarted => "FIRST_EVENT_NOT_RUN_STARTED",
            Self::PolicyDenied => "POLICY_DENIED",
            Self::PolicyRequirementFailed => "POLICY_REQUIREMENT_FAILED",
            Self::PolicyFieldPathInvalid => "POLICY_FIELD_PATH_INVALID",
            Self::PolicyOperatorUnsupported => "POLICY_OPERATOR_UNSUPPORTED",
            Self::ReviewerFailed => "REVIEWER_FAILED",
            Self::ReviewerDuplicate => "REVIEWER_DUPLICATE",
            Self::CryptoKeyInvalid => "CRYPTO_KEY_INVALID",
        }
    }

    /// Returns the broad category this code belongs to.
    pub fn category(&self) -> KernelErrorCategory {
        match self {
            Self::SchemaInvalid
            | Self::IdMismatch
            | Self::RunnerIdentityInvalid
            | Self::ApprovalPolicyInvalid
            | Self::PolicyInvalid
            | Self::PatchArtifactInvalid
            | Self::StepEnvelopeInvalid
            | Self::StepPacketLintFailed
            | Self::ExecutionPlanLintFailed
            | Self::EvidenceValidationFailed => KernelErrorCategory::Schema,

            Self::EvidenceChainInvalid
            | Self::PlanHashMismatch
            | Self::PlanHashMissing
            | Self::PatchBaseMismatch
            | Self::SealHashMismatch
            | Self::SealMissingDependency
            | Self::SealBindingViolation
            | Self::SealInvalid => KernelErrorCategory::Chain,

            Self::SessionNotFound
            | Self::DodMissing
            | Self::LockMissing
            | Self::LockNotApproved
            | Self::ModeViolation
            | Self::GateFailed => KernelErrorCategory::State,

            Self::ChainVerificationFailed
            | Self::ArtifactVerificationFailed
            | Self::EventIdConflict
            | Self::FirstEventNotRunStarted => KernelErrorCategory::Integrity,

            Self::PolicyDenied
            | Self::PolicyRequirementFailed
            | Self::PolicyFieldPathInvalid
            | Self::PolicyOperatorUnsupported => KernelErrorCategory::Policy,

            Self::ReviewerFailed | Self::ReviewerDuplicate => KernelErrorCategory::Reviewer,

            Self::CryptoKeyInvalid => KernelErrorCategory::Crypto,
        }
    }
}

impl fmt::Display for KernelErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A kernel error: a stable [`KernelErrorCode`], a human-readable message,
/// a `details` map of structured context, and an optional source error.
///
/// `details` uses a [`BTreeMap`] so that [`Display`](fmt::Display) output
/// (and any canonicalization downstream) is deterministic.
pub struct KernelError {
    code: KernelErrorCode,
    message: String,
    details: BTreeMap<String, serde_json::Value>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl KernelError {
    /// Builds a new error with no details and no source.
    pub fn new(code: KernelErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: BTreeMap::new(),
            source: None,
        }
    }

    /// Attaches a structured detail. The value is serialized via
    /// [`serde_json::to_value`]; if serialization fails, the detail is
    /// silently skipped rather than panicking on an error path.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.into(), v);
        }
        self
    }

    /// Attaches an underlying source error.
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> KernelErrorCode {
        self.code
    }

    /// Returns the broad category of this error's code.
    pub fn category(&self) -> KernelErrorCategory {
        self.code.category()
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the details map.
    pub fn details(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.details
    }

    /// Builds a serializable, source-free snapshot of this error.
    pub fn to_dto(&self) -> KernelErrorDto {
        KernelErrorDto {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
            source_message: self.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl fmt::Debug for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("details", &self.details)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.details.is_empty() {
            if let Ok(json) = serde_json::to_string(&self.details) {
                write!(f, " {json}")?;
            }
        }
        Ok(())
    }
}

impl StdError for KernelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

/// A serializable snapshot of a [`KernelError`], matching the wire shape of
/// §6.3: `{code, message, details}`. Does not carry the opaque `source`
/// error (only its display string, for diagnostics).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KernelErrorDto {
    /// The stable error code.
    pub code: KernelErrorCode,
    /// The human-readable message.
    pub message: String,
    /// Structured context.
    pub details: BTreeMap<String, serde_json::Value>,
    /// Display string of the source error, if any, for diagnostics only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&KernelError> for KernelErrorDto {
    fn from(error: &KernelError) -> Self {
        error.to_dto()
    }
}

/// Convenience alias used throughout the kernel's crates.
pub type KernelResult<T> = Result<T, KernelError>;

/// An in-memory catalog of every [`KernelErrorCode`], used by the verifier
/// CLI's `--list-errors` mode and by documentation generation.
pub struct KernelErrorCatalog;

impl KernelErrorCatalog {
    /// All codes in declaration order.
    pub const ALL: &'static [KernelErrorCode] = &[
        KernelErrorCode::SchemaInvalid,
        KernelErrorCode::IdMismatch,
        KernelErrorCode::RunnerIdentityInvalid,
        KernelErrorCode::ApprovalPolicyInvalid,
        KernelErrorCode::PolicyInvalid,
        KernelErrorCode::PatchArtifactInvalid,
        KernelErrorCode::StepEnvelopeInvalid,
        KernelErrorCode::StepPacketLintFailed,
        KernelErrorCode::ExecutionPlanLintFailed,
        KernelErrorCode::EvidenceValidationFailed,
        KernelErrorCode::EvidenceChainInvalid,
        KernelErrorCode::PlanHashMismatch,
        KernelErrorCode::PlanHashMissing,
        KernelErrorCode::PatchBaseMismatch,
        KernelErrorCode::SealHashMismatch,
        KernelErrorCode::SealMissingDependency,
        KernelErrorCode::SealBindingViolation,
        KernelErrorCode::SealInvalid,
        KernelErrorCode::SessionNotFound,
        KernelErrorCode::DodMissing,
        KernelErrorCode::LockMissing,
        KernelErrorCode::LockNotApproved,
        KernelErrorCode::ModeViolation,
        KernelErrorCode::GateFailed,
        KernelErrorCode::ChainVerificationFailed,
        KernelErrorCode::ArtifactVerificationFailed,
        KernelErrorCode::EventIdConflict,
        KernelErrorCode::FirstEventNotRunStarted,
        KernelErrorCode::PolicyDenied,
        KernelErrorCode::PolicyRequirementFailed,
        KernelErrorCode::PolicyFieldPathInvalid,
        KernelErrorCode::PolicyOperatorUnsupported,
        KernelErrorCode::ReviewerFailed,
        KernelErrorCode::ReviewerDuplicate,
        KernelErrorCode::CryptoKeyInvalid,
    ];
}
