// SPDX-License-Identifier: MIT OR Apache-2.0
//! gk-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Universal fields and identity types shared across every artifact in the
//! governance kernel's artifact DAG: the schema-version contract, the actor
//! vocabulary, the repo-relative path newtype, and the derived session
//! status state machine.
//!
//! If you only take one dependency when building a new artifact crate, take
//! this one.

use chrono::{DateTime, SubsecRound, Utc};
use gk_error::{KernelError, KernelErrorCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Major schema version every artifact in this build must agree on.
///
/// Artifacts carrying a `schemaVersion` whose major component differs from
/// this value are rejected during validation (§3.1: "major must equal the
/// build's supported major").
pub const SUPPORTED_SCHEMA_MAJOR: u32 = 0;

/// Full schema version string stamped on artifacts produced by this build.
pub const SCHEMA_VERSION: &str = "0.1.0";

/// Parses the major component out of a semver-shaped schema version string.
///
/// Returns `None` if `version` does not start with a valid integer followed
/// by a `.` or end of string.
pub fn schema_major(version: &str) -> Option<u32> {
    let major = version.split('.').next()?;
    major.parse::<u32>().ok()
}

/// Validates that `version`'s major component matches [`SUPPORTED_SCHEMA_MAJOR`].
pub fn validate_schema_version(version: &str) -> Result<(), KernelError> {
    match schema_major(version) {
        Some(major) if major == SUPPORTED_SCHEMA_MAJOR => Ok(()),
        _ => Err(KernelError::new(
            KernelErrorCode::SchemaInvalid,
            format!("unsupported schemaVersion: {version}"),
        )
        .with_detail("schemaVersion", version)),
    }
}

/// Who created or sealed an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A human operator.
    Human,
    /// An automated system (agent, CI runner, the Kernel itself).
    System,
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::System => write!(f, "system"),
        }
    }
}

/// The `{actorId, actorType}` pair every artifact's `createdBy`/`sealedBy`
/// field carries (§3.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Actor {
    /// Opaque identifier for the actor, 1..200 bytes.
    #[serde(rename = "actorId")]
    pub actor_id: String,
    /// Whether the actor is a human or an automated system.
    #[serde(rename = "actorType")]
    pub actor_type: ActorType,
}

impl Actor {
    /// Builds an actor, validating the `actorId` length constraint.
    pub fn new(actor_id: impl Into<String>, actor_type: ActorType) -> Result<Self, KernelError> {
        let actor_id = actor_id.into();
        if actor_id.is_empty() || actor_id.len() > 200 {
            return Err(KernelError::new(
                KernelErrorCode::SchemaInvalid,
                "actorId must be 1..200 bytes",
            )
            .with_detail("actorId", actor_id));
        }
        Ok(Self {
            actor_id,
            actor_type,
        })
    }

    /// Convenience constructor for a human actor.
    pub fn human(actor_id: impl Into<String>) -> Result<Self, KernelError> {
        Self::new(actor_id, ActorType::Human)
    }

    /// Convenience constructor for a system actor.
    pub fn system(actor_id: impl Into<String>) -> Result<Self, KernelError> {
        Self::new(actor_id, ActorType::System)
    }
}

/// An ISO-8601 UTC timestamp with millisecond precision, as used for every
/// `createdAt` field.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// The universal fields every artifact in the DAG carries (§3.1):
/// `schemaVersion`, a UUID identity, a millisecond-precision UTC creation
/// timestamp, and the actor that created it.
///
/// Every `gk-artifacts` struct embeds one `ArtifactMeta` field rather than
/// repeating these four fields on every type, so the universal-fields
/// contract lives in exactly one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactMeta {
    /// Semver schema version; major component must equal
    /// [`SUPPORTED_SCHEMA_MAJOR`].
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    /// UUID identity of this artifact instance.
    pub id: uuid::Uuid,
    /// ISO-8601 UTC creation timestamp, millisecond precision.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// The actor that created this artifact.
    #[serde(rename = "createdBy")]
    pub created_by: Actor,
}

impl ArtifactMeta {
    /// Stamps a fresh `ArtifactMeta`: a new random UUID, the current
    /// timestamp truncated to millisecond precision, and this build's
    /// [`SCHEMA_VERSION`].
    #[must_use]
    pub fn stamp(created_by: Actor) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            id: uuid::Uuid::new_v4(),
            created_at: now_millis(),
            created_by,
        }
    }

    /// Validates the universal fields: schema version major component and
    /// actor id length (the latter is already enforced by [`Actor::new`],
    /// but is re-checked here for artifacts deserialized from untrusted
    /// JSON rather than constructed through the builder).
    pub fn validate(&self) -> Result<(), KernelError> {
        validate_schema_version(&self.schema_version)?;
        if self.created_by.actor_id.is_empty() || self.created_by.actor_id.len() > 200 {
            return Err(KernelError::new(
                KernelErrorCode::SchemaInvalid,
                "createdBy.actorId must be 1..200 bytes",
            ));
        }
        Ok(())
    }
}

/// A path known to be relative to a repository root and free of traversal
/// (`..`), absolute prefixes, and embedded NUL bytes.
///
/// This newtype centralizes the path-traversal guard that, in an ad hoc
/// implementation, tends to be scattered as a refinement on every artifact
/// that carries a file path (`DefinitionOfDone` verification targets,
/// `RepoSnapshot.includedFiles`, `PatchArtifact.filesChanged`, policy
/// `target` fields, and so on).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoRelativePath(String);

impl RepoRelativePath {
    /// Parses and validates a repo-relative path string.
    pub fn from_str(value: impl Into<String>) -> Result<Self, KernelError> {
        let value = value.into();
        if value.is_empty() {
            return Err(path_error(&value, "path must not be empty"));
        }
        if value.contains('\0') {
            return Err(path_error(&value, "path must not contain NUL bytes"));
        }
        if value.starts_with('/') || value.starts_with('\\') {
            return Err(path_error(&value, "path must be relative"));
        }
        if value.contains(':') {
            return Err(path_error(&value, "path must not contain a drive prefix"));
        }
        if value
            .split(['/', '\\'])
            .any(|segment| segment == "..")
        {
            return Err(path_error(&value, "path must not contain `..` segments"));
        }
        Ok(Self(value))
    }

    /// Returns the underlying path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn path_error(value: &str, message: &str) -> KernelError {
    KernelError::new(KernelErrorCode::SchemaInvalid, message).with_detail("path", value)
}

impl TryFrom<String> for RepoRelativePath {
    type Error = KernelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(value)
    }
}

impl From<RepoRelativePath> for String {
    fn from(value: RepoRelativePath) -> Self {
        value.0
    }
}

impl fmt::Display for RepoRelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl JsonSchema for RepoRelativePath {
    fn schema_name() -> String {
        "RepoRelativePath".to_string()
    }

    fn json_schema(generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        String::json_schema(generator)
    }
}

/// The session status derived from which artifacts are present (§3.4).
///
/// Never stored directly; always computed on read from the artifact set
/// already persisted for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No approved `DecisionLock` yet.
    Exploring,
    /// An approved `DecisionLock` is present.
    Locked,
    /// The execution gate (C7) has passed.
    Eligible,
    /// A `SealedChangePackage` has been recorded.
    Sealed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Exploring => "exploring",
            Self::Locked => "locked",
            Self::Eligible => "eligible",
            Self::Sealed => "sealed",
        };
        write!(f, "{s}")
    }
}

/// Inputs to [`derive_session_status`]: presence flags for the artifacts
/// that gate each status transition. Kept as booleans rather than the
/// artifacts themselves so that `gk-kernel` can compute status from a cheap
/// index lookup instead of deserializing full artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatusInputs {
    /// An approved `DecisionLock` has been recorded for the session.
    pub has_approved_lock: bool,
    /// The execution gate (C7) evaluated to "proceed" for the session.
    pub gate_passed: bool,
    /// A `SealedChangePackage` has been recorded for the session.
    pub has_sealed_package: bool,
}

/// Derives [`SessionStatus`] from artifact presence, per the state machine
/// in §3.4: `exploring` → `locked` → `eligible` → `sealed`.
pub fn derive_session_status(inputs: SessionStatusInputs) -> SessionStatus {
    if inputs.has_sealed_package {
        SessionStatus::Sealed
    } else if inputs.gate_passed {
        SessionStatus::Eligible
    } else if inputs.has_approved_lock {
        SessionStatus::Locked
    } else {
        SessionStatus::Exploring
    }
}
