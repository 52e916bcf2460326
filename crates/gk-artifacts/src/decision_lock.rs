// SPDX-License-Identifier: MIT OR Apache-2.0
//! `DecisionLock` (§3.2): the frozen goal/constraints contract a session is
//! executed against, binding to a [`crate::DefinitionOfDone`] by hash.

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Approval state of a [`DecisionLock`]. Only `approved` permits the
/// session to progress past `exploring` (§3.4, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionLockStatus {
    /// Still being authored.
    Draft,
    /// Approved; eligible to gate session progress.
    Approved,
    /// Explicitly rejected.
    Rejected,
}

/// The frozen decision record for a session: goal, scope, interfaces,
/// invariants, constraints, failure modes, and risk/tradeoff notes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DecisionLock {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Identity of the [`crate::DefinitionOfDone`] this lock is scoped to.
    #[serde(rename = "dodId")]
    pub dod_id: Uuid,
    /// Self-hash of the bound `DefinitionOfDone`, verified by `gk-binding`.
    #[serde(rename = "dodHash")]
    pub dod_hash: String,
    /// What this session is trying to accomplish, verbatim. Propagated
    /// into the plan, packets, and evidence (§3.3 "goal preservation").
    pub goal: String,
    /// Explicitly out-of-scope concerns.
    #[serde(rename = "nonGoals")]
    pub non_goals: Vec<String>,
    /// Interfaces this change must honor or expose.
    pub interfaces: Vec<String>,
    /// Invariants that must hold before and after the change.
    pub invariants: Vec<String>,
    /// Constraints the implementation must respect.
    pub constraints: Vec<String>,
    /// Known ways this change could fail.
    #[serde(rename = "failureModes")]
    pub failure_modes: Vec<String>,
    /// Risk/tradeoff notes.
    #[serde(rename = "risksAndTradeoffs")]
    pub risks_and_tradeoffs: Vec<String>,
    /// Draft, approved, or rejected.
    pub status: DecisionLockStatus,
    /// Self-hash of the `ExecutionPlan` built against this lock, once one
    /// exists. Absent while the lock is still in `draft`/`approved` with
    /// no plan yet.
    #[serde(rename = "planHash", default, skip_serializing_if = "Option::is_none")]
    pub plan_hash: Option<String>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(DecisionLock);

impl DecisionLock {
    /// Structural validation: universal fields, bound-hash shape, and the
    /// non-empty `{goal, nonGoals, invariants}` requirement the gate also
    /// re-checks (§4.7).
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(
            is_sha256_hex(&self.dod_hash),
            "dodHash must be a 64-char lowercase SHA-256 hex digest",
        )?;
        require(!self.goal.trim().is_empty(), "goal must not be empty")?;
        require(!self.non_goals.is_empty(), "nonGoals must not be empty")?;
        require(!self.invariants.is_empty(), "invariants must not be empty")?;
        if let Some(plan_hash) = &self.plan_hash {
            require(
                is_sha256_hex(plan_hash),
                "planHash must be a 64-char lowercase SHA-256 hex digest",
            )?;
        }
        Ok(())
    }

    /// Returns `true` only when this lock has been approved.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.status == DecisionLockStatus::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_core::Actor;

    fn sample() -> DecisionLock {
        let mut lock = DecisionLock {
            meta: ArtifactMeta::stamp(Actor::human("alice").unwrap()),
            dod_id: Uuid::new_v4(),
            dod_hash: "a".repeat(64),
            goal: "Ship feature X".into(),
            non_goals: vec!["perf".into()],
            interfaces: vec![],
            invariants: vec!["no plaintext passwords".into()],
            constraints: vec![],
            failure_modes: vec![],
            risks_and_tradeoffs: vec![],
            status: DecisionLockStatus::Approved,
            plan_hash: None,
            hash: String::new(),
        };
        lock.stamp_hash().unwrap();
        lock
    }

    #[test]
    fn valid_lock_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn empty_goal_is_rejected() {
        let mut lock = sample();
        lock.goal = "   ".into();
        assert!(lock.validate().is_err());
    }

    #[test]
    fn empty_invariants_is_rejected() {
        let mut lock = sample();
        lock.invariants.clear();
        assert!(lock.validate().is_err());
    }

    #[test]
    fn is_approved_reflects_status() {
        let mut lock = sample();
        assert!(lock.is_approved());
        lock.status = DecisionLockStatus::Draft;
        assert!(!lock.is_approved());
    }

    #[test]
    fn malformed_dod_hash_is_rejected() {
        let mut lock = sample();
        lock.dod_hash = "short".into();
        assert!(lock.validate().is_err());
    }
}
