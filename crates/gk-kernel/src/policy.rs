// SPDX-License-Identifier: MIT OR Apache-2.0
//! `record_policy`, `evaluate_policies`, `enforce_policy_evaluation`: the
//! declarative policy engine's kernel-facing surface (§3.2, §4.10).
//!
//! Unlike most of this crate's `record_*` methods, `evaluate_policies` does
//! not accept a pre-built artifact from the caller: [`PolicyEvaluation`] is
//! the one artifact the Kernel itself constructs, since only the Kernel
//! knows the session's current path-addressed context (`dod`,
//! `decisionLock`, `executionPlan`, `evidenceChain`, `runnerIdentity`,
//! `runnerAttestation`, `anchor`) the policy engine resolves field paths
//! against (§4.10).

use crate::{self_hash_ok, Kernel};
use gk_artifacts::{Policy, PolicyEvaluation, SelfHashing};
use gk_core::Actor;
use gk_error::KernelResult;
use serde_json::Value;
use uuid::Uuid;

impl Kernel {
    /// Records one declarative `Policy` (§3.2) for later evaluation.
    ///
    /// # Errors
    /// Propagates the artifact's own validation.
    pub fn record_policy(&self, session_id: Uuid, policy: Policy) -> KernelResult<Policy> {
        policy.validate()?;
        self_hash_ok("policy", &policy)?;

        self.require_session(session_id)?;
        self.persist_artifact(session_id, &policy.meta.id.to_string(), "PolicyRecorded", "application/json;schema=Policy", &policy)?;
        self.mutate_session(session_id, |record| record.policies.push(policy.clone()))?;
        Ok(policy)
    }

    /// Builds the path-addressed evaluation context §4.10 resolves field
    /// paths against, from whatever this session has recorded so far. Each
    /// top-level key is present even when its artifact is absent (`null`),
    /// so `exists`/`matches_regex` conditions over not-yet-recorded
    /// artifacts resolve to `undefined` rather than raising
    /// `POLICY_FIELD_PATH_INVALID` for an unknown key.
    pub(crate) fn policy_context(&self, session_id: Uuid) -> KernelResult<Value> {
        let record = self.require_session(session_id)?;
        Ok(serde_json::json!({
            "dod": record.dod,
            "decisionLock": record.lock,
            "executionPlan": record.plan,
            "evidenceChain": record.evidence_chain,
            "runnerIdentity": record.runner_identity,
            "runnerAttestation": record.runner_attestation,
            "anchor": record.session_anchor,
        }))
    }

    /// Evaluates every `Policy` recorded for `session_id` against the
    /// session's current context (§4.10), records the resulting
    /// `PolicyEvaluation`, and returns it.
    ///
    /// Never raises on a failed rule — `evaluation.passed` may be `false`
    /// on return. Call [`Kernel::enforce_policy_evaluation`] to turn a
    /// failed `critical` rule into an `Err`.
    ///
    /// # Errors
    /// Propagates a canonicalization failure from [`gk_policy::evaluate_policies`]
    /// or a store I/O failure.
    pub fn evaluate_policies(&self, session_id: Uuid, created_by: Actor) -> KernelResult<PolicyEvaluation> {
        let record = self.require_session(session_id)?;
        let context = self.policy_context(session_id)?;
        let evaluation = gk_policy::evaluate_policies(&record.policies, &context, &self.config, created_by)?;

        self.persist_artifact(
            session_id,
            &evaluation.meta.id.to_string(),
            "PolicyEvaluationRecorded",
            "application/json;schema=PolicyEvaluation",
            &evaluation,
        )?;
        self.mutate_session(session_id, |record| record.policy_evaluation = Some(evaluation.clone()))?;
        Ok(evaluation)
    }

    /// Raises `POLICY_DENIED`/`POLICY_REQUIREMENT_FAILED` for `evaluation`'s
    /// first failed `critical` rule, if any (§4.10). A thin wrapper over
    /// [`gk_policy::enforce`] kept here so callers only ever need to depend
    /// on this crate's facade.
    ///
    /// # Errors
    /// Returns the first critical-severity rule failure's corresponding
    /// [`gk_error::KernelErrorCode`].
    pub fn enforce_policy_evaluation(&self, evaluation: &PolicyEvaluation) -> KernelResult<()> {
        gk_policy::enforce(evaluation)
    }
}
