// SPDX-License-Identifier: MIT OR Apache-2.0
//! The execution gate (C7, §4.7): the exhaustive, pure predicate a session
//! must pass before it may leave `exploring` and begin executing steps.
//!
//! Structured after `gate_policy.rs`'s `GateVerdict`/`Signal` vocabulary —
//! a fixed enumeration of named checks, each independently evaluated and
//! reported, rather than a single opaque boolean. Unlike that source's
//! confidence-scored auto-apply/escalate model, this gate is a flat boolean
//! conjunction: every check must pass, with no partial-credit tiering.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use gk_artifacts::{DecisionLock, DefinitionOfDone};
use serde::{Deserialize, Serialize};

/// One named, independently-evaluated gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCheck {
    /// Stable name for this check, e.g. `"lock.approved"`.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Present when `passed` is `false`: why.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GateCheck {
    fn pass(name: &str) -> Self {
        Self { name: name.to_string(), passed: true, reason: None }
    }

    fn fail(name: &str, reason: impl Into<String>) -> Self {
        Self { name: name.to_string(), passed: false, reason: Some(reason.into()) }
    }
}

/// The exhaustive result of evaluating every gate check for a session
/// (§4.7). `passed` is the conjunction of every entry in `checks`; every
/// check always runs, even after an earlier one has already failed, so a
/// caller sees the complete picture in one pass rather than one failure
/// at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    /// `true` iff every check passed.
    pub passed: bool,
    /// Every check run, in a fixed, stable order.
    pub checks: Vec<GateCheck>,
}

impl GateReport {
    /// Returns every failed check's name, in evaluation order.
    #[must_use]
    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks.iter().filter(|c| !c.passed).map(|c| c.name.as_str()).collect()
    }
}

/// The subset of [`gk_artifacts::FORBIDDEN_SURFACE_TOKENS`] that represent
/// unfinished-work placeholders rather than execution-surface tokens; only
/// these are relevant to the `lock-no-todo` gate check (§4.7: "none of the
/// placeholder tokens appear anywhere in Lock or DoD").
const PLACEHOLDER_TOKENS: &[&str] = &["TODO", "TBD", "FIXME", "PLACEHOLDER", "XXX"];

/// Scans every free-text field of `dod` and `lock` for placeholder tokens,
/// returning every distinct one found (§4.7 `lock-no-todo`).
fn placeholder_tokens_in_lock_and_dod(dod: &DefinitionOfDone, lock: &DecisionLock) -> Vec<&'static str> {
    let mut fields: Vec<&str> = vec![dod.title.as_str(), lock.goal.as_str()];
    fields.extend(dod.items.iter().map(|i| i.description.as_str()));
    fields.extend(dod.items.iter().flat_map(|i| i.not_done_conditions.iter().map(String::as_str)));
    fields.extend(lock.non_goals.iter().map(String::as_str));
    fields.extend(lock.interfaces.iter().map(String::as_str));
    fields.extend(lock.invariants.iter().map(String::as_str));
    fields.extend(lock.constraints.iter().map(String::as_str));
    fields.extend(lock.failure_modes.iter().map(String::as_str));
    fields.extend(lock.risks_and_tradeoffs.iter().map(String::as_str));

    let mut found: Vec<&'static str> = fields
        .iter()
        .flat_map(|text| gk_linters::scan_forbidden_tokens(text))
        .filter(|token| PLACEHOLDER_TOKENS.contains(token))
        .collect();
    found.sort_unstable();
    found.dedup();
    found
}

/// Evaluates the gate for a session given its (possibly absent)
/// `DefinitionOfDone` and `DecisionLock` (§4.7):
///
/// - a `DefinitionOfDone` must be recorded, with at least one item
/// - a `DecisionLock` must be recorded and `approved`
/// - the lock's `goal`, `nonGoals`, and `invariants` must each be
///   non-empty (re-checked here rather than trusted from
///   [`DecisionLock::validate`], since the gate is meant to stand on its
///   own as the single place session progression is decided)
/// - the lock must bind to the same `DefinitionOfDone` passed in
#[must_use]
pub fn evaluate_gate(dod: Option<&DefinitionOfDone>, lock: Option<&DecisionLock>) -> GateReport {
    let mut checks = Vec::with_capacity(7);

    checks.push(match dod {
        Some(d) if !d.items.is_empty() => GateCheck::pass("dod.present"),
        Some(_) => GateCheck::fail("dod.present", "DefinitionOfDone has no items"),
        None => GateCheck::fail("dod.present", "no DefinitionOfDone recorded"),
    });

    checks.push(match lock {
        Some(_) => GateCheck::pass("lock.present"),
        None => GateCheck::fail("lock.present", "no DecisionLock recorded"),
    });

    checks.push(match lock {
        Some(l) if l.is_approved() => GateCheck::pass("lock.approved"),
        Some(l) => GateCheck::fail("lock.approved", format!("status is {:?}, not approved", l.status)),
        None => GateCheck::fail("lock.approved", "no DecisionLock recorded"),
    });

    checks.push(match lock {
        Some(l) if !l.goal.trim().is_empty() => GateCheck::pass("lock.goal.nonEmpty"),
        _ => GateCheck::fail("lock.goal.nonEmpty", "goal is empty or lock missing"),
    });

    checks.push(match lock {
        Some(l) if !l.non_goals.is_empty() => GateCheck::pass("lock.nonGoals.nonEmpty"),
        _ => GateCheck::fail("lock.nonGoals.nonEmpty", "nonGoals is empty or lock missing"),
    });

    checks.push(match lock {
        Some(l) if !l.invariants.is_empty() => GateCheck::pass("lock.invariants.nonEmpty"),
        _ => GateCheck::fail("lock.invariants.nonEmpty", "invariants is empty or lock missing"),
    });

    checks.push(match (dod, lock) {
        (Some(d), Some(l)) if l.dod_id == d.meta.id => GateCheck::pass("lock.dodId.matches"),
        (Some(_), Some(_)) => GateCheck::fail("lock.dodId.matches", "lock.dodId does not identify the bound DoD"),
        _ => GateCheck::fail("lock.dodId.matches", "DoD or lock missing"),
    });

    checks.push(match (dod, lock) {
        (Some(d), Some(l)) => {
            let tokens = placeholder_tokens_in_lock_and_dod(d, l);
            if tokens.is_empty() {
                GateCheck::pass("lock-no-todo")
            } else {
                GateCheck::fail(
                    "lock-no-todo",
                    format!("placeholder token(s) found: {}", tokens.join(", ")),
                )
            }
        }
        _ => GateCheck::fail("lock-no-todo", "DoD or lock missing"),
    });

    let passed = checks.iter().all(|c| c.passed);
    GateReport { passed, checks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_artifacts::{DecisionLockStatus, DodItem, VerificationMethod};
    use gk_core::{Actor, ArtifactMeta};
    use uuid::Uuid;

    fn dod() -> DefinitionOfDone {
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
                not_done_conditions: vec![],
            }],
            hash: String::new(),
        };
        use gk_artifacts::SelfHashing;
        dod.stamp_hash().unwrap();
        dod
    }

    fn approved_lock(dod: &DefinitionOfDone) -> DecisionLock {
        use gk_artifacts::SelfHashing;
        let mut lock = DecisionLock {
            meta: ArtifactMeta::stamp(Actor::human("alice").unwrap()),
            dod_id: dod.meta.id,
            dod_hash: dod.hash.clone(),
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
    fn approved_lock_and_dod_pass_the_gate() {
        let dod = dod();
        let lock = approved_lock(&dod);
        let report = evaluate_gate(Some(&dod), Some(&lock));
        assert!(report.passed, "{:?}", report.failed_checks());
    }

    #[test]
    fn missing_dod_fails_gate() {
        let dod = dod();
        let lock = approved_lock(&dod);
        let report = evaluate_gate(None, Some(&lock));
        assert!(!report.passed);
        assert!(report.failed_checks().contains(&"dod.present"));
    }

    #[test]
    fn draft_lock_fails_gate_but_still_runs_every_check() {
        let dod = dod();
        let mut lock = approved_lock(&dod);
        lock.status = DecisionLockStatus::Draft;
        let report = evaluate_gate(Some(&dod), Some(&lock));
        assert!(!report.passed);
        assert!(report.failed_checks().contains(&"lock.approved"));
        assert_eq!(report.checks.len(), 8);
    }

    #[test]
    fn placeholder_goal_fails_gate_with_lock_no_todo() {
        let dod = dod();
        let mut lock = approved_lock(&dod);
        lock.goal = "TODO: define".into();
        let report = evaluate_gate(Some(&dod), Some(&lock));
        assert!(!report.passed);
        assert!(report.failed_checks().contains(&"lock-no-todo"));
    }

    #[test]
    fn empty_invariants_fails_gate() {
        let dod = dod();
        let mut lock = approved_lock(&dod);
        lock.invariants.clear();
        let report = evaluate_gate(Some(&dod), Some(&lock));
        assert!(!report.passed);
        assert!(report.failed_checks().contains(&"lock.invariants.nonEmpty"));
    }
}
