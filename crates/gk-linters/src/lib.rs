// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structural linters (C8, §4.8): forbidden-surface token scanning, goal
//! verbatim-substring checks, and `DefinitionOfDone`-reference closure
//! checks over `ExecutionPlan` and `StepPacket`.
//!
//! The token scanner follows `abp-glob`'s pattern-matching idiom — compile
//! once, match many — and the size-guard style of `gk-json-guard`: collect
//! every violation instead of stopping at the first.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use gk_artifacts::{DefinitionOfDone, ExecutionPlan, StepPacket, FORBIDDEN_SURFACE_TOKENS};
use gk_error::{KernelError, KernelErrorCode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// One lint violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintViolation {
    /// Stable rule name, e.g. `"forbiddenSurfaceToken"`.
    pub rule: String,
    /// Human-readable description, naming the offending field and value.
    pub message: String,
}

/// The exhaustive result of running every lint rule over an artifact
/// (§4.8). Every rule always runs; `passed` is `violations.is_empty()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintReport {
    /// `true` iff `violations` is empty.
    pub passed: bool,
    /// Every violation found.
    pub violations: Vec<LintViolation>,
}

impl LintReport {
    fn from_violations(violations: Vec<LintViolation>) -> Self {
        Self { passed: violations.is_empty(), violations }
    }
}

fn token_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        FORBIDDEN_SURFACE_TOKENS
            .iter()
            .map(|token| {
                let pattern = format!(r"\b{}\b", regex::escape(token));
                (*token, Regex::new(&pattern).expect("forbidden token pattern compiles"))
            })
            .collect()
    })
}

/// Scans `text` for any [`FORBIDDEN_SURFACE_TOKENS`] entry, matched on word
/// boundaries so e.g. `"shell"` does not match inside `"shellfish"`.
/// Returns every distinct token found, in lexicon order.
#[must_use]
pub fn scan_forbidden_tokens(text: &str) -> Vec<&'static str> {
    token_patterns()
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(token, _)| *token)
        .collect()
}

fn push_token_violations(violations: &mut Vec<LintViolation>, field: &str, text: &str) {
    for token in scan_forbidden_tokens(text) {
        violations.push(LintViolation {
            rule: "forbiddenSurfaceToken".into(),
            message: format!("field '{field}' contains forbidden token '{token}'"),
        });
    }
}

/// Lints an `ExecutionPlan` (§4.8):
/// - every step description / `completionCriteria` entry / `goal` is free
///   of forbidden-surface tokens
/// - every step's `references` resolve to a real `DefinitionOfDone` item
///   id (reference closure)
#[must_use]
pub fn lint_execution_plan(plan: &ExecutionPlan, dod: &DefinitionOfDone) -> LintReport {
    let mut violations = Vec::new();
    push_token_violations(&mut violations, "goal", &plan.goal);
    for criterion in &plan.completion_criteria {
        push_token_violations(&mut violations, "completionCriteria", criterion);
    }

    let dod_ids: HashSet<&str> = dod.items.iter().map(|i| i.id.as_str()).collect();
    for step in &plan.steps {
        push_token_violations(&mut violations, &format!("steps[{}].description", step.step_id), &step.description);
        for reference in &step.references {
            if !dod_ids.contains(reference.as_str()) {
                violations.push(LintViolation {
                    rule: "dodReferenceClosure".into(),
                    message: format!(
                        "step '{}' references unknown DoD item '{reference}'",
                        step.step_id
                    ),
                });
            }
        }
    }
    LintReport::from_violations(violations)
}

/// Lints an `ExecutionPlan`, returning a [`KernelError`] with code
/// `EXECUTION_PLAN_LINT_FAILED` carrying every violation if the lint
/// fails.
///
/// # Errors
/// Returns [`KernelError`] iff [`lint_execution_plan`] found any violation.
pub fn require_execution_plan_lint(plan: &ExecutionPlan, dod: &DefinitionOfDone) -> Result<(), KernelError> {
    let report = lint_execution_plan(plan, dod);
    if report.passed {
        Ok(())
    } else {
        Err(KernelError::new(
            KernelErrorCode::ExecutionPlanLintFailed,
            format!("{} execution plan lint violation(s)", report.violations.len()),
        )
        .with_detail("violations", &report.violations))
    }
}

/// Lints a `StepPacket` (§4.8):
/// - every context excerpt and the `goalReference` itself are free of
///   forbidden-surface tokens
/// - `goalReference` is a verbatim substring of `plan.goal` (goal
///   preservation)
/// - every `dodItemRefs` entry resolves to a real `DefinitionOfDone` item
///   id (reference closure)
#[must_use]
pub fn lint_step_packet(packet: &StepPacket, plan: &ExecutionPlan, dod: &DefinitionOfDone) -> LintReport {
    let mut violations = Vec::new();
    push_token_violations(&mut violations, "goalReference", &packet.goal_reference);
    for excerpt in &packet.context.excerpts {
        push_token_violations(&mut violations, &format!("context.excerpts[{}]", excerpt.path), &excerpt.text);
    }

    if !plan.goal.contains(&packet.goal_reference) {
        violations.push(LintViolation {
            rule: "goalPreservation".into(),
            message: "goalReference is not a verbatim substring of the bound plan's goal".into(),
        });
    }

    let dod_ids: HashSet<&str> = dod.items.iter().map(|i| i.id.as_str()).collect();
    for reference in &packet.dod_item_refs {
        if !dod_ids.contains(reference.as_str()) {
            violations.push(LintViolation {
                rule: "dodReferenceClosure".into(),
                message: format!("dodItemRefs references unknown DoD item '{reference}'"),
            });
        }
    }
    LintReport::from_violations(violations)
}

/// Lints a `StepPacket`, returning a [`KernelError`] with code
/// `STEP_PACKET_LINT_FAILED` carrying every violation if the lint fails.
///
/// # Errors
/// Returns [`KernelError`] iff [`lint_step_packet`] found any violation.
pub fn require_step_packet_lint(
    packet: &StepPacket,
    plan: &ExecutionPlan,
    dod: &DefinitionOfDone,
) -> Result<(), KernelError> {
    let report = lint_step_packet(packet, plan, dod);
    if report.passed {
        Ok(())
    } else {
        Err(KernelError::new(
            KernelErrorCode::StepPacketLintFailed,
            format!("{} step packet lint violation(s)", report.violations.len()),
        )
        .with_detail("violations", &report.violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_artifacts::{
        DodItem, Excerpt, ExecutionStep, NonExecutableGuarantees, SelfHashing, StepContext,
        VerificationMethod,
    };
    use gk_core::{Actor, ArtifactMeta};
    use std::collections::BTreeMap;
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
        dod.stamp_hash().unwrap();
        dod
    }

    fn plan() -> ExecutionPlan {
        let mut plan = ExecutionPlan {
            meta: ArtifactMeta::stamp(Actor::human("alice").unwrap()),
            lock_id: Uuid::new_v4(),
            lock_hash: "a".repeat(64),
            dod_id: Uuid::new_v4(),
            dod_hash: "b".repeat(64),
            goal: "Ship feature X end to end".into(),
            steps: vec![ExecutionStep {
                step_id: "s1".into(),
                references: vec!["i1".into()],
                required_capabilities: vec![],
                description: "implement the thing".into(),
            }],
            allowed_capabilities: vec![],
            non_executable_guarantees: NonExecutableGuarantees::default(),
            completion_criteria: vec!["all tests pass".into()],
            hash: String::new(),
        };
        plan.stamp_hash().unwrap();
        plan
    }

    #[test]
    fn clean_plan_passes() {
        let report = lint_execution_plan(&plan(), &dod());
        assert!(report.passed, "{:?}", report.violations);
    }

    #[test]
    fn forbidden_token_in_description_is_flagged() {
        let mut plan = plan();
        plan.steps[0].description = "shell out to run the TODO script".into();
        let report = lint_execution_plan(&plan, &dod());
        assert!(!report.passed);
        assert!(report.violations.iter().any(|v| v.message.contains("shell")));
    }

    #[test]
    fn unknown_dod_reference_is_flagged() {
        let mut plan = plan();
        plan.steps[0].references = vec!["ghost".into()];
        let report = lint_execution_plan(&plan, &dod());
        assert!(!report.passed);
        assert!(report.violations.iter().any(|v| v.rule == "dodReferenceClosure"));
    }

    #[test]
    fn word_boundary_avoids_false_positive() {
        let mut plan = plan();
        plan.steps[0].description = "count the shellfish in the bucket".into();
        let report = lint_execution_plan(&plan, &dod());
        assert!(report.passed, "{:?}", report.violations);
    }

    fn packet(plan: &ExecutionPlan) -> StepPacket {
        let mut packet = StepPacket {
            meta: ArtifactMeta::stamp(Actor::system("gk-kernel").unwrap()),
            lock_id: plan.lock_id,
            plan_hash: plan.hash.clone(),
            capsule_hash: "c".repeat(64),
            snapshot_hash: "d".repeat(64),
            dod_id: plan.dod_id,
            step_id: "s1".into(),
            dod_item_refs: vec!["i1".into()],
            allowed_files: vec!["src/lib.rs".into()],
            allowed_symbols: vec![],
            required_capabilities: vec![],
            reviewer_sequence: vec!["static".into(), "security".into(), "qa".into()],
            context: StepContext {
                file_digests: BTreeMap::new(),
                excerpts: vec![Excerpt {
                    path: "src/lib.rs".into(),
                    start_line: 1,
                    end_line: 2,
                    text: "fn main() {}".into(),
                }],
            },
            goal_reference: "Ship feature X".into(),
            hash: String::new(),
        };
        packet.stamp_hash().unwrap();
        packet
    }

    #[test]
    fn clean_step_packet_passes() {
        let plan = plan();
        let report = lint_step_packet(&packet(&plan), &plan, &dod());
        assert!(report.passed, "{:?}", report.violations);
    }

    #[test]
    fn goal_reference_not_substring_is_flagged() {
        let plan = plan();
        let mut packet = packet(&plan);
        packet.goal_reference = "a completely different goal".into();
        let report = lint_step_packet(&packet, &plan, &dod());
        assert!(!report.passed);
        assert!(report.violations.iter().any(|v| v.rule == "goalPreservation"));
    }

    #[test]
    fn require_step_packet_lint_returns_typed_error() {
        let plan = plan();
        let mut packet = packet(&plan);
        packet.dod_item_refs = vec!["ghost".into()];
        let err = require_step_packet_lint(&packet, &plan, &dod()).unwrap_err();
        assert_eq!(err.code(), KernelErrorCode::StepPacketLintFailed);
    }
}
