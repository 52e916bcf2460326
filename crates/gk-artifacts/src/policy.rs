// SPDX-License-Identifier: MIT OR Apache-2.0
//! `Policy` and `PolicyEvaluation` (§3.2): declarative, non-executable
//! rules over a path-addressed session context, and the aggregated
//! result of evaluating them (C10's schema surface; evaluation itself is
//! `gk-policy`).

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A condition operator (§4.10). Type preconditions are enforced by the
/// evaluator (`gk-policy`), not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOperator {
    /// Field value equals `value` exactly.
    Equals,
    /// Field value does not equal `value`.
    NotEquals,
    /// Field value is a member of the array `value`.
    In,
    /// Field value is not a member of the array `value`.
    NotIn,
    /// Field value (an array) is a subset of `value`.
    SubsetOf,
    /// Field value (an array) is a superset of `value`.
    SupersetOf,
    /// Field value (a number) is greater than `value`.
    GreaterThan,
    /// Field value (a number) is less than `value`.
    LessThan,
    /// The field path resolves to a defined value.
    Exists,
    /// Field value (a string) matches the regex in `value`.
    MatchesRegex,
}

/// A single rule's condition: a field path, an operator, and the operand.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyCondition {
    /// Dotted path with optional `[idx]` segments into the evaluation
    /// context (§4.10).
    pub field: String,
    /// The comparison operator.
    pub operator: PolicyOperator,
    /// The operand compared against the resolved field value.
    pub value: serde_json::Value,
}

/// What happens when a rule's condition is satisfied (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    /// Explicitly permitted; condition true has no enforcement action.
    Allow,
    /// Condition true is a failure.
    Deny,
    /// Condition false is a failure.
    Require,
}

/// How severely a failed rule is treated (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PolicySeverity {
    /// Recorded but never raises.
    Info,
    /// Recorded but never raises.
    Warning,
    /// Raises `POLICY_DENIED`/`POLICY_REQUIREMENT_FAILED` on failure.
    Critical,
}

/// A single declarative policy rule.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyRule {
    /// Stable identifier for this rule.
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    /// The context sub-object this rule concerns, informational (e.g.
    /// `"runnerIdentity"`).
    pub target: String,
    /// The condition evaluated against the context.
    pub condition: PolicyCondition,
    /// What happens when the condition is satisfied.
    pub effect: PolicyEffect,
    /// How severely a failure of this rule is treated.
    pub severity: PolicySeverity,
}

/// A declarative, non-executable policy (§3.2, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Short human-readable name for this policy.
    pub name: String,
    /// The rules this policy carries.
    pub rules: Vec<PolicyRule>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(Policy);

impl Policy {
    /// Structural validation: universal fields, non-empty `name`,
    /// non-empty `rules`, unique `ruleId`s.
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(!self.name.trim().is_empty(), "policy name must not be empty")?;
        require(!self.rules.is_empty(), "policy must have at least one rule")?;

        let mut seen = HashSet::new();
        for rule in &self.rules {
            require(!rule.rule_id.is_empty(), "ruleId must not be empty")?;
            require(!rule.condition.field.is_empty(), "condition.field must not be empty")?;
            require(
                seen.insert(rule.rule_id.clone()),
                format!("duplicate ruleId: {}", rule.rule_id),
            )?;
        }
        Ok(())
    }
}

/// The verdict of evaluating one [`PolicyRule`] (§4.10).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyRuleResult {
    /// The rule this verdict is for.
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    /// Whether the rule's enforcement condition was satisfied.
    pub passed: bool,
    /// The rule's declared severity, carried through for aggregation.
    pub severity: PolicySeverity,
    /// The rule's declared effect, carried through for aggregation.
    pub effect: PolicyEffect,
    /// Present when `passed` is `false`, or when evaluation itself
    /// errored (fail-closed, §4.10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The aggregated result of evaluating a set of policies against a
/// session context (§3.2, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyEvaluation {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Hash binding to the policy set evaluated (sorted policy hashes,
    /// hashed together; see `gk-policy`).
    #[serde(rename = "policySetHash")]
    pub policy_set_hash: String,
    /// Hash of the canonicalized evaluation context.
    #[serde(rename = "contextHash")]
    pub context_hash: String,
    /// Per-rule results, in the order the policies declared them.
    pub results: Vec<PolicyRuleResult>,
    /// `true` iff no `critical`-severity rule failed.
    pub passed: bool,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(PolicyEvaluation);

impl PolicyEvaluation {
    /// Structural validation: universal fields, bound-hash shapes, and
    /// the `passed` aggregation invariant (§4.10: any failed `critical`
    /// rule makes `passed` false).
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(
            is_sha256_hex(&self.policy_set_hash),
            "policySetHash must be a SHA-256 hex digest",
        )?;
        require(is_sha256_hex(&self.context_hash), "contextHash must be a SHA-256 hex digest")?;

        let expected_passed = !self
            .results
            .iter()
            .any(|r| !r.passed && r.severity == PolicySeverity::Critical);
        require(
            self.passed == expected_passed,
            "passed must equal the conjunction of non-failed critical rules",
        )?;
        for result in &self.results {
            require(
                result.passed || result.reason.is_some(),
                format!("failed rule '{}' must carry a reason", result.rule_id),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_core::Actor;

    fn sample_policy() -> Policy {
        let mut policy = Policy {
            meta: ArtifactMeta::stamp(Actor::system("gk-kernel").unwrap()),
            name: "runner-fingerprint-deny".into(),
            rules: vec![PolicyRule {
                rule_id: "r1".into(),
                target: "runnerIdentity".into(),
                condition: PolicyCondition {
                    field: "runnerIdentity.environmentFingerprint".into(),
                    operator: PolicyOperator::Equals,
                    value: serde_json::json!("a".repeat(64)),
                },
                effect: PolicyEffect::Deny,
                severity: PolicySeverity::Critical,
            }],
            hash: String::new(),
        };
        policy.stamp_hash().unwrap();
        policy
    }

    fn sample_evaluation(passed: bool) -> PolicyEvaluation {
        let results = if passed {
            vec![PolicyRuleResult {
                rule_id: "r1".into(),
                passed: true,
                severity: PolicySeverity::Critical,
                effect: PolicyEffect::Deny,
                reason: None,
            }]
        } else {
            vec![PolicyRuleResult {
                rule_id: "r1".into(),
                passed: false,
                severity: PolicySeverity::Critical,
                effect: PolicyEffect::Deny,
                reason: Some("deny condition matched".into()),
            }]
        };
        let mut evaluation = PolicyEvaluation {
            meta: ArtifactMeta::stamp(Actor::system("gk-kernel").unwrap()),
            policy_set_hash: "b".repeat(64),
            context_hash: "c".repeat(64),
            results,
            passed,
            hash: String::new(),
        };
        evaluation.stamp_hash().unwrap();
        evaluation
    }

    #[test]
    fn valid_policy_passes() {
        assert!(sample_policy().validate().is_ok());
    }

    #[test]
    fn duplicate_rule_id_is_rejected() {
        let mut policy = sample_policy();
        let dup = policy.rules[0].clone();
        policy.rules.push(dup);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn evaluation_passed_flag_must_match_critical_aggregation() {
        assert!(sample_evaluation(true).validate().is_ok());
        assert!(sample_evaluation(false).validate().is_ok());

        let mut mismatched = sample_evaluation(false);
        mismatched.passed = true;
        assert!(mismatched.validate().is_err());
    }

    #[test]
    fn failed_rule_without_reason_is_rejected() {
        let mut evaluation = sample_evaluation(false);
        evaluation.results[0].reason = None;
        assert!(evaluation.validate().is_err());
    }
}
