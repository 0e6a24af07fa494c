use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::hash::compute_canonical_hash;

/// A matching predicate over a single request attribute (method, path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

/// The predicate set a [`FaultRule`] evaluates against an intercepted request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPredicate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<StringMatch>,
    /// Header-name -> required exact value. May include the
    /// `x-boifi-request-id` debug probe header.
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub headers: std::collections::HashMap<String, String>,
}

/// One of the two fault actions a rule can inject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultAction {
    Abort { http_status: u32 },
    Delay { fixed_delay_ms: u32 },
}

impl FaultAction {
    pub fn kind(&self) -> &'static str {
        match self {
            FaultAction::Abort { .. } => "abort",
            FaultAction::Delay { .. } => "delay",
        }
    }
}

/// One ordered entry in a policy's rule list. First match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRule {
    #[serde(rename = "match")]
    pub match_predicate: MatchPredicate,
    pub fault: FaultAction,
    /// Activation probability, 0..=100.
    pub percentage: f64,
    /// Per-request pre-fault wait, independent of the fault action itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_delay_ms: Option<u32>,
    /// Lifetime, in seconds from first activation, during which the rule fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

impl FaultRule {
    fn validate(&self, policy_name: &str, index: usize) -> Result<(), DomainError> {
        if self.percentage < 0.0 || self.percentage > 100.0 {
            return Err(DomainError::PercentageOutOfRange {
                policy: policy_name.to_string(),
                index,
                pct: self.percentage,
            });
        }
        match &self.fault {
            FaultAction::Abort { http_status } => {
                if !(100..=599).contains(http_status) {
                    return Err(DomainError::HttpStatusOutOfRange {
                        policy: policy_name.to_string(),
                        index,
                        status: *http_status,
                    });
                }
            }
            FaultAction::Delay { fixed_delay_ms } => {
                if *fixed_delay_ms > 30_000 {
                    return Err(DomainError::DelayTooLarge {
                        policy: policy_name.to_string(),
                        index,
                        ms: *fixed_delay_ms,
                    });
                }
            }
        }
        Ok(())
    }
}

/// `{service, namespace}` pair evaluated against sidecar identity.
/// Empty strings are treated as the wildcard `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    #[serde(default = "wildcard")]
    pub service: String,
    #[serde(default = "wildcard")]
    pub namespace: String,
}

fn wildcard() -> String {
    "*".to_string()
}

impl Default for Selector {
    fn default() -> Self {
        Self { service: wildcard(), namespace: wildcard() }
    }
}

impl Selector {
    /// Normalize empty fields to the wildcard, per spec invariant.
    pub fn normalize(&mut self) {
        if self.service.trim().is_empty() {
            self.service = wildcard();
        }
        if self.namespace.trim().is_empty() {
            self.namespace = wildcard();
        }
    }

    /// Whether this selector matches a concrete `(service, namespace)` pair.
    pub fn matches(&self, service: &str, namespace: &str) -> bool {
        (self.service == "*" || self.service == service)
            && (self.namespace == "*" || self.namespace == namespace)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Assigned by the store on every successful write; absent on a fresh
    /// client-constructed policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpec {
    #[serde(default)]
    pub selector: Selector,
    pub rules: Vec<FaultRule>,
}

/// The authoritative, store-owned fault-injection policy record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultInjectionPolicy {
    pub metadata: PolicyMetadata,
    pub spec: PolicySpec,
}

impl FaultInjectionPolicy {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// SHA-256 over the canonical (key-sorted) JSON form, ignoring the
    /// store-assigned `revision` so unrelated revision bumps don't cause the
    /// Distributor to treat a byte-identical policy as changed.
    pub fn content_hash(&self) -> String {
        let mut clone = self.clone();
        clone.metadata.revision = None;
        compute_canonical_hash(&clone)
    }

    /// Validate the full invariant set, normalizing wildcard selector
    /// fields in place. Collects every violation rather than failing on
    /// the first.
    pub fn validate_and_normalize(&mut self) -> Result<(), DomainError> {
        let mut errors = Vec::new();

        if self.metadata.name.trim().is_empty() {
            errors.push(DomainError::EmptyName.to_string());
        }

        self.spec.selector.normalize();

        if self.spec.rules.is_empty() {
            errors.push(DomainError::NoRules.to_string());
        }

        for (i, rule) in self.spec.rules.iter().enumerate() {
            if let Err(e) = rule.validate(&self.metadata.name, i) {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Multiple(errors))
        }
    }
}

/// The fault a Recommender trial proposes to apply, bundled with the
/// selector it should target. Built fresh per trial, never persisted
/// directly — the Executor Client wraps it in a full [`FaultInjectionPolicy`]
/// before submitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultPlan {
    pub target: Selector,
    pub rule: FaultRule,
}

impl FaultPlan {
    /// Wrap this plan in a throwaway policy named for the owning session/trial.
    pub fn into_policy(self, name: impl Into<String>) -> FaultInjectionPolicy {
        FaultInjectionPolicy {
            metadata: PolicyMetadata { name: name.into(), version: None, revision: None },
            spec: PolicySpec { selector: self.target, rules: vec![self.rule] },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_policy() -> FaultInjectionPolicy {
        FaultInjectionPolicy {
            metadata: PolicyMetadata { name: "abort-frontend".into(), version: None, revision: None },
            spec: PolicySpec {
                selector: Selector { service: "frontend".into(), namespace: "demo".into() },
                rules: vec![FaultRule {
                    match_predicate: MatchPredicate {
                        method: Some(StringMatch::Exact("GET".into())),
                        path: Some(StringMatch::Prefix("/".into())),
                        headers: Default::default(),
                    },
                    fault: FaultAction::Abort { http_status: 503 },
                    percentage: 100.0,
                    start_delay_ms: None,
                    duration_seconds: None,
                }],
            },
        }
    }

    #[test]
    fn valid_policy_passes() {
        let mut p = valid_policy();
        assert!(p.validate_and_normalize().is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let mut p = valid_policy();
        p.metadata.name.clear();
        assert!(p.validate_and_normalize().is_err());
    }

    #[test]
    fn empty_rules_rejected() {
        let mut p = valid_policy();
        p.spec.rules.clear();
        assert!(p.validate_and_normalize().is_err());
    }

    #[test]
    fn bad_http_status_rejected() {
        let mut p = valid_policy();
        p.spec.rules[0].fault = FaultAction::Abort { http_status: 99 };
        assert!(p.validate_and_normalize().is_err());
    }

    #[test]
    fn delay_over_cap_rejected() {
        let mut p = valid_policy();
        p.spec.rules[0].fault = FaultAction::Delay { fixed_delay_ms: 30_001 };
        assert!(p.validate_and_normalize().is_err());
    }

    #[test]
    fn percentage_out_of_range_rejected() {
        let mut p = valid_policy();
        p.spec.rules[0].percentage = 101.0;
        assert!(p.validate_and_normalize().is_err());
    }

    #[test]
    fn blank_selector_normalizes_to_wildcard() {
        let mut p = valid_policy();
        p.spec.selector = Selector { service: "".into(), namespace: "   ".into() };
        p.validate_and_normalize().unwrap();
        assert_eq!(p.spec.selector.service, "*");
        assert_eq!(p.spec.selector.namespace, "*");
    }

    #[test]
    fn wildcard_selector_matches_everything() {
        let sel = Selector { service: "*".into(), namespace: "*".into() };
        assert!(sel.matches("frontend", "demo"));
        assert!(sel.matches("anything", "else"));
    }

    #[test]
    fn scoped_selector_matches_only_named_identity() {
        let sel = Selector { service: "frontend".into(), namespace: "demo".into() };
        assert!(sel.matches("frontend", "demo"));
        assert!(!sel.matches("productcatalog", "demo"));
    }

    #[test]
    fn content_hash_stable_across_revision_bumps() {
        let mut a = valid_policy();
        let mut b = valid_policy();
        a.metadata.revision = Some(1);
        b.metadata.revision = Some(42);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_changes_with_rule_edit() {
        let a = valid_policy();
        let mut b = valid_policy();
        b.spec.rules[0].percentage = 50.0;
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
