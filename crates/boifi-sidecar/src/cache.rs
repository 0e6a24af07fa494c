use std::sync::{Arc, RwLock};

use boifi_domain::{EnvoyIdentity, FaultAction, FaultInjectionPolicy, FaultRule};
use tracing::warn;

const MAX_DELAY_MS: u32 = 30_000;

struct Inner {
    revision: u64,
    rules: Arc<Vec<FaultRule>>,
}

/// Per-agent derived view over the latest accepted snapshot: only the rules
/// whose policy selector matches this sidecar's identity, magnitude-clamped,
/// swapped in atomically on every new snapshot.
pub struct ConfigCache {
    identity: EnvoyIdentity,
    inner: RwLock<Inner>,
}

impl ConfigCache {
    pub fn new(identity: EnvoyIdentity) -> Self {
        Self { identity, inner: RwLock::new(Inner { revision: 0, rules: Arc::new(Vec::new()) }) }
    }

    pub fn identity(&self) -> &EnvoyIdentity {
        &self.identity
    }

    pub fn revision(&self) -> u64 {
        self.inner.read().unwrap().revision
    }

    /// A cheap `Arc` clone of the currently active rule list — safe to hold
    /// for the lifetime of one request without blocking a concurrent swap.
    pub fn active_rules(&self) -> Arc<Vec<FaultRule>> {
        self.inner.read().unwrap().rules.clone()
    }

    fn policy_applies(&self, policy: &FaultInjectionPolicy) -> bool {
        let sel = &policy.spec.selector;
        if self.identity.is_valid {
            sel.matches(&self.identity.workload_name, &self.identity.namespace)
        } else {
            sel.service == "*" && sel.namespace == "*"
        }
    }

    fn clamp(mut rule: FaultRule) -> FaultRule {
        if let FaultAction::Delay { fixed_delay_ms } = &mut rule.fault {
            if *fixed_delay_ms > MAX_DELAY_MS {
                *fixed_delay_ms = MAX_DELAY_MS;
            }
        }
        if let Some(start) = &mut rule.start_delay_ms {
            if *start > MAX_DELAY_MS {
                *start = MAX_DELAY_MS;
            }
        }
        rule
    }

    /// Parse and filter a new snapshot, atomically replacing the active
    /// rule list. A malformed rule never poisons its siblings: it's dropped
    /// with a warning and the rest of the snapshot still applies.
    pub fn on_snapshot(&self, policies: &[FaultInjectionPolicy], revision: u64) {
        if !self.identity.is_valid {
            warn!("applying only wildcard-selector policies: identity unavailable at plugin init");
        }

        let mut rules = Vec::new();
        for policy in policies {
            if !self.policy_applies(policy) {
                continue;
            }
            for rule in &policy.spec.rules {
                if rule.percentage.is_nan() {
                    warn!(policy = %policy.name(), "dropping rule with NaN percentage");
                    continue;
                }
                rules.push(Self::clamp(rule.clone()));
            }
        }

        let mut guard = self.inner.write().unwrap();
        guard.rules = Arc::new(rules);
        guard.revision = revision;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boifi_domain::{MatchPredicate, PolicyMetadata, PolicySpec, Selector};

    fn policy(name: &str, service: &str, delay_ms: u32) -> FaultInjectionPolicy {
        FaultInjectionPolicy {
            metadata: PolicyMetadata { name: name.to_string(), version: None, revision: None },
            spec: PolicySpec {
                selector: Selector { service: service.to_string(), namespace: "*".to_string() },
                rules: vec![FaultRule {
                    match_predicate: MatchPredicate::default(),
                    fault: FaultAction::Delay { fixed_delay_ms: delay_ms },
                    percentage: 100.0,
                    start_delay_ms: None,
                    duration_seconds: None,
                }],
            },
        }
    }

    #[test]
    fn matching_identity_pulls_in_scoped_policy() {
        let cache = ConfigCache::new(EnvoyIdentity::new("checkout", "prod", None));
        cache.on_snapshot(&[policy("p1", "checkout", 100)], 1);
        assert_eq!(cache.active_rules().len(), 1);
        assert_eq!(cache.revision(), 1);
    }

    #[test]
    fn non_matching_identity_drops_scoped_policy() {
        let cache = ConfigCache::new(EnvoyIdentity::new("other-service", "prod", None));
        cache.on_snapshot(&[policy("p1", "checkout", 100)], 1);
        assert_eq!(cache.active_rules().len(), 0);
    }

    #[test]
    fn invalid_identity_only_retains_wildcard_policies() {
        let cache = ConfigCache::new(EnvoyIdentity::invalid());
        cache.on_snapshot(&[policy("scoped", "checkout", 100), policy("wild", "*", 100)], 1);
        assert_eq!(cache.active_rules().len(), 1);
    }

    #[test]
    fn delay_above_cap_is_clamped() {
        let cache = ConfigCache::new(EnvoyIdentity::new("checkout", "prod", None));
        cache.on_snapshot(&[policy("p1", "checkout", 50_000)], 1);
        let rules = cache.active_rules();
        match rules[0].fault {
            FaultAction::Delay { fixed_delay_ms } => assert_eq!(fixed_delay_ms, MAX_DELAY_MS),
            _ => panic!("expected Delay"),
        }
    }

    #[test]
    fn snapshot_swap_is_atomic_between_reads() {
        let cache = ConfigCache::new(EnvoyIdentity::new("checkout", "prod", None));
        cache.on_snapshot(&[policy("p1", "checkout", 100)], 1);
        let held = cache.active_rules();
        cache.on_snapshot(&[policy("p2", "checkout", 200)], 2);
        // The handle taken before the swap still sees the old list.
        assert_eq!(held.len(), 1);
        assert_eq!(cache.active_rules().len(), 1);
        assert_eq!(cache.revision(), 2);
    }
}
