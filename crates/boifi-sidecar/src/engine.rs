use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use boifi_domain::{compute_canonical_hash, FaultAction, FaultRule};
use tracing::debug;

use crate::cache::ConfigCache;
use crate::host::{Host, TimerId};
use crate::matcher::first_match;
use crate::rng::Xorshift64Star;

/// What a rule is waiting on before it can be activated or resumed.
#[derive(Debug, Clone)]
enum Phase {
    StartDelay,
    Delay { started_at_ms: u64 },
}

/// Opaque state a caller holds between `on_request_headers` returning
/// `Paused` and the matching `on_timer_fire`. At-most-one outstanding timer
/// per request, matching the at-most-once resume invariant.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    phase: Phase,
    rule: FaultRule,
    pub timer: TimerId,
}

#[derive(Debug)]
pub enum RequestOutcome {
    Passthrough,
    Aborted,
    Resumed,
    Paused(PendingRequest),
}

/// Per-request state machine: `INIT -> MATCH -> DECIDE ->
/// [PENDING_START_DELAY?] -> [PENDING_DELAY?] -> EMIT_ABORT | RESUME |
/// PASSTHROUGH -> TERMINAL`. One `EnforcementEngine` is shared by every
/// in-flight request in a VM; the only state carried between requests is
/// the identity-filtered rule list (via [`ConfigCache`]) and, per rule, the
/// `first_seen` timestamp used for duration-based expiration.
pub struct EnforcementEngine {
    cache: Arc<ConfigCache>,
    rng: Mutex<Xorshift64Star>,
    first_seen_ms: Mutex<HashMap<String, u64>>,
}

impl EnforcementEngine {
    pub fn new(cache: Arc<ConfigCache>, rng_seed: u64) -> Self {
        Self { cache, rng: Mutex::new(Xorshift64Star::new(rng_seed)), first_seen_ms: Mutex::new(HashMap::new()) }
    }

    /// `INIT -> MATCH -> DECIDE`. Draws the per-request sample exactly once
    /// and checks it against `rule.percentage` exactly once: a second check
    /// would compound to `p^2`.
    pub fn on_request_headers(
        &self,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        host: &mut dyn Host,
    ) -> RequestOutcome {
        let rules = self.cache.active_rules();
        let rule = match first_match(&rules, method, path, headers) {
            Some(r) => r.clone(),
            None => return RequestOutcome::Passthrough,
        };

        let sample = self.rng.lock().unwrap().uniform_percentage();
        if sample >= rule.percentage {
            return RequestOutcome::Passthrough;
        }

        let now = host.now_millis();
        if let Some(duration_secs) = rule.duration_seconds {
            let key = compute_canonical_hash(&rule);
            let first_seen = {
                let mut seen = self.first_seen_ms.lock().unwrap();
                *seen.entry(key).or_insert(now)
            };
            if now.saturating_sub(first_seen) >= duration_secs.saturating_mul(1000) {
                return RequestOutcome::Passthrough;
            }
        }

        match rule.start_delay_ms {
            Some(start_delay) if start_delay > 0 => {
                let timer = host.schedule_timer(start_delay);
                RequestOutcome::Paused(PendingRequest { phase: Phase::StartDelay, rule, timer })
            }
            _ => self.activate(rule, host),
        }
    }

    fn activate(&self, rule: FaultRule, host: &mut dyn Host) -> RequestOutcome {
        match rule.fault {
            FaultAction::Abort { http_status } => {
                host.send_abort(http_status);
                host.increment_aborts();
                debug!(http_status, "fault injected: abort");
                RequestOutcome::Aborted
            }
            FaultAction::Delay { fixed_delay_ms } => {
                let clamped = fixed_delay_ms.min(30_000);
                let timer = host.schedule_timer(clamped);
                let started_at_ms = host.now_millis();
                RequestOutcome::Paused(PendingRequest { phase: Phase::Delay { started_at_ms }, rule, timer })
            }
        }
    }

    /// Fires on timer callback, at-most-once per `PendingRequest`.
    pub fn on_timer_fire(&self, pending: PendingRequest, host: &mut dyn Host) -> RequestOutcome {
        match pending.phase {
            Phase::StartDelay => self.activate(pending.rule, host),
            Phase::Delay { started_at_ms } => {
                host.resume_request();
                let duration_ms = host.now_millis().saturating_sub(started_at_ms);
                host.record_delay_duration(duration_ms);
                host.increment_delays();
                debug!(duration_ms, "fault injected: delay resumed");
                RequestOutcome::Resumed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boifi_domain::{EnvoyIdentity, FaultInjectionPolicy, MatchPredicate, PolicyMetadata, PolicySpec, Selector};
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingHost {
        clock_ms: u64,
        timers: RefCell<Vec<u32>>,
        aborts: u64,
        delays: u64,
        last_abort_status: Option<u32>,
        resumed: bool,
        recorded_delay_ms: Option<u64>,
    }

    impl Host for RecordingHost {
        fn now_millis(&self) -> u64 {
            self.clock_ms
        }
        fn schedule_timer(&mut self, delay_ms: u32) -> TimerId {
            self.timers.borrow_mut().push(delay_ms);
            TimerId(self.timers.borrow().len() as u64)
        }
        fn send_abort(&mut self, http_status: u32) {
            self.last_abort_status = Some(http_status);
        }
        fn resume_request(&mut self) {
            self.resumed = true;
        }
        fn increment_aborts(&mut self) {
            self.aborts += 1;
        }
        fn increment_delays(&mut self) {
            self.delays += 1;
        }
        fn record_delay_duration(&mut self, duration_ms: u64) {
            self.recorded_delay_ms = Some(duration_ms);
        }
    }

    fn abort_policy(percentage: f64) -> FaultInjectionPolicy {
        FaultInjectionPolicy {
            metadata: PolicyMetadata { name: "p".into(), version: None, revision: None },
            spec: PolicySpec {
                selector: Selector::default(),
                rules: vec![FaultRule {
                    match_predicate: MatchPredicate::default(),
                    fault: FaultAction::Abort { http_status: 503 },
                    percentage,
                    start_delay_ms: None,
                    duration_seconds: None,
                }],
            },
        }
    }

    fn engine_with(policy: FaultInjectionPolicy, seed: u64) -> EnforcementEngine {
        let cache = Arc::new(ConfigCache::new(EnvoyIdentity::new("svc", "ns", None)));
        cache.on_snapshot(&[policy], 1);
        EnforcementEngine::new(Arc::new(cache), seed)
    }

    #[test]
    fn full_percentage_always_activates() {
        let engine = engine_with(abort_policy(100.0), 123);
        let mut host = RecordingHost::default();
        let outcome = engine.on_request_headers("GET", "/x", &[], &mut host);
        assert!(matches!(outcome, RequestOutcome::Aborted));
        assert_eq!(host.last_abort_status, Some(503));
        assert_eq!(host.aborts, 1);
    }

    #[test]
    fn zero_percentage_never_activates() {
        let engine = engine_with(abort_policy(0.0), 123);
        let mut host = RecordingHost::default();
        let outcome = engine.on_request_headers("GET", "/x", &[], &mut host);
        assert!(matches!(outcome, RequestOutcome::Passthrough));
    }

    #[test]
    fn start_delay_pauses_then_activates_on_timer() {
        let mut policy = abort_policy(100.0);
        policy.spec.rules[0].start_delay_ms = Some(50);
        let engine = engine_with(policy, 7);
        let mut host = RecordingHost::default();

        let outcome = engine.on_request_headers("GET", "/x", &[], &mut host);
        let pending = match outcome {
            RequestOutcome::Paused(p) => p,
            other => panic!("expected Paused, got {other:?}"),
        };
        assert_eq!(*host.timers.borrow(), vec![50]);

        let outcome = engine.on_timer_fire(pending, &mut host);
        assert!(matches!(outcome, RequestOutcome::Aborted));
        assert_eq!(host.aborts, 1);
    }

    #[test]
    fn delay_fault_resumes_and_records_duration() {
        let mut policy = abort_policy(100.0);
        policy.spec.rules[0].fault = FaultAction::Delay { fixed_delay_ms: 200 };
        let engine = engine_with(policy, 7);
        let mut host = RecordingHost { clock_ms: 1_000, ..Default::default() };

        let outcome = engine.on_request_headers("GET", "/x", &[], &mut host);
        let pending = match outcome {
            RequestOutcome::Paused(p) => p,
            other => panic!("expected Paused, got {other:?}"),
        };

        host.clock_ms = 1_200;
        let outcome = engine.on_timer_fire(pending, &mut host);
        assert!(matches!(outcome, RequestOutcome::Resumed));
        assert!(host.resumed);
        assert_eq!(host.recorded_delay_ms, Some(200));
        assert_eq!(host.delays, 1);
    }

    #[test]
    fn no_matching_rule_is_passthrough() {
        let engine = engine_with(abort_policy(0.0), 1);
        let mut host = RecordingHost::default();
        let outcome = engine.on_request_headers("GET", "/nomatch", &[], &mut host);
        assert!(matches!(outcome, RequestOutcome::Passthrough));
    }

    #[test]
    fn expired_rule_passes_through() {
        let mut policy = abort_policy(100.0);
        policy.spec.rules[0].duration_seconds = Some(10);
        let engine = engine_with(policy, 9);
        let mut first_host = RecordingHost { clock_ms: 0, ..Default::default() };
        let first = engine.on_request_headers("GET", "/x", &[], &mut first_host);
        assert!(matches!(first, RequestOutcome::Aborted));

        let mut later_host = RecordingHost { clock_ms: 11_000, ..Default::default() };
        let later = engine.on_request_headers("GET", "/x", &[], &mut later_host);
        assert!(matches!(later, RequestOutcome::Passthrough));
    }
}
