use std::panic::{catch_unwind, AssertUnwindSafe};

use boifi_domain::{RawObservation, SeverityScore, TraceData};
use chrono::Utc;
use tracing::warn;

/// Three independent [0,10] scorers plus a normalized weighted total. Each
/// scorer is pure and stateless; a panicking scorer never takes the whole
/// analysis down with it (see [`run_scorer`]).
pub struct ResponseAnalyzer {
    bug_weight: f64,
    performance_weight: f64,
    structure_weight: f64,
}

impl Default for ResponseAnalyzer {
    fn default() -> Self {
        Self { bug_weight: 1.0, performance_weight: 1.0, structure_weight: 1.0 }
    }
}

impl ResponseAnalyzer {
    pub fn new(bug_weight: f64, performance_weight: f64, structure_weight: f64) -> Self {
        Self { bug_weight, performance_weight, structure_weight }
    }

    pub fn score(
        &self,
        observation: &RawObservation,
        baseline_latency_ms: Option<f64>,
        threshold_latency_ms: Option<f64>,
        baseline_trace: Option<&TraceData>,
    ) -> SeverityScore {
        let bug = run_scorer("bug", || score_bug(observation));
        let performance = run_scorer("performance", || {
            score_performance(observation.latency_ms, baseline_latency_ms, threshold_latency_ms)
        });
        let structure =
            run_scorer("structure", || score_structure(observation.trace_data.as_ref(), baseline_trace));

        let weight_sum = self.bug_weight + self.performance_weight + self.structure_weight;
        let total = if weight_sum > 0.0 {
            ((bug * self.bug_weight) + (performance * self.performance_weight) + (structure * self.structure_weight))
                / weight_sum
        } else {
            0.0
        }
        .clamp(0.0, 10.0);

        SeverityScore {
            bug,
            performance,
            structure,
            total,
            components: [("bug".to_string(), bug), ("performance".to_string(), performance), ("structure".to_string(), structure)]
                .into_iter()
                .collect(),
            timestamp: Utc::now(),
        }
    }
}

/// Runs a scorer closure, catching any panic and falling back to 0.0 so one
/// broken scorer never blocks the others or the overall trial.
fn run_scorer(name: &str, f: impl FnOnce() -> f64) -> f64 {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => v.clamp(0.0, 10.0),
        Err(_) => {
            warn!(scorer = name, "scorer panicked, defaulting to 0.0");
            0.0
        }
    }
}

/// Priority-first match over status code, logs, and error rate. The first
/// condition that applies wins; nothing lower in the list is consulted.
fn score_bug(observation: &RawObservation) -> f64 {
    if let Some(status) = observation.status_code {
        if (500..600).contains(&status) {
            return 10.0;
        }
        if (400..500).contains(&status) {
            return 8.0;
        }
    }
    if observation.logs.iter().any(|line| line.contains("ERROR")) {
        return 6.0;
    }
    if observation.error_rate.unwrap_or(0.0) > 0.0 {
        return 3.0;
    }
    0.0
}

/// Linear ramp between baseline and threshold latency; above threshold is
/// maximally bad, below baseline is no regression at all.
fn score_performance(latency_ms: Option<f64>, baseline_ms: Option<f64>, threshold_ms: Option<f64>) -> f64 {
    let (latency, baseline, threshold) = match (latency_ms, baseline_ms, threshold_ms) {
        (Some(l), Some(b), Some(t)) => (l, b, t),
        _ => return 0.0,
    };
    if latency > threshold {
        return 10.0;
    }
    if latency < baseline {
        return 0.0;
    }
    if (threshold - baseline).abs() < f64::EPSILON {
        return 0.0;
    }
    (9.0 * (latency - baseline) / (threshold - baseline)).clamp(0.0, 10.0)
}

/// Takes the max of four independent structural-drift signals rather than
/// summing them, so one severe change dominates instead of being diluted by
/// several mild ones.
fn score_structure(current: Option<&TraceData>, baseline: Option<&TraceData>) -> f64 {
    let (current, baseline) = match (current, baseline) {
        (Some(c), Some(b)) => (c, b),
        _ => return 0.0,
    };

    let mut worst: f64 = 0.0;

    if !baseline.spans.is_empty() {
        let growth = current.spans.len() as f64 / baseline.spans.len() as f64 - 1.0;
        if growth > 0.5 {
            worst = worst.max(3.0);
        }
    }

    let current_ops: Vec<&str> = current.spans.iter().map(|s| s.operation_name.as_str()).collect();
    let baseline_ops: Vec<&str> = baseline.spans.iter().map(|s| s.operation_name.as_str()).collect();
    if levenshtein(&current_ops, &baseline_ops) > 2 {
        worst = worst.max(5.0);
    }

    if current.spans.iter().any(|s| s.is_error) {
        worst = worst.max(2.0);
    }

    let baseline_by_op: std::collections::HashMap<&str, f64> =
        baseline.spans.iter().map(|s| (s.operation_name.as_str(), s.duration_ms)).collect();
    let duration_spike = current.spans.iter().any(|s| {
        baseline_by_op
            .get(s.operation_name.as_str())
            .is_some_and(|&b| b > 0.0 && s.duration_ms > b * 5.0)
    });
    if duration_spike {
        worst = worst.max(2.0);
    }

    worst
}

/// Classic edit-distance DP over the operation-name sequence. No crate in
/// the workspace provides this; it's a few dozen lines and doesn't warrant
/// pulling one in.
fn levenshtein(a: &[&str], b: &[&str]) -> usize {
    let (n, m) = (a.len(), b.len());
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];
    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            curr[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1]
            } else {
                1 + prev[j - 1].min(prev[j]).min(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

#[cfg(test)]
mod tests {
    use super::*;
    use boifi_domain::TraceSpan;

    fn observation(status: Option<u16>, logs: Vec<&str>, error_rate: Option<f64>) -> RawObservation {
        RawObservation {
            status_code: status,
            latency_ms: None,
            error_rate,
            headers: Default::default(),
            logs: logs.into_iter().map(String::from).collect(),
            trace_data: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn server_error_status_scores_maximally() {
        assert_eq!(score_bug(&observation(Some(503), vec![], None)), 10.0);
    }

    #[test]
    fn client_error_outranks_log_error() {
        assert_eq!(score_bug(&observation(Some(404), vec!["ERROR: boom"], None)), 8.0);
    }

    #[test]
    fn log_error_outranks_nonzero_error_rate() {
        assert_eq!(score_bug(&observation(None, vec!["ERROR: boom"], Some(0.5))), 6.0);
    }

    #[test]
    fn clean_response_scores_zero() {
        assert_eq!(score_bug(&observation(Some(200), vec![], Some(0.0))), 0.0);
    }

    #[test]
    fn latency_above_threshold_is_maximal() {
        assert_eq!(score_performance(Some(500.0), Some(100.0), Some(300.0)), 10.0);
    }

    #[test]
    fn latency_below_baseline_is_zero() {
        assert_eq!(score_performance(Some(50.0), Some(100.0), Some(300.0)), 0.0);
    }

    #[test]
    fn latency_between_baseline_and_threshold_ramps_linearly() {
        let score = score_performance(Some(200.0), Some(100.0), Some(300.0));
        assert!((score - 4.5).abs() < 1e-9);
    }

    #[test]
    fn missing_performance_inputs_score_zero() {
        assert_eq!(score_performance(None, Some(100.0), Some(300.0)), 0.0);
    }

    fn span(op: &str, duration_ms: f64, is_error: bool) -> TraceSpan {
        TraceSpan { span_id: op.into(), parent_span_id: None, operation_name: op.into(), duration_ms, is_error }
    }

    #[test]
    fn missing_trace_scores_zero() {
        assert_eq!(score_structure(None, None), 0.0);
    }

    #[test]
    fn error_span_scores_at_least_two() {
        let baseline = TraceData { trace_id: "t".into(), spans: vec![span("a", 10.0, false)] };
        let current = TraceData { trace_id: "t".into(), spans: vec![span("a", 10.0, true)] };
        assert_eq!(score_structure(Some(&current), Some(&baseline)), 2.0);
    }

    #[test]
    fn duration_spike_scores_at_least_two() {
        let baseline = TraceData { trace_id: "t".into(), spans: vec![span("a", 10.0, false)] };
        let current = TraceData { trace_id: "t".into(), spans: vec![span("a", 100.0, false)] };
        assert_eq!(score_structure(Some(&current), Some(&baseline)), 2.0);
    }

    #[test]
    fn reordered_operation_sequence_scores_five() {
        let baseline =
            TraceData { trace_id: "t".into(), spans: vec![span("a", 1.0, false), span("b", 1.0, false), span("c", 1.0, false)] };
        let current =
            TraceData { trace_id: "t".into(), spans: vec![span("x", 1.0, false), span("y", 1.0, false), span("z", 1.0, false)] };
        assert_eq!(score_structure(Some(&current), Some(&baseline)), 5.0);
    }

    #[test]
    fn panicking_scorer_defaults_to_zero() {
        let score = run_scorer("boom", || panic!("scorer exploded"));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn total_is_normalized_weighted_mean() {
        let analyzer = ResponseAnalyzer::new(1.0, 1.0, 1.0);
        let obs = observation(Some(503), vec![], None);
        let score = analyzer.score(&obs, None, None, None);
        assert_eq!(score.bug, 10.0);
        assert_eq!(score.performance, 0.0);
        assert_eq!(score.structure, 0.0);
        assert!((score.total - 10.0 / 3.0).abs() < 1e-9);
    }
}
