use std::collections::HashMap;

use boifi_domain::{Dimension, DimensionKind, FaultAction, FaultPlan, FaultRule, MatchPredicate, SearchSpaceConfig, Selector};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// `UNINITIALIZED -> COLD_START -> WARM`. `ColdStart` ends once `n_initial`
/// records have landed; the transition is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerPhase {
    Uninitialized,
    ColdStart,
    Warm,
}

#[derive(Debug, Clone, PartialEq)]
enum DimValue {
    Categorical(String),
    Real(f64),
    Integer(i64),
}

/// A candidate point in the search space, one value per dimension.
type Point = HashMap<String, DimValue>;

/// Per-dimension Latin-hypercube-style stratum permutation, computed once
/// so the first `n_initial` proposals cover the space without repeats.
struct Strata {
    order: Vec<usize>,
}

fn build_strata(rng: &mut StdRng, n_initial: usize) -> Strata {
    let mut order: Vec<usize> = (0..n_initial.max(1)).collect();
    order.shuffle(rng);
    Strata { order }
}

fn sample_cold_start_dim(dim: &Dimension, strata: &Strata, trial_index: usize, rng: &mut StdRng) -> DimValue {
    let n = strata.order.len().max(1);
    let stratum = strata.order[trial_index % strata.order.len()];
    match &dim.kind {
        DimensionKind::Categorical { values } => {
            let idx = stratum % values.len().max(1);
            DimValue::Categorical(values.get(idx).cloned().unwrap_or_default())
        }
        DimensionKind::Real { min, max } => {
            let width = (max - min) / n as f64;
            let low = min + width * stratum as f64;
            DimValue::Real(rng.gen_range(low..(low + width).max(low + f64::EPSILON)))
        }
        DimensionKind::Integer { min, max } => {
            let span = (max - min + 1).max(1);
            let width = span as f64 / n as f64;
            let low = *min + (width * stratum as f64) as i64;
            let high = (*min + (width * (stratum as f64 + 1.0)) as i64).min(*max).max(low);
            DimValue::Integer(rng.gen_range(low..=high))
        }
    }
}

fn sample_random_dim(dim: &Dimension, rng: &mut StdRng) -> DimValue {
    match &dim.kind {
        DimensionKind::Categorical { values } => {
            DimValue::Categorical(values.choose(rng).cloned().unwrap_or_default())
        }
        DimensionKind::Real { min, max } => DimValue::Real(rng.gen_range(*min..=*max)),
        DimensionKind::Integer { min, max } => DimValue::Integer(rng.gen_range(*min..=*max)),
    }
}

fn dim_as_f64(v: &DimValue) -> f64 {
    match v {
        DimValue::Real(x) => *x,
        DimValue::Integer(x) => *x as f64,
        DimValue::Categorical(s) => s.len() as f64, // crude but stable numeric proxy for splitting
    }
}

/// A shallow regression tree over the point's numeric feature vector, fit
/// on a bootstrap resample. One leaf's prediction is the mean label of the
/// training rows that reach it.
struct Tree {
    // Recursive split: (feature_index, threshold, left, right) or a leaf mean.
    root: Node,
}

enum Node {
    Leaf(f64),
    Split { feature: usize, threshold: f64, left: Box<Node>, right: Box<Node> },
}

const MAX_DEPTH: usize = 4;
const MIN_LEAF: usize = 2;

fn mean(ys: &[f64]) -> f64 {
    if ys.is_empty() {
        0.0
    } else {
        ys.iter().sum::<f64>() / ys.len() as f64
    }
}

fn variance(ys: &[f64]) -> f64 {
    if ys.len() < 2 {
        return 0.0;
    }
    let m = mean(ys);
    ys.iter().map(|y| (y - m).powi(2)).sum::<f64>() / ys.len() as f64
}

fn build_node(rows: &[(Vec<f64>, f64)], depth: usize, rng: &mut StdRng) -> Node {
    let ys: Vec<f64> = rows.iter().map(|(_, y)| *y).collect();
    if depth >= MAX_DEPTH || rows.len() < MIN_LEAF * 2 || variance(&ys) < 1e-9 {
        return Node::Leaf(mean(&ys));
    }

    let n_features = rows[0].0.len();
    if n_features == 0 {
        return Node::Leaf(mean(&ys));
    }
    let feature = rng.gen_range(0..n_features);
    let mut values: Vec<f64> = rows.iter().map(|(x, _)| x[feature]).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let threshold = values[values.len() / 2];

    let (left_rows, right_rows): (Vec<_>, Vec<_>) =
        rows.iter().cloned().partition(|(x, _)| x[feature] <= threshold);

    if left_rows.is_empty() || right_rows.is_empty() {
        return Node::Leaf(mean(&ys));
    }

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_node(&left_rows, depth + 1, rng)),
        right: Box::new(build_node(&right_rows, depth + 1, rng)),
    }
}

impl Tree {
    fn fit(rows: &[(Vec<f64>, f64)], rng: &mut StdRng) -> Self {
        // Bootstrap resample.
        let resampled: Vec<(Vec<f64>, f64)> =
            (0..rows.len()).map(|_| rows[rng.gen_range(0..rows.len())].clone()).collect();
        Tree { root: build_node(&resampled, 0, rng) }
    }

    fn predict(&self, x: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(v) => return *v,
                Node::Split { feature, threshold, left, right } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

const N_TREES: usize = 25;

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Abramowitz & Stegun approximation; accurate to ~1.5e-7, plenty for EI
/// ranking where only relative order matters.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

/// Expected Improvement for a minimizing objective: lower `mu` is better,
/// `f_best` is the best (lowest) objective observed so far.
fn expected_improvement(mu: f64, sigma: f64, f_best: f64) -> f64 {
    if sigma <= 1e-9 {
        return 0.0;
    }
    let z = (f_best - mu) / sigma;
    (f_best - mu) * normal_cdf(z) + sigma * normal_pdf(z)
}

/// `propose() -> FaultPlan`: space-filling samples for the first
/// `n_initial` trials, then a forest-surrogate + Expected-Improvement
/// search thereafter. `record()`/`get_best()` operate on the
/// user-facing (non-negated) severity score; internally the surrogate is
/// trained on negated scores because it's built to minimize (see
/// `DESIGN.md`'s sign-convention note on this double negation).
pub struct OptimizerCore {
    search_space: SearchSpaceConfig,
    service: String,
    n_initial: usize,
    phase: OptimizerPhase,
    history: Vec<(Point, f64)>, // score is the true (non-negated) severity
    strata: Strata,
    rng: StdRng,
}

impl OptimizerCore {
    pub fn new(service: impl Into<String>, search_space: SearchSpaceConfig, n_initial: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let strata = build_strata(&mut rng, n_initial.max(1));
        Self {
            search_space,
            service: service.into(),
            n_initial: n_initial.max(1),
            phase: OptimizerPhase::Uninitialized,
            history: Vec::new(),
            strata,
            rng,
        }
    }

    pub fn phase(&self) -> OptimizerPhase {
        self.phase
    }

    pub fn propose(&mut self) -> FaultPlan {
        if self.phase == OptimizerPhase::Uninitialized {
            self.phase = OptimizerPhase::ColdStart;
        }

        let point = if self.history.len() < self.n_initial {
            let dims = self.search_space.dimensions.clone();
            let trial_index = self.history.len();
            dims.iter()
                .map(|d| (d.name.clone(), sample_cold_start_dim(d, &self.strata, trial_index, &mut self.rng)))
                .collect()
        } else {
            self.propose_via_surrogate()
        };

        point_to_fault_plan(&self.service, &point)
    }

    fn propose_via_surrogate(&mut self) -> Point {
        if self.search_space.dimensions.is_empty() {
            return Point::new();
        }

        let rows: Vec<(Vec<f64>, f64)> = self
            .history
            .iter()
            .map(|(point, score)| (point_to_features(&self.search_space, point), -score))
            .collect();

        let forest: Vec<Tree> = (0..N_TREES).map(|_| Tree::fit(&rows, &mut self.rng)).collect();
        let f_best = rows.iter().map(|(_, y)| *y).fold(f64::INFINITY, f64::min);

        let dims = self.search_space.dimensions.clone();
        let mut best_point = None;
        let mut best_ei = f64::NEG_INFINITY;
        for _ in 0..100 {
            let candidate: Point =
                dims.iter().map(|d| (d.name.clone(), sample_random_dim(d, &mut self.rng))).collect();
            let features = point_to_features(&self.search_space, &candidate);
            let preds: Vec<f64> = forest.iter().map(|t| t.predict(&features)).collect();
            let mu = mean(&preds);
            let sigma = variance(&preds).sqrt();
            let ei = expected_improvement(mu, sigma, f_best);
            if ei > best_ei {
                best_ei = ei;
                best_point = Some(candidate);
            }
        }
        best_point.unwrap_or_default()
    }

    /// Records the observed (non-negated) severity for the point `plan`
    /// was derived from. Must be called with the exact point `propose()`
    /// last returned, reconstructed by re-deriving it from `plan`.
    pub fn record(&mut self, plan: &FaultPlan, score: f64) {
        let point = fault_plan_to_point(&self.search_space, plan);
        self.history.push((point, score));
        if self.phase == OptimizerPhase::ColdStart && self.history.len() >= self.n_initial {
            self.phase = OptimizerPhase::Warm;
        }
    }

    pub fn get_best(&self) -> Option<(FaultPlan, f64)> {
        self.history
            .iter()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .map(|(point, score)| (point_to_fault_plan(&self.service, point), *score))
    }
}

fn point_to_features(space: &SearchSpaceConfig, point: &Point) -> Vec<f64> {
    space.dimensions.iter().map(|d| point.get(&d.name).map(dim_as_f64).unwrap_or(0.0)).collect()
}

fn dim_value_str(v: &DimValue) -> String {
    match v {
        DimValue::Categorical(s) => s.clone(),
        DimValue::Real(x) => x.to_string(),
        DimValue::Integer(x) => x.to_string(),
    }
}

/// Reserved dimension names the Optimizer understands when mapping a point
/// to a concrete fault. Any dimension outside this set is accepted but has
/// no effect on the resulting `FaultPlan` — conditional dimensions stay
/// inert rather than erroring.
fn point_to_fault_plan(service: &str, point: &Point) -> FaultPlan {
    let fault_type = point.get("fault_type").map(dim_value_str).unwrap_or_else(|| "abort".to_string());
    let percentage = match point.get("percentage") {
        Some(v) => dim_as_f64(v).clamp(0.0, 100.0),
        None => 100.0,
    };
    let start_delay_ms = point.get("start_delay_ms").map(|v| dim_as_f64(v).max(0.0) as u32);
    let duration_seconds = point.get("duration_seconds").map(|v| dim_as_f64(v).max(0.0) as u64);

    let fault = if fault_type == "delay" {
        let fixed_delay_ms = point.get("fixed_delay_ms").map(|v| dim_as_f64(v).clamp(0.0, 30_000.0) as u32).unwrap_or(1_000);
        FaultAction::Delay { fixed_delay_ms }
    } else {
        let http_status = point.get("http_status").map(|v| dim_as_f64(v).clamp(100.0, 599.0) as u32).unwrap_or(503);
        FaultAction::Abort { http_status }
    };

    FaultPlan {
        target: Selector { service: service.to_string(), namespace: "*".to_string() },
        rule: FaultRule { match_predicate: MatchPredicate::default(), fault, percentage, start_delay_ms, duration_seconds },
    }
}

fn fault_plan_to_point(space: &SearchSpaceConfig, plan: &FaultPlan) -> Point {
    let mut point = Point::new();
    for d in &space.dimensions {
        let value = match d.name.as_str() {
            "fault_type" => DimValue::Categorical(plan.rule.fault.kind().to_string()),
            "percentage" => DimValue::Real(plan.rule.percentage),
            "start_delay_ms" => DimValue::Integer(plan.rule.start_delay_ms.unwrap_or(0) as i64),
            "duration_seconds" => DimValue::Integer(plan.rule.duration_seconds.unwrap_or(0) as i64),
            "http_status" => match plan.rule.fault {
                FaultAction::Abort { http_status } => DimValue::Integer(http_status as i64),
                _ => DimValue::Integer(0),
            },
            "fixed_delay_ms" => match plan.rule.fault {
                FaultAction::Delay { fixed_delay_ms } => DimValue::Integer(fixed_delay_ms as i64),
                _ => DimValue::Integer(0),
            },
            _ => continue,
        };
        point.insert(d.name.clone(), value);
    }
    point
}

#[cfg(test)]
mod tests {
    use super::*;
    use boifi_domain::Dimension;

    fn space() -> SearchSpaceConfig {
        SearchSpaceConfig {
            dimensions: vec![
                Dimension { name: "fault_type".into(), kind: DimensionKind::Categorical { values: vec!["abort".into(), "delay".into()] } },
                Dimension { name: "percentage".into(), kind: DimensionKind::Real { min: 0.0, max: 100.0 } },
                Dimension { name: "http_status".into(), kind: DimensionKind::Integer { min: 400, max: 599 } },
            ],
        }
    }

    #[test]
    fn starts_uninitialized_then_moves_to_cold_start_on_first_propose() {
        let mut opt = OptimizerCore::new("svc", space(), 3, 1);
        assert_eq!(opt.phase(), OptimizerPhase::Uninitialized);
        let _ = opt.propose();
        assert_eq!(opt.phase(), OptimizerPhase::ColdStart);
    }

    #[test]
    fn cold_start_proposals_stay_within_bounds() {
        let mut opt = OptimizerCore::new("svc", space(), 5, 2);
        for _ in 0..5 {
            let plan = opt.propose();
            assert!(plan.rule.percentage >= 0.0 && plan.rule.percentage <= 100.0);
            opt.record(&plan, 1.0);
        }
    }

    #[test]
    fn phase_moves_to_warm_after_n_initial_records() {
        let mut opt = OptimizerCore::new("svc", space(), 2, 3);
        let p1 = opt.propose();
        opt.record(&p1, 4.0);
        assert_eq!(opt.phase(), OptimizerPhase::ColdStart);
        let p2 = opt.propose();
        opt.record(&p2, 6.0);
        assert_eq!(opt.phase(), OptimizerPhase::Warm);
    }

    #[test]
    fn get_best_tracks_true_argmax_despite_internal_negation() {
        let mut opt = OptimizerCore::new("svc", space(), 2, 4);
        let p1 = opt.propose();
        opt.record(&p1, 2.0);
        let p2 = opt.propose();
        opt.record(&p2, 9.0);
        let (_, best_score) = opt.get_best().unwrap();
        assert_eq!(best_score, 9.0);
    }

    #[test]
    fn warm_phase_proposals_still_produce_valid_plans() {
        let mut opt = OptimizerCore::new("svc", space(), 3, 5);
        for i in 0..6 {
            let plan = opt.propose();
            opt.record(&plan, (i % 4) as f64);
        }
        let plan = opt.propose();
        assert!(plan.rule.percentage >= 0.0 && plan.rule.percentage <= 100.0);
    }
}
