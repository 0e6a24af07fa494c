use std::sync::Arc;
use std::time::Duration;

use boifi_domain::{RawObservation, SessionStatus, Trial, TrialStatus};
use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analyzer::ResponseAnalyzer;
use crate::error::RecommenderError;
use crate::executor::ExecutorClient;
use crate::optimizer::OptimizerCore;
use crate::session_manager::SessionManager;

/// Baseline/threshold figures the analyzer scores each trial's observation
/// against. Held fixed for the lifetime of a session.
#[derive(Debug, Clone, Default)]
pub struct ScoringBaseline {
    pub baseline_latency_ms: Option<f64>,
    pub threshold_latency_ms: Option<f64>,
    pub baseline_trace: Option<boifi_domain::TraceData>,
}

/// Drives one [`OptimizationSession`] end to end: propose a fault, apply it
/// and observe the result, score it, record the trial, and repeat until a
/// stop condition is reached. One `Worker::run` call owns exactly one
/// session; the caller is expected to spawn it as a background task per
/// active session.
pub struct Worker {
    session_manager: Arc<SessionManager>,
    executor: Arc<ExecutorClient>,
    analyzer: ResponseAnalyzer,
    fault_duration: Duration,
    settle_buffer: Duration,
    n_initial_cold_start: usize,
}

impl Worker {
    pub fn new(
        session_manager: Arc<SessionManager>,
        executor: Arc<ExecutorClient>,
        analyzer: ResponseAnalyzer,
        fault_duration: Duration,
        settle_buffer: Duration,
        n_initial_cold_start: usize,
    ) -> Self {
        Self { session_manager, executor, analyzer, fault_duration, settle_buffer, n_initial_cold_start }
    }

    /// Runs the trial loop for `session_id` until it stops, completes, or
    /// fails. Stop conditions (`Stopping` status, `max_trials` reached, the
    /// time budget exceeded) are only checked between trials, never inside
    /// one, so a trial already underway always finishes.
    pub async fn run(&self, session_id: Uuid, baseline: ScoringBaseline, seed: u64) -> Result<(), RecommenderError> {
        self.session_manager.transition(session_id, SessionStatus::Running).await?;
        let session = self.session_manager.get(session_id).await.ok_or(RecommenderError::SessionNotFound(session_id))?;

        let mut optimizer = OptimizerCore::new(session.service.clone(), session.search_space.clone(), self.n_initial_cold_start, seed);
        let deadline = Instant::now() + Duration::from_secs(session.time_budget_secs);

        let run_result = self.trial_loop(session_id, &mut optimizer, &baseline, deadline).await;

        match run_result {
            Ok(()) => {
                self.session_manager.transition(session_id, SessionStatus::Stopping).await.ok();
                self.session_manager.transition(session_id, SessionStatus::Completed).await?;
                info!(%session_id, "optimization session completed");
                Ok(())
            }
            Err(e) => {
                error!(%session_id, error = %e, "optimization session failed");
                self.session_manager.transition(session_id, SessionStatus::Failed).await.ok();
                Err(e)
            }
        }
    }

    async fn trial_loop(
        &self,
        session_id: Uuid,
        optimizer: &mut OptimizerCore,
        baseline: &ScoringBaseline,
        deadline: Instant,
    ) -> Result<(), RecommenderError> {
        loop {
            let current = self.session_manager.get(session_id).await.ok_or(RecommenderError::SessionNotFound(session_id))?;

            if current.status == SessionStatus::Stopping {
                return Ok(());
            }
            if current.trials.len() as u32 >= current.max_trials {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Ok(());
            }

            let plan = optimizer.propose();
            let trial_started_at = Utc::now();
            let trial_start_instant = Instant::now();

            let outcome = self
                .executor
                .apply_and_observe(&session_id.to_string(), current.trials.len() as u64, &plan, self.fault_duration, self.settle_buffer)
                .await;

            let duration_sec = trial_start_instant.elapsed().as_secs_f64();
            let trial = match outcome {
                Ok(observation) => self.score_and_build_trial(&plan, observation, baseline, optimizer, trial_started_at, duration_sec),
                Err(e) => {
                    warn!(%session_id, error = %e, "trial execution failed, recording as failed");
                    Trial {
                        trial_id: 0,
                        fault_plan: plan,
                        raw_observation: None,
                        severity_score: None,
                        timestamp: trial_started_at,
                        duration_sec,
                        status: TrialStatus::Failed,
                    }
                }
            };

            self.session_manager.record_trial(session_id, trial).await?;
        }
    }

    fn score_and_build_trial(
        &self,
        plan: &boifi_domain::FaultPlan,
        observation: RawObservation,
        baseline: &ScoringBaseline,
        optimizer: &mut OptimizerCore,
        timestamp: chrono::DateTime<Utc>,
        duration_sec: f64,
    ) -> Trial {
        let score = self.analyzer.score(
            &observation,
            baseline.baseline_latency_ms,
            baseline.threshold_latency_ms,
            baseline.baseline_trace.as_ref(),
        );
        optimizer.record(plan, score.total);
        Trial {
            trial_id: 0,
            fault_plan: plan.clone(),
            raw_observation: Some(observation),
            severity_score: Some(score),
            timestamp,
            duration_sec,
            status: TrialStatus::Success,
        }
    }
}
