use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::policy::FaultPlan;

/// One dimension of a search space, typed by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionKind {
    Categorical { values: Vec<String> },
    Real { min: f64, max: f64 },
    Integer { min: i64, max: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(flatten)]
    pub kind: DimensionKind,
}

/// A typed search space over fault parameters, at most 20 dimensions,
/// unique names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSpaceConfig {
    pub dimensions: Vec<Dimension>,
}

impl SearchSpaceConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.dimensions.len() > 20 {
            return Err(DomainError::TooManyDimensions(self.dimensions.len()));
        }
        let mut seen = HashSet::new();
        for d in &self.dimensions {
            if !seen.insert(d.name.as_str()) {
                return Err(DomainError::DuplicateDimension(d.name.clone()));
            }
            if let DimensionKind::Real { min, max } = &d.kind {
                if min >= max {
                    return Err(DomainError::DimensionBoundsInverted {
                        name: d.name.clone(),
                        min: *min,
                        max: *max,
                    });
                }
            }
            if let DimensionKind::Integer { min, max } = &d.kind {
                if min >= max {
                    return Err(DomainError::DimensionBoundsInverted {
                        name: d.name.clone(),
                        min: *min as f64,
                        max: *max as f64,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A single captured span in a distributed trace, flattened by id so that
/// parsing never needs to walk a (possibly cyclic) parent/child tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSpan {
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub operation_name: String,
    pub duration_ms: f64,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceData {
    pub trace_id: String,
    pub spans: Vec<TraceSpan>,
}

/// What the Executor Client observed after applying a [`FaultPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    pub status_code: Option<u16>,
    pub latency_ms: Option<f64>,
    pub error_rate: Option<f64>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub logs: Vec<String>,
    pub trace_data: Option<TraceData>,
    pub timestamp: DateTime<Utc>,
}

impl RawObservation {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.status_code.is_none()
            && self.latency_ms.is_none()
            && self.logs.is_empty()
            && self.trace_data.is_none()
        {
            return Err(DomainError::EmptyObservation);
        }
        if let Some(er) = self.error_rate {
            if !(0.0..=1.0).contains(&er) {
                return Err(DomainError::ErrorRateOutOfRange(er));
            }
        }
        Ok(())
    }
}

/// Per-scorer breakdown plus the normalized weighted total, all in [0,10].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityScore {
    pub bug: f64,
    pub performance: f64,
    pub structure: f64,
    pub total: f64,
    pub components: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl SeverityScore {
    pub fn validate(&self) -> Result<(), DomainError> {
        for (name, v) in [("bug", self.bug), ("performance", self.performance), ("structure", self.structure), ("total", self.total)] {
            if !(0.0..=10.0).contains(&v) {
                return Err(DomainError::SeverityOutOfRange(match name {
                    "bug" => "bug",
                    "performance" => "performance",
                    "structure" => "structure",
                    _ => "total",
                }));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub trial_id: u64,
    pub fault_plan: FaultPlan,
    pub raw_observation: Option<RawObservation>,
    pub severity_score: Option<SeverityScore>,
    pub timestamp: DateTime<Utc>,
    pub duration_sec: f64,
    pub status: TrialStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Stopping,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Legal one-way transitions.
    fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Stopping)
                | (Stopping, Completed)
                | (Pending, Failed)
                | (Running, Failed)
                | (Stopping, Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestResult {
    pub fault: FaultPlan,
    pub score: f64,
    pub trial_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationSession {
    pub id: Uuid,
    pub service: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub search_space: SearchSpaceConfig,
    pub max_trials: u32,
    pub time_budget_secs: u64,
    pub trials: Vec<Trial>,
    pub best: Option<BestResult>,
}

impl OptimizationSession {
    pub fn new(service: impl Into<String>, search_space: SearchSpaceConfig, max_trials: u32, time_budget_secs: u64, now: DateTime<Utc>) -> Result<Self, DomainError> {
        search_space.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            service: service.into(),
            status: SessionStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            search_space,
            max_trials,
            time_budget_secs,
            trials: Vec::new(),
            best: None,
        })
    }

    /// Apply a status transition, enforcing the one-way state machine.
    pub fn transition_to(&mut self, next: SessionStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::IllegalTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", next),
            });
        }
        self.status = next;
        match next {
            SessionStatus::Running if self.started_at.is_none() => self.started_at = Some(now),
            SessionStatus::Completed | SessionStatus::Failed => self.completed_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Append a trial, assigning the next sequential id, and update `best`
    /// if this trial's score is the new argmax.
    pub fn record_trial(&mut self, mut trial: Trial) {
        trial.trial_id = self.trials.len() as u64;
        if let (TrialStatus::Success, Some(score)) = (trial.status, trial.severity_score.as_ref()) {
            let is_new_best = self.best.as_ref().map_or(true, |b| score.total > b.score);
            if is_new_best {
                self.best = Some(BestResult {
                    fault: trial.fault_plan.clone(),
                    score: score.total,
                    trial_id: trial.trial_id,
                });
            }
        }
        self.trials.push(trial);
    }
}
