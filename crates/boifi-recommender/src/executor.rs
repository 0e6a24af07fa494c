use std::time::Duration;

use boifi_domain::{FaultPlan, RawObservation};
use rand::Rng;
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::RecommenderError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRY_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 10_000;

const FAILURE_THRESHOLD: u32 = 5;
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Closed -> Open after `FAILURE_THRESHOLD` consecutive failures. Open fails
/// fast for `RECOVERY_TIMEOUT`, then allows exactly one HalfOpen probe:
/// success closes it, failure reopens it.
struct CircuitBreaker {
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self { state: Mutex::new(CircuitState { status: CircuitStatus::Closed, consecutive_failures: 0, opened_at: None }) }
    }

    /// Returns `Err(CircuitOpen)` without attempting `f` if the breaker is
    /// open and the recovery timeout hasn't elapsed.
    async fn call<T, E>(&self, f: impl std::future::Future<Output = Result<T, E>>) -> Result<T, RecommenderError>
    where
        E: std::fmt::Display,
    {
        {
            let mut state = self.state.lock().await;
            if state.status == CircuitStatus::Open {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed < RECOVERY_TIMEOUT {
                    return Err(RecommenderError::CircuitOpen);
                }
                state.status = CircuitStatus::HalfOpen;
                info!("circuit breaker entering half-open probe");
            }
        }

        match f.await {
            Ok(v) => {
                let mut state = self.state.lock().await;
                if state.status != CircuitStatus::Closed {
                    info!("circuit breaker closing after successful probe");
                }
                state.status = CircuitStatus::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                Ok(v)
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.consecutive_failures += 1;
                if state.status == CircuitStatus::HalfOpen || state.consecutive_failures >= FAILURE_THRESHOLD {
                    state.status = CircuitStatus::Open;
                    state.opened_at = Some(Instant::now());
                    warn!(failures = state.consecutive_failures, "circuit breaker tripped open");
                }
                Err(RecommenderError::Executor(e.to_string()))
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Talks to the control-plane's Policy API to apply a trial's fault and to
/// an observation source to collect its effect, wrapped in exponential
/// backoff with jitter plus a circuit breaker.
pub struct ExecutorClient {
    http: Client,
    control_plane_base: String,
    observation_base: String,
    auth_token: String,
    breaker: CircuitBreaker,
}

impl ExecutorClient {
    pub fn new(control_plane_base: impl Into<String>, observation_base: impl Into<String>, auth_token: impl Into<String>) -> Result<Self, RecommenderError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| RecommenderError::Executor(format!("building http client: {e}")))?;
        Ok(Self {
            http,
            control_plane_base: control_plane_base.into(),
            observation_base: observation_base.into(),
            auth_token: auth_token.into(),
            breaker: CircuitBreaker::new(),
        })
    }

    pub async fn health_check(&self) -> bool {
        let url = format!("{}/v1/health", self.control_plane_base);
        matches!(self.http.get(&url).bearer_auth(&self.auth_token).send().await, Ok(resp) if resp.status().is_success())
    }

    /// Submits the trial's fault, waits for it to take effect plus a
    /// settling buffer, collects an observation, then tears the fault back
    /// down. The teardown happens best-effort: a failure there is logged
    /// but never turns a successful observation into an error.
    pub async fn apply_and_observe(
        &self,
        session_id: &str,
        trial_id: u64,
        plan: &FaultPlan,
        fault_duration: Duration,
        settle_buffer: Duration,
    ) -> Result<RawObservation, RecommenderError> {
        let policy_name = format!("boifi-trial-{session_id}-{trial_id}");
        let policy = plan.clone().into_policy(policy_name.clone());

        self.breaker.call(self.retrying(|| self.submit_policy(&policy))).await?;

        tokio::time::sleep(fault_duration + settle_buffer).await;

        let observation = self.breaker.call(self.retrying(|| self.collect_observation(&plan.target.service))).await;

        if let Err(e) = self.retrying(|| self.remove_policy(&policy_name)).await {
            warn!(policy = %policy_name, error = %e, "failed to remove trial policy, it will be cleaned up on a later pass");
        }

        observation
    }

    async fn submit_policy(&self, policy: &boifi_domain::FaultInjectionPolicy) -> Result<(), reqwest::Error> {
        let url = format!("{}/v1/policies/create", self.control_plane_base);
        debug!(url, "submitting trial policy");
        self.http.post(&url).bearer_auth(&self.auth_token).json(policy).send().await?.error_for_status()?;
        Ok(())
    }

    async fn remove_policy(&self, name: &str) -> Result<(), reqwest::Error> {
        let url = format!("{}/v1/policies/{name}", self.control_plane_base);
        self.http.delete(&url).bearer_auth(&self.auth_token).send().await?.error_for_status()?;
        Ok(())
    }

    async fn collect_observation(&self, service: &str) -> Result<RawObservation, reqwest::Error> {
        let url = format!("{}/v1/observe?service={service}", self.observation_base);
        self.http.get(&url).bearer_auth(&self.auth_token).send().await?.error_for_status()?.json().await
    }

    /// Retries the given operation with exponential backoff (±10% jitter,
    /// capped) on connect/timeout/5xx/429 failures, up to `MAX_RETRY_ATTEMPTS`.
    /// Non-retryable errors (4xx other than 429, decode errors) return
    /// immediately on the first failure.
    async fn retrying<T, Fut>(&self, op: impl Fn() -> Fut) -> Result<T, reqwest::Error>
    where
        Fut: std::future::Future<Output = Result<T, reqwest::Error>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let retryable = e.is_connect() || e.is_timeout() || e.status().is_some_and(is_retryable_status);
                    attempt += 1;
                    if !retryable || attempt >= MAX_RETRY_ATTEMPTS {
                        return Err(e);
                    }
                    let backoff_ms = (BASE_BACKOFF_MS * 2u64.pow(attempt - 1)).min(MAX_BACKOFF_MS);
                    let jitter = rand::thread_rng().gen_range(0.9..1.1);
                    let delay = Duration::from_millis((backoff_ms as f64 * jitter) as u64);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying executor request");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn circuit_breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new();
        for _ in 0..FAILURE_THRESHOLD {
            let _ = breaker.call(async { Err::<(), &str>("boom") }).await;
        }
        let state = breaker.state.lock().await;
        assert_eq!(state.status, CircuitStatus::Open);
    }

    #[tokio::test]
    async fn circuit_breaker_fails_fast_while_open() {
        let breaker = CircuitBreaker::new();
        for _ in 0..FAILURE_THRESHOLD {
            let _ = breaker.call(async { Err::<(), &str>("boom") }).await;
        }
        let result = breaker.call(async { Ok::<(), &str>(()) }).await;
        assert!(matches!(result, Err(RecommenderError::CircuitOpen)));
    }

    #[tokio::test]
    async fn circuit_breaker_closes_on_success() {
        let breaker = CircuitBreaker::new();
        let _ = breaker.call(async { Err::<(), &str>("boom") }).await;
        let result = breaker.call(async { Ok::<(), &str>(()) }).await;
        assert!(result.is_ok());
        let state = breaker.state.lock().await;
        assert_eq!(state.status, CircuitStatus::Closed);
        assert_eq!(state.consecutive_failures, 0);
    }
}
