//! Stage runner: one stage, bounded retries, per-attempt timeout.

use crate::analysis::payload::StagePayload;
use crate::config::PipelineConfig;
use crate::error::{CapabilityError, StageError};
use crate::gateway::{CapabilityGateway, OutputSchema};
use crate::models::{StageName, StageResult};
use crate::store::JobWriter;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl RetryPolicy {
    /// Only transient capability errors are worth another attempt.
    pub fn is_retryable(&self, err: &CapabilityError) -> bool {
        err.is_transient()
    }

    pub fn should_retry(&self, err: &CapabilityError, attempt: u32) -> bool {
        self.is_retryable(err) && attempt < self.max_attempts
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Notified before every gateway call.
pub trait AttemptObserver: Send + Sync {
    fn attempt_started(&self, stage: StageName, attempt: u32);
}

/// Observer that ignores attempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl AttemptObserver for NoopObserver {
    fn attempt_started(&self, _stage: StageName, _attempt: u32) {}
}

impl AttemptObserver for JobWriter {
    fn attempt_started(&self, stage: StageName, attempt: u32) {
        if let Err(e) = self.start_attempt(stage, attempt) {
            warn!(job_id = %self.id(), stage = %stage, "Could not record attempt: {}", e);
        }
    }
}

/// Runs single stages against the capability gateway.
#[derive(Clone)]
pub struct StageRunner {
    gateway: Arc<dyn CapabilityGateway>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl StageRunner {
    pub fn new(
        gateway: Arc<dyn CapabilityGateway>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            policy,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `stage` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// Always returns a terminal result.
    pub async fn run(
        &self,
        stage: StageName,
        input: &Value,
        observer: &dyn AttemptObserver,
    ) -> StageResult {
        let schema = OutputSchema::for_stage(stage);
        let started_at = Utc::now();
        let mut attempt = 0;

        let mut result = loop {
            attempt += 1;
            observer.attempt_started(stage, attempt);
            debug!(stage = %stage, attempt, "Invoking capability");

            let err = match self.attempt(stage, input, &schema).await {
                Ok(payload) => {
                    info!(stage = %stage, attempt, "Stage succeeded");
                    break StageResult::succeeded(stage, attempt, payload);
                }
                Err(err) => err,
            };

            if self.policy.should_retry(&err, attempt) {
                let delay = self.policy.backoff(attempt);
                warn!(
                    stage = %stage,
                    attempt,
                    "Attempt failed ({}), retrying in {:?}",
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            warn!(stage = %stage, attempt, "Stage failed: {}", err);
            break StageResult::failed(stage, attempt, StageError::from(&err));
        };

        result.started_at = Some(started_at);
        result
    }

    async fn attempt(
        &self,
        stage: StageName,
        input: &Value,
        schema: &OutputSchema,
    ) -> Result<StagePayload, CapabilityError> {
        let value = tokio::time::timeout(self.timeout, self.gateway.invoke(stage, input, schema))
            .await
            .map_err(|_| CapabilityError::Timeout(self.timeout))??;

        StagePayload::decode(stage, value).map_err(|e| {
            CapabilityError::MalformedResponse(format!("cannot decode {} payload: {}", stage, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::gateway::scripted::{valid_response, ScriptedGateway, Step};
    use crate::models::StageState;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        attempts: Mutex<Vec<(StageName, u32)>>,
    }

    impl AttemptObserver for RecordingObserver {
        fn attempt_started(&self, stage: StageName, attempt: u32) {
            self.attempts.lock().unwrap().push((stage, attempt));
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }

    fn runner(gateway: ScriptedGateway, max_attempts: u32) -> (StageRunner, Arc<ScriptedGateway>) {
        let gateway = Arc::new(gateway);
        let runner = StageRunner::new(
            gateway.clone(),
            policy(max_attempts),
            Duration::from_secs(1),
        );
        (runner, gateway)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy(3);
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn test_retry_predicate() {
        let policy = policy(3);
        let unavailable = CapabilityError::Unavailable("down".into());
        let malformed = CapabilityError::MalformedResponse("bad".into());
        assert!(policy.should_retry(&unavailable, 1));
        assert!(policy.should_retry(&unavailable, 2));
        assert!(!policy.should_retry(&unavailable, 3));
        assert!(!policy.should_retry(&malformed, 1));
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = PipelineConfig::default();
        config.max_attempts = 0;
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let (runner, gateway) = runner(ScriptedGateway::happy(), 3);
        let result = runner.run(StageName::Market, &json!({}), &NoopObserver).await;

        assert_eq!(result.state, StageState::Succeeded);
        assert_eq!(result.attempts, 1);
        assert!(result.started_at.is_some());
        assert!(result.is_consistent());
        assert_eq!(gateway.calls(StageName::Market), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried() {
        let gateway = ScriptedGateway::happy()
            .then(
                StageName::Financial,
                Step::Fail(CapabilityError::Unavailable("503".into())),
            )
            .then(
                StageName::Financial,
                Step::Respond(valid_response(StageName::Financial)),
            );
        let (runner, gateway) = runner(gateway, 3);
        let observer = RecordingObserver::default();

        let result = runner.run(StageName::Financial, &json!({}), &observer).await;

        assert_eq!(result.state, StageState::Succeeded);
        assert_eq!(result.attempts, 2);
        assert_eq!(gateway.calls(StageName::Financial), 2);
        assert_eq!(
            *observer.attempts.lock().unwrap(),
            vec![(StageName::Financial, 1), (StageName::Financial, 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_attempts() {
        let gateway = ScriptedGateway::new().always(StageName::Extraction, Step::Hang);
        let (runner, gateway) = runner(gateway, 3);
        let started = tokio::time::Instant::now();

        let result = runner.run(StageName::Extraction, &json!({}), &NoopObserver).await;

        assert_eq!(result.state, StageState::Failed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::CapabilityTimeout);
        assert_eq!(gateway.calls(StageName::Extraction), 3);

        // three 1s attempts plus 500ms and 1s of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(4500), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_is_not_retried() {
        let gateway = ScriptedGateway::new()
            .always(StageName::Risk, Step::Respond(json!({"risk_score": "high"})));
        let (runner, gateway) = runner(gateway, 3);

        let result = runner.run(StageName::Risk, &json!({}), &NoopObserver).await;

        assert_eq!(result.state, StageState::Failed);
        assert_eq!(result.attempts, 1);
        assert_eq!(
            result.error.unwrap().kind,
            ErrorKind::CapabilityMalformedResponse
        );
        assert_eq!(gateway.calls(StageName::Risk), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_payload_is_malformed() {
        let response = json!({
            "score": 60,
            "confidence": 0.5,
            "flags": [{"severity": "catastrophic", "message": "?"}]
        });
        let gateway = ScriptedGateway::new().always(StageName::Market, Step::Respond(response));
        let (runner, _) = runner(gateway, 3);

        let result = runner.run(StageName::Market, &json!({}), &NoopObserver).await;

        assert_eq!(result.attempts, 1);
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::CapabilityMalformedResponse);
        assert!(error.message.contains("cannot decode market payload"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_but_in_time_response_succeeds() {
        let gateway = ScriptedGateway::new().always(
            StageName::Synthesis,
            Step::Delayed(Duration::from_millis(900), valid_response(StageName::Synthesis)),
        );
        let (runner, _) = runner(gateway, 1);

        let result = runner.run(StageName::Synthesis, &json!({}), &NoopObserver).await;
        assert!(result.is_succeeded());
    }
}
