//! Rate-limited inference client
//!
//! Every outbound call goes through one shared `next_allowed_at` instant.
//! A caller reserves its start slot under the lock, sleeps outside it, and
//! pushes the instant forward again once the call settles:
//!
//! - success or provider failure: at least `min_interval` after settlement
//! - rate limit: at least `max(min_interval, retry_after)` after settlement,
//!   then the error is handed back untouched (the client never retries)
//!
//! A rate limit also sets a backoff deadline. Callers that reserved a slot
//! before the signal re-check it after waking and re-reserve past it.
//!
//! With the kill switch on nothing is sent and a fixed stub text is returned.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use arbiter_core::config::InferenceConfig;

use crate::llm::{InferenceError, InferenceProvider, PromptSpec};

pub const KILL_SWITCH_STUB: &str =
    "[stub] Kill switch active: outbound inference disabled, no analysis performed.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub min_interval: Duration,
    pub deadline: Duration,
    pub kill_switch: bool,
}

impl RateLimitPolicy {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            deadline: Duration::from_secs(config.timeout_secs),
            kill_switch: config.kill_switch,
        }
    }
}

#[derive(Default)]
struct SlotState {
    next_allowed_at: Option<Instant>,
    backoff_until: Option<Instant>,
}

pub struct RateLimitedClient {
    provider: Arc<dyn InferenceProvider>,
    policy: RateLimitPolicy,
    state: Mutex<SlotState>,
}

impl RateLimitedClient {
    pub fn new(provider: Arc<dyn InferenceProvider>, policy: RateLimitPolicy) -> Self {
        Self { provider, policy, state: Mutex::new(SlotState::default()) }
    }

    pub fn kill_switch_active(&self) -> bool {
        self.policy.kill_switch
    }

    /// Earliest instant the next call may start; `None` before the first call.
    pub fn next_allowed_at(&self) -> Option<Instant> {
        self.lock().next_allowed_at
    }

    pub async fn invoke(&self, spec: &PromptSpec) -> Result<String, InferenceError> {
        if self.policy.kill_switch {
            debug!(
                event_name = "inference.call.stubbed",
                model = %spec.model,
                "kill switch active, returning stub text"
            );
            return Ok(KILL_SWITCH_STUB.to_string());
        }

        let now = Instant::now();
        let start_at = loop {
            let start_at = self.reserve_slot();
            let waiting_from = Instant::now();
            if start_at > waiting_from {
                debug!(
                    event_name = "inference.call.waiting",
                    model = %spec.model,
                    wait_ms = (start_at - waiting_from).as_millis() as u64,
                    "waiting for rate limit slot"
                );
                tokio::time::sleep_until(start_at).await;
            }
            if !self.in_backoff(Instant::now()) {
                break start_at;
            }
            debug!(
                event_name = "inference.call.rescheduled",
                model = %spec.model,
                "rate limit signalled while waiting, reserving a later slot"
            );
        };

        let outcome =
            match tokio::time::timeout(self.policy.deadline, self.provider.complete(spec)).await {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Provider(format!(
                    "deadline of {}s exceeded",
                    self.policy.deadline.as_secs()
                ))),
            };

        let settled = Instant::now();
        match &outcome {
            Err(InferenceError::RateLimited { retry_after_secs }) => {
                let hinted = Duration::from_secs(retry_after_secs.unwrap_or(0));
                let backoff = hinted.max(self.policy.min_interval);
                self.back_off(settled + backoff);
                warn!(
                    event_name = "inference.call.rate_limited",
                    model = %spec.model,
                    backoff_ms = backoff.as_millis() as u64,
                    "provider signalled rate limit"
                );
            }
            Err(error) => {
                self.push_back(settled + self.policy.min_interval);
                warn!(
                    event_name = "inference.call.failed",
                    model = %spec.model,
                    error = %error,
                    "inference call failed"
                );
            }
            Ok(_) => {
                self.push_back(settled + self.policy.min_interval);
                debug!(
                    event_name = "inference.call.completed",
                    model = %spec.model,
                    elapsed_ms = (settled - start_at.max(now)).as_millis() as u64,
                    "inference call completed"
                );
            }
        }

        outcome
    }

    fn reserve_slot(&self) -> Instant {
        let mut state = self.lock();
        let now = Instant::now();
        let start_at = [state.next_allowed_at, state.backoff_until]
            .into_iter()
            .flatten()
            .fold(now, Instant::max);
        state.next_allowed_at = Some(start_at + self.policy.min_interval);
        start_at
    }

    fn in_backoff(&self, now: Instant) -> bool {
        self.lock().backoff_until.is_some_and(|until| until > now)
    }

    fn push_back(&self, candidate: Instant) {
        let mut state = self.lock();
        state.next_allowed_at =
            Some(state.next_allowed_at.map_or(candidate, |allowed| allowed.max(candidate)));
    }

    fn back_off(&self, until: Instant) {
        self.push_back(until);
        let mut state = self.lock();
        state.backoff_until = Some(state.backoff_until.map_or(until, |current| current.max(until)));
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        match self.state.lock() {
            Ok(next) => next,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::{RateLimitPolicy, RateLimitedClient, KILL_SWITCH_STUB};
    use crate::llm::{InferenceError, InferenceProvider, PromptSpec};

    #[derive(Default)]
    struct RecordingProvider {
        replies: Mutex<VecDeque<Result<String, InferenceError>>>,
        started: Mutex<Vec<Instant>>,
        latency: Duration,
    }

    impl RecordingProvider {
        fn scripted(replies: Vec<Result<String, InferenceError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), ..Self::default() }
        }

        fn starts(&self) -> Vec<Instant> {
            self.started.lock().expect("starts lock").clone()
        }
    }

    #[async_trait]
    impl InferenceProvider for RecordingProvider {
        async fn complete(&self, _spec: &PromptSpec) -> Result<String, InferenceError> {
            self.started.lock().expect("starts lock").push(Instant::now());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    fn spec() -> PromptSpec {
        PromptSpec {
            system: None,
            prompt: "ping".into(),
            model: "test-model".into(),
            max_tokens: 16,
            temperature: 0.0,
        }
    }

    fn policy(min_interval_secs: u64) -> RateLimitPolicy {
        RateLimitPolicy {
            min_interval: Duration::from_secs(min_interval_secs),
            deadline: Duration::from_secs(60),
            kill_switch: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_start_at_least_min_interval_apart() {
        let provider = Arc::new(RecordingProvider::scripted(vec![
            Ok("first".into()),
            Err(InferenceError::Provider("boom".into())),
            Ok("third".into()),
        ]));
        let client = RateLimitedClient::new(provider.clone(), policy(20));

        assert_eq!(client.invoke(&spec()).await, Ok("first".to_string()));
        assert!(client.invoke(&spec()).await.is_err());
        assert_eq!(client.invoke(&spec()).await, Ok("third".to_string()));

        let starts = provider.starts();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert!(pair[1] >= pair[0] + Duration::from_secs(20));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_serialised() {
        let provider = Arc::new(RecordingProvider::default());
        let client = Arc::new(RateLimitedClient::new(provider.clone(), policy(5)));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.invoke(&spec()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.expect("task").is_ok());
        }

        let mut starts = provider.starts();
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] >= pair[0] + Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_pushes_next_call_past_retry_after() {
        let provider = Arc::new(RecordingProvider::scripted(vec![
            Err(InferenceError::RateLimited { retry_after_secs: Some(20) }),
            Ok("after backoff".into()),
        ]));
        let client = RateLimitedClient::new(provider.clone(), policy(1));

        let error = client.invoke(&spec()).await.expect_err("rate limited");
        let signalled_at = Instant::now();
        assert_eq!(error, InferenceError::RateLimited { retry_after_secs: Some(20) });

        let next = client.next_allowed_at().expect("slot recorded");
        assert!(next >= signalled_at + Duration::from_secs(20));

        assert_eq!(client.invoke(&spec()).await, Ok("after backoff".to_string()));
        let starts = provider.starts();
        assert!(starts[1] >= signalled_at + Duration::from_secs(20));
        assert_eq!(starts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_delays_callers_already_waiting_for_a_slot() {
        let provider = Arc::new(RecordingProvider {
            latency: Duration::from_millis(100),
            ..RecordingProvider::scripted(vec![
                Err(InferenceError::RateLimited { retry_after_secs: Some(20) }),
                Ok("second".into()),
            ])
        });
        let client = Arc::new(RateLimitedClient::new(provider.clone(), policy(1)));

        let first = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.invoke(&spec()).await }
        });
        let second = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.invoke(&spec()).await }
        });

        assert!(first.await.expect("first task").is_err());
        assert_eq!(second.await.expect("second task"), Ok("second".to_string()));

        let starts = provider.starts();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] >= starts[0] + Duration::from_millis(20_100));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_without_hint_still_waits_min_interval() {
        let provider = Arc::new(RecordingProvider::scripted(vec![Err(
            InferenceError::RateLimited { retry_after_secs: None },
        )]));
        let client = RateLimitedClient::new(provider, policy(30));

        let _ = client.invoke(&spec()).await;
        let next = client.next_allowed_at().expect("slot recorded");
        assert!(next >= Instant::now() + Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_provider_hits_deadline_as_provider_error() {
        let provider = Arc::new(RecordingProvider {
            latency: Duration::from_secs(600),
            ..RecordingProvider::default()
        });
        let client = RateLimitedClient::new(provider, policy(1));

        let error = client.invoke(&spec()).await.expect_err("deadline");
        assert!(matches!(error, InferenceError::Provider(message) if message.contains("deadline")));
    }

    #[tokio::test]
    async fn kill_switch_returns_stub_without_calling_provider() {
        let provider = Arc::new(RecordingProvider::default());
        let client = RateLimitedClient::new(
            provider.clone(),
            RateLimitPolicy { kill_switch: true, ..policy(20) },
        );

        assert_eq!(client.invoke(&spec()).await, Ok(KILL_SWITCH_STUB.to_string()));
        assert!(provider.starts().is_empty());
        assert_eq!(client.next_allowed_at(), None);
    }
}
