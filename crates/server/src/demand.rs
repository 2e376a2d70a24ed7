//! Synthetic demand: submits a random request every `interval` until the
//! shutdown signal flips.

use std::sync::Arc;
use std::time::Duration;

use arbiter_agent::runtime::DispatchRuntime;
use arbiter_core::domain::request::Priority;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

const REQUEST_TYPES: [&str; 6] = [
    "Personal Loan Application",
    "Insurance Claim Review",
    "ESG Investment Screening",
    "Credit Line Increase",
    "Fraud Alert Investigation",
    "Vendor Onboarding",
];
const PRIORITIES: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];

pub struct DemandGenerator {
    runtime: Arc<DispatchRuntime>,
    interval: Duration,
    rng: StdRng,
}

impl DemandGenerator {
    pub fn new(runtime: Arc<DispatchRuntime>, interval: Duration) -> Self {
        Self { runtime, interval, rng: StdRng::from_entropy() }
    }

    pub fn with_seed(runtime: Arc<DispatchRuntime>, interval: Duration, seed: u64) -> Self {
        Self { runtime, interval, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<usize> {
        tokio::spawn(self.run(shutdown))
    }

    /// Returns how many requests were submitted.
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut submitted = 0;

        info!(
            event_name = "system.demand.start",
            interval_secs = self.interval.as_secs(),
            "synthetic demand generator started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let request_type = REQUEST_TYPES.choose(&mut self.rng).copied().unwrap_or(REQUEST_TYPES[0]);
                    let priority = PRIORITIES.choose(&mut self.rng).copied().unwrap_or(Priority::Medium);
                    let (request_id, _) = self.runtime.accept(request_type, priority);
                    submitted += 1;
                    debug!(
                        event_name = "system.demand.submitted",
                        request_id = %request_id,
                        request_type,
                        priority = priority.as_str(),
                        "synthetic request submitted"
                    );
                }
            }
        }

        info!(event_name = "system.demand.stopped", submitted, "synthetic demand generator stopped");
        submitted
    }
}
