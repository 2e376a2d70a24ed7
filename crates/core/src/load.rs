//! Agent load model
//!
//! Tracks a synthetic load percentage, the in-flight queue and the derived
//! status for every worker. The numbers are advisory signals for dashboards
//! and metrics; nothing here gates dispatch.
//!
//! Every mutation happens under one lock with no suspension point inside, so
//! concurrent pipelines observe each increment/decrement atomically.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{LoadConfig, LoadRange};
use crate::domain::request::RequestId;
use crate::domain::worker::{Specialization, Worker, WorkerId, MAX_LOAD};
use crate::errors::DomainError;

struct LoadState {
    workers: BTreeMap<WorkerId, Worker>,
    rng: StdRng,
}

pub struct AgentLoadModel {
    config: LoadConfig,
    state: Mutex<LoadState>,
}

impl AgentLoadModel {
    /// One worker per specialization with a randomized initial load.
    pub fn new(config: LoadConfig) -> Self {
        Self::seeded(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: LoadConfig, seed: u64) -> Self {
        Self::seeded(config, StdRng::seed_from_u64(seed))
    }

    fn seeded(config: LoadConfig, mut rng: StdRng) -> Self {
        let workers = Specialization::ALL
            .into_iter()
            .map(|specialization| {
                let initial = sample(&mut rng, config.initial);
                let worker =
                    Worker::new(specialization, initial, config.threshold_for(specialization));
                (worker.id.clone(), worker)
            })
            .collect();

        Self { config, state: Mutex::new(LoadState { workers, rng }) }
    }

    /// Restores a model from previously persisted workers.
    pub fn from_workers(config: LoadConfig, workers: Vec<Worker>, seed: u64) -> Self {
        let workers = workers.into_iter().map(|worker| (worker.id.clone(), worker)).collect();
        Self { config, state: Mutex::new(LoadState { workers, rng: StdRng::seed_from_u64(seed) }) }
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Vec<Worker> {
        self.lock().workers.values().cloned().collect()
    }

    pub fn worker(&self, id: &WorkerId) -> Option<Worker> {
        self.lock().workers.get(id).cloned()
    }

    /// Queues the request on the worker and raises its load by a bounded random step.
    pub fn dispatch(&self, id: &WorkerId, request_id: &RequestId) -> Result<Worker, DomainError> {
        let mut state = self.lock();
        let step = sample(&mut state.rng, self.config.dispatch_increment);
        let worker =
            state.workers.get_mut(id).ok_or_else(|| DomainError::UnknownWorker(id.0.clone()))?;

        worker.queue.push(request_id.clone());
        let raised = worker.current_load.saturating_add(step).min(MAX_LOAD);
        worker.apply_load(raised);
        Ok(worker.clone())
    }

    /// Dequeues the request (once) and lowers the load, never below the floor.
    pub fn complete(&self, id: &WorkerId, request_id: &RequestId) -> Result<Worker, DomainError> {
        let mut state = self.lock();
        let step = sample(&mut state.rng, self.config.completion_decrement);
        let floor = self.config.floor;
        let worker =
            state.workers.get_mut(id).ok_or_else(|| DomainError::UnknownWorker(id.0.clone()))?;

        if let Some(position) = worker.queue.iter().position(|queued| queued == request_id) {
            worker.queue.remove(position);
        }
        let lowered = worker.current_load.saturating_sub(step).max(floor);
        worker.apply_load(lowered);
        Ok(worker.clone())
    }

    fn lock(&self) -> MutexGuard<'_, LoadState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn sample(rng: &mut StdRng, range: LoadRange) -> u8 {
    if range.min >= range.max {
        return range.min;
    }
    rng.gen_range(range.min..=range.max)
}
