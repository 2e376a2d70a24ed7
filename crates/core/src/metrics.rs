use serde::{Deserialize, Serialize};

use crate::domain::request::{Request, RequestStatus};
use crate::domain::worker::{Worker, WorkerId, WorkerStatus};

/// Point-in-time view over the request history and the worker pool.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub active_requests: usize,
    pub completed_requests: usize,
    pub failed_requests: usize,
    pub average_processing_ms: Option<u64>,
    pub average_load: u8,
    pub overloaded_workers: Vec<WorkerId>,
    pub scaling_workers: Vec<WorkerId>,
}

impl SystemMetrics {
    pub fn compute(requests: &[Request], workers: &[Worker]) -> Self {
        let active_requests =
            requests.iter().filter(|request| !request.status.is_terminal()).count();
        let completed_requests =
            requests.iter().filter(|request| request.status == RequestStatus::Completed).count();
        let failed_requests =
            requests.iter().filter(|request| request.status == RequestStatus::Failed).count();

        let durations: Vec<u64> =
            requests.iter().filter_map(|request| request.processing_time_ms).collect();
        let average_processing_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<u64>() / durations.len() as u64)
        };

        let average_load = if workers.is_empty() {
            0
        } else {
            let total: u32 = workers.iter().map(|worker| u32::from(worker.current_load)).sum();
            (total / workers.len() as u32) as u8
        };

        Self {
            active_requests,
            completed_requests,
            failed_requests,
            average_processing_ms,
            average_load,
            overloaded_workers: workers
                .iter()
                .filter(|worker| worker.status == WorkerStatus::Overloaded)
                .map(|worker| worker.id.clone())
                .collect(),
            scaling_workers: workers
                .iter()
                .filter(|worker| worker.is_scaling)
                .map(|worker| worker.id.clone())
                .collect(),
        }
    }
}
