use async_trait::async_trait;
use thiserror::Error;

use arbiter_core::domain::log::LogEntry;
use arbiter_core::domain::request::{Request, RequestId, RequestStatus};
use arbiter_core::domain::worker::{Worker, WorkerId, WorkerStatus};

pub mod memory;

pub use memory::{InMemoryLogRepository, InMemoryRequestRepository, InMemoryWorkerRepository};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Partial worker write; `None` fields keep their stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerUpdate {
    pub status: Option<WorkerStatus>,
    pub current_load: Option<u8>,
    pub queue: Option<Vec<RequestId>>,
    pub is_scaling: Option<bool>,
}

impl From<&Worker> for WorkerUpdate {
    fn from(worker: &Worker) -> Self {
        Self {
            status: Some(worker.status),
            current_load: Some(worker.current_load),
            queue: Some(worker.queue.clone()),
            is_scaling: Some(worker.is_scaling),
        }
    }
}

impl WorkerUpdate {
    pub fn apply_to(self, worker: &mut Worker) {
        if let Some(status) = self.status {
            worker.status = status;
        }
        if let Some(current_load) = self.current_load {
            worker.current_load = current_load;
        }
        if let Some(queue) = self.queue {
            worker.queue = queue;
        }
        if let Some(is_scaling) = self.is_scaling {
            worker.is_scaling = is_scaling;
        }
    }
}

/// Partial request write; `None` fields keep their stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestUpdate {
    pub status: Option<RequestStatus>,
    pub processing_time_ms: Option<u64>,
    pub assigned_agents: Option<Vec<WorkerId>>,
}

impl From<&Request> for RequestUpdate {
    fn from(request: &Request) -> Self {
        Self {
            status: Some(request.status),
            processing_time_ms: request.processing_time_ms,
            assigned_agents: Some(request.assigned_agents.clone()),
        }
    }
}

impl RequestUpdate {
    pub fn apply_to(self, request: &mut Request) {
        if let Some(status) = self.status {
            request.status = status;
        }
        if let Some(processing_time_ms) = self.processing_time_ms {
            request.processing_time_ms = Some(processing_time_ms);
        }
        if let Some(assigned_agents) = self.assigned_agents {
            request.assigned_agents = assigned_agents;
        }
    }
}

#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn list_workers(&self) -> Result<Vec<Worker>, RepositoryError>;
    async fn update_worker(
        &self,
        id: &WorkerId,
        update: WorkerUpdate,
    ) -> Result<Worker, RepositoryError>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn add_request(&self, request: Request) -> Result<(), RepositoryError>;
    async fn update_request(
        &self,
        id: &RequestId,
        update: RequestUpdate,
    ) -> Result<Request, RepositoryError>;
    async fn find_request(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError>;
    /// Oldest first.
    async fn list_requests(&self) -> Result<Vec<Request>, RepositoryError>;
}

#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn append_log(&self, entry: LogEntry) -> Result<(), RepositoryError>;
    /// Oldest first.
    async fn list_logs(&self) -> Result<Vec<LogEntry>, RepositoryError>;
}
