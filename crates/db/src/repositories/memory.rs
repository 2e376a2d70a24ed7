use std::collections::{BTreeMap, VecDeque};

use tokio::sync::RwLock;

use arbiter_core::domain::log::LogEntry;
use arbiter_core::domain::request::{Request, RequestId};
use arbiter_core::domain::worker::{Worker, WorkerId};

use super::{
    LogRepository, RepositoryError, RequestRepository, RequestUpdate, WorkerRepository,
    WorkerUpdate,
};

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;
pub const DEFAULT_LOG_CAPACITY: usize = 200;

#[derive(Default)]
pub struct InMemoryWorkerRepository {
    workers: RwLock<BTreeMap<WorkerId, Worker>>,
}

impl InMemoryWorkerRepository {
    pub fn with_workers(workers: Vec<Worker>) -> Self {
        Self {
            workers: RwLock::new(
                workers.into_iter().map(|worker| (worker.id.clone(), worker)).collect(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl WorkerRepository for InMemoryWorkerRepository {
    async fn list_workers(&self) -> Result<Vec<Worker>, RepositoryError> {
        let workers = self.workers.read().await;
        Ok(workers.values().cloned().collect())
    }

    async fn update_worker(
        &self,
        id: &WorkerId,
        update: WorkerUpdate,
    ) -> Result<Worker, RepositoryError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound { entity: "worker", id: id.0.clone() })?;
        update.apply_to(worker);
        Ok(worker.clone())
    }
}

/// Recent-history buffer: once `capacity` is reached the oldest request is evicted.
pub struct InMemoryRequestRepository {
    capacity: usize,
    requests: RwLock<VecDeque<Request>>,
}

impl Default for InMemoryRequestRepository {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl InMemoryRequestRepository {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), requests: RwLock::new(VecDeque::new()) }
    }
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn add_request(&self, request: Request) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        while requests.len() >= self.capacity {
            requests.pop_front();
        }
        requests.push_back(request);
        Ok(())
    }

    async fn update_request(
        &self,
        id: &RequestId,
        update: RequestUpdate,
    ) -> Result<Request, RepositoryError> {
        let mut requests = self.requests.write().await;
        let request = requests
            .iter_mut()
            .find(|request| &request.id == id)
            .ok_or_else(|| RepositoryError::NotFound { entity: "request", id: id.0.clone() })?;
        update.apply_to(request);
        Ok(request.clone())
    }

    async fn find_request(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.iter().find(|request| &request.id == id).cloned())
    }

    async fn list_requests(&self) -> Result<Vec<Request>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.iter().cloned().collect())
    }
}

pub struct InMemoryLogRepository {
    capacity: usize,
    entries: RwLock<VecDeque<LogEntry>>,
}

impl Default for InMemoryLogRepository {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl InMemoryLogRepository {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: RwLock::new(VecDeque::new()) }
    }
}

#[async_trait::async_trait]
impl LogRepository for InMemoryLogRepository {
    async fn append_log(&self, entry: LogEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
        Ok(())
    }

    async fn list_logs(&self) -> Result<Vec<LogEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().cloned().collect())
    }
}
