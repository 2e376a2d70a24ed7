pub mod repositories;

pub use repositories::{
    InMemoryLogRepository, InMemoryRequestRepository, InMemoryWorkerRepository, LogRepository,
    RepositoryError, RequestRepository, RequestUpdate, WorkerRepository, WorkerUpdate,
};
