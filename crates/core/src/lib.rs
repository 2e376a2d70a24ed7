pub mod aggregation;
pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod extraction;
pub mod load;
pub mod metrics;
pub mod routing;

pub use aggregation::DecisionAggregator;
pub use domain::analysis::{AnalysisResult, DomainSignals, RiskLevel};
pub use domain::decision::{AggregateOutcome, Decision, Verdict};
pub use domain::log::{LogEntry, LogLevel};
pub use domain::request::{Priority, Request, RequestId, RequestStatus};
pub use domain::worker::{Specialization, Worker, WorkerId, WorkerStatus};
pub use errors::{ApplicationError, DomainError};
pub use events::{EventCategory, EventOutcome, EventSink, InMemoryEventSink, PipelineEvent};
pub use load::AgentLoadModel;
pub use metrics::SystemMetrics;
pub use routing::{FallbackRouter, RoutingPlan, RoutingSource};
