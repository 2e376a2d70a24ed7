//! Inference-backed side of the pipeline: the provider port, the shared
//! rate-limited client, the expert executors, inference-assisted routing and
//! the request lifecycle manager that ties them together.

pub mod experts;
pub mod llm;
pub mod rate_limit;
pub mod router;
pub mod runtime;

pub use experts::ExpertExecutor;
pub use llm::{HttpInferenceProvider, InferenceError, InferenceProvider, PromptSpec};
pub use rate_limit::{RateLimitPolicy, RateLimitedClient, KILL_SWITCH_STUB};
pub use router::RoutingEngine;
pub use runtime::{DispatchRuntime, PipelineReport, PipelineStores, WorkerFailure};
