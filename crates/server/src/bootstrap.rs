use std::sync::Arc;

use arbiter_agent::llm::{HttpInferenceProvider, InferenceError};
use arbiter_agent::runtime::DispatchRuntime;
use arbiter_core::config::{describe_api_key, AppConfig, ConfigError};
use thiserror::Error;
use tracing::info;

use crate::sink::TracingEventSink;

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<DispatchRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("inference provider setup failed: {0}")]
    Provider(#[from] InferenceError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let provider = Arc::new(HttpInferenceProvider::from_config(&config.inference)?);
    let runtime =
        Arc::new(DispatchRuntime::from_config(&config, provider, Arc::new(TracingEventSink)));

    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        kill_switch = config.inference.kill_switch,
        min_interval_ms = config.inference.min_interval_ms,
        api_key = describe_api_key(&config.inference),
        workers = runtime.load().snapshot().len(),
        "dispatch runtime initialized"
    );

    Ok(Application { config, runtime })
}
