use std::sync::Arc;

use anyhow::Context;
use arbiter_agent::llm::HttpInferenceProvider;
use arbiter_agent::runtime::{DispatchRuntime, PipelineReport};
use arbiter_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use arbiter_core::domain::request::{Priority, RequestStatus};
use arbiter_core::events::NoopEventSink;

use crate::commands::CommandResult;

const COMMAND: &str = "submit";

pub fn run(request_type: &str, priority: Priority, kill_switch: bool) -> CommandResult {
    if request_type.trim().is_empty() {
        return CommandResult::failure(COMMAND, "invalid_input", "request type must not be empty", 2);
    }

    let options = LoadOptions {
        overrides: ConfigOverrides {
            kill_switch: kill_switch.then_some(true),
            ..ConfigOverrides::default()
        },
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let report = match execute(&config, request_type, priority) {
        Ok(report) => report,
        Err(error) => return CommandResult::failure(COMMAND, "runtime", format!("{error:#}"), 3),
    };

    if report.request.status == RequestStatus::Failed {
        return CommandResult::failure(
            COMMAND,
            "pipeline_failed",
            format!("request {} failed: {}", report.request.id, report.outcome.summary()),
            4,
        );
    }

    let message = format!("request {} completed. {}", report.request.id, report.outcome.summary());
    match serde_json::to_value(&report) {
        Ok(details) => CommandResult::success(COMMAND, message, details),
        Err(error) => CommandResult::failure(
            COMMAND,
            "serialization",
            format!("pipeline report could not be serialized: {error}"),
            5,
        ),
    }
}

fn execute(config: &AppConfig, request_type: &str, priority: Priority) -> anyhow::Result<PipelineReport> {
    let provider = HttpInferenceProvider::from_config(&config.inference)
        .context("inference provider setup failed")?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to initialize async runtime")?;

    let dispatch = DispatchRuntime::from_config(config, Arc::new(provider), Arc::new(NoopEventSink));
    Ok(runtime.block_on(dispatch.submit(request_type, priority)))
}
