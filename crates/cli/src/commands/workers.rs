use arbiter_core::config::{AppConfig, LoadOptions};
use arbiter_core::load::AgentLoadModel;
use arbiter_core::metrics::SystemMetrics;
use serde_json::json;

use crate::commands::CommandResult;

const COMMAND: &str = "workers";

/// Snapshot of a freshly initialized load model; load is randomized per run.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
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

    let model = AgentLoadModel::new(config.load);
    let workers = model.snapshot();
    let metrics = SystemMetrics::compute(&[], &workers);
    let lines: Vec<String> = workers
        .iter()
        .map(|worker| {
            format!(
                "{} ({}): {}% load, status {}, threshold {}%{}",
                worker.name,
                worker.id,
                worker.current_load,
                worker.status.as_str(),
                worker.scaling_threshold,
                if worker.is_scaling { ", scaling" } else { "" }
            )
        })
        .collect();

    CommandResult::success(
        COMMAND,
        lines.join("; "),
        json!({ "workers": workers, "average_load": metrics.average_load }),
    )
}
