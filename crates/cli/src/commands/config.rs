use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use arbiter_core::config::{describe_api_key, AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl Field {
    fn new(key_path: &'static str, env_keys: &'static [&'static str], value: impl ToString) -> Self {
        Self { key_path, env_keys, value: value.to_string() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fallback_default: Vec<&str> =
        config.routing.fallback_default.iter().map(|specialization| specialization.as_str()).collect();

    let fields = [
        Field::new("inference.base_url", &["ARBITER_INFERENCE_BASE_URL"], &config.inference.base_url),
        Field::new("inference.api_key", &["ARBITER_INFERENCE_API_KEY"], describe_api_key(&config.inference)),
        Field::new("inference.timeout_secs", &["ARBITER_INFERENCE_TIMEOUT_SECS"], config.inference.timeout_secs),
        Field::new("inference.kill_switch", &["ARBITER_KILL_SWITCH"], config.inference.kill_switch),
        Field::new("inference.min_interval_ms", &["ARBITER_MIN_INTERVAL_MS"], config.inference.min_interval_ms),
        Field::new("models.router", &["ARBITER_MODEL_ROUTER"], &config.models.router),
        Field::new("models.credit", &["ARBITER_MODEL_CREDIT"], &config.models.credit),
        Field::new("models.fraud", &["ARBITER_MODEL_FRAUD"], &config.models.fraud),
        Field::new("models.esg", &["ARBITER_MODEL_ESG"], &config.models.esg),
        Field::new("load.thresholds.credit", &["ARBITER_THRESHOLD_CREDIT"], config.load.credit_threshold),
        Field::new("load.thresholds.fraud", &["ARBITER_THRESHOLD_FRAUD"], config.load.fraud_threshold),
        Field::new("load.thresholds.esg", &["ARBITER_THRESHOLD_ESG"], config.load.esg_threshold),
        Field::new("routing.fallback_default", &[], fallback_default.join(",")),
        Field::new("pipeline.history_capacity", &[], config.pipeline.history_capacity),
        Field::new("server.bind_address", &["ARBITER_SERVER_BIND_ADDRESS"], &config.server.bind_address),
        Field::new(
            "server.health_check_port",
            &["ARBITER_SERVER_HEALTH_CHECK_PORT"],
            config.server.health_check_port,
        ),
        Field::new("demand.enabled", &["ARBITER_DEMAND_ENABLED"], config.demand.enabled),
        Field::new("demand.interval_secs", &["ARBITER_DEMAND_INTERVAL_SECS"], config.demand.interval_secs),
        Field::new("logging.level", &["ARBITER_LOGGING_LEVEL", "ARBITER_LOG_LEVEL"], &config.logging.level),
        Field::new(
            "logging.format",
            &["ARBITER_LOGGING_FORMAT", "ARBITER_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| {
        render_line(
            field.key_path,
            &field.value,
            field_source(
                field.key_path,
                field.env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        )
    }));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("arbiter.toml"), PathBuf::from("config/arbiter.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
