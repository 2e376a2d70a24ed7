use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::worker::Specialization;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub inference: InferenceConfig,
    pub models: ModelConfig,
    pub load: LoadConfig,
    pub routing: RoutingConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub demand: DemandConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct InferenceConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    /// Disables every outbound provider call; stub output is used instead.
    pub kill_switch: bool,
    pub min_interval_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelConfig {
    pub router: String,
    pub credit: String,
    pub fraud: String,
    pub esg: String,
}

impl ModelConfig {
    pub fn for_specialization(&self, specialization: Specialization) -> &str {
        match specialization {
            Specialization::Credit => &self.credit,
            Specialization::Fraud => &self.fraud,
            Specialization::Esg => &self.esg,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRange {
    pub min: u8,
    pub max: u8,
}

impl LoadRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadConfig {
    pub credit_threshold: u8,
    pub fraud_threshold: u8,
    pub esg_threshold: u8,
    pub dispatch_increment: LoadRange,
    pub completion_decrement: LoadRange,
    pub floor: u8,
    pub initial: LoadRange,
}

impl LoadConfig {
    pub fn threshold_for(&self, specialization: Specialization) -> u8 {
        match specialization {
            Specialization::Credit => self.credit_threshold,
            Specialization::Fraud => self.fraud_threshold,
            Specialization::Esg => self.esg_threshold,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            credit_threshold: Specialization::Credit.default_threshold(),
            fraud_threshold: Specialization::Fraud.default_threshold(),
            esg_threshold: Specialization::Esg.default_threshold(),
            dispatch_increment: LoadRange::new(15, 40),
            completion_decrement: LoadRange::new(10, 30),
            floor: 5,
            initial: LoadRange::new(10, 40),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Workers used when no keyword matches the request type.
    pub fallback_default: Vec<Specialization>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { fallback_default: vec![Specialization::Credit, Specialization::Fraud] }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub history_capacity: usize,
    pub log_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemandConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub kill_switch: Option<bool>,
    pub min_interval_ms: Option<u64>,
    pub inference_base_url: Option<String>,
    pub inference_api_key: Option<String>,
    pub log_level: Option<String>,
    pub demand_enabled: Option<bool>,
    pub health_check_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            inference: InferenceConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                timeout_secs: 60,
                kill_switch: false,
                min_interval_ms: 20_000,
                max_tokens: 800,
                temperature: 0.2,
            },
            models: ModelConfig {
                router: "gpt-4o-mini".to_string(),
                credit: "gpt-4o-mini".to_string(),
                fraud: "gpt-4o-mini".to_string(),
                esg: "gpt-4o-mini".to_string(),
            },
            load: LoadConfig::default(),
            routing: RoutingConfig::default(),
            pipeline: PipelineConfig { history_capacity: 50, log_capacity: 200 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            demand: DemandConfig { enabled: false, interval_secs: 45 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("arbiter.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(inference) = patch.inference {
            if let Some(base_url) = inference.base_url {
                self.inference.base_url = base_url;
            }
            if let Some(api_key_value) = inference.api_key {
                self.inference.api_key = Some(secret_value(api_key_value));
            }
            if let Some(timeout_secs) = inference.timeout_secs {
                self.inference.timeout_secs = timeout_secs;
            }
            if let Some(kill_switch) = inference.kill_switch {
                self.inference.kill_switch = kill_switch;
            }
            if let Some(min_interval_ms) = inference.min_interval_ms {
                self.inference.min_interval_ms = min_interval_ms;
            }
            if let Some(max_tokens) = inference.max_tokens {
                self.inference.max_tokens = max_tokens;
            }
            if let Some(temperature) = inference.temperature {
                self.inference.temperature = temperature;
            }
        }

        if let Some(models) = patch.models {
            if let Some(router) = models.router {
                self.models.router = router;
            }
            if let Some(credit) = models.credit {
                self.models.credit = credit;
            }
            if let Some(fraud) = models.fraud {
                self.models.fraud = fraud;
            }
            if let Some(esg) = models.esg {
                self.models.esg = esg;
            }
        }

        if let Some(load) = patch.load {
            if let Some(thresholds) = load.thresholds {
                if let Some(credit) = thresholds.credit {
                    self.load.credit_threshold = credit;
                }
                if let Some(fraud) = thresholds.fraud {
                    self.load.fraud_threshold = fraud;
                }
                if let Some(esg) = thresholds.esg {
                    self.load.esg_threshold = esg;
                }
            }
            if let Some(range) = load.dispatch_increment {
                self.load.dispatch_increment = range;
            }
            if let Some(range) = load.completion_decrement {
                self.load.completion_decrement = range;
            }
            if let Some(floor) = load.floor {
                self.load.floor = floor;
            }
            if let Some(range) = load.initial {
                self.load.initial = range;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(fallback_default) = routing.fallback_default {
                self.routing.fallback_default = parse_specializations(&fallback_default)?;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(history_capacity) = pipeline.history_capacity {
                self.pipeline.history_capacity = history_capacity;
            }
            if let Some(log_capacity) = pipeline.log_capacity {
                self.pipeline.log_capacity = log_capacity;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(demand) = patch.demand {
            if let Some(enabled) = demand.enabled {
                self.demand.enabled = enabled;
            }
            if let Some(interval_secs) = demand.interval_secs {
                self.demand.interval_secs = interval_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ARBITER_INFERENCE_BASE_URL") {
            self.inference.base_url = value;
        }
        if let Some(value) = read_env("ARBITER_INFERENCE_API_KEY") {
            self.inference.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("ARBITER_INFERENCE_TIMEOUT_SECS") {
            self.inference.timeout_secs = parse_u64("ARBITER_INFERENCE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("ARBITER_KILL_SWITCH") {
            self.inference.kill_switch = parse_bool("ARBITER_KILL_SWITCH", &value)?;
        }
        if let Some(value) = read_env("ARBITER_MIN_INTERVAL_MS") {
            self.inference.min_interval_ms = parse_u64("ARBITER_MIN_INTERVAL_MS", &value)?;
        }

        if let Some(value) = read_env("ARBITER_MODEL_ROUTER") {
            self.models.router = value;
        }
        if let Some(value) = read_env("ARBITER_MODEL_CREDIT") {
            self.models.credit = value;
        }
        if let Some(value) = read_env("ARBITER_MODEL_FRAUD") {
            self.models.fraud = value;
        }
        if let Some(value) = read_env("ARBITER_MODEL_ESG") {
            self.models.esg = value;
        }

        if let Some(value) = read_env("ARBITER_THRESHOLD_CREDIT") {
            self.load.credit_threshold = parse_u8("ARBITER_THRESHOLD_CREDIT", &value)?;
        }
        if let Some(value) = read_env("ARBITER_THRESHOLD_FRAUD") {
            self.load.fraud_threshold = parse_u8("ARBITER_THRESHOLD_FRAUD", &value)?;
        }
        if let Some(value) = read_env("ARBITER_THRESHOLD_ESG") {
            self.load.esg_threshold = parse_u8("ARBITER_THRESHOLD_ESG", &value)?;
        }

        if let Some(value) = read_env("ARBITER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("ARBITER_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("ARBITER_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        if let Some(value) = read_env("ARBITER_DEMAND_ENABLED") {
            self.demand.enabled = parse_bool("ARBITER_DEMAND_ENABLED", &value)?;
        }
        if let Some(value) = read_env("ARBITER_DEMAND_INTERVAL_SECS") {
            self.demand.interval_secs = parse_u64("ARBITER_DEMAND_INTERVAL_SECS", &value)?;
        }

        let log_level =
            read_env("ARBITER_LOGGING_LEVEL").or_else(|| read_env("ARBITER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ARBITER_LOGGING_FORMAT").or_else(|| read_env("ARBITER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(kill_switch) = overrides.kill_switch {
            self.inference.kill_switch = kill_switch;
        }
        if let Some(min_interval_ms) = overrides.min_interval_ms {
            self.inference.min_interval_ms = min_interval_ms;
        }
        if let Some(base_url) = overrides.inference_base_url {
            self.inference.base_url = base_url;
        }
        if let Some(api_key) = overrides.inference_api_key {
            self.inference.api_key = Some(secret_value(api_key));
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(enabled) = overrides.demand_enabled {
            self.demand.enabled = enabled;
        }
        if let Some(port) = overrides.health_check_port {
            self.server.health_check_port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_inference(&self.inference)?;
        validate_models(&self.models)?;
        validate_load(&self.load)?;
        validate_routing(&self.routing)?;
        validate_pipeline(&self.pipeline)?;
        validate_server(&self.server)?;
        validate_demand(&self.demand)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("arbiter.toml"), PathBuf::from("config/arbiter.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn parse_specializations(values: &[String]) -> Result<Vec<Specialization>, ConfigError> {
    values
        .iter()
        .map(|value| {
            Specialization::parse(value).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "routing.fallback_default contains unknown worker `{value}` (expected credit|fraud|esg)"
                ))
            })
        })
        .collect()
}

fn validate_inference(inference: &InferenceConfig) -> Result<(), ConfigError> {
    if inference.timeout_secs == 0 || inference.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "inference.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&inference.temperature) {
        return Err(ConfigError::Validation(
            "inference.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if inference.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "inference.max_tokens must be greater than zero".to_string(),
        ));
    }

    if inference.kill_switch {
        return Ok(());
    }

    let base_url = inference.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "inference.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_models(models: &ModelConfig) -> Result<(), ConfigError> {
    let entries = [
        ("models.router", &models.router),
        ("models.credit", &models.credit),
        ("models.fraud", &models.fraud),
        ("models.esg", &models.esg),
    ];
    for (key, value) in entries {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{key} must not be empty")));
        }
    }
    Ok(())
}

fn validate_range(key: &str, range: LoadRange) -> Result<(), ConfigError> {
    if range.min > range.max || range.max > 100 {
        return Err(ConfigError::Validation(format!(
            "{key} must satisfy min <= max <= 100 (got {}..={})",
            range.min, range.max
        )));
    }
    Ok(())
}

fn validate_load(load: &LoadConfig) -> Result<(), ConfigError> {
    for specialization in Specialization::ALL {
        if load.threshold_for(specialization) > 100 {
            return Err(ConfigError::Validation(format!(
                "load.thresholds.{} must be in range 0..=100",
                specialization.as_str()
            )));
        }
    }

    validate_range("load.dispatch_increment", load.dispatch_increment)?;
    validate_range("load.completion_decrement", load.completion_decrement)?;
    validate_range("load.initial", load.initial)?;

    if load.floor >= 100 {
        return Err(ConfigError::Validation("load.floor must be below 100".to_string()));
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    if routing.fallback_default.is_empty() {
        return Err(ConfigError::Validation(
            "routing.fallback_default must name at least one worker".to_string(),
        ));
    }
    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.history_capacity == 0 || pipeline.log_capacity == 0 {
        return Err(ConfigError::Validation(
            "pipeline.history_capacity and pipeline.log_capacity must be greater than zero"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_demand(demand: &DemandConfig) -> Result<(), ConfigError> {
    if demand.enabled && demand.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "demand.interval_secs must be greater than zero when demand is enabled".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

/// Redacted rendering of the provider key for operator output.
pub fn describe_api_key(inference: &InferenceConfig) -> &'static str {
    match &inference.api_key {
        Some(key) if !key.expose_secret().trim().is_empty() => "<redacted>",
        _ => "<unset>",
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.parse::<u8>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| {
        ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    inference: Option<InferencePatch>,
    models: Option<ModelsPatch>,
    load: Option<LoadPatch>,
    routing: Option<RoutingPatch>,
    pipeline: Option<PipelinePatch>,
    server: Option<ServerPatch>,
    demand: Option<DemandPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct InferencePatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    kill_switch: Option<bool>,
    min_interval_ms: Option<u64>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelsPatch {
    router: Option<String>,
    credit: Option<String>,
    fraud: Option<String>,
    esg: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ThresholdsPatch {
    credit: Option<u8>,
    fraud: Option<u8>,
    esg: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct LoadPatch {
    thresholds: Option<ThresholdsPatch>,
    dispatch_increment: Option<LoadRange>,
    completion_decrement: Option<LoadRange>,
    floor: Option<u8>,
    initial: Option<LoadRange>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    fallback_default: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    history_capacity: Option<usize>,
    log_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DemandPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LoadRange, LogFormat};
    use crate::domain::worker::Specialization;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn write_config(dir: &TempDir, body: &str) -> Result<std::path::PathBuf, String> {
        let path = dir.path().join("arbiter.toml");
        fs::write(&path, body).map_err(|err| err.to_string())?;
        Ok(path)
    }

    #[test]
    fn defaults_match_documented_thresholds() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.load.esg_threshold == 60, "esg threshold defaults to 60")?;
        ensure(config.load.credit_threshold == 70, "credit threshold defaults to 70")?;
        ensure(config.load.fraud_threshold == 80, "fraud threshold defaults to 80")?;
        ensure(config.inference.min_interval_ms == 20_000, "min interval defaults to 20s")?;
        ensure(!config.inference.kill_switch, "kill switch defaults off")?;
        ensure(
            config.routing.fallback_default
                == vec![Specialization::Credit, Specialization::Fraud],
            "fallback routes to credit and fraud",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_ARBITER_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[inference]
api_key = "${TEST_ARBITER_API_KEY}"
min_interval_ms = 5000

[load]
floor = 8
dispatch_increment = { min = 10, max = 20 }

[load.thresholds]
esg = 55

[routing]
fallback_default = ["credit"]
"#,
            )?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.inference.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("sk-from-env".to_string()),
                "api key should be interpolated from environment",
            )?;
            ensure(config.inference.min_interval_ms == 5000, "min interval from file")?;
            ensure(config.load.floor == 8, "floor from file")?;
            ensure(
                config.load.dispatch_increment == LoadRange::new(10, 20),
                "dispatch increment from file",
            )?;
            ensure(config.load.esg_threshold == 55, "esg threshold from file")?;
            ensure(
                config.routing.fallback_default == vec![Specialization::Credit],
                "fallback default from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_ARBITER_API_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ARBITER_MIN_INTERVAL_MS", "3000");
        env::set_var("ARBITER_KILL_SWITCH", "TRUE");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[inference]
min_interval_ms = 1000
kill_switch = false

[logging]
level = "warn"
"#,
            )?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.inference.min_interval_ms == 3000, "env should win over file")?;
            ensure(config.inference.kill_switch, "env kill switch should win over file")?;
            ensure(config.logging.level == "debug", "override log level should win")?;
            Ok(())
        })();

        clear_vars(&["ARBITER_MIN_INTERVAL_MS", "ARBITER_KILL_SWITCH"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ARBITER_LOG_LEVEL", "warn");
        env::set_var("ARBITER_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )
        })();

        clear_vars(&["ARBITER_LOG_LEVEL", "ARBITER_LOG_FORMAT"]);
        result
    }

    #[test]
    fn inverted_range_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(
            &dir,
            r#"
[load]
completion_decrement = { min = 30, max = 10 }
"#,
        )?;

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path),
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("load.completion_decrement")
            ),
            "validation failure should name the offending range",
        )
    }

    #[test]
    fn unknown_fallback_worker_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(
            &dir,
            r#"
[routing]
fallback_default = ["legal"]
"#,
        )?;

        let result =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() });
        ensure(
            matches!(result, Err(ConfigError::Validation(ref message)) if message.contains("legal")),
            "unknown worker names should fail validation",
        )
    }

    #[test]
    fn api_key_is_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ARBITER_INFERENCE_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                super::describe_api_key(&config.inference) == "<redacted>",
                "api key should render redacted",
            )
        })();

        clear_vars(&["ARBITER_INFERENCE_API_KEY"]);
        result
    }
}
