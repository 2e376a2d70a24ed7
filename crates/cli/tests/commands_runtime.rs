use std::env;
use std::sync::{Mutex, OnceLock};

use arbiter_cli::commands::{config, submit, workers};
use arbiter_core::domain::request::Priority;
use serde_json::Value;

#[test]
fn submit_with_kill_switch_completes_offline() {
    with_env(&[], || {
        let result = submit::run("Personal Loan Application", Priority::High, true);
        assert_eq!(result.exit_code, 0, "expected kill-switch submit to succeed");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "submit");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["details"]["request"]["status"], "completed");
        assert_eq!(payload["details"]["routing"]["source"], "fallback");

        let results = payload["details"]["results"].as_array().expect("results array");
        assert!(!results.is_empty());
        assert!(results.iter().all(|result| result["stub"] == true));
        assert!(payload["message"].as_str().unwrap_or_default().contains("Decision: Approved"));
    });
}

#[test]
fn submit_honors_kill_switch_from_env() {
    with_env(&[("ARBITER_KILL_SWITCH", "true")], || {
        let result = submit::run("Fraud claim", Priority::Low, false);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["details"]["request"]["assigned_agents"], serde_json::json!(["fraud-agent"]));
    });
}

#[test]
fn submit_with_unreachable_provider_completes_without_decision() {
    with_env(
        &[
            ("ARBITER_INFERENCE_BASE_URL", "http://127.0.0.1:9"),
            ("ARBITER_MIN_INTERVAL_MS", "0"),
            ("ARBITER_INFERENCE_TIMEOUT_SECS", "2"),
        ],
        || {
            let result = submit::run("Vendor onboarding", Priority::Medium, false);
            assert_eq!(result.exit_code, 0, "worker failures must not fail the request");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["details"]["request"]["status"], "completed");
            assert_eq!(payload["details"]["outcome"]["state"], "incomplete");
            assert_eq!(payload["details"]["failures"].as_array().map(Vec::len), Some(2));
        },
    );
}

#[test]
fn submit_rejects_invalid_provider_url() {
    with_env(&[("ARBITER_INFERENCE_BASE_URL", "ftp://example.invalid")], || {
        let result = submit::run("Loan", Priority::Medium, false);
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn submit_rejects_blank_request_type() {
    with_env(&[], || {
        let result = submit::run("   ", Priority::Medium, true);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

#[test]
fn workers_lists_one_worker_per_specialization() {
    with_env(&[("ARBITER_THRESHOLD_ESG", "65")], || {
        let result = workers::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let listed = payload["details"]["workers"].as_array().expect("workers array");
        assert_eq!(listed.len(), 3);

        let esg = listed.iter().find(|worker| worker["id"] == "esg-agent").expect("esg worker");
        assert_eq!(esg["scaling_threshold"], 65);
        assert!(listed.iter().all(|worker| worker["queue"].as_array().is_some_and(Vec::is_empty)));
    });
}

#[test]
fn config_attributes_env_sources_and_redacts_api_key() {
    with_env(&[("ARBITER_KILL_SWITCH", "true"), ("ARBITER_INFERENCE_API_KEY", "sk-secret")], || {
        let output = config::run();

        assert!(output.contains("- inference.kill_switch = true (source: env (ARBITER_KILL_SWITCH))"));
        assert!(output.contains("- inference.api_key = <redacted>"));
        assert!(!output.contains("sk-secret"));
        assert!(output.contains("- routing.fallback_default = credit,fraud (source: default)"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "ARBITER_INFERENCE_BASE_URL",
        "ARBITER_INFERENCE_API_KEY",
        "ARBITER_INFERENCE_TIMEOUT_SECS",
        "ARBITER_KILL_SWITCH",
        "ARBITER_MIN_INTERVAL_MS",
        "ARBITER_MODEL_ROUTER",
        "ARBITER_MODEL_CREDIT",
        "ARBITER_MODEL_FRAUD",
        "ARBITER_MODEL_ESG",
        "ARBITER_THRESHOLD_CREDIT",
        "ARBITER_THRESHOLD_FRAUD",
        "ARBITER_THRESHOLD_ESG",
        "ARBITER_SERVER_BIND_ADDRESS",
        "ARBITER_SERVER_HEALTH_CHECK_PORT",
        "ARBITER_DEMAND_ENABLED",
        "ARBITER_DEMAND_INTERVAL_SECS",
        "ARBITER_LOGGING_LEVEL",
        "ARBITER_LOGGING_FORMAT",
        "ARBITER_LOG_LEVEL",
        "ARBITER_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
