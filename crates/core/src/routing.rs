//! Routing policy pieces that do not need a provider: the keyword fallback
//! classifier, the routing query sent to the model, and decoding its reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::request::Request;
use crate::domain::worker::{Specialization, Worker, WorkerId};
use crate::extraction::extract_json_object;

pub const SPECIALIZATION_WEIGHT_PCT: u8 = 35;
pub const LOAD_WEIGHT_PCT: u8 = 40;
pub const RESPONSE_TIME_WEIGHT_PCT: u8 = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingSource {
    Inference,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub workers: Vec<WorkerId>,
    pub reasoning: String,
    pub source: RoutingSource,
}

const KEYWORD_TABLE: [(Specialization, &[&str]); 3] = [
    (Specialization::Credit, &["loan", "credit"]),
    (Specialization::Fraud, &["fraud", "claim"]),
    (Specialization::Esg, &["esg", "investment"]),
];

/// Deterministic keyword router used whenever inference-assisted routing is
/// unavailable. Pure: the plan depends only on the request type text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackRouter {
    default_workers: Vec<Specialization>,
}

impl Default for FallbackRouter {
    fn default() -> Self {
        Self::new(vec![Specialization::Credit, Specialization::Fraud])
    }
}

impl FallbackRouter {
    pub fn new(default_workers: Vec<Specialization>) -> Self {
        Self { default_workers }
    }

    pub fn route(&self, request_type: &str) -> RoutingPlan {
        let normalized = request_type.to_lowercase();
        let mut matched: Vec<(Specialization, &str)> = Vec::new();

        for (specialization, keywords) in KEYWORD_TABLE {
            if let Some(keyword) = keywords.iter().find(|keyword| normalized.contains(**keyword)) {
                matched.push((specialization, *keyword));
            }
        }

        if matched.is_empty() {
            let names: Vec<&str> = self.default_workers.iter().map(|spec| spec.as_str()).collect();
            return RoutingPlan {
                workers: self.default_workers.iter().map(Specialization::worker_id).collect(),
                reasoning: format!(
                    "Fallback routing: no keyword matched `{request_type}`, treating it as a compound request for {}",
                    names.join(" + ")
                ),
                source: RoutingSource::Fallback,
            };
        }

        let reasons: Vec<String> = matched
            .iter()
            .map(|(specialization, keyword)| format!("`{keyword}` -> {}", specialization.as_str()))
            .collect();
        RoutingPlan {
            workers: matched.iter().map(|(specialization, _)| specialization.worker_id()).collect(),
            reasoning: format!("Fallback routing by keyword: {}", reasons.join(", ")),
            source: RoutingSource::Fallback,
        }
    }
}

/// Prompt asking the model to pick workers for `request` given the current load picture.
pub fn build_routing_query(request: &Request, workers: &[Worker]) -> String {
    let mut lines = vec![
        "You are the dispatcher for a pool of specialised analysis agents.".to_string(),
        format!(
            "Request: type=\"{}\" priority={} id={}",
            request.request_type,
            request.priority.as_str(),
            request.id
        ),
        String::new(),
        "Agents:".to_string(),
    ];

    for worker in workers {
        lines.push(format!(
            "- {} (specialization={}, load={}%, queue_depth={}, status={}, scaling={})",
            worker.id,
            worker.specialization.as_str(),
            worker.current_load,
            worker.queue_depth(),
            worker.status.as_str(),
            worker.is_scaling,
        ));
    }

    lines.extend([
        String::new(),
        format!(
            "Decision policy: specialization fit {SPECIALIZATION_WEIGHT_PCT}%, current load {LOAD_WEIGHT_PCT}%, historical response time {RESPONSE_TIME_WEIGHT_PCT}%."
        ),
        "Select every agent whose expertise the request needs; avoid overloaded agents when an alternative exists.".to_string(),
        r#"Respond with JSON only: {"selected_agents": ["credit-agent"], "reasoning": "..."}"#
            .to_string(),
    ]);

    lines.join("\n")
}

/// Decodes the routing reply. `None` means unusable; callers fall back.
///
/// Names that do not resolve to a worker in `known` are dropped.
pub fn parse_routing_reply(text: &str, known: &[WorkerId]) -> Option<RoutingPlan> {
    let object = extract_json_object(text)?;
    let selected = ["selected_agents", "selectedAgents", "agents", "workers"]
        .iter()
        .find_map(|key| object.get(*key))?;

    let Value::Array(entries) = selected else {
        return None;
    };

    let mut workers: Vec<WorkerId> = Vec::new();
    for entry in entries {
        let Some(name) = entry.as_str() else {
            continue;
        };
        let Some(specialization) = Specialization::parse(name) else {
            continue;
        };
        let id = specialization.worker_id();
        if known.contains(&id) && !workers.contains(&id) {
            workers.push(id);
        }
    }

    if workers.is_empty() {
        return None;
    }

    let reasoning = object
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|reasoning| !reasoning.is_empty())
        .unwrap_or("model selected agents without stating a reason")
        .to_string();

    Some(RoutingPlan { workers, reasoning, source: RoutingSource::Inference })
}

#[cfg(test)]
mod tests {
    use super::{build_routing_query, parse_routing_reply, FallbackRouter, RoutingSource};
    use crate::domain::request::{Priority, Request};
    use crate::domain::worker::{Specialization, Worker, WorkerId};

    fn known() -> Vec<WorkerId> {
        Specialization::ALL.iter().map(Specialization::worker_id).collect()
    }

    #[test]
    fn keywords_route_to_matching_specialist() {
        let router = FallbackRouter::default();

        assert_eq!(
            router.route("Personal Loan Application").workers,
            vec![Specialization::Credit.worker_id()]
        );
        assert_eq!(
            router.route("Insurance CLAIM review").workers,
            vec![Specialization::Fraud.worker_id()]
        );
        assert_eq!(
            router.route("Green investment screening").workers,
            vec![Specialization::Esg.worker_id()]
        );
    }

    #[test]
    fn unmatched_request_goes_to_credit_and_fraud() {
        let plan = FallbackRouter::default().route("Vendor onboarding");
        assert_eq!(
            plan.workers,
            vec![Specialization::Credit.worker_id(), Specialization::Fraud.worker_id()]
        );
        assert_eq!(plan.source, RoutingSource::Fallback);
    }

    #[test]
    fn fallback_is_idempotent_for_identical_text() {
        let router = FallbackRouter::default();
        for text in ["Loan", "fraud claim", "ESG credit investment", "something else", ""] {
            assert_eq!(router.route(text), router.route(text));
        }
    }

    #[test]
    fn compound_keywords_select_each_matching_worker() {
        let plan = FallbackRouter::default().route("Credit line with fraud flag");
        assert_eq!(
            plan.workers,
            vec![Specialization::Credit.worker_id(), Specialization::Fraud.worker_id()]
        );
    }

    #[test]
    fn routing_query_states_policy_and_loads() {
        let request = Request::new("Loan Application", Priority::High);
        let workers = vec![Worker::new(Specialization::Credit, 72, 70)];
        let query = build_routing_query(&request, &workers);

        assert!(query.contains("specialization fit 35%"));
        assert!(query.contains("current load 40%"));
        assert!(query.contains("historical response time 25%"));
        assert!(query.contains("credit-agent"));
        assert!(query.contains("load=72%"));
    }

    #[test]
    fn reply_with_known_agents_is_accepted() {
        let plan = parse_routing_reply(
            "```json\n{\"selected_agents\": [\"fraud-agent\", \"esg\", \"legal\"], \"reasoning\": \"claim with green angle\"}\n```",
            &known(),
        )
        .expect("usable reply");

        assert_eq!(
            plan.workers,
            vec![Specialization::Fraud.worker_id(), Specialization::Esg.worker_id()]
        );
        assert_eq!(plan.reasoning, "claim with green angle");
        assert_eq!(plan.source, RoutingSource::Inference);
    }

    #[test]
    fn unusable_replies_are_rejected() {
        assert!(parse_routing_reply("route it to credit please", &known()).is_none());
        assert!(parse_routing_reply(r#"{"selected_agents": []}"#, &known()).is_none());
        assert!(parse_routing_reply(r#"{"selected_agents": ["legal"]}"#, &known()).is_none());
        assert!(parse_routing_reply(r#"{"selected_agents": "credit"}"#, &known()).is_none());
    }
}
