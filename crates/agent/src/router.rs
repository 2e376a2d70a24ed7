use std::sync::Arc;

use tracing::{info, warn};

use arbiter_core::config::AppConfig;
use arbiter_core::domain::request::Request;
use arbiter_core::domain::worker::{Worker, WorkerId};
use arbiter_core::routing::{build_routing_query, parse_routing_reply, FallbackRouter, RoutingPlan};

use crate::llm::PromptSpec;
use crate::rate_limit::RateLimitedClient;

const ROUTER_SYSTEM_PROMPT: &str =
    "You route classification requests to specialist agents. Answer with JSON only.";

/// Inference-assisted worker selection. Never fails: every problem on the
/// inference path lands on the keyword fallback.
pub struct RoutingEngine {
    client: Arc<RateLimitedClient>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    fallback: FallbackRouter,
}

impl RoutingEngine {
    pub fn new(
        client: Arc<RateLimitedClient>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
        fallback: FallbackRouter,
    ) -> Self {
        Self { client, model: model.into(), max_tokens, temperature, fallback }
    }

    pub fn from_config(config: &AppConfig, client: Arc<RateLimitedClient>) -> Self {
        Self::new(
            client,
            config.models.router.clone(),
            config.inference.max_tokens,
            config.inference.temperature,
            FallbackRouter::new(config.routing.fallback_default.clone()),
        )
    }

    pub async fn route(&self, request: &Request, workers: &[Worker]) -> RoutingPlan {
        if self.client.kill_switch_active() {
            return self.fall_back(request, "kill switch active");
        }

        let spec = PromptSpec {
            system: Some(ROUTER_SYSTEM_PROMPT.to_string()),
            prompt: build_routing_query(request, workers),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let reply = match self.client.invoke(&spec).await {
            Ok(reply) => reply,
            Err(error) => return self.fall_back(request, &format!("routing call failed: {error}")),
        };

        let known: Vec<WorkerId> = workers.iter().map(|worker| worker.id.clone()).collect();
        match parse_routing_reply(&reply, &known) {
            Some(plan) => {
                info!(
                    event_name = "routing.plan.selected",
                    request_id = %request.id,
                    source = "inference",
                    workers = %join_ids(&plan.workers),
                    "routing decided by inference"
                );
                plan
            }
            None => self.fall_back(request, "routing reply was not usable"),
        }
    }

    fn fall_back(&self, request: &Request, cause: &str) -> RoutingPlan {
        let mut plan = self.fallback.route(&request.request_type);
        plan.reasoning = format!("{} ({cause})", plan.reasoning);
        warn!(
            event_name = "routing.plan.fallback",
            request_id = %request.id,
            cause,
            workers = %join_ids(&plan.workers),
            "routing fell back to keyword classifier"
        );
        plan
    }
}

fn join_ids(ids: &[WorkerId]) -> String {
    ids.iter().map(|id| id.0.as_str()).collect::<Vec<_>>().join(",")
}
