//! Expert executors: one prompt shape per specialization, one shared client.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use arbiter_core::config::{InferenceConfig, ModelConfig};
use arbiter_core::domain::analysis::{AnalysisResult, DomainSignals};
use arbiter_core::domain::request::Request;
use arbiter_core::domain::worker::{Specialization, WorkerId};
use arbiter_core::extraction::parse_expert_output;

use crate::llm::{InferenceError, PromptSpec};
use crate::rate_limit::RateLimitedClient;

pub struct ExpertExecutor {
    specialization: Specialization,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: Arc<RateLimitedClient>,
}

impl ExpertExecutor {
    pub fn new(
        specialization: Specialization,
        model: impl Into<String>,
        inference: &InferenceConfig,
        client: Arc<RateLimitedClient>,
    ) -> Self {
        Self {
            specialization,
            model: model.into(),
            max_tokens: inference.max_tokens,
            temperature: inference.temperature,
            client,
        }
    }

    /// One executor per specialization, all sharing `client`.
    pub fn panel(
        models: &ModelConfig,
        inference: &InferenceConfig,
        client: Arc<RateLimitedClient>,
    ) -> Vec<Self> {
        Specialization::ALL
            .into_iter()
            .map(|specialization| {
                Self::new(
                    specialization,
                    models.for_specialization(specialization),
                    inference,
                    Arc::clone(&client),
                )
            })
            .collect()
    }

    pub fn specialization(&self) -> Specialization {
        self.specialization
    }

    pub fn worker_id(&self) -> WorkerId {
        self.specialization.worker_id()
    }

    pub fn build_prompt(&self, request: &Request) -> PromptSpec {
        PromptSpec {
            system: Some(system_prompt(self.specialization).to_string()),
            prompt: user_prompt(self.specialization, request),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Only a failed call is an error. Unparseable replies degrade to
    /// text extraction and defaults; the kill switch yields a stub result.
    pub async fn execute(&self, request: &Request) -> Result<AnalysisResult, InferenceError> {
        if self.client.kill_switch_active() {
            debug!(
                event_name = "expert.analysis.stubbed",
                request_id = %request.id,
                worker_id = %self.worker_id(),
                "kill switch active, returning stub analysis"
            );
            return Ok(self.stub_result());
        }

        let text = self.client.invoke(&self.build_prompt(request)).await?;
        let parsed = parse_expert_output(self.specialization, &text);

        info!(
            event_name = "expert.analysis.completed",
            request_id = %request.id,
            worker_id = %self.worker_id(),
            fallback_parsed = parsed.fallback_parsed,
            confidence = parsed.confidence,
            "expert analysis completed"
        );

        Ok(AnalysisResult {
            worker_id: self.worker_id(),
            specialization: self.specialization,
            analysis: text,
            processed_at: Utc::now(),
            signals: parsed.signals,
            confidence: parsed.confidence,
            stub: false,
            fallback_parsed: parsed.fallback_parsed,
        })
    }

    fn stub_result(&self) -> AnalysisResult {
        AnalysisResult {
            worker_id: self.worker_id(),
            specialization: self.specialization,
            analysis: format!(
                "[stub] {} skipped: kill switch active, no provider call made.",
                self.specialization.display_name()
            ),
            processed_at: Utc::now(),
            signals: DomainSignals::empty(self.specialization),
            confidence: 0,
            stub: true,
            fallback_parsed: false,
        }
    }
}

fn system_prompt(specialization: Specialization) -> &'static str {
    match specialization {
        Specialization::Credit => {
            "You are a credit risk analyst. Assess repayment capacity and creditworthiness."
        }
        Specialization::Fraud => {
            "You are a fraud investigator. Estimate how likely the request is fraudulent."
        }
        Specialization::Esg => {
            "You are an ESG analyst. Score environmental, social and governance exposure."
        }
    }
}

fn response_shape(specialization: Specialization) -> &'static str {
    match specialization {
        Specialization::Credit => {
            r#"{"credit_score": <300-850>, "risk_level": "low|medium|high", "confidence": <0-100>, "reasoning": "..."}"#
        }
        Specialization::Fraud => {
            r#"{"fraud_probability": <0.0-1.0>, "risk_score": <0-100>, "risk_level": "low|medium|high", "confidence": <0-100>, "reasoning": "..."}"#
        }
        Specialization::Esg => {
            r#"{"environmental_score": <0-100>, "social_score": <0-100>, "governance_score": <0-100>, "esg_rating": "AAA..CCC", "confidence": <0-100>, "reasoning": "..."}"#
        }
    }
}

fn user_prompt(specialization: Specialization, request: &Request) -> String {
    [
        format!("Request id: {}", request.id),
        format!("Request type: {}", request.request_type),
        format!("Priority: {}", request.priority.as_str()),
        format!("Submitted at: {}", request.created_at.to_rfc3339()),
        String::new(),
        "Respond with a single JSON object and nothing else:".to_string(),
        response_shape(specialization).to_string(),
    ]
    .join("\n")
}
