use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::worker::{Specialization, WorkerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" | "critical" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditSignals {
    /// Bureau-style score in 300..=850.
    pub credit_score: Option<u32>,
    /// Generic 0..=100 assessment score.
    pub assessment_score: Option<u32>,
    pub risk_level: Option<RiskLevel>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FraudSignals {
    /// Always on the 0..=1 scale.
    pub fraud_probability: Option<f64>,
    pub risk_score: Option<u32>,
    pub risk_level: Option<RiskLevel>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EsgSignals {
    pub environmental: Option<f64>,
    pub social: Option<f64>,
    pub governance: Option<f64>,
    pub rating: Option<String>,
    pub overall_score: Option<u32>,
}

impl EsgSignals {
    pub fn sub_score_mean(&self) -> Option<f64> {
        let scores: Vec<f64> =
            [self.environmental, self.social, self.governance].into_iter().flatten().collect();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Parsed domain fields, one variant per specialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainSignals {
    Credit(CreditSignals),
    Fraud(FraudSignals),
    Esg(EsgSignals),
}

impl DomainSignals {
    pub fn empty(specialization: Specialization) -> Self {
        match specialization {
            Specialization::Credit => Self::Credit(CreditSignals::default()),
            Specialization::Fraud => Self::Fraud(FraudSignals::default()),
            Specialization::Esg => Self::Esg(EsgSignals::default()),
        }
    }

    pub fn specialization(&self) -> Specialization {
        match self {
            Self::Credit(_) => Specialization::Credit,
            Self::Fraud(_) => Specialization::Fraud,
            Self::Esg(_) => Specialization::Esg,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub worker_id: WorkerId,
    pub specialization: Specialization,
    pub analysis: String,
    pub processed_at: DateTime<Utc>,
    pub signals: DomainSignals,
    pub confidence: u8,
    /// Produced by the kill-switch path instead of a provider call.
    pub stub: bool,
    /// Fields came from text-pattern fallback rather than structured decode.
    pub fallback_parsed: bool,
}
