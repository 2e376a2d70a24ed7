use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Approved,
    Declined,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "Approved",
            Self::Declined => "Declined",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBasis {
    /// An expert stated the outcome outright.
    ExplicitStatement,
    /// Derived from extracted numeric/categorical signals.
    Signals,
    /// Nothing usable was extracted; default verdict.
    Default,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub rationale: String,
    pub basis: DecisionBasis,
}

/// Aggregation outcome. Zero usable results is a recognised state, not an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AggregateOutcome {
    Decided(Decision),
    Incomplete { reason: String },
}

impl AggregateOutcome {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Decided(decision) => Some(decision),
            Self::Incomplete { .. } => None,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Decided(decision) => {
                format!("Decision: {} - {}", decision.verdict.as_str(), decision.rationale)
            }
            Self::Incomplete { reason } => format!("Decision unavailable - {reason}"),
        }
    }
}
