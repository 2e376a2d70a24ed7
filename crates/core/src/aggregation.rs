//! Decision aggregation
//!
//! Folds the surviving expert analyses into one verdict. An explicit
//! "decision: approved/declined" statement in any raw analysis wins outright;
//! otherwise the verdict is derived from the extracted signals:
//!
//! - **Declined** when fraud probability >= 0.6, credit risk is high, or the
//!   credit score is below 600
//! - **Approved** otherwise, including when nothing could be extracted

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::analysis::{AnalysisResult, DomainSignals, EsgSignals, RiskLevel};
use crate::domain::decision::{AggregateOutcome, Decision, DecisionBasis, Verdict};

const RATIONALE_SEPARATOR: &str = " | ";
const FRAUD_DECLINE_PROBABILITY: f64 = 0.6;
const MINIMUM_CREDIT_SCORE: u32 = 600;
const ESG_HEALTHY_MEAN: f64 = 50.0;
const POSITIVE_RATINGS: [&str; 7] =
    ["good", "positive", "strong", "excellent", "high", "leader", "compliant"];
const NEGATIONS: [&str; 6] = ["not", "no", "non", "never", "without", "lacks"];
// A positive word followed by one of these describes exposure, not quality.
const EXPOSURE_NOUNS: [&str; 5] = ["risk", "risks", "exposure", "controversy", "concerns"];

static EXPLICIT_DECISION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)decision[^.\n]{0,40}?\b(approved?|declined?|reject(?:ed)?)\b")
        .expect("explicit decision pattern compiles")
});

/// Signals gathered across every result, worst case kept per dimension.
#[derive(Clone, Debug, Default, PartialEq)]
struct CollectedSignals {
    fraud_probability: Option<f64>,
    credit_risk: Option<RiskLevel>,
    credit_score: Option<u32>,
    esg_healthy: Option<bool>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DecisionAggregator;

impl DecisionAggregator {
    pub fn aggregate(&self, results: &[AnalysisResult]) -> AggregateOutcome {
        if results.is_empty() {
            return AggregateOutcome::Incomplete {
                reason: "no expert produced a usable result".to_string(),
            };
        }

        let signals = self.collect(results);
        let mut parts = self.describe(&signals);

        let combined = results
            .iter()
            .map(|result| result.analysis.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if let Some((verdict, phrase)) = explicit_decision(&combined) {
            parts.insert(0, format!("Explicit expert decision: \"{phrase}\""));
            return AggregateOutcome::Decided(Decision {
                verdict,
                rationale: parts.join(RATIONALE_SEPARATOR),
                basis: DecisionBasis::ExplicitStatement,
            });
        }

        let declined = signals
            .fraud_probability
            .is_some_and(|probability| probability >= FRAUD_DECLINE_PROBABILITY)
            || signals.credit_risk == Some(RiskLevel::High)
            || signals.credit_score.is_some_and(|score| score < MINIMUM_CREDIT_SCORE);
        let verdict = if declined { Verdict::Declined } else { Verdict::Approved };

        if parts.is_empty() {
            return AggregateOutcome::Decided(Decision {
                verdict,
                rationale: generic_rationale(verdict).to_string(),
                basis: DecisionBasis::Default,
            });
        }

        AggregateOutcome::Decided(Decision {
            verdict,
            rationale: parts.join(RATIONALE_SEPARATOR),
            basis: DecisionBasis::Signals,
        })
    }

    fn collect(&self, results: &[AnalysisResult]) -> CollectedSignals {
        let mut collected = CollectedSignals::default();

        for result in results {
            match &result.signals {
                DomainSignals::Fraud(fraud) => {
                    if let Some(probability) = fraud.fraud_probability {
                        collected.fraud_probability = Some(
                            collected
                                .fraud_probability
                                .map_or(probability, |current| current.max(probability)),
                        );
                    }
                }
                DomainSignals::Credit(credit) => {
                    if let Some(level) = credit.risk_level {
                        collected.credit_risk = Some(match collected.credit_risk {
                            Some(current) if risk_rank(current) >= risk_rank(level) => current,
                            _ => level,
                        });
                    }
                    if let Some(score) = credit.credit_score {
                        collected.credit_score =
                            Some(collected.credit_score.map_or(score, |current| current.min(score)));
                    }
                }
                DomainSignals::Esg(esg) => {
                    if let Some(healthy) = self.esg_health(esg) {
                        collected.esg_healthy =
                            Some(collected.esg_healthy.map_or(healthy, |current| current && healthy));
                    }
                }
            }
        }

        collected
    }

    fn esg_health(&self, esg: &EsgSignals) -> Option<bool> {
        let by_mean = esg.sub_score_mean().map(|mean| mean >= ESG_HEALTHY_MEAN);
        let by_rating = esg.rating.as_deref().map(rating_is_positive);
        match (by_mean, by_rating) {
            (Some(mean_ok), Some(rating_ok)) => Some(mean_ok || rating_ok),
            (Some(mean_ok), None) => Some(mean_ok),
            (None, rating) => rating,
        }
    }

    fn describe(&self, signals: &CollectedSignals) -> Vec<String> {
        let mut parts = Vec::new();
        if let Some(probability) = signals.fraud_probability {
            parts.push(format!("Fraud probability: {:.0}%", probability * 100.0));
        }
        if let Some(level) = signals.credit_risk {
            parts.push(format!("Credit risk: {}", level.as_str()));
        }
        if let Some(score) = signals.credit_score {
            parts.push(format!("Credit score: {score}"));
        }
        if let Some(healthy) = signals.esg_healthy {
            parts.push(format!("ESG status: {}", if healthy { "healthy" } else { "concerning" }));
        }
        parts
    }
}

fn risk_rank(level: RiskLevel) -> u8 {
    match level {
        RiskLevel::Low => 0,
        RiskLevel::Medium => 1,
        RiskLevel::High => 2,
    }
}

/// Letter grades in the A band, or a positive word that is neither negated
/// ("not good") nor qualifying a risk ("high risk").
fn rating_is_positive(rating: &str) -> bool {
    let normalized = rating.trim().to_ascii_lowercase();
    if normalized.starts_with('a') && normalized.chars().all(|ch| matches!(ch, 'a' | '+' | '-')) {
        return true;
    }

    let words: Vec<&str> = normalized
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();
    words.iter().enumerate().any(|(index, word)| {
        POSITIVE_RATINGS.contains(word)
            && !index.checked_sub(1).is_some_and(|previous| NEGATIONS.contains(&words[previous]))
            && !words.get(index + 1).is_some_and(|next| EXPOSURE_NOUNS.contains(next))
    })
}

fn explicit_decision(text: &str) -> Option<(Verdict, String)> {
    let caps = EXPLICIT_DECISION.captures(text)?;
    let phrase = caps.get(0)?.as_str().trim().to_string();
    let word = caps.get(1)?.as_str().to_ascii_lowercase();
    let verdict = if word.starts_with("approve") { Verdict::Approved } else { Verdict::Declined };
    Some((verdict, phrase))
}

fn generic_rationale(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Approved => {
            "No disqualifying risk signals could be extracted from the expert analyses; approved by default"
        }
        Verdict::Declined => "Declined on the combined expert assessment",
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{rating_is_positive, DecisionAggregator};
    use crate::domain::analysis::{
        AnalysisResult, CreditSignals, DomainSignals, EsgSignals, FraudSignals, RiskLevel,
    };
    use crate::domain::decision::{AggregateOutcome, DecisionBasis, Verdict};

    fn result(signals: DomainSignals, analysis: &str) -> AnalysisResult {
        let specialization = signals.specialization();
        AnalysisResult {
            worker_id: specialization.worker_id(),
            specialization,
            analysis: analysis.to_string(),
            processed_at: Utc::now(),
            signals,
            confidence: 80,
            stub: false,
            fallback_parsed: false,
        }
    }

    fn decided(outcome: AggregateOutcome) -> crate::domain::decision::Decision {
        match outcome {
            AggregateOutcome::Decided(decision) => decision,
            AggregateOutcome::Incomplete { reason } => panic!("unexpected incomplete: {reason}"),
        }
    }

    #[test]
    fn high_fraud_and_high_credit_risk_decline_with_both_signals() {
        let decision = decided(DecisionAggregator::default().aggregate(&[
            result(
                DomainSignals::Fraud(FraudSignals {
                    fraud_probability: Some(0.75),
                    ..FraudSignals::default()
                }),
                r#"{"fraud_probability": 0.75}"#,
            ),
            result(
                DomainSignals::Credit(CreditSignals {
                    risk_level: Some(RiskLevel::High),
                    ..CreditSignals::default()
                }),
                r#"{"risk_level": "high"}"#,
            ),
        ]));

        assert_eq!(decision.verdict, Verdict::Declined);
        assert_eq!(decision.basis, DecisionBasis::Signals);
        assert!(decision.rationale.contains("Fraud probability: 75%"));
        assert!(decision.rationale.contains("Credit risk: high"));
    }

    #[test]
    fn no_signals_approves_with_generic_rationale() {
        let decision = decided(DecisionAggregator::default().aggregate(&[result(
            DomainSignals::Credit(CreditSignals::default()),
            "nothing useful",
        )]));

        assert_eq!(decision.verdict, Verdict::Approved);
        assert_eq!(decision.basis, DecisionBasis::Default);
        assert!(decision.rationale.contains("approved by default"));
    }

    #[test]
    fn empty_input_is_incomplete_not_an_error() {
        let outcome = DecisionAggregator::default().aggregate(&[]);
        assert!(matches!(outcome, AggregateOutcome::Incomplete { .. }));
        assert!(outcome.summary().starts_with("Decision unavailable"));
    }

    #[test]
    fn low_credit_score_declines() {
        let decision = decided(DecisionAggregator::default().aggregate(&[result(
            DomainSignals::Credit(CreditSignals {
                credit_score: Some(590),
                ..CreditSignals::default()
            }),
            "credit score 590",
        )]));

        assert_eq!(decision.verdict, Verdict::Declined);
        assert!(decision.rationale.contains("Credit score: 590"));
    }

    #[test]
    fn explicit_statement_overrides_heuristics() {
        let decision = decided(DecisionAggregator::default().aggregate(&[result(
            DomainSignals::Fraud(FraudSignals {
                fraud_probability: Some(0.9),
                ..FraudSignals::default()
            }),
            "Fraud probability 90%. Final decision: APPROVED after manual verification",
        )]));

        assert_eq!(decision.verdict, Verdict::Approved);
        assert_eq!(decision.basis, DecisionBasis::ExplicitStatement);
        assert!(decision.rationale.contains("Fraud probability: 90%"));
    }

    #[test]
    fn explicit_rejection_declines() {
        let decision = decided(DecisionAggregator::default().aggregate(&[result(
            DomainSignals::Credit(CreditSignals::default()),
            r#"{"decision": "rejected", "reasoning": "insufficient history"}"#,
        )]));

        assert_eq!(decision.verdict, Verdict::Declined);
        assert_eq!(decision.basis, DecisionBasis::ExplicitStatement);
    }

    #[test]
    fn esg_health_is_reported_but_does_not_decide() {
        let decision = decided(DecisionAggregator::default().aggregate(&[result(
            DomainSignals::Esg(EsgSignals {
                environmental: Some(30.0),
                social: Some(40.0),
                governance: Some(35.0),
                ..EsgSignals::default()
            }),
            "weak esg profile",
        )]));

        assert_eq!(decision.verdict, Verdict::Approved);
        assert_eq!(decision.rationale, "ESG status: concerning");
    }

    #[test]
    fn positive_ratings_are_recognised() {
        assert!(rating_is_positive("AA"));
        assert!(rating_is_positive("A+"));
        assert!(rating_is_positive("Strong"));
        assert!(!rating_is_positive("B"));
        assert!(!rating_is_positive("CCC"));
    }

    #[test]
    fn negated_or_risk_qualified_ratings_are_not_positive() {
        assert!(!rating_is_positive("not good"));
        assert!(!rating_is_positive("high risk"));
        assert!(!rating_is_positive("Goodwill impairment"));
        assert!(!rating_is_positive("non-compliant"));
        assert!(rating_is_positive("good, not excellent"));
        assert!(rating_is_positive("industry leader"));
    }

    #[test]
    fn negated_rating_leaves_weak_esg_concerning() {
        let decision = decided(DecisionAggregator::default().aggregate(&[result(
            DomainSignals::Esg(EsgSignals {
                environmental: Some(30.0),
                social: Some(40.0),
                governance: Some(35.0),
                rating: Some("not good".to_string()),
                ..EsgSignals::default()
            }),
            "weak esg profile",
        )]));

        assert_eq!(decision.rationale, "ESG status: concerning");
    }
}
