//! Signal extraction from free-form expert output.
//!
//! Provider replies are supposed to be JSON but routinely arrive wrapped in
//! prose or code fences, with percentages where fractions were asked for, or
//! with no structure at all. Everything here is total: a reply that cannot be
//! decoded degrades to text-pattern extraction and finally to fixed defaults.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::domain::analysis::{
    CreditSignals, DomainSignals, EsgSignals, FraudSignals, RiskLevel,
};
use crate::domain::worker::Specialization;

pub const DEFAULT_SCORE: u32 = 75;
pub const DEFAULT_CONFIDENCE: u8 = 50;

static KEYED_SCORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)score\D{0,12}?(\d{1,3})\b").expect("keyed score pattern compiles")
});
static ANY_INTEGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,3})\b").expect("integer pattern compiles"));
static PROBABILITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)probability\D{0,20}?(\d+(?:\.\d+)?)\s*(%)?")
        .expect("probability pattern compiles")
});
static RISK_LEVEL_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)risk(?:[\s_]+level)?\W{0,4}(low|medium|moderate|high|critical)\b")
        .expect("risk level pattern compiles")
});
static RISK_LEVEL_BEFORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(low|medium|moderate|high|critical)[\s-]+risk\b")
        .expect("risk level pattern compiles")
});
// Connecting words between "rating" and the grade are skipped, not captured.
static ESG_RATING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)rating\W{0,4}(?:(?:is|of|was|at|the|grade|level)\W{1,4}){0,3}([A-Za-z][A-Za-z+\-]*)")
        .expect("rating pattern compiles")
});
static ENVIRONMENTAL_SCORE: Lazy<Regex> = Lazy::new(|| labelled_number("environmental"));
static SOCIAL_SCORE: Lazy<Regex> = Lazy::new(|| labelled_number("social"));
static GOVERNANCE_SCORE: Lazy<Regex> = Lazy::new(|| labelled_number("governance"));

fn labelled_number(label: &str) -> Regex {
    Regex::new(&format!(r"(?i){label}\D{{0,16}}?(\d{{1,3}}(?:\.\d+)?)"))
        .expect("labelled number pattern compiles")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreScale {
    /// 0..=100 style assessment.
    Percent,
    /// 300..=850 bureau-style credit score.
    CreditBureau,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractedScore {
    pub value: u32,
    pub scale: ScoreScale,
    pub defaulted: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedAnalysis {
    pub signals: DomainSignals,
    pub confidence: u8,
    pub fallback_parsed: bool,
}

/// Finds a JSON object in `text`: the whole reply, a fenced block, or the
/// outermost brace pair.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Some(map);
    }

    if let Some(fenced) = strip_code_fence(trimmed) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(fenced) {
            return Some(map);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n').map(|index| index + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// Scans for a score, preferring numbers introduced by "score".
///
/// 300..=850 reads as a bureau credit score, 0..=100 as a percentage style
/// score; anything else is skipped. Falls back to [`DEFAULT_SCORE`].
pub fn extract_score(text: &str) -> ExtractedScore {
    let keyed = KEYED_SCORE.captures_iter(text).filter_map(|caps| caps.get(1));
    let any = ANY_INTEGER.captures_iter(text).filter_map(|caps| caps.get(1));

    for found in keyed.chain(any) {
        let Ok(value) = found.as_str().parse::<u32>() else {
            continue;
        };
        if let Some(scale) = classify_score(value) {
            return ExtractedScore { value, scale, defaulted: false };
        }
    }

    ExtractedScore { value: DEFAULT_SCORE, scale: ScoreScale::Percent, defaulted: true }
}

fn classify_score(value: u32) -> Option<ScoreScale> {
    match value {
        300..=850 => Some(ScoreScale::CreditBureau),
        0..=100 => Some(ScoreScale::Percent),
        _ => None,
    }
}

/// Maps a fraction or a percentage onto 0..=1.
pub fn normalize_probability(value: f64) -> Option<f64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let fraction = if value > 1.0 { value / 100.0 } else { value };
    (fraction <= 1.0).then_some(fraction)
}

pub fn extract_probability(text: &str) -> Option<f64> {
    let caps = PROBABILITY.captures(text)?;
    let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
    if caps.get(2).is_some() {
        return normalize_probability(value / 100.0);
    }
    normalize_probability(value)
}

pub fn extract_risk_level(text: &str) -> Option<RiskLevel> {
    RISK_LEVEL_AFTER
        .captures(text)
        .or_else(|| RISK_LEVEL_BEFORE.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|found| RiskLevel::parse(found.as_str()))
}

fn extract_labelled_number(text: &str, pattern: &Regex) -> Option<f64> {
    pattern.captures(text)?.get(1)?.as_str().parse::<f64>().ok()
}

/// Decodes an expert reply into typed signals, structured first, text second.
pub fn parse_expert_output(specialization: Specialization, text: &str) -> ParsedAnalysis {
    if let Some(object) = extract_json_object(text) {
        let signals = signals_from_json(specialization, &object);
        if has_any_signal(&signals) {
            let confidence = object
                .get("confidence")
                .and_then(number_of)
                .map(confidence_percent)
                .unwrap_or(DEFAULT_CONFIDENCE);
            return ParsedAnalysis { signals, confidence, fallback_parsed: false };
        }
    }

    ParsedAnalysis {
        signals: signals_from_text(specialization, text),
        confidence: DEFAULT_CONFIDENCE,
        fallback_parsed: true,
    }
}

fn signals_from_json(specialization: Specialization, object: &Map<String, Value>) -> DomainSignals {
    match specialization {
        Specialization::Credit => {
            let mut signals = CreditSignals {
                risk_level: first_string(object, &["risk_level", "riskLevel", "risk"])
                    .and_then(|value| RiskLevel::parse(&value)),
                ..CreditSignals::default()
            };
            if let Some(score) = first_number(object, &["credit_score", "creditScore", "score"]) {
                let score = score.round().max(0.0) as u32;
                match classify_score(score) {
                    Some(ScoreScale::CreditBureau) => signals.credit_score = Some(score),
                    Some(ScoreScale::Percent) => signals.assessment_score = Some(score),
                    None => {}
                }
            }
            DomainSignals::Credit(signals)
        }
        Specialization::Fraud => DomainSignals::Fraud(FraudSignals {
            fraud_probability: first_number(
                object,
                &["fraud_probability", "fraudProbability", "probability"],
            )
            .and_then(normalize_probability),
            risk_score: first_number(object, &["risk_score", "riskScore", "score"])
                .filter(|value| (0.0..=100.0).contains(value))
                .map(|value| value.round() as u32),
            risk_level: first_string(object, &["risk_level", "riskLevel", "risk"])
                .and_then(|value| RiskLevel::parse(&value)),
        }),
        Specialization::Esg => DomainSignals::Esg(EsgSignals {
            environmental: first_number(
                object,
                &["environmental_score", "environmentalScore", "environmental"],
            ),
            social: first_number(object, &["social_score", "socialScore", "social"]),
            governance: first_number(
                object,
                &["governance_score", "governanceScore", "governance"],
            ),
            rating: first_string(object, &["esg_rating", "esgRating", "rating"]),
            overall_score: first_number(object, &["overall_score", "overallScore", "score"])
                .filter(|value| (0.0..=100.0).contains(value))
                .map(|value| value.round() as u32),
        }),
    }
}

fn signals_from_text(specialization: Specialization, text: &str) -> DomainSignals {
    let score = extract_score(text);
    let percent_score = (score.scale == ScoreScale::Percent).then_some(score.value);

    match specialization {
        Specialization::Credit => DomainSignals::Credit(CreditSignals {
            credit_score: (score.scale == ScoreScale::CreditBureau).then_some(score.value),
            assessment_score: percent_score,
            risk_level: extract_risk_level(text),
        }),
        Specialization::Fraud => DomainSignals::Fraud(FraudSignals {
            fraud_probability: extract_probability(text),
            risk_score: percent_score,
            risk_level: extract_risk_level(text),
        }),
        Specialization::Esg => DomainSignals::Esg(EsgSignals {
            environmental: extract_labelled_number(text, &ENVIRONMENTAL_SCORE),
            social: extract_labelled_number(text, &SOCIAL_SCORE),
            governance: extract_labelled_number(text, &GOVERNANCE_SCORE),
            rating: ESG_RATING
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|found| found.as_str().to_string()),
            overall_score: percent_score,
        }),
    }
}

fn has_any_signal(signals: &DomainSignals) -> bool {
    match signals {
        DomainSignals::Credit(credit) => {
            credit.credit_score.is_some()
                || credit.assessment_score.is_some()
                || credit.risk_level.is_some()
        }
        DomainSignals::Fraud(fraud) => {
            fraud.fraud_probability.is_some()
                || fraud.risk_score.is_some()
                || fraud.risk_level.is_some()
        }
        DomainSignals::Esg(esg) => {
            esg.environmental.is_some()
                || esg.social.is_some()
                || esg.governance.is_some()
                || esg.rating.is_some()
                || esg.overall_score.is_some()
        }
    }
}

fn first_number(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| object.get(*key).and_then(number_of))
}

fn first_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match object.get(*key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    })
}

/// Numbers sometimes arrive as strings, occasionally with a trailing `%`.
fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => {
            let raw = raw.trim();
            match raw.strip_suffix('%') {
                Some(percent) => percent.trim().parse::<f64>().ok().map(|value| value / 100.0),
                None => raw.parse::<f64>().ok(),
            }
        }
        _ => None,
    }
}

fn confidence_percent(value: f64) -> u8 {
    let percent = if value <= 1.0 { value * 100.0 } else { value };
    percent.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::{
        extract_json_object, extract_probability, extract_risk_level, extract_score,
        normalize_probability, parse_expert_output, ScoreScale, DEFAULT_CONFIDENCE,
        DEFAULT_SCORE,
    };
    use crate::domain::analysis::{DomainSignals, RiskLevel};
    use crate::domain::worker::Specialization;

    #[test]
    fn keyed_credit_score_is_extracted() {
        let score = extract_score("Applicant looks stable, credit score: 712 with low utilisation");
        assert_eq!(score.value, 712);
        assert_eq!(score.scale, ScoreScale::CreditBureau);
        assert!(!score.defaulted);
    }

    #[test]
    fn missing_number_falls_back_to_default() {
        let score = extract_score("No figures were available for this applicant.");
        assert_eq!(score.value, DEFAULT_SCORE);
        assert!(score.defaulted);
    }

    #[test]
    fn out_of_range_numbers_are_skipped() {
        let score = extract_score("Reviewed 250 transactions, overall rating 64");
        assert_eq!(score.value, 64);
        assert_eq!(score.scale, ScoreScale::Percent);
    }

    #[test]
    fn json_is_found_inside_fences_and_prose() {
        let fenced = "Here you go:\n```json\n{\"score\": 80}\n```";
        assert!(extract_json_object(fenced).is_some());

        let prose = "Result follows {\"risk_level\": \"low\"} end.";
        assert!(extract_json_object(prose).is_some());

        assert!(extract_json_object("no structure here").is_none());
    }

    #[test]
    fn probability_is_normalized_from_percent_or_fraction() {
        assert_eq!(normalize_probability(75.0), Some(0.75));
        assert_eq!(normalize_probability(0.4), Some(0.4));
        assert_eq!(normalize_probability(-1.0), None);
        assert_eq!(extract_probability("Fraud probability: 62%"), Some(0.62));
        assert_eq!(extract_probability("probability of fraud is 0.3"), Some(0.3));
    }

    #[test]
    fn risk_level_reads_both_phrasings() {
        assert_eq!(extract_risk_level("Risk level: HIGH"), Some(RiskLevel::High));
        assert_eq!(extract_risk_level("this is a moderate risk profile"), Some(RiskLevel::Medium));
        assert_eq!(extract_risk_level("nothing notable"), None);
    }

    #[test]
    fn structured_credit_reply_is_decoded() {
        let parsed = parse_expert_output(
            Specialization::Credit,
            r#"{"credit_score": 580, "risk_level": "High", "confidence": 0.9, "reasoning": "late payments"}"#,
        );
        assert!(!parsed.fallback_parsed);
        assert_eq!(parsed.confidence, 90);
        match parsed.signals {
            DomainSignals::Credit(credit) => {
                assert_eq!(credit.credit_score, Some(580));
                assert_eq!(credit.risk_level, Some(RiskLevel::High));
            }
            other => panic!("unexpected signals: {other:?}"),
        }
    }

    #[test]
    fn structured_fraud_percentage_is_normalized() {
        let parsed =
            parse_expert_output(Specialization::Fraud, r#"{"fraud_probability": "85%"}"#);
        match parsed.signals {
            DomainSignals::Fraud(fraud) => assert_eq!(fraud.fraud_probability, Some(0.85)),
            other => panic!("unexpected signals: {other:?}"),
        }
    }

    #[test]
    fn unstructured_reply_uses_text_fallback() {
        let parsed = parse_expert_output(
            Specialization::Esg,
            "Environmental: 70, Social 40, Governance score 55. Rating: B",
        );
        assert!(parsed.fallback_parsed);
        assert_eq!(parsed.confidence, DEFAULT_CONFIDENCE);
        match parsed.signals {
            DomainSignals::Esg(esg) => {
                assert_eq!(esg.environmental, Some(70.0));
                assert_eq!(esg.social, Some(40.0));
                assert_eq!(esg.governance, Some(55.0));
                assert_eq!(esg.rating.as_deref(), Some("B"));
            }
            other => panic!("unexpected signals: {other:?}"),
        }
    }

    fn esg_rating(text: &str) -> Option<String> {
        match parse_expert_output(Specialization::Esg, text).signals {
            DomainSignals::Esg(esg) => esg.rating,
            other => panic!("unexpected signals: {other:?}"),
        }
    }

    #[test]
    fn rating_skips_connecting_words() {
        assert_eq!(esg_rating("The overall ESG rating is AA.").as_deref(), Some("AA"));
        assert_eq!(esg_rating("Assigned a rating of A+ after review").as_deref(), Some("A+"));
        assert_eq!(esg_rating("Rating was BBB- last quarter").as_deref(), Some("BBB-"));
        assert_eq!(esg_rating("No grade given"), None);
    }

    #[test]
    fn labelled_scores_are_read_per_pillar() {
        let first = parse_expert_output(Specialization::Esg, "Governance 12, social 34");
        let second = parse_expert_output(Specialization::Esg, "environmental impact 88.5");
        match (first.signals, second.signals) {
            (DomainSignals::Esg(first), DomainSignals::Esg(second)) => {
                assert_eq!(first.environmental, None);
                assert_eq!(first.social, Some(34.0));
                assert_eq!(first.governance, Some(12.0));
                assert_eq!(second.environmental, Some(88.5));
                assert_eq!(second.governance, None);
            }
            other => panic!("unexpected signals: {other:?}"),
        }
    }

    #[test]
    fn json_without_domain_fields_falls_back_to_text() {
        let parsed = parse_expert_output(Specialization::Credit, r#"{"note": "n/a"}"#);
        assert!(parsed.fallback_parsed);
        match parsed.signals {
            DomainSignals::Credit(credit) => {
                assert_eq!(credit.assessment_score, Some(DEFAULT_SCORE));
                assert_eq!(credit.credit_score, None);
            }
            other => panic!("unexpected signals: {other:?}"),
        }
    }
}
