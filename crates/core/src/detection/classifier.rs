use crate::types::{RiskLevel, TriggerTier, Verdict};

use super::rules::RuleSet;

/// Classify normalized (lower-cased) text against the rule tables.
///
/// Pure: no clock, no I/O, no shared state. Matching is plain substring
/// containment, so "end it" also matches inside "weekend it".
pub fn classify(text: &str, rules: &RuleSet) -> Verdict {
    let matched_hard = matches(text, rules.phrases(TriggerTier::Hard));
    let matched_soft = matches(text, rules.phrases(TriggerTier::Soft));
    let matched_planning = matches(text, rules.phrases(TriggerTier::Planning));

    let (risk_level, escalated) = if !matched_hard.is_empty() {
        (RiskLevel::High, false)
    } else if !matched_soft.is_empty() && !matched_planning.is_empty() {
        (RiskLevel::High, true)
    } else if matched_soft.len() >= 2 {
        (RiskLevel::Medium, false)
    } else {
        (RiskLevel::Low, false)
    };

    Verdict::new(risk_level, matched_hard, matched_soft, matched_planning, escalated)
}

fn matches(text: &str, phrases: &[String]) -> Vec<String> {
    phrases
        .iter()
        .filter(|p| text.contains(p.as_str()))
        .cloned()
        .collect()
}
