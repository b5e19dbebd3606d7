//! Rubric-only critic and feedback formatting
//!
//! Derives the narrative purely from the scored result: score band decides
//! the emoji and assessment, findings are sorted into strengths and
//! improvements. Used when no other critic is configured and as the fallback
//! when a configured critic fails.

use super::{Critic, SourceError};
use crate::models::{Item, Narrative};
use crate::rubric::ScoredResult;
use async_trait::async_trait;
use chrono::Utc;

const MAX_STRENGTHS: usize = 4;
const MAX_IMPROVEMENTS: usize = 4;
const MAX_SUGGESTIONS: usize = 5;

/// Rule scores at or above this count as strengths
const STRENGTH_THRESHOLD: f64 = 0.8;
/// Rule scores below this count as improvements
const IMPROVEMENT_THRESHOLD: f64 = 0.6;

/// (lower bound, emoji, assessment), highest band first
const SCORE_BANDS: &[(f64, &str, &str)] = &[
    (90.0, "🌟", "Excellent issue! Well-defined with clear requirements."),
    (80.0, "✅", "Good issue with minor improvements needed."),
    (70.0, "👍", "Acceptable issue but could use more detail."),
    (60.0, "⚠️", "Issue needs improvement in several areas."),
    (50.0, "🔧", "Issue requires significant improvements before development."),
];
const LOWEST_BAND: (&str, &str) = ("❌", "Issue needs major rework to meet quality standards.");

/// Emoji and assessment text for a 0-100 score
pub fn score_band(score: f64) -> (&'static str, &'static str) {
    SCORE_BANDS
        .iter()
        .find(|(floor, _, _)| score >= *floor)
        .map(|(_, emoji, text)| (*emoji, *text))
        .unwrap_or(LOWEST_BAND)
}

/// Deterministic critic built from score bands
#[derive(Debug, Clone, Copy, Default)]
pub struct RubricCritic;

impl RubricCritic {
    pub fn narrate(scored: &ScoredResult) -> Narrative {
        let (emoji, assessment) = score_band(scored.overall_score);

        let strengths = scored
            .findings
            .iter()
            .filter(|f| f.score >= STRENGTH_THRESHOLD)
            .map(|f| f.message.clone())
            .take(MAX_STRENGTHS)
            .collect();
        let improvements = scored
            .findings
            .iter()
            .filter(|f| f.score < IMPROVEMENT_THRESHOLD)
            .map(|f| f.message.clone())
            .take(MAX_IMPROVEMENTS)
            .collect();
        let suggestions = scored
            .findings
            .iter()
            .filter_map(|f| f.suggestion.clone())
            .filter(|s| !s.is_empty())
            .take(MAX_SUGGESTIONS)
            .collect();

        Narrative {
            assessment: assessment.to_string(),
            strengths,
            improvements,
            suggestions,
            emoji: emoji.to_string(),
        }
    }
}

#[async_trait]
impl Critic for RubricCritic {
    fn name(&self) -> &'static str {
        "rubric"
    }

    async fn critique(&self, _item: &Item, scored: &ScoredResult) -> Result<Narrative, SourceError> {
        Ok(Self::narrate(scored))
    }
}

/// Markdown comment body for a scored item
pub fn format_feedback_markdown(item: &Item, scored: &ScoredResult, narrative: &Narrative) -> String {
    let mut lines = Vec::new();

    lines.push(format!("## {} Feedback for {}", narrative.emoji, item.key));
    lines.push(format!("\n**Score:** {}/100\n", scored.overall_score));

    lines.push("### Overall Assessment\n".to_string());
    lines.push(format!("{}\n", narrative.assessment));

    if !narrative.strengths.is_empty() {
        lines.push("### ✅ Strengths\n".to_string());
        lines.extend(narrative.strengths.iter().map(|s| format!("- {}", s)));
        lines.push(String::new());
    }

    if !narrative.improvements.is_empty() {
        lines.push("### 🔧 Areas for Improvement\n".to_string());
        lines.extend(narrative.improvements.iter().map(|s| format!("- {}", s)));
        lines.push(String::new());
    }

    if !narrative.suggestions.is_empty() {
        lines.push("### 💡 Actionable Suggestions\n".to_string());
        lines.extend(
            narrative
                .suggestions
                .iter()
                .enumerate()
                .map(|(i, s)| format!("{}. {}", i + 1, s)),
        );
        lines.push(String::new());
    }

    if !scored.findings.is_empty() {
        lines.push("### Rubric Breakdown\n".to_string());
        for finding in &scored.findings {
            lines.push(format!(
                "**{}:** {}/100",
                finding.rule_id,
                crate::rubric::round1(finding.score * 100.0)
            ));
            lines.push(format!("- {}", finding.message));
            if let Some(suggestion) = &finding.suggestion {
                lines.push(format!("- Suggestion: {}", suggestion));
            }
        }
    }

    lines.push("\n---".to_string());
    lines.push(format!(
        "*Generated by issuegrade • {}*",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::{evaluate, RubricConfig};

    #[test]
    fn test_score_bands() {
        assert_eq!(score_band(100.0).0, "🌟");
        assert_eq!(score_band(90.0).0, "🌟");
        assert_eq!(score_band(89.9).0, "✅");
        assert_eq!(score_band(70.0).0, "👍");
        assert_eq!(score_band(65.0).0, "⚠️");
        assert_eq!(score_band(50.0).0, "🔧");
        assert_eq!(score_band(49.9), LOWEST_BAND);
        assert_eq!(score_band(0.0).1, "Issue needs major rework to meet quality standards.");
    }

    #[tokio::test]
    async fn test_narrative_sorts_findings() {
        let item = Item::new("A-1", "maybe", "");
        let scored = evaluate(&item, &RubricConfig::default());
        let narrative = RubricCritic.critique(&item, &scored).await.unwrap();

        // Empty description and missing AC score 0 → improvements
        assert!(narrative.improvements.contains(&"Description is empty".to_string()));
        assert!(narrative
            .improvements
            .contains(&"Acceptance criteria required but missing".to_string()));
        assert!(narrative.improvements.len() <= MAX_IMPROVEMENTS);
        assert!(narrative.suggestions.len() <= MAX_SUGGESTIONS);
        assert_eq!(narrative.emoji, score_band(scored.overall_score).0);
    }

    #[test]
    fn test_markdown_contains_sections() {
        let item = Item::new("A-1", "maybe", "");
        let scored = evaluate(&item, &RubricConfig::default());
        let narrative = RubricCritic::narrate(&scored);
        let body = format_feedback_markdown(&item, &scored, &narrative);

        assert!(body.starts_with(&format!("## {} Feedback for A-1", narrative.emoji)));
        assert!(body.contains(&format!("**Score:** {}/100", scored.overall_score)));
        assert!(body.contains("### 🔧 Areas for Improvement"));
        assert!(body.contains("**description_length:** 0/100"));
    }
}
