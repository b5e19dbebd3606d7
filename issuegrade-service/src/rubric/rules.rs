//! Rule evaluators
//!
//! One pure function per [`RuleKind`](super::RuleKind). Each reads its
//! optional overrides from the rule's `thresholds` bag through
//! [`RuleContext`] and falls back to the defaults below.

use super::{RubricConfig, RubricRule, RuleKind};
use crate::models::Item;
use issuegrade_common::{Error, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

const DEFAULT_TITLE_MIN_LENGTH: usize = 10;
const DEFAULT_TITLE_MAX_LENGTH: usize = 100;
const DEFAULT_FILLER_WORDS: &[&str] = &["just", "maybe", "perhaps", "kinda", "sort of"];
const DEFAULT_ACTION_WORDS: &[&str] = &[
    "add", "fix", "create", "update", "remove", "implement", "refactor",
];
const DEFAULT_AC_PATTERNS: &[&str] = &[
    r"acceptance criteria",
    r"ac:",
    r"given.*when.*then",
    r"\[ \].*\[ \]",
    r"requirements:",
    r"must:",
];
const DEFAULT_PENALTY_PER_TERM: f64 = 0.15;
const DEFAULT_SCOPE_INDICATORS: &[&str] = &[
    r"out of scope",
    r"in scope",
    r"dependencies:",
    r"blocked by",
    r"requires",
    r"affects",
];
const DEFAULT_BROAD_WORDS: &[&str] = &["everything", "all", "any", "complete", "total", "entire"];

/// Inputs available to a rule evaluator
pub struct RuleContext<'a> {
    thresholds: &'a Map<String, Value>,
    config: &'a RubricConfig,
}

impl<'a> RuleContext<'a> {
    pub fn new(thresholds: &'a Map<String, Value>, config: &'a RubricConfig) -> Self {
        Self { thresholds, config }
    }

    fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.thresholds
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    fn usize_or(&self, key: &str, default: usize) -> usize {
        self.thresholds
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.thresholds
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    fn strings_or(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.thresholds.get(key).and_then(Value::as_array) {
            Some(values) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => default.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Raw evaluator output, before weight is attached
pub(super) struct Outcome {
    pub score: f64,
    pub message: String,
    pub suggestion: Option<String>,
}

impl Outcome {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            score: 1.0,
            message: message.into(),
            suggestion: None,
        }
    }

    fn partial(score: f64, message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            score,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// Check override values that must parse before evaluation
pub(super) fn validate_thresholds(rule: &RubricRule) -> Result<()> {
    let pattern_key = match rule.id {
        RuleKind::AcceptanceCriteria => "patterns",
        RuleKind::ScopeClarity => "scope_indicators",
        _ => return Ok(()),
    };
    let Some(patterns) = rule.thresholds.get(pattern_key) else {
        return Ok(());
    };
    let patterns = patterns.as_array().ok_or_else(|| {
        Error::InvalidInput(format!("{}.{} must be a list of strings", rule.id, pattern_key))
    })?;
    for pattern in patterns {
        let pattern = pattern.as_str().ok_or_else(|| {
            Error::InvalidInput(format!("{}.{} must be a list of strings", rule.id, pattern_key))
        })?;
        Regex::new(pattern).map_err(|e| {
            Error::InvalidInput(format!("{}.{}: invalid pattern {:?}: {}", rule.id, pattern_key, pattern, e))
        })?;
    }
    Ok(())
}

/// Any pattern matches; patterns that fail to compile never match
fn any_pattern_matches(patterns: &[String], text: &str) -> bool {
    patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .any(|re| re.is_match(text))
}

fn contains_any(text: &str, words: &[String]) -> bool {
    words.iter().any(|w| text.contains(&w.to_lowercase()))
}

pub(super) fn title_clarity(item: &Item, ctx: &RuleContext<'_>) -> Outcome {
    let title = item.summary.trim();
    let lower = title.to_lowercase();
    let length = title.chars().count();

    let filler_words = ctx.strings_or("filler_words", DEFAULT_FILLER_WORDS);
    let action_words = ctx.strings_or("action_words", DEFAULT_ACTION_WORDS);
    let min_length = ctx.usize_or("min_length", DEFAULT_TITLE_MIN_LENGTH);
    let max_length = ctx.usize_or("max_length", DEFAULT_TITLE_MAX_LENGTH);

    let mut score: f64 = 1.0;
    let mut problems = Vec::new();

    if contains_any(&lower, &filler_words) {
        score -= 0.3;
        problems.push("contains filler words");
    }
    if !contains_any(&lower, &action_words) {
        score -= 0.2;
        problems.push("lacks action verb");
    }
    if length < min_length {
        score -= 0.3;
        problems.push("too short");
    }
    if length > max_length {
        score -= 0.2;
        problems.push("too long");
    }

    if problems.is_empty() {
        return Outcome::pass("Title is clear and actionable");
    }
    Outcome::partial(
        score.max(0.0),
        format!("Title quality issues: {}", problems.join(", ")),
        "Rewrite title to be concise, actionable, and specific \
         (e.g., 'Add user authentication to login page')",
    )
}

pub(super) fn description_length(item: &Item, ctx: &RuleContext<'_>) -> Outcome {
    let word_count = item.description.split_whitespace().count();
    let min_words = ctx.usize_or("min_words", ctx.config.min_description_words);

    if word_count == 0 {
        return Outcome::partial(
            0.0,
            "Description is empty",
            format!(
                "Add a description with at least {} words explaining the problem and solution",
                min_words
            ),
        );
    }
    if word_count < min_words {
        return Outcome::partial(
            word_count as f64 / min_words as f64,
            format!("Description too short: {}/{} words", word_count, min_words),
            format!(
                "Expand description to at least {} words with more context and details",
                min_words
            ),
        );
    }
    Outcome::pass(format!("Description length adequate: {} words", word_count))
}

pub(super) fn acceptance_criteria(item: &Item, ctx: &RuleContext<'_>) -> Outcome {
    let description = item.description.to_lowercase();
    let patterns = ctx.strings_or("patterns", DEFAULT_AC_PATTERNS);
    let required = ctx.bool_or("required", ctx.config.require_acceptance_criteria);
    let has_criteria = any_pattern_matches(&patterns, &description);

    match (required, has_criteria) {
        (true, true) => Outcome::pass("Acceptance criteria present"),
        (false, true) => Outcome::pass("Acceptance criteria present (optional)"),
        (true, false) => Outcome::partial(
            0.0,
            "Acceptance criteria required but missing",
            "Add acceptance criteria in Given/When/Then format or as a checklist",
        ),
        (false, false) => Outcome::partial(
            0.8,
            "No acceptance criteria (optional)",
            "Consider adding testable acceptance criteria",
        ),
    }
}

pub(super) fn ambiguous_terms(item: &Item, ctx: &RuleContext<'_>) -> Outcome {
    let text = format!("{} {}", item.summary, item.description).to_lowercase();
    let terms = match ctx.thresholds.get("terms") {
        Some(_) => ctx.strings_or("terms", &[]),
        None => ctx.config.ambiguous_terms.clone(),
    };
    let penalty = ctx.f64_or("penalty_per_term", DEFAULT_PENALTY_PER_TERM);

    let mut seen = HashSet::new();
    let found: Vec<&str> = terms
        .iter()
        .filter(|term| seen.insert(term.to_lowercase()))
        .filter(|term| text.contains(&term.to_lowercase()))
        .map(String::as_str)
        .collect();

    if found.is_empty() {
        return Outcome::pass("No ambiguous terms detected");
    }
    Outcome::partial(
        (1.0 - found.len() as f64 * penalty).max(0.0),
        format!("Ambiguous terms found: {}", found.join(", ")),
        "Replace vague terms with specific, measurable criteria \
         (e.g., 'reduce load time from 3s to 1s' instead of 'optimize performance')",
    )
}

pub(super) fn estimate_present(item: &Item, _ctx: &RuleContext<'_>) -> Outcome {
    match item.estimate {
        Some(estimate) if estimate > 0.0 => Outcome::pass(format!("Estimate present: {}", estimate)),
        _ => Outcome::partial(
            0.5,
            "No estimate provided",
            "Add story points or time estimate to help with planning",
        ),
    }
}

pub(super) fn labels(item: &Item, ctx: &RuleContext<'_>) -> Outcome {
    let labels = &item.labels;
    let allowed = ctx
        .config
        .allowed_labels
        .as_ref()
        .filter(|allowed| !allowed.is_empty());

    let Some(allowed) = allowed else {
        if labels.is_empty() {
            return Outcome::partial(0.7, "No labels", "Add relevant labels for categorization");
        }
        return Outcome::pass(format!("Labels present: {}", labels.join(", ")));
    };

    let invalid: Vec<&str> = labels
        .iter()
        .filter(|l| !allowed.contains(l))
        .map(String::as_str)
        .collect();

    if labels.is_empty() {
        Outcome::partial(
            0.6,
            "No labels",
            format!("Add labels from: {}", allowed.join(", ")),
        )
    } else if invalid.is_empty() {
        Outcome::pass(format!("All labels valid: {}", labels.join(", ")))
    } else {
        Outcome::partial(
            0.5,
            format!("Invalid labels: {}", invalid.join(", ")),
            format!("Use only allowed labels: {}", allowed.join(", ")),
        )
    }
}

pub(super) fn scope_clarity(item: &Item, ctx: &RuleContext<'_>) -> Outcome {
    let description = item.description.to_lowercase();
    let indicators = ctx.strings_or("scope_indicators", DEFAULT_SCOPE_INDICATORS);
    let broad_words = ctx.strings_or("broad_words", DEFAULT_BROAD_WORDS);

    if any_pattern_matches(&indicators, &description) {
        Outcome::pass("Scope information present")
    } else if contains_any(&description, &broad_words) {
        Outcome::partial(
            0.4,
            "Scope appears too broad",
            "Narrow scope to specific, deliverable changes. List dependencies or blockers if any.",
        )
    } else {
        Outcome::partial(
            0.7,
            "Scope could be clearer",
            "Clarify what is in/out of scope and list any dependencies",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(rule: fn(&Item, &RuleContext<'_>) -> Outcome, item: &Item) -> Outcome {
        let config = RubricConfig::default();
        let thresholds = Map::new();
        rule(item, &RuleContext::new(&thresholds, &config))
    }

    fn run_with(
        rule: fn(&Item, &RuleContext<'_>) -> Outcome,
        item: &Item,
        config: &RubricConfig,
        thresholds: Value,
    ) -> Outcome {
        let thresholds = thresholds.as_object().cloned().unwrap_or_default();
        rule(item, &RuleContext::new(&thresholds, config))
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_title_penalties_stack() {
        // filler (-0.3), no action verb (-0.2), too short (-0.3)
        let outcome = run(title_clarity, &Item::new("A-1", "maybe", ""));
        assert!(approx(outcome.score, 0.2));
        assert_eq!(
            outcome.message,
            "Title quality issues: contains filler words, lacks action verb, too short"
        );
        assert!(outcome.suggestion.is_some());
    }

    #[test]
    fn test_title_too_long() {
        let title = format!("Add {}", "x".repeat(120));
        let outcome = run(title_clarity, &Item::new("A-1", title, ""));
        assert!(approx(outcome.score, 0.8));
        assert!(outcome.message.ends_with("too long"));
    }

    #[test]
    fn test_title_thresholds_override() {
        let config = RubricConfig::default();
        let outcome = run_with(
            title_clarity,
            &Item::new("A-1", "Add x", ""),
            &config,
            json!({ "min_length": 3 }),
        );
        assert_eq!(outcome.score, 1.0);
    }

    #[test]
    fn test_description_ratio() {
        let item = Item::new("A-1", "t", "one two three four five");
        let outcome = run(description_length, &item);
        assert!(approx(outcome.score, 5.0 / 20.0));
        assert_eq!(outcome.message, "Description too short: 5/20 words");
    }

    #[test]
    fn test_acceptance_criteria_patterns() {
        let checklist = Item::new("A-1", "t", "Tasks\n- [ ] build\n- [ ] ship");
        // The checkbox pattern does not cross lines
        assert_eq!(run(acceptance_criteria, &checklist).score, 0.0);

        let inline = Item::new("A-1", "t", "[ ] build [ ] ship");
        assert_eq!(run(acceptance_criteria, &inline).score, 1.0);

        let gwt = Item::new("A-1", "t", "Given a user, when they click, then it saves");
        assert_eq!(run(acceptance_criteria, &gwt).score, 1.0);
    }

    #[test]
    fn test_acceptance_criteria_optional() {
        let config = RubricConfig {
            require_acceptance_criteria: false,
            ..Default::default()
        };
        let outcome = run_with(acceptance_criteria, &Item::new("A-1", "t", "nothing"), &config, json!({}));
        assert_eq!(outcome.score, 0.8);
        assert_eq!(outcome.message, "No acceptance criteria (optional)");
    }

    #[test]
    fn test_ambiguous_terms_penalty_per_distinct_term() {
        let item = Item::new("A-1", "Optimize search ASAP", "make it better, better, better");
        let outcome = run(ambiguous_terms, &item);
        // optimize, ASAP, better
        assert!(approx(outcome.score, 1.0 - 3.0 * 0.15));
        assert_eq!(outcome.message, "Ambiguous terms found: optimize, ASAP, better");
    }

    #[test]
    fn test_ambiguous_terms_floor_at_zero() {
        let config = RubricConfig::default();
        let item = Item::new("A-1", "optimize soon", "");
        let outcome = run_with(ambiguous_terms, &item, &config, json!({ "penalty_per_term": 0.9 }));
        assert_eq!(outcome.score, 0.0);
    }

    #[test]
    fn test_estimate() {
        assert_eq!(run(estimate_present, &Item::new("A-1", "t", "").with_estimate(2.0)).score, 1.0);
        assert_eq!(run(estimate_present, &Item::new("A-1", "t", "").with_estimate(0.0)).score, 0.5);
        assert_eq!(run(estimate_present, &Item::new("A-1", "t", "")).score, 0.5);
    }

    #[test]
    fn test_labels_with_allow_list() {
        let config = RubricConfig {
            allowed_labels: Some(vec!["backend".into(), "frontend".into()]),
            ..Default::default()
        };
        let valid = Item::new("A-1", "t", "").with_labels(["backend"]);
        let invalid = Item::new("A-1", "t", "").with_labels(["backend", "misc"]);
        let none = Item::new("A-1", "t", "");

        assert_eq!(run_with(labels, &valid, &config, json!({})).score, 1.0);
        let outcome = run_with(labels, &invalid, &config, json!({}));
        assert_eq!(outcome.score, 0.5);
        assert_eq!(outcome.message, "Invalid labels: misc");
        assert_eq!(run_with(labels, &none, &config, json!({})).score, 0.6);
    }

    #[test]
    fn test_labels_without_allow_list() {
        assert_eq!(run(labels, &Item::new("A-1", "t", "").with_labels(["x"])).score, 1.0);
        assert_eq!(run(labels, &Item::new("A-1", "t", "")).score, 0.7);
    }

    #[test]
    fn test_scope_clarity() {
        assert_eq!(run(scope_clarity, &Item::new("A-1", "t", "Blocked by ABC-2")).score, 1.0);
        assert_eq!(run(scope_clarity, &Item::new("A-1", "t", "Rewrite everything")).score, 0.4);
        assert_eq!(run(scope_clarity, &Item::new("A-1", "t", "Rename the button")).score, 0.7);
    }
}
