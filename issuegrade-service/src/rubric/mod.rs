//! Deterministic rubric scoring
//!
//! `evaluate` runs every enabled rule of a [`RubricConfig`] against one item
//! and combines the per-rule scores into a weighted 0-100 score:
//!
//! ```text
//! score = round1(100 * Σ(score_i * weight_i) / Σ weight_i)
//! ```
//!
//! A zero weight sum (including an empty or fully disabled rule set) scores 0.
//! Evaluation is pure: no I/O, no clock, same input gives the same output.

mod rules;

use crate::fingerprint::content_fingerprint;
use crate::models::Item;
use issuegrade_common::events::FindingSummary;
use issuegrade_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

pub use rules::RuleContext;

/// Default score at or above which an item passes
pub const DEFAULT_PASSING_THRESHOLD: f64 = 70.0;

/// Default vague terms flagged by the `ambiguous_terms` rule
pub const DEFAULT_AMBIGUOUS_TERMS: &[&str] = &[
    "optimize", "ASAP", "soon", "quickly", "improve", "better", "enhance", "fix", "update",
];

/// The fixed set of rule evaluators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    TitleClarity,
    DescriptionLength,
    AcceptanceCriteria,
    AmbiguousTerms,
    EstimatePresent,
    Labels,
    ScopeClarity,
}

impl RuleKind {
    pub const ALL: [RuleKind; 7] = [
        RuleKind::TitleClarity,
        RuleKind::DescriptionLength,
        RuleKind::AcceptanceCriteria,
        RuleKind::AmbiguousTerms,
        RuleKind::EstimatePresent,
        RuleKind::Labels,
        RuleKind::ScopeClarity,
    ];

    /// Stable string key used in breakdowns and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::TitleClarity => "title_clarity",
            RuleKind::DescriptionLength => "description_length",
            RuleKind::AcceptanceCriteria => "acceptance_criteria",
            RuleKind::AmbiguousTerms => "ambiguous_terms",
            RuleKind::EstimatePresent => "estimate_present",
            RuleKind::Labels => "labels",
            RuleKind::ScopeClarity => "scope_clarity",
        }
    }

    pub fn default_weight(&self) -> f64 {
        match self {
            RuleKind::TitleClarity => 1.0,
            RuleKind::DescriptionLength => 1.2,
            RuleKind::AcceptanceCriteria => 1.5,
            RuleKind::AmbiguousTerms => 1.0,
            RuleKind::EstimatePresent => 0.8,
            RuleKind::Labels => 0.7,
            RuleKind::ScopeClarity => 1.0,
        }
    }

    fn evaluate(&self, item: &Item, ctx: &RuleContext<'_>) -> rules::Outcome {
        match self {
            RuleKind::TitleClarity => rules::title_clarity(item, ctx),
            RuleKind::DescriptionLength => rules::description_length(item, ctx),
            RuleKind::AcceptanceCriteria => rules::acceptance_criteria(item, ctx),
            RuleKind::AmbiguousTerms => rules::ambiguous_terms(item, ctx),
            RuleKind::EstimatePresent => rules::estimate_present(item, ctx),
            RuleKind::Labels => rules::labels(item, ctx),
            RuleKind::ScopeClarity => rules::scope_clarity(item, ctx),
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RuleKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown rubric rule: {}", s)))
    }
}

/// One weighted rule in a rubric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricRule {
    pub id: RuleKind,
    pub weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Rule-specific overrides, interpreted by the rule's evaluator
    #[serde(default)]
    pub thresholds: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl RubricRule {
    /// Rule with its default weight and no threshold overrides
    pub fn new(id: RuleKind) -> Self {
        Self {
            id,
            weight: id.default_weight(),
            enabled: true,
            thresholds: Map::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_threshold(mut self, key: &str, value: Value) -> Self {
        self.thresholds.insert(key.to_string(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Rubric configuration: ordered rules plus shared settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RubricConfig {
    pub rules: Vec<RubricRule>,
    pub min_description_words: usize,
    pub require_acceptance_criteria: bool,
    /// When set, labels outside this list are flagged
    pub allowed_labels: Option<Vec<String>>,
    pub ambiguous_terms: Vec<String>,
    pub passing_threshold: f64,
}

impl Default for RubricConfig {
    fn default() -> Self {
        Self {
            rules: RuleKind::ALL.iter().copied().map(RubricRule::new).collect(),
            min_description_words: 20,
            require_acceptance_criteria: true,
            allowed_labels: None,
            ambiguous_terms: DEFAULT_AMBIGUOUS_TERMS.iter().map(|s| s.to_string()).collect(),
            passing_threshold: DEFAULT_PASSING_THRESHOLD,
        }
    }
}

impl RubricConfig {
    /// Config with the given rules and default shared settings
    pub fn with_rules(rules: Vec<RubricRule>) -> Self {
        Self {
            rules,
            ..Default::default()
        }
    }

    /// Reject negative or non-finite weights, duplicate rule ids and
    /// unparsable pattern overrides
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !rule.weight.is_finite() || rule.weight < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "Rule {} has invalid weight {}",
                    rule.id, rule.weight
                )));
            }
            if !seen.insert(rule.id) {
                return Err(Error::InvalidInput(format!("Duplicate rule: {}", rule.id)));
            }
            rules::validate_thresholds(rule)?;
        }
        if !self.passing_threshold.is_finite() {
            return Err(Error::InvalidInput("passing_threshold must be finite".to_string()));
        }
        Ok(())
    }

    pub fn is_passing(&self, score: f64) -> bool {
        score >= self.passing_threshold
    }
}

/// Result of one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricFinding {
    pub rule_id: RuleKind,
    /// 0.0 - 1.0
    pub score: f64,
    pub message: String,
    pub suggestion: Option<String>,
    pub weight: f64,
}

/// Weighted rubric result for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    /// 0.0 - 100.0, one decimal
    pub overall_score: f64,
    /// In rule evaluation order
    pub findings: Vec<RubricFinding>,
    pub fingerprint: String,
}

impl ScoredResult {
    /// Per-rule breakdown keyed by rule id, scores scaled to 0-100
    pub fn breakdown(&self) -> BTreeMap<String, FindingSummary> {
        self.findings
            .iter()
            .map(|f| {
                (
                    f.rule_id.as_str().to_string(),
                    FindingSummary {
                        score: round1(f.score * 100.0),
                        weight: f.weight,
                        message: f.message.clone(),
                        suggestion: f.suggestion.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn finding(&self, rule: RuleKind) -> Option<&RubricFinding> {
        self.findings.iter().find(|f| f.rule_id == rule)
    }
}

/// Score one item against a rubric
pub fn evaluate(item: &Item, config: &RubricConfig) -> ScoredResult {
    let mut findings = Vec::with_capacity(config.rules.len());

    for rule in config.rules.iter().filter(|r| r.enabled) {
        let ctx = RuleContext::new(&rule.thresholds, config);
        let outcome = rule.id.evaluate(item, &ctx);
        findings.push(RubricFinding {
            rule_id: rule.id,
            score: outcome.score.clamp(0.0, 1.0),
            message: outcome.message,
            suggestion: outcome.suggestion,
            weight: rule.weight,
        });
    }

    let total_weight: f64 = findings.iter().map(|f| f.weight).sum();
    let overall_score = if total_weight > 0.0 {
        let weighted: f64 = findings.iter().map(|f| f.score * f.weight).sum();
        round1(weighted / total_weight * 100.0)
    } else {
        0.0
    };

    ScoredResult {
        overall_score,
        findings,
        fingerprint: content_fingerprint(item),
    }
}

/// Round to one decimal place
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
