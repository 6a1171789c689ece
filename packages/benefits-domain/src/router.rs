//! Query complexity classification and the model routing table.
//!
//! Classification is a cheap additive heuristic. Scores at or near a class boundary carry low
//! confidence, which the service may resolve with an LLM classifier.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const MODERATE_MIN_SCORE: u32 = 2;
const COMPLEX_MIN_SCORE: u32 = 4;
const MAX_CONFIDENCE: f32 = 0.95;

type Pattern = Result<Regex, regex::Error>;

static COMPARISON: LazyLock<Pattern> = LazyLock::new(|| {
	Regex::new(r"(?i)\b(?:compar(?:e|ed|es|ing|ison)|versus|vs\.?|differences?|better|which plan)\b")
});
static CALCULATION: LazyLock<Pattern> = LazyLock::new(|| {
	Regex::new(r"(?i)\b(?:calculat\w*|how much|estimat\w*|total cost|out[- ]of[- ]pocket)\b")
});
static NUMERIC: LazyLock<Pattern> = LazyLock::new(|| {
	Regex::new(r"\$\s?\d|\d+(?:\.\d+)?\s?%|\b\d+(?:,\d{3})*(?:\.\d+)?\b")
});
/// Plan names such as `401(k)` or `403b`, removed before looking for numbers.
static PLAN_NAMES: LazyLock<Pattern> =
	LazyLock::new(|| Regex::new(r"(?i)\b40[13]\s?(?:\([kb]\)|[kb])"));
static SCENARIO: LazyLock<Pattern> = LazyLock::new(|| {
	Regex::new(
		r"(?i)\b(?:my (?:spouse|wife|husband|partner|family|kids|children|child)|dependents?|pregnan\w*|surgery|retir\w*)\b",
	)
});
static MULTI_STEP: LazyLock<Pattern> = LazyLock::new(|| {
	Regex::new(r"(?i)\b(?:and also|then|what if|if i)\b")
});
static LLM_LABEL: LazyLock<Pattern> = LazyLock::new(|| {
	Regex::new(r"(?i)\b(simple|moderate|complex)\b")
});
static CATEGORY_PATTERNS: LazyLock<Vec<(Category, Pattern)>> = LazyLock::new(|| {
	[
		(
			Category::Medical,
			r"(?i)\b(?:medical|doctors?|physicians?|hospital\w*|ppo|hmo|prescriptions?|deductibles?|copays?|coinsurance|urgent care|specialists?|in-network|out-of-network)\b",
		),
		(
			Category::Dental,
			r"(?i)\b(?:dental|dentists?|orthodont\w*|braces|cleanings?|crowns?)\b",
		),
		(
			Category::Vision,
			r"(?i)\b(?:vision|eye exams?|glasses|contact lenses|contacts|optometrists?|lasik)\b",
		),
		(
			Category::Retirement,
			r"(?i)\b(?:401\s?\(k\)|401k|403b|retirement|pension|vest(?:ed|ing)\b|employer match\b|roth\b)",
		),
		(
			Category::SpendingAccounts,
			r"(?i)\b(?:hsa|fsa|health savings|flexible spending|dependent care account|commuter)\b",
		),
		(
			Category::LifeDisability,
			r"(?i)\b(?:life insurance|disability|ltd|std|ad&d|beneficiar(?:y|ies))\b",
		),
		(
			Category::TimeOff,
			r"(?i)\b(?:pto|vacation|sick (?:leave|days?)|parental leave|maternity|paternity|holidays?|bereavement|time off)\b",
		),
		(
			Category::Enrollment,
			r"(?i)\b(?:enroll\w*|qualifying life event|add a dependent|coverage start|waive)\b",
		),
		(
			Category::Wellness,
			r"(?i)\b(?:wellness|gym|eap|employee assistance|mental health|counseling|fitness)\b",
		),
	]
	.into_iter()
	.map(|(category, pattern)| (category, Regex::new(pattern)))
	.collect()
});

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
	Simple,
	Moderate,
	Complex,
}
impl Complexity {
	pub fn as_str(self) -> &'static str {
		match self {
			Complexity::Simple => "simple",
			Complexity::Moderate => "moderate",
			Complexity::Complex => "complex",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"simple" => Some(Complexity::Simple),
			"moderate" => Some(Complexity::Moderate),
			"complex" => Some(Complexity::Complex),
			_ => None,
		}
	}

	fn from_score(score: u32) -> Self {
		if score >= COMPLEX_MIN_SCORE {
			Complexity::Complex
		} else if score >= MODERATE_MIN_SCORE {
			Complexity::Moderate
		} else {
			Complexity::Simple
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
	Medical,
	Dental,
	Vision,
	Retirement,
	SpendingAccounts,
	LifeDisability,
	TimeOff,
	Enrollment,
	Wellness,
	General,
}
impl Category {
	pub fn as_str(self) -> &'static str {
		match self {
			Category::Medical => "medical",
			Category::Dental => "dental",
			Category::Vision => "vision",
			Category::Retirement => "retirement",
			Category::SpendingAccounts => "spending_accounts",
			Category::LifeDisability => "life_disability",
			Category::TimeOff => "time_off",
			Category::Enrollment => "enrollment",
			Category::Wellness => "wellness",
			Category::General => "general",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"medical" => Some(Category::Medical),
			"dental" => Some(Category::Dental),
			"vision" => Some(Category::Vision),
			"retirement" => Some(Category::Retirement),
			"spending_accounts" => Some(Category::SpendingAccounts),
			"life_disability" => Some(Category::LifeDisability),
			"time_off" => Some(Category::TimeOff),
			"enrollment" => Some(Category::Enrollment),
			"wellness" => Some(Category::Wellness),
			"general" => Some(Category::General),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
	Heuristic,
	Llm,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Classification {
	pub complexity: Complexity,
	pub category: Category,
	pub score: u32,
	pub confidence: f32,
	pub signals: Vec<String>,
	pub source: ClassificationSource,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutingRule {
	pub complexity: Complexity,
	pub category: Option<Category>,
	pub model: String,
}
impl RoutingRule {
	fn matches(&self, classification: &Classification) -> bool {
		self.complexity == classification.complexity
			&& self.category.map(|category| category == classification.category).unwrap_or(true)
	}
}

#[derive(Clone, Debug)]
pub struct RoutingTable {
	pub rules: Vec<RoutingRule>,
	pub default_model: String,
}
impl RoutingTable {
	pub fn from_config(cfg: &benefits_config::Router) -> Result<Self, RoutingError> {
		let mut rules = Vec::with_capacity(cfg.rules.len());

		for rule in &cfg.rules {
			let complexity = Complexity::parse(&rule.complexity)
				.ok_or_else(|| RoutingError::UnknownComplexity(rule.complexity.clone()))?;
			let category = match rule.category.as_deref() {
				Some(raw) =>
					Some(Category::parse(raw).ok_or_else(|| RoutingError::UnknownCategory(raw.to_string()))?),
				None => None,
			};

			rules.push(RoutingRule { complexity, category, model: rule.model.clone() });
		}

		Ok(Self { rules, default_model: cfg.default_model.clone() })
	}

	pub fn select(&self, classification: &Classification) -> &str {
		select_model(&self.rules, &self.default_model, classification)
	}
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum RoutingError {
	#[error("Unknown routing complexity {0:?}.")]
	UnknownComplexity(String),
	#[error("Unknown routing category {0:?}.")]
	UnknownCategory(String),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RouteDecision {
	pub classification: Classification,
	pub model: String,
}

pub fn classify_heuristic(query: &str) -> Classification {
	let mut score = 0_u32;
	let mut signals = Vec::new();
	let words = query.split_whitespace().count();

	if words > 45 {
		score += 2;

		signals.push("long_query".to_string());
	} else if words > 20 {
		score += 1;

		signals.push("medium_query".to_string());
	}
	if query.matches('?').count() > 1 {
		score += 1;

		signals.push("multiple_questions".to_string());
	}

	let without_plan_names = strip_plan_names(query);

	for (label, pattern, weight, text) in [
		("comparison", &*COMPARISON, 2, query),
		("calculation", &*CALCULATION, 1, query),
		("numeric", &*NUMERIC, 1, without_plan_names.as_str()),
		("personal_scenario", &*SCENARIO, 1, query),
		("multi_step", &*MULTI_STEP, 1, query),
	] {
		if count_matches(pattern, text) > 0 {
			score += weight;

			signals.push(label.to_string());
		}
	}

	Classification {
		complexity: Complexity::from_score(score),
		category: detect_category(query),
		score,
		confidence: confidence_for(score),
		signals,
		source: ClassificationSource::Heuristic,
	}
}

/// First matching rule wins; the default model covers everything else.
pub fn select_model<'a>(
	rules: &'a [RoutingRule],
	default_model: &'a str,
	classification: &Classification,
) -> &'a str {
	rules
		.iter()
		.find(|rule| rule.matches(classification))
		.map(|rule| rule.model.as_str())
		.unwrap_or(default_model)
}

/// The category with the most keyword hits; ties go to the earlier category.
pub fn detect_category(query: &str) -> Category {
	let mut best = (Category::General, 0_usize);

	for (category, pattern) in CATEGORY_PATTERNS.iter() {
		let hits = count_matches(pattern, query);

		if hits > best.1 {
			best = (*category, hits);
		}
	}

	best.0
}

/// Reads the first complexity label an LLM classifier produced.
pub fn parse_llm_complexity(text: &str) -> Option<Complexity> {
	let re = LLM_LABEL.as_ref().ok()?;

	re.captures(text).and_then(|caps| caps.get(1)).and_then(|m| Complexity::parse(m.as_str()))
}

fn strip_plan_names(query: &str) -> String {
	match &*PLAN_NAMES {
		Ok(re) => re.replace_all(query, " ").into_owned(),
		Err(_) => query.to_string(),
	}
}

fn count_matches(pattern: &Pattern, text: &str) -> usize {
	pattern.as_ref().map(|re| re.find_iter(text).count()).unwrap_or(0)
}

fn confidence_for(score: u32) -> f32 {
	let score = score as f32;
	let lower = MODERATE_MIN_SCORE as f32 - 0.5;
	let upper = COMPLEX_MIN_SCORE as f32 - 0.5;
	let margin = (score - lower).abs().min((score - upper).abs());

	(0.45 + 0.2 * margin).min(MAX_CONFIDENCE)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn classification(complexity: Complexity, category: Category) -> Classification {
		Classification {
			complexity,
			category,
			score: 0,
			confidence: 0.9,
			signals: Vec::new(),
			source: ClassificationSource::Heuristic,
		}
	}

	fn table() -> RoutingTable {
		RoutingTable {
			rules: vec![
				RoutingRule {
					complexity: Complexity::Complex,
					category: None,
					model: "large".to_string(),
				},
				RoutingRule {
					complexity: Complexity::Moderate,
					category: Some(Category::Retirement),
					model: "large".to_string(),
				},
				RoutingRule {
					complexity: Complexity::Moderate,
					category: None,
					model: "medium".to_string(),
				},
			],
			default_model: "small".to_string(),
		}
	}

	#[test]
	fn patterns_compile() {
		for pattern in [
			&*COMPARISON,
			&*CALCULATION,
			&*NUMERIC,
			&*PLAN_NAMES,
			&*SCENARIO,
			&*MULTI_STEP,
			&*LLM_LABEL,
		] {
			assert!(pattern.is_ok(), "{pattern:?}");
		}
		for (category, pattern) in CATEGORY_PATTERNS.iter() {
			assert!(pattern.is_ok(), "{category:?}");
		}
	}

	#[test]
	fn short_lookup_is_simple() {
		let result = classify_heuristic("When does open enrollment start");

		assert_eq!(result.complexity, Complexity::Simple);
		assert_eq!(result.category, Category::Enrollment);
		assert_eq!(result.score, 0);
		assert!(result.signals.is_empty());
	}

	#[test]
	fn comparison_is_moderate() {
		let result = classify_heuristic("What's the difference between the PPO and HMO plans?");

		assert_eq!(result.complexity, Complexity::Moderate);
		assert_eq!(result.category, Category::Medical);
		assert!(result.signals.contains(&"comparison".to_string()));
	}

	#[test]
	fn scenario_with_costs_is_complex() {
		let query = "If I add my spouse to the PPO plan, how much will my deductible be compared \
			to the HMO, assuming $2,500 in surgery costs?";
		let result = classify_heuristic(query);

		assert_eq!(result.complexity, Complexity::Complex);
		assert_eq!(result.category, Category::Medical);
		assert!(result.score >= COMPLEX_MIN_SCORE);
	}

	#[test]
	fn plan_names_like_401k_are_not_numbers() {
		let result = classify_heuristic("Does the company offer a 401k");

		assert!(!result.signals.contains(&"numeric".to_string()));
		assert_eq!(result.category, Category::Retirement);
	}

	#[test]
	fn retirement_inflections_are_personal_scenarios() {
		let result = classify_heuristic("How does the retirement match work once I retired early");

		assert_eq!(result.signals, vec!["personal_scenario".to_string()]);
		assert_eq!(result.score, 1);
		assert_eq!(result.category, Category::Retirement);
	}

	#[test]
	fn single_digit_counts_are_numbers() {
		let result = classify_heuristic("Is dental covered for my 3 kids");

		assert!(result.signals.contains(&"numeric".to_string()), "{:?}", result.signals);
		assert!(result.score >= 1);
	}

	#[test]
	fn parenthesized_plan_names_are_not_numbers() {
		for query in ["How do I join the 401(k)", "Is there a 403b option", "Explain the 401 k"] {
			let result = classify_heuristic(query);

			assert!(!result.signals.contains(&"numeric".to_string()), "{query}: {:?}", result.signals);
		}

		let result = classify_heuristic("Can I put 6% into the 401(k)");

		assert!(result.signals.contains(&"numeric".to_string()));
	}

	#[test]
	fn calculation_terms_match_inflections() {
		for query in ["How is my premium calculated", "What are the estimated copays"] {
			let result = classify_heuristic(query);

			assert!(result.signals.contains(&"calculation".to_string()), "{query}");
		}
	}

	#[test]
	fn boundary_scores_have_low_confidence() {
		assert!(confidence_for(0) > 0.7);
		assert!(confidence_for(1) < 0.6);
		assert!(confidence_for(2) < 0.6);
		assert!(confidence_for(4) < 0.6);
		assert!((confidence_for(8) - MAX_CONFIDENCE).abs() < f32::EPSILON);
	}

	#[test]
	fn category_falls_back_to_general() {
		assert_eq!(detect_category("Who do I talk to about this?"), Category::General);
	}

	#[test]
	fn category_prefers_most_hits() {
		let query = "Can I use my HSA for dental cleanings and braces?";

		assert_eq!(detect_category(query), Category::Dental);
	}

	#[test]
	fn parses_first_llm_label() {
		assert_eq!(parse_llm_complexity("COMPLEX"), Some(Complexity::Complex));
		assert_eq!(
			parse_llm_complexity("I'd say moderate, not complex."),
			Some(Complexity::Moderate)
		);
		assert_eq!(parse_llm_complexity("unsure"), None);
	}

	#[test]
	fn first_matching_rule_wins() {
		let table = table();

		assert_eq!(table.select(&classification(Complexity::Complex, Category::Dental)), "large");
		assert_eq!(
			table.select(&classification(Complexity::Moderate, Category::Retirement)),
			"large"
		);
		assert_eq!(table.select(&classification(Complexity::Moderate, Category::Vision)), "medium");
		assert_eq!(table.select(&classification(Complexity::Simple, Category::Vision)), "small");
	}

	#[test]
	fn every_config_category_parses() {
		for raw in benefits_config::CATEGORIES {
			let category = Category::parse(raw).expect("config category must parse");

			assert_eq!(category.as_str(), raw);
		}
		for raw in benefits_config::COMPLEXITIES {
			assert!(Complexity::parse(raw).is_some());
		}
	}

	#[test]
	fn classification_serializes_snake_case() {
		let value = serde_json::to_value(classification(Complexity::Simple, Category::TimeOff))
			.expect("serialize");

		assert_eq!(value["complexity"], "simple");
		assert_eq!(value["category"], "time_off");
		assert_eq!(value["source"], "heuristic");
	}
}
