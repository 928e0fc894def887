//! Classification prompt and response parsing.
//!
//! Every provider gets the same prompt; only the transport differs. A
//! response counts as a classification only if it carries a JSON object
//! with valid `location`, `discriminationType` and `severity` values.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::models::{
    Article, ClassificationResult, DiscriminationType, Entities, Location, Severity,
};
use crate::error::{AicwError, Result};

/// System instruction sent with every request.
pub const SYSTEM_PROMPT: &str = "You are an expert in AI ethics and discrimination analysis. \
Classify news articles about AI discrimination incidents.";

pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const DEFAULT_REASONING: &str = "AI classification completed";

/// Outermost `{ ... }` span, across newlines.
static JSON_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("static JSON block pattern"));

/// Build the user prompt for `article`.
#[must_use]
pub fn build_prompt(article: &Article) -> String {
    format!(
        r#"Analyze this news article about AI discrimination and classify it according to the following criteria.

Respond with a single JSON object using exactly this schema:
{{
  "location": "MICHIGAN" | "NATIONAL" | "INTERNATIONAL",
  "discriminationType": "RACIAL" | "RELIGIOUS" | "DISABILITY" | "GENERAL_AI" | "MULTIPLE",
  "severity": "LOW" | "MEDIUM" | "HIGH",
  "confidenceScore": number between 0 and 1,
  "reasoning": "brief explanation of the classification",
  "entities": {{
    "locations": ["places mentioned"],
    "people": ["people mentioned"],
    "organizations": ["organizations mentioned"]
  }},
  "keywords": ["relevant keywords"]
}}

Guidelines:
- location: MICHIGAN if the incident involves Michigan or Michigan cities, INTERNATIONAL if it happens outside the United States, otherwise NATIONAL.
- discriminationType: the primary category of discrimination; MULTIPLE when several apply equally; GENERAL_AI for algorithmic bias without a specific protected category.
- severity: HIGH for lawsuits, legal action or settlements; MEDIUM for complaints, investigations or violations; LOW for reports and general discussion.

Article:
Title: {title}
Content: {content}
Source: {source}
URL: {url}"#,
        title = article.title,
        content = article.content,
        source = article.source.as_deref().unwrap_or("unknown"),
        url = article.url.as_deref().unwrap_or("n/a"),
    )
}

/// Parse a provider's response text into a classification.
///
/// # Errors
///
/// Returns [`AicwError::ParseResponse`] if no JSON object is found, it does
/// not decode, or a required field is missing or invalid.
pub fn parse_classification(text: &str) -> Result<ClassificationResult> {
    let block = JSON_BLOCK
        .find(text)
        .ok_or_else(|| AicwError::ParseResponse("no JSON object in response".to_string()))?;

    let value: Value = serde_json::from_str(block.as_str())
        .map_err(|e| AicwError::ParseResponse(format!("invalid JSON in response: {e}")))?;

    let location: Location = required_str(&value, "location")?.parse()?;
    let discrimination_type: DiscriminationType =
        required_str(&value, "discriminationType")?.parse()?;
    let severity: Severity = required_str(&value, "severity")?.parse()?;

    let confidence_score = value
        .get("confidenceScore")
        .and_then(Value::as_f64)
        .filter(|score| score.is_finite())
        .map_or(DEFAULT_CONFIDENCE, |score| score.clamp(0.0, 1.0));

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_REASONING)
        .to_string();

    let entities = value.get("entities").map_or_else(Entities::default, |e| Entities {
        locations: string_list(e.get("locations")),
        people: string_list(e.get("people")),
        organizations: string_list(e.get("organizations")),
    });

    Ok(ClassificationResult {
        location,
        discrimination_type,
        severity,
        confidence_score,
        reasoning,
        entities,
        keywords: string_list(value.get("keywords")),
    })
}

fn required_str<'a>(value: &'a Value, field: &str) -> Result<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AicwError::ParseResponse(format!("missing required field: {field}")))
}

/// Strings from a JSON array; anything else yields an empty list.
fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
