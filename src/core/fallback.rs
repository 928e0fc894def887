//! Deterministic keyword classification.
//!
//! Used when no provider produces a result. A pure function of the article's
//! title and content.

use crate::core::models::{
    Article, ClassificationResult, DiscriminationType, Entities, Location, Severity,
};

pub const FALLBACK_CONFIDENCE: f64 = 0.3;
pub const FALLBACK_REASONING: &str = "Fallback keyword-based classification";

const MICHIGAN_TERMS: &[&str] = &["michigan", "detroit", "lansing"];
const INTERNATIONAL_TERMS: &[&str] = &["international", "global", "worldwide"];

const CATEGORY_KEYWORDS: &[(DiscriminationType, &[&str])] = &[
    (
        DiscriminationType::Racial,
        &["racial", "race", "ethnic", "minority", "discrimination", "bias"],
    ),
    (
        DiscriminationType::Religious,
        &["religion", "religious", "faith", "muslim", "christian", "jewish"],
    ),
    (
        DiscriminationType::Disability,
        &["disability", "disabled", "accessibility", "ada", "handicap"],
    ),
    (
        DiscriminationType::GeneralAi,
        &["ai", "artificial intelligence", "algorithm", "machine learning"],
    ),
];

const HIGH_SEVERITY_TERMS: &[&str] = &["lawsuit", "legal", "settlement", "court"];
const MEDIUM_SEVERITY_TERMS: &[&str] = &["complaint", "investigation", "violation"];

const KNOWN_LOCATIONS: &[&str] = &[
    "michigan",
    "detroit",
    "lansing",
    "grand rapids",
    "ann arbor",
    "california",
    "new york",
    "texas",
    "florida",
    "washington",
    "united states",
    "usa",
    "america",
    "europe",
    "asia",
];

const KNOWN_ORGANIZATIONS: &[&str] = &[
    "microsoft",
    "google",
    "facebook",
    "meta",
    "amazon",
    "apple",
    "openai",
    "anthropic",
    "ibm",
    "oracle",
    "salesforce",
    "aclu",
    "eeoc",
    "naacp",
    "ada",
    "department of justice",
];

const KEYWORD_PHRASES: &[&str] = &[
    "artificial intelligence",
    "machine learning",
    "algorithm",
    "ai bias",
    "discrimination",
    "hiring",
    "recruitment",
    "facial recognition",
    "civil rights",
    "equal opportunity",
    "accessibility",
    "ada compliance",
];

fn contains_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| text.contains(term))
}

/// Classify `article` from keyword matches alone.
#[must_use]
pub fn classify(article: &Article) -> ClassificationResult {
    let text = article.search_text();
    ClassificationResult {
        location: location(&text),
        discrimination_type: discrimination_type(&text),
        severity: severity(&text),
        confidence_score: FALLBACK_CONFIDENCE,
        reasoning: FALLBACK_REASONING.to_string(),
        entities: entities(&text),
        keywords: keywords(&text),
    }
}

/// `text` must already be lower-cased.
#[must_use]
pub fn location(text: &str) -> Location {
    if contains_any(text, MICHIGAN_TERMS) {
        Location::Michigan
    } else if contains_any(text, INTERNATIONAL_TERMS) {
        Location::International
    } else {
        Location::National
    }
}

/// Strict maximum of per-category keyword hits wins; a tie at a positive
/// maximum is [`DiscriminationType::Multiple`]; no hits is `GeneralAi`.
#[must_use]
pub fn discrimination_type(text: &str) -> DiscriminationType {
    let scores: Vec<(DiscriminationType, usize)> = CATEGORY_KEYWORDS
        .iter()
        .map(|(category, terms)| {
            (
                *category,
                terms.iter().filter(|term| text.contains(*term)).count(),
            )
        })
        .collect();

    let max = scores.iter().map(|(_, score)| *score).max().unwrap_or(0);
    if max == 0 {
        return DiscriminationType::GeneralAi;
    }

    let mut leaders = scores.iter().filter(|(_, score)| *score == max);
    match (leaders.next(), leaders.next()) {
        (Some((category, _)), None) => *category,
        _ => DiscriminationType::Multiple,
    }
}

#[must_use]
pub fn severity(text: &str) -> Severity {
    if contains_any(text, HIGH_SEVERITY_TERMS) {
        Severity::High
    } else if contains_any(text, MEDIUM_SEVERITY_TERMS) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn title_case(term: &str) -> String {
    term.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn matched_terms(text: &str, terms: &[&str]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for term in terms.iter().filter(|term| text.contains(*term)) {
        let name = title_case(term);
        if !found.contains(&name) {
            found.push(name);
        }
    }
    found
}

#[must_use]
pub fn entities(text: &str) -> Entities {
    Entities {
        locations: matched_terms(text, KNOWN_LOCATIONS),
        people: Vec::new(),
        organizations: matched_terms(text, KNOWN_ORGANIZATIONS),
    }
}

#[must_use]
pub fn keywords(text: &str) -> Vec<String> {
    KEYWORD_PHRASES
        .iter()
        .filter(|phrase| text.contains(*phrase))
        .map(|phrase| (*phrase).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_test_article;

    #[test]
    fn michigan_lawsuit_with_tied_categories() {
        let article = make_test_article("a", "AI hiring bias in Michigan lawsuit", "");
        let result = classify(&article);
        assert_eq!(result.location, Location::Michigan);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.discrimination_type, DiscriminationType::Multiple);
        assert!((result.confidence_score - FALLBACK_CONFIDENCE).abs() < f64::EPSILON);
        assert_eq!(result.reasoning, FALLBACK_REASONING);
    }

    #[test]
    fn strict_maximum_wins() {
        // religious 3, racial 1, general ai 1 ("faith")
        let text = "religious faith leaders and muslim groups cite bias";
        assert_eq!(discrimination_type(text), DiscriminationType::Religious);
    }

    #[test]
    fn no_hits_defaults_to_general_ai() {
        assert_eq!(
            discrimination_type("the weather was pleasant"),
            DiscriminationType::GeneralAi
        );
    }

    #[test]
    fn location_precedence() {
        assert_eq!(location("detroit and worldwide"), Location::Michigan);
        assert_eq!(location("a global study"), Location::International);
        assert_eq!(location("a federal study"), Location::National);
    }

    #[test]
    fn severity_precedence() {
        assert_eq!(severity("complaint leads to court case"), Severity::High);
        assert_eq!(severity("an investigation opened"), Severity::Medium);
        assert_eq!(severity("a blog post"), Severity::Low);
    }

    #[test]
    fn entities_are_title_cased_and_deduplicated() {
        let found = entities("grand rapids and detroit, michigan; the aclu and google");
        assert_eq!(found.locations, vec!["Michigan", "Detroit", "Grand Rapids"]);
        assert_eq!(found.organizations, vec!["Google", "Aclu"]);
        assert!(found.people.is_empty());
    }

    #[test]
    fn keyword_phrases_in_list_order() {
        let found = keywords("facial recognition and machine learning in hiring");
        assert_eq!(found, vec!["machine learning", "hiring", "facial recognition"]);
    }

    #[test]
    fn fallback_is_deterministic() {
        let article = make_test_article(
            "x",
            "Disabled workers file complaint",
            "Accessibility of an algorithm used by Amazon",
        );
        assert_eq!(classify(&article), classify(&article));
    }
}
