//! Classification data types.
//!
//! Wire names follow the classification JSON schema the providers are asked
//! to produce (`discriminationType`, `confidenceScore`, upper-case enum values).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AicwError;

// =============================================================================
// Taxonomy
// =============================================================================

/// Geographic scope of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Location {
    Michigan,
    National,
    International,
}

/// Category of discrimination described by an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscriminationType {
    Racial,
    Religious,
    Disability,
    GeneralAi,
    /// Two or more categories apply equally.
    Multiple,
}

/// Incident severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Location {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Michigan => "MICHIGAN",
            Self::National => "NATIONAL",
            Self::International => "INTERNATIONAL",
        }
    }
}

impl DiscriminationType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Racial => "RACIAL",
            Self::Religious => "RELIGIOUS",
            Self::Disability => "DISABILITY",
            Self::GeneralAi => "GENERAL_AI",
            Self::Multiple => "MULTIPLE",
        }
    }
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

macro_rules! taxonomy_str_impls {
    ($ty:ident, $field:literal, [$($variant:ident),+]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = AicwError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.trim().to_uppercase();
                $(
                    if upper == Self::$variant.as_str() {
                        return Ok(Self::$variant);
                    }
                )+
                Err(AicwError::ParseResponse(format!(
                    "invalid {} value: {s:?}",
                    $field
                )))
            }
        }
    };
}

taxonomy_str_impls!(Location, "location", [Michigan, National, International]);
taxonomy_str_impls!(
    DiscriminationType,
    "discriminationType",
    [Racial, Religious, Disability, GeneralAi, Multiple]
);
taxonomy_str_impls!(Severity, "severity", [Low, Medium, High]);

// =============================================================================
// Articles and results
// =============================================================================

/// An ingested text item awaiting classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Article {
    /// Lower-cased `title + " " + content`, the text keyword heuristics match against.
    #[must_use]
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.content).to_lowercase()
    }
}

/// Named entities mentioned by an article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
}

/// Outcome of classifying one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub location: Location,
    pub discrimination_type: DiscriminationType,
    pub severity: Severity,
    /// In `[0, 1]`.
    pub confidence_score: f64,
    pub reasoning: String,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_wire_names() {
        assert_eq!(
            serde_json::to_string(&DiscriminationType::GeneralAi).unwrap(),
            "\"GENERAL_AI\""
        );
        assert_eq!(
            serde_json::from_str::<Location>("\"INTERNATIONAL\"").unwrap(),
            Location::International
        );
    }

    #[test]
    fn from_str_is_case_insensitive() {
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!(
            " general_ai ".parse::<DiscriminationType>().unwrap(),
            DiscriminationType::GeneralAi
        );
        assert!("EXTREME".parse::<Severity>().is_err());
    }

    #[test]
    fn result_uses_camel_case() {
        let result = ClassificationResult {
            location: Location::Michigan,
            discrimination_type: DiscriminationType::Racial,
            severity: Severity::Low,
            confidence_score: 0.9,
            reasoning: "r".to_string(),
            entities: Entities::default(),
            keywords: vec![],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["discriminationType"], "RACIAL");
        assert_eq!(json["confidenceScore"], 0.9);
    }

    #[test]
    fn search_text_lowercases_title_and_content() {
        let article = Article {
            id: "a1".to_string(),
            title: "AI Bias".to_string(),
            content: "In DETROIT".to_string(),
            source: None,
            url: None,
        };
        assert_eq!(article.search_text(), "ai bias in detroit");
    }
}
