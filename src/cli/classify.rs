//! Classify command implementation.

use serde::Serialize;

use crate::cli::args::ClassifyArgs;
use crate::cli::{build_classifier, open_seeded_registry};
use crate::core::classifier::Attempt;
use crate::core::fallback;
use crate::core::models::{Article, ClassificationResult};
use crate::error::{AicwError, Result};
use crate::render::{self, human};
use crate::storage::config::ResolvedConfig;

/// Classification of one article as reported by the CLI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyReport {
    pub article_id: String,
    pub result: ClassificationResult,
    /// `None` when the keyword heuristic produced the result.
    pub provider_id: Option<String>,
    pub attempts: Vec<Attempt>,
}

/// Execute the classify command.
///
/// # Errors
///
/// Returns an error if the input is invalid or the registry cannot be opened.
/// Provider failures are not errors; they end in the fallback result.
pub async fn execute(args: &ClassifyArgs, resolved: &ResolvedConfig) -> Result<()> {
    args.validate()?;
    let article = read_article(args)?;

    let report = if args.offline {
        ClassifyReport {
            article_id: article.id.clone(),
            result: fallback::classify(&article),
            provider_id: None,
            attempts: Vec::new(),
        }
    } else {
        let registry = open_seeded_registry(resolved)?;
        let outcome = build_classifier(resolved, &registry)
            .classify_detailed(&article)
            .await;
        registry.flush_if_dirty()?;
        ClassifyReport {
            article_id: article.id.clone(),
            result: outcome.result,
            provider_id: outcome.provider_id,
            attempts: outcome.attempts,
        }
    };

    let output = render::render(
        "classify",
        &report,
        Vec::new(),
        resolved.format,
        resolved.pretty,
        |r| {
            human::render_classification(
                &r.article_id,
                &r.result,
                r.provider_id.as_deref(),
                &r.attempts,
            )
        },
    )?;
    print!("{output}");
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn read_article(args: &ClassifyArgs) -> Result<Article> {
    if let Some(path) = &args.file {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AicwError::Config(format!("cannot read article from {}: {e}", path.display()))
        })?;
        return Ok(serde_json::from_str(&content)?);
    }
    match (&args.title, &args.content) {
        (Some(title), Some(content)) => Ok(Article {
            id: args.id.clone(),
            title: title.clone(),
            content: content.clone(),
            source: args.source.clone(),
            url: args.url.clone(),
        }),
        _ => Err(AicwError::Config(
            "Provide --file, or both --title and --content".to_string(),
        )),
    }
}
