use std::sync::Arc;

use crate::analyzer::{analyze_with_fallback, AnalysisError, QueryAnalyzer};
use crate::apis::Source;
use crate::format::{self, OutputFormat};
use crate::search::SearchAggregator;

pub const CLARIFICATION: &str = "Your query seems unclear or incomplete. Please provide more \
specific details about the academic papers you're looking for.";
pub const WELCOME: &str = "Welcome to the Paper Search Agent! I can help you search for academic \
papers from arXiv and Semantic Scholar. What would you like to search for?";
pub const NOT_FOUND: &str =
    "No papers found matching your query. Please try a different search term.";

/// Turns one piece of user text into a rendered answer: analyze, search,
/// retry with the raw text if the rewritten query found nothing, format.
pub struct SearchAgent {
    aggregator: Arc<SearchAggregator>,
    analyzer: Arc<dyn QueryAnalyzer>,
    use_fallback: bool,
}

impl SearchAgent {
    pub fn new(
        aggregator: Arc<SearchAggregator>,
        analyzer: Arc<dyn QueryAnalyzer>,
        use_fallback: bool,
    ) -> Self {
        Self { aggregator, analyzer, use_fallback }
    }

    pub async fn handle(
        &self,
        text: &str,
        max_results: usize,
        source: Option<Source>,
        format: OutputFormat,
    ) -> Result<String, AnalysisError> {
        tracing::info!(text, "handling search request");
        if text.trim().is_empty() {
            return Ok(WELCOME.to_string());
        }

        let analysis =
            analyze_with_fallback(self.analyzer.as_ref(), text, self.use_fallback).await?;
        if !analysis.is_valid {
            tracing::info!(reason = ?analysis.message, "query rejected by analyzer");
            return Ok(CLARIFICATION.to_string());
        }

        let search_text = analysis.search_text();
        if analysis.normalized_query != text {
            tracing::info!(original = text, keywords = ?analysis.keywords, "query rewritten");
        }
        let mut results = self.aggregator.search(&search_text, max_results, source).await;

        if results.is_empty() && analysis.normalized_query.trim() != text.trim() {
            tracing::info!("no results with processed query, trying original query");
            results = self.aggregator.search(text, max_results, source).await;
        }
        if results.is_empty() {
            return Ok(NOT_FOUND.to_string());
        }
        Ok(format::render(&results, format))
    }
}
