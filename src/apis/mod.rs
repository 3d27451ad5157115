pub mod arxiv;
pub mod semantic_scholar;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pdf::PdfUrlResolver;

/// Providers the aggregator knows how to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Arxiv,
    SemanticScholar,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Arxiv, Source::SemanticScholar];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Arxiv => "arxiv",
            Source::SemanticScholar => "semantic_scholar",
        }
    }

    /// Human-facing name used by the output formatter.
    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Arxiv => "arXiv",
            Source::SemanticScholar => "Semantic Scholar",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown paper source: {0}")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "arxiv" => Ok(Source::Arxiv),
            "semantic_scholar" => Ok(Source::SemanticScholar),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// A normalized paper, independent of the provider it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperRecord {
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub url: String,
    pub pdf_url: Option<String>,
    pub year: Option<i32>,
    pub source: Source,
    pub paper_id: Option<String>,
    pub score: f64,
}

impl PaperRecord {
    /// Ordered key/value view used for serialization:
    /// title, authors, abstract, url, pdf_url, year, source, paper_id, score.
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Up to three authors, with "et al." when more were listed.
    pub fn short_authors(&self) -> String {
        let mut names = self.authors.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
        if self.authors.len() > 3 {
            names.push_str(" et al.");
        }
        names
    }
}

impl fmt::Display for PaperRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.title, self.short_authors())?;
        if let Some(year) = self.year {
            write!(f, " ({})", year)?;
        }
        write!(f, " [{}]", self.source)
    }
}

/// One provider-native search hit before normalization.
#[derive(Debug, Clone)]
pub enum RawItem {
    Arxiv(arxiv::ArxivEntry),
    /// Semantic Scholar payloads stay loosely typed; every field is optional.
    SemanticScholar(serde_json::Value),
}

impl RawItem {
    /// Map to a [`PaperRecord`]. Total: missing fields fall back to defaults.
    ///
    /// `resolver` enables PDF-URL derivation for providers that need it; arXiv
    /// entries already carry a direct PDF link and ignore it.
    pub fn normalize(&self, resolver: Option<&PdfUrlResolver>) -> PaperRecord {
        match self {
            RawItem::Arxiv(entry) => arxiv::entry_to_record(entry),
            RawItem::SemanticScholar(paper) => semantic_scholar::paper_to_record(paper, resolver),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
}

#[async_trait]
pub trait PaperSource: Send + Sync {
    fn source(&self) -> Source;

    /// Fetch one batch of raw hits. Implementations issue exactly one request.
    async fn fetch(
        &self,
        query: &str,
        limit: usize,
        categories: Option<&[String]>,
    ) -> Result<Vec<RawItem>, SourceError>;
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

pub(crate) fn ensure_success(resp: &reqwest::Response, provider: &str) -> Result<(), SourceError> {
    let status = resp.status();
    if status.as_u16() == 429 {
        return Err(SourceError::Api(format!("{} rate limited (429)", provider)));
    }
    if !status.is_success() {
        return Err(SourceError::Api(format!("{} returned HTTP {}", provider, status)));
    }
    Ok(())
}
