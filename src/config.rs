use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::analyzer::LlmSettings;
use crate::apis::{self, PaperSource, Source, SourceError};
use crate::pdf::TrustPolicy;
use crate::search::SearchSettings;

pub const DEFAULT_ARXIV_CATEGORIES: &str = "cs.AI,cs.LG,cs.CL";
pub const DEFAULT_TRUSTED_PDF_SOURCES: &str =
    "arxiv.org,biorxiv.org,medrxiv.org,ncbi.nlm.nih.gov/pmc,europepmc.org";
const S2_KEY_PLACEHOLDER: &str = "your-semantic-scholar-api-key";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unrecognized search source '{0}' (expected arxiv or semantic_scholar)")]
    UnknownSource(String),
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("failed to build provider client: {0}")]
    Client(#[from] SourceError),
}

/// Which query-analysis collaborator to run in front of the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerKind {
    Llm,
    Passthrough,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub search_source: Source,
    pub arxiv_categories: Vec<String>,
    pub arxiv_base_url: String,
    pub semantic_scholar_api_key: Option<String>,
    pub semantic_scholar_base_url: String,
    pub enable_semantic_scholar: bool,
    pub semantic_scholar_sort: String,
    pub require_pdf_download: bool,
    pub enable_pdf_url_enhancement: bool,
    pub trusted_pdf_sources: Vec<String>,
    pub max_search_results: usize,
    pub request_timeout: Duration,
    pub analyzer: AnalyzerKind,
    pub llm: LlmSettings,
    pub use_fallback_on_llm_error: bool,
    pub log_level: String,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    raw.map(|v| v.trim().eq_ignore_ascii_case("true")).unwrap_or(default)
}

fn parse_num<T: FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { key, value: v }),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let search_source = match lookup("SEARCH_SOURCE") {
            None => Source::SemanticScholar,
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::UnknownSource(raw.trim().to_string()))?,
        };

        let semantic_scholar_api_key = lookup("SEMANTIC_SCHOLAR_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && k != S2_KEY_PLACEHOLDER);

        let max_search_results =
            parse_num("MAX_SEARCH_RESULTS", lookup("MAX_SEARCH_RESULTS"), 5usize)?;
        if max_search_results == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_SEARCH_RESULTS",
                value: "0".to_string(),
            });
        }
        let timeout_secs = parse_num(
            "PAPER_SEARCH_TIMEOUT_SECS",
            lookup("PAPER_SEARCH_TIMEOUT_SECS"),
            30u64,
        )?;

        let analyzer = match lookup("QUERY_ANALYZER").map(|v| v.trim().to_lowercase()) {
            None => AnalyzerKind::Llm,
            Some(v) if v == "llm" => AnalyzerKind::Llm,
            Some(v) if v == "passthrough" => AnalyzerKind::Passthrough,
            Some(v) => return Err(ConfigError::Invalid { key: "QUERY_ANALYZER", value: v }),
        };

        let llm = LlmSettings {
            api_key: lookup("LLM_API_KEY").filter(|k| !k.trim().is_empty()),
            base_url: lookup("LLM_BASE_URL")
                .unwrap_or_else(|| crate::analyzer::DEFAULT_LLM_BASE_URL.to_string()),
            model: lookup("LLM_MODEL")
                .unwrap_or_else(|| crate::analyzer::DEFAULT_LLM_MODEL.to_string()),
            max_tokens: parse_num("LLM_MAX_TOKENS", lookup("LLM_MAX_TOKENS"), 4096u32)?,
            temperature: parse_num("LLM_TEMPERATURE", lookup("LLM_TEMPERATURE"), 0.3f32)?,
        };
        if analyzer == AnalyzerKind::Llm && llm.api_key.is_none() {
            return Err(ConfigError::MissingCredential("LLM_API_KEY"));
        }

        Ok(Self {
            search_source,
            arxiv_categories: split_list(
                &lookup("ARXIV_CATEGORIES").unwrap_or_else(|| DEFAULT_ARXIV_CATEGORIES.to_string()),
            ),
            arxiv_base_url: lookup("ARXIV_BASE_URL")
                .unwrap_or_else(|| apis::arxiv::DEFAULT_BASE_URL.to_string()),
            semantic_scholar_api_key,
            semantic_scholar_base_url: lookup("SEMANTIC_SCHOLAR_BASE_URL")
                .unwrap_or_else(|| apis::semantic_scholar::DEFAULT_BASE_URL.to_string()),
            enable_semantic_scholar: parse_flag(lookup("ENABLE_SEMANTIC_SCHOLAR"), true),
            semantic_scholar_sort: lookup("SEMANTIC_SCHOLAR_SORT")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| apis::semantic_scholar::DEFAULT_SORT.to_string()),
            require_pdf_download: parse_flag(lookup("REQUIRE_PDF_DOWNLOAD"), true),
            enable_pdf_url_enhancement: parse_flag(lookup("ENABLE_PDF_URL_ENHANCEMENT"), true),
            trusted_pdf_sources: split_list(
                &lookup("TRUSTED_PDF_SOURCES")
                    .unwrap_or_else(|| DEFAULT_TRUSTED_PDF_SOURCES.to_string()),
            ),
            max_search_results,
            request_timeout: Duration::from_secs(timeout_secs),
            analyzer,
            llm,
            use_fallback_on_llm_error: parse_flag(lookup("USE_FALLBACK_ON_LLM_ERROR"), false),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            default_source: self.search_source,
            require_trusted_pdf: self.require_pdf_download,
            resolve_pdf_urls: self.enable_pdf_url_enhancement,
            trust_policy: TrustPolicy::new(self.trusted_pdf_sources.iter().cloned()),
            arxiv_categories: self.arxiv_categories.clone(),
        }
    }

    /// Build the enabled provider clients.
    pub fn build_sources(&self) -> Result<Vec<Arc<dyn PaperSource>>, ConfigError> {
        let mut sources: Vec<Arc<dyn PaperSource>> = Vec::new();

        sources.push(Arc::new(apis::arxiv::ArxivClient::new(
            self.arxiv_base_url.clone(),
            self.request_timeout,
        )?));

        if self.enable_semantic_scholar {
            if self.semantic_scholar_api_key.is_none() {
                tracing::warn!(
                    "SEMANTIC_SCHOLAR_API_KEY not set; Semantic Scholar will be rate limited"
                );
            }
            sources.push(Arc::new(apis::semantic_scholar::SemanticScholarClient::new(
                self.semantic_scholar_base_url.clone(),
                self.semantic_scholar_api_key.clone(),
                self.semantic_scholar_sort.clone(),
                self.request_timeout,
            )?));
        } else {
            tracing::info!("Semantic Scholar is disabled");
        }

        Ok(sources)
    }

    /// Return a list of source status descriptions.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        Source::ALL
            .iter()
            .map(|&source| {
                let (enabled, note) = match source {
                    Source::Arxiv => (true, "No API key required".to_string()),
                    Source::SemanticScholar if !self.enable_semantic_scholar => {
                        (false, "Disabled by ENABLE_SEMANTIC_SCHOLAR".to_string())
                    }
                    Source::SemanticScholar => (
                        true,
                        if self.semantic_scholar_api_key.is_some() {
                            format!("API key set, sort={}", self.semantic_scholar_sort)
                        } else {
                            format!(
                                "No API key (rate limited), sort={}",
                                self.semantic_scholar_sort
                            )
                        },
                    ),
                };
                SourceStatus {
                    name: source.as_str().to_string(),
                    enabled,
                    default: source == self.search_source,
                    note,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    pub default: bool,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("LLM_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.search_source, Source::SemanticScholar);
        assert_eq!(config.arxiv_categories, ["cs.AI", "cs.LG", "cs.CL"]);
        assert_eq!(config.semantic_scholar_sort, "citationCount:desc");
        assert!(config.enable_semantic_scholar);
        assert!(config.require_pdf_download);
        assert!(config.enable_pdf_url_enhancement);
        assert!(!config.use_fallback_on_llm_error);
        assert_eq!(config.max_search_results, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.trusted_pdf_sources.contains(&"arxiv.org".to_string()));
        assert_eq!(config.analyzer, AnalyzerKind::Llm);
    }

    #[test]
    fn test_unknown_source_rejected() {
        let err = load(&[("SEARCH_SOURCE", "pubmed"), ("LLM_API_KEY", "k")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSource(s) if s == "pubmed"));
    }

    #[test]
    fn test_llm_key_required_for_llm_analyzer() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingCredential("LLM_API_KEY"))));
        let config = load(&[("QUERY_ANALYZER", "passthrough")]).unwrap();
        assert_eq!(config.analyzer, AnalyzerKind::Passthrough);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("QUERY_ANALYZER", "passthrough"),
            ("SEARCH_SOURCE", " ARXIV "),
            ("ARXIV_CATEGORIES", "q-bio.NC, ,cs.NE"),
            ("SEMANTIC_SCHOLAR_API_KEY", "your-semantic-scholar-api-key"),
            ("ENABLE_SEMANTIC_SCHOLAR", "False"),
            ("REQUIRE_PDF_DOWNLOAD", "TRUE"),
            ("TRUSTED_PDF_SOURCES", "europepmc.org,,"),
            ("MAX_SEARCH_RESULTS", "8"),
        ])
        .unwrap();
        assert_eq!(config.search_source, Source::Arxiv);
        assert_eq!(config.arxiv_categories, ["q-bio.NC", "cs.NE"]);
        assert_eq!(config.semantic_scholar_api_key, None);
        assert!(!config.enable_semantic_scholar);
        assert!(config.require_pdf_download);
        assert_eq!(config.trusted_pdf_sources, ["europepmc.org"]);
        assert_eq!(config.max_search_results, 8);

        let settings = config.search_settings();
        assert_eq!(settings.default_source, Source::Arxiv);
        assert!(settings.trust_policy.is_trusted("https://europepmc.org/articles/PMC1/pdf"));
    }

    #[test]
    fn test_invalid_numbers() {
        let err = load(&[("QUERY_ANALYZER", "passthrough"), ("MAX_SEARCH_RESULTS", "five")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MAX_SEARCH_RESULTS", .. }));
        let err =
            load(&[("QUERY_ANALYZER", "passthrough"), ("MAX_SEARCH_RESULTS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MAX_SEARCH_RESULTS", .. }));
    }

    #[test]
    fn test_sources_follow_enable_flag() {
        let config = load(&[
            ("QUERY_ANALYZER", "passthrough"),
            ("ENABLE_SEMANTIC_SCHOLAR", "false"),
        ])
        .unwrap();
        let sources = config.build_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source(), Source::Arxiv);

        let status = config.source_status();
        assert!(status.iter().any(|s| s.name == "semantic_scholar" && !s.enabled && s.default));
    }
}
