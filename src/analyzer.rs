use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-3.5-turbo";

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that analyzes academic paper search queries.";

/// Outcome of interpreting the user's free text.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAnalysis {
    pub is_valid: bool,
    pub normalized_query: String,
    pub keywords: Vec<String>,
    pub message: Option<String>,
}

impl QueryAnalysis {
    /// Use the text as is, as the only keyword.
    pub fn verbatim(text: &str) -> Self {
        Self {
            is_valid: true,
            normalized_query: text.to_string(),
            keywords: vec![text.to_string()],
            message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            normalized_query: String::new(),
            keywords: Vec::new(),
            message: Some(message.into()),
        }
    }

    /// Query string handed to the search: keywords joined by `", "`, or the
    /// normalized query when no keywords were extracted.
    pub fn search_text(&self) -> String {
        if self.keywords.is_empty() {
            self.normalized_query.clone()
        } else {
            self.keywords.join(", ")
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM API error: {0}")]
    Api(String),
    #[error("could not parse LLM response: {0}")]
    Parse(String),
}

#[async_trait]
pub trait QueryAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<QueryAnalysis, AnalysisError>;
}

/// Accepts any non-blank text verbatim.
pub struct PassthroughAnalyzer;

#[async_trait]
impl QueryAnalyzer for PassthroughAnalyzer {
    async fn analyze(&self, text: &str) -> Result<QueryAnalysis, AnalysisError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(QueryAnalysis::invalid("Empty query"));
        }
        Ok(QueryAnalysis::verbatim(text))
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Asks an OpenAI-compatible chat-completions endpoint to validate the query
/// and extract English keywords.
pub struct LlmQueryAnalyzer {
    client: reqwest::Client,
    settings: LlmSettings,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Verdict {
    is_valid: bool,
    #[serde(default)]
    search_query: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    message: String,
}

impl LlmQueryAnalyzer {
    pub fn new(settings: LlmSettings, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    fn prompt(query: &str) -> String {
        format!(
            r#"Analyze the following academic paper search query and extract relevant English keywords.
If the query is not in English, translate its key concepts to English.
If the query is unclear or is not a request for academic papers, mark it invalid.
If the request is wrapped in task or project boilerplate, judge it by the part that states the actual task.

Query: "{}"

Respond with a JSON object in the following format:
{{
    "is_valid": true/false,
    "search_query": "reformulated search query in English",
    "keywords": ["keyword1", "keyword2", ...],
    "message": "explanation or error message"
}}
Keywords must restate what the query asks for without adding associated topics, must not repeat words,
and each must be a standalone academic phrase such as "machine learning" or "attention"."#,
            query
        )
    }

    async fn complete(&self, query: &str) -> Result<String, AnalysisError> {
        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: Self::prompt(query) },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        tracing::info!(model = %self.settings.model, "calling LLM for query analysis");
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.settings.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(AnalysisError::Api(format!("HTTP {}: {}", status, detail)));
        }

        let data: ChatResponse = resp.json().await?;
        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(AnalysisError::Api("empty response received from LLM".to_string()));
        }
        tracing::debug!(content = %content, "LLM analysis response");
        Ok(content)
    }
}

#[async_trait]
impl QueryAnalyzer for LlmQueryAnalyzer {
    async fn analyze(&self, text: &str) -> Result<QueryAnalysis, AnalysisError> {
        if text.trim().is_empty() {
            return Ok(QueryAnalysis::invalid("Empty query"));
        }
        let content = self.complete(text).await?;
        parse_verdict(&content, text)
    }
}

fn strip_code_fence(content: &str) -> &str {
    let mut body = content.trim();
    if body.starts_with("```") {
        body = body.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Interpret the model's reply. Falls back to a bare true/false scan when the
/// reply is not valid JSON but still talks about `is_valid`.
pub(crate) fn parse_verdict(content: &str, query: &str) -> Result<QueryAnalysis, AnalysisError> {
    match serde_json::from_str::<Verdict>(strip_code_fence(content)) {
        Ok(v) if !v.is_valid => Ok(QueryAnalysis::invalid(v.message)),
        Ok(v) => {
            let normalized_query = if v.search_query.trim().is_empty() {
                query.to_string()
            } else {
                v.search_query
            };
            Ok(QueryAnalysis {
                is_valid: true,
                normalized_query,
                keywords: v.keywords.into_iter().filter(|k| !k.trim().is_empty()).collect(),
                message: Some(v.message).filter(|m| !m.is_empty()),
            })
        }
        Err(e) => {
            let lower = content.to_lowercase();
            if content.contains("is_valid") && (lower.contains("true") || lower.contains("false")) {
                tracing::info!("recovering verdict from non-JSON LLM response");
                if lower.contains("true") {
                    Ok(QueryAnalysis::verbatim(query))
                } else {
                    Ok(QueryAnalysis::invalid("Extracted from non-JSON response"))
                }
            } else {
                Err(AnalysisError::Parse(e.to_string()))
            }
        }
    }
}

/// Run the analyzer; on failure either propagate or, when `use_fallback` is
/// set, search for the original text verbatim.
pub async fn analyze_with_fallback(
    analyzer: &dyn QueryAnalyzer,
    text: &str,
    use_fallback: bool,
) -> Result<QueryAnalysis, AnalysisError> {
    match analyzer.analyze(text).await {
        Ok(analysis) => Ok(analysis),
        Err(e) if use_fallback => {
            tracing::warn!("query analysis failed, using original query: {}", e);
            Ok(QueryAnalysis::verbatim(text))
        }
        Err(e) => {
            tracing::error!("query analysis failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    struct Broken;

    #[async_trait]
    impl QueryAnalyzer for Broken {
        async fn analyze(&self, _text: &str) -> Result<QueryAnalysis, AnalysisError> {
            Err(AnalysisError::Api("boom".to_string()))
        }
    }

    fn settings(base_url: String) -> LlmSettings {
        LlmSettings {
            api_key: Some("sk-test".to_string()),
            base_url,
            model: "test-model".to_string(),
            max_tokens: 256,
            temperature: 0.3,
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let a = parse_verdict(
            r#"{"is_valid": true, "search_query": "GAN papers", "keywords": ["generative adversarial networks", ""], "message": "ok"}"#,
            "找一些关于GAN的论文",
        )
        .unwrap();
        assert!(a.is_valid);
        assert_eq!(a.normalized_query, "GAN papers");
        assert_eq!(a.keywords, ["generative adversarial networks"]);
        assert_eq!(a.search_text(), "generative adversarial networks");
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = "```json\n{\"is_valid\": true, \"search_query\": \"\", \"keywords\": [\"attention\", \"transformer\"]}\n```";
        let a = parse_verdict(content, "transformer attention").unwrap();
        assert_eq!(a.normalized_query, "transformer attention");
        assert_eq!(a.search_text(), "attention, transformer");
    }

    #[test]
    fn test_parse_invalid_verdict() {
        let a = parse_verdict(r#"{"is_valid": false, "message": "not a paper search"}"#, "hello")
            .unwrap();
        assert!(!a.is_valid);
        assert_eq!(a.message.as_deref(), Some("not a paper search"));
    }

    #[test]
    fn test_parse_non_json_recovery() {
        let a = parse_verdict("is_valid: true, keywords: attention", "attention models").unwrap();
        assert_eq!(a, QueryAnalysis::verbatim("attention models"));
        assert!(!parse_verdict("is_valid = FALSE", "x").unwrap().is_valid);
        assert!(matches!(parse_verdict("no idea", "x"), Err(AnalysisError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fallback_policy() {
        let a = analyze_with_fallback(&Broken, "quantum computing", true).await.unwrap();
        assert_eq!(a.keywords, ["quantum computing"]);
        assert!(analyze_with_fallback(&Broken, "quantum computing", false).await.is_err());
    }

    #[tokio::test]
    async fn test_passthrough() {
        let a = PassthroughAnalyzer.analyze("  graph neural networks ").await.unwrap();
        assert_eq!(a.search_text(), "graph neural networks");
        assert!(!PassthroughAnalyzer.analyze("   ").await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_llm_round_trip() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "test-model",
                "response_format": {"type": "json_object"}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{"message": {"role": "assistant", "content":
                        "{\"is_valid\": true, \"search_query\": \"reinforcement learning\", \"keywords\": [\"reinforcement learning\"]}"
                    }}]
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let analyzer =
            LlmQueryAnalyzer::new(settings(format!("{}/v1", server.url())), Duration::from_secs(5))
                .unwrap();
        let a = analyzer.analyze("recent papers on reinforcement learning").await.unwrap();

        mock.assert_async().await;
        assert_eq!(a.keywords, ["reinforcement learning"]);
    }

    #[tokio::test]
    async fn test_llm_empty_input_skips_network() {
        let analyzer = LlmQueryAnalyzer::new(
            settings("http://127.0.0.1:9".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        let a = analyzer.analyze("  ").await.unwrap();
        assert!(!a.is_valid);
    }

    #[tokio::test]
    async fn test_llm_http_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let analyzer =
            LlmQueryAnalyzer::new(settings(format!("{}/v1", server.url())), Duration::from_secs(5))
                .unwrap();
        let err = analyzer.analyze("anything").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Api(msg) if msg.contains("401")));
    }
}
