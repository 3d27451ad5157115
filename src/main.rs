use std::sync::Arc;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

mod agent;
mod analyzer;
mod apis;
mod config;
mod format;
mod pdf;
mod search;

use agent::SearchAgent;
use analyzer::{LlmQueryAnalyzer, PassthroughAnalyzer, QueryAnalyzer};
use apis::Source;
use config::{AnalyzerKind, Config};
use format::OutputFormat;
use search::SearchAggregator;

/// Upper bound on `max_results` accepted from a tool call.
const MAX_RESULTS_CAP: u32 = 100;

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchPapersParams {
    #[schemars(description = "Natural-language description of the papers to find, in any language")]
    query: String,
    #[schemars(description = "Maximum results to return (default from MAX_SEARCH_RESULTS, max 100)")]
    max_results: Option<u32>,
    #[schemars(description = "Provider to search: 'arxiv' or 'semantic_scholar' (default from SEARCH_SOURCE)")]
    source: Option<String>,
    #[schemars(description = "Output format: 'markdown' (default), 'text', or 'json'")]
    format: Option<String>,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PaperSearchServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
    agent: Arc<SearchAgent>,
}

#[tool_router]
impl PaperSearchServer {
    pub fn create(config: Config) -> anyhow::Result<Self> {
        let sources = config.build_sources()?;
        tracing::info!(
            "Initialized {} paper sources, default={}",
            sources.len(),
            config.search_source
        );
        let aggregator = Arc::new(SearchAggregator::new(sources, config.search_settings()));

        let analyzer: Arc<dyn QueryAnalyzer> = match config.analyzer {
            AnalyzerKind::Llm => Arc::new(LlmQueryAnalyzer::new(
                config.llm.clone(),
                config.request_timeout,
            )?),
            AnalyzerKind::Passthrough => {
                tracing::info!("Query analysis disabled; searching raw user text");
                Arc::new(PassthroughAnalyzer)
            }
        };
        let agent = SearchAgent::new(aggregator, analyzer, config.use_fallback_on_llm_error);

        Ok(Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            agent: Arc::new(agent),
        })
    }

    #[tool(description = "List available paper sources and their status")]
    async fn list_sources(&self) -> Result<CallToolResult, McpError> {
        let statuses = self.config.source_status();
        let json = serde_json::to_string_pretty(&statuses)
            .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Search academic papers from a natural-language request. Only papers with a directly downloadable PDF from a trusted host are returned when PDF filtering is enabled.")]
    async fn search_papers(
        &self,
        Parameters(params): Parameters<SearchPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        let max = params
            .max_results
            .map(|m| m.clamp(1, MAX_RESULTS_CAP) as usize)
            .unwrap_or(self.config.max_search_results);

        let format = match params.format.as_deref() {
            Some(f) => f
                .parse::<OutputFormat>()
                .map_err(|e| McpError::invalid_params(e, None))?,
            None => OutputFormat::Markdown,
        };

        let source = match params.source.as_deref().map(str::parse::<Source>) {
            None => None,
            Some(Ok(source)) => Some(source),
            Some(Err(e)) => {
                tracing::error!("Invalid search source requested: {}", e);
                return Ok(CallToolResult::success(vec![Content::text(agent::NOT_FOUND)]));
            }
        };

        let response = self
            .agent
            .handle(&params.query, max, source, format)
            .await
            .map_err(|e| {
                McpError::internal_error(
                    format!("An error occurred while processing your request: {}", e),
                    None,
                )
            })?;
        Ok(CallToolResult::success(vec![Content::text(response)]))
    }
}

#[tool_handler]
impl ServerHandler for PaperSearchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Search academic papers on arXiv or Semantic Scholar from natural-language \
                 queries in any language. Results are ranked and, when PDF filtering is \
                 enabled, limited to papers whose PDF comes from a trusted open host."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting paper-search-agent MCP server");

    let server = PaperSearchServer::create(config)?;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
