use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{ensure_success, http_client, PaperRecord, PaperSource, RawItem, Source, SourceError};
use crate::pdf::{ExternalIds, PdfHints, PdfUrlResolver};

pub const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
pub const DEFAULT_SORT: &str = "citationCount:desc";

const FIELDS: &str = "title,authors,year,abstract,url,openAccessPdf,externalIds,citationCount";

/// Citation volume adds at most this much on top of the 1.0 base score.
pub const MAX_CITATION_BONUS: f64 = 0.2;

pub struct SemanticScholarClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    sort: String,
}

impl SemanticScholarClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        sort: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            api_key,
            sort: sort.into(),
        })
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }
}

#[async_trait]
impl PaperSource for SemanticScholarClient {
    fn source(&self) -> Source {
        Source::SemanticScholar
    }

    /// Uses the bulk search endpoint, the only one that honours `sort`. It
    /// has no page-size parameter, so the batch is truncated to `limit` here.
    async fn fetch(
        &self,
        query: &str,
        limit: usize,
        categories: Option<&[String]>,
    ) -> Result<Vec<RawItem>, SourceError> {
        if categories.is_some_and(|c| !c.is_empty()) {
            tracing::debug!("Semantic Scholar ignores category filters");
        }
        tracing::info!(query, limit, sort = %self.sort, "querying Semantic Scholar");

        let url = format!("{}/paper/search/bulk", self.base_url);
        let resp = self
            .add_auth(self.client.get(&url).query(&[
                ("query", query),
                ("fields", FIELDS),
                ("sort", self.sort.as_str()),
            ]))
            .send()
            .await?;
        ensure_success(&resp, "Semantic Scholar")?;
        let body: Value = resp.json().await?;

        let items = match body.get("data") {
            Some(Value::Array(data)) => data
                .iter()
                .take(limit)
                .cloned()
                .map(RawItem::SemanticScholar)
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(SourceError::Parse(
                    "Semantic Scholar response `data` is not an array".to_string(),
                ))
            }
        };
        Ok(items)
    }
}

pub fn citation_score(citation_count: u64) -> f64 {
    1.0 + (citation_count as f64 / 10_000.0).min(MAX_CITATION_BONUS)
}

fn str_field<'a>(paper: &'a Value, key: &str) -> Option<&'a str> {
    paper.get(key).and_then(Value::as_str)
}

pub fn pdf_hints(paper: &Value) -> PdfHints {
    PdfHints {
        open_access_pdf: paper
            .get("openAccessPdf")
            .and_then(|pdf| str_field(pdf, "url"))
            .map(str::to_string),
        external_ids: paper
            .get("externalIds")
            .map(ExternalIds::from_json)
            .unwrap_or_default(),
    }
}

/// Normalize one Semantic Scholar paper. With a resolver the PDF link is
/// derived from identifiers and trust-checked; without one the provider's
/// open-access link is taken as is.
pub fn paper_to_record(paper: &Value, resolver: Option<&PdfUrlResolver>) -> PaperRecord {
    let authors = paper
        .get("authors")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| match a {
                    Value::String(name) => Some(name.clone()),
                    other => str_field(other, "name").map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();

    let hints = pdf_hints(paper);
    let pdf_url = match resolver {
        Some(resolver) => resolver.resolve(&hints),
        None => hints.open_access_pdf.filter(|u| !u.is_empty()),
    };

    let citations = paper.get("citationCount").and_then(Value::as_u64).unwrap_or(0);

    PaperRecord {
        title: str_field(paper, "title")
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("Unknown Title")
            .to_string(),
        authors,
        abstract_text: str_field(paper, "abstract").unwrap_or_default().to_string(),
        url: str_field(paper, "url").unwrap_or_default().to_string(),
        pdf_url,
        year: paper
            .get("year")
            .and_then(Value::as_i64)
            .and_then(|y| i32::try_from(y).ok()),
        source: Source::SemanticScholar,
        paper_id: str_field(paper, "paperId").map(str::to_string),
        score: citation_score(citations),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::TrustPolicy;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn resolver() -> PdfUrlResolver {
        PdfUrlResolver::new(TrustPolicy::new(["arxiv.org", "ncbi.nlm.nih.gov/pmc"]))
    }

    #[test]
    fn test_citation_score_bounds() {
        assert_eq!(citation_score(0), 1.0);
        assert!((citation_score(500) - 1.05).abs() < 1e-9);
        assert_eq!(citation_score(2_000), 1.2);
        assert_eq!(citation_score(u64::MAX), 1.2);
        for c in [1, 99, 1_999, 2_001, 150_000] {
            let s = citation_score(c);
            assert!((1.0..=1.2).contains(&s), "score {} for {} citations", s, c);
        }
    }

    #[test]
    fn test_paper_to_record_full() {
        let paper = json!({
            "paperId": "204e3073870fae3d05bcbc2f6a8e263d9b72e776",
            "title": "Attention is All you Need",
            "authors": [{"authorId": "40348417", "name": "Ashish Vaswani"}, {"name": "Noam Shazeer"}],
            "year": 2017,
            "abstract": "The dominant sequence transduction models...",
            "url": "https://www.semanticscholar.org/paper/204e3073870fae3d05bcbc2f6a8e263d9b72e776",
            "openAccessPdf": null,
            "externalIds": {"ArXiv": "1706.03762", "DOI": "10.48550/arXiv.1706.03762", "CorpusId": 13756489},
            "citationCount": 120000
        });
        let r = paper_to_record(&paper, Some(&resolver()));
        assert_eq!(r.title, "Attention is All you Need");
        assert_eq!(r.authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(r.year, Some(2017));
        assert_eq!(r.pdf_url.as_deref(), Some("https://arxiv.org/pdf/1706.03762.pdf"));
        assert_eq!(r.paper_id.as_deref(), Some("204e3073870fae3d05bcbc2f6a8e263d9b72e776"));
        assert_eq!(r.source, Source::SemanticScholar);
        assert_eq!(r.score, 1.2);
    }

    #[test]
    fn test_paper_to_record_sparse() {
        let raw = json!({"year": "unknown", "authors": "nobody"});
        let r = paper_to_record(&raw, Some(&resolver()));
        assert_eq!(r.title, "Unknown Title");
        assert!(r.authors.is_empty());
        assert_eq!(r.abstract_text, "");
        assert_eq!(r.url, "");
        assert_eq!(r.year, None);
        assert_eq!(r.pdf_url, None);
        assert_eq!(r.paper_id, None);
        assert_eq!(r.score, 1.0);
    }

    #[test]
    fn test_untrusted_open_access_dropped_by_resolver() {
        let paper = json!({
            "title": "Paywalled",
            "openAccessPdf": {"url": "https://publisher.example.com/paper.pdf"},
        });
        assert_eq!(paper_to_record(&paper, Some(&resolver())).pdf_url, None);
        // Without enhancement the raw link is kept; trust is checked later.
        assert_eq!(
            paper_to_record(&paper, None).pdf_url.as_deref(),
            Some("https://publisher.example.com/paper.pdf")
        );
    }

    #[tokio::test]
    async fn test_fetch_bulk_search() {
        let mut server = Server::new_async().await;
        let data: Vec<Value> = (0..8)
            .map(|i| json!({"paperId": format!("p{}", i), "title": format!("Paper {}", i)}))
            .collect();
        let mock = server
            .mock("GET", "/graph/v1/paper/search/bulk")
            .match_header("x-api-key", "secret")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), "transformer attention".into()),
                Matcher::UrlEncoded("sort".into(), "citationCount:desc".into()),
                Matcher::UrlEncoded("fields".into(), FIELDS.into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"total": 8, "token": null, "data": data}).to_string())
            .expect(1)
            .create_async()
            .await;

        let client = SemanticScholarClient::new(
            format!("{}/graph/v1", server.url()),
            Some("secret".to_string()),
            DEFAULT_SORT,
            Duration::from_secs(5),
        )
        .unwrap();
        let items = client.fetch("transformer attention", 5, None).await.unwrap();

        mock.assert_async().await;
        assert_eq!(items.len(), 5);
        let first = items[0].normalize(None);
        assert_eq!(first.paper_id.as_deref(), Some("p0"));
    }

    #[tokio::test]
    async fn test_fetch_rate_limited() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/graph/v1/paper/search/bulk")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let client = SemanticScholarClient::new(
            format!("{}/graph/v1", server.url()),
            None,
            DEFAULT_SORT,
            Duration::from_secs(5),
        )
        .unwrap();
        let err = client.fetch("anything", 5, None).await.unwrap_err();
        assert!(matches!(err, SourceError::Api(msg) if msg.contains("429")));
    }

    #[tokio::test]
    async fn test_fetch_missing_data_is_empty() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/graph/v1/paper/search/bulk")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"total": 0}"#)
            .create_async()
            .await;

        let client = SemanticScholarClient::new(
            format!("{}/graph/v1", server.url()),
            None,
            DEFAULT_SORT,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(client.fetch("nothing", 5, None).await.unwrap().is_empty());
    }
}
