use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Datelike;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio::sync::Mutex;

use super::{ensure_success, http_client, PaperRecord, PaperSource, RawItem, Source, SourceError};

pub const DEFAULT_BASE_URL: &str = "https://export.arxiv.org/api/query";

/// arXiv asks clients to leave 3 seconds between calls.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(3);

/// One `<entry>` of an arXiv Atom feed. Every field may be blank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArxivEntry {
    /// Short identifier, e.g. `2301.12345v1` or `hep-th/9901001v1`.
    pub id: String,
    /// Landing page (`/abs/`) URL.
    pub entry_url: String,
    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub published: String,
    pub pdf_url: Option<String>,
}

pub struct ArxivClient {
    client: reqwest::Client,
    base_url: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl ArxivClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            min_interval: DEFAULT_MIN_INTERVAL,
            last_request: Mutex::new(None),
        })
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// `(<query>) AND (cat:a OR cat:b)`, or the bare query without categories.
pub fn build_search_query(query: &str, categories: &[String]) -> String {
    let filter = categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| format!("cat:{}", c))
        .collect::<Vec<_>>()
        .join(" OR ");
    if filter.is_empty() {
        query.to_string()
    } else {
        format!("({}) AND ({})", query, filter)
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    fn source(&self) -> Source {
        Source::Arxiv
    }

    async fn fetch(
        &self,
        query: &str,
        limit: usize,
        categories: Option<&[String]>,
    ) -> Result<Vec<RawItem>, SourceError> {
        let search_query = build_search_query(query, categories.unwrap_or_default());
        let max_results = limit.to_string();
        tracing::info!(query = %search_query, limit, "querying arXiv");

        self.pace().await;
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await?;
        ensure_success(&resp, "arXiv")?;
        let body = resp.text().await?;

        let entries = parse_atom_feed(&body)?;
        Ok(entries.into_iter().map(RawItem::Arxiv).collect())
    }
}

/// Normalize an arXiv entry. arXiv results all share the same base score.
pub fn entry_to_record(entry: &ArxivEntry) -> PaperRecord {
    let title = collapse_whitespace(&entry.title);
    PaperRecord {
        title: if title.is_empty() { "Unknown Title".to_string() } else { title },
        authors: entry.authors.clone(),
        abstract_text: collapse_whitespace(&entry.summary),
        url: entry.entry_url.clone(),
        pdf_url: entry.pdf_url.clone().filter(|u| !u.is_empty()),
        year: parse_year(&entry.published),
        source: Source::Arxiv,
        paper_id: Some(entry.id.clone()).filter(|id| !id.is_empty()),
        score: 1.0,
    }
}

fn parse_year(published: &str) -> Option<i32> {
    chrono::DateTime::parse_from_rfc3339(published.trim())
        .map(|d| d.year())
        .ok()
        .or_else(|| published.get(..4).and_then(|y| y.parse().ok()))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `http://arxiv.org/abs/2301.12345v1` -> `2301.12345v1`
fn short_id(entry_id: &str) -> String {
    match entry_id.split_once("/abs/") {
        Some((_, id)) => id.to_string(),
        None => entry_id.rsplit('/').next().unwrap_or(entry_id).to_string(),
    }
}

fn read_link(e: &BytesStart, entry: &mut ArxivEntry) {
    let mut href = String::new();
    let mut title_attr = String::new();
    for attr in e.attributes().flatten() {
        let val = String::from_utf8_lossy(&attr.value).to_string();
        match attr.key.as_ref() {
            b"href" => href = val,
            b"title" => title_attr = val,
            _ => {}
        }
    }
    if title_attr == "pdf" {
        entry.pdf_url = Some(href);
    } else if entry.entry_url.is_empty() && href.contains("/abs/") {
        entry.entry_url = href;
    }
}

pub(crate) fn parse_atom_feed(xml: &str) -> Result<Vec<ArxivEntry>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut entry: Option<ArxivEntry> = None;
    let mut raw_id = String::new();
    let mut current_tag = String::new();
    let mut author_name = String::new();
    let mut in_author = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    entry = Some(ArxivEntry::default());
                    raw_id.clear();
                } else if let Some(current) = entry.as_mut() {
                    if tag == "author" {
                        in_author = true;
                        author_name.clear();
                    } else if tag == "link" {
                        read_link(&e, current);
                    }
                    current_tag = tag;
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(current) = entry.as_mut() {
                    if e.name().as_ref() == b"link" {
                        read_link(&e, current);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(current) = entry.as_mut() {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match current_tag.as_str() {
                        "title" => current.title.push_str(&text),
                        "summary" => current.summary.push_str(&text),
                        "id" => raw_id.push_str(&text),
                        "published" => current.published.push_str(&text),
                        "name" if in_author => author_name.push_str(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    if let Some(mut done) = entry.take() {
                        let raw = raw_id.trim();
                        if raw.contains("/api/errors") {
                            return Err(SourceError::Api(format!(
                                "arXiv rejected the query: {}",
                                collapse_whitespace(&done.summary)
                            )));
                        }
                        done.id = short_id(raw);
                        if done.entry_url.is_empty() {
                            done.entry_url = raw.to_string();
                        }
                        entries.push(done);
                    }
                } else if tag == "author" && in_author {
                    in_author = false;
                    let name = author_name.trim();
                    if let Some(current) = entry.as_mut().filter(|_| !name.is_empty()) {
                        current.authors.push(name.to_string());
                    }
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(entries)
}
