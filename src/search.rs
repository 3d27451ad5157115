use std::sync::Arc;

use crate::apis::{PaperRecord, PaperSource, RawItem, Source};
use crate::pdf::{PdfUrlResolver, TrustPolicy};

/// With trust filtering on, the single provider call asks for this many
/// times the requested count so filtered-out items can be backfilled.
pub const INITIAL_BATCH_MULTIPLIER: usize = 10;

/// Hard ceiling on raw items examined per search while trust filtering.
pub const MAX_ITEMS_EXAMINED: usize = 200;

/// Per-aggregator knobs, normally derived from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub default_source: Source,
    pub require_trusted_pdf: bool,
    pub resolve_pdf_urls: bool,
    pub trust_policy: TrustPolicy,
    pub arxiv_categories: Vec<String>,
}

/// Runs one logical search against a single provider. Holds no per-call
/// state, so one instance can serve concurrent searches.
pub struct SearchAggregator {
    sources: Vec<Arc<dyn PaperSource>>,
    settings: SearchSettings,
    resolver: Option<PdfUrlResolver>,
}

#[derive(Debug, Default)]
pub(crate) struct Selection {
    pub records: Vec<PaperRecord>,
    pub examined: usize,
}

impl SearchAggregator {
    pub fn new(sources: Vec<Arc<dyn PaperSource>>, settings: SearchSettings) -> Self {
        tracing::debug!(
            trusted = ?settings.trust_policy.trusted_domains(),
            require_trusted_pdf = settings.require_trusted_pdf,
            resolve_pdf_urls = settings.resolve_pdf_urls,
            "search settings"
        );
        let resolver = settings
            .resolve_pdf_urls
            .then(|| PdfUrlResolver::new(settings.trust_policy.clone()));
        Self { sources, settings, resolver }
    }

    /// Search one provider and return at most `max_results` ranked records.
    ///
    /// Provider failures and under-filled results are logged, never returned
    /// as errors; an empty vector is a normal outcome.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        source: Option<Source>,
    ) -> Vec<PaperRecord> {
        let source = source.unwrap_or(self.settings.default_source);
        tracing::info!(query, max_results, %source, "searching for papers");

        if max_results == 0 {
            return Vec::new();
        }
        let Some(provider) = self.sources.iter().find(|s| s.source() == source) else {
            tracing::error!(%source, "invalid or disabled search source");
            return Vec::new();
        };

        let batch_size = if self.settings.require_trusted_pdf {
            max_results.saturating_mul(INITIAL_BATCH_MULTIPLIER)
        } else {
            max_results
        };
        let categories = Some(self.settings.arxiv_categories.as_slice()).filter(|c| !c.is_empty());

        let raw = match provider.fetch(query, batch_size, categories).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(%source, "error searching provider: {}", e);
                return Vec::new();
            }
        };
        tracing::info!(%source, retrieved = raw.len(), "retrieved raw results");

        let selection = self.select(&raw, max_results);
        tracing::info!(
            %source,
            found = selection.records.len(),
            examined = selection.examined,
            "search completed"
        );
        rank(selection.records)
    }

    /// First pass over the leading `max_results` items, then backfill from
    /// the rest of the batch already in hand.
    pub(crate) fn select(&self, raw: &[RawItem], max_results: usize) -> Selection {
        let filtering = self.settings.require_trusted_pdf;
        let mut selection = Selection::default();
        let first_pass = raw.len().min(max_results);

        for item in &raw[..first_pass] {
            if filtering && selection.examined >= MAX_ITEMS_EXAMINED {
                break;
            }
            selection.examined += 1;
            if let Some(record) = self.admit(item) {
                selection.records.push(record);
            }
        }

        if filtering && selection.records.len() < max_results && raw.len() > first_pass {
            self.backfill(&raw[first_pass..], max_results, &mut selection);
        }

        if filtering && selection.records.len() < max_results {
            tracing::warn!(
                found = selection.records.len(),
                wanted = max_results,
                "could not find enough papers with trusted PDF URLs"
            );
        }
        selection
    }

    fn backfill(&self, remaining: &[RawItem], max_results: usize, selection: &mut Selection) {
        tracing::info!(
            needed = max_results - selection.records.len(),
            available = remaining.len(),
            "backfilling from remaining fetched papers"
        );
        let before = selection.records.len();

        for item in remaining {
            if selection.records.len() >= max_results {
                break;
            }
            if selection.examined >= MAX_ITEMS_EXAMINED {
                tracing::info!(limit = MAX_ITEMS_EXAMINED, "reached processing limit");
                break;
            }
            selection.examined += 1;
            if let Some(record) = self.admit(item) {
                tracing::debug!(title = %record.title, "added backfill paper");
                selection.records.push(record);
            }
        }

        tracing::info!(added = selection.records.len() - before, "backfill finished");
    }

    /// Normalize one raw item and apply the trust gate.
    fn admit(&self, item: &RawItem) -> Option<PaperRecord> {
        let record = item.normalize(self.resolver.as_ref());
        if self.settings.require_trusted_pdf
            && !self.settings.trust_policy.is_trusted_opt(record.pdf_url.as_deref())
        {
            tracing::debug!(title = %record.title, "skipped paper without trusted PDF URL");
            return None;
        }
        Some(record)
    }
}

/// Order by descending score. `sort_by` is stable, so near-ties keep fetch
/// order.
pub fn rank(mut records: Vec<PaperRecord>) -> Vec<PaperRecord> {
    records.sort_by(|a, b| b.score.total_cmp(&a.score));
    records
}
