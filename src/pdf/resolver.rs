use std::collections::BTreeMap;

use super::TrustPolicy;

/// Provider-native identifiers for one paper, keyed by family name
/// (`ArXiv`, `DOI`, `PubMed`, `PubMedCentral`, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalIds(BTreeMap<String, String>);

impl ExternalIds {
    /// Read an identifier map from a JSON object. Strings and numbers are
    /// kept; anything else is ignored.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        obj.iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k.clone(), s.trim().to_string())),
                serde_json::Value::Number(n) => Some((k.clone(), n.to_string())),
                _ => None,
            })
            .collect()
    }

    /// First non-empty value among `keys`.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.0.get(*k))
            .map(String::as_str)
            .find(|v| !v.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ExternalIds {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Everything the resolver looks at for one raw record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfHints {
    pub open_access_pdf: Option<String>,
    pub external_ids: ExternalIds,
}

impl PdfHints {
    fn doi(&self) -> Option<&str> {
        self.external_ids.get_any(&["DOI"])
    }
}

const ARXIV_KEYS: &[&str] = &["ArXiv"];
const PMC_KEYS: &[&str] = &["PubMedCentral", "PMC"];
const PMID_KEYS: &[&str] = &["PubMed", "PMID"];

struct Strategy {
    family: &'static str,
    derive: fn(&PdfHints) -> Vec<String>,
}

/// Evaluated in order; every strategy that produces something contributes.
const STRATEGIES: &[Strategy] = &[
    Strategy { family: "open_access", derive: open_access_pdf },
    Strategy { family: "arxiv", derive: arxiv_pdf },
    Strategy { family: "pubmed", derive: pubmed_url },
    Strategy { family: "doi", derive: doi_table_urls },
];

struct DoiRule {
    prefix: &'static str,
    build: fn(&str) -> String,
}

const DOI_RULES: &[DoiRule] = &[
    // bioRxiv and medRxiv share the Cold Spring Harbor prefix
    DoiRule { prefix: "10.1101/", build: biorxiv_pdf },
    DoiRule { prefix: "10.1038/", build: nature_pdf },
    DoiRule { prefix: "10.1126/", build: science_pdf },
    DoiRule { prefix: "10.1109/", build: ieee_pdf },
    DoiRule { prefix: "10.1145/", build: acm_pdf },
    DoiRule { prefix: "10.48550/", build: arxiv_doi_pdf },
];

fn open_access_pdf(hints: &PdfHints) -> Vec<String> {
    hints
        .open_access_pdf
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect()
}

fn arxiv_pdf(hints: &PdfHints) -> Vec<String> {
    hints
        .external_ids
        .get_any(ARXIV_KEYS)
        .map(|id| vec![format!("https://arxiv.org/pdf/{}.pdf", id)])
        .unwrap_or_default()
}

fn pubmed_url(hints: &PdfHints) -> Vec<String> {
    let ids = &hints.external_ids;
    if let Some(pmc) = ids.get_any(PMC_KEYS) {
        let pmc = pmc.strip_prefix("PMC").unwrap_or(pmc);
        return vec![format!("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC{}/pdf/", pmc)];
    }
    // Landing page only, no direct PDF.
    ids.get_any(PMID_KEYS)
        .map(|pmid| vec![format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid)])
        .unwrap_or_default()
}

fn doi_table_urls(hints: &PdfHints) -> Vec<String> {
    let Some(doi) = hints.doi() else {
        return Vec::new();
    };
    DOI_RULES
        .iter()
        .filter(|rule| doi.starts_with(rule.prefix))
        .map(|rule| (rule.build)(doi))
        .collect()
}

fn doi_suffix(doi: &str) -> &str {
    doi.rsplit('/').next().unwrap_or(doi)
}

fn biorxiv_pdf(doi: &str) -> String {
    format!("https://www.biorxiv.org/content/{}v1.full.pdf", doi)
}

fn nature_pdf(doi: &str) -> String {
    let article = doi.strip_prefix("10.1038/").unwrap_or(doi);
    format!("https://www.nature.com/articles/{}.pdf", article)
}

fn science_pdf(doi: &str) -> String {
    format!("https://science.sciencemag.org/content/{}.full.pdf", doi_suffix(doi))
}

fn ieee_pdf(doi: &str) -> String {
    format!("https://ieeexplore.ieee.org/stamp/stamp.jsp?arnumber={}", doi_suffix(doi))
}

fn acm_pdf(doi: &str) -> String {
    format!("https://dl.acm.org/doi/pdf/{}", doi)
}

fn arxiv_doi_pdf(doi: &str) -> String {
    let id = doi_suffix(doi);
    let id = id.strip_prefix("arXiv.").unwrap_or(id);
    format!("https://arxiv.org/pdf/{}.pdf", id)
}

/// Derives a trusted PDF link for records whose provider did not hand one
/// over directly.
#[derive(Debug, Clone)]
pub struct PdfUrlResolver {
    policy: TrustPolicy,
}

impl PdfUrlResolver {
    pub fn new(policy: TrustPolicy) -> Self {
        Self { policy }
    }

    /// All candidate URLs in production order, before trust filtering.
    pub fn candidates(&self, hints: &PdfHints) -> Vec<String> {
        let mut urls = Vec::new();
        for strategy in STRATEGIES {
            let found = (strategy.derive)(hints);
            for url in &found {
                tracing::debug!(family = strategy.family, url = %url, "derived PDF candidate");
            }
            urls.extend(found);
        }

        // Last resort only; never stacked on top of a real candidate.
        if urls.is_empty() {
            if let Some(doi) = hints.doi() {
                let url = format!("https://doi.org/{}", doi);
                tracing::debug!(family = "doi_generic", url = %url, "derived PDF candidate");
                urls.push(url);
            }
        }
        urls
    }

    /// First trusted candidate, if any.
    pub fn resolve(&self, hints: &PdfHints) -> Option<String> {
        let chosen = self
            .candidates(hints)
            .into_iter()
            .find(|url| self.policy.is_trusted(url));
        match &chosen {
            Some(url) => tracing::debug!(url = %url, "selected trusted PDF URL"),
            None => tracing::debug!("no trusted PDF URL found"),
        }
        chosen
    }
}
