/// arXiv serves every PDF under this path without authentication, so it is
/// trusted regardless of the configured allow-list.
pub const ARXIV_PDF_PATTERN: &str = "arxiv.org/pdf";

/// Decides whether a PDF link may be surfaced for unattended download.
///
/// Matching is a case-sensitive substring test against the whole URL, the
/// same way provider URLs are formed. A domain appearing in a query string or
/// path also matches; this is a known precision limit of the policy.
#[derive(Debug, Clone, Default)]
pub struct TrustPolicy {
    trusted_domains: Vec<String>,
}

impl TrustPolicy {
    pub fn new<I, S>(trusted_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted_domains: trusted_domains
                .into_iter()
                .map(Into::into)
                .filter(|d: &String| !d.is_empty())
                .collect(),
        }
    }

    pub fn trusted_domains(&self) -> &[String] {
        &self.trusted_domains
    }

    pub fn is_trusted(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }
        self.trusted_domains.iter().any(|d| url.contains(d.as_str()))
            || url.contains(ARXIV_PDF_PATTERN)
    }

    pub fn is_trusted_opt(&self, url: Option<&str>) -> bool {
        url.is_some_and(|u| self.is_trusted(u))
    }
}
