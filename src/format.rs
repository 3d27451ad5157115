use std::str::FromStr;

use crate::apis::PaperRecord;

pub const NO_RESULTS: &str = "No papers found matching your query.";
const CLOSING_LINE: &str = "Here are the papers that match your search query.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Markdown,
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "text" | "plain" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

pub fn render(records: &[PaperRecord], format: OutputFormat) -> String {
    if records.is_empty() {
        return NO_RESULTS.to_string();
    }
    match format {
        OutputFormat::Markdown => markdown(records),
        OutputFormat::Text => text(records),
        OutputFormat::Json => json(records),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn byline(r: &PaperRecord) -> String {
    match r.year {
        Some(year) => format!("{} ({})", r.short_authors(), year),
        None => r.short_authors(),
    }
}

fn markdown(records: &[PaperRecord]) -> String {
    let mut md = String::from("# Search Results\n\n");
    md.push_str("I found the following papers that match your query:\n\n");

    for (i, r) in records.iter().enumerate() {
        md.push_str(&format!("## {}. {}\n\n", i + 1, r.title));
        md.push_str(&format!("**Authors**: {}\n\n", byline(r)));
        md.push_str(&format!("**Source**: {}\n\n", r.source.display_name()));
        if !r.abstract_text.is_empty() {
            md.push_str(&format!("**Abstract**: {}\n\n", truncate(&r.abstract_text, 300)));
        }
        if !r.url.is_empty() {
            md.push_str(&format!("**URL**: {}\n\n", r.url));
        }
        if let Some(pdf) = &r.pdf_url {
            md.push_str(&format!("**PDF**: {}\n\n", pdf));
        }
        md.push_str("---\n\n");
    }

    md.push_str(CLOSING_LINE);
    md
}

fn text(records: &[PaperRecord]) -> String {
    let mut out = String::from("Search Results\n\n");
    out.push_str("I found the following papers that match your query:\n\n");

    for (i, r) in records.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, r.title));
        out.push_str(&format!("   Authors: {}\n", byline(r)));
        out.push_str(&format!("   Source: {}\n", r.source.display_name()));
        if !r.abstract_text.is_empty() {
            out.push_str(&format!("   Abstract: {}\n", truncate(&r.abstract_text, 200)));
        }
        out.push('\n');
    }

    out.push_str(CLOSING_LINE);
    out
}

fn json(records: &[PaperRecord]) -> String {
    let maps: Vec<_> = records.iter().map(PaperRecord::to_map).collect();
    serde_json::to_string_pretty(&maps).unwrap_or_else(|_| "[]".to_string())
}
