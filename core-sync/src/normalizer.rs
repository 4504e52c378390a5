//! Content normalizer: rich HTML into lightweight markdown.
//!
//! Checkbox inputs are turned into `[ ]`/`[x]` markers before structural
//! conversion, then leftover tags are stripped and blank-line runs
//! collapsed. Visible text and resource URLs survive unchanged.

use crate::Result;
use bridge_traits::remote::{ContentFormat, RemoteContent};
use regex::{Captures, Regex};

const CHECKED_TOKEN: &str = "DOCSYNCCHECKBOXCHECKED";
const UNCHECKED_TOKEN: &str = "DOCSYNCCHECKBOXUNCHECKED";

/// Converts fetched content into the markdown written to disk.
#[derive(Debug, Clone)]
pub struct ContentNormalizer {
    checkbox: Regex,
    checked_attr: Regex,
    marker: Regex,
    leftover_tag: Regex,
    blank_lines: Regex,
}

impl ContentNormalizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            checkbox: Regex::new(r#"(?is)<input\b[^>]*\btype\s*=\s*["']?checkbox["']?[^>]*>"#)?,
            checked_attr: Regex::new(r"(?i)\bchecked\b")?,
            marker: Regex::new(r"DOCSYNCCHECKBOX(UN)?CHECKED[ \t]*")?,
            leftover_tag: Regex::new(r"</?[A-Za-z][A-Za-z0-9-]*(?:\s[^<>]*)?/?>")?,
            blank_lines: Regex::new(r"\n[ \t]*(?:\n[ \t]*){2,}")?,
        })
    }

    /// Markdown body for a fetched document, converting HTML when needed.
    pub fn normalize(&self, content: &RemoteContent) -> String {
        match content.format {
            ContentFormat::Markdown => content.body.clone(),
            ContentFormat::Html => self.html_to_markdown(&content.body),
        }
    }

    /// Convert HTML to markdown.
    pub fn html_to_markdown(&self, html: &str) -> String {
        let marked = self.checkbox.replace_all(html, |caps: &Captures<'_>| {
            if self.checked_attr.is_match(&caps[0]) {
                format!("{} ", CHECKED_TOKEN)
            } else {
                format!("{} ", UNCHECKED_TOKEN)
            }
        });

        let converted = html2md::parse_html(&marked);
        let converted = self.marker.replace_all(&converted, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                "[ ] "
            } else {
                "[x] "
            }
        });

        let stripped = self.leftover_tag.replace_all(&converted, "");
        let normalized = stripped.replace("\r\n", "\n");
        let collapsed = self.blank_lines.replace_all(&normalized, "\n\n");

        let mut output = collapsed.trim().to_string();
        output.push('\n');
        output
    }
}
