//! Reference scanners for embedded resources.
//!
//! Each scanner understands one markup syntax: it finds resource URLs and
//! rewrites them in place, touching nothing outside the syntactic context
//! it recognized. [`CompositeScanner`] runs several scanners and merges
//! their findings in first-occurrence order.

use crate::Result;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};

/// Syntactic position a reference was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceContext {
    /// `![alt](url "title")`
    MarkdownImage,
    /// `[text](url)`
    MarkdownLink,
    /// `<img src>`
    HtmlImage,
    /// `<a href>`
    HtmlLink,
    /// `<video src>` / `<source src>`
    HtmlMedia,
}

/// One resource URL found in content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    pub url: String,
    /// Alt or link text, used to name attachments
    pub suggested_name: Option<String>,
    pub context: ReferenceContext,
    /// Byte offset of the URL in the scanned content
    pub offset: usize,
}

/// Extraction and rewrite strategy for one markup syntax.
pub trait ResourceReferenceScanner: Send + Sync {
    /// All references in document order, duplicates included
    fn scan(&self, content: &str) -> Vec<ResourceReference>;

    /// Replace every URL that has an entry in `resolved` with its local path
    fn rewrite(&self, content: &str, resolved: &HashMap<String, String>) -> String;
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Rebuild `caps[0]` with the URL group swapped for its resolved path.
fn splice_url(caps: &Captures<'_>, url_group: usize, replacement: &str) -> String {
    let (Some(whole), Some(url)) = (caps.get(0), caps.get(url_group)) else {
        return caps[0].to_string();
    };
    let text = whole.as_str();
    let start = url.start() - whole.start();
    let end = url.end() - whole.start();
    format!("{}{}{}", &text[..start], replacement, &text[end..])
}

// ============================================================================
// Markdown
// ============================================================================

/// Markdown images and inline links.
#[derive(Debug, Clone)]
pub struct MarkdownScanner {
    pattern: Regex,
}

impl MarkdownScanner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            // 1: image bang, 2: text, 3: url (optionally wrapped in <>)
            pattern: Regex::new(
                r#"(!?)\[([^\[\]]*)\]\(\s*<?([^()\s<>]+)>?(?:\s+(?:"[^"]*"|'[^']*'))?\s*\)"#,
            )?,
        })
    }
}

impl ResourceReferenceScanner for MarkdownScanner {
    fn scan(&self, content: &str) -> Vec<ResourceReference> {
        self.pattern
            .captures_iter(content)
            .filter_map(|caps| {
                let url = caps.get(3)?;
                let is_image = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
                Some(ResourceReference {
                    url: url.as_str().to_string(),
                    suggested_name: caps.get(2).and_then(|m| non_empty(m.as_str())),
                    context: if is_image {
                        ReferenceContext::MarkdownImage
                    } else {
                        ReferenceContext::MarkdownLink
                    },
                    offset: url.start(),
                })
            })
            .collect()
    }

    fn rewrite(&self, content: &str, resolved: &HashMap<String, String>) -> String {
        self.pattern
            .replace_all(content, |caps: &Captures<'_>| {
                let url = caps.get(3).map_or("", |m| m.as_str());
                match resolved.get(url) {
                    Some(local) => splice_url(caps, 3, local),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

// ============================================================================
// HTML
// ============================================================================

/// `<img>`, `<a>`, `<video>` and `<source>` tags.
#[derive(Debug, Clone)]
pub struct HtmlScanner {
    tag: Regex,
    attribute: Regex,
    alt: Regex,
    inner_tags: Regex,
}

impl HtmlScanner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            tag: Regex::new(r"(?i)<(img|a|video|source)\b([^>]*)>")?,
            attribute: Regex::new(
                r#"(?i)(?:^|\s)(src|href)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#,
            )?,
            alt: Regex::new(r#"(?i)(?:^|\s)alt\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            inner_tags: Regex::new(r"<[^>]*>")?,
        })
    }

    fn url_attribute(tag_name: &str) -> &'static str {
        if tag_name.eq_ignore_ascii_case("a") {
            "href"
        } else {
            "src"
        }
    }

    fn context(tag_name: &str) -> ReferenceContext {
        match tag_name.to_ascii_lowercase().as_str() {
            "img" => ReferenceContext::HtmlImage,
            "a" => ReferenceContext::HtmlLink,
            _ => ReferenceContext::HtmlMedia,
        }
    }

    /// Absolute byte range of the URL value inside one tag match.
    fn url_range(&self, content: &str, caps: &Captures<'_>) -> Option<(usize, usize)> {
        let tag_name = caps.get(1)?.as_str();
        let attrs = caps.get(2)?;
        let wanted = Self::url_attribute(tag_name);

        self.attribute
            .captures_iter(&content[attrs.start()..attrs.end()])
            .find(|attr| attr[1].eq_ignore_ascii_case(wanted))
            .and_then(|attr| attr.get(2).or_else(|| attr.get(3)).or_else(|| attr.get(4)))
            .map(|value| (attrs.start() + value.start(), attrs.start() + value.end()))
    }

    fn alt_text(&self, caps: &Captures<'_>) -> Option<String> {
        let found = self.alt.captures(caps.get(2)?.as_str())?;
        let value = found.get(1).or_else(|| found.get(2))?;
        non_empty(&decode_entities(value.as_str()))
    }

    fn link_text(&self, content: &str, after: usize) -> Option<String> {
        let rest = &content[after..];
        let end = rest.to_ascii_lowercase().find("</a>")?;
        let text = self.inner_tags.replace_all(&rest[..end], "");
        non_empty(&decode_entities(&text))
    }
}

/// Decode the entities that commonly appear inside attribute values.
fn decode_entities(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

impl ResourceReferenceScanner for HtmlScanner {
    fn scan(&self, content: &str) -> Vec<ResourceReference> {
        self.tag
            .captures_iter(content)
            .filter_map(|caps| {
                let tag_name = caps.get(1)?.as_str();
                let (start, end) = self.url_range(content, &caps)?;
                let url = decode_entities(content[start..end].trim());
                if url.is_empty() {
                    return None;
                }

                let context = Self::context(tag_name);
                let suggested_name = match context {
                    ReferenceContext::HtmlLink => self.link_text(content, caps.get(0)?.end()),
                    _ => self.alt_text(&caps),
                };

                Some(ResourceReference {
                    url,
                    suggested_name,
                    context,
                    offset: start,
                })
            })
            .collect()
    }

    fn rewrite(&self, content: &str, resolved: &HashMap<String, String>) -> String {
        let mut output = String::with_capacity(content.len());
        let mut cursor = 0;

        for caps in self.tag.captures_iter(content) {
            let Some((start, end)) = self.url_range(content, &caps) else {
                continue;
            };
            let url = decode_entities(content[start..end].trim());
            if let Some(local) = resolved.get(&url) {
                output.push_str(&content[cursor..start]);
                output.push_str(local);
                cursor = end;
            }
        }

        output.push_str(&content[cursor..]);
        output
    }
}

// ============================================================================
// Composite
// ============================================================================

/// Runs several scanners; references are merged by first occurrence.
pub struct CompositeScanner {
    scanners: Vec<Box<dyn ResourceReferenceScanner>>,
}

impl CompositeScanner {
    pub fn new(scanners: Vec<Box<dyn ResourceReferenceScanner>>) -> Self {
        Self { scanners }
    }

    /// Markdown and HTML scanners
    pub fn standard() -> Result<Self> {
        Ok(Self::new(vec![
            Box::new(MarkdownScanner::new()?),
            Box::new(HtmlScanner::new()?),
        ]))
    }
}

impl ResourceReferenceScanner for CompositeScanner {
    fn scan(&self, content: &str) -> Vec<ResourceReference> {
        let mut all: Vec<ResourceReference> = self
            .scanners
            .iter()
            .flat_map(|scanner| scanner.scan(content))
            .collect();
        all.sort_by_key(|reference| reference.offset);

        let mut seen = HashSet::new();
        all.retain(|reference| seen.insert(reference.url.clone()));
        all
    }

    fn rewrite(&self, content: &str, resolved: &HashMap<String, String>) -> String {
        self.scanners
            .iter()
            .fold(content.to_string(), |text, scanner| scanner.rewrite(&text, resolved))
    }
}
