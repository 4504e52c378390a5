//! Resource classification by URL shape.
//!
//! A URL is an image when its path ends in a known image extension, or when
//! it is served by an image CDN and either has no extension or carries an
//! image-type path segment (`/yuque/0/2024/png/...`). It is an attachment
//! when it is served by a configured document-asset host and is not an image.
//! Everything else is left alone.

use core_library::models::ResourceType;
use core_runtime::config::SyncSettings;
use std::collections::HashSet;
use url::Url;

/// `host` or `host/path-prefix`, matching subdomains of `host`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPattern {
    host: String,
    path_prefix: Option<String>,
}

impl HostPattern {
    pub fn parse(pattern: &str) -> Self {
        let trimmed = pattern
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_lowercase();
        match trimmed.split_once('/') {
            Some((host, prefix)) => Self {
                host: host.to_string(),
                path_prefix: Some(format!("/{}", prefix.trim_matches('/'))),
            },
            None => Self {
                host: trimmed,
                path_prefix: None,
            },
        }
    }

    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str().map(str::to_lowercase) else {
            return false;
        };
        let host_matches = host == self.host || host.ends_with(&format!(".{}", self.host));
        if !host_matches {
            return false;
        }
        match &self.path_prefix {
            Some(prefix) => {
                let path = url.path().to_lowercase();
                path == *prefix || path.starts_with(&format!("{}/", prefix))
            }
            None => true,
        }
    }
}

/// Lowercase extension of the last path segment, if any.
pub fn path_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.last()?;
    let decoded = urlencoding::decode(segment).ok()?;
    let (stem, ext) = decoded.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

#[derive(Debug, Clone)]
pub struct ResourceClassifier {
    image_extensions: HashSet<String>,
    image_hosts: Vec<HostPattern>,
    attachment_hosts: Vec<HostPattern>,
    auth_hosts: Vec<HostPattern>,
}

impl ResourceClassifier {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        let patterns = |list: &[String]| -> Vec<HostPattern> {
            list.iter().map(|p| HostPattern::parse(p)).collect()
        };
        Self {
            image_extensions: settings
                .image_extensions
                .iter()
                .map(|ext| ext.to_lowercase())
                .collect(),
            image_hosts: patterns(&settings.image_hosts),
            attachment_hosts: patterns(&settings.attachment_hosts),
            auth_hosts: patterns(&settings.auth_hosts),
        }
    }

    pub fn is_image_extension(&self, ext: &str) -> bool {
        self.image_extensions.contains(&ext.to_lowercase())
    }

    /// First path segment naming an image type, e.g. `png` in `/0/2024/png/x`.
    pub fn image_type_segment(&self, url: &Url) -> Option<String> {
        url.path_segments()?
            .map(str::to_lowercase)
            .find(|segment| self.image_extensions.contains(segment))
    }

    pub fn classify(&self, raw_url: &str) -> Option<ResourceType> {
        let url = Url::parse(raw_url).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }

        let extension = path_extension(&url);
        if extension.as_deref().is_some_and(|ext| self.is_image_extension(ext)) {
            return Some(ResourceType::Image);
        }

        let on_image_cdn = self.image_hosts.iter().any(|p| p.matches(&url));
        if on_image_cdn && (extension.is_none() || self.image_type_segment(&url).is_some()) {
            return Some(ResourceType::Image);
        }

        if self.attachment_hosts.iter().any(|p| p.matches(&url)) {
            return Some(ResourceType::Attachment);
        }

        None
    }

    /// Whether downloads from this URL need the session cookie
    pub fn requires_auth(&self, raw_url: &str) -> bool {
        Url::parse(raw_url)
            .map(|url| self.auth_hosts.iter().any(|p| p.matches(&url)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ResourceClassifier {
        ResourceClassifier::from_settings(&SyncSettings::default())
    }

    #[test]
    fn test_host_pattern_matching() {
        let pattern = HostPattern::parse("yuque.com/attachments");
        let yes = Url::parse("https://www.yuque.com/attachments/yuque/0/a.pdf").unwrap();
        let wrong_path = Url::parse("https://www.yuque.com/docs/a.pdf").unwrap();
        let lookalike = Url::parse("https://notyuque.com/attachments/a.pdf").unwrap();

        assert!(pattern.matches(&yes));
        assert!(!pattern.matches(&wrong_path));
        assert!(!pattern.matches(&lookalike));
    }

    #[test]
    fn test_image_by_extension_is_case_insensitive() {
        let c = classifier();
        assert_eq!(c.classify("https://example.com/a/B.PNG"), Some(ResourceType::Image));
        assert_eq!(c.classify("https://example.com/a/b.jpeg?x=1"), Some(ResourceType::Image));
    }

    #[test]
    fn test_image_by_cdn_convention() {
        let c = classifier();
        assert_eq!(
            c.classify("https://cdn.nlark.com/yuque/__latex/abcdef"),
            Some(ResourceType::Image)
        );
        assert_eq!(
            c.classify("https://cdn.nlark.com/yuque/0/2024/png/1/1700.image"),
            Some(ResourceType::Image)
        );
    }

    #[test]
    fn test_attachment_hosts() {
        let c = classifier();
        assert_eq!(
            c.classify("https://www.yuque.com/attachments/yuque/0/2024/pdf/1/report.pdf"),
            Some(ResourceType::Attachment)
        );
        assert_eq!(
            c.classify("https://cdn.nlark.com/yuque/0/2024/zip/1/bundle.zip"),
            Some(ResourceType::Attachment)
        );
    }

    #[test]
    fn test_unrelated_urls_are_ignored() {
        let c = classifier();
        assert_eq!(c.classify("https://example.com/page"), None);
        assert_eq!(c.classify("https://example.com/file.pdf"), None);
        assert_eq!(c.classify("./images/local.png"), None);
        assert_eq!(c.classify("mailto:someone@example.com"), None);
    }

    #[test]
    fn test_requires_auth() {
        let c = classifier();
        assert!(c.requires_auth("https://www.yuque.com/attachments/a.pdf"));
        assert!(!c.requires_auth("https://cdn.nlark.com/a.png"));
        assert!(!c.requires_auth("not a url"));
    }
}
