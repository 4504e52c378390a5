//! Local file names for downloaded resources.
//!
//! Images are content-addressed by URL so the same picture embedded in
//! several documents of one directory is stored once. Attachments keep a
//! human-readable name and get a `_N` suffix on collision.

use super::classify::{path_extension, ResourceClassifier};
use crate::paths::sanitize_component;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use url::Url;

const IMAGE_HASH_CHARS: usize = 16;
const ATTACHMENT_FALLBACK: &str = "attachment";
const NAME_QUERY_KEYS: &[&str] = &["filename", "name", "attname"];

/// `sha256(url)` hex prefix plus the image extension.
pub fn image_file_name(raw_url: &str, classifier: &ResourceClassifier, default_ext: &str) -> String {
    let digest = hex::encode(Sha256::digest(raw_url.as_bytes()));
    let ext = Url::parse(raw_url)
        .ok()
        .and_then(|url| {
            path_extension(&url)
                .filter(|ext| classifier.is_image_extension(ext))
                .or_else(|| classifier.image_type_segment(&url))
        })
        .unwrap_or_else(|| default_ext.to_string());

    format!("{}.{}", &digest[..IMAGE_HASH_CHARS], ext)
}

/// Readable attachment name before collision handling.
///
/// Tried in order: URL path file name, `filename`/`name`/`attname` query
/// parameter, link text, `attachment`.
pub fn attachment_base_name(raw_url: &str, suggested: Option<&str>) -> String {
    let url = Url::parse(raw_url).ok();

    let from_path = url.as_ref().and_then(|url| {
        let segment = url.path_segments()?.last()?;
        let decoded = urlencoding::decode(segment).ok()?.into_owned();
        decoded.contains('.').then_some(decoded)
    });

    let from_query = || {
        url.as_ref().and_then(|url| {
            url.query_pairs()
                .find(|(key, value)| {
                    NAME_QUERY_KEYS.contains(&key.to_lowercase().as_str()) && !value.trim().is_empty()
                })
                .map(|(_, value)| value.into_owned())
        })
    };

    let chosen = from_path
        .or_else(from_query)
        .or_else(|| suggested.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
        .unwrap_or_else(|| ATTACHMENT_FALLBACK.to_string());

    sanitize_component(&chosen)
}

/// `candidate`, or `stem_N.ext` with the smallest free N.
///
/// `taken` holds lowercase names already present or allocated.
pub fn unique_name(candidate: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(&candidate.to_lowercase()) {
        return candidate.to_string();
    }

    let (stem, ext) = match candidate.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (candidate, None),
    };

    (1..)
        .map(|n| match ext {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        })
        .find(|name| !taken.contains(&name.to_lowercase()))
        .unwrap_or_else(|| candidate.to_string())
}
