//! Local path layout for mirrored documents.
//!
//! ```text
//! <output_dir>/<book name>/<ancestor title>/.../<document title>.md
//! ```
//!
//! Title nodes materialize as directories at their own position in the tree.
//! Every component is sanitized so it is valid on common filesystems.

use core_library::models::Document;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const MAX_COMPONENT_CHARS: usize = 120;
const FALLBACK_NAME: &str = "untitled";
const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Make `name` safe to use as a single path component.
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');
    let mut result: String = trimmed.chars().take(MAX_COMPONENT_CHARS).collect();
    result = result.trim_end_matches(|c: char| c == '.' || c == ' ').to_string();

    if result.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    let stem = result.split('.').next().unwrap_or_default().to_lowercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        result.insert(0, '_');
    }
    result
}

/// Title/document nodes above `doc`, root first.
///
/// Parents are resolved through `uuid`/`parent_uuid`; a broken or cyclic
/// chain stops at the last resolvable ancestor.
pub fn ancestors<'a>(doc: &Document, by_uuid: &'a HashMap<String, Document>) -> Vec<&'a Document> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    if let Some(uuid) = &doc.uuid {
        visited.insert(uuid.clone());
    }

    let mut parent = doc.parent_uuid.as_ref();
    while let Some(parent_uuid) = parent {
        if !visited.insert(parent_uuid.clone()) {
            break;
        }
        let Some(node) = by_uuid.get(parent_uuid) else {
            break;
        };
        chain.push(node);
        parent = node.parent_uuid.as_ref();
    }

    chain.reverse();
    chain
}

/// Directory a placed node lends to its children: a title node is the
/// directory itself, a document lends its file name without `.md`.
pub fn node_dir(node: &Document, path: &Path) -> PathBuf {
    let mut dir = path.to_path_buf();
    if !node.is_title() {
        dir.set_extension("");
    }
    dir
}

/// Directory that holds `doc`.
///
/// Starts below the nearest ancestor `placed` knows a path for, so children
/// follow a slug-suffixed parent. Ancestors without a known path contribute
/// their sanitized title.
pub fn parent_dir<F>(
    output_dir: &Path,
    book_name: &str,
    doc: &Document,
    by_uuid: &HashMap<String, Document>,
    placed: F,
) -> PathBuf
where
    F: Fn(&Document) -> Option<PathBuf>,
{
    let chain = ancestors(doc, by_uuid);
    let anchor = chain
        .iter()
        .enumerate()
        .rev()
        .find_map(|(index, node)| placed(*node).map(|path| (index, node_dir(*node, &path))));

    let (mut dir, below) = match anchor {
        Some((index, dir)) => (dir, &chain[index + 1..]),
        None => (output_dir.join(sanitize_component(book_name)), &chain[..]),
    };
    for node in below {
        dir.push(sanitize_component(&node.title));
    }
    dir
}

/// Target path of a document inside `dir`.
///
/// Title nodes resolve to a directory; leaf documents to a `.md` file. With
/// `disambiguate` set, the slug is appended to keep the path unique.
pub fn document_target(dir: &Path, doc: &Document, disambiguate: bool) -> PathBuf {
    let mut stem = sanitize_component(&doc.title);
    if disambiguate {
        stem = format!("{}_{}", stem, sanitize_component(&doc.slug));
    }

    if doc.is_title() {
        dir.join(stem)
    } else {
        dir.join(format!("{}.md", stem))
    }
}
