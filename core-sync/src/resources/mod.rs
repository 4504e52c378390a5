//! Embedded resource handling: reference scanning, classification, naming
//! and the download pipeline.

pub mod classify;
pub mod naming;
pub mod pipeline;
pub mod scanner;

pub use classify::{HostPattern, ResourceClassifier};
pub use pipeline::{ProcessedContent, ResourcePipeline, ResourceStats, ResourceTarget};
pub use scanner::{
    CompositeScanner, HtmlScanner, MarkdownScanner, ReferenceContext, ResourceReference,
    ResourceReferenceScanner,
};
