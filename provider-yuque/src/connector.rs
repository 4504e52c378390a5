//! Yuque web API connector implementation
//!
//! Implements the `DocumentProvider` trait over the same JSON endpoints the
//! Yuque web client uses, authenticated with the session cookie.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::remote::{
    BookContext, ContentFormat, DocumentLocator, DocumentProvider, RemoteBook, RemoteBookType,
    RemoteContent, RemoteDocType, RemoteDocument, RenderOptions,
};
use bridge_traits::session::SessionProvider;
use bridge_traits::time::{Clock, SystemClock};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::YuqueError;
use crate::types::{BookStack, CatalogNode, DocDetail, Envelope, YuqueBook, YuqueDoc};

/// Public Yuque host
pub const DEFAULT_BASE_URL: &str = "https://www.yuque.com";

/// Default timeout for API requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Yuque API connector
///
/// # Example
///
/// ```ignore
/// use provider_yuque::YuqueConnector;
/// use bridge_traits::remote::DocumentProvider;
///
/// let connector = YuqueConnector::new(http_client, session_provider);
/// let books = connector.list_books().await?;
/// ```
pub struct YuqueConnector {
    http_client: Arc<dyn HttpClient>,
    session_provider: Arc<dyn SessionProvider>,
    clock: Arc<dyn Clock>,
    base_url: String,
    timeout: Duration,
    retry_policy: RetryPolicy,
}

impl YuqueConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, session_provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            http_client,
            session_provider,
            clock: Arc::new(SystemClock),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Point at another host (private deployments, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// GET `path` with the session cookie and decode the `data` envelope.
    #[instrument(skip(self))]
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let session = self.session_provider.require_session(self.clock.now()).await?;

        let request = HttpRequest::new(HttpMethod::Get, format!("{}{}", self.base_url, path))
            .cookie(session.cookie)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Referer", format!("{}/", self.base_url))
            .timeout(self.timeout);

        let response = self
            .http_client
            .execute_with_retry(request, self.retry_policy.clone())
            .await?;
        check_status(&response, path)?;

        let envelope: Envelope<T> = serde_json::from_slice(&response.body)
            .map_err(|e| YuqueError::ParseError(format!("{}: {}", path, e)))?;
        debug!(status = response.status, "API request succeeded");
        Ok(envelope.data)
    }

    async fn list_docs(&self, book_id: i64) -> Result<Vec<YuqueDoc>> {
        self.get_json(&format!("/api/docs?book_id={}", book_id)).await
    }

    /// Table of contents; a book without one yields an empty list.
    async fn list_catalog(&self, book_id: i64) -> Result<Vec<CatalogNode>> {
        match self
            .get_json(&format!("/api/catalog_nodes?book_id={}", book_id))
            .await
        {
            Ok(nodes) => Ok(nodes),
            Err(bridge_traits::error::BridgeError::NotFound(_)) => {
                warn!(book_id, "Book has no table of contents");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

fn check_status(response: &HttpResponse, path: &str) -> std::result::Result<(), YuqueError> {
    if response.is_success() {
        return Ok(());
    }
    if response.is_auth_error() {
        return Err(YuqueError::Unauthorized(format!(
            "status {} for {}",
            response.status, path
        )));
    }
    if response.status == 404 {
        return Err(YuqueError::NotFound(path.to_string()));
    }
    Err(YuqueError::ApiError {
        status_code: response.status,
        message: String::from_utf8_lossy(&response.body).chars().take(200).collect(),
    })
}

fn convert_book(book: YuqueBook, book_type: RemoteBookType) -> RemoteBook {
    RemoteBook {
        id: book.id,
        slug: book.slug,
        name: book.name,
        owner_login: book.user.map(|user| user.login).unwrap_or_default(),
        book_type,
        doc_count: book.items_count,
        updated_at: book.content_updated_at.or(book.updated_at),
    }
}

/// Stable negative id for a section title, which has no document id.
fn title_node_id(uuid: &str) -> i64 {
    let digest = Sha256::digest(uuid.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let value = i64::from_be_bytes(bytes) & i64::MAX;
    -value.max(1)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Merge the flat document list with the table of contents.
///
/// Catalog order wins; documents missing from the catalog follow in listing
/// order without hierarchy.
pub fn merge_catalog(book_id: i64, docs: Vec<YuqueDoc>, nodes: Vec<CatalogNode>) -> Vec<RemoteDocument> {
    let order: Vec<i64> = docs.iter().map(|doc| doc.id).collect();
    let mut docs_by_id: HashMap<i64, YuqueDoc> = docs.into_iter().map(|doc| (doc.id, doc)).collect();
    let mut merged = Vec::with_capacity(order.len() + nodes.len());

    for node in nodes {
        let sort_order = Some(merged.len() as i64);
        match node.node_type.to_ascii_uppercase().as_str() {
            "DOC" => {
                let Some(doc) = node.doc_id.and_then(|id| docs_by_id.remove(&id)) else {
                    continue;
                };
                merged.push(RemoteDocument {
                    id: doc.id,
                    book_id,
                    slug: doc.slug,
                    title: if node.title.trim().is_empty() { doc.title } else { node.title },
                    uuid: Some(node.uuid),
                    parent_uuid: non_empty(node.parent_uuid),
                    child_uuid: non_empty(node.child_uuid),
                    depth: node.level,
                    sort_order,
                    doc_type: RemoteDocType::Doc,
                    created_at: doc.created_at,
                    updated_at: doc.content_updated_at.or(doc.updated_at),
                });
            }
            "TITLE" => merged.push(RemoteDocument {
                id: title_node_id(&node.uuid),
                book_id,
                slug: node.uuid.clone(),
                title: node.title,
                uuid: Some(node.uuid),
                parent_uuid: non_empty(node.parent_uuid),
                child_uuid: non_empty(node.child_uuid),
                depth: node.level,
                sort_order,
                doc_type: RemoteDocType::Title,
                created_at: None,
                updated_at: None,
            }),
            _ => {}
        }
    }

    for id in order {
        if let Some(doc) = docs_by_id.remove(&id) {
            let sort_order = Some(merged.len() as i64);
            merged.push(RemoteDocument {
                id: doc.id,
                book_id,
                slug: doc.slug,
                title: doc.title,
                uuid: None,
                parent_uuid: None,
                child_uuid: None,
                depth: None,
                sort_order,
                doc_type: RemoteDocType::Doc,
                created_at: doc.created_at,
                updated_at: doc.content_updated_at.or(doc.updated_at),
            });
        }
    }

    merged
}

/// Pick the body format from a document detail.
fn detail_content(detail: DocDetail, title: &str, options: &RenderOptions) -> RemoteContent {
    let markdown = non_empty(detail.sourcecode).filter(|_| options.prefer_markdown);
    let (mut body, format) = match markdown {
        Some(markdown) => (markdown, ContentFormat::Markdown),
        None => (detail.content.unwrap_or_default(), ContentFormat::Html),
    };

    if options.include_title {
        let title = detail.title.as_deref().unwrap_or(title);
        body = match format {
            ContentFormat::Markdown => format!("# {}\n\n{}", title, body),
            ContentFormat::Html => format!("<h1>{}</h1>{}", title, body),
        };
    }
    RemoteContent { body, format }
}

#[async_trait]
impl DocumentProvider for YuqueConnector {
    #[instrument(skip(self))]
    async fn list_books(&self) -> Result<Vec<RemoteBook>> {
        let stacks: Vec<BookStack> = self.get_json("/api/mine/book_stacks").await?;
        let collab: Vec<YuqueBook> = self.get_json("/api/mine/raw_collab_books").await?;

        let mut seen = HashSet::new();
        let mut books = Vec::new();
        for book in stacks.into_iter().flat_map(|stack| stack.books) {
            if seen.insert(book.id) {
                books.push(convert_book(book, RemoteBookType::Owned));
            }
        }
        for book in collab {
            if seen.insert(book.id) {
                books.push(convert_book(book, RemoteBookType::Collaborative));
            }
        }

        info!("Listed {} books from Yuque", books.len());
        Ok(books)
    }

    #[instrument(skip(self), fields(book_id = book.book_id))]
    async fn list_documents(&self, book: &BookContext) -> Result<Vec<RemoteDocument>> {
        let docs = self.list_docs(book.book_id).await?;
        let nodes = self.list_catalog(book.book_id).await?;
        let merged = merge_catalog(book.book_id, docs, nodes);

        info!("Listed {} documents for book {}", merged.len(), book.slug);
        Ok(merged)
    }

    #[instrument(skip(self, options), fields(book_id = book.book_id, doc_id = doc.id))]
    async fn fetch_content(
        &self,
        book: &BookContext,
        doc: &DocumentLocator,
        options: &RenderOptions,
    ) -> Result<RemoteContent> {
        let mode = if options.prefer_markdown { "markdown" } else { "html" };
        let path = format!(
            "/api/docs/{}?book_id={}&mode={}",
            urlencoding::encode(&doc.slug),
            book.book_id,
            mode
        );

        let detail: DocDetail = self.get_json(&path).await?;
        Ok(detail_content(detail, &doc.title, options))
    }
}
