//! Typed client for the page collection API.
//!
//! [`DocumentStore`] is the I/O boundary used by the rest of the crate.
//! Implemented by:
//! - [`HttpDocumentStore`] - REST client over `reqwest`
//! - [`crate::memory::MemoryDocumentStore`] - in-memory store for tests and
//!   the development backend

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::blocks::{Block, Page, PageSummary};
use crate::config::Settings;
use crate::error::{ApiError, ConfigError};

/// Page collection operations. Stateless: every call is one request.
///
/// All operations are safe to retry except [`DocumentStore::create_page`],
/// which creates a second document when repeated.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Page summaries in server order.
    async fn list_pages(&self) -> Result<Vec<PageSummary>, ApiError>;

    async fn get_page(&self, id: &str) -> Result<Page, ApiError>;

    /// Create a page with the given title. The server assigns the id and
    /// the page starts with no blocks.
    async fn create_page(&self, title: &str) -> Result<Page, ApiError>;

    /// Replace title and the full block sequence. Success is status only.
    async fn update_page(&self, id: &str, title: &str, blocks: &[Block]) -> Result<(), ApiError>;
}

#[derive(Debug, Serialize)]
struct CreatePageRequest<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdatePageRequest<'a> {
    title: &'a str,
    blocks: &'a [Block],
}

// List entry with its blocks left unparsed
#[derive(Debug, Deserialize)]
struct RawSummary {
    id: String,
    title: String,
    #[serde(default)]
    blocks: Option<Vec<Value>>,
}

// Single-page payload the first backend served for the list route
#[derive(Debug, Deserialize)]
struct LegacyListResponse {
    data: LegacyListData,
}

#[derive(Debug, Deserialize)]
struct LegacyListData {
    page: LegacyPage,
    #[serde(default)]
    blocks: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct LegacyPage {
    id: String,
    title: String,
}

/// Turn a list response into summaries.
///
/// Accepts the array form and the legacy `{data:{page, blocks}}` wrapper,
/// which becomes a one-element list. Blocks that do not match the current
/// block shape are dropped from their summary rather than failing the whole
/// list. Remove the wrapper branch once no backend serves it.
pub fn normalize_list_response(json: Value) -> Result<Vec<PageSummary>, String> {
    match json {
        Value::Array(_) => {
            let entries: Vec<RawSummary> =
                serde_json::from_value(json).map_err(|e| format!("invalid page list: {}", e))?;
            Ok(entries
                .into_iter()
                .map(|entry| PageSummary {
                    id: entry.id,
                    title: entry.title,
                    blocks: entry.blocks.and_then(parse_blocks),
                })
                .collect())
        }
        Value::Object(ref map) if map.contains_key("data") => {
            let legacy: LegacyListResponse = serde_json::from_value(json)
                .map_err(|e| format!("invalid legacy page list: {}", e))?;
            Ok(vec![PageSummary {
                id: legacy.data.page.id,
                title: legacy.data.page.title,
                blocks: parse_blocks(legacy.data.blocks),
            }])
        }
        other => Err(format!("unexpected page list shape: {}", type_name(&other))),
    }
}

fn parse_blocks(raw: Vec<Value>) -> Option<Vec<Block>> {
    serde_json::from_value(Value::Array(raw)).ok()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// REST implementation of [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    client: Client,
    base: Url,
    timeout: Option<Duration>,
}

impl HttpDocumentStore {
    /// `base` is the collection root, e.g. `http://host/api/v1`.
    pub fn new(base: Url) -> Self {
        Self {
            client: Client::new(),
            base,
            timeout: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut store = Self::new(settings.api_base_url()?);
        store.timeout = settings.request_timeout();
        Ok(store)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn prepare(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(CONTENT_TYPE, "application/json");
        match self.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn list_pages(&self) -> Result<Vec<PageSummary>, ApiError> {
        let response = self
            .prepare(self.client.get(self.endpoint(&["pages"])))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Network(format!("status {}", status)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Network(format!("invalid response: {}", e)))?;

        normalize_list_response(json).map_err(ApiError::Network)
    }

    async fn get_page(&self, id: &str) -> Result<Page, ApiError> {
        let fetch_err = |reason: String| ApiError::Fetch {
            id: id.to_string(),
            reason,
        };

        let response = self
            .prepare(self.client.get(self.endpoint(&["pages", id])))
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_err(format!("status {}", status)));
        }

        response
            .json::<Page>()
            .await
            .map_err(|e| fetch_err(format!("invalid response: {}", e)))
    }

    async fn create_page(&self, title: &str) -> Result<Page, ApiError> {
        let response = self
            .prepare(self.client.post(self.endpoint(&["pages"])))
            .json(&CreatePageRequest { title })
            .send()
            .await
            .map_err(|e| ApiError::Create(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Create(format!("status {}: {}", status, text)));
        }

        response
            .json::<Page>()
            .await
            .map_err(|e| ApiError::Create(format!("invalid response: {}", e)))
    }

    async fn update_page(&self, id: &str, title: &str, blocks: &[Block]) -> Result<(), ApiError> {
        let update_err = |reason: String| ApiError::Update {
            id: id.to_string(),
            reason,
        };

        let response = self
            .prepare(self.client.put(self.endpoint(&["pages", id])))
            .json(&UpdatePageRequest { title, blocks })
            .send()
            .await
            .map_err(|e| update_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(update_err(format!("status {}", status)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::memory::MemoryDocumentStore;
    use crate::server::{router, ServerOptions};
    use serde_json::json;
    use std::sync::Arc;

    async fn spawn_backend(options: ServerOptions) -> (HttpDocumentStore, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let app = router(Arc::clone(&store), options);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = Url::parse(&format!("http://{}/api/v1", addr)).unwrap();
        (HttpDocumentStore::new(base), store)
    }

    #[test]
    fn test_normalize_array() {
        let json = json!([
            { "id": "a", "title": "First" },
            { "id": "b", "title": "Second", "blocks": [{ "id": "x", "type": "paragraph", "data": { "text": "hi" } }] }
        ]);
        let pages = normalize_list_response(json).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].id, "a");
        assert!(pages[0].blocks.is_none());
        assert_eq!(pages[1].blocks.as_ref().unwrap()[0].id, "x");
    }

    #[test]
    fn test_normalize_array_foreign_blocks() {
        let json = json!([
            { "id": "p1", "title": "Plain" },
            { "id": "p2", "title": "Photo", "blocks": [{ "id": "i1", "type": "image", "data": {} }] },
            { "id": "p3", "title": "Text", "blocks": [{ "id": "t1", "type": "paragraph", "data": { "text": "x" } }] }
        ]);
        let pages = normalize_list_response(json).unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1].id, "p2");
        assert!(pages[1].blocks.is_none());
        assert_eq!(pages[2].blocks, Some(vec![Block::paragraph("t1", "x")]));
    }

    #[test]
    fn test_normalize_legacy_wrapper() {
        let json = json!({
            "data": {
                "page": { "id": "p1", "title": "My First Note", "parent_id": null },
                "blocks": [{ "id": "b1", "type": "header", "data": { "text": "Welcome", "level": 1 } }]
            }
        });
        let pages = normalize_list_response(json).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].title, "My First Note");
        assert_eq!(pages[0].blocks.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_normalize_legacy_foreign_blocks() {
        // Blocks in the old tagged shape are not current blocks
        let json = json!({
            "data": {
                "page": { "id": "p1", "title": "Demo" },
                "blocks": [{ "id": "b1", "page_id": "p1", "data": { "type": "Todo", "data": { "task": "x" } } }]
            }
        });
        let pages = normalize_list_response(json).unwrap();
        assert_eq!(pages[0].id, "p1");
        assert!(pages[0].blocks.is_none());
    }

    #[test]
    fn test_normalize_rejects_other_shapes() {
        assert!(normalize_list_response(json!("nope")).is_err());
        assert!(normalize_list_response(json!({ "pages": [] })).is_err());
        assert!(normalize_list_response(json!([{ "title": "no id" }])).is_err());
    }

    #[test]
    fn test_endpoint_escapes_ids() {
        let store = HttpDocumentStore::new(Url::parse("http://localhost:3000/api/v1").unwrap());
        assert_eq!(
            store.endpoint(&["pages", "a b/c"]).as_str(),
            "http://localhost:3000/api/v1/pages/a%20b%2Fc"
        );

        let trailing = HttpDocumentStore::new(Url::parse("http://localhost/api/v1/").unwrap());
        assert_eq!(trailing.endpoint(&["pages"]).as_str(), "http://localhost/api/v1/pages");
    }

    #[tokio::test]
    async fn test_http_create_get_update_list() {
        let (client, _store) = spawn_backend(ServerOptions::default()).await;

        let page = client.create_page("Untitled Note").await.unwrap();
        assert!(!page.id.is_empty());
        assert_eq!(page.title, "Untitled Note");
        assert!(page.blocks.is_empty());

        let blocks = vec![Block::header("b1", "Hi", 1), Block::paragraph("b2", "x")];
        client.update_page(&page.id, "Renamed", &blocks).await.unwrap();

        let fetched = client.get_page(&page.id).await.unwrap();
        assert_eq!(fetched.title, "Renamed");
        assert_eq!(fetched.blocks, blocks);

        let list = client.list_pages().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, page.id);
    }

    #[tokio::test]
    async fn test_http_legacy_list() {
        let (client, store) = spawn_backend(ServerOptions { legacy_list: true }).await;
        let page = store.create_page("Legacy").await.unwrap();

        let list = client.list_pages().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, page.id);
    }

    #[tokio::test]
    async fn test_http_missing_page_is_fetch_error() {
        let (client, _store) = spawn_backend(ServerOptions::default()).await;
        let err = client.get_page("missing").await.unwrap_err();
        assert!(matches!(err, ApiError::Fetch { ref id, .. } if id == "missing"));
        assert_eq!(err.class(), ErrorClass::Load);
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_http_update_missing_page_is_update_error() {
        let (client, _store) = spawn_backend(ServerOptions::default()).await;
        let err = client.update_page("missing", "t", &[]).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Save);
    }

    #[tokio::test]
    async fn test_http_transport_failure_is_network_error() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpDocumentStore::new(Url::parse(&format!("http://{}/api/v1", addr)).unwrap());
        let err = client.list_pages().await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));

        let err = client.create_page("x").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Create);
    }
}
