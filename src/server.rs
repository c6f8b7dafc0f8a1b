//! Development backend.
//!
//! Serves the page collection API over an in-memory store so the client
//! can run without a database:
//!
//! | Method | Path |
//! |---|---|
//! | GET | `/health` |
//! | GET, POST | `/api/v1/pages` |
//! | GET, PUT | `/api/v1/pages/{id}` |

use anyhow::Context;
use axum::{
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api::DocumentStore;
use crate::blocks::{validate_blocks, Block, Page};
use crate::config::Settings;
use crate::memory::MemoryDocumentStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    /// Serve the list route in the wrapped single-page form of the first
    /// backend instead of an array.
    pub legacy_list: bool,
}

#[derive(Clone)]
struct BackendState {
    store: Arc<MemoryDocumentStore>,
    options: ServerOptions,
}

#[derive(Debug, Deserialize)]
struct CreatePageBody {
    title: String,
}

#[derive(Debug, Deserialize)]
struct UpdatePageBody {
    title: String,
    #[serde(default)]
    blocks: Vec<Block>,
}

pub fn router(store: Arc<MemoryDocumentStore>, options: ServerOptions) -> Router {
    let state = BackendState { store, options };
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/pages", get(handle_list).post(handle_create))
        .route("/api/v1/pages/{id}", get(handle_get).put(handle_update))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Page every fresh development backend starts with.
pub fn welcome_page() -> Page {
    Page {
        id: uuid::Uuid::new_v4().to_string(),
        title: "My First Note".to_string(),
        blocks: vec![
            Block::header(uuid::Uuid::new_v4().to_string(), "Welcome to Qillqay", 1),
            Block::checklist(uuid::Uuid::new_v4().to_string(), &[("Implement frontend", false)]),
        ],
    }
}

/// Bind `settings.listen_addr` and serve until the process stops.
pub async fn serve(
    settings: &Settings,
    store: Arc<MemoryDocumentStore>,
    options: ServerOptions,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.listen_addr))?;

    info!(
        addr = %listener.local_addr()?,
        legacy_list = options.legacy_list,
        "dev backend listening"
    );

    axum::serve(listener, router(store, options))
        .await
        .context("Dev backend stopped")?;
    Ok(())
}

async fn handle_health() -> &'static str {
    "OK"
}

async fn handle_list(AxumState(state): AxumState<BackendState>) -> (StatusCode, Json<Value>) {
    let pages = match state.store.list_pages().await {
        Ok(pages) => pages,
        Err(e) => {
            error!(error = %e, "listing pages failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    if state.options.legacy_list {
        let first = pages.first().and_then(|summary| state.store.page(&summary.id));
        if let Some(page) = first {
            return (
                StatusCode::OK,
                Json(json!({
                    "data": {
                        "page": { "id": page.id, "title": page.title, "parent_id": null },
                        "blocks": page.blocks,
                    }
                })),
            );
        }
    }

    (StatusCode::OK, Json(json!(pages)))
}

async fn handle_get(
    AxumState(state): AxumState<BackendState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    if state.store.page(&id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Page '{}' not found", id) })),
        );
    }

    match state.store.get_page(&id).await {
        Ok(page) => (StatusCode::OK, Json(json!(page))),
        Err(e) => {
            error!(page_id = %id, error = %e, "loading page failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn handle_create(
    AxumState(state): AxumState<BackendState>,
    Json(body): Json<CreatePageBody>,
) -> (StatusCode, Json<Value>) {
    match state.store.create_page(&body.title).await {
        Ok(page) => {
            info!(page_id = %page.id, "page created");
            (StatusCode::OK, Json(json!(page)))
        }
        Err(e) => {
            error!(error = %e, "creating page failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn handle_update(
    AxumState(state): AxumState<BackendState>,
    Path(id): Path<String>,
    Json(body): Json<UpdatePageBody>,
) -> (StatusCode, Json<Value>) {
    if state.store.page(&id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Page '{}' not found", id) })),
        );
    }

    let report = validate_blocks(&body.blocks);
    if !report.valid {
        warn!(page_id = %id, errors = report.errors.len(), "rejecting invalid blocks");
        let errors: Vec<String> = report.errors.iter().map(|e| e.to_string()).collect();
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid blocks", "details": errors })),
        );
    }

    match state.store.update_page(&id, &body.title, &body.blocks).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            error!(page_id = %id, error = %e, "updating page failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn(pages: Vec<Page>, options: ServerOptions) -> (String, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::with_pages(pages));
        let app = router(Arc::clone(&store), options);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), store)
    }

    async fn call(method: reqwest::Method, url: String, body: Option<Value>) -> (StatusCode, Value) {
        let client = reqwest::Client::new();
        let mut request = client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        let json = response.json::<Value>().await.unwrap_or(Value::Null);
        (status, json)
    }

    fn note() -> Page {
        Page {
            id: "p1".to_string(),
            title: "Note".to_string(),
            blocks: vec![Block::header("b1", "Hi", 1)],
        }
    }

    #[tokio::test]
    async fn test_health() {
        let (base, _) = spawn(vec![], ServerOptions::default()).await;
        let body = reqwest::get(format!("{}/health", base)).await.unwrap().text().await.unwrap();
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let (base, _) = spawn(vec![note()], ServerOptions::default()).await;

        let (status, json) = call(reqwest::Method::GET, format!("{}/api/v1/pages", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!([{ "id": "p1", "title": "Note" }]));

        let (status, json) = call(reqwest::Method::GET, format!("{}/api/v1/pages/p1", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["blocks"][0]["type"], "header");
        assert_eq!(json["blocks"][0]["data"]["text"], "Hi");
    }

    #[tokio::test]
    async fn test_legacy_list_wraps_first_page() {
        let (base, _) = spawn(vec![note()], ServerOptions { legacy_list: true }).await;
        let (status, json) = call(reqwest::Method::GET, format!("{}/api/v1/pages", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["page"]["id"], "p1");
        assert_eq!(json["data"]["blocks"][0]["id"], "b1");
    }

    #[tokio::test]
    async fn test_create_assigns_uuid() {
        let (base, store) = spawn(vec![], ServerOptions::default()).await;
        let (status, json) = call(
            reqwest::Method::POST,
            format!("{}/api/v1/pages", base),
            Some(json!({ "title": "Untitled Note" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let id = json["id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
        assert_eq!(json["blocks"], json!([]));
        assert!(store.page(id).is_some());
    }

    #[tokio::test]
    async fn test_update_and_missing_pages() {
        let (base, store) = spawn(vec![note()], ServerOptions::default()).await;
        let body = json!({
            "title": "Renamed",
            "blocks": [{ "id": "b2", "type": "paragraph", "data": { "text": "x" } }]
        });

        let (status, _) = call(reqwest::Method::PUT, format!("{}/api/v1/pages/p1", base), Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.page("p1").unwrap().title, "Renamed");

        let (status, _) = call(reqwest::Method::PUT, format!("{}/api/v1/pages/nope", base), Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(reqwest::Method::GET, format!("{}/api/v1/pages/nope", base), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_blocks() {
        let (base, store) = spawn(vec![note()], ServerOptions::default()).await;
        let body = json!({
            "title": "Note",
            "blocks": [
                { "id": "b1", "type": "paragraph", "data": { "text": "a" } },
                { "id": "b1", "type": "paragraph", "data": { "text": "b" } }
            ]
        });

        let (status, json) = call(reqwest::Method::PUT, format!("{}/api/v1/pages/p1", base), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["details"][0].as_str().unwrap().contains("Duplicate"));
        assert_eq!(store.page("p1").unwrap(), note());
    }

    #[test]
    fn test_welcome_page_is_valid() {
        let page = welcome_page();
        assert!(validate_blocks(&page.blocks).valid);
        assert_eq!(page.blocks.len(), 2);
    }
}
