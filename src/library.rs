//! Notes list and note creation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::DocumentStore;
use crate::blocks::{Page, PageSummary};
use crate::cache::PageCache;
use crate::error::{CreateError, LoadError};

pub const UNTITLED_TITLE: &str = "Untitled Note";

pub struct NotesLibrary {
    store: Arc<dyn DocumentStore>,
    cache: Arc<PageCache>,
    creating: AtomicBool,
}

/// Clears the in-progress flag however the create ends.
struct CreatingGuard<'a>(&'a AtomicBool);

impl Drop for CreatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl NotesLibrary {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<PageCache>) -> Self {
        Self {
            store,
            cache,
            creating: AtomicBool::new(false),
        }
    }

    pub async fn list(&self) -> Result<Vec<PageSummary>, LoadError> {
        let pages = self.store.list_pages().await.map_err(|e| {
            warn!(error = %e, "listing pages failed");
            LoadError::from(e)
        })?;
        Ok(pages)
    }

    /// Whether a create is in flight. The create control stays disabled
    /// while this is true.
    pub fn is_creating(&self) -> bool {
        self.creating.load(Ordering::SeqCst)
    }

    /// Create an "Untitled Note". A second call while one is in flight
    /// fails immediately instead of creating a duplicate.
    pub async fn create_untitled(&self) -> Result<Page, CreateError> {
        if self
            .creating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CreateError::InProgress);
        }
        let _guard = CreatingGuard(&self.creating);

        let page = self.store.create_page(UNTITLED_TITLE).await.map_err(|e| {
            warn!(error = %e, "creating page failed");
            CreateError::from(e)
        })?;

        info!(page_id = %page.id, "page created");
        self.cache.insert(page.clone());
        Ok(page)
    }
}
