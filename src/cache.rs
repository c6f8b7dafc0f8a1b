use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::api::DocumentStore;
use crate::blocks::Page;
use crate::error::ApiError;

/// Read-through cache of full pages keyed by id.
///
/// Entries never expire on their own; an open document is not refetched
/// behind the editor's back. Only [`PageCache::invalidate`] drops an entry.
#[derive(Default)]
pub struct PageCache {
    pages: RwLock<HashMap<String, Page>>,
    invalidations: RwLock<HashMap<String, usize>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Page> {
        self.pages.read().expect("cache read lock").get(id).cloned()
    }

    pub fn insert(&self, page: Page) {
        self.pages
            .write()
            .expect("cache write lock")
            .insert(page.id.clone(), page);
    }

    /// Return the cached page, loading it from `store` on a miss.
    pub async fn get_or_load(&self, id: &str, store: &dyn DocumentStore) -> Result<Page, ApiError> {
        if let Some(page) = self.get(id) {
            debug!(page_id = id, "page cache hit");
            return Ok(page);
        }

        debug!(page_id = id, "page cache miss");
        let page = store.get_page(id).await?;
        self.insert(page.clone());
        Ok(page)
    }

    /// Drop the entry so the next read goes to the store.
    pub fn invalidate(&self, id: &str) {
        let removed = self.pages.write().expect("cache write lock").remove(id).is_some();
        *self
            .invalidations
            .write()
            .expect("cache write lock")
            .entry(id.to_string())
            .or_insert(0) += 1;
        debug!(page_id = id, removed, "page cache invalidated");
    }

    pub fn invalidation_count(&self, id: &str) -> usize {
        self.invalidations
            .read()
            .expect("cache read lock")
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pages.read().expect("cache read lock").contains_key(id)
    }
}
