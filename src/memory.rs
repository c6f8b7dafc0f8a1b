//! In-memory page store.
//!
//! Backs the development server and lets tests drive the autosave path
//! without HTTP. Every call is recorded, failures can be injected per
//! operation, and updates can be held open to simulate a slow network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::api::DocumentStore;
use crate::blocks::{Block, Page, PageSummary};
use crate::error::ApiError;

/// One recorded store call.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    List,
    Get { id: String },
    Create { title: String },
    Update { id: String, title: String, blocks: Vec<Block> },
}

pub struct MemoryDocumentStore {
    pages: RwLock<Vec<Page>>,
    calls: Mutex<Vec<StoreCall>>,
    fail_loads: AtomicBool,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
    update_gate: Mutex<Option<Arc<Semaphore>>>,
    create_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            pages: RwLock::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_loads: AtomicBool::new(false),
            fail_creates: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            update_gate: Mutex::new(None),
            create_gate: Mutex::new(None),
        }
    }

    pub fn with_pages(pages: Vec<Page>) -> Self {
        let store = Self::new();
        *store.pages.write().expect("pages write lock") = pages;
        store
    }

    /// Insert or replace a page without recording a call.
    pub fn put_page(&self, page: Page) {
        let mut pages = self.pages.write().expect("pages write lock");
        match pages.iter_mut().find(|p| p.id == page.id) {
            Some(existing) => *existing = page,
            None => pages.push(page),
        }
    }

    /// Current stored copy, without recording a call.
    pub fn page(&self, id: &str) -> Option<Page> {
        self.pages
            .read()
            .expect("pages read lock")
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().expect("calls mutex").clone()
    }

    /// Recorded updates as `(id, title, blocks)`, oldest first.
    pub fn updates(&self) -> Vec<(String, String, Vec<Block>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Update { id, title, blocks } => Some((id, title, blocks)),
                _ => None,
            })
            .collect()
    }

    pub fn update_count(&self) -> usize {
        self.updates().len()
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Hold every following update open until [`Self::release_updates`].
    pub fn hold_updates(&self) {
        *self.update_gate.lock().expect("update gate mutex") = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held updates complete.
    pub fn release_updates(&self, n: usize) {
        if let Some(gate) = self.update_gate.lock().expect("update gate mutex").as_ref() {
            gate.add_permits(n);
        }
    }

    pub fn hold_creates(&self) {
        *self.create_gate.lock().expect("create gate mutex") = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_creates(&self, n: usize) {
        if let Some(gate) = self.create_gate.lock().expect("create gate mutex").as_ref() {
            gate.add_permits(n);
        }
    }

    fn record(&self, call: StoreCall) {
        debug!(?call, "memory store call");
        self.calls.lock().expect("calls mutex").push(call);
    }

    async fn pass_gate(gate: &Mutex<Option<Arc<Semaphore>>>) {
        let gate = gate.lock().expect("gate mutex").clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_pages(&self) -> Result<Vec<PageSummary>, ApiError> {
        self.record(StoreCall::List);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(ApiError::Network("simulated network failure".to_string()));
        }

        let pages = self.pages.read().expect("pages read lock");
        Ok(pages
            .iter()
            .map(|p| PageSummary {
                id: p.id.clone(),
                title: p.title.clone(),
                blocks: None,
            })
            .collect())
    }

    async fn get_page(&self, id: &str) -> Result<Page, ApiError> {
        self.record(StoreCall::Get { id: id.to_string() });
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(ApiError::Fetch {
                id: id.to_string(),
                reason: "simulated network failure".to_string(),
            });
        }

        self.page(id).ok_or_else(|| ApiError::Fetch {
            id: id.to_string(),
            reason: "not found".to_string(),
        })
    }

    async fn create_page(&self, title: &str) -> Result<Page, ApiError> {
        self.record(StoreCall::Create {
            title: title.to_string(),
        });
        Self::pass_gate(&self.create_gate).await;

        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(ApiError::Create("simulated network failure".to_string()));
        }

        let page = Page {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            blocks: Vec::new(),
        };
        self.pages.write().expect("pages write lock").push(page.clone());
        Ok(page)
    }

    async fn update_page(&self, id: &str, title: &str, blocks: &[Block]) -> Result<(), ApiError> {
        self.record(StoreCall::Update {
            id: id.to_string(),
            title: title.to_string(),
            blocks: blocks.to_vec(),
        });
        Self::pass_gate(&self.update_gate).await;

        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(ApiError::Update {
                id: id.to_string(),
                reason: "simulated network failure".to_string(),
            });
        }

        let mut pages = self.pages.write().expect("pages write lock");
        let page = pages
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ApiError::Update {
                id: id.to_string(),
                reason: "not found".to_string(),
            })?;
        page.title = title.to_string();
        page.blocks = blocks.to_vec();
        Ok(())
    }
}
