//! Document view: one open page.
//!
//! Loads the page through the read-through cache, mounts an editing surface
//! on its blocks and wires the surface's change stream into an autosave
//! coordinator. The view owns the authoritative in-memory [`Page`].

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::DocumentStore;
use crate::autosave::{AutosaveCoordinator, AutosaveHandle, SaveState, SaveStatus};
use crate::blocks::{Block, Page};
use crate::cache::PageCache;
use crate::config::{AutosaveConfig, Settings};
use crate::editor::{BlockEdit, ChangeListener, EditingSurface, EditorWidget};
use crate::error::{EditorError, LoadError, SaveError};

#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    Loading,
    Ready,
    /// The page could not be loaded. Recovered by opening it again.
    Failed(LoadError),
    /// The page loaded but the editor could not start.
    EditorUnavailable(EditorError),
}

pub struct DocumentView<W: EditorWidget> {
    id: String,
    store: Arc<dyn DocumentStore>,
    cache: Arc<PageCache>,
    autosave_config: AutosaveConfig,
    state: watch::Sender<ViewState>,
    page: Option<Page>,
    surface: Option<EditingSurface<W>>,
    autosave: Option<AutosaveHandle>,
}

impl<W: EditorWidget> DocumentView<W> {
    /// Create a view in the `Loading` state. Call [`Self::load`] next.
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        cache: Arc<PageCache>,
        settings: &Settings,
    ) -> Self {
        let (state, _) = watch::channel(ViewState::Loading);
        Self {
            id: id.into(),
            store,
            cache,
            autosave_config: settings.autosave(),
            state,
            page: None,
            surface: None,
            autosave: None,
        }
    }

    /// Load the page and start editing it with `widget`.
    pub async fn open(
        id: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        cache: Arc<PageCache>,
        settings: &Settings,
        widget: W,
    ) -> Self {
        let mut view = Self::new(id, store, cache, settings);
        view.load(widget).await;
        view
    }

    /// Run the load. Only the first call on a `Loading` view does anything.
    pub async fn load(&mut self, widget: W) {
        if *self.state.borrow() != ViewState::Loading {
            return;
        }

        let page = match self.cache.get_or_load(&self.id, self.store.as_ref()).await {
            Ok(page) => page,
            Err(e) => {
                let error = LoadError::from(e);
                warn!(page_id = %self.id, %error, "page load failed");
                self.state.send_replace(ViewState::Failed(error));
                return;
            }
        };

        let autosave = AutosaveCoordinator::spawn(
            &page,
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            self.autosave_config,
        );
        let listener: Arc<dyn ChangeListener> = Arc::new(autosave.clone());
        let mut surface = EditingSurface::mount(widget, page.blocks.clone(), false, listener);

        match surface.initialize().await {
            Ok(()) => {
                info!(page_id = %self.id, blocks = page.blocks.len(), "page opened");
                self.surface = Some(surface);
                self.autosave = Some(autosave);
                self.page = Some(page);
                self.state.send_replace(ViewState::Ready);
            }
            Err(error) => {
                warn!(page_id = %self.id, %error, "editor unavailable");
                autosave.close();
                self.page = Some(page);
                self.state.send_replace(ViewState::EditorUnavailable(error));
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == ViewState::Ready
    }

    /// The loaded page with local edits applied.
    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    pub fn title(&self) -> Option<&str> {
        self.page.as_ref().map(|p| p.title.as_str())
    }

    pub fn blocks(&self) -> &[Block] {
        self.page.as_ref().map(|p| p.blocks.as_slice()).unwrap_or(&[])
    }

    /// Apply a block edit. The change reaches autosave through the surface.
    pub fn edit(&mut self, edit: BlockEdit) -> Result<bool, EditorError> {
        let surface = self.surface.as_mut().ok_or(EditorError::NotReady)?;
        let changed = surface.apply(edit)?;
        if changed {
            if let Some(autosave) = &self.autosave {
                if let Err(error) = autosave.mark_dirty() {
                    debug!(page_id = %self.id, %error, "edit after autosave stopped");
                }
            }
            if let (Some(page), Some(blocks)) = (self.page.as_mut(), surface.snapshot()) {
                page.blocks = blocks;
            }
        }
        Ok(changed)
    }

    pub fn rename(&mut self, title: impl Into<String>) -> Result<(), SaveError> {
        let autosave = self
            .autosave
            .as_ref()
            .ok_or(SaveError::Closed)?;
        let title = title.into();
        autosave.on_title_edit(title.clone())?;
        if let Some(page) = self.page.as_mut() {
            page.title = title;
        }
        Ok(())
    }

    pub fn retry_save(&self) -> Result<(), SaveError> {
        match &self.autosave {
            Some(autosave) => autosave.retry(),
            None => Err(SaveError::Closed),
        }
    }

    pub fn save_status(&self) -> Option<SaveStatus> {
        self.autosave.as_ref().map(|a| a.status())
    }

    pub fn save_state(&self) -> Option<SaveState> {
        self.autosave.as_ref().map(|a| a.state())
    }

    /// One-line status for the header of the page.
    pub fn status_line(&self) -> String {
        match &*self.state.borrow() {
            ViewState::Loading => "Loading...".to_string(),
            ViewState::Failed(error) => error.to_string(),
            ViewState::EditorUnavailable(error) => error.to_string(),
            ViewState::Ready => self
                .save_status()
                .unwrap_or(SaveStatus::Saved)
                .label()
                .to_string(),
        }
    }

    /// Stop autosave and release the editor. Unsaved debounced edits are
    /// discarded.
    pub fn close(&mut self) {
        if let Some(autosave) = self.autosave.take() {
            autosave.close();
        }
        if let Some(mut surface) = self.surface.take() {
            surface.dispose();
        }
        debug!(page_id = %self.id, "view closed");
    }
}

impl<W: EditorWidget> Drop for DocumentView<W> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::BlockBuffer;
    use crate::error::ApiError;
    use crate::memory::{MemoryDocumentStore, StoreCall};
    use async_trait::async_trait;
    use std::time::Duration;

    fn stored_page() -> Page {
        Page {
            id: "p1".to_string(),
            title: "Note".to_string(),
            blocks: vec![Block::header("b1", "Hi", 1)],
        }
    }

    fn backend() -> (Arc<MemoryDocumentStore>, Arc<PageCache>) {
        (
            Arc::new(MemoryDocumentStore::with_pages(vec![stored_page()])),
            Arc::new(PageCache::new()),
        )
    }

    async fn open(store: &Arc<MemoryDocumentStore>, cache: &Arc<PageCache>, id: &str) -> DocumentView<BlockBuffer> {
        DocumentView::open(
            id,
            Arc::clone(store) as Arc<dyn DocumentStore>,
            Arc::clone(cache),
            &Settings::default(),
            BlockBuffer::new(),
        )
        .await
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait(duration: Duration) {
        tokio::time::advance(duration).await;
        settle().await;
    }

    struct BrokenWidget;

    #[async_trait]
    impl EditorWidget for BrokenWidget {
        async fn init(&mut self, _initial: &[Block], _read_only: bool) -> Result<(), EditorError> {
            Err(EditorError::InitFailed("no holder".to_string()))
        }

        fn apply(&mut self, _edit: BlockEdit) -> Result<bool, EditorError> {
            Err(EditorError::NotReady)
        }

        fn save(&self) -> Vec<Block> {
            Vec::new()
        }

        fn dispose(&mut self) {}
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_new_view_is_loading() {
        let (store, cache) = backend();
        let view: DocumentView<BlockBuffer> =
            DocumentView::new("p1", store as Arc<dyn DocumentStore>, cache, &Settings::default());
        assert_eq!(view.state(), ViewState::Loading);
        assert_eq!(view.status_line(), "Loading...");
        assert!(view.page().is_none());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_open_then_close_sends_no_update() {
        let (store, cache) = backend();
        let mut view = open(&store, &cache, "p1").await;
        assert!(view.is_ready());
        assert_eq!(view.blocks(), stored_page().blocks.as_slice());
        assert_eq!(view.status_line(), "Saved");

        view.close();
        wait(Duration::from_secs(10)).await;
        assert_eq!(
            store.calls(),
            vec![StoreCall::Get {
                id: "p1".to_string()
            }]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_edit_then_wait_saves_full_sequence_once() {
        let (store, cache) = backend();
        let mut view = open(&store, &cache, "p1").await;

        let changed = view
            .edit(BlockEdit::Insert {
                index: 1,
                block: Block::paragraph("b2", "x"),
            })
            .unwrap();
        assert!(changed);
        assert_eq!(view.status_line(), "Saving...");

        settle().await;
        wait(Duration::from_millis(2000)).await;
        let expected = vec![Block::header("b1", "Hi", 1), Block::paragraph("b2", "x")];
        assert_eq!(
            store.updates(),
            vec![("p1".to_string(), "Note".to_string(), expected.clone())]
        );
        assert_eq!(view.blocks(), expected.as_slice());
        assert_eq!(view.status_line(), "Saved");

        wait(Duration::from_secs(10)).await;
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_status_is_saving_before_change_is_forwarded() {
        let (store, cache) = backend();
        let mut view = open(&store, &cache, "p1").await;
        assert_eq!(view.status_line(), "Saved");

        view.edit(BlockEdit::Insert {
            index: 1,
            block: Block::paragraph("b2", "x"),
        })
        .unwrap();
        assert_eq!(view.save_status(), Some(SaveStatus::Saving));
        assert!(view.save_state().unwrap().has_pending);

        // A no-op edit leaves the status alone
        let (store, cache) = backend();
        let mut other = open(&store, &cache, "p1").await;
        let changed = other
            .edit(BlockEdit::Move {
                id: "b1".to_string(),
                to: 0,
            })
            .unwrap();
        assert!(!changed);
        assert_eq!(other.status_line(), "Saved");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_load_failure() {
        let (store, cache) = backend();
        let view = open(&store, &cache, "missing").await;

        match view.state() {
            ViewState::Failed(LoadError(ApiError::Fetch { id, .. })) => assert_eq!(id, "missing"),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(view.status_line().starts_with("Error loading note"));
        assert_eq!(view.save_status(), None);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_edit_on_failed_view_is_rejected() {
        let (store, cache) = backend();
        let mut view = open(&store, &cache, "missing").await;
        let err = view
            .edit(BlockEdit::Remove {
                id: "b1".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, EditorError::NotReady);
        assert_eq!(view.rename("x"), Err(SaveError::Closed));
        assert_eq!(view.retry_save(), Err(SaveError::Closed));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_reopen_is_served_from_cache() {
        let (store, cache) = backend();
        let mut first = open(&store, &cache, "p1").await;
        first.close();
        let second = open(&store, &cache, "p1").await;
        assert!(second.is_ready());

        let gets = store
            .calls()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::Get { .. }))
            .count();
        assert_eq!(gets, 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_saved_page_is_reloaded_fresh() {
        let (store, cache) = backend();
        let mut view = open(&store, &cache, "p1").await;
        view.edit(BlockEdit::Update {
            id: "b1".to_string(),
            data: serde_json::json!({ "text": "Hello", "level": 1 }),
        })
        .unwrap();
        settle().await;
        wait(Duration::from_millis(2000)).await;
        view.close();

        let reopened = open(&store, &cache, "p1").await;
        assert_eq!(reopened.blocks(), &[Block::header("b1", "Hello", 1)]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_rename_saves_title() {
        let (store, cache) = backend();
        let mut view = open(&store, &cache, "p1").await;

        view.rename("Groceries").unwrap();
        assert_eq!(view.title(), Some("Groceries"));
        assert_eq!(view.status_line(), "Saving...");

        settle().await;
        wait(Duration::from_millis(1000)).await;
        assert_eq!(
            store.updates(),
            vec![("p1".to_string(), "Groceries".to_string(), stored_page().blocks)]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_failed_save_then_retry() {
        let (store, cache) = backend();
        let mut view = open(&store, &cache, "p1").await;
        store.set_fail_updates(true);

        view.edit(BlockEdit::Remove {
            id: "b1".to_string(),
        })
        .unwrap();
        settle().await;
        wait(Duration::from_millis(2000)).await;
        assert_eq!(view.status_line(), "Error saving");
        assert!(view.save_state().unwrap().last_error.is_some());

        store.set_fail_updates(false);
        view.retry_save().unwrap();
        settle().await;
        assert_eq!(view.status_line(), "Saved");
        assert_eq!(store.page("p1").unwrap().blocks, Vec::<Block>::new());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_editor_failure_closes_autosave() {
        let (store, cache) = backend();
        let view = DocumentView::open(
            "p1",
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::clone(&cache),
            &Settings::default(),
            BrokenWidget,
        )
        .await;

        assert!(matches!(view.state(), ViewState::EditorUnavailable(_)));
        assert_eq!(view.save_status(), None);
        assert_eq!(view.page(), Some(&stored_page()));
        wait(Duration::from_secs(10)).await;
        assert_eq!(store.update_count(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_state_observers_see_ready() {
        let (store, cache) = backend();
        let mut view: DocumentView<BlockBuffer> = DocumentView::new(
            "p1",
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::clone(&cache),
            &Settings::default(),
        );
        let mut rx = view.subscribe();
        assert_eq!(*rx.borrow(), ViewState::Loading);

        view.load(BlockBuffer::new()).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ViewState::Ready);
    }
}
