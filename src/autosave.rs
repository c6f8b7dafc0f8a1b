//! Debounced autosave for one open document.
//!
//! [`AutosaveCoordinator::spawn`] starts one task per document and returns an
//! [`AutosaveHandle`]. The task owns:
//! - the pending edit (latest title and blocks not yet confirmed)
//! - the debounce deadline
//! - at most one in-flight update request
//! - the [`SaveStatus`] state machine: `Saved → Saving → {Saved, Error}`,
//!   `Error → Saving` on the next edit or an explicit retry
//!
//! # Ordering
//!
//! Edits reach the task through one channel, so they are applied in arrival
//! order. Whatever the timer fires, the request carries the newest pending
//! edit. A timer that fires while a request is in flight is deferred until
//! that request resolves.
//!
//! # Cancellation
//!
//! Closing drops the timer, so a debounced edit is never sent. A request that
//! is already in flight keeps running in its own task; its result is ignored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::DocumentStore;
use crate::blocks::{blocks_equal, Block, Page};
use crate::cache::PageCache;
use crate::config::AutosaveConfig;
use crate::editor::ChangeListener;
use crate::error::{ApiError, SaveError};

// --- Status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Saved,
    Saving,
    Error,
}

impl SaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveStatus::Saved => "saved",
            SaveStatus::Saving => "saving",
            SaveStatus::Error => "error",
        }
    }

    /// Text for the status indicator.
    pub fn label(&self) -> &'static str {
        match self {
            SaveStatus::Saved => "Saved",
            SaveStatus::Saving => "Saving...",
            SaveStatus::Error => "Error saving",
        }
    }
}

/// Observable save state of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveState {
    pub status: SaveStatus,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_error: Option<SaveError>,
    /// An edit exists that the server has not confirmed.
    pub has_pending: bool,
}

impl Default for SaveState {
    fn default() -> Self {
        Self {
            status: SaveStatus::Saved,
            last_saved_at: None,
            last_error: None,
            has_pending: false,
        }
    }
}

/// Latest unconfirmed content of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdit {
    pub title: String,
    pub blocks: Vec<Block>,
    pub generation: u64,
}

#[derive(Debug)]
enum Command {
    Blocks(Vec<Block>),
    Title(String),
    Retry,
    Failed(SaveError),
    Close,
}

// --- Handle ---

/// Cheap, cloneable handle to a document's coordinator task.
#[derive(Clone)]
pub struct AutosaveHandle {
    page_id: String,
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<watch::Sender<SaveState>>,
    closed: Arc<AtomicBool>,
}

impl AutosaveHandle {
    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    /// Record a new full block sequence and restart the block debounce.
    pub fn on_edit(&self, blocks: Vec<Block>) -> Result<(), SaveError> {
        self.submit(Command::Blocks(blocks))
    }

    /// Record a new title and restart the (shorter) title debounce.
    pub fn on_title_edit(&self, title: impl Into<String>) -> Result<(), SaveError> {
        self.submit(Command::Title(title.into()))
    }

    /// Resend the retained edit after a failed save.
    pub fn retry(&self) -> Result<(), SaveError> {
        self.send(Command::Retry)
    }

    /// Route a failure from the edit pipeline into the save status.
    pub fn report_failure(&self, error: SaveError) {
        if self.send(Command::Failed(error)).is_err() {
            debug!(page_id = %self.page_id, "failure reported after close, ignoring");
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.state.borrow().status
    }

    pub fn state(&self) -> SaveState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the coordinator. Pending, unsent edits are discarded.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Close);
            debug!(page_id = %self.page_id, "autosave closed");
        }
    }

    /// Show `Saving` right away for an edit whose content is still on its
    /// way to [`Self::on_edit`].
    pub fn mark_dirty(&self) -> Result<(), SaveError> {
        if self.is_closed() {
            return Err(SaveError::Closed);
        }
        self.state.send_modify(|s| {
            s.status = SaveStatus::Saving;
            s.has_pending = true;
        });
        Ok(())
    }

    fn submit(&self, command: Command) -> Result<(), SaveError> {
        // Visible before the debounce even starts
        self.mark_dirty()?;
        self.send(command)
    }

    fn send(&self, command: Command) -> Result<(), SaveError> {
        if self.is_closed() {
            return Err(SaveError::Closed);
        }
        self.commands
            .send(command)
            .map_err(|_| SaveError::Closed)
    }
}

#[async_trait::async_trait]
impl ChangeListener for AutosaveHandle {
    async fn blocks_changed(&self, blocks: Vec<Block>) -> Result<(), SaveError> {
        self.on_edit(blocks)
    }

    fn change_failed(&self, error: SaveError) {
        self.report_failure(error);
    }
}

// --- Coordinator task ---

struct InFlight {
    generation: u64,
    title: String,
    blocks: Vec<Block>,
    result: oneshot::Receiver<Result<(), ApiError>>,
}

enum Event {
    Command(Option<Command>),
    Flight(Result<(), ApiError>),
    Timer,
}

pub struct AutosaveCoordinator {
    page_id: String,
    store: Arc<dyn DocumentStore>,
    cache: Arc<PageCache>,
    config: AutosaveConfig,
    state: Arc<watch::Sender<SaveState>>,
    title: String,
    blocks: Vec<Block>,
    generation: u64,
    pending: Option<PendingEdit>,
    confirmed: (String, Vec<Block>),
    deadline: Option<Instant>,
    deferred: bool,
    flight: Option<InFlight>,
}

impl AutosaveCoordinator {
    /// Start autosave for `page`, whose content is taken as confirmed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        page: &Page,
        store: Arc<dyn DocumentStore>,
        cache: Arc<PageCache>,
        config: AutosaveConfig,
    ) -> AutosaveHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SaveState::default());
        let state = Arc::new(state);

        let coordinator = AutosaveCoordinator {
            page_id: page.id.clone(),
            store,
            cache,
            config,
            state: Arc::clone(&state),
            title: page.title.clone(),
            blocks: page.blocks.clone(),
            generation: 0,
            pending: None,
            confirmed: (page.title.clone(), page.blocks.clone()),
            deadline: None,
            deferred: false,
            flight: None,
        };
        tokio::spawn(coordinator.run(rx));

        AutosaveHandle {
            page_id: page.id.clone(),
            commands: tx,
            state,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!(page_id = %self.page_id, "autosave started");

        loop {
            let event = tokio::select! {
                biased;
                command = commands.recv() => Event::Command(command),
                result = flight_done(&mut self.flight) => Event::Flight(result),
                _ = wait_until(self.deadline) => Event::Timer,
            };

            match event {
                Event::Command(None) | Event::Command(Some(Command::Close)) => break,
                Event::Command(Some(command)) => self.handle_command(command),
                Event::Flight(result) => self.finish_flight(result),
                Event::Timer => self.timer_fired(),
            }
        }

        // Any in-flight result is dropped with `self`; no state is touched
        if self.deadline.is_some() {
            debug!(page_id = %self.page_id, "discarding debounced edit on close");
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Blocks(blocks) => {
                self.blocks = blocks;
                self.record_edit(self.config.debounce_blocks);
            }
            Command::Title(title) => {
                self.title = title;
                self.record_edit(self.config.debounce_title);
            }
            Command::Retry => {
                if self.pending.is_none() || self.state.borrow().status != SaveStatus::Error {
                    return;
                }
                debug!(page_id = %self.page_id, "manual retry");
                self.deadline = None;
                if self.flight.is_some() {
                    self.deferred = true;
                } else {
                    self.send_pending();
                }
            }
            Command::Failed(error) => {
                warn!(page_id = %self.page_id, %error, "edit pipeline failed");
                self.state.send_modify(|s| {
                    s.status = SaveStatus::Error;
                    s.last_error = Some(error);
                });
            }
            Command::Close => {}
        }
    }

    fn record_edit(&mut self, window: Duration) {
        self.generation += 1;
        self.pending = Some(PendingEdit {
            title: self.title.clone(),
            blocks: self.blocks.clone(),
            generation: self.generation,
        });
        self.deadline = Some(Instant::now() + window);
        self.state.send_modify(|s| {
            s.status = SaveStatus::Saving;
            s.has_pending = true;
        });
        debug!(
            page_id = %self.page_id,
            generation = self.generation,
            debounce_ms = window.as_millis() as u64,
            "edit recorded, debounce restarted"
        );
    }

    fn timer_fired(&mut self) {
        self.deadline = None;
        if self.flight.is_some() {
            debug!(page_id = %self.page_id, "debounce elapsed during save, deferring");
            self.deferred = true;
            return;
        }
        self.send_pending();
    }

    fn send_pending(&mut self) {
        let Some(pending) = self.pending.clone() else {
            return;
        };

        let (confirmed_title, confirmed_blocks) = &self.confirmed;
        if self.config.skip_unchanged
            && pending.title == *confirmed_title
            && blocks_equal(&pending.blocks, confirmed_blocks)
        {
            debug!(page_id = %self.page_id, generation = pending.generation, "content unchanged, skipping save");
            self.pending = None;
            self.state.send_modify(|s| {
                s.status = SaveStatus::Saved;
                s.last_error = None;
                s.has_pending = false;
            });
            return;
        }

        let (tx, rx) = oneshot::channel();
        let store = Arc::clone(&self.store);
        let page_id = self.page_id.clone();
        let title = pending.title.clone();
        let blocks = pending.blocks.clone();
        tokio::spawn(async move {
            let result = store.update_page(&page_id, &title, &blocks).await;
            // The coordinator may be gone; then nobody wants the answer
            let _ = tx.send(result);
        });

        debug!(
            page_id = %self.page_id,
            generation = pending.generation,
            blocks = pending.blocks.len(),
            "save started"
        );
        self.flight = Some(InFlight {
            generation: pending.generation,
            title: pending.title,
            blocks: pending.blocks,
            result: rx,
        });
        self.state.send_modify(|s| s.status = SaveStatus::Saving);
    }

    fn finish_flight(&mut self, result: Result<(), ApiError>) {
        let Some(flight) = self.flight.take() else {
            return;
        };

        match result {
            Ok(()) => {
                info!(page_id = %self.page_id, generation = flight.generation, "page saved");
                self.confirmed = (flight.title, flight.blocks);
                if self
                    .pending
                    .as_ref()
                    .map_or(false, |p| p.generation <= flight.generation)
                {
                    self.pending = None;
                }
                self.cache.invalidate(&self.page_id);

                let has_pending = self.pending.is_some();
                self.state.send_modify(|s| {
                    s.status = if has_pending {
                        SaveStatus::Saving
                    } else {
                        SaveStatus::Saved
                    };
                    s.last_saved_at = Some(Utc::now());
                    s.last_error = None;
                    s.has_pending = has_pending;
                });
            }
            Err(error) => {
                warn!(page_id = %self.page_id, generation = flight.generation, %error, "save failed");
                self.state.send_modify(|s| {
                    s.status = SaveStatus::Error;
                    s.last_error = Some(SaveError::Api(error));
                    s.has_pending = true;
                });
            }
        }

        if std::mem::take(&mut self.deferred) {
            self.send_pending();
        }
    }
}

async fn flight_done(flight: &mut Option<InFlight>) -> Result<(), ApiError> {
    match flight {
        Some(flight) => match (&mut flight.result).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Update {
                id: String::new(),
                reason: "save task ended without a result".to_string(),
            }),
        },
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
