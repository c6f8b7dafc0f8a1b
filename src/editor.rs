//! # Editing surface
//!
//! Adapts an interactive block editor into the canonical block model.
//!
//! The widget itself sits behind [`EditorWidget`], a capability with an
//! explicit lifecycle (`init`, `apply`/`save` for changes, `dispose`), so the
//! rest of the crate never depends on one widget's quirks. [`EditingSurface`]
//! owns a widget and enforces the lifecycle rules:
//!
//! - the widget is initialized at most once per surface, asynchronously
//! - every observable change emits the *full* current block sequence
//! - emissions go through one forwarding task, in order, without the
//!   surface ever waiting on the listener
//! - read-only surfaces neither accept edits nor emit
//! - the widget is released exactly once, including when init fails

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::blocks::{blocks_equal, validate_block, validate_blocks, Block, BlockType};
use crate::error::{BlockError, EditorError, SaveError};

/// A user edit against the block sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockEdit {
    /// Insert at `index`. An empty id gets a fresh one.
    Insert { index: usize, block: Block },
    /// Replace the payload of a block, keeping its type.
    Update { id: String, data: Value },
    /// Turn a block into another type.
    SetType {
        id: String,
        block_type: BlockType,
        data: Value,
    },
    Remove { id: String },
    Move { id: String, to: usize },
    /// Replace the whole sequence (paste, undo of many blocks).
    Replace { blocks: Vec<Block> },
}

/// Lifecycle capability of an embeddable block editor.
#[async_trait]
pub trait EditorWidget: Send + 'static {
    /// Prepare the widget with its initial content. May complete later than
    /// the mount that requested it.
    async fn init(&mut self, initial: &[Block], read_only: bool) -> Result<(), EditorError>;

    /// Apply an edit. Returns whether the content observably changed.
    fn apply(&mut self, edit: BlockEdit) -> Result<bool, EditorError>;

    /// Current full content in document order.
    fn save(&self) -> Vec<Block>;

    /// Release widget resources.
    fn dispose(&mut self);
}

/// Receiver of full block sequences emitted by a surface.
#[async_trait]
pub trait ChangeListener: Send + Sync + 'static {
    async fn blocks_changed(&self, blocks: Vec<Block>) -> Result<(), SaveError>;

    /// Called when `blocks_changed` failed, so the failure reaches the
    /// owner's error path instead of vanishing.
    fn change_failed(&self, error: SaveError);
}

/// In-memory block editor used as the default widget.
#[derive(Debug, Default)]
pub struct BlockBuffer {
    blocks: Vec<Block>,
    ready: bool,
    disposed: bool,
}

impl BlockBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn position(&self, id: &str) -> Result<usize, EditorError> {
        self.blocks
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| EditorError::UnknownBlock(id.to_string()))
    }

    fn replace_at(&mut self, index: usize, candidate: Block) -> Result<bool, EditorError> {
        validate_block(&candidate)?;
        if self.blocks[index] == candidate {
            return Ok(false);
        }
        self.blocks[index] = candidate;
        Ok(true)
    }
}

#[async_trait]
impl EditorWidget for BlockBuffer {
    async fn init(&mut self, initial: &[Block], _read_only: bool) -> Result<(), EditorError> {
        // Loaded content is shown as-is, even if it would not pass validation
        let report = validate_blocks(initial);
        for error in &report.errors {
            warn!(%error, "loaded block does not match its type");
        }
        self.blocks = initial.to_vec();
        self.ready = true;
        Ok(())
    }

    fn apply(&mut self, edit: BlockEdit) -> Result<bool, EditorError> {
        if self.disposed {
            return Err(EditorError::Disposed);
        }
        if !self.ready {
            return Err(EditorError::NotReady);
        }

        match edit {
            BlockEdit::Insert { index, mut block } => {
                if index > self.blocks.len() {
                    return Err(EditorError::OutOfRange {
                        index,
                        len: self.blocks.len(),
                    });
                }
                if block.id.trim().is_empty() {
                    block.id = uuid::Uuid::new_v4().to_string();
                }
                validate_block(&block)?;
                if self.blocks.iter().any(|b| b.id == block.id) {
                    return Err(BlockError::DuplicateId(block.id).into());
                }
                self.blocks.insert(index, block);
                Ok(true)
            }
            BlockEdit::Update { id, data } => {
                let index = self.position(&id)?;
                let candidate = Block::new(id, self.blocks[index].block_type, data);
                self.replace_at(index, candidate)
            }
            BlockEdit::SetType {
                id,
                block_type,
                data,
            } => {
                let index = self.position(&id)?;
                self.replace_at(index, Block::new(id, block_type, data))
            }
            BlockEdit::Remove { id } => {
                let index = self.position(&id)?;
                self.blocks.remove(index);
                Ok(true)
            }
            BlockEdit::Move { id, to } => {
                let from = self.position(&id)?;
                if to >= self.blocks.len() {
                    return Err(EditorError::OutOfRange {
                        index: to,
                        len: self.blocks.len(),
                    });
                }
                if from == to {
                    return Ok(false);
                }
                let block = self.blocks.remove(from);
                self.blocks.insert(to, block);
                Ok(true)
            }
            BlockEdit::Replace { blocks } => {
                let report = validate_blocks(&blocks);
                if let Some(error) = report.errors.into_iter().next() {
                    return Err(error.into());
                }
                if blocks_equal(&self.blocks, &blocks) {
                    return Ok(false);
                }
                self.blocks = blocks;
                Ok(true)
            }
        }
    }

    fn save(&self) -> Vec<Block> {
        self.blocks.clone()
    }

    fn dispose(&mut self) {
        self.blocks.clear();
        self.ready = false;
        self.disposed = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceState {
    /// Mounted, widget not initialized yet.
    Mounted,
    Ready,
    Failed(EditorError),
    Disposed,
}

/// One mounted editor instance.
pub struct EditingSurface<W: EditorWidget> {
    widget: W,
    initial: Vec<Block>,
    read_only: bool,
    state: SurfaceState,
    listener: Option<Arc<dyn ChangeListener>>,
    changes: Option<mpsc::UnboundedSender<Vec<Block>>>,
    released: bool,
}

impl<W: EditorWidget> EditingSurface<W> {
    pub fn mount(
        widget: W,
        initial: Vec<Block>,
        read_only: bool,
        listener: Arc<dyn ChangeListener>,
    ) -> Self {
        Self {
            widget,
            initial,
            read_only,
            state: SurfaceState::Mounted,
            listener: Some(listener),
            changes: None,
            released: false,
        }
    }

    /// Initialize the widget. Only the first call does work; later calls
    /// return the outcome of that first attempt.
    pub async fn initialize(&mut self) -> Result<(), EditorError> {
        match &self.state {
            SurfaceState::Ready => return Ok(()),
            SurfaceState::Failed(e) => return Err(e.clone()),
            SurfaceState::Disposed => return Err(EditorError::Disposed),
            SurfaceState::Mounted => {}
        }

        let initial = std::mem::take(&mut self.initial);
        if let Err(e) = self.widget.init(&initial, self.read_only).await {
            warn!(error = %e, "editor initialization failed");
            self.release();
            self.state = SurfaceState::Failed(e.clone());
            return Err(e);
        }

        if let Some(listener) = self.listener.take() {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(forward_changes(rx, listener));
            self.changes = Some(tx);
        }
        self.state = SurfaceState::Ready;
        debug!(read_only = self.read_only, blocks = initial.len(), "editor ready");
        Ok(())
    }

    pub fn state(&self) -> &SurfaceState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SurfaceState::Ready
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_editable(&self) -> Result<(), EditorError> {
        match &self.state {
            SurfaceState::Ready if self.read_only => Err(EditorError::ReadOnly),
            SurfaceState::Ready => Ok(()),
            SurfaceState::Mounted => Err(EditorError::NotReady),
            SurfaceState::Failed(e) => Err(e.clone()),
            SurfaceState::Disposed => Err(EditorError::Disposed),
        }
    }

    /// Apply a user edit and emit the resulting sequence if it changed.
    pub fn apply(&mut self, edit: BlockEdit) -> Result<bool, EditorError> {
        self.ensure_editable()?;
        let changed = self.widget.apply(edit)?;
        if changed {
            self.emit(self.widget.save());
        }
        Ok(changed)
    }

    /// Emit the current content without an edit.
    pub fn emit_current(&self) -> Result<(), EditorError> {
        self.ensure_editable()?;
        self.emit(self.widget.save());
        Ok(())
    }

    /// Current content, if the widget is ready.
    pub fn snapshot(&self) -> Option<Vec<Block>> {
        self.is_ready().then(|| self.widget.save())
    }

    fn emit(&self, blocks: Vec<Block>) {
        if let Some(tx) = &self.changes {
            if tx.send(blocks).is_err() {
                warn!("change forwarder is gone, dropping emission");
            }
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.widget.dispose();
        }
    }

    /// Tear down the surface. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.state == SurfaceState::Disposed {
            return;
        }
        self.release();
        // Closing the channel lets the forwarder drain and exit
        self.changes = None;
        self.listener = None;
        self.state = SurfaceState::Disposed;
        debug!("editor disposed");
    }
}

impl<W: EditorWidget> Drop for EditingSurface<W> {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn forward_changes(
    mut rx: mpsc::UnboundedReceiver<Vec<Block>>,
    listener: Arc<dyn ChangeListener>,
) {
    while let Some(blocks) = rx.recv().await {
        if let Err(e) = listener.blocks_changed(blocks).await {
            warn!(error = %e, "change listener failed");
            listener.change_failed(e);
        }
    }
}
