//! Error types for the notes core.
//!
//! Transport and HTTP failures are converted into [`ApiError`] at the client
//! boundary. The view and coordinator then surface them as one of the three
//! UI-facing classes: [`LoadError`], [`SaveError`] and [`CreateError`].

use thiserror::Error;

use crate::blocks::BlockType;

/// Failure of one document store operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// `list_pages` failed (transport error or non-success status).
    #[error("Error fetching notes: {0}")]
    Network(String),

    /// `get_page` failed. A missing page is reported here as well.
    #[error("Error fetching page '{id}': {reason}")]
    Fetch { id: String, reason: String },

    #[error("Error creating page: {0}")]
    Create(String),

    #[error("Error updating page '{id}': {reason}")]
    Update { id: String, reason: String },
}

/// How a failure is presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Page-level error view, recovered by navigating again.
    Load,
    /// Inline status, document stays editable and the edit is kept.
    Save,
    /// Reported where the create was triggered.
    Create,
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Network(_) | ApiError::Fetch { .. } => ErrorClass::Load,
            ApiError::Create(_) => ErrorClass::Create,
            ApiError::Update { .. } => ErrorClass::Save,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Error loading note: {0}")]
pub struct LoadError(#[from] pub ApiError);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The change listener could not hand an edit to the coordinator.
    #[error("Edit could not be recorded: {0}")]
    Listener(String),

    /// The document was closed or never opened for editing.
    #[error("Document is not open for editing")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreateError {
    #[error("A note is already being created")]
    InProgress,

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Block shape violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Block id is required")]
    EmptyId,

    #[error("Invalid block type '{0}'. Must be one of: header, paragraph, list, checklist, code")]
    UnknownType(String),

    #[error("Block '{id}' ({block_type}): {reason}")]
    InvalidData {
        id: String,
        block_type: BlockType,
        reason: String,
    },

    #[error("Duplicate block id '{0}'")]
    DuplicateId(String),
}

/// Editing surface lifecycle and edit failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditorError {
    #[error("Editor is not initialized yet")]
    NotReady,

    #[error("Document is read-only")]
    ReadOnly,

    #[error("Editor has been disposed")]
    Disposed,

    #[error("Editor failed to initialize: {0}")]
    InitFailed(String),

    #[error("No block with id '{0}'")]
    UnknownBlock(String),

    #[error("Block index {index} is out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    #[error(transparent)]
    InvalidBlock(#[from] BlockError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid API origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },
}
