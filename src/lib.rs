//! Qillqay notes core.
//!
//! Block-based document model, a typed client for the page API and a
//! per-document autosave coordinator, plus an in-memory development backend.

pub mod api;
pub mod autosave;
pub mod blocks;
pub mod cache;
pub mod config;
pub mod editor;
pub mod error;
pub mod library;
pub mod memory;
pub mod server;
pub mod view;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use api::{DocumentStore, HttpDocumentStore};
pub use autosave::{AutosaveCoordinator, AutosaveHandle, SaveState, SaveStatus};
pub use blocks::{Block, BlockType, Page, PageSummary};
pub use cache::PageCache;
pub use config::{load_settings, AutosaveConfig, Settings};
pub use editor::{BlockBuffer, BlockEdit, EditingSurface, EditorWidget};
pub use error::{ApiError, CreateError, LoadError, SaveError};
pub use library::NotesLibrary;
pub use view::{DocumentView, ViewState};

const DEFAULT_LOG_FILTER: &str = "qillqay=debug,qillqay_lib=debug,tower_http=debug";

/// Install the fmt subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    // A second install (tests, embedding apps) is not an error
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Run the development backend until the process is stopped.
pub fn run() -> Result<()> {
    init_tracing();

    let settings_path = std::env::var(config::ENV_SETTINGS_PATH).ok().map(PathBuf::from);
    let settings = load_settings(settings_path.as_deref());
    tracing::debug!(?settings, "settings loaded");

    let store = Arc::new(memory::MemoryDocumentStore::with_pages(vec![server::welcome_page()]));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server::serve(&settings, store, server::ServerOptions::default()))
}
