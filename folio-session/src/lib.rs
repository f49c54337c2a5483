use std::sync::Arc;

use folio_core::{
    AccessChecker, MemoryCatalog, NavigationState, RecordLockManager, RecordRepository, TocBuilder,
};

mod document;
mod registry;
#[cfg(test)]
mod testing;

pub use document::ActiveDocument;
pub use registry::SessionRegistry;

/// Services an [`ActiveDocument`] consults while resolving a record.
#[derive(Clone)]
pub struct Collaborators {
    pub records: Arc<dyn RecordRepository>,
    pub locks: Arc<dyn RecordLockManager>,
    pub toc: Arc<dyn TocBuilder>,
    pub access: Arc<dyn AccessChecker>,
}

impl Collaborators {
    pub fn from_catalog(catalog: Arc<MemoryCatalog>, locks: Arc<dyn RecordLockManager>) -> Self {
        Self {
            records: catalog.clone(),
            locks,
            toc: catalog.clone(),
            access: catalog,
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub enum Resolution {
    Loaded(NavigationState),
    /// The access decision forwards the caller elsewhere; nothing was loaded.
    Redirect(String),
}

impl Resolution {
    pub fn state(&self) -> Option<&NavigationState> {
        match self {
            Resolution::Loaded(state) => Some(state),
            Resolution::Redirect(_) => None,
        }
    }

    pub fn into_state(self) -> Option<NavigationState> {
        match self {
            Resolution::Loaded(state) => Some(state),
            Resolution::Redirect(_) => None,
        }
    }

    pub fn redirect_url(&self) -> Option<&str> {
        match self {
            Resolution::Loaded(_) => None,
            Resolution::Redirect(url) => Some(url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    RecordOpened(String),
    RecordViewed(String),
    RecordClosed(String),
    Redirected(String),
}
