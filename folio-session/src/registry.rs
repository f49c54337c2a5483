use std::collections::HashMap;
use std::sync::Arc;

use folio_core::{SessionId, ViewerConfig};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{ActiveDocument, Collaborators};

/// Active documents keyed by session.
pub struct SessionRegistry {
    collaborators: Collaborators,
    config: Arc<ViewerConfig>,
    sessions: Mutex<HashMap<SessionId, Arc<ActiveDocument>>>,
}

impl SessionRegistry {
    pub fn new(collaborators: Collaborators, config: Arc<ViewerConfig>) -> Self {
        Self {
            collaborators,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a new session with an empty document.
    pub fn open_session(&self) -> (SessionId, Arc<ActiveDocument>) {
        let session = Uuid::new_v4();
        let document = self.document(session);
        debug!(%session, "session opened");
        (session, document)
    }

    /// Document of `session`, created on first use.
    pub fn document(&self, session: SessionId) -> Arc<ActiveDocument> {
        let mut sessions = self.sessions.lock();
        let document = sessions.entry(session).or_insert_with(|| {
            Arc::new(ActiveDocument::new(
                self.collaborators.clone(),
                Arc::clone(&self.config),
                Some(session),
            ))
        });
        Arc::clone(document)
    }

    pub fn get(&self, session: SessionId) -> Option<Arc<ActiveDocument>> {
        self.sessions.lock().get(&session).cloned()
    }

    /// Drops the session and releases the lock its document holds.
    pub fn end_session(&self, session: SessionId) -> bool {
        let removed = self.sessions.lock().remove(&session);
        match removed {
            Some(document) => {
                document.reset();
                debug!(%session, "session ended");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
