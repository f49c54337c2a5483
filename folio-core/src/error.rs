use thiserror::Error;

use crate::ElementId;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The identifier does not lead to a record the caller may see.
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record deleted: {0}")]
    Deleted(String),
    /// A previously resolved element no longer validates; reload the record.
    #[error("element {element_id} of {identifier} no longer exists")]
    StaleReference {
        identifier: String,
        element_id: ElementId,
    },
    #[error("concurrent view limit reached for {identifier}:{limit}")]
    LimitExceeded { identifier: String, limit: u32 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    IndexUnreachable(#[from] anyhow::Error),
}

impl ResolveError {
    pub fn is_stale(&self) -> bool {
        matches!(self, ResolveError::StaleReference { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("{identifier} is already opened by {limit} sessions")]
    CapacityExceeded { identifier: String, limit: u32 },
}

impl From<LockError> for ResolveError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::CapacityExceeded { identifier, limit } => {
                ResolveError::LimitExceeded { identifier, limit }
            }
        }
    }
}
