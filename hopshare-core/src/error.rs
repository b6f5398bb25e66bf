//! Error types shared across the core.

use crate::identity::ContentId;

/// Routing table lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("no known path to content {0}")]
    NotFound(ContentId),
}

/// A fragment that cannot belong to the transfer it was filed under.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FragmentError {
    #[error("fragment [{offset}, +{len}) exceeds total size {total_size}")]
    OutOfBounds {
        offset: u64,
        len: u64,
        total_size: u64,
    },
    #[error("fragment claims total size {got}, transfer has {expected}")]
    SizeMismatch { expected: u64, got: u64 },
}

/// Why a download could not be started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("content {0} is stored locally")]
    AlreadyLocal(ContentId),
}
