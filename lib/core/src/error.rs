use crate::ItemId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("Cannot build an index with no items")]
    EmptyIndex,

    #[error("Index is built and frozen; call unbuild() before adding items")]
    IndexFrozen,

    #[error("Index has not been built")]
    NotBuilt,

    #[error("A build is already in progress")]
    BuildInProgress,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corrupted index data: {0}")]
    Corrupted(String),

    #[error("Background worker error: {0}")]
    BackgroundWorker(String),
}
