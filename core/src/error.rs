use thiserror::Error;

use crate::DocId;

pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors raised while building, loading or querying an index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// A document id was added to the builder twice.
    #[error("document {id} was already added to this index")]
    DuplicateDocument { id: DocId },

    /// The builder has already produced its frozen index.
    #[error("index builder was already finalized")]
    AlreadyFinalized,

    /// No finalized index has been published yet.
    #[error("index is not ready for queries")]
    IndexNotReady,

    /// A persisted index blob failed to decode or validate.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// A ranking constant is outside the range its formula is defined for.
    #[error("invalid ranking config: {0}")]
    InvalidConfig(String),

    #[error("unknown ranking model {0:?}")]
    UnknownModel(String),
}
