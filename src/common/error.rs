use thiserror::Error;

use super::types::PageId;

/// Storage-core error types
#[derive(Error, Debug)]
pub enum TaprootError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer pool exhausted: all frames are pinned")]
    PoolExhausted,

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("page {0} is still pinned")]
    PagePinned(PageId),

    #[error("disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("iterator advanced past the end of the index")]
    IteratorExhausted,
}

pub type Result<T> = std::result::Result<T, TaprootError>;
