//! Storage error types.
//!
//! All storage operations return `Result<T>` aliased to
//! `Result<T, Error>`, so errors propagate cleanly with `?`.
//!
//! Absence is not an error: `get` returns `Ok(None)` for a missing,
//! erased or expired key, and `put` returns `Ok(false)` when the write is
//! refused. Errors are reserved for damaged data and failed I/O.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record in shard {group}, segment {index}, offset {offset}: {detail}")]
    CorruptRecord {
        group: i32,
        index: i32,
        offset: i32,
        detail: String,
    },

    #[error("storage backend not available in this build: {0}")]
    UnsupportedBackend(String),
}
