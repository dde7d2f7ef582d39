//! Server error types.

use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame size {0} outside allowed bounds")]
    FrameSize(i64),

    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("bad allow-list entry: {0}")]
    AllowList(String),

    #[error("storage error: {0}")]
    Storage(#[from] riorita_storage::Error),
}
