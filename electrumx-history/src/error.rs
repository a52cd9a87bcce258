use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error(transparent)]
    Storage(#[from] electrumx_storage::StorageError),

    #[error("history DB version {0} is not supported by this build")]
    UnsupportedDbVersion(u32),

    #[error("corrupt `\\0state` entry in history DB: {0}")]
    BadState(String),

    #[error("history invariant violated: {0}")]
    InvariantViolation(&'static str),

    #[error("backup() called with unflushed writes still pending")]
    UnflushedPending,
}
