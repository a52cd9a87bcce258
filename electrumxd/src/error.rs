//! The controller-level error taxonomy: everything a sub-crate can raise,
//! gathered into one type so `main` has a single `Result` to report through
//! `color_eyre`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    History(#[from] electrumx_history::HistoryError),

    #[error(transparent)]
    Storage(#[from] electrumx_storage::StorageError),

    #[error("daemon RPC failure: {0}")]
    Daemon(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
