use thiserror::Error;

/// Raised by [`crate::MemPool::refresh_once`] when the daemon's mempool
/// snapshot was taken at a height the UTXO DB hasn't flushed to yet.
/// Callers should retry after the DB catches up; it is not a hard failure.
#[derive(Error, Debug)]
#[error("mempool height does not match the flushed UTXO DB height")]
pub struct DbSyncError;
