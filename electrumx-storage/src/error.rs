use thiserror::Error;

/// A failure at the ordered-KV layer. This is fatal: callers
/// are expected to propagate it up to an orderly shutdown rather than retry.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("key/value store backend error: {0}")]
    Backend(#[from] rocksdb::Error),

    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rocksdb::Error,
    },
}
