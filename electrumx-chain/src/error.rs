use thiserror::Error;

/// An error encountered while parsing a transaction, block header, or
/// wire-format varint.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unexpected end of buffer: wanted {wanted} bytes at offset {at}, have {have}")]
    UnexpectedEof {
        wanted: usize,
        at: usize,
        have: usize,
    },
    #[error("invalid utf-8 in varbytes field")]
    InvalidUtf8,
    #[error("extra payload cursor mismatch: expected to land at {expected}, landed at {actual}")]
    ExtraPayloadMismatch { expected: usize, actual: usize },
    #[error("unsupported DIP2 special transaction type {0}")]
    UnsupportedSpecialTxType(u16),
}

/// Raised by a [`Deserializer`](crate::tx::Deserializer) when a transaction
/// is structurally well-formed but deliberately unparseable (e.g. a Litecoin
/// MWEB-only transaction). Callers should skip the transaction rather than
/// treat this as corrupt data.
///
/// Mirrors `SkipTxDeserialize` in the upstream Python deserializer.
#[derive(Error, Debug)]
#[error("transaction skipped during deserialization: {0}")]
pub struct SkipTxDeserialize(pub &'static str);

/// Composed failure mode for anything that walks a block or mempool feed.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Skip(#[from] SkipTxDeserialize),
}
