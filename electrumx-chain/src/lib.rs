//! Coin-family wire formats: transaction and block-header deserialization
//! for the Bitcoin-derived coins this workspace supports, plus the hash
//! functions and cursor/varint primitives they're built from.
//!
//! This crate has no knowledge of a running chain, a mempool, or a network
//! connection — it only turns bytes into typed values and back, the lowest
//! layer everything else in the workspace builds on.

pub mod bytes;
pub mod coin;
pub mod error;
pub mod hash;
pub mod tx;

pub use coin::{hashx_from_script, read_header, read_tx, Coin, DeserializerKind, HeaderKind};
pub use error::{ChainError, ParseError, SkipTxDeserialize};
pub use hash::Hash;
pub use tx::{Dip2Payload, Input, Output, Tx, TxExtra};
