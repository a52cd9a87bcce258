//! The value types a [`crate::MemPool`] keeps per unconfirmed transaction.

use electrumx_chain::Hash;

/// The coin's hashX script identifier; see
/// `electrumx_chain::coin::hashx_from_script`.
pub type HashX = Vec<u8>;

/// `(prev_tx_hash, prev_output_index)`.
pub type Prevout = (Hash, u32);

/// One transaction sitting in the daemon's mempool, mirroring
/// `electrumx.server.mempool.MemPoolTx`.
#[derive(Debug, Clone)]
pub struct MemPoolTx {
    /// Non-generation prevouts this tx spends.
    pub prevouts: Vec<Prevout>,
    /// `(hashX, value)` for each prevout, once resolved. `None` until the
    /// tx has been accepted.
    pub in_pairs: Option<Vec<(HashX, u64)>>,
    /// `(hashX, value)` for each output.
    pub out_pairs: Vec<(HashX, u64)>,
    pub fee: u64,
    /// Serialized size in bytes, used as the fee-rate denominator.
    pub size: u32,
}

/// Returned by [`crate::MemPool::transaction_summaries`].
#[derive(Debug, Clone, Copy)]
pub struct MemPoolTxSummary {
    pub hash: Hash,
    pub fee: u64,
    pub has_unconfirmed_inputs: bool,
}

/// A mempool-sourced UTXO: `height` is `-1` to flag it as unconfirmed, the
/// sentinel the mempool model and the session layer both key off of.
#[derive(Debug, Clone, Copy)]
pub struct Utxo {
    pub height: i32,
    pub tx_pos: u32,
    pub tx_hash: Hash,
    pub value: u64,
}
