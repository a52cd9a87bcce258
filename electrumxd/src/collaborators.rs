//! The external-collaborator seams spec.md names but deliberately leaves
//! unimplemented: the daemon RPC client, the on-disk UTXO database, and the
//! block processor that walks the chain. Only their interfaces belong to
//! this workspace; a concrete deployment supplies real implementations
//! (a JSON-RPC-over-HTTP client against the coin daemon, a UTXO-indexed KV
//! store, and a chain-walking task) and wires them into a [`crate::controller::Controller`].

use async_trait::async_trait;
use electrumx_chain::Hash;

/// What the daemon RPC client fetches over JSON-RPC-over-HTTP (spec.md §6):
/// raw blocks/transactions, the mempool's txid set, and the handful of
/// estimate/broadcast calls the session fabric forwards.
#[async_trait]
pub trait DaemonRpc: Send + Sync {
    async fn height(&self) -> Result<i32, String>;
    async fn mempool_hashes(&self) -> Result<Vec<Hash>, String>;
    async fn raw_transactions(&self, hashes: &[Hash]) -> Result<Vec<Option<Vec<u8>>>, String>;
    /// A block's raw bytes: header concatenated with a varint tx count then
    /// that many serialized transactions (spec.md §6), for the block
    /// processor to hand to `electrumx_chain::coin::read_tx`/`read_header`.
    async fn raw_block(&self, height: i32) -> Result<Vec<u8>, String>;
    async fn broadcast_transaction(&self, raw_tx: &[u8]) -> Result<Hash, String>;
    async fn estimate_fee(&self, blocks: u32, mode: Option<&str>) -> Result<f64, String>;
    async fn relay_fee(&self) -> Result<f64, String>;
    async fn raw_transaction_verbose(&self, tx_hash: Hash) -> Result<serde_json::Value, String>;
    /// The daemon's URL, for `rpc_daemon_url`.
    fn url(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utxo {
    pub height: i32,
    pub tx_pos: u32,
    pub tx_hash: Hash,
    pub value: u64,
}

/// The on-disk UTXO database and its merkle-cache helper (spec.md §1):
/// everything the session fabric needs about mined state that isn't owned
/// by the history index. Synchronous because it's a local, memory-mapped
/// store in every real deployment (LMDB/RocksDB), not a network call.
pub trait UtxoDb: Send + Sync {
    /// Tx count flushed to this DB; the history index truncates to match
    /// this on an unclean-shutdown restart.
    fn flushed_tx_count(&self) -> u64;
    fn height(&self) -> i32;
    fn mined_utxos(&self, hashx: &[u8]) -> Vec<Utxo>;
    fn mined_balance(&self, hashx: &[u8]) -> u64;
    /// Resolves a prevout that isn't sitting in the mempool's own output
    /// set, for the mempool model's deferred-input accounting.
    fn lookup_utxo(&self, prev_tx_hash: Hash, prev_out_idx: u32) -> Option<(Vec<u8>, u64)>;
    fn block_header(&self, height: i32) -> Option<Vec<u8>>;
    fn tx_hashes_at_height(&self, height: i32) -> Option<Vec<Hash>>;
    fn header_merkle_branch(&self, height: i32, cp_height: i32) -> Option<(Vec<Hash>, Hash)>;

    /// The first `tx_num` belonging to `height`, for translating the history
    /// index's `tx_num` windows into the height ranges `blockchain.scripthash.get_history`
    /// is actually asked for.
    fn first_txnum_at_height(&self, height: i32) -> u64;
    /// The confirming tx hash and height for a given `tx_num`, the inverse of
    /// `first_txnum_at_height`'s ordering; `None` past the chain tip.
    fn tx_info_for_txnum(&self, tx_num: u64) -> Option<(Hash, i32)>;
}
