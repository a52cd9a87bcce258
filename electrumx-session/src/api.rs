//! The capability record the session fabric is built against: everything a
//! handler needs from the daemon, the chain tip, and the external UTXO/block
//! store, gathered into one `async_trait` object rather than the upstream's
//! duck-typed `SessionManager`/`BlockProcessor` attribute reach-through
//! (a redesign away from duck-typed attribute registration). `electrumxd`'s controller is the concrete
//! implementation; tests here use a stub.

use async_trait::async_trait;
use electrumx_chain::Hash;

use crate::dash::DashSessionExt;

#[derive(Debug, Clone)]
pub struct ServerFeatures {
    pub server_version: String,
    pub protocol_min: (u32, u32),
    pub protocol_max: (u32, u32),
    pub genesis_hash: Hash,
    pub hash_function: &'static str,
    pub services: Vec<String>,
    pub pruning: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utxo {
    pub height: i32,
    pub tx_pos: u32,
    pub tx_hash: Hash,
    pub value: u64,
}

/// Everything [`crate::session::Session`] needs from the rest of the server.
/// Daemon RPC failures surface as `Err` and are mapped to JSON-RPC error
/// code 2 (`DaemonError`) by the dispatcher.
#[async_trait]
pub trait ServerApi: Send + Sync {
    fn features(&self) -> ServerFeatures;
    fn donation_address(&self) -> String;
    fn banner(&self) -> String;
    fn server_version_string(&self) -> String;

    /// Current chain tip height, as last observed by the block processor.
    fn height(&self) -> i32;

    fn block_header(&self, height: i32) -> Option<Vec<u8>>;
    /// A merkle branch from `height`'s header hash up to the header at
    /// `cp_height`, for clients pinning a checkpoint instead of validating
    /// every header individually.
    fn header_merkle_branch(&self, height: i32, cp_height: i32) -> Option<(Vec<Hash>, Hash)>;

    /// The ordered txids of the block at `height`, used for
    /// `get_merkle`/`id_from_pos`. `None` if the height doesn't (yet) exist.
    fn tx_hashes_at_height(&self, height: i32) -> Option<Vec<Hash>>;

    /// Mined UTXOs paying `hashx`, from the external UTXO DB.
    fn mined_utxos(&self, hashx: &[u8]) -> Vec<Utxo>;
    /// Sum of mined UTXO values paying `hashx`.
    fn mined_balance(&self, hashx: &[u8]) -> u64;

    /// `history::History::get_txnums` plus the block height each belongs to
    /// and the corresponding tx hash, windowed and capped exactly as
    /// `get_txnums` is.
    fn confirmed_history(
        &self,
        hashx: &[u8],
        from_height: i32,
        to_height: Option<i32>,
    ) -> Vec<(Hash, i32)>;

    fn intermediate_status(&self, hashx: &[u8], txnum_max: Option<u64>) -> (u64, [u8; 32]);
    fn reorg_limit(&self) -> u32;

    async fn estimatefee(&self, blocks: u32, mode: Option<&str>) -> Result<f64, String>;
    async fn relayfee(&self) -> Result<f64, String>;
    async fn broadcast_transaction(&self, raw_tx: Vec<u8>) -> Result<Hash, String>;
    async fn raw_transaction(&self, tx_hash: Hash, verbose: bool) -> Result<serde_json::Value, String>;

    fn add_peer(&self, features: serde_json::Value) -> bool;
    fn peers_subscribe(&self) -> Vec<serde_json::Value>;

    fn record_tx_sent(&self);

    //
    // Mempool-derived facts (electrumx-mempool's public surface, the
    // supplemented balance/listunspent/history helpers).
    //
    fn mempool_balance_delta(&self, hashx: &[u8]) -> i64;
    fn mempool_unordered_utxos(&self, hashx: &[u8]) -> Vec<electrumx_mempool::Utxo>;
    fn mempool_transaction_summaries(&self, hashx: &[u8]) -> Vec<electrumx_mempool::MemPoolTxSummary>;
    fn mempool_potential_spends(&self, hashx: &[u8]) -> std::collections::HashSet<(Hash, u32)>;
    fn mempool_fee_histogram(&self) -> Vec<(f64, u64)>;
    fn mempool_spender_for_txo(&self, prev_tx_hash: Hash, txout_idx: u32) -> Option<Hash>;
    fn mempool_txo_exists(&self, tx_hash: Hash, txout_idx: u32) -> bool;

    /// The confirmed spender (tx hash, height) of `(tx_hash, txout_idx)`, if
    /// any, via the history index's `s`-prefix spender map.
    fn confirmed_spender(&self, tx_hash: Hash, txout_idx: u32) -> Option<(Hash, i32)>;
    /// Whether `(tx_hash, txout_idx)` was ever created by a mined tx (used
    /// to tell "never existed" apart from "exists, unspent" for outpoint
    /// subscriptions).
    fn confirmed_txo_exists(&self, tx_hash: Hash, txout_idx: u32) -> bool;
    /// The confirmation height of `tx_hash`, if it's been mined.
    fn confirmed_height_of(&self, tx_hash: Hash) -> Option<i32>;

    /// `Some` on a DASH/SmartCash-family controller, to expose the
    /// `masternode.*` passthrough methods; `None` everywhere else.
    fn as_dash(&self) -> Option<&dyn DashSessionExt> {
        None
    }

    /// The `drop_client` config option: a regex matched against the client
    /// name sent with `server.version`; a match refuses the handshake.
    fn drop_client_pattern(&self) -> Option<&str> {
        None
    }
}
