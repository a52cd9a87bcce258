//! Wires every owned subsystem (history index, mempool model, notification
//! coalescer, session fabric, peer table) together with the two external
//! collaborators (`DaemonRpc`, `UtxoDb`) behind the trait objects the rest
//! of the workspace is built against. Mirrors `electrumx.server.controller.Controller`
//! without its duck-typed attribute reach-through: here it's one struct
//! implementing `ServerApi` plus a small adapter implementing `MemPoolApi`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use electrumx_chain::Hash;
use electrumx_history::History;
use electrumx_mempool::{MemPool, MemPoolApi, Prevout};
use electrumx_notify::{NotifySink, Notifications};
use electrumx_session::api::{ServerApi, ServerFeatures, Utxo as SessionUtxo};
use electrumx_session::version;
use tracing::warn;

use crate::coin_config::{self, read_tx_for_mempool};
use crate::collaborators::{DaemonRpc, UtxoDb};
use crate::config::Config;
use crate::peers::PeerManager;
use crate::session_manager::SessionManager;

/// Bridges the daemon/UTXO-DB collaborators into `electrumx_mempool`'s
/// `MemPoolApi`, forwarding `on_mempool` into the shared `Notifications`
/// coalescer. Holds no session-fabric state of its own.
pub struct MempoolAdapter {
    daemon: Arc<dyn DaemonRpc>,
    utxo_db: Arc<dyn UtxoDb>,
    notifications: Arc<tokio::sync::Mutex<Notifications>>,
    cached_height: std::sync::Mutex<Option<i32>>,
}

#[async_trait]
impl MemPoolApi for MempoolAdapter {
    async fn height(&self) -> i32 {
        match self.daemon.height().await {
            Ok(h) => {
                *self.cached_height.lock().unwrap() = Some(h);
                h
            }
            Err(e) => {
                warn!(error = %e, "daemon height query failed");
                self.cached_height.lock().unwrap().unwrap_or(-1)
            }
        }
    }

    fn cached_height(&self) -> Option<i32> {
        *self.cached_height.lock().unwrap()
    }

    fn db_height(&self) -> i32 {
        self.utxo_db.height()
    }

    async fn mempool_hashes(&self) -> Vec<Hash> {
        self.daemon.mempool_hashes().await.unwrap_or_else(|e| {
            warn!(error = %e, "daemon mempool hash fetch failed");
            Vec::new()
        })
    }

    async fn raw_transactions(&self, hashes: &[Hash]) -> Vec<Option<Vec<u8>>> {
        self.daemon
            .raw_transactions(hashes)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "daemon raw transaction fetch failed");
                vec![None; hashes.len()]
            })
    }

    async fn lookup_utxos(&self, prevouts: &[Prevout]) -> Vec<Option<(Vec<u8>, u64)>> {
        prevouts
            .iter()
            .map(|(tx_hash, idx)| self.utxo_db.lookup_utxo(*tx_hash, *idx))
            .collect()
    }

    async fn on_mempool(
        &self,
        touched_hashxs: HashSet<Vec<u8>>,
        touched_outpoints: HashSet<(Hash, u32)>,
        height: i32,
    ) {
        self.notifications
            .lock()
            .await
            .on_mempool(touched_hashxs, touched_outpoints, height)
            .await;
    }
}

/// Forwards coalesced notifications to every live session; the only thing
/// standing between `Notifications` and `SessionManager` since the former
/// has no knowledge of the session fabric.
struct SessionNotifySink {
    sessions: Arc<SessionManager>,
    api: Arc<Controller>,
}

#[async_trait]
impl NotifySink for SessionNotifySink {
    async fn notify(
        &self,
        height: i32,
        touched_hashxs: HashSet<Vec<u8>>,
        touched_outpoints: HashSet<(Hash, u32)>,
    ) {
        self.sessions
            .broadcast(height, &touched_hashxs, &touched_outpoints, self.api.as_ref())
            .await;
        self.sessions.invalidate_status_caches().await;
    }
}

/// The concrete `ServerApi`: everything `electrumx_session::Session` asks
/// of the rest of the server, answered out of the history index, the
/// mempool model, and the two external collaborators.
pub struct Controller {
    pub(crate) config: Config,
    pub(crate) daemon: Arc<dyn DaemonRpc>,
    pub(crate) utxo_db: Arc<dyn UtxoDb>,
    pub(crate) history: std::sync::Mutex<History>,
    pub(crate) mempool: tokio::sync::RwLock<MemPool<MempoolAdapter>>,
    pub(crate) notifications: Arc<tokio::sync::Mutex<Notifications>>,
    pub(crate) sessions: Arc<SessionManager>,
    peers: std::sync::Mutex<PeerManager>,
    pub(crate) height: AtomicI32,
    txs_sent: AtomicU64,
}

impl Controller {
    pub fn new(
        config: Config,
        daemon: Arc<dyn DaemonRpc>,
        utxo_db: Arc<dyn UtxoDb>,
        history: History,
        sessions: Arc<SessionManager>,
        notifications: Arc<tokio::sync::Mutex<Notifications>>,
    ) -> Arc<Self> {
        let mempool_adapter = MempoolAdapter {
            daemon: daemon.clone(),
            utxo_db: utxo_db.clone(),
            notifications: notifications.clone(),
            cached_height: std::sync::Mutex::new(None),
        };
        let mempool = MemPool::new(mempool_adapter, read_tx_for_mempool);

        Arc::new(Controller {
            config,
            daemon,
            utxo_db,
            history: std::sync::Mutex::new(history),
            mempool: tokio::sync::RwLock::new(mempool),
            notifications,
            sessions,
            peers: std::sync::Mutex::new(PeerManager::new()),
            height: AtomicI32::new(-1),
            txs_sent: AtomicU64::new(0),
        })
    }

    /// Installs this controller as the notification coalescer's sink and
    /// starts it at the UTXO DB's on-disk tip, mirroring `Controller._start_servers`'s
    /// ordering (notifications wired before the mempool/session loops run).
    pub async fn start_notifications(self: &Arc<Self>) {
        let start_height = self.utxo_db.height();
        self.height.store(start_height, Ordering::SeqCst);
        let sink = Arc::new(SessionNotifySink {
            sessions: self.sessions.clone(),
            api: self.clone(),
        });
        self.notifications
            .lock()
            .await
            .start(start_height, sink)
            .await;
    }

    /// Drives the mempool's reconciliation loop one iteration at a time,
    /// taking the write lock only for the duration of each pass so
    /// `ServerApi`'s mempool-derived query methods can still read it
    /// concurrently between iterations.
    pub async fn run_mempool_loop(self: Arc<Self>) -> ! {
        let mut last_histogram = tokio::time::Instant::now();
        let mut last_log = tokio::time::Instant::now();
        loop {
            let interval = self.mempool.read().await.refresh_interval();
            {
                let mut mempool = self.mempool.write().await;
                mempool.run_once(&mut last_histogram, &mut last_log).await;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Idle-session eviction and cost-group garbage collection, polled on a
    /// fixed cadence independent of the mempool/block-processor loops.
    pub async fn run_maintenance_loop(self: Arc<Self>) -> ! {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            self.sessions.evict_idle().await;
            self.sessions.recalc_groups();
        }
    }

    pub fn record_broadcast(&self) {
        self.txs_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn txs_sent(&self) -> u64 {
        self.txs_sent.load(Ordering::Relaxed)
    }

    /// Synchronous bridge for `ServerApi`'s mempool-derived query methods:
    /// `electrumx_mempool::MemPool`'s query surface takes `&self` but lives
    /// behind a `tokio::sync::RwLock`, so a blocking read here is the
    /// sanctioned way to reach it from a plain (non-`async fn`) trait method.
    fn with_mempool<R>(&self, f: impl FnOnce(&MemPool<MempoolAdapter>) -> R) -> R {
        tokio::task::block_in_place(|| f(&self.mempool.blocking_read()))
    }
}

#[async_trait]
impl ServerApi for Controller {
    fn features(&self) -> ServerFeatures {
        ServerFeatures {
            server_version: "ElectrumX 1.16.0".to_string(),
            protocol_min: version::MIN_SUPPORTED,
            protocol_max: version::MAX_SUPPORTED,
            genesis_hash: coin_config::GENESIS_HASH,
            hash_function: "sha256",
            services: Vec::new(),
            pruning: None,
        }
    }

    fn donation_address(&self) -> String {
        self.config.donation_address.clone()
    }

    fn banner(&self) -> String {
        self.config
            .banner
            .clone()
            .unwrap_or_else(|| "Welcome to electrumxd".to_string())
    }

    fn server_version_string(&self) -> String {
        self.features().server_version
    }

    fn height(&self) -> i32 {
        self.height.load(Ordering::SeqCst)
    }

    fn block_header(&self, height: i32) -> Option<Vec<u8>> {
        self.utxo_db.block_header(height)
    }

    fn header_merkle_branch(&self, height: i32, cp_height: i32) -> Option<(Vec<Hash>, Hash)> {
        self.utxo_db.header_merkle_branch(height, cp_height)
    }

    fn tx_hashes_at_height(&self, height: i32) -> Option<Vec<Hash>> {
        self.utxo_db.tx_hashes_at_height(height)
    }

    fn mined_utxos(&self, hashx: &[u8]) -> Vec<SessionUtxo> {
        self.utxo_db
            .mined_utxos(hashx)
            .into_iter()
            .map(|u| SessionUtxo {
                height: u.height,
                tx_pos: u.tx_pos,
                tx_hash: u.tx_hash,
                value: u.value,
            })
            .collect()
    }

    fn mined_balance(&self, hashx: &[u8]) -> u64 {
        self.utxo_db.mined_balance(hashx)
    }

    fn confirmed_history(
        &self,
        hashx: &[u8],
        from_height: i32,
        to_height: Option<i32>,
    ) -> Vec<(Hash, i32)> {
        let txnum_min = Some(self.utxo_db.first_txnum_at_height(from_height));
        let txnum_max = to_height.map(|h| self.utxo_db.first_txnum_at_height(h));
        let history = self.history.lock().unwrap();
        history
            .get_txnums(hashx, None, txnum_min, txnum_max)
            .into_iter()
            .filter_map(|tx_num| self.utxo_db.tx_info_for_txnum(tx_num))
            .collect()
    }

    fn intermediate_status(&self, hashx: &[u8], txnum_max: Option<u64>) -> (u64, [u8; 32]) {
        self.history
            .lock()
            .unwrap()
            .get_intermediate_statushash_for_hashx(hashx, txnum_max)
    }

    fn reorg_limit(&self) -> u32 {
        self.config.reorg_limit
    }

    async fn estimatefee(&self, blocks: u32, mode: Option<&str>) -> Result<f64, String> {
        self.daemon.estimate_fee(blocks, mode).await
    }

    async fn relayfee(&self) -> Result<f64, String> {
        self.daemon.relay_fee().await
    }

    async fn broadcast_transaction(&self, raw_tx: Vec<u8>) -> Result<Hash, String> {
        let hash = self.daemon.broadcast_transaction(&raw_tx).await?;
        self.record_broadcast();
        Ok(hash)
    }

    async fn raw_transaction(
        &self,
        tx_hash: Hash,
        verbose: bool,
    ) -> Result<serde_json::Value, String> {
        if verbose {
            self.daemon.raw_transaction_verbose(tx_hash).await
        } else {
            let raw = self
                .daemon
                .raw_transactions(&[tx_hash])
                .await?
                .into_iter()
                .next()
                .flatten()
                .ok_or_else(|| "missing transaction".to_string())?;
            Ok(serde_json::Value::String(hex::encode(raw)))
        }
    }

    fn add_peer(&self, features: serde_json::Value) -> bool {
        self.peers.lock().unwrap().add(features)
    }

    fn peers_subscribe(&self) -> Vec<serde_json::Value> {
        self.peers.lock().unwrap().list()
    }

    fn record_tx_sent(&self) {
        self.record_broadcast();
    }

    fn mempool_balance_delta(&self, hashx: &[u8]) -> i64 {
        self.with_mempool(|mp| mp.balance_delta(hashx))
    }

    fn mempool_unordered_utxos(&self, hashx: &[u8]) -> Vec<electrumx_mempool::Utxo> {
        self.with_mempool(|mp| mp.unordered_utxos(hashx))
    }

    fn mempool_transaction_summaries(&self, hashx: &[u8]) -> Vec<electrumx_mempool::MemPoolTxSummary> {
        self.with_mempool(|mp| mp.transaction_summaries(hashx))
    }

    fn mempool_potential_spends(&self, hashx: &[u8]) -> HashSet<(Hash, u32)> {
        self.with_mempool(|mp| mp.potential_spends(hashx))
    }

    fn mempool_fee_histogram(&self) -> Vec<(f64, u64)> {
        self.with_mempool(|mp| mp.compact_fee_histogram().to_vec())
    }

    fn mempool_spender_for_txo(&self, prev_tx_hash: Hash, txout_idx: u32) -> Option<Hash> {
        self.with_mempool(|mp| mp.spender_for_txo(prev_tx_hash, txout_idx))
    }

    fn mempool_txo_exists(&self, tx_hash: Hash, txout_idx: u32) -> bool {
        self.with_mempool(|mp| mp.txo_exists_in_mempool(&tx_hash, txout_idx))
    }

    fn confirmed_spender(&self, tx_hash: Hash, txout_idx: u32) -> Option<(Hash, i32)> {
        let history = self.history.lock().unwrap();
        let prev_txnum = history.get_txnum_for_txhash(&tx_hash)?;
        let spender_txnum = history.get_spender_txnum_for_txo(prev_txnum, txout_idx)?;
        drop(history);
        self.utxo_db.tx_info_for_txnum(spender_txnum)
    }

    fn confirmed_txo_exists(&self, tx_hash: Hash, _txout_idx: u32) -> bool {
        self.history
            .lock()
            .unwrap()
            .get_txnum_for_txhash(&tx_hash)
            .is_some()
    }

    fn confirmed_height_of(&self, tx_hash: Hash) -> Option<i32> {
        let txnum = self.history.lock().unwrap().get_txnum_for_txhash(&tx_hash)?;
        self.utxo_db.tx_info_for_txnum(txnum).map(|(_, height)| height)
    }

    fn drop_client_pattern(&self) -> Option<&str> {
        self.config.drop_client.as_deref()
    }
}
