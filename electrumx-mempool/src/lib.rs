//! The daemon mempool model: a reconciling view of the
//! daemon's unconfirmed transaction set, kept just accurate enough to
//! answer the handful of queries the session fabric needs (balance deltas,
//! fee histograms, unconfirmed UTXOs) without re-deriving them from the
//! daemon on every request.
//!
//! Ported from `electrumx.server.mempool.MemPool`. The daemon-facing calls
//! are abstracted behind [`MemPoolApi`] exactly as the original abstracts
//! them behind `MemPoolAPI`, an `ABC` the controller fills in with the
//! actual JSON-RPC daemon client — here expressed as an `async_trait`
//! object-safe trait, the same shape `electrumx_chain`'s sibling pack repo
//! `nervana21-bitcoin-rpc-codegen` uses for its own daemon-client trait.

mod error;
mod tx;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use electrumx_chain::Hash;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub use crate::error::DbSyncError;
pub use crate::tx::{HashX, MemPoolTx, MemPoolTxSummary, Prevout, Utxo};

/// Everything the mempool needs to ask of the daemon and the UTXO DB, and
/// the one thing it needs to tell the rest of the server (`on_mempool`).
#[async_trait]
pub trait MemPoolApi: Send + Sync {
    /// Queries the daemon for its current height.
    async fn height(&self) -> i32;
    /// The height of the daemon the last time it was queried, for any reason.
    fn cached_height(&self) -> Option<i32>;
    /// The height flushed to the on-disk UTXO DB.
    fn db_height(&self) -> i32;
    /// The daemon's current mempool, as a list of txids.
    async fn mempool_hashes(&self) -> Vec<Hash>;
    /// Serialized raw transactions for the given hashes; `None` for any the
    /// daemon no longer has (evicted, or since confirmed).
    async fn raw_transactions(&self, hashes: &[Hash]) -> Vec<Option<Vec<u8>>>;
    /// `(hashX, value)` for each prevout that is still unspent in the UTXO
    /// DB, `None` for any that are spent or unknown.
    async fn lookup_utxos(&self, prevouts: &[Prevout]) -> Vec<Option<(HashX, u64)>>;
    /// Called once per successful refresh with everything that changed.
    async fn on_mempool(
        &self,
        touched_hashxs: HashSet<HashX>,
        touched_outpoints: HashSet<(Hash, u32)>,
        height: i32,
    );
}

/// The daemon's mempool, reconciled against an `api` on each refresh.
///
/// `hashX_from_script: fn(&[u8]) -> HashX` is injected rather than looked up
/// through a `Coin` associated const, since the mempool crate has no
/// compile-time knowledge of which coin it's serving.
pub struct MemPool<A: MemPoolApi> {
    api: A,
    read_tx: fn(&[u8]) -> Option<(Vec<(Hash, u32)>, Vec<(HashX, u64)>, u32)>,

    txs: HashMap<Hash, MemPoolTx>,
    hashxs: HashMap<HashX, HashSet<Hash>>,
    txo_to_spender: HashMap<Prevout, Hash>,
    cached_compact_histogram: Vec<(f64, u64)>,

    refresh_interval: Duration,
    log_status_interval: Duration,
    lock: Mutex<()>,
}

impl<A: MemPoolApi> MemPool<A> {
    /// `read_tx` takes raw transaction bytes and returns
    /// `(prevouts, out_pairs, size)` for non-generation inputs, or `None`
    /// if the transaction doesn't parse; it composes `electrumx_chain`'s
    /// `read_tx` with the coin's `hashx_from_script` policy so this crate
    /// doesn't need a `DeserializerKind` of its own.
    pub fn new(
        api: A,
        read_tx: fn(&[u8]) -> Option<(Vec<(Hash, u32)>, Vec<(HashX, u64)>, u32)>,
    ) -> Self {
        MemPool {
            api,
            read_tx,
            txs: HashMap::new(),
            hashxs: HashMap::new(),
            txo_to_spender: HashMap::new(),
            cached_compact_histogram: Vec::new(),
            refresh_interval: Duration::from_secs_f64(5.0),
            log_status_interval: Duration::from_secs_f64(60.0),
            lock: Mutex::new(()),
        }
    }

    pub fn with_intervals(mut self, refresh: Duration, log_status: Duration) -> Self {
        self.refresh_interval = refresh;
        self.log_status_interval = log_status;
        self
    }

    /// Runs the refresh loop forever: reconcile against the daemon, publish
    /// what changed, recompute the fee histogram periodically, and log
    /// status on `log_status_interval`. Mirrors `keep_synchronized`'s
    /// three concurrent subtasks, run here as one cooperative loop rather
    /// than three spawned tasks since the original's `TaskGroup` only
    /// exists to let them proceed at independent cadences, which a single
    /// loop with its own timers achieves without extra concurrency.
    pub async fn keep_synchronized(&mut self) -> ! {
        info!("beginning processing of daemon mempool. This can take some time...");
        let mut touched_hashxs = HashSet::new();
        let mut touched_outpoints = HashSet::new();
        let mut last_histogram = tokio::time::Instant::now();
        let mut last_log = tokio::time::Instant::now();

        loop {
            match self
                .refresh_once(&mut touched_hashxs, &mut touched_outpoints)
                .await
            {
                Ok(height) => {
                    self.api
                        .on_mempool(
                            std::mem::take(&mut touched_hashxs),
                            std::mem::take(&mut touched_outpoints),
                            height,
                        )
                        .await;
                }
                Err(DbSyncError) => {
                    debug!("waiting for DB to sync");
                }
            }

            if last_histogram.elapsed() >= Duration::from_secs(120) {
                self.refresh_histogram().await;
                last_histogram = tokio::time::Instant::now();
            }
            if last_log.elapsed() >= self.log_status_interval {
                self.log_status();
                last_log = tokio::time::Instant::now();
            }
            tokio::time::sleep(self.refresh_interval).await;
        }
    }

    /// One `refresh_once` pass plus its publish, the histogram recompute and
    /// status log folded in on their own cadence. Lets a caller that needs
    /// concurrent read access to the mempool (the session fabric's balance/
    /// listunspent handlers) run the reconciliation loop itself with the
    /// lock held only for the duration of one iteration, rather than for
    /// [`MemPool::keep_synchronized`]'s entire unbounded lifetime.
    pub async fn run_once(
        &mut self,
        last_histogram: &mut tokio::time::Instant,
        last_log: &mut tokio::time::Instant,
    ) {
        let mut touched_hashxs = HashSet::new();
        let mut touched_outpoints = HashSet::new();

        match self
            .refresh_once(&mut touched_hashxs, &mut touched_outpoints)
            .await
        {
            Ok(height) => {
                self.api
                    .on_mempool(touched_hashxs, touched_outpoints, height)
                    .await;
            }
            Err(DbSyncError) => {
                debug!("waiting for DB to sync");
            }
        }

        if last_histogram.elapsed() >= Duration::from_secs(120) {
            self.refresh_histogram().await;
            *last_histogram = tokio::time::Instant::now();
        }
        if last_log.elapsed() >= self.log_status_interval {
            self.log_status();
            *last_log = tokio::time::Instant::now();
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    fn log_status(&self) {
        let mempool_mb: f64 = self.txs.values().map(|t| t.size as f64).sum::<f64>() / 1_000_000.0;
        info!(
            txs = self.txs.len(),
            mb = mempool_mb,
            addresses = self.hashxs.len(),
            spends = self.txo_to_spender.len(),
            "mempool status"
        );
    }

    async fn refresh_histogram(&mut self) {
        let _guard = self.lock.lock().await;
        self.update_histogram(100_000);
    }

    fn update_histogram(&mut self, bin_size: u64) {
        let mut histogram: HashMap<i64, u64> = HashMap::new();
        for tx in self.txs.values() {
            if tx.size == 0 {
                continue;
            }
            let fee_rate = tx.fee as f64 / tx.size as f64;
            // 0.1 sat/byte resolution, rounded down so a tx always lands in
            // the bucket its fee rate actually qualifies for.
            let bucketed = (fee_rate * 10.0).floor() as i64;
            *histogram.entry(bucketed).or_insert(0) += tx.size as u64;
        }
        let compact = Self::compress_histogram(&histogram, bin_size);
        info!(?compact, "compact fee histogram");
        self.cached_compact_histogram = compact;
    }

    /// Compacts a `feerate -> total size` histogram into the variable-width
    /// buckets `mempool.get_fee_histogram` returns.
    fn compress_histogram(histogram: &HashMap<i64, u64>, bin_size: u64) -> Vec<(f64, u64)> {
        assert!(bin_size > 0);
        let mut entries: Vec<(i64, u64)> = histogram.iter().map(|(&k, &v)| (k, v)).collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        let mut compact = Vec::new();
        let mut cum_size: u64 = 0;
        let mut bin_size = bin_size as f64;
        let mut prev_fee_rate: Option<i64> = None;

        for (bucketed_rate, size) in entries {
            if size as f64 > 2.0 * bin_size && prev_fee_rate.is_some() && cum_size > 0 {
                compact.push((prev_fee_rate.unwrap() as f64 / 10.0, cum_size));
                cum_size = 0;
                bin_size *= 1.1;
            }
            cum_size += size;
            if cum_size as f64 > bin_size {
                compact.push((bucketed_rate as f64 / 10.0, cum_size));
                cum_size = 0;
                bin_size *= 1.1;
            }
            prev_fee_rate = Some(bucketed_rate);
        }
        compact
    }

    /// One refresh pass (steps 1-6), minus the final publish
    /// (the caller does that once it has the height this pass observed).
    async fn refresh_once(
        &mut self,
        touched_hashxs: &mut HashSet<HashX>,
        touched_outpoints: &mut HashSet<(Hash, u32)>,
    ) -> Result<i32, DbSyncError> {
        let height;
        let hashes: HashSet<Hash>;
        loop {
            let observed_height = self.api.cached_height();
            let fetched = self.api.mempool_hashes().await;
            if observed_height == Some(self.api.height().await) {
                height = observed_height.unwrap_or(0);
                hashes = fetched.into_iter().collect();
                break;
            }
        }

        let _guard = self.lock.lock().await;
        self.process_mempool(hashes, touched_hashxs, touched_outpoints, height)
            .await?;
        Ok(height)
    }

    async fn process_mempool(
        &mut self,
        all_hashes: HashSet<Hash>,
        touched_hashxs: &mut HashSet<HashX>,
        touched_outpoints: &mut HashSet<(Hash, u32)>,
        mempool_height: i32,
    ) -> Result<(), DbSyncError> {
        if mempool_height != self.api.db_height() {
            return Err(DbSyncError);
        }

        let removed: Vec<Hash> = self
            .txs
            .keys()
            .filter(|h| !all_hashes.contains(h))
            .copied()
            .collect();
        for tx_hash in removed {
            let tx = self.txs.remove(&tx_hash).expect("just checked present");
            let mut tx_hashxs: HashSet<HashX> = tx
                .in_pairs
                .iter()
                .flatten()
                .map(|(h, _)| h.clone())
                .collect();
            tx_hashxs.extend(tx.out_pairs.iter().map(|(h, _)| h.clone()));
            for hashx in &tx_hashxs {
                if let Some(set) = self.hashxs.get_mut(hashx) {
                    set.remove(&tx_hash);
                    if set.is_empty() {
                        self.hashxs.remove(hashx);
                    }
                }
            }
            touched_hashxs.extend(tx_hashxs);
            for prevout in &tx.prevouts {
                self.txo_to_spender.remove(prevout);
                touched_outpoints.insert(*prevout);
            }
            for (idx, _) in tx.out_pairs.iter().enumerate() {
                touched_outpoints.insert((tx_hash, idx as u32));
            }
        }

        let new_hashes: Vec<Hash> = all_hashes
            .iter()
            .filter(|h| !self.txs.contains_key(h))
            .copied()
            .collect();
        if !new_hashes.is_empty() {
            let mut tx_map = HashMap::new();
            let mut utxo_map = HashMap::new();
            for chunk in new_hashes.chunks(200) {
                let (deferred, unspent) = self
                    .fetch_and_accept(chunk, &all_hashes, touched_hashxs, touched_outpoints)
                    .await;
                tx_map.extend(deferred);
                utxo_map.extend(unspent);
            }
            if mempool_height != self.api.db_height() {
                return Err(DbSyncError);
            }

            let mut prior_count = 0;
            while !tx_map.is_empty() && tx_map.len() != prior_count {
                prior_count = tx_map.len();
                let (deferred, unspent) =
                    Self::accept_transactions(
                        tx_map,
                        utxo_map,
                        &mut self.hashxs,
                        &mut self.txo_to_spender,
                        &mut self.txs,
                        touched_hashxs,
                        touched_outpoints,
                    );
                tx_map = deferred;
                utxo_map = unspent;
            }
            if !tx_map.is_empty() {
                error!(dropped = tx_map.len(), "txs dropped: inputs never resolved");
            }
        }
        Ok(())
    }

    async fn fetch_and_accept(
        &mut self,
        hashes: &[Hash],
        all_hashes: &HashSet<Hash>,
        touched_hashxs: &mut HashSet<HashX>,
        touched_outpoints: &mut HashSet<(Hash, u32)>,
    ) -> (HashMap<Hash, MemPoolTx>, HashMap<Prevout, (HashX, u64)>) {
        let raw_txs = self.api.raw_transactions(hashes).await;

        let mut tx_map = HashMap::new();
        for (&hash, raw_tx) in hashes.iter().zip(raw_txs) {
            let raw_tx = match raw_tx {
                Some(raw_tx) => raw_tx,
                None => continue,
            };
            if let Some((prevouts, out_pairs, size)) = (self.read_tx)(&raw_tx) {
                tx_map.insert(
                    hash,
                    MemPoolTx {
                        prevouts,
                        in_pairs: None,
                        out_pairs,
                        fee: 0,
                        size,
                    },
                );
            }
        }

        let prevouts: Vec<Prevout> = tx_map
            .values()
            .flat_map(|tx| tx.prevouts.iter().copied())
            .filter(|(prev_hash, _)| !all_hashes.contains(prev_hash))
            .collect();
        let utxos = self.api.lookup_utxos(&prevouts).await;
        let mut utxo_map = HashMap::new();
        for (prevout, utxo) in prevouts.into_iter().zip(utxos) {
            if let Some(utxo) = utxo {
                utxo_map.insert(prevout, utxo);
            }
        }

        Self::accept_transactions(
            tx_map,
            utxo_map,
            &mut self.hashxs,
            &mut self.txo_to_spender,
            &mut self.txs,
            touched_hashxs,
            touched_outpoints,
        )
    }

    /// Accepts as many of `tx_map`'s transactions as have every prevout
    /// resolvable from `utxo_map` or an already-accepted tx's `out_pairs`.
    /// Returns the still-unresolved transactions and the still-unspent
    /// UTXOs, for the caller to retry or drop.
    fn accept_transactions(
        tx_map: HashMap<Hash, MemPoolTx>,
        utxo_map: HashMap<Prevout, (HashX, u64)>,
        hashxs: &mut HashMap<HashX, HashSet<Hash>>,
        txo_to_spender: &mut HashMap<Prevout, Hash>,
        txs: &mut HashMap<Hash, MemPoolTx>,
        touched_hashxs: &mut HashSet<HashX>,
        touched_outpoints: &mut HashSet<(Hash, u32)>,
    ) -> (HashMap<Hash, MemPoolTx>, HashMap<Prevout, (HashX, u64)>) {
        let mut deferred = HashMap::new();
        let mut unspent: HashSet<Prevout> = utxo_map.keys().copied().collect();

        for (tx_hash, mut tx) in tx_map {
            let mut in_pairs = Vec::with_capacity(tx.prevouts.len());
            let mut resolvable = true;
            for &prevout in &tx.prevouts {
                let pair = utxo_map.get(&prevout).cloned().or_else(|| {
                    let (prev_hash, prev_idx) = prevout;
                    txs.get(&prev_hash)
                        .and_then(|prev_tx| prev_tx.out_pairs.get(prev_idx as usize).cloned())
                });
                match pair {
                    Some(pair) => in_pairs.push(pair),
                    None => {
                        resolvable = false;
                        break;
                    }
                }
            }
            if !resolvable {
                deferred.insert(tx_hash, tx);
                continue;
            }

            for prevout in &tx.prevouts {
                unspent.remove(prevout);
            }

            let in_total: u64 = in_pairs.iter().map(|(_, v)| v).sum();
            let out_total: u64 = tx.out_pairs.iter().map(|(_, v)| v).sum();
            tx.fee = in_total.saturating_sub(out_total);

            for (hashx, _) in in_pairs.iter().chain(tx.out_pairs.iter()) {
                touched_hashxs.insert(hashx.clone());
                hashxs.entry(hashx.clone()).or_default().insert(tx_hash);
            }
            for &prevout in &tx.prevouts {
                txo_to_spender.insert(prevout, tx_hash);
                touched_outpoints.insert(prevout);
            }
            for (idx, _) in tx.out_pairs.iter().enumerate() {
                touched_outpoints.insert((tx_hash, idx as u32));
            }

            tx.in_pairs = Some(in_pairs);
            txs.insert(tx_hash, tx);
        }

        let unspent_map = unspent
            .into_iter()
            .filter_map(|prevout| utxo_map.get(&prevout).cloned().map(|v| (prevout, v)))
            .collect();
        (deferred, unspent_map)
    }

    //
    // External interface (the mempool's query surface, called from the
    // session fabric)
    //

    /// The net unconfirmed balance change for `hashX`. Can be negative.
    pub fn balance_delta(&self, hashx: &[u8]) -> i64 {
        let mut value: i64 = 0;
        if let Some(hashes) = self.hashxs.get(hashx) {
            for hash in hashes {
                let tx = &self.txs[hash];
                if let Some(in_pairs) = &tx.in_pairs {
                    for (h, v) in in_pairs {
                        if h == hashx {
                            value -= *v as i64;
                        }
                    }
                }
                for (h, v) in &tx.out_pairs {
                    if h == hashx {
                        value += *v as i64;
                    }
                }
            }
        }
        value
    }

    pub fn compact_fee_histogram(&self) -> &[(f64, u64)] {
        &self.cached_compact_histogram
    }

    /// Prevouts from mempool transactions touching `hashx`; some, none, or
    /// all may actually be spends of `hashx` itself, but every real spend
    /// of it (confirmed or not) is included.
    pub fn potential_spends(&self, hashx: &[u8]) -> HashSet<Prevout> {
        let mut result = HashSet::new();
        if let Some(hashes) = self.hashxs.get(hashx) {
            for hash in hashes {
                result.extend(self.txs[hash].prevouts.iter().copied());
            }
        }
        result
    }

    pub fn transaction_summaries(&self, hashx: &[u8]) -> Vec<MemPoolTxSummary> {
        let mut result = Vec::new();
        if let Some(hashes) = self.hashxs.get(hashx) {
            for &hash in hashes {
                let tx = &self.txs[&hash];
                let has_unconfirmed_inputs =
                    tx.prevouts.iter().any(|(prev_hash, _)| self.txs.contains_key(prev_hash));
                result.push(MemPoolTxSummary {
                    hash,
                    fee: tx.fee,
                    has_unconfirmed_inputs,
                });
            }
        }
        result
    }

    /// Unordered unconfirmed UTXOs paying `hashx`; does not account for
    /// whether another mempool tx has since spent them.
    pub fn unordered_utxos(&self, hashx: &[u8]) -> Vec<Utxo> {
        let mut utxos = Vec::new();
        if let Some(hashes) = self.hashxs.get(hashx) {
            for &hash in hashes {
                if let Some(tx) = self.txs.get(&hash) {
                    for (pos, (h, value)) in tx.out_pairs.iter().enumerate() {
                        if h == hashx {
                            utxos.push(Utxo {
                                height: -1,
                                tx_pos: pos as u32,
                                tx_hash: hash,
                                value: *value,
                            });
                        }
                    }
                }
            }
        }
        utxos
    }

    /// The mempool tx (if any) that spends `(prev_tx_hash, txout_idx)`.
    pub fn spender_for_txo(&self, prev_tx_hash: Hash, txout_idx: u32) -> Option<Hash> {
        self.txo_to_spender.get(&(prev_tx_hash, txout_idx)).copied()
    }

    /// Whether a mempool tx created `(tx_hash, txout_idx)`, regardless of
    /// whether it has since been spent.
    pub fn txo_exists_in_mempool(&self, tx_hash: &Hash, txout_idx: u32) -> bool {
        self.txs
            .get(tx_hash)
            .map_or(false, |tx| (txout_idx as usize) < tx.out_pairs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashx(tag: u8) -> HashX {
        vec![tag; 11]
    }

    #[test]
    fn compress_histogram_emits_descending_buckets_past_bin_size() {
        let mut histogram = HashMap::new();
        // three fee-rate buckets (in 0.1 sat/byte units), each with enough
        // cumulative size to force an emission on its own.
        histogram.insert(500, 150_000u64); // 50.0 sat/byte
        histogram.insert(100, 150_000u64); // 10.0 sat/byte
        histogram.insert(10, 50_000u64); // 1.0 sat/byte, below bin_size alone

        let compact = MemPool::<NullApi>::compress_histogram(&histogram, 100_000);
        assert_eq!(compact.len(), 2);
        assert_eq!(compact[0].0, 50.0);
        assert_eq!(compact[1].0, 10.0);
        assert!(compact[0].1 >= 100_000);
    }

    #[test]
    fn accept_transactions_resolves_chained_mempool_spends() {
        let a = hashx(1);
        let b = hashx(2);
        let parent_hash = Hash([1u8; 32]);
        let child_hash = Hash([2u8; 32]);

        let parent = MemPoolTx {
            prevouts: vec![],
            in_pairs: None,
            out_pairs: vec![(a.clone(), 1000)],
            fee: 0,
            size: 200,
        };
        let child = MemPoolTx {
            prevouts: vec![(parent_hash, 0)],
            in_pairs: None,
            out_pairs: vec![(b.clone(), 900)],
            fee: 0,
            size: 150,
        };

        let mut tx_map = HashMap::new();
        tx_map.insert(parent_hash, parent);
        tx_map.insert(child_hash, child);

        let mut hashxs = HashMap::new();
        let mut txo_to_spender = HashMap::new();
        let mut txs = HashMap::new();
        let mut touched_hashxs = HashSet::new();
        let mut touched_outpoints = HashSet::new();

        // First pass resolves only the parent (no prevouts); child is
        // deferred since its prevout isn't in utxo_map and the parent
        // hasn't been accepted into `txs` yet this same pass.
        let (deferred, _) = MemPool::<NullApi>::accept_transactions(
            tx_map,
            HashMap::new(),
            &mut hashxs,
            &mut txo_to_spender,
            &mut txs,
            &mut touched_hashxs,
            &mut touched_outpoints,
        );
        assert_eq!(deferred.len(), 1);
        assert!(txs.contains_key(&parent_hash));

        // Second pass: child now resolves against the accepted parent.
        let (deferred2, _) = MemPool::<NullApi>::accept_transactions(
            deferred,
            HashMap::new(),
            &mut hashxs,
            &mut txo_to_spender,
            &mut txs,
            &mut touched_hashxs,
            &mut touched_outpoints,
        );
        assert!(deferred2.is_empty());
        let child_tx = &txs[&child_hash];
        assert_eq!(child_tx.fee, 100);
        assert_eq!(txo_to_spender.get(&(parent_hash, 0)), Some(&child_hash));
    }

    struct NullApi;

    #[async_trait]
    impl MemPoolApi for NullApi {
        async fn height(&self) -> i32 {
            0
        }
        fn cached_height(&self) -> Option<i32> {
            Some(0)
        }
        fn db_height(&self) -> i32 {
            0
        }
        async fn mempool_hashes(&self) -> Vec<Hash> {
            vec![]
        }
        async fn raw_transactions(&self, _hashes: &[Hash]) -> Vec<Option<Vec<u8>>> {
            vec![]
        }
        async fn lookup_utxos(&self, _prevouts: &[Prevout]) -> Vec<Option<(HashX, u64)>> {
            vec![]
        }
        async fn on_mempool(
            &self,
            _touched_hashxs: HashSet<HashX>,
            _touched_outpoints: HashSet<(Hash, u32)>,
            _height: i32,
        ) {
        }
    }
}
