//! The per-script transaction history index: an
//! append-only index over the History KV schema, with an
//! in-memory buffer of not-yet-flushed per-block contributions.
//!
//! Ported from `electrumx.server.history.History`; the write path keeps the
//! original's two-phase shape (buffer in `add_unflushed`, commit in
//! `flush`) because that shape is what lets the block processor's
//! `backup`-on-reorg stay correct: `backup` asserts nothing is unflushed.

mod error;
mod keys;
pub mod status;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use electrumx_chain::hash::Hash;
use electrumx_storage::{KvStore, WriteBatch};
use tracing::{debug, info};

pub use crate::error::HistoryError;
pub use crate::keys::{pack_txnum, pack_txoutidx, unpack_txnum, unpack_txoutidx, TXNUM_LEN, TXOUTIDX_LEN};
use crate::state::State;

mod state;
pub use state::CURRENT_DB_VERSION;

const STATE_KEY: &[u8] = b"\0state";

/// A script identifier: the coin's `hashX_from_script` prefix (11 bytes by
/// default, but not hard-coded since it's a coin policy).
pub type HashX = Vec<u8>;

pub struct History {
    db: Arc<dyn KvStore>,
    hist_db_tx_count: u64,
    hist_db_tx_count_next: u64,
    db_version: u32,
    upgrade_cursor: i64,

    unflushed_hashxs: BTreeMap<HashX, BTreeSet<u64>>,
    unflushed_txhash_to_txnum: HashMap<Hash, u64>,
    unflushed_txo_to_spender: BTreeMap<(u64, u32), u64>,
    unflushed_hashx_to_statushash: BTreeMap<HashX, Vec<(u64, [u8; 32])>>,
}

impl History {
    /// Opens the history DB, reads its `state` record, and truncates any
    /// entries left behind by an unclean shutdown whose `tx_num` is at or
    /// past the UTXO DB's own tx count.
    pub fn open(db: Arc<dyn KvStore>, utxo_db_tx_count: u64) -> Result<Self, HistoryError> {
        let state = match db.get(STATE_KEY)? {
            Some(bytes) => State::decode(&bytes)?,
            None => State::default(),
        };
        if state.db_version != CURRENT_DB_VERSION {
            return Err(HistoryError::UnsupportedDbVersion(state.db_version));
        }

        let mut history = History {
            db,
            hist_db_tx_count: state.hist_db_tx_count,
            hist_db_tx_count_next: state.hist_db_tx_count,
            db_version: state.db_version,
            upgrade_cursor: state.upgrade_cursor,
            unflushed_hashxs: BTreeMap::new(),
            unflushed_txhash_to_txnum: HashMap::new(),
            unflushed_txo_to_spender: BTreeMap::new(),
            unflushed_hashx_to_statushash: BTreeMap::new(),
        };
        history.clear_excess(utxo_db_tx_count)?;
        Ok(history)
    }

    pub fn hist_db_tx_count(&self) -> u64 {
        self.hist_db_tx_count
    }

    /// `self.hist_db_tx_count != utxo_db_tx_count` can legitimately happen
    /// since the two DBs aren't flushed atomically with each other; this
    /// scans for and deletes whatever the history DB got ahead on.
    fn clear_excess(&mut self, utxo_db_tx_count: u64) -> Result<(), HistoryError> {
        if self.hist_db_tx_count <= utxo_db_tx_count {
            if self.hist_db_tx_count != utxo_db_tx_count {
                return Err(HistoryError::InvariantViolation(
                    "hist_db_tx_count must equal utxo_db_tx_count once caught up",
                ));
            }
            return Ok(());
        }
        info!("history DB shut down uncleanly, scanning for excess flushes");

        let mut hkeys = Vec::new();
        for (key, _) in self.db.iter_prefix(b"H") {
            let tx_num = unpack_txnum(&key[key.len() - TXNUM_LEN..]);
            if tx_num >= utxo_db_tx_count {
                hkeys.push(key);
            }
        }

        let mut tkeys = Vec::new();
        for (key, val) in self.db.iter_prefix(b"t") {
            let tx_num = unpack_txnum(&val);
            if tx_num >= utxo_db_tx_count {
                tkeys.push(key);
            }
        }

        let mut skeys = Vec::new();
        for (key, val) in self.db.iter_prefix(b"s") {
            let tx_num1 = unpack_txnum(&key[1..1 + TXNUM_LEN]);
            let tx_num2 = unpack_txnum(&val);
            if tx_num1.max(tx_num2) >= utxo_db_tx_count {
                skeys.push(key);
            }
        }

        debug!(
            addrs = hkeys.len(),
            txs = tkeys.len(),
            spends = skeys.len(),
            "deleting excess history entries"
        );

        self.hist_db_tx_count = utxo_db_tx_count;
        self.hist_db_tx_count_next = utxo_db_tx_count;

        let mut batch = WriteBatch::new();
        for key in hkeys.into_iter().chain(tkeys).chain(skeys) {
            batch.delete(&key);
        }
        self.write_state(&mut batch);
        self.db.write(batch)?;
        Ok(())
    }

    fn write_state(&self, batch: &mut WriteBatch) {
        let state = State {
            hist_db_tx_count: self.hist_db_tx_count,
            db_version: self.db_version,
            upgrade_cursor: self.upgrade_cursor,
        };
        batch.put(STATE_KEY, &state.encode());
    }

    /// Buffers one block's contributions: for each tx (in canonical block
    /// order, `tx_num = first_tx_num + index`), the hashXs it touches, the
    /// txhash→txnum map entry, and any txo→spender edges it closes.
    pub fn add_unflushed(
        &mut self,
        hashxs_by_tx: &[Vec<HashX>],
        first_tx_num: u64,
        txhash_to_txnum: &HashMap<Hash, u64>,
        txo_to_spender: &HashMap<(Hash, u32), Hash>,
    ) -> Result<(), HistoryError> {
        for (i, hashxs) in hashxs_by_tx.iter().enumerate() {
            let tx_num = first_tx_num + i as u64;
            for hashx in hashxs {
                self.unflushed_hashxs
                    .entry(hashx.clone())
                    .or_default()
                    .insert(tx_num);
            }
        }
        if !hashxs_by_tx.is_empty() {
            let last_tx_num = first_tx_num + hashxs_by_tx.len() as u64 - 1;
            if self.hist_db_tx_count_next + hashxs_by_tx.len() as u64 != last_tx_num + 1 {
                return Err(HistoryError::InvariantViolation(
                    "add_unflushed called with a non-contiguous tx_num range",
                ));
            }
            self.hist_db_tx_count_next = last_tx_num + 1;
        }

        for (&tx_hash, &tx_num) in txhash_to_txnum {
            self.unflushed_txhash_to_txnum.insert(tx_hash, tx_num);
        }

        for (&(prev_hash, prev_idx), &spender_hash) in txo_to_spender {
            let prev_txnum = self
                .get_txnum_for_txhash(&prev_hash)
                .ok_or(HistoryError::InvariantViolation(
                    "txo_to_spender references an unknown previous tx",
                ))?;
            let spender_txnum =
                self.get_txnum_for_txhash(&spender_hash)
                    .ok_or(HistoryError::InvariantViolation(
                        "txo_to_spender references an unknown spender tx",
                    ))?;
            self.unflushed_txo_to_spender
                .insert((prev_txnum, prev_idx), spender_txnum);
        }
        Ok(())
    }

    pub fn assert_flushed(&self) -> Result<(), HistoryError> {
        if !self.unflushed_hashxs.is_empty()
            || !self.unflushed_txhash_to_txnum.is_empty()
            || !self.unflushed_txo_to_spender.is_empty()
        {
            return Err(HistoryError::UnflushedPending);
        }
        Ok(())
    }

    /// Atomically commits every buffered write in one KV batch, with keys
    /// written in sorted order to maximize sequential write locality.
    pub fn flush(&mut self) -> Result<(), HistoryError> {
        let mut batch = WriteBatch::new();

        for (hashx, tx_nums) in &self.unflushed_hashxs {
            for &tx_num in tx_nums {
                let mut key = Vec::with_capacity(1 + hashx.len() + TXNUM_LEN);
                key.push(b'H');
                key.extend_from_slice(hashx);
                key.extend_from_slice(&pack_txnum(tx_num));
                batch.put(&key, b"");
            }
        }
        for (tx_hash, &tx_num) in &self.unflushed_txhash_to_txnum {
            let mut key = Vec::with_capacity(33);
            key.push(b't');
            key.extend_from_slice(tx_hash.as_bytes());
            batch.put(&key, &pack_txnum(tx_num));
        }
        for (&(prev_txnum, prev_idx), &spender_txnum) in &self.unflushed_txo_to_spender {
            let mut key = Vec::with_capacity(1 + TXNUM_LEN + TXOUTIDX_LEN);
            key.push(b's');
            key.extend_from_slice(&pack_txnum(prev_txnum));
            key.extend_from_slice(&pack_txoutidx(prev_idx));
            batch.put(&key, &pack_txnum(spender_txnum));
        }
        for (hashx, entries) in &self.unflushed_hashx_to_statushash {
            for (tx_num, status) in entries {
                let mut key = Vec::with_capacity(1 + hashx.len() + TXNUM_LEN);
                key.push(b'S');
                key.extend_from_slice(hashx);
                key.extend_from_slice(&pack_txnum(*tx_num));
                batch.put(&key, status);
            }
        }

        self.hist_db_tx_count = self.hist_db_tx_count_next;
        self.write_state(&mut batch);
        self.db.write(batch)?;

        self.unflushed_hashxs.clear();
        self.unflushed_txhash_to_txnum.clear();
        self.unflushed_txo_to_spender.clear();
        self.unflushed_hashx_to_statushash.clear();
        Ok(())
    }

    /// Reverses a block range's effect on the index for a reorg.
    /// `tx_count` is the first surviving `tx_num` (everything at or past it
    /// is rolled back). Requires the unflushed buffers to be empty.
    pub fn backup(
        &mut self,
        hashxs: &[HashX],
        tx_count: u64,
        tx_hashes: &[Hash],
        spends: &[(Hash, u32)],
    ) -> Result<(), HistoryError> {
        self.assert_flushed()?;

        let mut batch = WriteBatch::new();
        for hashx in hashxs {
            let mut prefix = vec![b'H'];
            prefix.extend_from_slice(hashx);
            let mut deletes = Vec::new();
            for (key, _) in self.db.iter_prefix_rev(&prefix) {
                let tx_num = unpack_txnum(&key[key.len() - TXNUM_LEN..]);
                if tx_num >= tx_count {
                    deletes.push(key);
                } else {
                    // big-endian keys under reverse iteration only get
                    // smaller from here; nothing further can qualify.
                    break;
                }
            }
            for key in deletes {
                batch.delete(&key);
            }
        }
        for &(prev_hash, prev_idx) in spends {
            let prev_txnum = self
                .get_txnum_for_txhash(&prev_hash)
                .ok_or(HistoryError::InvariantViolation(
                    "backup() spend references an unknown previous tx",
                ))?;
            let mut key = Vec::with_capacity(1 + TXNUM_LEN + TXOUTIDX_LEN);
            key.push(b's');
            key.extend_from_slice(&pack_txnum(prev_txnum));
            key.extend_from_slice(&pack_txoutidx(prev_idx));
            batch.delete(&key);
        }
        for tx_hash in tx_hashes {
            let mut key = Vec::with_capacity(33);
            key.push(b't');
            key.extend_from_slice(tx_hash.as_bytes());
            batch.delete(&key);
        }

        self.hist_db_tx_count = tx_count;
        self.hist_db_tx_count_next = tx_count;
        self.write_state(&mut batch);
        self.db.write(batch)?;
        Ok(())
    }

    /// The ascending, unpruned list of `tx_num`s touching `hashx`, optionally
    /// windowed by `[txnum_min, txnum_max)` and capped at `limit` entries.
    pub fn get_txnums(
        &self,
        hashx: &[u8],
        limit: Option<usize>,
        txnum_min: Option<u64>,
        txnum_max: Option<u64>,
    ) -> Vec<u64> {
        let mut prefix = vec![b'H'];
        prefix.extend_from_slice(hashx);

        let iter: Box<dyn Iterator<Item = _>> = match txnum_min {
            Some(min) => {
                let mut seek = prefix.clone();
                seek.extend_from_slice(&pack_txnum(min));
                self.db.iter_prefix_from(&prefix, &seek)
            }
            None => self.db.iter_prefix(&prefix),
        };

        let mut out = Vec::new();
        for (key, _) in iter {
            if let Some(limit) = limit {
                if out.len() >= limit {
                    break;
                }
            }
            let tx_num = unpack_txnum(&key[key.len() - TXNUM_LEN..]);
            if let Some(max) = txnum_max {
                if tx_num >= max {
                    break;
                }
            }
            out.push(tx_num);
        }
        out
    }

    pub fn get_txnum_for_txhash(&self, tx_hash: &Hash) -> Option<u64> {
        if let Some(&tx_num) = self.unflushed_txhash_to_txnum.get(tx_hash) {
            return Some(tx_num);
        }
        let mut key = Vec::with_capacity(33);
        key.push(b't');
        key.extend_from_slice(tx_hash.as_bytes());
        self.db
            .get(&key)
            .ok()
            .flatten()
            .map(|bytes| unpack_txnum(&bytes))
    }

    /// The `tx_num` that spent `(prev_txnum, txout_idx)`, if any.
    pub fn get_spender_txnum_for_txo(&self, prev_txnum: u64, txout_idx: u32) -> Option<u64> {
        if let Some(&spender) = self
            .unflushed_txo_to_spender
            .get(&(prev_txnum, txout_idx))
        {
            return Some(spender);
        }
        let mut key = Vec::with_capacity(1 + TXNUM_LEN + TXOUTIDX_LEN);
        key.push(b's');
        key.extend_from_slice(&pack_txnum(prev_txnum));
        key.extend_from_slice(&pack_txoutidx(txout_idx));
        self.db
            .get(&key)
            .ok()
            .flatten()
            .map(|bytes| unpack_txnum(&bytes))
    }

    /// The most recent `(tx_num, status)` cached for `hashx` with
    /// `tx_num < txnum_max` (or overall most recent if `txnum_max` is
    /// `None`), searching the unflushed buffer first, then the DB.
    /// Returns `(0, GENESIS_STATUS)` if nothing is cached.
    pub fn get_intermediate_statushash_for_hashx(
        &self,
        hashx: &[u8],
        txnum_max: Option<u64>,
    ) -> (u64, [u8; 32]) {
        if let Some(entries) = self.unflushed_hashx_to_statushash.get(hashx) {
            for &(tx_num, status) in entries.iter().rev() {
                if txnum_max.map_or(true, |max| tx_num < max) {
                    return (tx_num, status);
                }
            }
        }

        let mut prefix = vec![b'S'];
        prefix.extend_from_slice(hashx);
        for (key, val) in self.db.iter_prefix_rev(&prefix) {
            let tx_num = unpack_txnum(&key[key.len() - TXNUM_LEN..]);
            if let Some(max) = txnum_max {
                if tx_num >= max {
                    continue;
                }
            }
            let mut status = [0u8; 32];
            status.copy_from_slice(&val);
            return (tx_num, status);
        }
        (0, status::GENESIS_STATUS)
    }

    /// Appends an intermediate status for `hashx` at `tx_num`, which must be
    /// at a reorg-safe depth. Silently ignores out-of-order entries (the
    /// same tolerance the original gives callers that race a flush).
    pub fn store_intermediate_statushash_for_hashx(
        &mut self,
        hashx: &[u8],
        tx_num: u64,
        status: [u8; 32],
    ) {
        let entries = self
            .unflushed_hashx_to_statushash
            .entry(hashx.to_vec())
            .or_default();
        if let Some(&(last_tx_num, _)) = entries.last() {
            if tx_num <= last_tx_num {
                return;
            }
        }
        entries.push((tx_num, status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use electrumx_storage::RocksDbStore;

    fn open_history() -> (tempdir::TempDir, History) {
        let dir = tempdir::TempDir::new("electrumx-history-test").unwrap();
        let store: Arc<dyn KvStore> = Arc::new(RocksDbStore::open(dir.path()).unwrap());
        let history = History::open(store, 0).unwrap();
        (dir, history)
    }

    fn hashx(tag: u8) -> HashX {
        vec![tag; 11]
    }

    #[test]
    fn add_unflushed_then_flush_makes_txnums_visible_in_order() {
        let (_dir, mut history) = open_history();
        let a = hashx(1);
        let tx0 = Hash([10u8; 32]);
        let tx1 = Hash([11u8; 32]);
        let mut txhash_to_txnum = HashMap::new();
        txhash_to_txnum.insert(tx0, 0);
        txhash_to_txnum.insert(tx1, 1);

        history
            .add_unflushed(
                &[vec![a.clone()], vec![a.clone()]],
                0,
                &txhash_to_txnum,
                &HashMap::new(),
            )
            .unwrap();
        history.flush().unwrap();

        assert_eq!(history.get_txnums(&a, None, None, None), vec![0, 1]);
        assert_eq!(history.get_txnum_for_txhash(&tx0), Some(0));
        assert_eq!(history.get_txnum_for_txhash(&tx1), Some(1));
        assert_eq!(history.hist_db_tx_count(), 2);
    }

    #[test]
    fn backup_removes_everything_at_or_past_tx_count() {
        let (_dir, mut history) = open_history();
        let a = hashx(2);
        let txs: Vec<Hash> = (0..5).map(|i| Hash([i as u8 + 1; 32])).collect();
        let mut txhash_to_txnum = HashMap::new();
        for (i, h) in txs.iter().enumerate() {
            txhash_to_txnum.insert(*h, i as u64);
        }
        history
            .add_unflushed(
                &vec![vec![a.clone()]; 5],
                0,
                &txhash_to_txnum,
                &HashMap::new(),
            )
            .unwrap();
        history.flush().unwrap();

        history.backup(&[a.clone()], 3, &txs[3..], &[]).unwrap();

        assert_eq!(history.get_txnums(&a, None, None, None), vec![0, 1, 2]);
        assert_eq!(history.get_txnum_for_txhash(&txs[3]), None);
        assert_eq!(history.get_txnum_for_txhash(&txs[4]), None);
        assert_eq!(history.hist_db_tx_count(), 3);
    }

    #[test]
    fn spender_edges_survive_a_flush() {
        let (_dir, mut history) = open_history();
        let prev = Hash([1u8; 32]);
        let spender = Hash([2u8; 32]);
        let mut txhash_to_txnum = HashMap::new();
        txhash_to_txnum.insert(prev, 0);
        txhash_to_txnum.insert(spender, 1);
        let mut spends = HashMap::new();
        spends.insert((prev, 0u32), spender);

        history
            .add_unflushed(&[vec![], vec![]], 0, &txhash_to_txnum, &spends)
            .unwrap();
        history.flush().unwrap();

        assert_eq!(history.get_spender_txnum_for_txo(0, 0), Some(1));
        assert_eq!(history.get_spender_txnum_for_txo(0, 1), None);
    }

    #[test]
    fn intermediate_statushash_prefers_unflushed_then_db() {
        let (_dir, mut history) = open_history();
        let a = hashx(3);
        history.store_intermediate_statushash_for_hashx(&a, 10, [9u8; 32]);
        assert_eq!(
            history.get_intermediate_statushash_for_hashx(&a, None),
            (10, [9u8; 32])
        );
        // out-of-order inserts are rejected
        history.store_intermediate_statushash_for_hashx(&a, 5, [1u8; 32]);
        assert_eq!(
            history.get_intermediate_statushash_for_hashx(&a, None),
            (10, [9u8; 32])
        );
    }
}
