//! A concrete, on-disk [`UtxoDb`]: the minimal RocksDB-backed mined-state
//! store a runnable binary needs to actually answer `blockchain.scripthash.*`
//! queries against confirmed blocks. Kept deliberately simple next to
//! `electrumx_history::History`'s carefully ported KV schema — this schema
//! is this workspace's own invention, not a port of anything upstream, since
//! the UTXO database is named as an external collaborator spec.md doesn't
//! specify the shape of.
//!
//! Key layout (all multi-byte integers big-endian so prefix iteration order
//! matches numeric order, the same invariant the history schema relies on):
//!
//! - `b<height:4>` -> header bytes
//! - `T<height:4>` -> concatenated 32-byte tx hashes, block order
//! - `n<height:4>` -> first_txnum assigned to that height, 8 bytes
//! - `N<txnum:8>` -> tx_hash(32) ++ height(4)
//! - `o<hashx><txnum:8><idx:4>` -> value(8), the live UTXO set
//! - `p<txid:32><idx:4>` -> hashx_len(1) ++ hashx ++ value(8) ++ txnum(8),
//!   indexed by outpoint so a spending input can find and remove its `o`
//!   sibling without a reverse scan
//! - `\0tip` -> height(4) ++ flushed_tx_count(8)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use electrumx_chain::coin::{hashx_from_script, read_header, read_tx, Coin};
use electrumx_chain::tx::Input;
use electrumx_chain::{Hash, Tx};
use electrumx_storage::{KvStore, RocksDbStore, WriteBatch};

use crate::coin_config::SelectedCoin;
use crate::collaborators::{Utxo, UtxoDb};

const TIP_KEY: &[u8] = b"\0tip";

pub struct RocksUtxoDb {
    db: Arc<dyn KvStore>,
    tip: Mutex<(i32, u64)>,
}

fn height_key(height: i32) -> [u8; 5] {
    let mut out = [0u8; 5];
    out[0] = b'b';
    out[1..].copy_from_slice(&(height as u32).to_be_bytes());
    out
}

fn txhashes_key(height: i32) -> [u8; 5] {
    let mut out = height_key(height);
    out[0] = b'T';
    out
}

fn first_txnum_key(height: i32) -> [u8; 5] {
    let mut out = height_key(height);
    out[0] = b'n';
    out
}

fn txnum_index_key(txnum: u64) -> [u8; 9] {
    let mut out = [0u8; 9];
    out[0] = b'N';
    out[1..].copy_from_slice(&txnum.to_be_bytes());
    out
}

fn outpoint_key(txid: &Hash, idx: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 32 + 4);
    out.push(b'p');
    out.extend_from_slice(txid.as_bytes());
    out.extend_from_slice(&idx.to_be_bytes());
    out
}

fn utxo_set_key(hashx: &[u8], txnum: u64, idx: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + hashx.len() + 8 + 4);
    out.push(b'o');
    out.extend_from_slice(hashx);
    out.extend_from_slice(&txnum.to_be_bytes());
    out.extend_from_slice(&idx.to_be_bytes());
    out
}

fn undo_key(height: i32) -> [u8; 5] {
    let mut out = height_key(height);
    out[0] = b'u';
    out
}

/// One output touched by a block, in the shape both halves of the undo log
/// need: created outputs (`txnum` is the output's own tx) and spent ones
/// (`txnum` is the *creating* tx, so the rollback can restore the original
/// `o`/`p` records verbatim).
struct UndoOutpoint {
    txid: Hash,
    idx: u32,
    txnum: u64,
    hashx: Vec<u8>,
    value: u64,
}

struct UndoRecord {
    first_txnum: u64,
    created: Vec<UndoOutpoint>,
    spent: Vec<UndoOutpoint>,
    tx_hashes: Vec<Hash>,
}

fn encode_outpoint_list(out: &mut Vec<u8>, list: &[UndoOutpoint]) {
    out.extend_from_slice(&(list.len() as u32).to_be_bytes());
    for o in list {
        out.extend_from_slice(o.txid.as_bytes());
        out.extend_from_slice(&o.idx.to_be_bytes());
        out.extend_from_slice(&o.txnum.to_be_bytes());
        out.push(o.hashx.len() as u8);
        out.extend_from_slice(&o.hashx);
        out.extend_from_slice(&o.value.to_be_bytes());
    }
}

fn decode_outpoint_list(bytes: &[u8], pos: &mut usize) -> Option<Vec<UndoOutpoint>> {
    let count = u32::from_be_bytes(bytes.get(*pos..*pos + 4)?.try_into().ok()?) as usize;
    *pos += 4;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let txid_bytes: [u8; 32] = bytes.get(*pos..*pos + 32)?.try_into().ok()?;
        *pos += 32;
        let idx = u32::from_be_bytes(bytes.get(*pos..*pos + 4)?.try_into().ok()?);
        *pos += 4;
        let txnum = u64::from_be_bytes(bytes.get(*pos..*pos + 8)?.try_into().ok()?);
        *pos += 8;
        let hashx_len = *bytes.get(*pos)? as usize;
        *pos += 1;
        let hashx = bytes.get(*pos..*pos + hashx_len)?.to_vec();
        *pos += hashx_len;
        let value = u64::from_be_bytes(bytes.get(*pos..*pos + 8)?.try_into().ok()?);
        *pos += 8;
        out.push(UndoOutpoint {
            txid: Hash(txid_bytes),
            idx,
            txnum,
            hashx,
            value,
        });
    }
    Some(out)
}

fn encode_undo(record: &UndoRecord) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&record.first_txnum.to_be_bytes());
    encode_outpoint_list(&mut out, &record.created);
    encode_outpoint_list(&mut out, &record.spent);
    out.extend_from_slice(&(record.tx_hashes.len() as u32).to_be_bytes());
    for h in &record.tx_hashes {
        out.extend_from_slice(h.as_bytes());
    }
    out
}

fn decode_undo(bytes: &[u8]) -> Option<UndoRecord> {
    let mut pos = 0;
    let first_txnum = u64::from_be_bytes(bytes.get(pos..pos + 8)?.try_into().ok()?);
    pos += 8;
    let created = decode_outpoint_list(bytes, &mut pos)?;
    let spent = decode_outpoint_list(bytes, &mut pos)?;
    let tx_count = u32::from_be_bytes(bytes.get(pos..pos + 4)?.try_into().ok()?) as usize;
    pos += 4;
    let mut tx_hashes = Vec::with_capacity(tx_count);
    for _ in 0..tx_count {
        let arr: [u8; 32] = bytes.get(pos..pos + 32)?.try_into().ok()?;
        pos += 32;
        tx_hashes.push(Hash(arr));
    }
    Some(UndoRecord {
        first_txnum,
        created,
        spent,
        tx_hashes,
    })
}

/// What [`RocksUtxoDb::rollback_to`] hands back for the history index to
/// apply its own matching `backup`.
pub struct RollbackEffects {
    pub hashxs: Vec<Vec<u8>>,
    pub tx_count: u64,
    pub tx_hashes: Vec<Hash>,
    pub spends: Vec<(Hash, u32)>,
}

/// `(hashx, value, creating_txnum)`, as stored under an outpoint key.
struct OutpointRecord {
    hashx: Vec<u8>,
    value: u64,
    creating_txnum: u64,
}

fn encode_outpoint_record(hashx: &[u8], value: u64, creating_txnum: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + hashx.len() + 8 + 8);
    out.push(hashx.len() as u8);
    out.extend_from_slice(hashx);
    out.extend_from_slice(&value.to_be_bytes());
    out.extend_from_slice(&creating_txnum.to_be_bytes());
    out
}

fn decode_outpoint_record(bytes: &[u8]) -> Option<OutpointRecord> {
    let hashx_len = *bytes.first()? as usize;
    if bytes.len() != 1 + hashx_len + 8 + 8 {
        return None;
    }
    let hashx = bytes[1..1 + hashx_len].to_vec();
    let value = u64::from_be_bytes(bytes[1 + hashx_len..1 + hashx_len + 8].try_into().ok()?);
    let creating_txnum = u64::from_be_bytes(bytes[1 + hashx_len + 8..].try_into().ok()?);
    Some(OutpointRecord {
        hashx,
        value,
        creating_txnum,
    })
}

/// One transaction parsed out of a raw block.
pub struct ParsedTx {
    pub tx: Tx,
}

/// What [`RocksUtxoDb::apply_block`] hands back for the history index and
/// the controller's chain tip to consume.
pub struct BlockEffects {
    pub hashxs_by_tx: Vec<Vec<Vec<u8>>>,
    pub txhash_to_txnum: HashMap<Hash, u64>,
    pub txo_to_spender: HashMap<(Hash, u32), Hash>,
    pub first_txnum: u64,
    pub next_flushed_tx_count: u64,
}

impl RocksUtxoDb {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, electrumx_storage::StorageError> {
        let db = RocksDbStore::open(path)?;
        let tip = match db.get(TIP_KEY)? {
            Some(bytes) if bytes.len() == 12 => {
                let height = i32::from_be_bytes(bytes[0..4].try_into().unwrap());
                let tx_count = u64::from_be_bytes(bytes[4..12].try_into().unwrap());
                (height, tx_count)
            }
            _ => (-1, 0),
        };
        Ok(RocksUtxoDb {
            db: Arc::new(db),
            tip: Mutex::new(tip),
        })
    }

    fn lookup_outpoint_record(&self, txid: &Hash, idx: u32) -> Option<OutpointRecord> {
        let bytes = self.db.get(&outpoint_key(txid, idx)).ok()??;
        decode_outpoint_record(&bytes)
    }

    /// Parses a daemon-serialized raw block (header ++ varint tx count ++
    /// txs, per spec.md §6) into its header slice and transactions.
    pub fn parse_raw_block(data: &[u8], height: i32) -> Result<(Vec<u8>, Vec<ParsedTx>), String> {
        let header = read_header(
            data,
            0,
            80,
            SelectedCoin::HEADER,
            height.max(0) as u32,
        )
        .map_err(|e| e.to_string())?
        .to_vec();

        let mut cursor = electrumx_chain::bytes::Cursor::at(data, header.len());
        let tx_count = cursor.read_varint().map_err(|e| e.to_string())? as usize;
        let mut txs = Vec::with_capacity(tx_count);
        let mut pos = cursor.pos;
        for _ in 0..tx_count {
            let (tx, consumed) =
                read_tx(SelectedCoin::DESERIALIZER, &data[pos..]).map_err(|e| e.to_string())?;
            pos += consumed;
            txs.push(ParsedTx { tx });
        }
        Ok((header, txs))
    }

    /// Builds a [`WriteBatch`] for one block's worth of transactions and the
    /// hashX/spender facts the history index needs, resolving same-block
    /// input chains against a local map before falling back to what's
    /// already committed.
    pub fn apply_block(
        &self,
        height: i32,
        header: &[u8],
        txs: &[ParsedTx],
    ) -> (WriteBatch, BlockEffects) {
        let mut batch = WriteBatch::new();
        let (prev_height, prev_tx_count) = *self.tip.lock().unwrap();
        debug_assert_eq!(height, prev_height + 1, "apply_block called out of order");
        let first_txnum = prev_tx_count;

        let mut hashxs_by_tx = Vec::with_capacity(txs.len());
        let mut txhash_to_txnum = HashMap::new();
        let mut txo_to_spender = HashMap::new();
        let mut tx_hashes_concat = Vec::with_capacity(txs.len() * 32);
        let mut tx_hashes = Vec::with_capacity(txs.len());
        let mut undo_created = Vec::new();
        let mut undo_spent = Vec::new();
        // Outputs created earlier in this same block, spendable before the
        // batch commits (coinbase maturity rules are the block processor's
        // problem, not this store's).
        let mut in_block_outputs: HashMap<(Hash, u32), (Vec<u8>, u64, u64)> = HashMap::new();

        for (i, parsed) in txs.iter().enumerate() {
            let tx = &parsed.tx;
            let tx_num = first_txnum + i as u64;
            tx_hashes_concat.extend_from_slice(tx.txid.as_bytes());
            tx_hashes.push(tx.txid);
            txhash_to_txnum.insert(tx.txid, tx_num);
            batch.put(&txnum_index_key(tx_num), &{
                let mut v = Vec::with_capacity(36);
                v.extend_from_slice(tx.txid.as_bytes());
                v.extend_from_slice(&(height as u32).to_be_bytes());
                v
            });

            let mut touched: Vec<Vec<u8>> = Vec::new();

            for (idx, output) in tx.outputs.iter().enumerate() {
                let idx = idx as u32;
                let hashx = hashx_from_script(output.pk_script(), SelectedCoin::HASHX_LEN);
                let value = output.value().max(0) as u64;
                touched.push(hashx.clone());
                batch.put(&utxo_set_key(&hashx, tx_num, idx), &value.to_be_bytes());
                batch.put(
                    &outpoint_key(&tx.txid, idx),
                    &encode_outpoint_record(&hashx, value, tx_num),
                );
                undo_created.push(UndoOutpoint {
                    txid: tx.txid,
                    idx,
                    txnum: tx_num,
                    hashx: hashx.clone(),
                    value,
                });
                in_block_outputs.insert((tx.txid, idx), (hashx, value, tx_num));
            }

            for input in &tx.inputs {
                if input.is_generation() {
                    continue;
                }
                let (prev_hash, prev_idx) = match input {
                    Input::PrevOut {
                        prev_hash, prev_idx, ..
                    }
                    | Input::Decred {
                        prev_hash, prev_idx, ..
                    } => (Hash(*prev_hash), *prev_idx),
                    Input::TokenPayStealth { .. } => continue,
                };

                let record = in_block_outputs
                    .remove(&(prev_hash, prev_idx))
                    .or_else(|| {
                        self.lookup_outpoint_record(&prev_hash, prev_idx)
                            .map(|r| (r.hashx, r.value, r.creating_txnum))
                    });

                if let Some((hashx, value, creating_txnum)) = record {
                    touched.push(hashx.clone());
                    batch.delete(&outpoint_key(&prev_hash, prev_idx));
                    batch.delete(&utxo_set_key(&hashx, creating_txnum, prev_idx));
                    undo_spent.push(UndoOutpoint {
                        txid: prev_hash,
                        idx: prev_idx,
                        txnum: creating_txnum,
                        hashx,
                        value,
                    });
                    txo_to_spender.insert((prev_hash, prev_idx), tx.txid);
                }
            }

            hashxs_by_tx.push(touched);
        }

        batch.put(&height_key(height), header);
        batch.put(&txhashes_key(height), &tx_hashes_concat);
        batch.put(&first_txnum_key(height), &first_txnum.to_be_bytes());
        batch.put(
            &undo_key(height),
            &encode_undo(&UndoRecord {
                first_txnum,
                created: undo_created,
                spent: undo_spent,
                tx_hashes,
            }),
        );

        let next_flushed_tx_count = first_txnum + txs.len() as u64;
        let mut tip_bytes = Vec::with_capacity(12);
        tip_bytes.extend_from_slice(&height.to_be_bytes());
        tip_bytes.extend_from_slice(&next_flushed_tx_count.to_be_bytes());
        batch.put(TIP_KEY, &tip_bytes);

        (
            batch,
            BlockEffects {
                hashxs_by_tx,
                txhash_to_txnum,
                txo_to_spender,
                first_txnum,
                next_flushed_tx_count,
            },
        )
    }

    /// Commits `batch` and advances the in-memory tip; callers are
    /// responsible for having already flushed the matching history-index
    /// writes first (spec.md §9 open question (a): history before UTXO DB).
    pub fn commit(
        &self,
        batch: WriteBatch,
        height: i32,
        next_flushed_tx_count: u64,
    ) -> Result<(), electrumx_storage::StorageError> {
        self.db.write(batch)?;
        *self.tip.lock().unwrap() = (height, next_flushed_tx_count);
        Ok(())
    }

    /// Unwinds every block above `target_height`, replaying each height's
    /// undo log in reverse: deletes what it created, restores what it spent.
    /// The returned [`RollbackEffects`] is what the history index needs for
    /// its own matching `backup` call, which must run after this one returns
    /// (its arguments come from here) and before the rolled-back height is
    /// treated as durable: a crash in between leaves the history index
    /// pointing at blocks this store no longer has, which `History::open`'s
    /// `clear_excess` detects and truncates back down on restart.
    pub fn rollback_to(&self, target_height: i32) -> Result<RollbackEffects, String> {
        let (current_height, current_tx_count) = *self.tip.lock().unwrap();
        if target_height >= current_height {
            return Err("reorg target height must be below the current tip".to_string());
        }

        let mut batch = WriteBatch::new();
        let mut hashxs_seen: std::collections::HashSet<Vec<u8>> = Default::default();
        let mut tx_hashes = Vec::new();
        let mut spends = Vec::new();
        let mut new_tx_count = current_tx_count;

        for h in (target_height + 1..=current_height).rev() {
            let raw = self
                .db
                .get(&undo_key(h))
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("missing undo log for height {}", h))?;
            let undo = decode_undo(&raw).ok_or_else(|| format!("corrupt undo log for height {}", h))?;

            for created in &undo.created {
                batch.delete(&outpoint_key(&created.txid, created.idx));
                batch.delete(&utxo_set_key(&created.hashx, created.txnum, created.idx));
                batch.delete(&txnum_index_key(created.txnum));
                hashxs_seen.insert(created.hashx.clone());
            }
            for spent in &undo.spent {
                batch.put(
                    &outpoint_key(&spent.txid, spent.idx),
                    &encode_outpoint_record(&spent.hashx, spent.value, spent.txnum),
                );
                batch.put(
                    &utxo_set_key(&spent.hashx, spent.txnum, spent.idx),
                    &spent.value.to_be_bytes(),
                );
                hashxs_seen.insert(spent.hashx.clone());
                spends.push((spent.txid, spent.idx));
            }
            tx_hashes.extend(undo.tx_hashes.iter().copied());

            batch.delete(&height_key(h));
            batch.delete(&txhashes_key(h));
            batch.delete(&first_txnum_key(h));
            batch.delete(&undo_key(h));
            new_tx_count = undo.first_txnum;
        }

        let mut tip_bytes = Vec::with_capacity(12);
        tip_bytes.extend_from_slice(&target_height.to_be_bytes());
        tip_bytes.extend_from_slice(&new_tx_count.to_be_bytes());
        batch.put(TIP_KEY, &tip_bytes);

        self.db.write(batch).map_err(|e| e.to_string())?;
        *self.tip.lock().unwrap() = (target_height, new_tx_count);

        Ok(RollbackEffects {
            hashxs: hashxs_seen.into_iter().collect(),
            tx_count: new_tx_count,
            tx_hashes,
            spends,
        })
    }
}

impl UtxoDb for RocksUtxoDb {
    fn flushed_tx_count(&self) -> u64 {
        self.tip.lock().unwrap().1
    }

    fn height(&self) -> i32 {
        self.tip.lock().unwrap().0
    }

    fn mined_utxos(&self, hashx: &[u8]) -> Vec<Utxo> {
        let mut prefix = vec![b'o'];
        prefix.extend_from_slice(hashx);
        self.db
            .iter_prefix(&prefix)
            .filter_map(|(key, value_bytes)| {
                let rest = &key[prefix.len()..];
                if rest.len() != 12 {
                    return None;
                }
                let txnum = u64::from_be_bytes(rest[0..8].try_into().ok()?);
                let idx = u32::from_be_bytes(rest[8..12].try_into().ok()?);
                let value = u64::from_be_bytes(value_bytes.as_ref().try_into().ok()?);
                let (tx_hash, height) = self.tx_info_for_txnum(txnum)?;
                Some(Utxo {
                    height,
                    tx_pos: idx,
                    tx_hash,
                    value,
                })
            })
            .collect()
    }

    fn mined_balance(&self, hashx: &[u8]) -> u64 {
        self.mined_utxos(hashx).iter().map(|u| u.value).sum()
    }

    fn lookup_utxo(&self, prev_tx_hash: Hash, prev_out_idx: u32) -> Option<(Vec<u8>, u64)> {
        let record = self.lookup_outpoint_record(&prev_tx_hash, prev_out_idx)?;
        Some((record.hashx, record.value))
    }

    fn block_header(&self, height: i32) -> Option<Vec<u8>> {
        self.db.get(&height_key(height)).ok()?
    }

    fn tx_hashes_at_height(&self, height: i32) -> Option<Vec<Hash>> {
        let bytes = self.db.get(&txhashes_key(height)).ok()??;
        if bytes.len() % 32 != 0 {
            return None;
        }
        Some(
            bytes
                .chunks_exact(32)
                .map(|chunk| {
                    let mut arr = [0u8; 32];
                    arr.copy_from_slice(chunk);
                    Hash(arr)
                })
                .collect(),
        )
    }

    fn header_merkle_branch(&self, height: i32, cp_height: i32) -> Option<(Vec<Hash>, Hash)> {
        if height > cp_height || cp_height < 0 {
            return None;
        }
        let mut leaves = Vec::with_capacity((cp_height + 1) as usize);
        for h in 0..=cp_height {
            let header = self.block_header(h)?;
            leaves.push(electrumx_chain::hash::sha256d(&header));
        }
        let (branch, root) = electrumx_session::merkle::branch_and_root(&leaves, height as usize);
        Some((branch, root))
    }

    fn first_txnum_at_height(&self, height: i32) -> u64 {
        if let Some(bytes) = self.db.get(&first_txnum_key(height)).ok().flatten() {
            if bytes.len() == 8 {
                return u64::from_be_bytes(bytes.try_into().unwrap());
            }
        }
        self.flushed_tx_count()
    }

    fn tx_info_for_txnum(&self, tx_num: u64) -> Option<(Hash, i32)> {
        let bytes = self.db.get(&txnum_index_key(tx_num)).ok()??;
        if bytes.len() != 36 {
            return None;
        }
        let mut hash_bytes = [0u8; 32];
        hash_bytes.copy_from_slice(&bytes[0..32]);
        let height = u32::from_be_bytes(bytes[32..36].try_into().ok()?) as i32;
        Some((Hash(hash_bytes), height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use electrumx_chain::tx::{Output, TxExtra};

    fn open_tmp() -> (tempdir::TempDir, RocksUtxoDb) {
        let dir = tempdir::TempDir::new("electrumxd-utxo-test").unwrap();
        let db = RocksUtxoDb::open(dir.path()).unwrap();
        (dir, db)
    }

    fn coinbase(txid: [u8; 32], value: i64) -> ParsedTx {
        ParsedTx {
            tx: Tx {
                version: 1,
                inputs: vec![Input::PrevOut {
                    prev_hash: electrumx_chain::tx::ZERO_HASH,
                    prev_idx: electrumx_chain::tx::MINUS_ONE,
                    script: Vec::new(),
                    sequence: 0,
                }],
                outputs: vec![Output::Standard {
                    value,
                    pk_script: vec![0x76, 0xa9],
                }],
                locktime: 0,
                txid: Hash(txid),
                wtxid: Hash(txid),
                extra: TxExtra::None,
            },
        }
    }

    fn spend(txid: [u8; 32], prev_txid: [u8; 32], value: i64) -> ParsedTx {
        ParsedTx {
            tx: Tx {
                version: 1,
                inputs: vec![Input::PrevOut {
                    prev_hash: prev_txid,
                    prev_idx: 0,
                    script: Vec::new(),
                    sequence: 0,
                }],
                outputs: vec![Output::Standard {
                    value,
                    pk_script: vec![0x76, 0xa9],
                }],
                locktime: 0,
                txid: Hash(txid),
                wtxid: Hash(txid),
                extra: TxExtra::None,
            },
        }
    }

    #[test]
    fn apply_then_rollback_restores_the_spent_utxo() {
        let (_dir, db) = open_tmp();
        let header0 = vec![0u8; 80];
        let tx0 = coinbase([1u8; 32], 5_000_000_000);
        let hashx = hashx_from_script(tx0.tx.outputs[0].pk_script(), SelectedCoin::HASHX_LEN);

        let (batch, effects) = db.apply_block(0, &header0, &[tx0]);
        db.commit(batch, 0, effects.next_flushed_tx_count).unwrap();
        assert_eq!(db.mined_balance(&hashx), 5_000_000_000);

        let header1 = vec![1u8; 80];
        let tx1 = spend([2u8; 32], [1u8; 32], 4_999_000_000);
        let (batch, effects) = db.apply_block(1, &header1, &[tx1]);
        db.commit(batch, 1, effects.next_flushed_tx_count).unwrap();
        assert_eq!(db.mined_balance(&hashx), 4_999_000_000);
        assert_eq!(db.height(), 1);

        let rollback = db.rollback_to(0).unwrap();
        assert_eq!(db.height(), 0);
        assert_eq!(db.mined_balance(&hashx), 5_000_000_000);
        assert_eq!(rollback.tx_count, 1);
        assert_eq!(rollback.spends, vec![(Hash([1u8; 32]), 0)]);
        assert!(rollback.tx_hashes.contains(&Hash([2u8; 32])));
    }

    #[test]
    fn rollback_rejects_a_target_at_or_above_the_tip() {
        let (_dir, db) = open_tmp();
        let tx0 = coinbase([9u8; 32], 1_000);
        let (batch, effects) = db.apply_block(0, &[0u8; 80], &[tx0]);
        db.commit(batch, 0, effects.next_flushed_tx_count).unwrap();
        assert!(db.rollback_to(0).is_err());
        assert!(db.rollback_to(5).is_err());
    }
}
