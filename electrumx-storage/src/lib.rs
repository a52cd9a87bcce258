//! The pluggable ordered key/value abstraction this server needs: `put`,
//! `get`, forward/reverse prefix iteration, and an atomic batch. The History
//! index (`electrumx-history`) is the only consumer; everything here is
//! schema-agnostic so a different backend (LMDB, LevelDB) could be swapped in
//! without touching the index logic.

mod error;

use std::path::Path;

pub use error::StorageError;
use rocksdb::{IteratorMode, Options, WriteBatch as RocksWriteBatch, DB};

/// A key/value pair as read back from an iterator.
pub type KvPair = (Box<[u8]>, Box<[u8]>);

/// An ordered KV store with prefix iteration and atomic batch writes.
///
/// Implementors must guarantee that keys are ordered lexicographically by
/// their raw bytes, since the History index's big-endian `tx_num` packing
/// depends on byte order matching numeric order.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Iterate all keys with the given prefix in ascending order.
    fn iter_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = KvPair> + 'a>;

    /// Iterate all keys with the given prefix in descending order.
    fn iter_prefix_rev<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = KvPair> + 'a>;

    /// Iterate keys with the given prefix in ascending order, starting at or
    /// after `seek_key` (which must itself start with `prefix`).
    fn iter_prefix_from<'a>(
        &'a self,
        prefix: &[u8],
        seek_key: &[u8],
    ) -> Box<dyn Iterator<Item = KvPair> + 'a>;

    /// Atomically apply every put/delete in `batch`.
    fn write(&self, batch: WriteBatch) -> Result<(), StorageError>;
}

/// A buffered set of puts/deletes applied atomically by [`KvStore::write`].
#[derive(Default)]
pub struct WriteBatch {
    inner: RocksWriteBatch,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.inner.put(key, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.inner.delete(key);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// `rocksdb`-backed [`KvStore`]. The coin's UTXO DB is a separate, external
/// collaborator; this is only ever opened for the `hist`
/// database this schema describes.
pub struct RocksDbStore {
    db: DB,
}

impl RocksDbStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(512);
        let db = DB::open(&opts, path).map_err(|source| StorageError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { db })
    }

    /// `prefix`'s exclusive upper bound: the lexicographically smallest key
    /// that is NOT prefixed by `prefix`. `None` if `prefix` is all-`0xff`
    /// (or empty), in which case the prefix range extends to the end of the
    /// keyspace.
    fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
        let mut bound = prefix.to_vec();
        for i in (0..bound.len()).rev() {
            if bound[i] != 0xff {
                bound[i] += 1;
                bound.truncate(i + 1);
                return Some(bound);
            }
        }
        None
    }
}

impl KvStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn iter_prefix<'a>(&'a self, prefix: &[u8]) -> Box<dyn Iterator<Item = KvPair> + 'a> {
        self.iter_prefix_from(prefix, prefix)
    }

    fn iter_prefix_from<'a>(
        &'a self,
        prefix: &[u8],
        seek_key: &[u8],
    ) -> Box<dyn Iterator<Item = KvPair> + 'a> {
        let prefix = prefix.to_vec();
        let iter = self
            .db
            .iterator(IteratorMode::From(seek_key, rocksdb::Direction::Forward));
        Box::new(iter.take_while(move |(k, _)| k.starts_with(&prefix)))
    }

    fn iter_prefix_rev<'a>(&'a self, prefix: &[u8]) -> Box<dyn Iterator<Item = KvPair> + 'a> {
        let owned_prefix = prefix.to_vec();
        match Self::prefix_upper_bound(prefix) {
            Some(upper) => {
                let iter = self
                    .db
                    .iterator(IteratorMode::From(&upper, rocksdb::Direction::Reverse));
                Box::new(
                    iter.skip_while(move |(k, _)| !k.starts_with(&owned_prefix[..]))
                        .take_while(move |(k, _)| k.starts_with(prefix)),
                )
            }
            None => {
                let iter = self.db.iterator(IteratorMode::End);
                Box::new(iter.take_while(move |(k, _)| k.starts_with(&owned_prefix[..])))
            }
        }
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        self.db.write(batch.inner)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (tempdir::TempDir, RocksDbStore) {
        let dir = tempdir::TempDir::new("electrumx-storage-test").unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn prefix_iteration_is_ordered_both_directions() {
        let (_dir, store) = open_tmp();
        let mut batch = WriteBatch::new();
        for n in [1u8, 5, 3, 9, 2] {
            batch.put(&[b'H', n], b"");
        }
        batch.put(&[b'X', 1], b"unrelated");
        store.write(batch).unwrap();

        let fwd: Vec<u8> = store
            .iter_prefix(&[b'H'])
            .map(|(k, _)| k[1])
            .collect();
        assert_eq!(fwd, vec![1, 2, 3, 5, 9]);

        let rev: Vec<u8> = store
            .iter_prefix_rev(&[b'H'])
            .map(|(k, _)| k[1])
            .collect();
        assert_eq!(rev, vec![9, 5, 3, 2, 1]);
    }

    #[test]
    fn write_batch_is_atomic_and_visible_after_write() {
        let (_dir, store) = open_tmp();
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.put(b"b", b"2");
        store.write(batch).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"c").unwrap(), None);
    }

    #[test]
    fn seek_from_finds_midpoint() {
        let (_dir, store) = open_tmp();
        let mut batch = WriteBatch::new();
        for n in 0u8..10 {
            batch.put(&[b'H', n], b"");
        }
        store.write(batch).unwrap();
        let from: Vec<u8> = store
            .iter_prefix_from(&[b'H'], &[b'H', 5])
            .map(|(k, _)| k[1])
            .collect();
        assert_eq!(from, vec![5, 6, 7, 8, 9]);
    }
}
