//! Merkle branch construction for `blockchain.transaction.get_merkle` and
//! `blockchain.transaction.id_from_pos`, plus the per-height
//! level cache the upstream `electrumx.lib.merkle.MerkleCache` keeps so a
//! busy block's branch isn't recomputed once per request.
//!
//! This crate only computes the combinatorics; it has no opinion on where
//! leaf tx hashes come from (that's the external daemon/UTXO-DB collaborator),
//! so callers (or [`crate::api::ServerApi`]) supply them.

use std::collections::HashMap;

use electrumx_chain::hash::{sha256d, Hash};

/// Hashes a branch level up one, duplicating the trailing odd hash exactly
/// as Bitcoin's merkle root construction does.
fn next_level(level: &[Hash]) -> Vec<Hash> {
    let mut out = Vec::with_capacity((level.len() + 1) / 2);
    let mut i = 0;
    while i < level.len() {
        let left = level[i];
        let right = if i + 1 < level.len() { level[i + 1] } else { left };
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(left.as_bytes());
        buf[32..].copy_from_slice(right.as_bytes());
        out.push(sha256d(&buf));
        i += 2;
    }
    out
}

/// All levels of the tree, leaves first, root last (a single-element level).
fn levels(leaves: &[Hash]) -> Vec<Vec<Hash>> {
    let mut levels = vec![leaves.to_vec()];
    while levels.last().unwrap().len() > 1 {
        let next = next_level(levels.last().unwrap());
        levels.push(next);
    }
    levels
}

/// The branch (siblings bottom-up) and root for the leaf at `index`.
pub fn branch_and_root(leaves: &[Hash], index: usize) -> (Vec<Hash>, Hash) {
    assert!(index < leaves.len(), "merkle index out of range");
    let levels = levels(leaves);
    let mut branch = Vec::with_capacity(levels.len() - 1);
    let mut idx = index;
    for level in &levels[..levels.len() - 1] {
        let sibling = idx ^ 1;
        let sibling_hash = if sibling < level.len() {
            level[sibling]
        } else {
            level[idx]
        };
        branch.push(sibling_hash);
        idx /= 2;
    }
    let root = levels.last().unwrap()[0];
    (branch, root)
}

pub fn root(leaves: &[Hash]) -> Hash {
    levels(leaves).pop().unwrap()[0]
}

/// Caches the full level set for a height once it's been built, so repeated
/// `get_merkle`/`id_from_pos` calls against a hot block don't re-hash it.
/// The upstream only bothers caching trees of at least 200 leaves; smaller
/// blocks are cheap enough to recompute each time.
#[derive(Default)]
pub struct MerkleCache {
    trees: HashMap<i32, Vec<Vec<Hash>>>,
}

const CACHE_THRESHOLD: usize = 200;

impl MerkleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch_and_root(&mut self, height: i32, leaves: &[Hash], index: usize) -> (Vec<Hash>, Hash) {
        assert!(index < leaves.len(), "merkle index out of range");
        if leaves.len() < CACHE_THRESHOLD {
            return branch_and_root(leaves, index);
        }
        let tree = self
            .trees
            .entry(height)
            .or_insert_with(|| levels(leaves));
        let mut branch = Vec::with_capacity(tree.len() - 1);
        let mut idx = index;
        for level in &tree[..tree.len() - 1] {
            let sibling = idx ^ 1;
            let sibling_hash = if sibling < level.len() {
                level[sibling]
            } else {
                level[idx]
            };
            branch.push(sibling_hash);
            idx /= 2;
        }
        let root = tree.last().unwrap()[0];
        (branch, root)
    }

    /// Drops a height's cached tree (the block was reorged away, or the
    /// reorg-safe horizon moved past it).
    pub fn invalidate(&mut self, height: i32) {
        self.trees.remove(&height);
    }

    pub fn clear(&mut self) {
        self.trees.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Hash {
        Hash([n; 32])
    }

    #[test]
    fn single_leaf_root_is_itself() {
        let leaves = vec![leaf(1)];
        assert_eq!(root(&leaves), leaf(1));
        let (branch, r) = branch_and_root(&leaves, 0);
        assert!(branch.is_empty());
        assert_eq!(r, leaf(1));
    }

    #[test]
    fn odd_leaf_count_duplicates_the_last_hash() {
        let leaves = vec![leaf(1), leaf(2), leaf(3)];
        let dup_leaves = vec![leaf(1), leaf(2), leaf(3), leaf(3)];
        assert_eq!(root(&leaves), root(&dup_leaves));
    }

    #[test]
    fn branch_verifies_back_to_the_root() {
        let leaves: Vec<Hash> = (0..7u8).map(leaf).collect();
        let expected_root = root(&leaves);
        for index in 0..leaves.len() {
            let (branch, r) = branch_and_root(&leaves, index);
            assert_eq!(r, expected_root);

            let mut acc = leaves[index];
            let mut idx = index;
            for sibling in branch {
                let mut buf = [0u8; 64];
                if idx % 2 == 0 {
                    buf[..32].copy_from_slice(acc.as_bytes());
                    buf[32..].copy_from_slice(sibling.as_bytes());
                } else {
                    buf[..32].copy_from_slice(sibling.as_bytes());
                    buf[32..].copy_from_slice(acc.as_bytes());
                }
                acc = sha256d(&buf);
                idx /= 2;
            }
            assert_eq!(acc, expected_root);
        }
    }

    #[test]
    fn cache_is_reused_across_calls_for_large_trees() {
        let leaves: Vec<Hash> = (0..250u32).map(|n| Hash([(n % 256) as u8; 32])).collect();
        let mut cache = MerkleCache::new();
        let (b1, r1) = cache.branch_and_root(10, &leaves, 5);
        let (b2, r2) = cache.branch_and_root(10, &leaves, 5);
        assert_eq!(b1, b2);
        assert_eq!(r1, r2);
        assert_eq!(cache.trees.len(), 1);
    }
}
