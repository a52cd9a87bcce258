//! The notifications coalescer: hashX/outpoint touch-sets
//! arrive from two independent, differently-paced sources — the mempool's
//! refresh loop and the block processor — and must be merged into exactly
//! one notification per height, never zero and never two.
//!
//! Ported from `electrumx.server.controller.Notifications`. The release
//! policy (both conditions in [`Notifications::maybe_notify`]) is copied
//! verbatim from the original rather than re-derived, since it encodes a
//! timing subtlety (the mempool often refreshes ahead of the block
//! processor finishing) that isn't obvious from first principles.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use electrumx_chain::Hash;
use tracing::debug;

/// The coin's hashX script identifier; see `electrumx_chain::coin::hashx_from_script`.
pub type HashX = Vec<u8>;

/// Delivers one coalesced notification per height to the session fabric.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify(
        &self,
        height: i32,
        touched_hashxs: HashSet<HashX>,
        touched_outpoints: HashSet<(Hash, u32)>,
    );
}

/// Coalesces touch-sets from the mempool (`mp`) and block processor (`bp`)
/// by height, releasing a merged set once both sides agree a height is
/// settled.
pub struct Notifications {
    touched_hashxs_mp: BTreeMap<i32, HashSet<HashX>>,
    touched_hashxs_bp: BTreeMap<i32, HashSet<HashX>>,
    touched_outpoints_mp: BTreeMap<i32, HashSet<(Hash, u32)>>,
    touched_outpoints_bp: BTreeMap<i32, HashSet<(Hash, u32)>>,
    highest_block: i32,
    sink: Option<Arc<dyn NotifySink>>,
}

impl Default for Notifications {
    fn default() -> Self {
        Notifications {
            touched_hashxs_mp: BTreeMap::new(),
            touched_hashxs_bp: BTreeMap::new(),
            touched_outpoints_mp: BTreeMap::new(),
            touched_outpoints_bp: BTreeMap::new(),
            highest_block: -1,
            sink: None,
        }
    }
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the block processor's starting height and installs the
    /// sink, then fires one empty notification at that height (so the
    /// session fabric's first status computation has a baseline).
    pub async fn start(&mut self, height: i32, sink: Arc<dyn NotifySink>) {
        self.highest_block = height;
        self.sink = Some(sink);
        self.emit(height, HashSet::new(), HashSet::new()).await;
    }

    pub async fn on_mempool(
        &mut self,
        touched_hashxs: HashSet<HashX>,
        touched_outpoints: HashSet<(Hash, u32)>,
        height: i32,
    ) {
        self.touched_hashxs_mp.insert(height, touched_hashxs);
        self.touched_outpoints_mp.insert(height, touched_outpoints);
        self.maybe_notify().await;
    }

    pub async fn on_block(
        &mut self,
        touched_hashxs: HashSet<HashX>,
        touched_outpoints: HashSet<(Hash, u32)>,
        height: i32,
    ) {
        self.touched_hashxs_bp.insert(height, touched_hashxs);
        self.touched_outpoints_bp.insert(height, touched_outpoints);
        self.highest_block = height;
        self.maybe_notify().await;
    }

    /// Release iff (a) some height has been reported by both the mempool
    /// and the block processor, or (b) the block processor hasn't reported
    /// anything yet and the mempool's highest reported height is the
    /// block processor's current tip. Otherwise wait for more data.
    async fn maybe_notify(&mut self) {
        let height = match self.release_height() {
            Some(h) => h,
            None => return,
        };

        let mut touched_hashxs = self
            .touched_hashxs_mp
            .remove(&height)
            .expect("release_height only returns heights present in touched_hashxs_mp");
        self.touched_hashxs_mp.retain(|&h, _| h > height);

        let stale_bp: Vec<i32> = self
            .touched_hashxs_bp
            .range(..=height)
            .map(|(&h, _)| h)
            .collect();
        for old in stale_bp {
            if let Some(set) = self.touched_hashxs_bp.remove(&old) {
                touched_hashxs.extend(set);
            }
        }

        let mut touched_outpoints = self
            .touched_outpoints_mp
            .remove(&height)
            .expect("touched_outpoints_mp is always set alongside touched_hashxs_mp");
        self.touched_outpoints_mp.retain(|&h, _| h > height);
        let stale_obp: Vec<i32> = self
            .touched_outpoints_bp
            .range(..=height)
            .map(|(&h, _)| h)
            .collect();
        for old in stale_obp {
            if let Some(set) = self.touched_outpoints_bp.remove(&old) {
                touched_outpoints.extend(set);
            }
        }

        self.emit(height, touched_hashxs, touched_outpoints).await;
    }

    fn release_height(&self) -> Option<i32> {
        let common_max = self
            .touched_hashxs_mp
            .keys()
            .filter(|h| self.touched_hashxs_bp.contains_key(h))
            .max()
            .copied();
        if let Some(h) = common_max {
            return Some(h);
        }
        if let Some(&max_mp) = self.touched_hashxs_mp.keys().max() {
            if max_mp == self.highest_block {
                return Some(max_mp);
            }
        }
        None
    }

    async fn emit(
        &self,
        height: i32,
        touched_hashxs: HashSet<HashX>,
        touched_outpoints: HashSet<(Hash, u32)>,
    ) {
        debug!(height, hashxs = touched_hashxs.len(), "releasing notification");
        if let Some(sink) = &self.sink {
            sink.notify(height, touched_hashxs, touched_outpoints).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        notified: StdMutex<Vec<(i32, HashSet<HashX>)>>,
    }

    #[async_trait]
    impl NotifySink for RecordingSink {
        async fn notify(
            &self,
            height: i32,
            touched_hashxs: HashSet<HashX>,
            _touched_outpoints: HashSet<(Hash, u32)>,
        ) {
            self.notified.lock().unwrap().push((height, touched_hashxs));
        }
    }

    fn set(items: &[&[u8]]) -> HashSet<HashX> {
        items.iter().map(|b| b.to_vec()).collect()
    }

    #[tokio::test]
    async fn simple_mempool_then_block_merges_at_common_height() {
        let mut n = Notifications::new();
        let sink = Arc::new(RecordingSink::default());
        n.start(5, sink.clone()).await;

        let mtouched = set(&[b"a", b"b"]);
        let btouched = set(&[b"b", b"c"]);

        n.on_mempool(mtouched.clone(), HashSet::new(), 6).await;
        assert_eq!(sink.notified.lock().unwrap().as_slice(), &[(5, set(&[]))]);

        n.on_block(btouched.clone(), HashSet::new(), 6).await;
        let expected_union: HashSet<HashX> = mtouched.union(&btouched).cloned().collect();
        assert_eq!(
            sink.notified.lock().unwrap().as_slice(),
            &[(5, set(&[])), (6, expected_union)]
        );
    }

    #[tokio::test]
    async fn mempool_ahead_of_quick_blocks_waits_for_block_processor() {
        let mut n = Notifications::new();
        let sink = Arc::new(RecordingSink::default());
        n.start(5, sink.clone()).await;

        // a gets in block 6, but blocks 6,7,8 end up processed together.
        n.on_mempool(set(&[b"a"]), HashSet::new(), 5).await;
        assert_eq!(
            sink.notified.lock().unwrap().as_slice(),
            &[(5, set(&[])), (5, set(&[b"a"]))]
        );

        n.on_mempool(set(&[b"a"]), HashSet::new(), 6).await;
        assert_eq!(sink.notified.lock().unwrap().len(), 2);

        n.on_block(set(&[b"a", b"b"]), HashSet::new(), 7).await;
        assert_eq!(sink.notified.lock().unwrap().len(), 2);

        n.on_block(set(&[b"c"]), HashSet::new(), 8).await;
        assert_eq!(sink.notified.lock().unwrap().len(), 2);

        n.on_mempool(HashSet::new(), HashSet::new(), 8).await;
        assert_eq!(
            sink.notified.lock().unwrap().as_slice(),
            &[
                (5, set(&[])),
                (5, set(&[b"a"])),
                (8, set(&[b"a", b"b", b"c"])),
            ]
        );
    }
}
