//! The block-walking task: pulls new blocks from the daemon, applies them to
//! the UTXO store and history index, and advances the controller's visible
//! chain tip. This is the third external collaborator spec.md §1 names and
//! declines to specify ("an external block processor advances the UTXO
//! database"); it's concrete here because a runnable binary needs something
//! actually driving `Controller::height` forward.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::controller::Controller;
use crate::utxo_db::RocksUtxoDb;

/// Polls the daemon for new blocks forever, applying one at a time. Falls
/// back to a fixed poll interval once caught up; catches up as fast as the
/// daemon will serve blocks otherwise.
pub async fn run_sync_loop(controller: Arc<Controller>, utxo_db: Arc<RocksUtxoDb>) -> ! {
    loop {
        match sync_one_block(&controller, &utxo_db).await {
            Ok(true) => continue,
            Ok(false) => tokio::time::sleep(Duration::from_secs(5)).await,
            Err(e) => {
                warn!(error = %e, "block sync iteration failed, retrying");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// Applies exactly one block if the daemon is ahead of the local tip.
/// Returns `Ok(true)` if a block was applied (so the caller can immediately
/// try the next one without sleeping), `Ok(false)` if already caught up.
async fn sync_one_block(
    controller: &Arc<Controller>,
    utxo_db: &Arc<RocksUtxoDb>,
) -> Result<bool, String> {
    let daemon_height = controller.daemon.height().await?;
    let local_height = utxo_db.height();
    if daemon_height <= local_height {
        return Ok(false);
    }

    let next_height = local_height + 1;
    let raw = controller.daemon.raw_block(next_height).await?;
    let (header, txs) = RocksUtxoDb::parse_raw_block(&raw, next_height)?;

    let (batch, effects) = utxo_db.apply_block(next_height, &header, &txs);

    {
        let mut history = controller.history.lock().unwrap();
        history
            .add_unflushed(
                &effects.hashxs_by_tx,
                effects.first_txnum,
                &effects.txhash_to_txnum,
                &effects.txo_to_spender,
            )
            .map_err(|e| e.to_string())?;
        // History flushes before the UTXO DB commits (spec.md §9 open
        // question (a)): a crash between the two leaves the history index
        // ahead, which `History::open`'s `clear_excess` truncates back down
        // to whatever the UTXO DB actually persisted on restart.
        history.flush().map_err(|e| e.to_string())?;
    }

    utxo_db
        .commit(batch, next_height, effects.next_flushed_tx_count)
        .map_err(|e| e.to_string())?;

    controller.height.store(next_height, Ordering::SeqCst);
    info!(height = next_height, txs = txs.len(), "applied block");
    Ok(true)
}
