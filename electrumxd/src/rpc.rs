//! The local administrative RPC surface spec.md §6 names
//! (`add_peer, daemon_url, disconnect, getinfo, groups, log, peers, query,
//! reorg, sessions, stop`): a Unix-domain-socket JSON-RPC endpoint separate
//! from the public TCP session fabric, dialed by this binary's own `rpc`
//! CLI entry point rather than by Electrum clients.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use electrumx_session::api::ServerApi;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

use crate::controller::Controller;
use crate::utxo_db::RocksUtxoDb;

#[derive(serde::Deserialize)]
struct LocalRequest {
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

/// Accepts one JSON request per connection and replies with one JSON
/// response line, closing the connection afterward; there's no session
/// state to keep between administrative calls.
pub async fn serve(
    listener: UnixListener,
    controller: Arc<Controller>,
    utxo_db: Arc<RocksUtxoDb>,
    shutdown: Arc<tokio::sync::Notify>,
) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "local rpc accept failed");
                continue;
            }
        };
        let controller = controller.clone();
        let utxo_db = utxo_db.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_one(stream, &controller, &utxo_db, &shutdown).await {
                warn!(error = %e, "local rpc connection failed");
            }
        });
    }
}

async fn serve_one(
    mut stream: UnixStream,
    controller: &Arc<Controller>,
    utxo_db: &Arc<RocksUtxoDb>,
    shutdown: &Arc<tokio::sync::Notify>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<LocalRequest>(line.trim()) {
        Ok(req) => dispatch(&req.method, &req.params, controller, utxo_db, shutdown).await,
        Err(e) => json!({"error": format!("bad request: {}", e)}),
    };

    let mut out = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
    out.push('\n');
    write_half.write_all(out.as_bytes()).await?;
    write_half.flush().await
}

async fn dispatch(
    method: &str,
    params: &[Value],
    controller: &Arc<Controller>,
    utxo_db: &Arc<RocksUtxoDb>,
    shutdown: &Arc<tokio::sync::Notify>,
) -> Value {
    match method {
        "getinfo" => json!({
            "height": controller.height(),
            "daemon_url": controller.daemon.url(),
            "daemon_height": controller.daemon.height().await.ok(),
            "db_height": utxo_db.height(),
            "session_count": controller.sessions.session_count().await,
            "txs_sent": controller.txs_sent(),
            "server_version": controller.server_version_string(),
        }),
        "sessions" => json!(controller.sessions.snapshot_sessions().await),
        "groups" => json!(controller.sessions.snapshot_groups()),
        "peers" => json!(controller.peers_subscribe()),
        "daemon_url" => json!(controller.daemon.url()),
        "add_peer" => {
            let features = params.get(0).cloned().unwrap_or(Value::Null);
            json!(controller.add_peer(features))
        }
        "disconnect" => {
            let id = match params.get(0).and_then(Value::as_u64) {
                Some(id) => id,
                None => return json!({"error": "disconnect requires a numeric session id"}),
            };
            json!(controller.sessions.disconnect(id).await)
        }
        "log" => {
            let message = params.get(0).and_then(Value::as_str).unwrap_or("");
            info!(target: "electrumxd::rpc", "{}", message);
            Value::Null
        }
        "query" => {
            let hashx_hex = match params.get(0).and_then(Value::as_str) {
                Some(s) => s,
                None => return json!({"error": "query requires a hashx in hex"}),
            };
            let hashx = match hex::decode(hashx_hex) {
                Ok(h) => h,
                Err(e) => return json!({"error": format!("invalid hex: {}", e)}),
            };
            json!({
                "mined_balance": controller.mined_balance(&hashx),
                "mined_utxo_count": controller.mined_utxos(&hashx).len(),
                "mempool_balance_delta": controller.mempool_balance_delta(&hashx),
                "mempool_unordered_utxo_count": controller.mempool_unordered_utxos(&hashx).len(),
            })
        }
        "reorg" => {
            let count = params.get(0).and_then(Value::as_i64).unwrap_or(1).max(1);
            let current = controller.height();
            let target = current - count as i32;
            if target < -1 {
                return json!({"error": "reorg count exceeds the current chain height"});
            }
            match utxo_db.rollback_to(target) {
                Ok(effects) => {
                    let backup_result = {
                        let mut history = controller.history.lock().unwrap();
                        history.backup(&effects.hashxs, effects.tx_count, &effects.tx_hashes, &effects.spends)
                    };
                    match backup_result {
                        Ok(()) => {
                            controller.height.store(target, Ordering::SeqCst);
                            json!({"rolled_back_to": target})
                        }
                        Err(e) => json!({"error": format!("history backup failed: {}", e)}),
                    }
                }
                Err(e) => json!({"error": e}),
            }
        }
        "stop" => {
            shutdown.notify_waiters();
            json!("stopping")
        }
        other => json!({"error": format!("unknown method: {}", other)}),
    }
}
