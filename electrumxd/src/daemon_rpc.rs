//! The concrete [`DaemonRpc`]: a JSON-RPC-over-HTTP client against the coin
//! daemon, built on the `jsonrpc` crate's `simple_http` transport. That
//! transport blocks the calling thread, so every call is dispatched through
//! `spawn_blocking` rather than given its own connection-pooled async client
//! — matching the synchronous-daemon-call shape `electrumx.daemon.Daemon`
//! itself has, just moved off the async executor instead of off a thread
//! pool the interpreter already owned.

use std::sync::Arc;

use async_trait::async_trait;
use electrumx_chain::Hash;
use jsonrpc::simple_http::SimpleHttpTransport;
use jsonrpc::Client as RpcClient;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::collaborators::DaemonRpc;

/// Reverses a big-endian hex txid/blockhash string into the little-endian
/// [`Hash`] storage order every other crate in this workspace uses.
fn hash_from_hex(s: &str) -> Result<Hash, String> {
    let mut bytes = hex::decode(s).map_err(|e| format!("invalid hash hex {:?}: {}", s, e))?;
    if bytes.len() != 32 {
        return Err(format!("expected a 32-byte hash, got {} bytes", bytes.len()));
    }
    bytes.reverse();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(Hash(out))
}

pub struct HttpDaemon {
    client: Arc<RpcClient>,
    url: String,
}

impl HttpDaemon {
    pub fn new(url: &str) -> Result<Self, String> {
        let transport = SimpleHttpTransport::builder()
            .url(url)
            .map_err(|e| format!("invalid daemon url {}: {}", url, e))?
            .build();
        Ok(HttpDaemon {
            client: Arc::new(RpcClient::with_transport(transport)),
            url: url.to_string(),
        })
    }

    /// Runs one JSON-RPC call on a blocking thread and deserializes its
    /// result. `method`/`params` are cloned into the blocking closure since
    /// `jsonrpc::Client` isn't `Send`-safe to borrow across an `.await`.
    async fn call<T>(&self, method: &'static str, params: Vec<Value>) -> Result<T, String>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            let raw_params = serde_json::value::to_raw_value(&params).map_err(|e| e.to_string())?;
            let request = client.build_request(method, Some(&raw_params));
            let response = client.send_request(request).map_err(|e| e.to_string())?;
            response.result::<T>().map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| format!("daemon call '{}' panicked: {}", method, e))?
    }
}

#[async_trait]
impl DaemonRpc for HttpDaemon {
    async fn height(&self) -> Result<i32, String> {
        let height: i64 = self.call("getblockcount", vec![]).await?;
        Ok(height as i32)
    }

    async fn mempool_hashes(&self) -> Result<Vec<Hash>, String> {
        let txids: Vec<String> = self.call("getrawmempool", vec![Value::Bool(false)]).await?;
        txids.iter().map(|s| hash_from_hex(s)).collect()
    }

    async fn raw_transactions(&self, hashes: &[Hash]) -> Result<Vec<Option<Vec<u8>>>, String> {
        let mut out = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let params = vec![Value::String(hash.to_string()), Value::Bool(false)];
            match self.call::<String>("getrawtransaction", params).await {
                Ok(hex_tx) => out.push(hex::decode(hex_tx).ok()),
                Err(_) => out.push(None),
            }
        }
        Ok(out)
    }

    async fn raw_block(&self, height: i32) -> Result<Vec<u8>, String> {
        let block_hash: String = self
            .call("getblockhash", vec![Value::from(height)])
            .await?;
        // Verbosity 0 returns the block pre-serialized exactly as
        // spec.md §6 expects: header || varint(tx_count) || txs.
        let raw_hex: String = self
            .call("getblock", vec![Value::String(block_hash), Value::from(0)])
            .await?;
        hex::decode(raw_hex).map_err(|e| e.to_string())
    }

    async fn broadcast_transaction(&self, raw_tx: &[u8]) -> Result<Hash, String> {
        let txid: String = self
            .call("sendrawtransaction", vec![Value::String(hex::encode(raw_tx))])
            .await?;
        hash_from_hex(&txid)
    }

    async fn estimate_fee(&self, blocks: u32, mode: Option<&str>) -> Result<f64, String> {
        let mut params = vec![Value::from(blocks)];
        if let Some(mode) = mode {
            params.push(Value::String(mode.to_string()));
        }
        let result: Value = self.call("estimatesmartfee", params).await?;
        result
            .get("feerate")
            .and_then(Value::as_f64)
            .ok_or_else(|| "estimatesmartfee response had no feerate".to_string())
    }

    async fn relay_fee(&self) -> Result<f64, String> {
        let info: Value = self.call("getnetworkinfo", vec![]).await?;
        info.get("relayfee")
            .and_then(Value::as_f64)
            .ok_or_else(|| "getnetworkinfo response had no relayfee".to_string())
    }

    async fn raw_transaction_verbose(&self, tx_hash: Hash) -> Result<Value, String> {
        self.call(
            "getrawtransaction",
            vec![Value::String(tx_hash.to_string()), Value::Bool(true)],
        )
        .await
    }

    fn url(&self) -> String {
        self.url.clone()
    }
}
