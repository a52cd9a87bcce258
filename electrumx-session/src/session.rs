//! Per-connection protocol state and handler dispatch.
//!
//! One [`Session`] per accepted connection, owning its subscriptions, cost
//! accounting, and negotiated protocol version. The TCP/TLS/WebSocket
//! listener loop (in `electrumxd`) feeds it decoded request lines and writes
//! back whatever [`Session::handle_line`] returns; this crate has no
//! knowledge of sockets, mirroring how `electrumx.server.session.Session`
//! is itself transport-agnostic (the asyncio `Protocol` base handles I/O).

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use electrumx_chain::Hash;
use electrumx_history::status::{chain_confirmed_step, chain_mempool_step, hex_status, GENESIS_STATUS};
use lru::LruCache;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::ServerApi;
use crate::cost::{CostLimits, SessionCost};
use crate::error::{RpcError, CODE_REQUEST};
use crate::protocol::{parse_incoming, Incoming, Notification, Request, Response};
use crate::version::{self, ProtocolVersion};

/// The coin's hashX script identifier.
pub type HashX = Vec<u8>;

const MAX_HISTORY_ENTRIES: usize = 5_000;

fn scripthash_to_hashx(sh_hex: &str, hashx_len: usize) -> Result<HashX, RpcError> {
    let bytes = hex::decode(sh_hex)
        .map_err(|_| RpcError::bad_request("scripthash must be hex"))?;
    if bytes.len() != 32 {
        return Err(RpcError::bad_request("scripthash must be 32 bytes"));
    }
    Ok(bytes[..hashx_len].to_vec())
}

fn parse_hash(s: &str) -> Result<Hash, RpcError> {
    let bytes = hex::decode(s).map_err(|_| RpcError::bad_request("expected a tx hash"))?;
    if bytes.len() != 32 {
        return Err(RpcError::bad_request("tx hash must be 32 bytes"));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    arr.reverse(); // wire hex is big-endian display order; Hash is natural order
    Ok(Hash(arr))
}

fn hash_hex(h: &Hash) -> String {
    // Hash's Display already reverses to the conventional order.
    format!("{}", h)
}

/// `true` once a subscription's last-sent status had a mempool component
/// (an unconfirmed tx touching it), so a later height change must
/// re-examine it even if it isn't in that block's touched set.
struct HashXSub {
    scripthash: String,
    last_status: Option<String>,
    has_mempool_component: bool,
}

struct OutpointSub {
    last_status: Option<Value>,
}

#[derive(Default)]
struct Subscriptions {
    hashxs: HashMap<HashX, HashXSub>,
    outpoints: HashMap<(Hash, u32), OutpointSub>,
    headers: bool,
}

pub struct Session {
    pub id: u64,
    pub peer_addr: IpAddr,
    proto: Option<ProtocolVersion>,
    client_name: Option<String>,
    subs: Subscriptions,
    pub cost: SessionCost,
    pub group_key: String,
    last_height_sent: i32,
    estimatefee_cache: LruCache<(i32, u32, Option<String>), f64>,
    hashx_len: usize,
    pub txs_sent: u64,
}

impl Session {
    pub fn new(id: u64, peer_addr: IpAddr, group_key: String, limits: &CostLimits, hashx_len: usize) -> Self {
        Session {
            id,
            peer_addr,
            proto: None,
            client_name: None,
            subs: Subscriptions::default(),
            cost: SessionCost::new(limits.initial_concurrent),
            group_key,
            last_height_sent: -1,
            estimatefee_cache: LruCache::new(1000),
            hashx_len,
            txs_sent: 0,
        }
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.proto
    }

    fn at_least(&self, v: ProtocolVersion) -> bool {
        self.proto.map_or(false, |p| p >= v)
    }

    /// Decodes and dispatches one wire line. `disconnect` is set once the
    /// handshake rule (`server.version` must come first) is
    /// violated; the caller writes `lines` back and then tears the
    /// connection down, mirroring `_do_crash_old_electrum_client`.
    pub async fn handle_line(&mut self, line: &str, api: &dyn ServerApi) -> HandleResult {
        let incoming = match parse_incoming(line) {
            Ok(i) => i,
            Err(e) => {
                let resp = Response::err(Value::Null, CODE_REQUEST, format!("invalid request: {}", e));
                return HandleResult::reply(serde_json::to_string(&resp).unwrap());
            }
        };

        match incoming {
            Incoming::Single(req) => match self.dispatch_with_handshake(req, api).await {
                Ok(resp) => HandleResult::reply(serde_json::to_string(&resp).unwrap()),
                Err(reply) => {
                    let mut lines: Vec<String> = reply
                        .response
                        .map(|r| serde_json::to_string(&r).unwrap())
                        .into_iter()
                        .collect();
                    lines.extend(reply.extra_line);
                    HandleResult::disconnect_lines(lines)
                }
            },
            Incoming::Batch(reqs) => {
                let mut responses = Vec::new();
                for req in reqs {
                    match self.dispatch_with_handshake(req, api).await {
                        Ok(resp) => responses.push(serde_json::to_value(&resp).unwrap()),
                        Err(reply) => {
                            if let Some(resp) = reply.response {
                                responses.push(serde_json::to_value(&resp).unwrap());
                            }
                            let line = serde_json::to_string(&Value::Array(responses)).unwrap();
                            return HandleResult::disconnect(Some(line));
                        }
                    }
                }
                HandleResult::reply(serde_json::to_string(&Value::Array(responses)).unwrap())
            }
        }
    }

    /// Enforces the handshake rule: `server.version` must be the
    /// first method on a connection, and any other method before it (or a
    /// repeat after it) is an error.
    async fn dispatch_with_handshake(
        &mut self,
        req: Request,
        api: &dyn ServerApi,
    ) -> Result<Response, DisconnectReply> {
        let id = req.id.clone().unwrap_or(Value::Null);

        if req.method == "server.version" {
            if self.proto.is_some() {
                return Ok(Response::err(
                    id,
                    CODE_REQUEST,
                    "server.version must not be sent twice",
                ));
            }
            return self
                .handle_version(id.clone(), req, api)
                .map_err(|e| DisconnectReply {
                    response: Some(Response::err(id, e.code, e.message)),
                    extra_line: Vec::new(),
                });
        }

        if self.proto.is_none() {
            warn!(session = self.id, method = %req.method, "method before handshake");
            if is_pre_1_0_client_method(req.method.as_str()) {
                return Err(DisconnectReply {
                    response: None,
                    extra_line: Vec::new(),
                }
                .with_extra_lines(vec![crash_old_client_line(), crash_old_client_line()]));
            }
            return Err(DisconnectReply {
                response: Some(Response::err(
                    id,
                    CODE_REQUEST,
                    "server.version must be sent first",
                )),
                extra_line: Vec::new(),
            });
        }

        match self.dispatch(req.method.as_str(), &req.params, api).await {
            Ok(result) => Ok(Response::ok(id, result)),
            Err(e) => Ok(Response::err(id, e.code, e.message)),
        }
    }

    fn handle_version(
        &mut self,
        id: Value,
        req: Request,
        api: &dyn ServerApi,
    ) -> Result<Response, RpcError> {
        let client_name = req
            .params
            .get(0)
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        if let Some(pattern) = api.drop_client_pattern() {
            let matches = regex::Regex::new(pattern)
                .map(|re| re.is_match(&client_name))
                .unwrap_or(false);
            if matches {
                return Err(RpcError::bad_request("client name is not allowed"));
            }
        }
        let versions: Vec<String> = match req.params.get(1) {
            None => vec!["1.4".to_string()],
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().unwrap_or("").to_string())
                .collect(),
            _ => return Err(RpcError::bad_request("invalid protocol_version")),
        };
        let negotiated = version::negotiate(&versions)?;
        self.proto = Some(negotiated);
        self.client_name = Some(client_name);
        Ok(Response::ok(
            id,
            json!([api.server_version_string(), version::format(negotiated)]),
        ))
    }

    async fn dispatch(
        &mut self,
        method: &str,
        params: &[Value],
        api: &dyn ServerApi,
    ) -> Result<Value, RpcError> {
        self.cost.bump(cost_of(method));
        match method {
            "server.ping" => Ok(Value::Null),
            "server.banner" => Ok(json!(api.banner())),
            "server.donation_address" => Ok(json!(api.donation_address())),
            "server.features" => Ok(self.features_json(api)),
            "server.peers.subscribe" => Ok(json!(api.peers_subscribe())),
            "server.add_peer" => {
                let features = params.get(0).cloned().unwrap_or(Value::Null);
                Ok(json!(api.add_peer(features)))
            }
            "blockchain.relayfee" => api
                .relayfee()
                .await
                .map(|f| json!(f))
                .map_err(RpcError::daemon),
            "blockchain.estimatefee" => self.handle_estimatefee(params, api).await,
            "blockchain.block.header" => self.handle_block_header(params, api),
            "blockchain.block.headers" => self.handle_block_headers(params, api),
            "blockchain.headers.subscribe" => {
                self.subs.headers = true;
                self.last_height_sent = api.height();
                Ok(self.header_payload(api.height(), api))
            }
            "blockchain.scripthash.get_balance" => self.handle_get_balance(params, api),
            "blockchain.scripthash.listunspent" => self.handle_listunspent(params, api),
            "blockchain.scripthash.get_history" => self.handle_get_history(params, api),
            "blockchain.scripthash.get_mempool" => self.handle_get_mempool(params, api),
            "blockchain.scripthash.subscribe" => self.handle_scripthash_subscribe(params, api),
            "blockchain.scripthash.unsubscribe" => self.handle_scripthash_unsubscribe(params),
            "blockchain.outpoint.subscribe" => self.handle_outpoint_subscribe(params, api),
            "blockchain.outpoint.unsubscribe" => self.handle_outpoint_unsubscribe(params),
            "blockchain.transaction.broadcast" => self.handle_broadcast(params, api).await,
            "blockchain.transaction.get" => self.handle_transaction_get(params, api).await,
            "blockchain.transaction.get_merkle" => self.handle_get_merkle(params, api),
            "blockchain.transaction.id_from_pos" => self.handle_id_from_pos(params, api),
            "mempool.get_fee_histogram" => Ok(json!(api.mempool_fee_histogram())),
            _ => {
                if method.starts_with("masternode.") {
                    if let Some(dash) = api.as_dash() {
                        if let Some(result) = crate::dash::dispatch_dash(dash, method, params).await {
                            return result;
                        }
                    }
                }
                Err(RpcError::bad_request(format!("unknown method: {}", method)))
            }
        }
    }

    fn features_json(&self, api: &dyn ServerApi) -> Value {
        let f = api.features();
        json!({
            "server_version": f.server_version,
            "protocol_min": version::format(f.protocol_min),
            "protocol_max": version::format(f.protocol_max),
            "genesis_hash": hash_hex(&f.genesis_hash),
            "hash_function": f.hash_function,
            "services": f.services,
            "pruning": f.pruning,
        })
    }

    async fn handle_estimatefee(&mut self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let n = params
            .get(0)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::bad_request("estimatefee requires a block count"))? as u32;
        let mode = params.get(1).and_then(|v| v.as_str()).map(|s| s.to_string());
        let tip = api.height();
        let key = (tip, n, mode.clone());
        if let Some(&cached) = self.estimatefee_cache.get(&key) {
            return Ok(json!(cached));
        }
        let fee = api
            .estimatefee(n, mode.as_deref())
            .await
            .map_err(RpcError::daemon)?;
        self.estimatefee_cache.put(key, fee);
        Ok(json!(fee))
    }

    fn handle_block_header(&self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let height = params
            .get(0)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| RpcError::bad_request("block.header requires a height"))? as i32;
        let cp_height = params.get(1).and_then(|v| v.as_i64()).unwrap_or(0) as i32;
        let header = api
            .block_header(height)
            .ok_or_else(|| RpcError::bad_request(format!("no header at height {}", height)))?;
        if cp_height == 0 {
            return Ok(json!(hex::encode(header)));
        }
        let (branch, root) = api
            .header_merkle_branch(height, cp_height)
            .ok_or_else(|| RpcError::bad_request("cp_height is below the requested height"))?;
        Ok(json!({
            "header": hex::encode(header),
            "branch": branch.iter().map(hash_hex).collect::<Vec<_>>(),
            "root": hash_hex(&root),
        }))
    }

    fn handle_block_headers(&self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let start_height = params
            .get(0)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| RpcError::bad_request("block.headers requires a start height"))? as i32;
        let count = params
            .get(1)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::bad_request("block.headers requires a count"))? as i32;
        const MAX_CHUNK: i32 = 2016;
        let count = count.min(MAX_CHUNK);

        let mut headers = Vec::new();
        for h in start_height..start_height + count {
            match api.block_header(h) {
                Some(bytes) => headers.push(bytes),
                None => break,
            }
        }

        let mut out = json!({
            "count": headers.len(),
            "max": MAX_CHUNK,
        });
        if self.at_least((1, 5)) {
            out["headers"] = json!(headers.iter().map(hex::encode).collect::<Vec<_>>());
        } else {
            out["hex"] = json!(headers.iter().map(hex::encode).collect::<String>());
        }

        let cp_height = params.get(2).and_then(|v| v.as_i64()).unwrap_or(0) as i32;
        if cp_height != 0 && !headers.is_empty() {
            let last_height = start_height + headers.len() as i32 - 1;
            if let Some((branch, root)) = api.header_merkle_branch(last_height, cp_height) {
                out["branch"] = json!(branch.iter().map(hash_hex).collect::<Vec<_>>());
                out["root"] = json!(hash_hex(&root));
            }
        }
        Ok(out)
    }

    fn header_payload(&self, height: i32, api: &dyn ServerApi) -> Value {
        match api.block_header(height) {
            Some(bytes) => json!({"hex": hex::encode(bytes), "height": height}),
            None => Value::Null,
        }
    }

    fn handle_get_balance(&self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let hashx = self.parse_scripthash_param(params)?;
        let confirmed = api.mined_balance(&hashx);
        let unconfirmed = api.mempool_balance_delta(&hashx);
        Ok(json!({"confirmed": confirmed, "unconfirmed": unconfirmed}))
    }

    fn handle_listunspent(&self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let hashx = self.parse_scripthash_param(params)?;
        let spent_in_mempool = api.mempool_potential_spends(&hashx);

        let mut utxos: Vec<Value> = api
            .mined_utxos(&hashx)
            .into_iter()
            .filter(|u| !spent_in_mempool.contains(&(u.tx_hash, u.tx_pos)))
            .map(|u| {
                json!({
                    "tx_hash": hash_hex(&u.tx_hash),
                    "tx_pos": u.tx_pos,
                    "height": u.height,
                    "value": u.value,
                })
            })
            .collect();

        utxos.extend(
            api.mempool_unordered_utxos(&hashx)
                .into_iter()
                .filter(|u| !spent_in_mempool.contains(&(u.tx_hash, u.tx_pos)))
                .map(|u| {
                    json!({
                        "tx_hash": hash_hex(&u.tx_hash),
                        "tx_pos": u.tx_pos,
                        "height": u.height,
                        "value": u.value,
                    })
                }),
        );
        Ok(json!(utxos))
    }

    fn handle_get_history(&self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let hashx = self.parse_scripthash_param(params)?;
        let from_height = params.get(1).and_then(|v| v.as_i64()).unwrap_or(0) as i32;
        let to_height = params.get(2).and_then(|v| v.as_i64()).map(|v| v as i32);

        let mut confirmed = api.confirmed_history(&hashx, from_height.max(0), to_height);
        let truncated = confirmed.len() > MAX_HISTORY_ENTRIES;
        confirmed.truncate(MAX_HISTORY_ENTRIES);
        let actual_to_height = confirmed.last().map(|(_, h)| *h);

        let mut entries: Vec<Value> = confirmed
            .iter()
            .map(|(tx_hash, height)| json!({"tx_hash": hash_hex(tx_hash), "height": height}))
            .collect();

        if !truncated {
            for tx in api.mempool_transaction_summaries(&hashx) {
                let height = if tx.has_unconfirmed_inputs { -1 } else { 0 };
                entries.push(json!({
                    "tx_hash": hash_hex(&tx.hash),
                    "height": height,
                    "fee": tx.fee,
                }));
            }
        }

        if self.at_least((1, 5)) {
            Ok(json!({
                "from_height": from_height,
                "to_height": actual_to_height.map(|h| h + 1).unwrap_or(from_height),
                "history": entries,
            }))
        } else {
            Ok(json!(entries))
        }
    }

    fn handle_get_mempool(&self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let hashx = self.parse_scripthash_param(params)?;
        let entries: Vec<Value> = api
            .mempool_transaction_summaries(&hashx)
            .into_iter()
            .map(|tx| {
                let height = if tx.has_unconfirmed_inputs { -1 } else { 0 };
                json!({"tx_hash": hash_hex(&tx.hash), "height": height, "fee": tx.fee})
            })
            .collect();
        Ok(json!(entries))
    }

    fn handle_scripthash_subscribe(&mut self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let sh = params
            .get(0)
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::bad_request("subscribe requires a scripthash"))?
            .to_string();
        let hashx = scripthash_to_hashx(&sh, self.hashx_len)?;
        let (status, has_mempool) = self.compute_status(&hashx, api);
        // Only persist the subscription once the status computed cleanly,
        // matching the upstream's "register after a successful compute".
        self.subs.hashxs.insert(
            hashx,
            HashXSub {
                scripthash: sh,
                last_status: status.clone(),
                has_mempool_component: has_mempool,
            },
        );
        Ok(status.map(|s| json!(s)).unwrap_or(Value::Null))
    }

    fn handle_scripthash_unsubscribe(&mut self, params: &[Value]) -> Result<Value, RpcError> {
        let sh = params
            .get(0)
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::bad_request("unsubscribe requires a scripthash"))?;
        let hashx = scripthash_to_hashx(sh, self.hashx_len)?;
        Ok(json!(self.subs.hashxs.remove(&hashx).is_some()))
    }

    fn handle_outpoint_subscribe(&mut self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let tx_hash = parse_hash(
            params
                .get(0)
                .and_then(|v| v.as_str())
                .ok_or_else(|| RpcError::bad_request("outpoint.subscribe requires a tx hash"))?,
        )?;
        let idx = params
            .get(1)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::bad_request("outpoint.subscribe requires an index"))? as u32;
        let status = self.compute_outpoint_status(tx_hash, idx, api);
        self.subs.outpoints.insert(
            (tx_hash, idx),
            OutpointSub {
                last_status: status.clone(),
            },
        );
        Ok(status.unwrap_or(Value::Null))
    }

    fn handle_outpoint_unsubscribe(&mut self, params: &[Value]) -> Result<Value, RpcError> {
        let tx_hash = parse_hash(
            params
                .get(0)
                .and_then(|v| v.as_str())
                .ok_or_else(|| RpcError::bad_request("outpoint.unsubscribe requires a tx hash"))?,
        )?;
        let idx = params
            .get(1)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::bad_request("outpoint.unsubscribe requires an index"))? as u32;
        Ok(json!(self.subs.outpoints.remove(&(tx_hash, idx)).is_some()))
    }

    async fn handle_broadcast(&mut self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let hex_tx = params
            .get(0)
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::bad_request("broadcast requires raw tx hex"))?;
        let raw = hex::decode(hex_tx).map_err(|_| RpcError::bad_request("invalid tx hex"))?;
        let txid = api
            .broadcast_transaction(raw)
            .await
            .map_err(RpcError::daemon)?;
        self.txs_sent += 1;
        api.record_tx_sent();
        Ok(json!(hash_hex(&txid)))
    }

    async fn handle_transaction_get(&mut self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let tx_hash = parse_hash(
            params
                .get(0)
                .and_then(|v| v.as_str())
                .ok_or_else(|| RpcError::bad_request("transaction.get requires a tx hash"))?,
        )?;
        let verbose = params.get(1).and_then(|v| v.as_bool()).unwrap_or(false);
        api.raw_transaction(tx_hash, verbose)
            .await
            .map_err(RpcError::daemon)
    }

    fn handle_get_merkle(&mut self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let tx_hash = parse_hash(
            params
                .get(0)
                .and_then(|v| v.as_str())
                .ok_or_else(|| RpcError::bad_request("get_merkle requires a tx hash"))?,
        )?;
        let height = match params.get(1).and_then(|v| v.as_i64()) {
            Some(h) => h as i32,
            None => api
                .confirmed_height_of(tx_hash)
                .ok_or_else(|| RpcError::bad_request("tx not found in a mined block"))?,
        };
        let leaves = api
            .tx_hashes_at_height(height)
            .ok_or_else(|| RpcError::bad_request(format!("no block at height {}", height)))?;
        let pos = leaves
            .iter()
            .position(|h| *h == tx_hash)
            .ok_or_else(|| RpcError::bad_request("tx not found at that height"))?;
        let (branch, _root) = crate::merkle::branch_and_root(&leaves, pos);
        Ok(json!({
            "block_height": height,
            "pos": pos,
            "merkle": branch.iter().map(hash_hex).collect::<Vec<_>>(),
        }))
    }

    fn handle_id_from_pos(&mut self, params: &[Value], api: &dyn ServerApi) -> Result<Value, RpcError> {
        let height = params
            .get(0)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| RpcError::bad_request("id_from_pos requires a height"))? as i32;
        let pos = params
            .get(1)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::bad_request("id_from_pos requires a position"))? as usize;
        let want_merkle = params.get(2).and_then(|v| v.as_bool()).unwrap_or(false);

        let leaves = api
            .tx_hashes_at_height(height)
            .ok_or_else(|| RpcError::bad_request(format!("no block at height {}", height)))?;
        let tx_hash = *leaves
            .get(pos)
            .ok_or_else(|| RpcError::bad_request("position out of range"))?;

        if !want_merkle {
            return Ok(json!(hash_hex(&tx_hash)));
        }
        let (branch, _root) = crate::merkle::branch_and_root(&leaves, pos);
        Ok(json!({
            "tx_hash": hash_hex(&tx_hash),
            "merkle": branch.iter().map(hash_hex).collect::<Vec<_>>(),
        }))
    }

    fn parse_scripthash_param(&self, params: &[Value]) -> Result<HashX, RpcError> {
        let sh = params
            .get(0)
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::bad_request("expected a scripthash"))?;
        scripthash_to_hashx(sh, self.hashx_len)
    }

    /// The status-hash chain: confirmed history
    /// first (ascending tx order), then mempool entries. Returns `None` if
    /// hashx has no history at all (client gets `null`).
    fn compute_status(&self, hashx: &[u8], api: &dyn ServerApi) -> (Option<String>, bool) {
        let confirmed = api.confirmed_history(hashx, 0, None);
        let mempool = api.mempool_transaction_summaries(hashx);
        if confirmed.is_empty() && mempool.is_empty() {
            return (None, false);
        }
        let mut chain = GENESIS_STATUS;
        for (tx_hash, height) in &confirmed {
            chain = chain_confirmed_step(&chain, tx_hash, *height);
        }
        for tx in &mempool {
            let height = if tx.has_unconfirmed_inputs { -1 } else { 0 };
            chain = chain_mempool_step(&chain, &tx.hash, height, tx.fee);
        }
        (Some(hex_status(&chain)), !mempool.is_empty())
    }

    fn compute_outpoint_status(&self, tx_hash: Hash, idx: u32, api: &dyn ServerApi) -> Option<Value> {
        let height: i32 = if let Some(h) = api.confirmed_height_of(tx_hash) {
            if !api.confirmed_txo_exists(tx_hash, idx) {
                return None;
            }
            h
        } else if api.mempool_txo_exists(tx_hash, idx) {
            0
        } else {
            return None;
        };

        let (spender_hash, spender_height) =
            if let Some((spender, sheight)) = api.confirmed_spender(tx_hash, idx) {
                (Some(spender), Some(sheight))
            } else if let Some(spender) = api.mempool_spender_for_txo(tx_hash, idx) {
                (Some(spender), Some(0))
            } else {
                (None, None)
            };

        Some(json!({
            "height": height,
            "spender_txhash": spender_hash.as_ref().map(hash_hex),
            "spender_height": spender_height,
        }))
    }

    /// The notification fan-out: headers push, then
    /// touched-hashX and touched-outpoint recomputation.
    pub fn notify(
        &mut self,
        height: i32,
        touched_hashxs: &HashSet<HashX>,
        touched_outpoints: &HashSet<(Hash, u32)>,
        api: &dyn ServerApi,
    ) -> Vec<Notification> {
        let mut out = Vec::new();
        let height_changed = height != self.last_height_sent;

        if height_changed && self.subs.headers {
            out.push(Notification::new(
                "blockchain.headers.subscribe",
                vec![self.header_payload(height, api)],
            ));
        }

        let mut to_check: HashSet<HashX> = self
            .subs
            .hashxs
            .keys()
            .filter(|h| touched_hashxs.contains(h.as_slice()))
            .cloned()
            .collect();
        if height_changed {
            to_check.extend(
                self.subs
                    .hashxs
                    .iter()
                    .filter(|(_, sub)| sub.has_mempool_component)
                    .map(|(h, _)| h.clone()),
            );
        }
        for hashx in to_check {
            let (status, has_mempool) = self.compute_status(&hashx, api);
            let sub = self.subs.hashxs.get_mut(&hashx).expect("checked subscribed");
            if sub.last_status != status {
                sub.last_status = status.clone();
                sub.has_mempool_component = has_mempool;
                out.push(Notification::new(
                    "blockchain.scripthash.subscribe",
                    vec![json!(sub.scripthash), status.map(Value::String).unwrap_or(Value::Null)],
                ));
            } else {
                sub.has_mempool_component = has_mempool;
            }
        }

        let keys: Vec<(Hash, u32)> = self.subs.outpoints.keys().copied().collect();
        for key in keys {
            if !touched_outpoints.contains(&key) && !height_changed {
                continue;
            }
            let status = self.compute_outpoint_status(key.0, key.1, api);
            let sub = self.subs.outpoints.get_mut(&key).expect("checked subscribed");
            if sub.last_status != status {
                sub.last_status = status.clone();
                out.push(Notification::new(
                    "blockchain.outpoint.subscribe",
                    vec![
                        json!(hash_hex(&key.0)),
                        json!(key.1),
                        status.unwrap_or(Value::Null),
                    ],
                ));
            }
        }

        self.last_height_sent = height;
        debug!(session = self.id, notifications = out.len(), "notify");
        out
    }

    /// Clears subscription status caches without dropping the subscriptions
    /// themselves, for use after a reorg (the eviction note: the
    /// session layer must force a recompute since the status cache isn't
    /// explicitly invalidated at the history layer).
    pub fn invalidate_status_cache(&mut self) {
        for sub in self.subs.hashxs.values_mut() {
            sub.last_status = None;
        }
        for sub in self.subs.outpoints.values_mut() {
            sub.last_status = None;
        }
    }
}

struct DisconnectReply {
    response: Option<Response>,
    extra_line: Vec<String>,
}

impl DisconnectReply {
    fn with_extra_lines(mut self, lines: Vec<String>) -> Self {
        self.extra_line = lines;
        self
    }
}

/// What [`Session::handle_line`] wants written back, and whether the
/// transport should then close the connection.
pub struct HandleResult {
    pub lines: Vec<String>,
    pub disconnect: bool,
}

impl HandleResult {
    fn reply(line: String) -> Self {
        HandleResult {
            lines: vec![line],
            disconnect: false,
        }
    }

    fn disconnect(line: Option<String>) -> Self {
        HandleResult {
            lines: line.into_iter().collect(),
            disconnect: true,
        }
    }

    fn disconnect_lines(lines: Vec<String>) -> Self {
        HandleResult {
            lines,
            disconnect: true,
        }
    }
}

/// Method names only a pre-1.0 ElectrumX client (predating the
/// scripthash-keyed protocol) would ever send before `server.version`.
/// A modern client sends `server.version` first unconditionally, so seeing
/// one of these bare is itself the tell.
fn is_pre_1_0_client_method(method: &str) -> bool {
    matches!(
        method,
        "blockchain.numblocks.subscribe"
            | "blockchain.address.subscribe"
            | "blockchain.address.get_history"
    )
}

/// Mirrors `_do_crash_old_electrum_client`: a second, malformed line sent
/// immediately alongside the disconnect error. Old client versions
/// (pre-2.7) choke on the unexpected extra framing and exit instead of
/// retrying forever against a server they can't actually talk to.
fn crash_old_client_line() -> String {
    json!({"id": Value::Null, "error": "blockchain.address.* have been removed, update your client", "result": Value::Null}).to_string()
}

/// Per-handler cost weights (DESIGN.md supplemented feature
/// #1): a flat per-request baseline plus a few handlers the upstream
/// weights heavier because they imply daemon or DB work proportional to the
/// request rather than O(1).
fn cost_of(method: &str) -> f64 {
    match method {
        "blockchain.transaction.broadcast" => 1000.0,
        "blockchain.scripthash.get_history" | "blockchain.scripthash.listunspent" => 250.0,
        "blockchain.block.headers" => 100.0,
        "mempool.get_fee_histogram" => 100.0,
        _ => 10.0,
    }
}
