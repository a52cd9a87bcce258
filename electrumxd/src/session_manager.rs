//! The TCP listener loop and per-connection session table: the transport
//! half of spec.md §4.5 that `electrumx-session` deliberately leaves out.
//! One task per accepted connection decodes/encodes lines with
//! [`electrumx_session::JsonRpcLineCodec`] and feeds them to a
//! [`electrumx_session::Session`]; this module owns the session table,
//! idle eviction, `max_sessions` backpressure, and notification fan-out.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use electrumx_chain::Hash;
use electrumx_session::cost::{group_key, CostLimits, GroupTable};
use electrumx_session::{JsonRpcLineCodec, ServerApi, Session};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::Framed;
use tracing::{info, warn};

type HashX = Vec<u8>;

struct SessionEntry {
    session: Session,
    outbound: mpsc::UnboundedSender<String>,
    peer_addr: IpAddr,
    last_activity: Instant,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionInfo {
    pub id: u64,
    pub peer_addr: String,
    pub group_key: String,
    pub cost: f64,
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GroupInfo {
    pub group_key: String,
    pub session_count: usize,
    pub retained_cost: f64,
}

/// Owns every live connection and the cost-group table they're bucketed
/// into. `max_sessions` is enforced by refusing `accept()`'d sockets once
/// the table is full, resuming once it drains to 95% (spec.md §6).
pub struct SessionManager {
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    groups: std::sync::Mutex<GroupTable>,
    limits: CostLimits,
    next_id: AtomicU64,
    max_sessions: usize,
    session_timeout: Duration,
    ipv4_prefix: u8,
    ipv6_prefix: u8,
    paused: AtomicBool,
}

impl SessionManager {
    pub fn new(
        limits: CostLimits,
        max_sessions: usize,
        session_timeout: Duration,
        ipv4_prefix: u8,
        ipv6_prefix: u8,
    ) -> Self {
        SessionManager {
            sessions: Mutex::new(HashMap::new()),
            groups: std::sync::Mutex::new(GroupTable::new()),
            limits,
            next_id: AtomicU64::new(1),
            max_sessions,
            session_timeout,
            ipv4_prefix,
            ipv6_prefix,
            paused: AtomicBool::new(false),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Accepts connections forever, pausing `listener.accept()` while the
    /// table is full and resuming once it drains to 95% of `max_sessions`.
    pub async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        api: Arc<dyn ServerApi>,
        hashx_len: usize,
    ) {
        loop {
            if self.paused.load(Ordering::Relaxed) {
                let resume_at = (self.max_sessions as f64 * 0.95) as usize;
                while self.session_count().await > resume_at {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                self.paused.store(false, Ordering::Relaxed);
            }

            let (stream, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if self.session_count().await >= self.max_sessions {
                self.paused.store(true, Ordering::Relaxed);
                warn!("max_sessions reached, pausing new connections");
                drop(stream);
                continue;
            }

            let manager = self.clone();
            let api = api.clone();
            tokio::spawn(async move {
                manager.serve_connection(stream, addr.ip(), api, hashx_len).await;
            });
        }
    }

    async fn serve_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer_addr: IpAddr,
        api: Arc<dyn ServerApi>,
        hashx_len: usize,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let group_key = group_key(peer_addr, self.ipv4_prefix, self.ipv6_prefix);
        self.groups.lock().unwrap().join(&group_key, Instant::now());

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let session = Session::new(id, peer_addr, group_key.clone(), &self.limits, hashx_len);
        self.sessions.lock().await.insert(
            id,
            SessionEntry {
                session,
                outbound: outbound_tx,
                peer_addr,
                last_activity: Instant::now(),
            },
        );
        info!(session = id, peer = %peer_addr, "session opened");

        let mut framed = Framed::new(stream, JsonRpcLineCodec::new());
        loop {
            tokio::select! {
                line = framed.next() => {
                    let line = match line {
                        Some(Ok(l)) => l,
                        Some(Err(e)) => {
                            warn!(session = id, error = %e, "codec error");
                            break;
                        }
                        None => break,
                    };
                    let mut sessions = self.sessions.lock().await;
                    let entry = match sessions.get_mut(&id) {
                        Some(e) => e,
                        None => break,
                    };
                    entry.last_activity = Instant::now();
                    let result = entry.session.handle_line(&line, &*api).await;
                    let disconnect = result.disconnect;
                    for reply in &result.lines {
                        if framed.send(reply.clone()).await.is_err() {
                            break;
                        }
                    }
                    drop(sessions);
                    if disconnect {
                        break;
                    }
                }
                Some(out) = outbound_rx.recv() => {
                    if framed.send(out).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.sessions.lock().await.remove(&id);
        self.groups.lock().unwrap().leave(&group_key);
        info!(session = id, "session closed");
    }

    /// Forcibly closes idle connections past `session_timeout`; meant to be
    /// polled periodically from the controller's idle-eviction task.
    pub async fn evict_idle(&self) {
        let cutoff = Instant::now() - self.session_timeout;
        let mut sessions = self.sessions.lock().await;
        let stale: Vec<u64> = sessions
            .iter()
            .filter(|(_, e)| e.last_activity < cutoff)
            .map(|(&id, _)| id)
            .collect();
        for id in stale {
            if let Some(entry) = sessions.remove(&id) {
                self.groups.lock().unwrap().leave(&entry.session.group_key);
                warn!(session = id, peer = %entry.peer_addr, "idle timeout");
            }
        }
    }

    /// Recomputes each group's decayed retained cost and drops empty, fully
    /// decayed groups (spec.md §5's `RECALC_PERIOD`); meant to be polled
    /// alongside `evict_idle`.
    pub fn recalc_groups(&self) {
        self.groups.lock().unwrap().collect_garbage(Instant::now(), &self.limits);
    }

    /// The notification fan-out: every session re-evaluates its
    /// subscriptions against the coalesced touched sets and pushes
    /// whatever changed over its outbound channel.
    pub async fn broadcast(
        &self,
        height: i32,
        touched_hashxs: &std::collections::HashSet<HashX>,
        touched_outpoints: &std::collections::HashSet<(Hash, u32)>,
        api: &dyn ServerApi,
    ) {
        let mut sessions = self.sessions.lock().await;
        for entry in sessions.values_mut() {
            let notifications = entry
                .session
                .notify(height, touched_hashxs, touched_outpoints, api);
            for n in notifications {
                let _ = entry.outbound.send(serde_json::to_string(&n).unwrap());
            }
        }
    }

    pub async fn invalidate_status_caches(&self) {
        let mut sessions = self.sessions.lock().await;
        for entry in sessions.values_mut() {
            entry.session.invalidate_status_cache();
        }
    }

    pub async fn disconnect(&self, session_id: u64) -> bool {
        self.sessions.lock().await.remove(&session_id).is_some()
    }

    pub async fn snapshot_sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|e| SessionInfo {
                id: e.session.id,
                peer_addr: e.peer_addr.to_string(),
                group_key: e.session.group_key.clone(),
                cost: e.session.cost.cost,
                protocol: e.session.protocol_version().map(|v| format!("{}.{}", v.0, v.1)),
            })
            .collect()
    }

    pub fn snapshot_groups(&self) -> Vec<GroupInfo> {
        self.groups
            .lock()
            .unwrap()
            .rows()
            .map(|(group_key, session_count, retained_cost)| GroupInfo {
                group_key: group_key.to_string(),
                session_count,
                retained_cost,
            })
            .collect()
    }
}
