//! DASH/SmartCash masternode passthrough handlers.
//!
//! spec.md calls these "not core" but keeps their interface in scope; the
//! upstream `DashElectrumX` subclass adds exactly three methods to the base
//! dispatcher, all of which just forward to the daemon. Kept as a separate
//! extension trait rather than folded into [`crate::api::ServerApi`] so a
//! non-Dash coin's controller never has to stub masternode methods it will
//! never receive.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcError;

/// The daemon calls `DashSessionExt::dispatch` needs, kept separate from
/// [`crate::api::ServerApi`] so implementing it is opt-in per coin.
#[async_trait]
pub trait DashSessionExt: Send + Sync {
    /// Forwards a signed masternode broadcast message to the daemon's
    /// `masternode_broadcast` RPC.
    async fn masternode_announce_broadcast(&self, signmnb: &str) -> Result<String, String>;

    /// The daemon's current masternode list, filtered to `payees` if given.
    async fn masternode_list(&self, payees: &[String]) -> Result<Value, String>;

    /// A single masternode's status by its collateral outpoint
    /// `"txid-vout"`.
    async fn masternode_subscribe(&self, collateral: &str) -> Result<Value, String>;
}

/// Dispatches a `masternode.*` method against `ext`. Returns `None` if
/// `method` isn't a masternode method, so callers can fall through to the
/// base dispatcher.
pub async fn dispatch_dash(
    ext: &dyn DashSessionExt,
    method: &str,
    params: &[Value],
) -> Option<Result<Value, RpcError>> {
    let result = match method {
        "masternode.announce.broadcast" => {
            let signmnb = match params.get(0).and_then(|v| v.as_str()) {
                Some(s) => s,
                None => return Some(Err(RpcError::bad_request("expected signmnb string"))),
            };
            ext.masternode_announce_broadcast(signmnb)
                .await
                .map(Value::String)
        }
        "masternode.list" => {
            let payees: Vec<String> = params
                .get(0)
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|p| p.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            ext.masternode_list(&payees).await
        }
        "masternode.subscribe" => {
            let collateral = match params.get(0).and_then(|v| v.as_str()) {
                Some(s) => s,
                None => return Some(Err(RpcError::bad_request("expected collateral outpoint"))),
            };
            ext.masternode_subscribe(collateral).await
        }
        _ => return None,
    };
    Some(result.map_err(RpcError::daemon))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDash;

    #[async_trait]
    impl DashSessionExt for StubDash {
        async fn masternode_announce_broadcast(&self, _signmnb: &str) -> Result<String, String> {
            Ok("abc123".to_string())
        }
        async fn masternode_list(&self, _payees: &[String]) -> Result<Value, String> {
            Ok(serde_json::json!([]))
        }
        async fn masternode_subscribe(&self, _collateral: &str) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn unrelated_method_falls_through() {
        let stub = StubDash;
        assert!(dispatch_dash(&stub, "server.ping", &[]).await.is_none());
    }

    #[tokio::test]
    async fn list_dispatches() {
        let stub = StubDash;
        let out = dispatch_dash(&stub, "masternode.list", &[]).await.unwrap().unwrap();
        assert_eq!(out, serde_json::json!([]));
    }
}
