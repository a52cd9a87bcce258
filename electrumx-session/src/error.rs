//! The request-handling error taxonomy's `RpcError` and
//! `ReplyAndDisconnect`. Everything else in §7 (`ParseError`,
//! `SkipTxDeserialize`, `DaemonError`, `DBSyncError`, `StorageError`) lives
//! in the crate that owns that failure mode; this crate only needs the two
//! that are about a JSON-RPC reply.

use thiserror::Error;

/// JSON-RPC error codes this server assigns.
pub const CODE_REQUEST: i64 = 1;
pub const CODE_DAEMON: i64 = 2;

/// A request-level failure: surfaced to the client as a JSON-RPC error
/// object, without tearing down the connection.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        RpcError {
            code: CODE_REQUEST,
            message: message.into(),
        }
    }

    pub fn daemon(message: impl Into<String>) -> Self {
        RpcError {
            code: CODE_DAEMON,
            message: message.into(),
        }
    }
}

/// Raised by the handshake path: the error frame (if any) is sent, then the
/// connection is torn down. Used for unsupported protocol versions, a
/// missing/duplicate `server.version`, and blocked client names.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct ReplyAndDisconnect(pub RpcError);

impl From<RpcError> for ReplyAndDisconnect {
    fn from(e: RpcError) -> Self {
        ReplyAndDisconnect(e)
    }
}
