//! The session/JSON-RPC fabric: per-connection protocol state, cost
//! accounting, wire framing, and the `ServerApi` capability record the
//! session dispatcher is built against. `electrumxd` supplies the
//! concrete `ServerApi`/`DashSessionExt` implementations and owns the
//! actual TCP/TLS listener loop; this crate is transport-agnostic.

pub mod api;
pub mod cost;
pub mod dash;
pub mod error;
pub mod merkle;
pub mod protocol;
pub mod session;
pub mod version;

mod codec;

pub use api::{ServerApi, ServerFeatures, Utxo};
pub use codec::{JsonRpcLineCodec, LineCodecError};
pub use dash::DashSessionExt;
pub use error::{ReplyAndDisconnect, RpcError};
pub use session::{HandleResult, Session};
