//! JSON-RPC 2.0 line-protocol wire shapes. Requests, batches,
//! responses and notifications are all plain `serde_json::Value`-backed
//! structs; handler dispatch works on the parsed `Request`, not on a typed
//! method enum, since the handler table is keyed by string method name the
//! same way the upstream `electrumx.server.session`'s `handlers` dict is.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent for notifications sent *by* a client, which this protocol
    /// doesn't otherwise use, but accepted for compatibility.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// One line of input may be a single request or a batch (a JSON array).
#[derive(Debug, Clone)]
pub enum Incoming {
    Single(Request),
    Batch(Vec<Request>),
}

#[derive(Debug, Serialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Response {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Response {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// A server-initiated push with no `id`.
#[derive(Debug, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Vec<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Vec<Value>) -> Self {
        Notification {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub fn parse_incoming(line: &str) -> Result<Incoming, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.is_array() {
        let reqs: Vec<Request> = serde_json::from_value(value)?;
        Ok(Incoming::Batch(reqs))
    } else {
        let req: Request = serde_json::from_value(value)?;
        Ok(Incoming::Single(req))
    }
}
