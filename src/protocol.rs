//! Wire protocol for the session event channel.
//!
//! Every WebSocket text frame is a JSON envelope `{"event": ..., "data": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, ReceiptError};

pub const PROCESS_RECEIPT: &str = "process_receipt";

/// Payload of an inbound `process_receipt` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProcessRequest {
    /// Base64 image, optionally prefixed with a header ending in a comma
    /// (e.g. `data:image/png;base64,`).
    #[serde(default)]
    pub image: Option<String>,
    /// Absolute URL or a path relative to the frontend base address.
    #[serde(default)]
    pub url: Option<String>,
}

/// A structured receipt line. Filled by the language-model stage once it exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub qty: f64,
    pub price: f64,
    pub total: f64,
}

/// Events the server sends to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected { sid: String },
    Status { msg: String },
    /// `data` is kept for clients of the earlier `{ data: [] }` interface.
    Finish { raw_text: String, data: Vec<LineItem> },
    Error { msg: String, kind: ErrorKind },
}

impl ServerEvent {
    pub fn status(msg: impl Into<String>) -> Self {
        Self::Status { msg: msg.into() }
    }

    pub fn finish(raw_text: String) -> Self {
        Self::Finish {
            raw_text,
            data: Vec::new(),
        }
    }

    pub fn error(err: &ReceiptError) -> Self {
        Self::Error {
            msg: err.to_string(),
            kind: err.kind(),
        }
    }
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ProcessReceipt(ProcessRequest),
    /// Any event name this server does not handle.
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientEvent {
    /// Parse a text frame into a client event.
    pub fn parse(text: &str) -> Result<Self, ReceiptError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ReceiptError::InvalidRequest(format!("malformed event frame: {}", e)))?;

        match envelope.event.as_str() {
            PROCESS_RECEIPT => {
                let request = match envelope.data {
                    Value::Null => ProcessRequest::default(),
                    data => serde_json::from_value(data).map_err(|e| {
                        ReceiptError::InvalidRequest(format!("bad {} payload: {}", PROCESS_RECEIPT, e))
                    })?,
                };
                Ok(Self::ProcessReceipt(request))
            }
            _ => Ok(Self::Unknown(envelope.event)),
        }
    }
}
