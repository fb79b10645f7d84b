//! Frames exchanged over the delivery connection.
//!
//! Outbound: `{ "type": "update", "clientId", "requestId", "patch" }`.
//! Inbound: any JSON object with a `type`; an `update` carrying a `requestId`
//! acknowledges the request with that id.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::patch::Patch;

pub const UPDATE: &str = "update";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Outbound<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    client_id: &'a str,
    request_id: &'a str,
    patch: &'a Patch,
}

pub fn encode_update(client_id: &str, request_id: &str, patch: &Patch) -> Result<String> {
    let frame = Outbound { kind: UPDATE, client_id, request_id, patch };
    Ok(serde_json::to_string(&frame)?)
}

/// A decoded inbound frame. Extra fields stay available in `body`.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub kind: String,
    pub request_id: Option<String>,
    pub body: Value,
}

impl Inbound {
    /// `None` for anything that is not a JSON object with a string `type`.
    pub fn parse(text: &str) -> Option<Self> {
        let body: Value = serde_json::from_str(text).ok()?;
        let kind = body.get("type")?.as_str()?.to_string();
        let request_id = body.get("requestId").and_then(Value::as_str).map(str::to_string);
        Some(Self { kind, request_id, body })
    }

    /// Request id this frame acknowledges, if it is an acknowledgement.
    pub fn ack_id(&self) -> Option<&str> {
        if self.kind == UPDATE {
            self.request_id.as_deref()
        } else {
            None
        }
    }

    /// Patch or resolved state carried by the frame, for the merge resolver.
    pub fn patch(&self) -> Option<Patch> {
        self.body
            .get("patch")
            .or_else(|| self.body.get("state"))
            .filter(|v| v.is_object())
            .map(Patch::from_value)
    }
}
