//! Gateway message envelope
//!
//! Every frame on the gateway is a JSON object `{op, d, s, t}`. `s` and `t`
//! are only present on dispatches; `d` is always written, `null` when empty.

use super::{HelloPayload, OpCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub op: OpCode,

    #[serde(default)]
    pub d: Value,

    /// Sequence number, dispatches only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name, dispatches only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Payload {
    #[must_use]
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// Build a command payload from any serializable body
    pub fn command<T: Serialize>(op: OpCode, body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(op, serde_json::to_value(body)?))
    }

    /// Heartbeat carrying the last sequence, `null` before the first dispatch
    #[must_use]
    pub fn heartbeat(sequence: u64) -> Self {
        let d = if sequence == 0 {
            Value::Null
        } else {
            Value::from(sequence)
        };
        Self::new(OpCode::Heartbeat, d)
    }

    /// Server-side dispatch frame
    #[must_use]
    pub fn dispatch(event: impl Into<String>, sequence: u64, d: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d,
            s: Some(sequence),
            t: Some(event.into()),
        }
    }

    /// Server-side hello frame
    #[must_use]
    pub fn hello(heartbeat_interval: Duration) -> Self {
        let interval_ms = u64::try_from(heartbeat_interval.as_millis()).unwrap_or(u64::MAX);
        Self::new(
            OpCode::Hello,
            serde_json::json!({ "heartbeat_interval": interval_ms }),
        )
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, Value::Null)
    }

    #[must_use]
    pub fn reconnect() -> Self {
        Self::new(OpCode::Reconnect, Value::Null)
    }

    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::new(OpCode::InvalidSession, Value::Bool(resumable))
    }

    /// Decode `d` into a typed body
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.d)
    }

    /// Heartbeat interval of a hello frame
    #[must_use]
    pub fn hello_interval(&self) -> Option<Duration> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.data::<HelloPayload>()
            .ok()
            .map(|hello| Duration::from_millis(hello.heartbeat_interval))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
