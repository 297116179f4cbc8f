//! The wire message grammar (§4.4, §6): JSON arrays tagged by their first element.
//!
//! Grounded on `protocol/message.rs::Message` — a tagged enum with a custom, hand-written
//! `Encode`/`Decode` dispatching on a tag rather than relying on serde's enum representations.
//! Here the tag is the first element of a JSON array instead of a leading byte, per §6's grammar,
//! so `Message` gets its own `Serialize`/`Deserialize` built on `serde_json::Value` instead of a
//! derived representation.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::action::{Action, Meta};
use crate::error::LoguxError;
use crate::id::Timestamp;

/// The optional trailing element of `connect`/`connected` (§4.4's `opts?`): a mapping whose
/// recognized keys are `credentials` and `subprotocol`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandshakeOpts {
    pub credentials: Option<Value>,
    pub subprotocol: Option<String>,
}

impl HandshakeOpts {
    fn is_empty(&self) -> bool {
        self.credentials.is_none() && self.subprotocol.is_none()
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(c) = &self.credentials {
            map.insert("credentials".to_string(), c.clone());
        }
        if let Some(s) = &self.subprotocol {
            map.insert("subprotocol".to_string(), json!(s));
        }
        Value::Object(map)
    }

    fn from_value(value: Value) -> Result<Self, LoguxError> {
        let map = value.as_object().ok_or(LoguxError::WrongFormat)?;
        let subprotocol = match map.get("subprotocol") {
            Some(v) => Some(field_string(v.clone())?),
            None => None,
        };
        Ok(Self {
            credentials: map.get("credentials").cloned(),
            subprotocol,
        })
    }
}

/// One sync-protocol message (§4.4).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Client → server: opens the handshake. `synced` is the sender's `lastAdded` at send time.
    Connect {
        protocol: u32,
        node_id: String,
        synced: u64,
        opts: HandshakeOpts,
    },
    /// Server → client: completes the handshake. `time` is `[T0, T1]`: the server's receive and
    /// reply timestamps, used by the client to estimate `timeFix` (§4.4).
    Connected {
        protocol: u32,
        node_id: String,
        time: (Timestamp, Timestamp),
        opts: HandshakeOpts,
    },
    /// Heartbeat request, either direction. `synced` only needs to round-trip; it is not
    /// otherwise interpreted.
    Ping(u64),
    /// Heartbeat reply, echoing the `ping`'s counter.
    Pong(u64),
    /// A batch of actions, tagged with the `added` watermark of the first entry.
    Sync { added: u64, entries: Vec<(Action, Meta)> },
    /// Acknowledges a `sync` up to `added`.
    Synced { added: u64 },
    /// Reports a [`LoguxError`] (§7). Terminal errors end the session without a reconnect.
    Error { kind: String, detail: Option<String> },
    /// Free-form diagnostic payload, never required for protocol correctness.
    Debug { kind: String, payload: Value },
}

impl Message {
    pub fn error(error: LoguxError, detail: Option<String>) -> Self {
        Message::Error {
            kind: error.kind().to_string(),
            detail,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Message::Connect {
                protocol,
                node_id,
                synced,
                opts,
            } => {
                if opts.is_empty() {
                    json!(["connect", protocol, node_id, synced])
                } else {
                    json!(["connect", protocol, node_id, synced, opts.to_value()])
                }
            }
            Message::Connected {
                protocol,
                node_id,
                time,
                opts,
            } => {
                if opts.is_empty() {
                    json!(["connected", protocol, node_id, [time.0, time.1]])
                } else {
                    json!(["connected", protocol, node_id, [time.0, time.1], opts.to_value()])
                }
            }
            Message::Ping(counter) => json!(["ping", counter]),
            Message::Pong(counter) => json!(["pong", counter]),
            Message::Sync { added, entries } => {
                let mut array = vec![json!("sync"), json!(added)];
                for (action, meta) in entries {
                    array.push(serde_json::to_value(action).expect("Action always serializes"));
                    array.push(serde_json::to_value(meta).expect("Meta always serializes"));
                }
                Value::Array(array)
            }
            Message::Synced { added } => json!(["synced", added]),
            Message::Error { kind, detail } => match detail {
                Some(d) => json!(["error", kind, d]),
                None => json!(["error", kind]),
            },
            Message::Debug { kind, payload } => json!(["debug", kind, payload]),
        }
    }

    fn from_value(value: Value) -> Result<Self, LoguxError> {
        let array = value.as_array().ok_or(LoguxError::WrongFormat)?;
        let tag = array
            .first()
            .and_then(Value::as_str)
            .ok_or(LoguxError::WrongFormat)?;

        let at = |ix: usize| array.get(ix).cloned();
        let require = |v: Option<Value>| v.ok_or(LoguxError::WrongFormat);

        match tag {
            "connect" => Ok(Message::Connect {
                protocol: field_u32(require(at(1))?)?,
                node_id: field_string(require(at(2))?)?,
                synced: field_u64(require(at(3))?)?,
                opts: at(4).map(HandshakeOpts::from_value).transpose()?.unwrap_or_default(),
            }),
            "connected" => {
                let pair = require(at(3))?;
                let pair = pair.as_array().ok_or(LoguxError::WrongFormat)?;
                if pair.len() != 2 {
                    return Err(LoguxError::WrongFormat);
                }
                let t0 = field_i64(pair[0].clone())?;
                let t1 = field_i64(pair[1].clone())?;
                Ok(Message::Connected {
                    protocol: field_u32(require(at(1))?)?,
                    node_id: field_string(require(at(2))?)?,
                    time: (t0, t1),
                    opts: at(4).map(HandshakeOpts::from_value).transpose()?.unwrap_or_default(),
                })
            }
            "ping" => Ok(Message::Ping(field_u64(require(at(1))?)?)),
            "pong" => Ok(Message::Pong(field_u64(require(at(1))?)?)),
            "sync" => {
                let added = field_u64(require(at(1))?)?;
                let rest = &array[2.min(array.len())..];
                if rest.len() % 2 != 0 {
                    return Err(LoguxError::WrongFormat);
                }
                let mut entries = Vec::with_capacity(rest.len() / 2);
                for pair in rest.chunks(2) {
                    let action: Action =
                        serde_json::from_value(pair[0].clone()).map_err(|_| LoguxError::WrongFormat)?;
                    let meta: Meta =
                        serde_json::from_value(pair[1].clone()).map_err(|_| LoguxError::WrongFormat)?;
                    entries.push((action, meta));
                }
                Ok(Message::Sync { added, entries })
            }
            "synced" => Ok(Message::Synced {
                added: field_u64(require(at(1))?)?,
            }),
            "error" => Ok(Message::Error {
                kind: field_string(require(at(1))?)?,
                detail: at(2).map(field_string).transpose()?,
            }),
            "debug" => Ok(Message::Debug {
                kind: field_string(require(at(1))?)?,
                payload: at(2).unwrap_or(Value::Null),
            }),
            _ => Err(LoguxError::UnknownMessage),
        }
    }
}

fn field_string(v: Value) -> Result<String, LoguxError> {
    v.as_str().map(str::to_string).ok_or(LoguxError::WrongFormat)
}

fn field_u32(v: Value) -> Result<u32, LoguxError> {
    v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(LoguxError::WrongFormat)
}

fn field_u64(v: Value) -> Result<u64, LoguxError> {
    v.as_u64().ok_or(LoguxError::WrongFormat)
}

fn field_i64(v: Value) -> Result<Timestamp, LoguxError> {
    v.as_i64().ok_or(LoguxError::WrongFormat)
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(D::Error::custom)
    }
}
