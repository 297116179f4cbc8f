//! Domain error taxonomy.
//!
//! Mirrors the wire-level `error` message kinds so a `LoguxError` can be both matched on
//! programmatically and rendered straight into an outgoing `error` message via `Display`.

use thiserror::Error;

use crate::message::Message;

/// A `LoguxError` kind, exactly as it appears on the wire.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoguxError {
    /// Handshake-terminal: the peer's major protocol version is unsupported.
    #[error("wrong-protocol")]
    WrongProtocol,
    /// Handshake-terminal: `auth` rejected the peer's credentials.
    #[error("wrong-credentials")]
    WrongCredentials,
    /// Handshake-terminal: no mutually acceptable subprotocol.
    #[error("wrong-subprotocol")]
    WrongSubprotocol,
    /// Handshake-terminal: a message arrived before the handshake completed.
    #[error("missed-auth")]
    MissedAuth,
    /// Session-terminal, not handshake-terminal: a malformed message was received.
    #[error("wrong-format")]
    WrongFormat,
    /// Session-terminal: a message with an unrecognized tag was received.
    #[error("unknown-message")]
    UnknownMessage,
    /// Session-terminal: the peer is misbehaving (e.g. flooding malformed messages).
    #[error("bruteforce")]
    Bruteforce,
    /// Session-terminal, transient: no `pong` arrived within the configured timeout.
    #[error("timeout")]
    Timeout,
}

impl LoguxError {
    /// The exact wire string for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WrongProtocol => "wrong-protocol",
            Self::WrongCredentials => "wrong-credentials",
            Self::WrongSubprotocol => "wrong-subprotocol",
            Self::MissedAuth => "missed-auth",
            Self::WrongFormat => "wrong-format",
            Self::UnknownMessage => "unknown-message",
            Self::Bruteforce => "bruteforce",
            Self::Timeout => "timeout",
        }
    }

    /// Terminal errors forbid automatic reconnection (§7).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WrongProtocol
                | Self::WrongCredentials
                | Self::WrongSubprotocol
                | Self::MissedAuth
        )
    }

    /// Parse a wire `kind` string back into a `LoguxError`, if recognized.
    pub fn from_kind(kind: &str) -> Option<Self> {
        Some(match kind {
            "wrong-protocol" => Self::WrongProtocol,
            "wrong-credentials" => Self::WrongCredentials,
            "wrong-subprotocol" => Self::WrongSubprotocol,
            "missed-auth" => Self::MissedAuth,
            "wrong-format" => Self::WrongFormat,
            "unknown-message" => Self::UnknownMessage,
            "bruteforce" => Self::Bruteforce,
            "timeout" => Self::Timeout,
            _ => return None,
        })
    }

    /// Build the `error` message this error kind produces on the wire.
    pub fn to_message(self, detail: Option<String>) -> Message {
        Message::Error {
            kind: self.kind().to_string(),
            detail,
        }
    }
}

/// A [`crate::store::Store`] backend failure. Duplicate-id and unknown-id outcomes already have
/// non-error representations in the `Store` contract (`add` returns `Ok(None)`, `change_meta`
/// returns `false`), so this carries only genuine backend failures (I/O, serialization) that a
/// persistent implementation can hit and [`crate::store::MemoryStore`] never can.
#[derive(Error, Debug)]
#[error("store backend error: {0}")]
pub struct StoreError(pub String);

/// Error returned by [`crate::log::Log`] operations.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("action is missing a `type`")]
    MissingType,
    #[error("meta diff must not touch `id` or `added`")]
    ImmutableField,
    #[error(transparent)]
    Store(#[from] StoreError),
}
