//! The connection-agnostic transport contract (§4.3).
//!
//! Grounded on `protocol.rs`'s `nakamoto_net::Io`/`Link`-driven connection lifecycle, narrowed to
//! an explicit trait: this spec treats the concrete transport (WebSocket, in-memory loopback,
//! anything else a host wires up) as an external collaborator the node drives through a fixed
//! contract, rather than an in-tree reactor the way the teacher's `nakamoto` integration is.

use async_trait::async_trait;
use thiserror::Error;

use crate::emitter::Emitter;
use crate::message::Message;

/// Why a connection went down (§4.3). Distinct from [`crate::error::LoguxError`]: a
/// `DisconnectReason` describes the *transport* event, not necessarily a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `destroy()` was called explicitly.
    Destroy,
    /// The transport reported a low-level error.
    Error,
    /// No `pong` arrived within the heartbeat timeout.
    Timeout,
    /// The host signalled the page/process is being frozen (mobile backgrounding, §4.6).
    Freeze,
    /// The sync protocol itself decided to end the session (a `LoguxError` was sent/received).
    Protocol,
}

impl DisconnectReason {
    /// Whether this reason should cause the reconnect supervisor (§4.6) to retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Destroy)
    }
}

/// A low-level transport failure, as opposed to a protocol-level [`crate::error::LoguxError`].
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection is not established")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Lifecycle events a [`Connection`] emits, in the order a session actually sees them:
/// `Connecting` → `Connect` → any number of `Message`s → `Disconnect`, with `Error` possible
/// at any point before `Disconnect`.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connecting,
    Connect,
    Message(Message),
    Disconnect(DisconnectReason),
    Error(String),
}

/// A connection-agnostic transport (§4.3). Implementors own exactly one [`Emitter`] for
/// [`ConnectionEvent`]; `BaseNode` subscribes to it to drive its state machine.
#[async_trait(?Send)]
pub trait Connection {
    /// Initiate the underlying transport connection. Emits `Connecting` immediately and `Connect`
    /// (or an `Error`/`Disconnect`) once the attempt resolves.
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Send one already-encoded [`Message`] to the peer.
    async fn send(&mut self, message: Message) -> Result<(), ConnectionError>;

    /// Gracefully end the session, attributing the given reason, without releasing listeners.
    async fn disconnect(&mut self, reason: DisconnectReason);

    /// Tear down the connection and release every registered listener. Terminal: a destroyed
    /// connection is never reused.
    fn destroy(&mut self);

    /// Whether `connect` has resolved and no `disconnect`/`destroy` has happened since.
    fn is_connected(&self) -> bool;

    /// The event emitter listeners attach to.
    fn events(&mut self) -> &mut Emitter<ConnectionEvent>;

    /// Convenience wrapper over [`Connection::events`].
    fn on(&mut self, listener: impl FnMut(&mut ConnectionEvent) + 'static)
    where
        Self: Sized,
    {
        self.events().on(listener);
    }
}
