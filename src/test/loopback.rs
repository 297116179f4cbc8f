//! An in-memory [`Connection`] for tests.
//!
//! Grounded on the teacher's `test/peer.rs` harness: a `Peer<S>` that records everything sent to
//! it in an outbox a test can drain with `messages()`, rather than actually touching a socket.
//! `Loopback` keeps that shape — `take_sent()` drains what this end tried to send — and a test
//! feeds those messages to the other side's node explicitly via
//! `handle_connection_event(ConnectionEvent::Message(..))`, instead of the harness doing delivery
//! itself. That keeps the two nodes' state machines driven one step at a time, which is what the
//! handshake/heartbeat/backoff tests in this crate need.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::connection::{Connection, ConnectionError, ConnectionEvent, DisconnectReason};
use crate::emitter::Emitter;
use crate::message::Message;

/// An in-memory, one-sided [`Connection`]. Use [`Loopback::new`] for a single end whose sent
/// messages you inspect directly, or keep a pair of ends and shuttle messages between them by
/// hand for a full round trip.
pub struct Loopback {
    sent: VecDeque<Message>,
    connected: bool,
    events: Emitter<ConnectionEvent>,
    fail_connect: bool,
    always_fail: bool,
}

impl Loopback {
    pub fn new() -> Self {
        Self {
            sent: VecDeque::new(),
            connected: false,
            events: Emitter::new(),
            fail_connect: false,
            always_fail: false,
        }
    }

    /// Make the next [`Connection::connect`] fail, to exercise reconnect/backoff paths.
    pub fn fail_next_connect(&mut self) {
        self.fail_connect = true;
    }

    /// Make every future [`Connection::connect`] fail, until this is called again with `false`.
    pub fn always_fail_connect(&mut self, always_fail: bool) {
        self.always_fail = always_fail;
    }

    /// Drain every message sent since the last call.
    pub fn take_sent(&mut self) -> Vec<Message> {
        self.sent.drain(..).collect()
    }

    /// Synthesize an inbound message, as if the peer had sent it.
    pub fn deliver(&mut self, message: Message) {
        self.events.emit(&mut ConnectionEvent::Message(message));
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Connection for Loopback {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.events.emit(&mut ConnectionEvent::Connecting);
        if self.fail_connect || self.always_fail {
            self.fail_connect = false;
            self.events
                .emit(&mut ConnectionEvent::Error("simulated connect failure".to_string()));
            return Err(ConnectionError::Transport("simulated connect failure".to_string()));
        }
        self.connected = true;
        self.events.emit(&mut ConnectionEvent::Connect);
        Ok(())
    }

    async fn send(&mut self, message: Message) -> Result<(), ConnectionError> {
        if !self.connected {
            return Err(ConnectionError::NotConnected);
        }
        self.sent.push_back(message);
        Ok(())
    }

    async fn disconnect(&mut self, reason: DisconnectReason) {
        self.connected = false;
        self.events.emit(&mut ConnectionEvent::Disconnect(reason));
    }

    fn destroy(&mut self) {
        self.connected = false;
        self.events.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn events(&mut self) -> &mut Emitter<ConnectionEvent> {
        &mut self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_then_send_records_message() {
        let mut conn = Loopback::new();
        conn.connect().await.unwrap();
        conn.send(Message::Ping(1)).await.unwrap();

        assert_eq!(conn.take_sent(), vec![Message::Ping(1)]);
    }

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let mut conn = Loopback::new();
        let err = conn.send(Message::Ping(1)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn fail_next_connect_reports_a_transport_error() {
        let mut conn = Loopback::new();
        conn.fail_next_connect();
        assert!(conn.connect().await.is_err());
        assert!(!conn.is_connected());
    }
}
