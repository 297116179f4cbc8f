//! The sync node state machine (§4.4): handshake, clock-offset estimation, incremental sync,
//! heartbeat, error propagation.
//!
//! Grounded on `protocol/peer.rs::Peer::received` — the `match (&self.state, envelope.msg) { .. }`
//! per-state dispatch table is the direct model for [`BaseNode`]'s handling of each [`Message`]
//! variant against its current [`NodeState`]; `protocol.rs::Protocol`'s split between
//! connection-specific state and context-wide state (clock, storage) is the model for `BaseNode`
//! owning one [`Log`] plus one [`Connection`].

pub mod client;
pub mod server;

pub use client::ClientNode;
pub use server::ServerNode;

use std::collections::HashSet;

use log::{debug, trace, warn};
use serde_json::Value;

use crate::action::{Action, Meta};
use crate::clock::Clock;
use crate::connection::{Connection, ConnectionEvent, DisconnectReason};
use crate::emitter::Emitter;
use crate::error::LoguxError;
use crate::id::{Id, Timestamp};
use crate::log::Log;
use crate::message::{HandshakeOpts, Message};
use crate::store::{Order, Store};

/// Protocol version this implementation speaks (§4.4).
pub const PROTOCOL_VERSION: u32 = 4;

/// Which side of the handshake a node plays (§4.5). `BaseNode` holds the shared machinery;
/// `ClientNode`/`ServerNode` are thin role-specific wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The node's position in the handshake/session lifecycle (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No `connect()` issued yet.
    New,
    /// `Connection::connect` in flight.
    Connecting,
    /// Client only: sent `connect`, awaiting `connected`.
    SentConnect,
    /// Server only: sent `connected`, may already be receiving `sync` messages.
    SentConnected,
    /// Handshake complete on both sides; `sync`/`ping`/`pong` may flow freely.
    Synchronized,
    /// Session ended; may still be reconnected by a supervisor.
    Disconnected,
    /// `destroy()` was called; this node is never reused.
    Destroyed,
}

/// Events a [`BaseNode`] emits, beyond the log's own events, for a host or the reconnect
/// supervisor (§4.6) to observe.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    StateChanged(NodeState),
    Error(LoguxError),
}

/// Authentication hook (§4.4): the server side of a handshake calls this to accept or reject a
/// peer's credentials. Always `Ok(true)` means "no authentication configured".
pub trait Auth {
    fn verify(&self, node_id: &str, credentials: Option<&Value>) -> bool;
}

/// Accepts every peer. The default when a host configures no `auth` callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Auth for AllowAll {
    fn verify(&self, _node_id: &str, _credentials: Option<&Value>) -> bool {
        true
    }
}

/// Subprotocol negotiation hook (§4.4 handshake step 3): the server side calls this with the
/// peer's advertised `subprotocol` and rejects with `wrong-subprotocol` on a mismatch.
pub trait SubprotocolMatcher {
    fn matches(&self, peer_subprotocol: Option<&str>) -> bool;
}

/// Accepts any subprotocol, or none. The default when a host configures no matcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAnySubprotocol;

impl SubprotocolMatcher for AllowAnySubprotocol {
    fn matches(&self, _peer_subprotocol: Option<&str>) -> bool {
        true
    }
}

/// Construction-time node configuration (§6 "Node options"). `ping_interval_ms == 0` disables
/// automatic heartbeat scheduling entirely (a host may still call [`BaseNode::ping`] by hand).
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub ping_interval_ms: i64,
    pub timeout_ms: i64,
    pub fix_time: bool,
    pub credentials: Option<Value>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            ping_interval_ms: 0,
            timeout_ms: 0,
            fix_time: true,
            credentials: None,
        }
    }
}

impl NodeOptions {
    /// # Panics
    /// Panics if `ping_interval_ms > 0` and `timeout_ms == 0` — "declaring `ping > 0` with
    /// `timeout = 0` is rejected at construction" (§4.4).
    pub fn new(ping_interval_ms: i64, timeout_ms: i64, fix_time: bool) -> Self {
        assert!(
            ping_interval_ms == 0 || timeout_ms > 0,
            "a non-zero ping interval requires a non-zero timeout"
        );
        Self {
            ping_interval_ms,
            timeout_ms,
            fix_time,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Value) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Shared sync-protocol machinery used by both [`ClientNode`] and [`ServerNode`] (§4.4, §4.5).
pub struct BaseNode<S: Store, C: Connection, A: Auth = AllowAll, P: SubprotocolMatcher = AllowAnySubprotocol> {
    role: Role,
    node_id: String,
    subprotocol: Option<String>,
    auth: A,
    subprotocol_matcher: P,
    log: Log<S>,
    connection: C,
    clock: Clock,
    state: NodeState,
    peer_id: Option<String>,
    peer_subprotocol: Option<String>,
    /// Estimated `peer_clock - our_clock`, in milliseconds, from the handshake round trip.
    time_fix: i64,
    options: NodeOptions,
    ping_counter: u64,
    awaiting_pong_since: Option<Timestamp>,
    /// Timestamp of the last message this node sent. The heartbeat is scheduled relative to this,
    /// not to inbound traffic (§4.4: "`ping` ms after the last outbound activity, not arrival").
    last_outbound_activity: Option<Timestamp>,
    sent_connect_at: Option<Timestamp>,
    /// Ids absorbed from the peer's own `sync` messages, so `sync()` never echoes them straight
    /// back (§4.4 "suppresses re-broadcast of actions originating from the remote peer").
    received_from_peer: HashSet<Id>,
    in_filter: Option<Box<dyn FnMut(&Action, &Meta) -> bool>>,
    in_map: Option<Box<dyn FnMut(Action, Meta) -> (Action, Meta)>>,
    out_filter: Option<Box<dyn FnMut(&Action, &Meta) -> bool>>,
    out_map: Option<Box<dyn FnMut(Action, Meta) -> (Action, Meta)>>,
    events: Emitter<NodeEvent>,
}

impl<S: Store, C: Connection, A: Auth, P: SubprotocolMatcher> BaseNode<S, C, A, P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: Role,
        node_id: impl Into<String>,
        log: Log<S>,
        connection: C,
        auth: A,
        subprotocol_matcher: P,
        options: NodeOptions,
    ) -> Self {
        let clock = log.clock().clone();
        Self {
            role,
            node_id: node_id.into(),
            subprotocol: None,
            auth,
            subprotocol_matcher,
            log,
            connection,
            clock,
            state: NodeState::New,
            peer_id: None,
            peer_subprotocol: None,
            time_fix: 0,
            options,
            ping_counter: 0,
            awaiting_pong_since: None,
            last_outbound_activity: None,
            sent_connect_at: None,
            received_from_peer: HashSet::new(),
            in_filter: None,
            in_map: None,
            out_filter: None,
            out_map: None,
            events: Emitter::new(),
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn log(&self) -> &Log<S> {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut Log<S> {
        &mut self.log
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Estimated offset between the peer's clock and ours, positive if the peer is ahead.
    pub fn time_fix(&self) -> i64 {
        self.time_fix
    }

    pub fn on(&mut self, listener: impl FnMut(&mut NodeEvent) + 'static) {
        self.events.on(listener);
    }

    /// Advertise `subprotocol` in this node's own `connect`/`connected` messages.
    pub fn set_subprotocol(&mut self, subprotocol: impl Into<String>) {
        self.subprotocol = Some(subprotocol.into());
    }

    pub fn set_in_filter(&mut self, filter: impl FnMut(&Action, &Meta) -> bool + 'static) {
        self.in_filter = Some(Box::new(filter));
    }

    pub fn set_in_map(&mut self, map: impl FnMut(Action, Meta) -> (Action, Meta) + 'static) {
        self.in_map = Some(Box::new(map));
    }

    pub fn set_out_filter(&mut self, filter: impl FnMut(&Action, &Meta) -> bool + 'static) {
        self.out_filter = Some(Box::new(filter));
    }

    pub fn set_out_map(&mut self, map: impl FnMut(Action, Meta) -> (Action, Meta) + 'static) {
        self.out_map = Some(Box::new(map));
    }

    fn set_state(&mut self, state: NodeState) {
        self.state = state;
        debug!("node {}: state -> {:?}", self.node_id, state);
        self.events.emit(&mut NodeEvent::StateChanged(state));
    }

    /// Send one message and record it as outbound activity, for heartbeat scheduling.
    async fn send(&mut self, message: Message) -> Result<(), LoguxError> {
        self.connection
            .send(message)
            .await
            .map_err(|_| LoguxError::WrongFormat)?;
        self.last_outbound_activity = Some(self.clock.now());
        Ok(())
    }

    /// Begin the session: opens the transport, then (client side) sends `connect` once it's up.
    pub async fn connect(&mut self) -> Result<(), LoguxError> {
        self.set_state(NodeState::Connecting);
        self.connection
            .connect()
            .await
            .map_err(|_| LoguxError::WrongFormat)?;

        if self.role == Role::Client {
            self.sent_connect_at = Some(self.clock.now());
            let synced = self.log.store().last_added().await;
            self.send(Message::Connect {
                protocol: PROTOCOL_VERSION,
                node_id: self.node_id.clone(),
                synced,
                opts: HandshakeOpts {
                    credentials: self.options.credentials.clone(),
                    subprotocol: self.subprotocol.clone(),
                },
            })
            .await?;
            self.set_state(NodeState::SentConnect);
        }
        Ok(())
    }

    /// Process one inbound transport event. Returns a terminal error if the session must end.
    pub async fn handle_connection_event(
        &mut self,
        event: ConnectionEvent,
    ) -> Result<(), LoguxError> {
        match event {
            ConnectionEvent::Connecting | ConnectionEvent::Connect => Ok(()),
            ConnectionEvent::Message(message) => self.handle_message(message).await,
            ConnectionEvent::Disconnect(reason) => {
                self.set_state(NodeState::Disconnected);
                trace!("node {}: disconnected ({:?})", self.node_id, reason);
                Ok(())
            }
            ConnectionEvent::Error(detail) => {
                warn!("node {}: transport error: {detail}", self.node_id);
                Err(LoguxError::WrongFormat)
            }
        }
    }

    async fn handle_message(&mut self, message: Message) -> Result<(), LoguxError> {
        use NodeState::*;

        match (self.state, message) {
            (
                SentConnect,
                Message::Connected {
                    protocol,
                    node_id,
                    time,
                    opts,
                },
            ) if self.role == Role::Client => {
                self.finish_client_handshake(protocol, node_id, time, opts)
                    .await
            }
            (
                New | Connecting,
                Message::Connect {
                    protocol,
                    node_id,
                    synced,
                    opts,
                },
            ) if self.role == Role::Server => {
                self.handle_server_connect(protocol, node_id, synced, opts)
                    .await
            }
            (Synchronized | SentConnected, Message::Sync { added, entries }) => {
                self.receive_sync(added, entries).await
            }
            (Synchronized | SentConnected, Message::Synced { added }) => {
                self.receive_synced(added).await
            }
            (Synchronized | SentConnected | SentConnect, Message::Ping(counter)) => {
                self.receive_ping(counter).await
            }
            (_, Message::Pong(counter)) => {
                self.receive_pong(counter);
                Ok(())
            }
            (_, Message::Error { kind, detail }) => {
                let error = LoguxError::from_kind(&kind).unwrap_or(LoguxError::UnknownMessage);
                warn!("node {}: peer reported {} ({:?})", self.node_id, kind, detail);
                self.fail(error).await;
                Err(error)
            }
            (_, Message::Debug { kind, payload }) => {
                trace!("node {}: debug {} {:?}", self.node_id, kind, payload);
                Ok(())
            }
            (state, other) => {
                warn!(
                    "node {}: unexpected {:?} in state {:?}",
                    self.node_id, other, state
                );
                self.fail(LoguxError::MissedAuth).await;
                Err(LoguxError::MissedAuth)
            }
        }
    }

    async fn finish_client_handshake(
        &mut self,
        protocol: u32,
        node_id: String,
        time: (Timestamp, Timestamp),
        opts: HandshakeOpts,
    ) -> Result<(), LoguxError> {
        if protocol != PROTOCOL_VERSION {
            self.fail(LoguxError::WrongProtocol).await;
            return Err(LoguxError::WrongProtocol);
        }

        let (t0, t1) = time;
        let local_send = self.sent_connect_at.unwrap_or(t0);
        let local_receive = self.clock.now();
        // NTP-style estimate (§4.4): accounts for the server's own processing delay between
        // receiving `connect` (t0) and sending `connected` (t1), unlike a plain half-RTT guess.
        self.time_fix = if self.options.fix_time {
            ((local_send + local_receive) - (t0 + t1)) / 2
        } else {
            0
        };

        self.peer_id = Some(node_id);
        self.peer_subprotocol = opts.subprotocol;
        self.set_state(NodeState::Synchronized);
        self.sync().await;
        Ok(())
    }

    async fn handle_server_connect(
        &mut self,
        protocol: u32,
        node_id: String,
        synced: u64,
        opts: HandshakeOpts,
    ) -> Result<(), LoguxError> {
        let t0 = self.clock.now();

        if protocol != PROTOCOL_VERSION {
            self.fail(LoguxError::WrongProtocol).await;
            return Err(LoguxError::WrongProtocol);
        }
        if !self.auth.verify(&node_id, opts.credentials.as_ref()) {
            self.fail(LoguxError::WrongCredentials).await;
            return Err(LoguxError::WrongCredentials);
        }
        if !self.subprotocol_matcher.matches(opts.subprotocol.as_deref()) {
            self.fail(LoguxError::WrongSubprotocol).await;
            return Err(LoguxError::WrongSubprotocol);
        }

        self.peer_id = Some(node_id.clone());
        self.peer_subprotocol = opts.subprotocol;
        self.log
            .store_mut()
            .set_last_synced(&node_id, None, Some(synced))
            .await;

        let t1 = self.clock.now();
        self.send(Message::Connected {
            protocol: PROTOCOL_VERSION,
            node_id: self.node_id.clone(),
            time: (t0, t1),
            opts: HandshakeOpts {
                credentials: self.options.credentials.clone(),
                subprotocol: self.subprotocol.clone(),
            },
        })
        .await?;
        self.set_state(NodeState::SentConnected);
        self.sync().await;
        Ok(())
    }

    /// Push every stored action the peer hasn't acknowledged yet (§4.4 "incremental sync").
    pub async fn sync(&mut self) {
        let Some(peer_id) = self.peer_id.clone() else {
            return;
        };
        let synced = self.log.store().last_synced(&peer_id).await;
        let page = self.log.store().get(Order::Added).await;

        let mut owed: Vec<(Action, Meta)> = Vec::new();
        for (action, meta) in page.entries {
            let owed_already = meta.added.map(|a| a > synced.sent).unwrap_or(false);
            if !owed_already || self.received_from_peer.contains(&meta.id) {
                continue;
            }
            if let Some(filter) = &mut self.out_filter {
                if !filter(&action, &meta) {
                    continue;
                }
            }
            owed.push((action, meta));
        }
        if owed.is_empty() {
            return;
        }

        if let Some(map) = &mut self.out_map {
            owed = owed.into_iter().map(|(a, m)| map(a, m)).collect();
        }
        owed.sort_by_key(|(_, meta)| meta.added.unwrap_or(0));
        let high_water = owed.last().and_then(|(_, m)| m.added).unwrap_or(synced.sent);

        let time_fix = self.time_fix;
        for (_, meta) in owed.iter_mut() {
            meta.time -= time_fix;
        }

        let _ = self
            .send(Message::Sync {
                added: high_water,
                entries: owed,
            })
            .await;
    }

    async fn receive_sync(
        &mut self,
        added: u64,
        entries: Vec<(Action, Meta)>,
    ) -> Result<(), LoguxError> {
        let time_fix = self.time_fix;
        for (mut action, mut meta) in entries {
            meta.time += time_fix;

            if let Some(filter) = &mut self.in_filter {
                if !filter(&action, &meta) {
                    continue;
                }
            }
            if let Some(map) = &mut self.in_map {
                let (mapped_action, mapped_meta) = map(action, meta);
                action = mapped_action;
                meta = mapped_meta;
            }

            let id = meta.id.clone();
            self.log
                .add(action, Some(meta))
                .await
                .map_err(|_| LoguxError::WrongFormat)?;
            self.received_from_peer.insert(id);
        }
        if let Some(peer_id) = self.peer_id.clone() {
            self.log
                .store_mut()
                .set_last_synced(&peer_id, None, Some(added))
                .await;
        }
        let _ = self.send(Message::Synced { added }).await;
        Ok(())
    }

    async fn receive_synced(&mut self, added: u64) -> Result<(), LoguxError> {
        if let Some(peer_id) = self.peer_id.clone() {
            self.log
                .store_mut()
                .set_last_synced(&peer_id, Some(added), None)
                .await;
        }
        Ok(())
    }

    /// Send a heartbeat ping (§4.4, §4.6). Normally invoked by [`BaseNode::tick`]; exposed
    /// directly for a host that wants to drive heartbeat timing itself.
    pub async fn ping(&mut self) -> Result<(), LoguxError> {
        self.ping_counter += 1;
        self.awaiting_pong_since = Some(self.clock.now());
        self.send(Message::Ping(self.ping_counter)).await
    }

    async fn receive_ping(&mut self, counter: u64) -> Result<(), LoguxError> {
        self.send(Message::Pong(counter)).await
    }

    fn receive_pong(&mut self, _counter: u64) {
        self.awaiting_pong_since = None;
    }

    /// Whether the outstanding ping has exceeded the configured timeout (§4.6).
    pub fn ping_timed_out(&self) -> bool {
        match self.awaiting_pong_since {
            Some(sent_at) => {
                self.options.timeout_ms > 0 && self.clock.now() - sent_at > self.options.timeout_ms
            }
            None => false,
        }
    }

    /// Host-driven heartbeat/timeout check (§4.4). Call this periodically (e.g. from the same
    /// loop that drives [`crate::reconnect::ReconnectingConnection::tick`]) while the session is
    /// live. A no-op before the handshake completes and while `ping_interval_ms == 0` (S3).
    pub async fn tick(&mut self) -> Result<(), LoguxError> {
        if !matches!(self.state, NodeState::Synchronized | NodeState::SentConnected) {
            return Ok(());
        }

        if self.awaiting_pong_since.is_some() {
            if self.ping_timed_out() {
                self.timeout().await;
                return Err(LoguxError::Timeout);
            }
            return Ok(());
        }

        if self.options.ping_interval_ms > 0 {
            let idle_since = self.last_outbound_activity.unwrap_or_else(|| self.clock.now());
            if self.clock.now() - idle_since >= self.options.ping_interval_ms {
                self.ping().await?;
            }
        }
        Ok(())
    }

    /// Fail the session with `Timeout` (§7): session-terminal but not handshake-terminal, so the
    /// reconnect supervisor (§4.6) may retry.
    pub async fn timeout(&mut self) {
        self.fail(LoguxError::Timeout).await;
    }

    async fn fail(&mut self, error: LoguxError) {
        self.events.emit(&mut NodeEvent::Error(error));
        let _ = self.send(Message::error(error, None)).await;
        let reason = if error.is_terminal() {
            DisconnectReason::Protocol
        } else {
            DisconnectReason::Error
        };
        self.connection.disconnect(reason).await;
        self.set_state(NodeState::Disconnected);
    }

    /// Tear down permanently (§4.3). A destroyed node is never reconnected.
    pub async fn destroy(&mut self) {
        self.connection.disconnect(DisconnectReason::Destroy).await;
        self.connection.destroy();
        self.set_state(NodeState::Destroyed);
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_state_allows_only_connecting_transition() {
        assert_ne!(NodeState::New, NodeState::Synchronized);
    }

    #[test]
    fn allow_all_auth_accepts_everything() {
        let auth = AllowAll;
        assert!(auth.verify("any-node", None));
    }

    #[test]
    fn allow_any_subprotocol_accepts_everything() {
        let matcher = AllowAnySubprotocol;
        assert!(matcher.matches(Some("1.0.0")));
        assert!(matcher.matches(None));
    }

    #[test]
    #[should_panic(expected = "non-zero ping interval requires a non-zero timeout")]
    fn ping_without_timeout_is_rejected_at_construction() {
        NodeOptions::new(300, 0, true);
    }

    #[test]
    fn ping_with_timeout_is_accepted() {
        let options = NodeOptions::new(300, 100, true);
        assert_eq!(options.ping_interval_ms, 300);
    }
}
