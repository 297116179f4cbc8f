//! The server side of the handshake (§4.5): waits for `connect`, runs `auth`, replies `connected`.

use crate::action::{Action, Meta};
use crate::connection::{Connection, ConnectionEvent};
use crate::error::LoguxError;
use crate::log::Log;
use crate::store::Store;

use super::{AllowAll, AllowAnySubprotocol, Auth, BaseNode, NodeEvent, NodeOptions, NodeState, Role, SubprotocolMatcher};

/// A node that answers an incoming handshake, optionally gated by an [`Auth`] callback and a
/// [`SubprotocolMatcher`].
pub struct ServerNode<S: Store, C: Connection, A: Auth = AllowAll, P: SubprotocolMatcher = AllowAnySubprotocol> {
    base: BaseNode<S, C, A, P>,
}

impl<S: Store, C: Connection> ServerNode<S, C, AllowAll, AllowAnySubprotocol> {
    pub fn new(node_id: impl Into<String>, log: Log<S>, connection: C) -> Self {
        Self {
            base: BaseNode::new(
                Role::Server,
                node_id,
                log,
                connection,
                AllowAll,
                AllowAnySubprotocol,
                NodeOptions::default(),
            ),
        }
    }

    pub fn with_options(
        node_id: impl Into<String>,
        log: Log<S>,
        connection: C,
        options: NodeOptions,
    ) -> Self {
        Self {
            base: BaseNode::new(
                Role::Server,
                node_id,
                log,
                connection,
                AllowAll,
                AllowAnySubprotocol,
                options,
            ),
        }
    }
}

impl<S: Store, C: Connection, A: Auth> ServerNode<S, C, A, AllowAnySubprotocol> {
    pub fn with_auth(node_id: impl Into<String>, log: Log<S>, connection: C, auth: A) -> Self {
        Self {
            base: BaseNode::new(
                Role::Server,
                node_id,
                log,
                connection,
                auth,
                AllowAnySubprotocol,
                NodeOptions::default(),
            ),
        }
    }
}

impl<S: Store, C: Connection, A: Auth, P: SubprotocolMatcher> ServerNode<S, C, A, P> {
    #[allow(clippy::too_many_arguments)]
    pub fn with_auth_and_subprotocol(
        node_id: impl Into<String>,
        log: Log<S>,
        connection: C,
        auth: A,
        subprotocol_matcher: P,
        options: NodeOptions,
    ) -> Self {
        Self {
            base: BaseNode::new(
                Role::Server,
                node_id,
                log,
                connection,
                auth,
                subprotocol_matcher,
                options,
            ),
        }
    }

    pub fn state(&self) -> NodeState {
        self.base.state()
    }

    pub fn log(&self) -> &Log<S> {
        self.base.log()
    }

    pub fn log_mut(&mut self) -> &mut Log<S> {
        self.base.log_mut()
    }

    pub fn connection_mut(&mut self) -> &mut C {
        self.base.connection_mut()
    }

    pub async fn sync(&mut self) {
        self.base.sync().await
    }

    pub fn on(&mut self, listener: impl FnMut(&mut NodeEvent) + 'static) {
        self.base.on(listener);
    }

    pub fn set_subprotocol(&mut self, subprotocol: impl Into<String>) {
        self.base.set_subprotocol(subprotocol);
    }

    pub fn set_in_filter(&mut self, filter: impl FnMut(&Action, &Meta) -> bool + 'static) {
        self.base.set_in_filter(filter);
    }

    pub fn set_in_map(&mut self, map: impl FnMut(Action, Meta) -> (Action, Meta) + 'static) {
        self.base.set_in_map(map);
    }

    pub fn set_out_filter(&mut self, filter: impl FnMut(&Action, &Meta) -> bool + 'static) {
        self.base.set_out_filter(filter);
    }

    pub fn set_out_map(&mut self, map: impl FnMut(Action, Meta) -> (Action, Meta) + 'static) {
        self.base.set_out_map(map);
    }

    /// Accept an inbound connection. Unlike the client, the server does not send `connect`
    /// itself; it only opens the transport and then waits for the peer's handshake message.
    pub async fn connect(&mut self) -> Result<(), LoguxError> {
        self.base.connect().await
    }

    pub async fn handle_connection_event(&mut self, event: ConnectionEvent) -> Result<(), LoguxError> {
        self.base.handle_connection_event(event).await
    }

    pub async fn ping(&mut self) -> Result<(), LoguxError> {
        self.base.ping().await
    }

    pub fn ping_timed_out(&self) -> bool {
        self.base.ping_timed_out()
    }

    pub async fn tick(&mut self) -> Result<(), LoguxError> {
        self.base.tick().await
    }

    pub async fn timeout(&mut self) {
        self.base.timeout().await
    }

    pub async fn destroy(&mut self) {
        self.base.destroy().await
    }
}
