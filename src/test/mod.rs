//! Test-only support code: not part of the public API, only compiled under `#[cfg(test)]`.

pub mod logger;
pub mod loopback;

#[cfg(test)]
mod integration {
    use crate::action::{Action, Meta};
    use crate::connection::ConnectionEvent;
    use crate::error::LoguxError;
    use crate::log::Log;
    use crate::message::{HandshakeOpts, Message};
    use crate::node::{ClientNode, NodeOptions, NodeState, ServerNode, PROTOCOL_VERSION};
    use crate::store::MemoryStore;

    use super::clock;
    use super::loopback::Loopback;

    fn client() -> ClientNode<MemoryStore, Loopback> {
        ClientNode::new(
            "client-1",
            Log::with_clock("client-1", MemoryStore::new(), clock::at(1_000)),
            Loopback::new(),
        )
    }

    fn server() -> ServerNode<MemoryStore, Loopback> {
        ServerNode::new(
            "server-1",
            Log::with_clock("server-1", MemoryStore::new(), clock::at(1_050)),
            Loopback::new(),
        )
    }

    fn take_sent(conn: &mut Loopback) -> Option<Message> {
        conn.take_sent().into_iter().next()
    }

    #[tokio::test]
    async fn handshake_completes_and_both_sides_synchronize() {
        super::logger::init();

        let mut client = client();
        let mut server = server();

        client.connect().await.unwrap();
        server.connect().await.unwrap();

        // Client emitted `connect` on its loopback; hand it to the server directly.
        let connect_msg = take_sent(client.connection_mut()).expect("client sends connect");
        server
            .handle_connection_event(ConnectionEvent::Message(connect_msg))
            .await
            .unwrap();
        assert_eq!(server.state(), NodeState::SentConnected);

        let connected_msg = take_sent(server.connection_mut()).expect("server sends connected");
        client
            .handle_connection_event(ConnectionEvent::Message(connected_msg))
            .await
            .unwrap();
        assert_eq!(client.state(), NodeState::Synchronized);
    }

    #[tokio::test]
    async fn wrong_protocol_version_is_rejected() {
        let mut server = server();
        server.connect().await.unwrap();

        let bad_connect = Message::Connect {
            protocol: PROTOCOL_VERSION + 1,
            node_id: "client-1".to_string(),
            synced: 0,
            opts: HandshakeOpts::default(),
        };
        let err = server
            .handle_connection_event(ConnectionEvent::Message(bad_connect))
            .await
            .unwrap_err();

        assert_eq!(err, LoguxError::WrongProtocol);
    }

    #[tokio::test]
    async fn synchronized_action_is_stored_on_the_other_side() {
        let mut client = client();
        let mut server = server();
        client.connect().await.unwrap();
        server.connect().await.unwrap();

        let connect_msg = take_sent(client.connection_mut()).unwrap();
        server
            .handle_connection_event(ConnectionEvent::Message(connect_msg))
            .await
            .unwrap();
        let connected_msg = take_sent(server.connection_mut()).unwrap();
        client
            .handle_connection_event(ConnectionEvent::Message(connected_msg))
            .await
            .unwrap();

        let id = client.log_mut().generate_id();
        let meta = Meta::new(id.clone()).with_reasons(["test".to_string()]);
        client
            .log_mut()
            .add(Action::new("test/a"), Some(meta))
            .await
            .unwrap();
        client.sync().await;

        let sync_msg = take_sent(client.connection_mut()).expect("client should have sent a sync message");
        server
            .handle_connection_event(ConnectionEvent::Message(sync_msg))
            .await
            .unwrap();

        assert!(server.log().store().has(&id).await);
    }

    struct RequireExactSubprotocol(&'static str);

    impl crate::node::SubprotocolMatcher for RequireExactSubprotocol {
        fn matches(&self, peer_subprotocol: Option<&str>) -> bool {
            peer_subprotocol == Some(self.0)
        }
    }

    #[tokio::test]
    async fn server_rejects_mismatched_subprotocol() {
        let mut client = client();
        let mut server = ServerNode::with_auth_and_subprotocol(
            "server-1",
            Log::with_clock("server-1", MemoryStore::new(), clock::at(1_050)),
            Loopback::new(),
            crate::node::AllowAll,
            RequireExactSubprotocol("2.0.0"),
            NodeOptions::default(),
        );

        client.set_subprotocol("1.0.0");
        client.connect().await.unwrap();
        server.connect().await.unwrap();

        let connect_msg = take_sent(client.connection_mut()).unwrap();
        let err = server
            .handle_connection_event(ConnectionEvent::Message(connect_msg))
            .await
            .unwrap_err();

        assert_eq!(err, LoguxError::WrongSubprotocol);
    }

    #[tokio::test]
    async fn handshake_records_clients_synced_as_last_received() {
        let mut client = client();
        let mut server = server();

        let id = client.log_mut().generate_id();
        let meta = Meta::new(id).with_reasons(["test".to_string()]);
        client
            .log_mut()
            .add(Action::new("test/a"), Some(meta))
            .await
            .unwrap();

        client.connect().await.unwrap();
        server.connect().await.unwrap();

        let connect_msg = take_sent(client.connection_mut()).unwrap();
        server
            .handle_connection_event(ConnectionEvent::Message(connect_msg))
            .await
            .unwrap();

        let synced = server.log().store().last_synced("client-1").await;
        assert_eq!(synced.received, 1, "server records the client's lastAdded as lastReceived");
    }

    fn client_with_options(options: NodeOptions) -> ClientNode<MemoryStore, Loopback> {
        ClientNode::with_options(
            "client-1",
            Log::with_clock("client-1", MemoryStore::new(), clock::at(1_000)),
            Loopback::new(),
            options,
        )
    }

    fn server_with_options(options: NodeOptions) -> ServerNode<MemoryStore, Loopback> {
        ServerNode::with_options(
            "server-1",
            Log::with_clock("server-1", MemoryStore::new(), clock::at(1_050)),
            Loopback::new(),
            options,
        )
    }

    async fn handshake(client: &mut ClientNode<MemoryStore, Loopback>, server: &mut ServerNode<MemoryStore, Loopback>) {
        client.connect().await.unwrap();
        server.connect().await.unwrap();
        let connect_msg = take_sent(client.connection_mut()).unwrap();
        server
            .handle_connection_event(ConnectionEvent::Message(connect_msg))
            .await
            .unwrap();
        let connected_msg = take_sent(server.connection_mut()).unwrap();
        client
            .handle_connection_event(ConnectionEvent::Message(connected_msg))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn no_ping_before_handshake_completes() {
        // S3: ping=100, timeout=300; a node that only `connect`ed sends no ping for a while.
        let mut client = client_with_options(NodeOptions::new(100, 300, false));
        client.connect().await.unwrap();
        take_sent(client.connection_mut());

        client.log().clock().elapse(250);
        client.tick().await.unwrap();

        assert!(take_sent(client.connection_mut()).is_none());
    }

    #[tokio::test]
    async fn single_ping_when_timeout_greater_than_ping_interval() {
        // S4: ping=100, timeout=300; after enough idle time exactly one ping has been sent.
        let mut client = client_with_options(NodeOptions::new(100, 300, false));
        let mut server = server_with_options(NodeOptions::default());
        handshake(&mut client, &mut server).await;
        take_sent(client.connection_mut());

        client.log().clock().elapse(250);
        client.tick().await.unwrap();
        client.tick().await.unwrap();
        client.tick().await.unwrap();

        let sent = client.connection_mut().take_sent();
        assert_eq!(sent, vec![Message::Ping(1)]);
    }

    #[tokio::test]
    async fn pong_resets_the_heartbeat_and_missing_pong_times_out() {
        // S1: ping=300, timeout=100.
        let mut client = client_with_options(NodeOptions::new(300, 100, false));
        let mut server = server_with_options(NodeOptions::default());
        handshake(&mut client, &mut server).await;
        take_sent(client.connection_mut());

        client.log().clock().elapse(300);
        client.tick().await.unwrap();
        assert_eq!(client.connection_mut().take_sent(), vec![Message::Ping(1)]);

        client
            .handle_connection_event(ConnectionEvent::Message(Message::Pong(1)))
            .await
            .unwrap();

        client.log().clock().elapse(150);
        let err = client.tick().await;
        assert!(err.is_ok(), "a fresh pong must reset the timeout clock");

        client.log().clock().elapse(300);
        client.tick().await.unwrap();
        assert_eq!(client.connection_mut().take_sent(), vec![Message::Ping(2)]);

        client.log().clock().elapse(200);
        let err = client.tick().await.unwrap_err();
        assert_eq!(err, LoguxError::Timeout);
        assert_eq!(client.state(), NodeState::Disconnected);
    }

    #[tokio::test]
    async fn synced_entries_are_not_rebroadcast_to_their_origin() {
        let mut client = client();
        let mut server = server();
        handshake(&mut client, &mut server).await;

        let id = client.log_mut().generate_id();
        let meta = Meta::new(id.clone()).with_reasons(["test".to_string()]);
        client.log_mut().add(Action::new("test/a"), Some(meta)).await.unwrap();
        client.sync().await;

        let sync_msg = take_sent(client.connection_mut()).unwrap();
        server
            .handle_connection_event(ConnectionEvent::Message(sync_msg))
            .await
            .unwrap();
        assert!(server.log().store().has(&id).await);

        // The server's own periodic `sync()` must not echo the action straight back to the
        // client it just arrived from.
        server.sync().await;
        assert!(
            take_sent(server.connection_mut()).is_none(),
            "an action absorbed from a peer must not be resent to that same peer"
        );
    }
}
