// tests/integration/status_test.rs

//! Server-list ping flow and malformed handshakes.

use super::test_helpers::*;
use worldgate::core::protocol::{
    ClientboundPacket, HandshakeIntent, HandshakePacket, RawPacket, ServerboundPacket,
    StatusClientbound, StatusServerbound,
};

#[tokio::test]
async fn test_status_request_and_ping() {
    let mut config = test_config();
    config.status.motd = "Integration".to_string();
    config.status.max_players = 42;
    let server = TestServer::new(config);
    let mut client = server.connect(addr("10.0.0.7:40000"));

    client.handshake(HandshakeIntent::Status).await;
    client
        .send(ServerboundPacket::Status(StatusServerbound::Request))
        .await;

    let ClientboundPacket::Status(StatusClientbound::ServerInfo(info)) =
        client.expect_packet().await
    else {
        panic!("expected a server info response");
    };
    assert_eq!(info.description.text, "Integration");
    assert_eq!(info.players.max, 42);
    assert_eq!(info.players.online, 0);
    assert_eq!(info.version.protocol, worldgate::core::protocol::PROTOCOL_VERSION);

    client
        .send(ServerboundPacket::Status(StatusServerbound::Ping { payload: 42 }))
        .await;
    assert_eq!(
        client.expect_packet().await,
        ClientboundPacket::Status(StatusClientbound::Pong { payload: 42 })
    );

    // The connection closes after the pong.
    assert!(client.drain_until_closed().await.is_empty());
    assert_eq!(server.state.stats.get_status_requests(), 1);
}

#[tokio::test]
async fn test_status_reports_online_players() {
    let server = TestServer::new(test_config());

    let mut player = server.connect(loopback());
    player.handshake(HandshakeIntent::Login).await;
    player.login_start("dave").await;
    assert!(matches!(
        player.expect_packet().await,
        ClientboundPacket::Login(worldgate::core::protocol::LoginClientbound::Success { .. })
    ));
    server
        .wait_for_player(&worldgate::core::identity::offline_uuid("dave"))
        .await;

    let mut pinger = server.connect(addr("10.0.0.8:40000"));
    pinger.handshake(HandshakeIntent::Status).await;
    pinger
        .send(ServerboundPacket::Status(StatusServerbound::Request))
        .await;
    let ClientboundPacket::Status(StatusClientbound::ServerInfo(info)) =
        pinger.expect_packet().await
    else {
        panic!("expected a server info response");
    };
    assert_eq!(info.players.online, 1);
    assert_eq!(info.players.sample.len(), 1);
    assert_eq!(info.players.sample[0].name, "dave");
}

#[tokio::test]
async fn test_ping_without_request_is_answered() {
    let server = TestServer::new(test_config());
    let mut client = server.connect(addr("10.0.0.9:40000"));

    client.handshake(HandshakeIntent::Status).await;
    client
        .send(ServerboundPacket::Status(StatusServerbound::Ping { payload: -7 }))
        .await;
    assert_eq!(
        client.expect_packet().await,
        ClientboundPacket::Status(StatusClientbound::Pong { payload: -7 })
    );
    assert!(client.drain_until_closed().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_status_request_closes() {
    let server = TestServer::new(test_config());
    let mut client = server.connect(addr("10.0.0.10:40000"));

    client.handshake(HandshakeIntent::Status).await;
    client
        .send(ServerboundPacket::Status(StatusServerbound::Request))
        .await;
    client
        .send(ServerboundPacket::Status(StatusServerbound::Request))
        .await;

    let packets = client.drain_until_closed().await;
    assert_eq!(packets.len(), 1, "only the first request is answered");
}

#[tokio::test]
async fn test_unknown_intent_closes_connection() {
    let server = TestServer::new(test_config());
    let mut client = server.connect(addr("10.0.0.11:40000"));

    client
        .send(ServerboundPacket::Handshake(HandshakePacket {
            protocol_version: 47,
            server_address: "localhost".to_string(),
            server_port: 25565,
            next_state: 3,
        }))
        .await;

    assert!(client.drain_until_closed().await.is_empty());
}

#[tokio::test]
async fn test_unknown_status_packet_closes_connection() {
    let server = TestServer::new(test_config());
    let mut client = server.connect(addr("10.0.0.12:40000"));

    client.handshake(HandshakeIntent::Status).await;
    client
        .send(ServerboundPacket::Play(RawPacket::new(0x05, Vec::new())))
        .await;

    assert!(client.drain_until_closed().await.is_empty());
    assert_eq!(server.state.stats.get_status_requests(), 0);
}

#[tokio::test]
async fn test_idle_sockets_time_out_before_login() {
    let mut config = test_config();
    config.login_timeout_ticks = 5;
    let server = TestServer::new(config);

    let mut silent = server.connect(addr("10.0.0.13:40000"));
    let mut pinger = server.connect(addr("10.0.0.14:40000"));
    pinger.handshake(HandshakeIntent::Status).await;

    // Neither phase has a disconnect packet; the socket just closes.
    assert!(silent.drain_until_closed().await.is_empty());
    assert!(pinger.drain_until_closed().await.is_empty());

    let (silent_session, pinger_session) = (silent.session_id, pinger.session_id);
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while server.state.clients.contains_key(&silent_session)
            || server.state.clients.contains_key(&pinger_session)
        {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("idle connections release their slots");
}
