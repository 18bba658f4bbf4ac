// tests/integration/shutdown_test.rs

use super::test_helpers::*;
use worldgate::core::identity::offline_uuid;
use worldgate::core::protocol::{ClientboundPacket, HandshakeIntent, LoginClientbound};

#[tokio::test]
async fn test_shutdown_disconnects_every_phase() {
    let server = TestServer::new(test_config());

    let mut player = server.connect(addr("10.3.0.1:40000"));
    player.handshake(HandshakeIntent::Login).await;
    player.login_start("nina").await;
    assert!(matches!(
        player.expect_packet().await,
        ClientboundPacket::Login(LoginClientbound::Success { .. })
    ));
    server.wait_for_player(&offline_uuid("nina")).await;

    let mut logging_in = server.connect(addr("10.3.0.2:40000"));
    logging_in.handshake(HandshakeIntent::Login).await;

    let mut idle = server.connect(addr("10.3.0.3:40000"));

    // Let the handlers pick up their first events before the signal.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    server.shutdown();

    let reason = player
        .drain_until_closed()
        .await
        .last()
        .and_then(disconnect_reason);
    assert_eq!(reason.as_deref(), Some(r#"{"text":"Server closed"}"#));

    let reason = logging_in
        .drain_until_closed()
        .await
        .last()
        .and_then(disconnect_reason);
    assert_eq!(reason.as_deref(), Some(r#"{"text":"Server closed"}"#));

    assert!(idle.drain_until_closed().await.is_empty());
}
