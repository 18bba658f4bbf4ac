// tests/integration/login_test.rs

//! Login flows: insecure and secure logins, key exchange failures, throttling,
//! timeouts, handoff checks and play-phase forwarding.

use super::test_helpers::*;
use bytes::Bytes;
use uuid::Uuid;
use worldgate::core::WorldGateError;
use worldgate::core::crypto::server_hash;
use worldgate::core::identity::{Identity, offline_uuid};
use worldgate::core::protocol::{
    ClientboundPacket, HandshakeIntent, LoginClientbound, LoginServerbound, PhaseKind, RawPacket,
    ServerboundPacket, StatusServerbound,
};
use worldgate::core::simulation::SimulationEvent;

fn success(uuid: Uuid, username: &str) -> ClientboundPacket {
    ClientboundPacket::Login(LoginClientbound::Success {
        uuid,
        username: username.to_string(),
    })
}

/// Drains the connection and returns the disconnect reason it ended with.
async fn expect_disconnect(client: &mut TestClient) -> String {
    let packets = client.drain_until_closed().await;
    assert!(
        !packets
            .iter()
            .any(|p| matches!(p, ClientboundPacket::Login(LoginClientbound::Success { .. }))),
        "no success may precede a failed login: {packets:?}"
    );
    packets
        .last()
        .and_then(disconnect_reason)
        .unwrap_or_else(|| panic!("expected a disconnect packet, got {packets:?}"))
}

async fn offline_login(server: &TestServer, peer: &str, name: &str) -> TestClient {
    let mut client = server.connect(addr(peer));
    client.handshake(HandshakeIntent::Login).await;
    client.login_start(name).await;
    assert_eq!(
        client.expect_packet().await,
        success(offline_uuid(name), name)
    );
    client
}

#[tokio::test]
async fn test_insecure_login_reaches_play() {
    let mut server = TestServer::new(test_config());
    let mut client = server.connect(addr("10.2.0.1:40000"));

    client.handshake(HandshakeIntent::Login).await;
    client.login_start("alice").await;

    assert_eq!(
        client.expect_packet().await,
        success(offline_uuid("alice"), "alice")
    );
    assert_eq!(client.phase(), PhaseKind::Play);

    let SimulationEvent::SessionCreated(session) = server.next_event().await else {
        panic!("expected a session to be created");
    };
    assert_eq!(session.session_id, client.session_id);
    assert_eq!(session.identity.name, "alice");
    assert!(!session.encrypted);
    assert_eq!(session.compression_threshold, None);
    assert_eq!(
        server.state.player_session(&offline_uuid("alice")),
        Some(client.session_id)
    );
    assert_eq!(server.state.stats.get_total_logins(), 1);
}

#[tokio::test]
async fn test_secure_login_with_compression() {
    let identity = Identity {
        id: Uuid::new_v4(),
        name: "bob".to_string(),
        properties: Vec::new(),
    };
    let authority = StubAuthority::answering(Ok(identity.clone()));
    let mut config = test_config();
    config.online_mode = true;
    config.compression_threshold = 64;
    let mut server = TestServer::with_authority(config, authority.clone());
    let mut client = server.connect(addr("10.2.0.2:40000"));

    client.handshake(HandshakeIntent::Login).await;
    client.login_start("bob").await;

    let ClientboundPacket::Login(LoginClientbound::EncryptionBegin {
        server_id,
        public_key,
        verify_token,
    }) = client.expect_packet().await
    else {
        panic!("expected an encryption request");
    };
    assert_eq!(server_id, "");
    assert_eq!(&public_key, test_keypair().public_der());
    assert_eq!(verify_token.len(), 4);

    let secret = [0x5Au8; 16];
    client
        .send(ServerboundPacket::Login(LoginServerbound::EncryptionResponse {
            shared_secret: Bytes::from(encrypt_for_server(&public_key, &secret)),
            verify_token: Bytes::from(encrypt_for_server(&public_key, &verify_token)),
        }))
        .await;
    client.enable_encryption(&secret);

    // The announcement arrives before anything that could be compressed.
    assert_eq!(
        client.expect_packet().await,
        ClientboundPacket::Login(LoginClientbound::SetCompression { threshold: 64 })
    );
    assert_eq!(client.expect_packet().await, success(identity.id, "bob"));

    let SimulationEvent::SessionCreated(session) = server.next_event().await else {
        panic!("expected a session to be created");
    };
    assert!(session.encrypted);
    assert_eq!(session.compression_threshold, Some(64));
    assert_eq!(session.identity, identity);

    let requests = authority.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].username, "bob");
    assert_eq!(
        requests[0].server_hash,
        Some(server_hash("", &secret, test_keypair().public_der()))
    );
    assert_eq!(requests[0].client_ip, None);

    // Both directions keep working through cipher and compression.
    let outbound = RawPacket::new(0x21, vec![9u8; 300]);
    session.send(outbound.clone()).expect("session is connected");
    assert_eq!(client.expect_packet().await, ClientboundPacket::Play(outbound));

    let inbound = RawPacket::new(0x03, Bytes::from_static(b"hello"));
    client.send(ServerboundPacket::Play(inbound.clone())).await;
    match server.next_event().await {
        SimulationEvent::Packet { session_id, packet } => {
            assert_eq!(session_id, client.session_id);
            assert_eq!(packet, inbound);
        }
        other => panic!("expected a forwarded packet, got {other:?}"),
    }
}

#[tokio::test]
async fn test_proxy_prevention_forwards_client_ip() {
    let identity = Identity::offline("zoe");
    let authority = StubAuthority::answering(Ok(identity.clone()));
    let mut config = test_config();
    config.prevent_proxy_connections = true;
    let server = TestServer::with_authority(config, authority.clone());

    let mut client = server.connect(addr("10.2.0.3:40000"));
    client.handshake(HandshakeIntent::Login).await;
    client.login_start("zoe").await;
    assert_eq!(client.expect_packet().await, success(identity.id, "zoe"));

    let requests = authority.requests();
    assert_eq!(requests[0].client_ip, Some("10.2.0.3".parse().unwrap()));
    assert_eq!(requests[0].server_hash, None);
}

#[tokio::test]
async fn test_compressed_success_follows_announcement() {
    let mut config = test_config();
    config.compression_threshold = 0;
    let server = TestServer::new(config);
    let mut client = server.connect(addr("10.2.0.4:40000"));

    client.handshake(HandshakeIntent::Login).await;
    client.login_start("frank").await;

    assert_eq!(
        client.expect_packet().await,
        ClientboundPacket::Login(LoginClientbound::SetCompression { threshold: 0 })
    );
    assert_eq!(
        client.expect_packet().await,
        success(offline_uuid("frank"), "frank")
    );
}

#[tokio::test]
async fn test_wrong_verify_token_is_rejected() {
    let authority = StubAuthority::answering(Ok(Identity::offline("mallory")));
    let mut config = test_config();
    config.online_mode = true;
    let server = TestServer::with_authority(config, authority.clone());
    let mut client = server.connect(addr("10.2.0.5:40000"));

    client.handshake(HandshakeIntent::Login).await;
    client.login_start("mallory").await;
    let ClientboundPacket::Login(LoginClientbound::EncryptionBegin {
        public_key,
        verify_token,
        ..
    }) = client.expect_packet().await
    else {
        panic!("expected an encryption request");
    };

    let wrong_token: Vec<u8> = verify_token.iter().map(|b| b ^ 0xFF).collect();
    client
        .send(ServerboundPacket::Login(LoginServerbound::EncryptionResponse {
            shared_secret: Bytes::from(encrypt_for_server(&public_key, &[1u8; 16])),
            verify_token: Bytes::from(encrypt_for_server(&public_key, &wrong_token)),
        }))
        .await;

    let reason = expect_disconnect(&mut client).await;
    assert!(reason.contains("Invalid nonce"), "unexpected reason {reason}");
    assert!(authority.requests().is_empty(), "the authority is never consulted");
}

#[tokio::test]
async fn test_short_shared_secret_is_rejected() {
    let mut config = test_config();
    config.online_mode = true;
    let server = TestServer::new(config);
    let mut client = server.connect(addr("10.2.0.6:40000"));

    client.handshake(HandshakeIntent::Login).await;
    client.login_start("oscar").await;
    let ClientboundPacket::Login(LoginClientbound::EncryptionBegin {
        public_key,
        verify_token,
        ..
    }) = client.expect_packet().await
    else {
        panic!("expected an encryption request");
    };

    client
        .send(ServerboundPacket::Login(LoginServerbound::EncryptionResponse {
            shared_secret: Bytes::from(encrypt_for_server(&public_key, &[1u8; 8])),
            verify_token: Bytes::from(encrypt_for_server(&public_key, &verify_token)),
        }))
        .await;

    let reason = expect_disconnect(&mut client).await;
    assert!(reason.contains("Encryption handshake failed"), "unexpected reason {reason}");
}

#[tokio::test]
async fn test_throttle_rejects_rapid_reconnect() {
    let mut config = test_config();
    config.connection_throttle_ms = 500;
    let server = TestServer::new(config);

    let _first = offline_login(&server, "1.2.3.4:40000", "gina").await;

    let mut second = server.connect(addr("1.2.3.4:40001"));
    second.handshake(HandshakeIntent::Login).await;
    second.login_start("gina2").await;
    let reason = expect_disconnect(&mut second).await;
    assert!(reason.contains("Connection throttled"), "unexpected reason {reason}");
}

#[tokio::test]
async fn test_throttle_ignores_loopback() {
    let mut config = test_config();
    config.connection_throttle_ms = 500;
    let server = TestServer::new(config);

    let _first = offline_login(&server, "127.0.0.1:40000", "hank").await;
    let _second = offline_login(&server, "127.0.0.1:40001", "hank2").await;
}

#[tokio::test]
async fn test_login_times_out_while_authenticating() {
    let mut config = test_config();
    config.login_timeout_ticks = 5;
    let server = TestServer::with_authority(config, std::sync::Arc::new(HangingAuthority));
    let mut client = server.connect(addr("10.2.0.7:40000"));

    client.handshake(HandshakeIntent::Login).await;
    client.login_start("ivan").await;

    let reason = expect_disconnect(&mut client).await;
    assert!(reason.contains("Took too long to log in"), "unexpected reason {reason}");
}

#[tokio::test]
async fn test_login_times_out_without_start() {
    let mut config = test_config();
    config.login_timeout_ticks = 5;
    let server = TestServer::new(config);
    let mut client = server.connect(addr("10.2.0.8:40000"));

    client.handshake(HandshakeIntent::Login).await;

    let reason = expect_disconnect(&mut client).await;
    assert!(reason.contains("Took too long to log in"), "unexpected reason {reason}");
}

#[tokio::test]
async fn test_identity_failures_carry_distinct_reasons() {
    for (error, expected) in [
        (WorldGateError::IdentityNotFound, "Failed to verify username"),
        (
            WorldGateError::IdentityUnavailable("down".to_string()),
            "Authentication servers are down",
        ),
    ] {
        let authority = StubAuthority::answering(Err(error));
        let server = TestServer::with_authority(test_config(), authority);
        let mut client = server.connect(addr("10.2.0.9:40000"));

        client.handshake(HandshakeIntent::Login).await;
        client.login_start("judy").await;

        let reason = expect_disconnect(&mut client).await;
        assert!(reason.contains(expected), "unexpected reason {reason}");
    }
}

#[tokio::test]
async fn test_protocol_version_mismatch() {
    let server = TestServer::new(test_config());

    let mut old = server.connect(addr("10.2.0.10:40000"));
    old.handshake_with_version(HandshakeIntent::Login, 5).await;
    let reason = expect_disconnect(&mut old).await;
    assert!(reason.contains("Outdated client!"), "unexpected reason {reason}");

    let mut new = server.connect(addr("10.2.0.11:40000"));
    new.handshake_with_version(HandshakeIntent::Login, 1000).await;
    let reason = expect_disconnect(&mut new).await;
    assert!(reason.contains("Outdated server!"), "unexpected reason {reason}");
}

#[tokio::test]
async fn test_invalid_usernames_are_rejected() {
    let server = TestServer::new(test_config());
    for name in ["bad name", "", "this_name_is_too_long"] {
        let mut client = server.connect(addr("10.2.0.12:40000"));
        client.handshake(HandshakeIntent::Login).await;
        client.login_start(name).await;
        let reason = expect_disconnect(&mut client).await;
        assert!(reason.contains("Protocol error"), "unexpected reason {reason} for {name:?}");
    }
}

#[tokio::test]
async fn test_status_packet_in_login_phase_disconnects() {
    let server = TestServer::new(test_config());
    let mut client = server.connect(addr("10.2.0.13:40000"));

    client.handshake(HandshakeIntent::Login).await;
    client
        .send(ServerboundPacket::Status(StatusServerbound::Ping { payload: 42 }))
        .await;

    let reason = expect_disconnect(&mut client).await;
    assert!(reason.contains("Protocol error"), "unexpected reason {reason}");
}

#[tokio::test]
async fn test_login_start_during_handshake_closes() {
    let server = TestServer::new(test_config());
    let mut client = server.connect(addr("10.2.0.14:40000"));

    client.login_start("alice").await;

    assert!(client.drain_until_closed().await.is_empty());
}

#[tokio::test]
async fn test_server_full_rejects_login() {
    let mut config = test_config();
    config.status.max_players = 0;
    let server = TestServer::new(config);
    let mut client = server.connect(addr("10.2.0.15:40000"));

    client.handshake(HandshakeIntent::Login).await;
    client.login_start("kate").await;

    let reason = expect_disconnect(&mut client).await;
    assert!(reason.contains("The server is full!"), "unexpected reason {reason}");
    assert_eq!(server.state.online_players(), 0);
}

#[tokio::test]
async fn test_duplicate_login_displaces_older_session() {
    let mut config = test_config();
    config.status.max_players = 1;
    let server = TestServer::new(config);
    let id = offline_uuid("carol");

    let mut first = offline_login(&server, "10.2.0.16:40000", "carol").await;
    assert_eq!(server.wait_for_player(&id).await, first.session_id);

    // The replacement fits even though the server is at capacity.
    let second = offline_login(&server, "10.2.0.17:40000", "carol").await;

    let packets = first.drain_until_closed().await;
    let reason = packets
        .last()
        .and_then(disconnect_reason)
        .expect("the older session receives a disconnect");
    assert!(reason.contains("You logged in from another location"));

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while server.state.player_session(&id) != Some(second.session_id) {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("the new session owns the identity");
    assert_eq!(server.state.online_players(), 1);
}

#[tokio::test]
async fn test_admin_kick_uses_disconnect_path() {
    let mut server = TestServer::new(test_config());
    let mut client = offline_login(&server, "10.2.0.18:40000", "liam").await;
    assert!(matches!(
        server.next_event().await,
        SimulationEvent::SessionCreated(_)
    ));

    let listed = server.state.list_clients().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, client.session_id);
    assert_eq!(listed[0].addr, addr("10.2.0.18:40000"));
    assert_eq!(listed[0].phase, PhaseKind::Play);
    assert_eq!(listed[0].username.as_deref(), Some("liam"));

    assert!(server.state.kick(client.session_id, "Bye now"));

    let packets = client.drain_until_closed().await;
    assert_eq!(packets.last().and_then(disconnect_reason).as_deref(), Some(r#"{"text":"Bye now"}"#));

    match server.next_event().await {
        SimulationEvent::SessionClosed {
            session_id, reason, ..
        } => {
            assert_eq!(session_id, client.session_id);
            assert_eq!(reason, "Bye now");
        }
        other => panic!("expected the session to close, got {other:?}"),
    }
    assert_eq!(server.state.online_players(), 0);
    assert!(!server.state.kick(client.session_id, "again"));
    assert!(server.state.list_clients().await.is_empty());
}

#[tokio::test]
async fn test_client_listing_tracks_login_progress() {
    let server = TestServer::with_authority(test_config(), std::sync::Arc::new(HangingAuthority));
    let idle = server.connect(addr("10.2.0.19:40000"));
    let mut waiting = server.connect(addr("10.2.0.20:40000"));

    waiting.handshake(HandshakeIntent::Login).await;
    waiting.login_start("mona").await;

    let listed = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let listed = server.state.list_clients().await;
            if listed.iter().any(|c| c.username.as_deref() == Some("mona")) {
                return listed;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("the login start shows up in the client listing");

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].session_id, idle.session_id);
    assert_eq!(listed[0].phase, PhaseKind::Handshake);
    assert_eq!(listed[0].username, None);
    assert_eq!(listed[1].session_id, waiting.session_id);
    assert_eq!(listed[1].phase, PhaseKind::Login);
    assert_eq!(listed[1].addr, addr("10.2.0.20:40000"));
}

#[tokio::test]
async fn test_garbage_secret_with_wrong_token_is_invalid_nonce() {
    let authority = StubAuthority::answering(Ok(Identity::offline("nina")));
    let mut config = test_config();
    config.online_mode = true;
    let server = TestServer::with_authority(config, authority.clone());
    let mut client = server.connect(addr("10.2.0.21:40000"));

    client.handshake(HandshakeIntent::Login).await;
    client.login_start("nina").await;
    let ClientboundPacket::Login(LoginClientbound::EncryptionBegin {
        public_key,
        verify_token,
        ..
    }) = client.expect_packet().await
    else {
        panic!("expected an encryption request");
    };

    let wrong_token: Vec<u8> = verify_token.iter().map(|b| b.wrapping_add(1)).collect();
    client
        .send(ServerboundPacket::Login(LoginServerbound::EncryptionResponse {
            // Not a ciphertext under the server key at all.
            shared_secret: Bytes::from_static(&[0xAB; 16]),
            verify_token: Bytes::from(encrypt_for_server(&public_key, &wrong_token)),
        }))
        .await;

    let reason = expect_disconnect(&mut client).await;
    assert!(reason.contains("Invalid nonce"), "unexpected reason {reason}");
    assert!(authority.requests().is_empty(), "the authority is never consulted");
}

#[tokio::test]
async fn test_stalled_success_does_not_admit_a_second_session() {
    let mut config = test_config();
    config.status.max_players = 1;
    let mut server = TestServer::new(config);
    let id = offline_uuid("alice");

    // The first client never reads, so its success packet cannot be written.
    let mut stalled = server.connect_with_buffer(addr("10.2.0.22:40000"), 16);
    stalled.handshake(HandshakeIntent::Login).await;
    stalled.login_start("alice").await;
    assert_eq!(server.wait_for_player(&id).await, stalled.session_id);
    assert_eq!(server.state.online_players(), 1);

    let second = offline_login(&server, "10.2.0.23:40000", "alice").await;
    assert_eq!(server.state.player_session(&id), Some(second.session_id));
    assert_eq!(server.state.online_players(), 1);

    // Unblocking the first client delivers its success, then the displacement.
    let packets = stalled.drain_until_closed().await;
    assert_eq!(packets.first(), Some(&success(id, "alice")));
    let reason = packets
        .last()
        .and_then(disconnect_reason)
        .expect("the displaced session receives a disconnect");
    assert!(reason.contains("You logged in from another location"), "unexpected reason {reason}");

    let stalled_session = stalled.session_id;
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while server.state.clients.contains_key(&stalled_session) {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("the displaced connection is cleaned up");
    assert_eq!(server.state.player_session(&id), Some(second.session_id));
    assert_eq!(server.state.online_players(), 1);
    assert!(server.state.clients.contains_key(&second.session_id));

    // Only the surviving session was ever announced to the simulation.
    match server.next_event().await {
        SimulationEvent::SessionCreated(session) => {
            assert_eq!(session.session_id, second.session_id);
        }
        other => panic!("expected the second session to be created, got {other:?}"),
    }
    assert!(server.state.kick(second.session_id, "done"));
    match server.next_event().await {
        SimulationEvent::SessionClosed { session_id, .. } => {
            assert_eq!(session_id, second.session_id);
        }
        other => panic!("expected the second session to close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_logins_for_one_name_leave_one_player() {
    let mut config = test_config();
    config.status.max_players = 1;
    let server = TestServer::new(config);
    let id = offline_uuid("oscar");

    let mut first = server.connect(addr("10.2.0.24:40000"));
    let mut second = server.connect(addr("10.2.0.25:40000"));
    first.handshake(HandshakeIntent::Login).await;
    second.handshake(HandshakeIntent::Login).await;
    tokio::join!(first.login_start("oscar"), second.login_start("oscar"));

    // Both handoffs succeed; whichever claimed the slot first is displaced.
    assert_eq!(first.expect_packet().await, success(id, "oscar"));
    assert_eq!(second.expect_packet().await, success(id, "oscar"));

    let (first_session, second_session) = (first.session_id, second.session_id);
    let survivor = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match (
                server.state.clients.contains_key(&first_session),
                server.state.clients.contains_key(&second_session),
            ) {
                (true, false) => return first_session,
                (false, true) => return second_session,
                _ => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
            }
        }
    })
    .await
    .expect("exactly one connection survives");

    let loser = if survivor == first_session { &mut second } else { &mut first };
    let packets = loser.drain_until_closed().await;
    let reason = packets
        .last()
        .and_then(disconnect_reason)
        .expect("the displaced session receives a disconnect");
    assert!(reason.contains("You logged in from another location"), "unexpected reason {reason}");

    assert_eq!(server.state.player_session(&id), Some(survivor));
    assert_eq!(server.state.online_players(), 1);
}
