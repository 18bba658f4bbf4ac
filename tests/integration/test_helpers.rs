// tests/integration/test_helpers.rs

//! Test helpers for driving real `ConnectionHandler`s over in-memory pipes.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use uuid::Uuid;
use worldgate::config::Config;
use worldgate::connection::ConnectionHandler;
use worldgate::core::WorldGateError;
use worldgate::core::crypto::ServerKeyPair;
use worldgate::core::identity::{Identity, IdentityAuthority, OfflineAuthority, ResolveRequest};
use worldgate::core::protocol::buf::{DEFAULT_MAX_STRING_CHARS, PacketRead};
use worldgate::core::protocol::packets::PLAY_DISCONNECT_ID;
use worldgate::core::protocol::{
    ClientboundPacket, HandshakeIntent, HandshakePacket, LoginClientbound, LoginServerbound,
    PROTOCOL_VERSION, PacketCodec, PhaseKind, ServerboundPacket,
};
use worldgate::core::simulation::SimulationEvent;
use worldgate::core::state::ServerState;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// One keypair for the whole test binary. Generation is the slow part of these tests.
pub fn test_keypair() -> Arc<ServerKeyPair> {
    static KEYPAIR: OnceLock<Arc<ServerKeyPair>> = OnceLock::new();
    KEYPAIR
        .get_or_init(|| Arc::new(ServerKeyPair::generate(1024).expect("keypair generation")))
        .clone()
}

/// An insecure, uncompressed, unthrottled server with fast ticks.
pub fn test_config() -> Config {
    Config {
        online_mode: false,
        compression_threshold: -1,
        connection_throttle_ms: 0,
        tick_rate: 100,
        login_timeout_ticks: 600,
        ..Config::default()
    }
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().expect("valid socket address")
}

pub fn loopback() -> SocketAddr {
    addr("127.0.0.1:50000")
}

/// An authority that answers every request with a fixed identity and remembers
/// what it was asked.
#[derive(Debug)]
pub struct StubAuthority {
    answer: Result<Identity, WorldGateError>,
    pub requests: Mutex<Vec<ResolveRequest>>,
}

impl StubAuthority {
    pub fn answering(answer: Result<Identity, WorldGateError>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ResolveRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl IdentityAuthority for StubAuthority {
    async fn resolve(&self, request: &ResolveRequest) -> Result<Identity, WorldGateError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.answer.clone()
    }
}

/// An authority that never answers.
#[derive(Debug)]
pub struct HangingAuthority;

#[async_trait]
impl IdentityAuthority for HangingAuthority {
    async fn resolve(&self, _request: &ResolveRequest) -> Result<Identity, WorldGateError> {
        std::future::pending().await
    }
}

pub struct TestServer {
    pub state: Arc<ServerState>,
    pub simulation_rx: mpsc::UnboundedReceiver<SimulationEvent>,
    shutdown_tx: broadcast::Sender<()>,
    next_session: AtomicU64,
}

impl TestServer {
    pub fn new(config: Config) -> Self {
        Self::with_authority(config, Arc::new(OfflineAuthority))
    }

    pub fn with_authority(config: Config, authority: Arc<dyn IdentityAuthority>) -> Self {
        init_tracing();
        let init = ServerState::with_components(config, test_keypair(), authority);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            state: init.state,
            simulation_rx: init.simulation_rx,
            shutdown_tx,
            next_session: AtomicU64::new(0),
        }
    }

    /// Opens a connection from `peer` and runs its handler on a new task.
    pub fn connect(&self, peer: SocketAddr) -> TestClient {
        self.connect_with_buffer(peer, 64 * 1024)
    }

    /// Like `connect`, with `buffer` bytes of pipe capacity in each direction. A
    /// small buffer stalls server writes until the client reads.
    pub fn connect_with_buffer(&self, peer: SocketAddr, buffer: usize) -> TestClient {
        let (client_io, server_io) = tokio::io::duplex(buffer);
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let handler = ConnectionHandler::new(
            Box::new(server_io),
            peer,
            self.state.clone(),
            session_id,
            self.shutdown_tx.subscribe(),
        );
        tokio::spawn(handler.run());
        TestClient::new(client_io, session_id)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the next simulation event.
    pub async fn next_event(&mut self) -> SimulationEvent {
        tokio::time::timeout(RECV_TIMEOUT, self.simulation_rx.recv())
            .await
            .expect("timed out waiting for a simulation event")
            .expect("simulation channel closed")
    }

    /// Polls until `id` is registered as online, and returns its session.
    pub async fn wait_for_player(&self, id: &Uuid) -> u64 {
        tokio::time::timeout(RECV_TIMEOUT, async {
            loop {
                if let Some(session) = self.state.player_session(id) {
                    return session;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for player registration")
    }
}

/// The client side of a connection. Speaks the protocol with the crate's own codec
/// and packet types, and follows the server's phase and compression changes.
pub struct TestClient {
    framed: Framed<DuplexStream, PacketCodec>,
    phase: PhaseKind,
    pub session_id: u64,
}

impl TestClient {
    fn new(io: DuplexStream, session_id: u64) -> Self {
        Self {
            framed: Framed::new(io, PacketCodec::new()),
            phase: PhaseKind::Handshake,
            session_id,
        }
    }

    pub fn phase(&self) -> PhaseKind {
        self.phase
    }

    pub async fn send(&mut self, packet: ServerboundPacket) {
        let raw = packet.encode().expect("encode serverbound packet");
        self.framed.send(raw).await.expect("send to server");
    }

    pub async fn handshake_with_version(&mut self, intent: HandshakeIntent, protocol_version: i32) {
        self.send(ServerboundPacket::Handshake(HandshakePacket {
            protocol_version,
            server_address: "localhost".to_string(),
            server_port: 25565,
            next_state: intent as i32,
        }))
        .await;
        self.phase = match intent {
            HandshakeIntent::Status => PhaseKind::Status,
            HandshakeIntent::Login => PhaseKind::Login,
        };
    }

    pub async fn handshake(&mut self, intent: HandshakeIntent) {
        self.handshake_with_version(intent, PROTOCOL_VERSION).await;
    }

    pub async fn login_start(&mut self, name: &str) {
        self.send(ServerboundPacket::Login(LoginServerbound::Start {
            name: name.to_string(),
        }))
        .await;
    }

    /// Receives the next packet, or `None` once the server closed the connection.
    pub async fn recv(&mut self) -> Option<ClientboundPacket> {
        let next = tokio::time::timeout(RECV_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for the server");
        let raw = match next {
            Some(Ok(raw)) => raw,
            Some(Err(WorldGateError::Io(_))) | None => return None,
            Some(Err(e)) => panic!("client failed to decode server frame: {e}"),
        };
        let packet = ClientboundPacket::decode(self.phase, raw).expect("decode clientbound packet");
        match &packet {
            ClientboundPacket::Login(LoginClientbound::SetCompression { threshold }) => {
                if let Ok(threshold) = usize::try_from(*threshold) {
                    self.framed
                        .codec_mut()
                        .enable_compression(threshold)
                        .expect("enable client compression");
                }
            }
            ClientboundPacket::Login(LoginClientbound::Success { .. }) => {
                self.phase = PhaseKind::Play;
            }
            _ => {}
        }
        Some(packet)
    }

    /// Receives the next packet and fails the test if the connection closed instead.
    pub async fn expect_packet(&mut self) -> ClientboundPacket {
        self.recv().await.expect("connection closed unexpectedly")
    }

    /// Asserts the server closes the connection, returning every packet it sent first.
    pub async fn drain_until_closed(&mut self) -> Vec<ClientboundPacket> {
        let mut packets = Vec::new();
        while let Some(packet) = self.recv().await {
            packets.push(packet);
        }
        packets
    }

    pub fn enable_encryption(&mut self, secret: &[u8]) {
        self.framed
            .codec_mut()
            .enable_encryption(secret)
            .expect("enable client encryption");
    }
}

/// Encrypts `data` for the server the way a client does: PKCS#1 v1.5 under the
/// public key from the encryption request.
pub fn encrypt_for_server(public_der: &[u8], data: &[u8]) -> Vec<u8> {
    let key = RsaPublicKey::from_public_key_der(public_der).expect("parse server public key");
    key.encrypt(&mut OsRng, Pkcs1v15Encrypt, data)
        .expect("encrypt for server")
}

/// Extracts the disconnect reason, whichever phase it was sent in.
pub fn disconnect_reason(packet: &ClientboundPacket) -> Option<String> {
    match packet {
        ClientboundPacket::Login(LoginClientbound::Disconnect { reason }) => Some(reason.clone()),
        ClientboundPacket::Play(raw) if raw.id == PLAY_DISCONNECT_ID => {
            let mut body = raw.body.clone();
            body.read_string(DEFAULT_MAX_STRING_CHARS).ok()
        }
        _ => None,
    }
}
