// src/connection/transport.rs

//! Defines `Connection`, the per-socket transport object. It owns the framed stream
//! (and with it the cipher and compression state), the current phase and the tick
//! counter. Phase listeners operate on the connection through this type.

use crate::core::WorldGateError;
use crate::core::protocol::{ClientboundPacket, PacketCodec, PhaseKind, RawPacket};
use crate::server::AnyStream;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::codec::Framed;
use tracing::debug;

/// How long a disconnect may spend flushing its final packet to a stalled peer.
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Connection {
    framed: Framed<AnyStream, PacketCodec>,
    addr: SocketAddr,
    session_id: u64,
    phase: PhaseKind,
    ticks: u64,
    closed: bool,
}

impl Connection {
    pub fn new(stream: AnyStream, addr: SocketAddr, session_id: u64) -> Self {
        Self {
            framed: Framed::new(stream, PacketCodec::new()),
            addr,
            session_id,
            phase: PhaseKind::Handshake,
            ticks: 0,
            closed: false,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn phase(&self) -> PhaseKind {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_encrypted(&self) -> bool {
        self.framed.codec().is_encrypted()
    }

    pub fn compression_threshold(&self) -> Option<usize> {
        self.framed.codec().compression_threshold()
    }

    /// Advances the tick counter and returns the new value.
    pub fn tick(&mut self) -> u64 {
        self.ticks += 1;
        self.ticks
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Moves the connection to `next`. Only forward transitions are legal.
    pub fn set_phase(&mut self, next: PhaseKind) -> Result<(), WorldGateError> {
        if !self.phase.can_advance_to(next) {
            return Err(WorldGateError::ProtocolViolation(format!(
                "illegal phase transition {} -> {}",
                self.phase, next
            )));
        }
        debug!(
            "Session {}: phase {} -> {}",
            self.session_id, self.phase, next
        );
        self.phase = next;
        Ok(())
    }

    /// Encodes and sends `packet`, flushing before returning.
    pub async fn send(&mut self, packet: ClientboundPacket) -> Result<(), WorldGateError> {
        let raw = packet.encode()?;
        debug!("Session {}: sending {}", self.session_id, packet.name());
        self.send_raw(raw).await
    }

    pub async fn send_raw(&mut self, raw: RawPacket) -> Result<(), WorldGateError> {
        if self.closed {
            return Err(std::io::Error::from(std::io::ErrorKind::NotConnected).into());
        }
        self.framed.send(raw).await
    }

    /// Waits for the next complete inbound packet. `None` means the peer closed.
    pub async fn next_packet(&mut self) -> Option<Result<RawPacket, WorldGateError>> {
        if self.closed {
            return None;
        }
        self.framed.next().await
    }

    /// Installs the session cipher for both directions.
    pub fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<(), WorldGateError> {
        self.framed.codec_mut().enable_encryption(shared_secret)
    }

    /// Switches to compressed framing. Every packet encoded after this call uses the
    /// compressed layout, so the announcement must already be flushed.
    pub fn enable_compression(&mut self, threshold: usize) -> Result<(), WorldGateError> {
        self.framed.codec_mut().enable_compression(threshold)
    }

    /// Sends a best-effort disconnect packet for the current phase and closes the
    /// socket. Errors are swallowed since the transport may already be gone. Calling
    /// this more than once is a no-op.
    pub async fn disconnect(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;

        let farewell = match self.phase {
            PhaseKind::Login => Some(ClientboundPacket::login_disconnect(reason)),
            PhaseKind::Play => Some(ClientboundPacket::play_disconnect(reason)),
            PhaseKind::Handshake | PhaseKind::Status => None,
        };

        let session_id = self.session_id;
        let framed = &mut self.framed;
        let close = async move {
            if let Some(packet) = farewell {
                match packet.encode() {
                    Ok(raw) => {
                        if let Err(e) = framed.feed(raw).await {
                            debug!("Session {}: could not queue disconnect: {}", session_id, e);
                        }
                    }
                    Err(e) => debug!("Session {}: could not encode disconnect: {}", session_id, e),
                }
            }
            if let Err(e) = framed.close().await {
                debug!("Session {}: error while closing: {}", session_id, e);
            }
        };
        if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, close)
            .await
            .is_err()
        {
            debug!("Session {}: timed out flushing disconnect.", session_id);
        }
    }
}
