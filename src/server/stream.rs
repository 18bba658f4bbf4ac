// src/server/stream.rs

use tokio::io::{AsyncRead, AsyncWrite};

/// Any byte stream a connection can run over: a TCP socket in production, an
/// in-memory duplex pipe in tests.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A boxed stream, so the connection types stay non-generic.
pub type AnyStream = Box<dyn ByteStream>;
