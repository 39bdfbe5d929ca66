//! Transport layer for the MQTT engine
//!
//! The engine never opens sockets itself. It asks a [`Connector`] for a byte
//! stream, which lets tests substitute in-memory duplex pipes for a broker.

use crate::transport::mqtt::connection::CONNECT_TIMEOUT;
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

pub mod mqtt;

/// Bidirectional byte stream carrying MQTT frames
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Factory for transport connections
///
/// Called once per connection attempt by the connection supervisor.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream>;
}

/// Plain TCP connector
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {host}:{port} timed out"),
                )
            })??;
        stream.set_nodelay(true)?;
        debug!(host, port, "TCP connection established");
        Ok(Box::new(stream))
    }
}
