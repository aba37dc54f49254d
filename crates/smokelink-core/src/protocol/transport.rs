//! Byte-stream transports
//!
//! The link client only needs an async byte stream. A [`Connector`] opens
//! one for an endpoint; the serial connector is the production transport
//! and tests plug in in-memory pipes.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialStream;

use super::serial::open_port;

/// Opens the byte stream a link runs over
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open `endpoint`; `baud_rate` is ignored by non-serial transports
    fn open(&self, endpoint: &str, baud_rate: u32) -> io::Result<Self::Stream>;
}

/// Connector for a local serial port
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Stream = SerialStream;

    fn open(&self, endpoint: &str, baud_rate: u32) -> io::Result<SerialStream> {
        open_port(endpoint, baud_rate)
    }
}
