//! In-memory remote for link client tests

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use smokelink_core::config::LinkConfig;
use smokelink_core::protocol::frame::{DecodedFrame, SequenceCounter};
use smokelink_core::protocol::{
    Connector, Frame, FrameCodec, FrameHeader, LinkClient, Packet, Status,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Connector handing the far end of each new pipe to the test
pub struct DuplexConnector {
    remotes: mpsc::UnboundedSender<DuplexStream>,
    refuse: Arc<AtomicBool>,
}

impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    fn open(&self, endpoint: &str, _baud_rate: u32) -> io::Result<DuplexStream> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such port {endpoint}"),
            ));
        }
        let (client_end, remote_end) = tokio::io::duplex(PIPE_CAPACITY);
        self.remotes
            .send(remote_end)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "test harness gone"))?;
        Ok(client_end)
    }
}

pub struct Harness {
    pub client: LinkClient<DuplexConnector>,
    remotes: mpsc::UnboundedReceiver<DuplexStream>,
    pub refuse: Arc<AtomicBool>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(LinkConfig::for_endpoint("mock0"))
    }

    pub fn with_config(config: LinkConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicBool::new(false));
        let connector = DuplexConnector {
            remotes: tx,
            refuse: refuse.clone(),
        };
        Self {
            client: LinkClient::with_connector(connector, config),
            remotes: rx,
            refuse,
        }
    }

    /// Connect the client and return the remote side of the pipe
    pub async fn connect(&mut self) -> FakeRemote {
        self.client.open().await.expect("connect");
        let stream = self.remotes.recv().await.expect("remote end");
        FakeRemote::new(stream)
    }
}

/// Frame-level view of the device side
pub struct FakeRemote {
    stream: DuplexStream,
    codec: FrameCodec,
    buffer: BytesMut,
    sequence: SequenceCounter,
}

impl FakeRemote {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            codec: FrameCodec::new(),
            buffer: BytesMut::new(),
            sequence: SequenceCounter::new(),
        }
    }

    /// Next decoded frame the client sent (valid or not)
    pub async fn next_decoded(&mut self) -> DecodedFrame {
        loop {
            if let Some(decoded) = self.codec.decode(&mut self.buffer).expect("decode") {
                return decoded;
            }
            let mut chunk = [0u8; 512];
            let n = self.stream.read(&mut chunk).await.expect("remote read");
            assert!(n > 0, "client closed the link");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn next_frame(&mut self) -> Frame {
        match self.next_decoded().await {
            DecodedFrame::Valid(frame) => frame,
            DecodedFrame::Corrupt { header, .. } => {
                panic!("client sent corrupt frame {header:?}")
            }
        }
    }

    /// Next ACK or NAK, skipping nothing
    pub async fn next_reply(&mut self) -> FrameHeader {
        let frame = self.next_frame().await;
        assert!(
            frame.header.is_ack() || frame.header.is_nak(),
            "expected ACK/NAK, got {:?}",
            frame.header
        );
        frame.header
    }

    /// Next request packet, skipping ACK/NAK frames
    pub async fn next_request(&mut self) -> (FrameHeader, Packet) {
        loop {
            let frame = self.next_frame().await;
            if frame.header.is_ack() || frame.header.is_nak() {
                continue;
            }
            let packet = Packet::from_bytes(&frame.payload).expect("request packet");
            return (frame.header, packet);
        }
    }

    /// Send `packet` in an ack-requested data frame
    pub async fn send_packet(&mut self, packet: &Packet) -> u8 {
        let sequence = self.sequence.next_sequence();
        let frame = Frame::data(sequence, true, packet.to_bytes().to_vec());
        self.send_raw(&frame.to_bytes().expect("encode")).await;
        sequence
    }

    /// Send `packet` in a data frame that asks for no ACK
    pub async fn send_packet_unacked(&mut self, packet: &Packet) -> u8 {
        let sequence = self.sequence.next_sequence();
        let frame = Frame::data(sequence, false, packet.to_bytes().to_vec());
        self.send_raw(&frame.to_bytes().expect("encode")).await;
        sequence
    }

    /// Answer `request` with `status` and `data`
    pub async fn respond(&mut self, request: &Packet, status: Status, data: &[u8]) -> u8 {
        self.send_packet(&Packet::response_to(request, status, data))
            .await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("remote write");
        self.stream.flush().await.expect("remote flush");
    }

    /// Unplug the device
    pub fn unplug(self) {
        drop(self.stream);
    }
}
