//! Receive side of the reliable framing layer
//!
//! Bytes from the transport are appended to a receive buffer and scanned
//! for frames. Every candidate frame is removed from the buffer before the
//! next one is attempted:
//! - CRC mismatch: counted, NAK'd (`CrcMismatch`) when the sender asked for
//!   an acknowledgment
//! - ACK/NAK frame: recorded in the statistics only
//! - data frame: payload handed to a [`PayloadHandler`], then ACK'd (`Ok`)
//!   or NAK'd (`HandlerDeclined`) when requested
//!
//! Nothing here does I/O. Reply frames are returned encoded so the caller
//! can write them after releasing whatever lock guards the receiver.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use super::frame::{DecodedFrame, Frame, FrameCodec, FrameStatus};
use super::stats::{Counter, StatsCounters};

/// Consumer of data-frame payloads
pub trait PayloadHandler {
    /// Process one payload; `false` declines it
    fn handle_payload(&mut self, payload: &[u8]) -> bool;
}

impl<F> PayloadHandler for F
where
    F: FnMut(&[u8]) -> bool,
{
    fn handle_payload(&mut self, payload: &[u8]) -> bool {
        self(payload)
    }
}

/// Incremental frame receiver with ACK/NAK generation
#[derive(Debug)]
pub struct ReliableReceiver {
    buffer: BytesMut,
    codec: FrameCodec,
    stats: Arc<StatsCounters>,
}

impl ReliableReceiver {
    pub fn new(stats: Arc<StatsCounters>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            codec: FrameCodec::new(),
            stats,
        }
    }

    /// Number of bytes waiting for a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Append `data` and process every complete frame now buffered
    ///
    /// Returns the encoded ACK/NAK frames to send back, in order.
    pub fn receive<H: PayloadHandler>(&mut self, data: &[u8], handler: &mut H) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);
        self.process(handler)
    }

    /// Process frames already in the buffer
    pub fn process<H: PayloadHandler>(&mut self, handler: &mut H) -> Vec<Bytes> {
        let mut replies = Vec::new();

        // FrameCodec::decode never returns an error
        while let Ok(Some(decoded)) = self.codec.decode(&mut self.buffer) {
            match decoded {
                DecodedFrame::Corrupt {
                    header,
                    computed_crc,
                } => {
                    self.stats.incr(Counter::RxCrcErrors);
                    warn!(
                        sequence = header.sequence,
                        stored = header.crc,
                        computed = computed_crc,
                        "frame CRC mismatch"
                    );
                    if header.ack_requested() {
                        self.push_reply(
                            &mut replies,
                            Frame::nak(header.sequence, FrameStatus::CrcMismatch),
                        );
                    }
                }
                DecodedFrame::Valid(frame) if frame.header.is_ack() || frame.header.is_nak() => {
                    let is_ack = frame.header.is_ack();
                    debug!(
                        sequence = frame.header.sequence,
                        status = %FrameStatus::describe_raw(frame.header.status),
                        "{}",
                        if is_ack { "ACK received" } else { "NAK received" }
                    );
                    self.stats.record_ack_or_nak(is_ack, frame.header.status);
                }
                DecodedFrame::Valid(frame) => {
                    self.stats.incr(Counter::RxFrames);
                    let ack_requested = frame.header.ack_requested();
                    if ack_requested {
                        self.stats.incr(Counter::RxAckRequests);
                    }

                    let handled = handler.handle_payload(&frame.payload);
                    if ack_requested {
                        let reply = if handled {
                            Frame::ack(frame.header.sequence, FrameStatus::Ok)
                        } else {
                            Frame::nak(frame.header.sequence, FrameStatus::HandlerDeclined)
                        };
                        self.push_reply(&mut replies, reply);
                    }
                }
            }
        }

        replies
    }

    fn push_reply(&self, replies: &mut Vec<Bytes>, reply: Frame) {
        let is_ack = reply.header.is_ack();
        match reply.to_bytes() {
            Ok(bytes) => {
                self.stats
                    .incr(if is_ack { Counter::RxAckSent } else { Counter::RxNakSent });
                replies.push(bytes);
            }
            Err(e) => warn!("failed to encode reply frame: {e}"),
        }
    }
}
