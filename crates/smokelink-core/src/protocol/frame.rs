//! Frame encoding/decoding
//!
//! Layer-1 wire unit exchanged with the remote over the serial link.
//!
//! Frame format (all multi-byte fields little-endian):
//! - 1 byte: magic (0xA5)
//! - 1 byte: version (0x01)
//! - 1 byte: flags (see [`flags`])
//! - 1 byte: sequence
//! - 2 bytes: payload length
//! - 2 bytes: CRC-16 of the whole frame, computed with this field zeroed
//! - 1 byte: status
//! - N bytes: payload

use std::fmt;
use std::io;

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use super::crc::{crc16, crc16_with_seed};

/// Frame start byte
pub const FRAME_MAGIC: u8 = 0xA5;

/// Frame format version
pub const FRAME_VERSION: u8 = 0x01;

/// Size of the fixed frame header
pub const FRAME_HEADER_SIZE: usize = 9;

/// Byte range of the CRC field inside the header
const CRC_OFFSET: usize = 6;

/// Frame flag bits
pub mod flags {
    /// Sender wants an ACK/NAK for this frame
    pub const ACK_REQUEST: u8 = 0x01;
    /// Frame is a positive acknowledgment
    pub const IS_ACK: u8 = 0x02;
    /// Frame is a negative acknowledgment
    pub const IS_NAK: u8 = 0x04;

    /// Check if a specific flag is set
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Status byte carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameStatus {
    Ok = 0,
    CrcMismatch = 1,
    InvalidLength = 2,
    HandlerDeclined = 3,
    Timeout = 4,
    SendError = 5,
}

impl FrameStatus {
    /// Short upper-case name used in diagnostics output
    pub fn describe(&self) -> &'static str {
        match self {
            FrameStatus::Ok => "OK",
            FrameStatus::CrcMismatch => "CRC_MISMATCH",
            FrameStatus::InvalidLength => "INVALID_LENGTH",
            FrameStatus::HandlerDeclined => "HANDLER_DECLINED",
            FrameStatus::Timeout => "TIMEOUT",
            FrameStatus::SendError => "SEND_ERROR",
        }
    }

    /// Describe a raw status byte, falling back to hex for unknown codes
    pub fn describe_raw(status: u8) -> String {
        match FrameStatus::try_from(status) {
            Ok(known) => known.describe().to_string(),
            Err(raw) => format!("{raw:02X}"),
        }
    }
}

impl TryFrom<u8> for FrameStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameStatus::Ok),
            1 => Ok(FrameStatus::CrcMismatch),
            2 => Ok(FrameStatus::InvalidLength),
            3 => Ok(FrameStatus::HandlerDeclined),
            4 => Ok(FrameStatus::Timeout),
            5 => Ok(FrameStatus::SendError),
            other => Err(other),
        }
    }
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u8,
    pub version: u8,
    pub flags: u8,
    pub sequence: u8,
    pub payload_length: u16,
    /// CRC as stored on the wire (zero when freshly encoded)
    pub crc: u16,
    pub status: u8,
}

impl FrameHeader {
    /// Create a header with the fixed magic/version and a zero CRC
    pub fn new(flags: u8, sequence: u8, payload_length: u16, status: u8) -> Self {
        Self {
            magic: FRAME_MAGIC,
            version: FRAME_VERSION,
            flags,
            sequence,
            payload_length,
            crc: 0,
            status,
        }
    }

    /// Encode the header; the CRC field is always written as zero
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0] = FRAME_MAGIC;
        buf[1] = FRAME_VERSION;
        buf[2] = self.flags;
        buf[3] = self.sequence;
        LittleEndian::write_u16(&mut buf[4..6], self.payload_length);
        LittleEndian::write_u16(&mut buf[CRC_OFFSET..CRC_OFFSET + 2], 0);
        buf[8] = self.status;
        buf
    }

    /// Decode a header from the first [`FRAME_HEADER_SIZE`] bytes of `data`
    ///
    /// Returns `None` if fewer bytes are available. Magic and version are
    /// read as-is; callers decide what to do with a mismatch.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: data[0],
            version: data[1],
            flags: data[2],
            sequence: data[3],
            payload_length: LittleEndian::read_u16(&data[4..6]),
            crc: LittleEndian::read_u16(&data[CRC_OFFSET..CRC_OFFSET + 2]),
            status: data[8],
        })
    }

    pub fn ack_requested(&self) -> bool {
        flags::has_flag(self.flags, flags::ACK_REQUEST)
    }

    pub fn is_ack(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_ACK)
    }

    pub fn is_nak(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_NAK)
    }

    /// Typed view of the status byte
    pub fn frame_status(&self) -> Option<FrameStatus> {
        FrameStatus::try_from(self.status).ok()
    }

    /// Header plus payload length
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload_length as usize
    }
}

/// A complete, CRC-verified frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Data frame carrying `payload`
    pub fn data(sequence: u8, ack_requested: bool, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let frame_flags = if ack_requested { flags::ACK_REQUEST } else { 0 };
        Self {
            header: FrameHeader::new(
                frame_flags,
                sequence,
                payload.len() as u16,
                FrameStatus::Ok as u8,
            ),
            payload,
        }
    }

    /// Positive acknowledgment for `sequence`
    pub fn ack(sequence: u8, status: FrameStatus) -> Self {
        Self {
            header: FrameHeader::new(flags::IS_ACK, sequence, 0, status as u8),
            payload: Bytes::new(),
        }
    }

    /// Negative acknowledgment for `sequence`
    pub fn nak(sequence: u8, status: FrameStatus) -> Self {
        Self {
            header: FrameHeader::new(flags::IS_NAK, sequence, 0, status as u8),
            payload: Bytes::new(),
        }
    }

    /// Encode to wire bytes with the CRC patched in
    pub fn to_bytes(&self) -> Result<Bytes, io::Error> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        FrameCodec::new().encode(self.clone(), &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Result of scanning one candidate frame out of the receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    /// CRC matched
    Valid(Frame),
    /// CRC mismatch; the candidate bytes have already been discarded
    Corrupt { header: FrameHeader, computed_crc: u16 },
}

/// Verify the CRC of a complete frame held in `frame`
///
/// The stored CRC bytes are skipped and treated as zero, so no copy of the
/// buffer is needed.
pub fn compute_frame_crc(frame: &[u8]) -> u16 {
    let crc = crc16(&frame[..CRC_OFFSET]);
    let crc = crc16_with_seed(&[0, 0], crc);
    crc16_with_seed(&frame[CRC_OFFSET + 2..], crc)
}

/// Codec that encodes [`Frame`]s and incrementally scans frames out of a
/// byte stream
///
/// Scanning resynchronizes by dropping one leading byte at a time until the
/// buffer starts with magic + version. A partial frame stays buffered until
/// the rest of it arrives.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Leading bytes dropped while hunting for a frame start
    discarded: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes dropped during resynchronization
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }
}

impl Decoder for FrameCodec {
    type Item = DecodedFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < FRAME_HEADER_SIZE {
                return Ok(None);
            }

            if src[0] != FRAME_MAGIC || src[1] != FRAME_VERSION {
                src.advance(1);
                self.discarded += 1;
                continue;
            }

            let Some(header) = FrameHeader::decode(src) else {
                return Ok(None);
            };

            let total = header.frame_len();
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let mut raw = src.split_to(total);
            let computed_crc = compute_frame_crc(&raw);
            if computed_crc != header.crc {
                return Ok(Some(DecodedFrame::Corrupt {
                    header,
                    computed_crc,
                }));
            }

            let payload = raw.split_off(FRAME_HEADER_SIZE).freeze();
            return Ok(Some(DecodedFrame::Valid(Frame { header, payload })));
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_length = u16::try_from(frame.payload.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame payload of {} bytes exceeds u16", frame.payload.len()),
            )
        })?;

        let header = FrameHeader {
            payload_length,
            ..frame.header
        };

        let start = dst.len();
        dst.reserve(FRAME_HEADER_SIZE + frame.payload.len());
        dst.put_slice(&header.encode());
        dst.put_slice(&frame.payload);

        let crc = crc16(&dst[start..]);
        LittleEndian::write_u16(&mut dst[start + CRC_OFFSET..start + CRC_OFFSET + 2], crc);
        Ok(())
    }
}

/// Outgoing frame sequence numbers: 1..=255, wrapping back to 1, never 0
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Reserve the next sequence number
    pub fn next_sequence(&mut self) -> u8 {
        let seq = self.next;
        self.next = if self.next == u8::MAX { 1 } else { self.next + 1 };
        seq
    }

    /// Start over at 1
    pub fn reset(&mut self) {
        self.next = 1;
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
