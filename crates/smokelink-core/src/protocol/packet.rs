//! Packet encoding/decoding
//!
//! Application packets travel as the payload of a data frame. Every packet
//! is the same size on the wire regardless of how much data it carries.
//!
//! Packet format (104 bytes, multi-byte fields little-endian):
//! - 1 byte: magic (0xD1)
//! - 1 byte: command
//! - 1 byte: status
//! - 1 byte: flags (see [`PacketFlags`])
//! - 2 bytes: request id
//! - 2 bytes: data length (at most 96)
//! - 96 bytes: data, zero padded

use std::fmt;
use std::ops::BitOr;

use byteorder::{ByteOrder, LittleEndian};

use super::commands::{Command, Status};
use super::error::DecodeError;

/// Packet start byte
pub const PACKET_MAGIC: u8 = 0xD1;

/// Capacity of the data area
pub const MAX_DATA_BYTES: usize = 96;

/// Bytes before the data area
pub const PACKET_HEADER_SIZE: usize = 8;

/// Encoded packet size
pub const PACKET_SIZE: usize = PACKET_HEADER_SIZE + MAX_DATA_BYTES;

/// Packet flag bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    /// Packet answers a request
    pub const RESPONSE: PacketFlags = PacketFlags(0x01);
    /// Request needs the paired timer to be reachable
    pub const REQUIRES_TIMER: PacketFlags = PacketFlags(0x02);
    /// Unsolicited telemetry push
    pub const STREAMING: PacketFlags = PacketFlags(0x04);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PacketFlags {
    type Output = PacketFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        PacketFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::RESPONSE) {
            names.push("Response");
        }
        if self.contains(Self::REQUIRES_TIMER) {
            names.push("RequiresTimer");
        }
        if self.contains(Self::STREAMING) {
            names.push("Streaming");
        }
        if names.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&names.join(", "))
        }
    }
}

/// An application packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub magic: u8,
    pub command: Command,
    pub status: Status,
    pub flags: PacketFlags,
    /// Correlates a response with its request; 0 is never assigned
    pub request_id: u16,
    pub data_length: u16,
    data: [u8; MAX_DATA_BYTES],
}

impl Packet {
    /// Create a request packet
    ///
    /// Data beyond [`MAX_DATA_BYTES`] is silently dropped.
    pub fn request(command: Command, payload: &[u8], request_id: u16) -> Self {
        let len = payload.len().min(MAX_DATA_BYTES);
        let mut data = [0u8; MAX_DATA_BYTES];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            magic: PACKET_MAGIC,
            command,
            status: Status::Ok,
            flags: PacketFlags::NONE,
            request_id,
            data_length: len as u16,
            data,
        }
    }

    /// Create a request packet without data
    pub fn empty(command: Command, request_id: u16) -> Self {
        Self::request(command, &[], request_id)
    }

    /// Build the response a device would send for `request`
    pub fn response_to(request: &Packet, status: Status, payload: &[u8]) -> Self {
        Self::request(request.command, payload, request.request_id)
            .with_status(status)
            .with_flags(PacketFlags::RESPONSE)
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Magic matches and the declared length fits the data area
    pub fn is_valid(&self) -> bool {
        self.magic == PACKET_MAGIC && self.data_length as usize <= MAX_DATA_BYTES
    }

    pub fn is_response(&self) -> bool {
        self.flags.contains(PacketFlags::RESPONSE)
    }

    pub fn is_streaming(&self) -> bool {
        self.flags.contains(PacketFlags::STREAMING)
    }

    /// The `data_length` bytes of data actually carried
    pub fn data(&self) -> &[u8] {
        &self.data[..(self.data_length as usize).min(MAX_DATA_BYTES)]
    }

    /// Encode to the fixed wire layout
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[0] = self.magic;
        bytes[1] = self.command.as_byte();
        bytes[2] = self.status as u8;
        bytes[3] = self.flags.bits();
        LittleEndian::write_u16(&mut bytes[4..6], self.request_id);
        LittleEndian::write_u16(&mut bytes[6..8], self.data_length);
        bytes[PACKET_HEADER_SIZE..].copy_from_slice(&self.data);
        bytes
    }

    /// Decode from raw bytes
    ///
    /// Magic and data length are taken as-is; check [`Packet::is_valid`]
    /// before trusting the packet.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < PACKET_SIZE {
            return Err(DecodeError::TooShort {
                needed: PACKET_SIZE,
                available: data.len(),
            });
        }

        let command = Command::try_from(data[1]).map_err(DecodeError::UnknownCommand)?;
        let status = Status::try_from(data[2]).map_err(DecodeError::UnknownStatus)?;

        let mut body = [0u8; MAX_DATA_BYTES];
        body.copy_from_slice(&data[PACKET_HEADER_SIZE..PACKET_SIZE]);

        Ok(Self {
            magic: data[0],
            command,
            status,
            flags: PacketFlags::from_bits(data[3]),
            request_id: LittleEndian::read_u16(&data[4..6]),
            data_length: LittleEndian::read_u16(&data[6..8]),
            data: body,
        })
    }
}
