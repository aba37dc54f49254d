//! Device inventory and discovery listings
//!
//! Both listings are paged: each response carries a 4-byte header followed
//! by `batch_count` fixed-size entries.
//!
//! Header: `total_count`, `batch_start`, `batch_count`, then either the
//! active device index (inventory) or a reserved byte (discovery).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::BatchError;

pub const BATCH_HEADER_SIZE: usize = 4;
pub const MAC_LEN: usize = 6;
pub const NAME_LEN: usize = 10;

/// Paired index reported for a discovered device that is not paired
pub const UNPAIRED_INDEX: u8 = 0xFF;

/// Hardware address of a radio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; MAC_LEN]);

impl MacAddress {
    fn from_slice(bytes: &[u8]) -> Self {
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&bytes[..MAC_LEN]);
        Self(mac)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Encode a device name into its fixed-width field
///
/// Truncated to [`NAME_LEN`] bytes and NUL padded. Non-ASCII characters
/// become `?`.
pub fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut field = [0u8; NAME_LEN];
    for (slot, ch) in field.iter_mut().zip(name.chars()) {
        *slot = if ch.is_ascii() { ch as u8 } else { b'?' };
    }
    field
}

/// Decode a fixed-width name field, trimming NUL and space padding
pub fn decode_name(field: &[u8]) -> String {
    let text: String = field
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect();
    text.trim_matches(|c| c == '\0' || c == ' ').to_string()
}

/// Listing page header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub total_count: u8,
    pub batch_start: u8,
    pub batch_count: u8,
    /// Active device index for inventory pages, reserved for discovery
    pub extra: u8,
}

impl BatchHeader {
    pub fn decode(bytes: &[u8; BATCH_HEADER_SIZE]) -> Self {
        Self {
            total_count: bytes[0],
            batch_start: bytes[1],
            batch_count: bytes[2],
            extra: bytes[3],
        }
    }

    pub fn encode(&self) -> [u8; BATCH_HEADER_SIZE] {
        [self.total_count, self.batch_start, self.batch_count, self.extra]
    }

    /// No further pages follow this one
    pub fn is_final(&self) -> bool {
        self.batch_count == 0
            || u16::from(self.batch_start) + u16::from(self.batch_count)
                >= u16::from(self.total_count)
    }

    /// Index to request for the following page
    pub fn next_index(&self) -> u8 {
        self.batch_start.saturating_add(self.batch_count)
    }
}

/// Fixed-size entry in a listing page
pub trait BatchEntry: Sized {
    /// Encoded entry size
    const SIZE: usize;
    /// Used in error messages
    const KIND: &'static str;

    /// Decode from exactly `SIZE` bytes
    fn decode(bytes: &[u8]) -> Self;

    fn encode_into(&self, out: &mut Vec<u8>);
}

/// One paired device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub index: u8,
    pub channel: u8,
    pub mac: MacAddress,
    pub name: String,
}

impl BatchEntry for InventoryEntry {
    const SIZE: usize = 20;
    const KIND: &'static str = "inventory";

    fn decode(bytes: &[u8]) -> Self {
        Self {
            index: bytes[0],
            channel: bytes[1],
            mac: MacAddress::from_slice(&bytes[4..10]),
            name: decode_name(&bytes[10..20]),
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.index, self.channel, 0, 0]);
        out.extend_from_slice(&self.mac.0);
        out.extend_from_slice(&encode_name(&self.name));
    }
}

impl fmt::Display for InventoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ch{} {}",
            self.index, self.name, self.channel, self.mac
        )
    }
}

/// One device seen during a discovery scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEntry {
    pub discovery_index: u8,
    /// [`UNPAIRED_INDEX`] when the device is not paired
    pub paired_index: u8,
    pub channel: u8,
    pub rssi: i8,
    pub mac: MacAddress,
    pub timer_name: String,
    pub remote_name: String,
}

impl DiscoveryEntry {
    pub fn is_paired(&self) -> bool {
        self.paired_index != UNPAIRED_INDEX
    }
}

impl BatchEntry for DiscoveryEntry {
    const SIZE: usize = 30;
    const KIND: &'static str = "discovery";

    fn decode(bytes: &[u8]) -> Self {
        Self {
            discovery_index: bytes[0],
            paired_index: bytes[1],
            channel: bytes[2],
            rssi: bytes[3] as i8,
            mac: MacAddress::from_slice(&bytes[4..10]),
            timer_name: decode_name(&bytes[10..20]),
            remote_name: decode_name(&bytes[20..30]),
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[
            self.discovery_index,
            self.paired_index,
            self.channel,
            self.rssi as u8,
        ]);
        out.extend_from_slice(&self.mac.0);
        out.extend_from_slice(&encode_name(&self.timer_name));
        out.extend_from_slice(&encode_name(&self.remote_name));
    }
}

impl fmt::Display for DiscoveryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paired = if self.is_paired() {
            format!("paired #{}", self.paired_index)
        } else {
            "new".to_string()
        };
        write!(
            f,
            "[{}] {} / {} ch{} {}dBm {} ({})",
            self.discovery_index,
            self.timer_name,
            self.remote_name,
            self.channel,
            self.rssi,
            self.mac,
            paired
        )
    }
}

/// One decoded listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<E> {
    pub header: BatchHeader,
    pub entries: Vec<E>,
}

pub type InventoryBatch = Batch<InventoryEntry>;
pub type DiscoveryBatch = Batch<DiscoveryEntry>;

impl<E: BatchEntry> Batch<E> {
    /// Decode a page; trailing bytes past the declared entries are ignored
    pub fn parse(data: &[u8]) -> Result<Self, BatchError> {
        let Some(header_bytes) = data.first_chunk::<BATCH_HEADER_SIZE>() else {
            return Err(BatchError::Malformed {
                kind: E::KIND,
                needed: BATCH_HEADER_SIZE,
                available: data.len(),
            });
        };
        let header = BatchHeader::decode(header_bytes);

        let needed = BATCH_HEADER_SIZE + header.batch_count as usize * E::SIZE;
        if data.len() < needed {
            return Err(BatchError::Malformed {
                kind: E::KIND,
                needed,
                available: data.len(),
            });
        }

        let entries = data[BATCH_HEADER_SIZE..needed]
            .chunks_exact(E::SIZE)
            .map(E::decode)
            .collect();

        Ok(Self { header, entries })
    }

    /// Encode a page the way the device lays it out
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BATCH_HEADER_SIZE + self.entries.len() * E::SIZE);
        out.extend_from_slice(&self.header.encode());
        for entry in &self.entries {
            entry.encode_into(&mut out);
        }
        out
    }

    pub fn is_final(&self) -> bool {
        self.header.is_final()
    }

    pub fn next_index(&self) -> u8 {
        self.header.next_index()
    }
}

impl InventoryBatch {
    /// Index of the device the remote is currently driving
    pub fn active_index(&self) -> u8 {
        self.header.extra
    }
}

pub fn parse_inventory_batch(data: &[u8]) -> Result<InventoryBatch, BatchError> {
    Batch::parse(data)
}

pub fn parse_discovery_batch(data: &[u8]) -> Result<DiscoveryBatch, BatchError> {
    Batch::parse(data)
}
