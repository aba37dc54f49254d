//! Serial Protocol Communication
//!
//! Implements the debug bridge protocol spoken by the remote over USB
//! serial: CRC-16 checked frames with ACK/NAK, fixed-size application
//! packets inside them, and request/response correlation on top.

pub mod batch;
pub mod commands;
mod connection;
pub mod crc;
mod error;
pub mod frame;
pub mod packet;
pub mod pagination;
pub mod payloads;
pub mod reliable;
pub mod serial;
pub mod stats;
pub mod transport;

pub use batch::{
    parse_discovery_batch, parse_inventory_batch, BatchHeader, DiscoveryBatch, DiscoveryEntry,
    InventoryBatch, InventoryEntry, MacAddress,
};
pub use commands::{Command, Request, Status};
pub use connection::{ConnectionState, LinkClient};
pub use error::{BatchError, DecodeError, FetchError, LinkError};
pub use frame::{Frame, FrameCodec, FrameHeader, FrameStatus};
pub use packet::{Packet, PacketFlags};
pub use pagination::{fetch_discovered, fetch_inventory, Discovery, Inventory, Listing};
pub use payloads::{best_rssi, WirePayload};
pub use serial::{list_ports, open_port, PortInfo};
pub use stats::TransportStats;
pub use transport::{Connector, SerialConnector};

/// Default baud rate of the remote's USB serial port
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default time to wait for a response in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3000;
