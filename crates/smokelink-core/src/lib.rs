//! # SmokeLink Core Library
//!
//! Host side of the fog machine remote's diagnostic link.
//!
//! This library provides:
//! - The reliable serial framing (CRC-16, ACK/NAK, resync)
//! - The debug bridge packet protocol and its payload structures
//! - An async link client with request/response correlation
//! - Paged inventory and discovery listings
//!
//! ## Example
//!
//! ```rust,ignore
//! use smokelink_core::prelude::*;
//!
//! let client = LinkClient::new(LinkConfig::for_endpoint("/dev/ttyUSB0"));
//! client.open().await?;
//!
//! let pong = client.send(Command::Ping, &[]).await?;
//! println!("ping: {}", pong.status);
//!
//! for device in fetch_inventory(&client).await?.entries {
//!     println!("{device}");
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::LinkConfig;
    pub use crate::protocol::{
        fetch_discovered, fetch_inventory, Command, ConnectionState, LinkClient, LinkError,
        Packet, Request, Status, TransportStats,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
