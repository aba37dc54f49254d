//! Protocol commands
//!
//! Defines the commands understood by the remote's debug bridge and the
//! typed request payloads the console sends with them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::batch::encode_name;
use super::error::LinkError;

/// Lowest and highest radio channel the remote accepts
pub const MIN_CHANNEL: u8 = 1;
pub const MAX_CHANNEL: u8 = 13;

/// Debug bridge commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    Ping = 1,
    GetRemoteStats = 2,
    GetTimerStats = 3,
    SetChannel = 4,
    ForceChannel = 5,
    GetRssi = 6,
    ReadConfig = 7,
    WriteConfig = 8,
    GetDeviceInfo = 9,
    GetLogSnapshot = 10,
    GetDeviceInventory = 11,
    SelectDevice = 12,
    StartDiscovery = 13,
    StopDiscovery = 14,
    GetDiscoveredDevices = 15,
    PairDiscoveredDevice = 16,
    UnpairDevice = 17,
    RenameDevice = 18,
}

impl Command {
    /// Get the wire byte
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "Ping",
            Command::GetRemoteStats => "GetRemoteStats",
            Command::GetTimerStats => "GetTimerStats",
            Command::SetChannel => "SetChannel",
            Command::ForceChannel => "ForceChannel",
            Command::GetRssi => "GetRssi",
            Command::ReadConfig => "ReadConfig",
            Command::WriteConfig => "WriteConfig",
            Command::GetDeviceInfo => "GetDeviceInfo",
            Command::GetLogSnapshot => "GetLogSnapshot",
            Command::GetDeviceInventory => "GetDeviceInventory",
            Command::SelectDevice => "SelectDevice",
            Command::StartDiscovery => "StartDiscovery",
            Command::StopDiscovery => "StopDiscovery",
            Command::GetDiscoveredDevices => "GetDiscoveredDevices",
            Command::PairDiscoveredDevice => "PairDiscoveredDevice",
            Command::UnpairDevice => "UnpairDevice",
            Command::RenameDevice => "RenameDevice",
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Command::Ping,
            2 => Command::GetRemoteStats,
            3 => Command::GetTimerStats,
            4 => Command::SetChannel,
            5 => Command::ForceChannel,
            6 => Command::GetRssi,
            7 => Command::ReadConfig,
            8 => Command::WriteConfig,
            9 => Command::GetDeviceInfo,
            10 => Command::GetLogSnapshot,
            11 => Command::GetDeviceInventory,
            12 => Command::SelectDevice,
            13 => Command::StartDiscovery,
            14 => Command::StopDiscovery,
            15 => Command::GetDiscoveredDevices,
            16 => Command::PairDiscoveredDevice,
            17 => Command::UnpairDevice,
            18 => Command::RenameDevice,
            other => return Err(other),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result code carried in a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Busy = 1,
    InvalidArgument = 2,
    Unsupported = 3,
    TransportError = 4,
    Timeout = 5,
    NotReady = 6,
}

impl Status {
    pub fn name(&self) -> &'static str {
        match self {
            Status::Ok => "Ok",
            Status::Busy => "Busy",
            Status::InvalidArgument => "InvalidArgument",
            Status::Unsupported => "Unsupported",
            Status::TransportError => "TransportError",
            Status::Timeout => "Timeout",
            Status::NotReady => "NotReady",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl TryFrom<u8> for Status {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Status::Ok,
            1 => Status::Busy,
            2 => Status::InvalidArgument,
            3 => Status::Unsupported,
            4 => Status::TransportError,
            5 => Status::Timeout,
            6 => Status::NotReady,
            other => return Err(other),
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A request with its typed parameters
///
/// [`Request::payload`] validates the parameters and produces the data
/// bytes for the packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    GetRemoteStats,
    GetTimerStats,
    /// Change the operating channel, optionally telling the timer to follow
    SetChannel { channel: u8, inform_timer: bool },
    /// Force the radio onto a channel (used while scanning)
    ForceChannel { channel: u8 },
    GetRssi,
    ReadConfig,
    WriteConfig { data: Vec<u8> },
    GetDeviceInfo,
    GetLogSnapshot,
    /// One inventory page starting at `next_index`
    GetDeviceInventory { next_index: u8 },
    SelectDevice { index: u8 },
    StartDiscovery,
    StopDiscovery,
    /// One discovery page starting at `next_index`
    GetDiscoveredDevices { next_index: u8 },
    PairDiscoveredDevice { discovery_index: u8 },
    UnpairDevice { paired_index: u8 },
    RenameDevice { paired_index: u8, name: String },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Ping => Command::Ping,
            Request::GetRemoteStats => Command::GetRemoteStats,
            Request::GetTimerStats => Command::GetTimerStats,
            Request::SetChannel { .. } => Command::SetChannel,
            Request::ForceChannel { .. } => Command::ForceChannel,
            Request::GetRssi => Command::GetRssi,
            Request::ReadConfig => Command::ReadConfig,
            Request::WriteConfig { .. } => Command::WriteConfig,
            Request::GetDeviceInfo => Command::GetDeviceInfo,
            Request::GetLogSnapshot => Command::GetLogSnapshot,
            Request::GetDeviceInventory { .. } => Command::GetDeviceInventory,
            Request::SelectDevice { .. } => Command::SelectDevice,
            Request::StartDiscovery => Command::StartDiscovery,
            Request::StopDiscovery => Command::StopDiscovery,
            Request::GetDiscoveredDevices { .. } => Command::GetDiscoveredDevices,
            Request::PairDiscoveredDevice { .. } => Command::PairDiscoveredDevice,
            Request::UnpairDevice { .. } => Command::UnpairDevice,
            Request::RenameDevice { .. } => Command::RenameDevice,
        }
    }

    /// Build the packet data for this request
    pub fn payload(&self) -> Result<Vec<u8>, LinkError> {
        match self {
            Request::SetChannel {
                channel,
                inform_timer,
            } => {
                check_channel(*channel)?;
                Ok(vec![*channel, u8::from(*inform_timer)])
            }
            Request::ForceChannel { channel } => {
                check_channel(*channel)?;
                Ok(vec![*channel, 1])
            }
            Request::WriteConfig { data } => Ok(data.clone()),
            Request::GetDeviceInventory { next_index }
            | Request::GetDiscoveredDevices { next_index } => Ok(vec![*next_index]),
            Request::SelectDevice { index } => Ok(vec![*index]),
            Request::PairDiscoveredDevice { discovery_index } => Ok(vec![*discovery_index]),
            Request::UnpairDevice { paired_index } => Ok(vec![*paired_index]),
            Request::RenameDevice { paired_index, name } => {
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    return Err(LinkError::InvalidArgument(
                        "device name must not be empty".to_string(),
                    ));
                }
                let mut payload = Vec::with_capacity(11);
                payload.push(*paired_index);
                payload.extend_from_slice(&encode_name(trimmed));
                Ok(payload)
            }
            Request::Ping
            | Request::GetRemoteStats
            | Request::GetTimerStats
            | Request::GetRssi
            | Request::ReadConfig
            | Request::GetDeviceInfo
            | Request::GetLogSnapshot
            | Request::StartDiscovery
            | Request::StopDiscovery => Ok(Vec::new()),
        }
    }
}

fn check_channel(channel: u8) -> Result<(), LinkError> {
    if (MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
        Ok(())
    } else {
        Err(LinkError::InvalidArgument(format!(
            "channel must be between {MIN_CHANNEL} and {MAX_CHANNEL}, got {channel}"
        )))
    }
}
