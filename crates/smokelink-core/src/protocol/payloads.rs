//! Fixed-layout response payloads
//!
//! The remote answers the stats, RSSI and device-info commands with packed
//! little-endian structures inside the packet data area.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::error::DecodeError;
use super::frame::FrameStatus;

/// A structure with a fixed encoded size
pub trait WirePayload: Sized {
    const SIZE: usize;

    /// Decode from the start of `data`; extra bytes are ignored
    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::SIZE {
            return Err(DecodeError::TooShort {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        Ok(Self::read(&mut FieldReader::new(&data[..Self::SIZE])))
    }

    /// Read fields from a buffer known to hold at least `SIZE` bytes
    fn read(reader: &mut FieldReader<'_>) -> Self;
}

/// Sequential little-endian field reader over a pre-checked buffer
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        slice
    }

    pub fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    pub fn i8(&mut self) -> i8 {
        self.u8() as i8
    }

    pub fn u32(&mut self) -> u32 {
        LittleEndian::read_u32(self.take(4))
    }

    pub fn f32(&mut self) -> f32 {
        LittleEndian::read_f32(self.take(4))
    }

    pub fn skip(&mut self, len: usize) {
        self.take(len);
    }
}

/// Framing counters as reported by the remote firmware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStatsWire {
    pub tx_frames: u32,
    pub tx_acked: u32,
    pub tx_nak: u32,
    pub tx_timeout: u32,
    pub tx_retries: u32,
    pub tx_send_errors: u32,
    pub rx_frames: u32,
    pub rx_ack_requests: u32,
    pub rx_ack_sent: u32,
    pub rx_nak_sent: u32,
    pub rx_crc_errors: u32,
    pub rx_invalid_length: u32,
    pub handler_declined: u32,
    /// Firmware uptime in ms at the last ACK/NAK
    pub last_ack_or_nak_ms: u32,
    pub last_status_code: u8,
}

impl WirePayload for TransportStatsWire {
    const SIZE: usize = 60;

    fn read(r: &mut FieldReader<'_>) -> Self {
        let stats = Self {
            tx_frames: r.u32(),
            tx_acked: r.u32(),
            tx_nak: r.u32(),
            tx_timeout: r.u32(),
            tx_retries: r.u32(),
            tx_send_errors: r.u32(),
            rx_frames: r.u32(),
            rx_ack_requests: r.u32(),
            rx_ack_sent: r.u32(),
            rx_nak_sent: r.u32(),
            rx_crc_errors: r.u32(),
            rx_invalid_length: r.u32(),
            handler_declined: r.u32(),
            last_ack_or_nak_ms: r.u32(),
            last_status_code: r.u8(),
        };
        r.skip(3);
        stats
    }
}

impl fmt::Display for TransportStatsWire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TX:{} ack:{} nak:{} timeout:{} | RX:{} crc:{} decl:{} | last={}",
            self.tx_frames,
            self.tx_acked,
            self.tx_nak,
            self.tx_timeout,
            self.rx_frames,
            self.rx_crc_errors,
            self.handler_declined,
            FrameStatus::describe_raw(self.last_status_code)
        )
    }
}

/// Radio link health of one side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkHealth {
    pub transport: TransportStatsWire,
    pub rssi_local: i8,
    pub rssi_peer: i8,
    pub channel: u8,
}

impl WirePayload for LinkHealth {
    const SIZE: usize = TransportStatsWire::SIZE + 4;

    fn read(r: &mut FieldReader<'_>) -> Self {
        let health = Self {
            transport: TransportStatsWire::read(r),
            rssi_local: r.i8(),
            rssi_peer: r.i8(),
            channel: r.u8(),
        };
        r.skip(1);
        health
    }
}

/// Timer state as seen by one device
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub ton_seconds: f32,
    pub toff_seconds: f32,
    pub elapsed_seconds: f32,
    pub output_on: bool,
    pub override_active: bool,
    pub channel: u8,
}

impl WirePayload for TimerSnapshot {
    const SIZE: usize = 16;

    fn read(r: &mut FieldReader<'_>) -> Self {
        let snapshot = Self {
            ton_seconds: r.f32(),
            toff_seconds: r.f32(),
            elapsed_seconds: r.f32(),
            output_on: r.u8() != 0,
            override_active: r.u8() != 0,
            channel: r.u8(),
        };
        r.skip(1);
        snapshot
    }
}

impl fmt::Display for TimerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch{} TON={:.1}s TOFF={:.1}s elapsed={:.1}s output={} override={}",
            self.channel,
            self.ton_seconds,
            self.toff_seconds,
            self.elapsed_seconds,
            if self.output_on { "ON" } else { "OFF" },
            if self.override_active { "YES" } else { "no" }
        )
    }
}

/// Counters of the remote's USB serial link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialLinkSummary {
    pub tx_frames: u32,
    pub rx_frames: u32,
    pub errors: u32,
    pub last_status_code: u8,
}

impl WirePayload for SerialLinkSummary {
    const SIZE: usize = 16;

    fn read(r: &mut FieldReader<'_>) -> Self {
        let summary = Self {
            tx_frames: r.u32(),
            rx_frames: r.u32(),
            errors: r.u32(),
            last_status_code: r.u8(),
        };
        r.skip(3);
        summary
    }
}

/// Response to `GetTimerStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerStatsPayload {
    pub link: LinkHealth,
    pub timer: TimerSnapshot,
    pub remote: TimerSnapshot,
}

impl WirePayload for TimerStatsPayload {
    const SIZE: usize = LinkHealth::SIZE + 2 * TimerSnapshot::SIZE;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            link: LinkHealth::read(r),
            timer: TimerSnapshot::read(r),
            remote: TimerSnapshot::read(r),
        }
    }
}

/// Response to `GetRemoteStats`, also pushed as streaming telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteStatsPayload {
    pub remote_link: LinkHealth,
    pub remote: TimerSnapshot,
    pub serial_link: SerialLinkSummary,
}

impl WirePayload for RemoteStatsPayload {
    const SIZE: usize = LinkHealth::SIZE + TimerSnapshot::SIZE + SerialLinkSummary::SIZE;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            remote_link: LinkHealth::read(r),
            remote: TimerSnapshot::read(r),
            serial_link: SerialLinkSummary::read(r),
        }
    }
}

/// Response to `GetDeviceInfo`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub firmware_version: u32,
    pub build_timestamp: u32,
    pub device_kind: u8,
}

impl WirePayload for DeviceInfo {
    const SIZE: usize = 20;

    fn read(r: &mut FieldReader<'_>) -> Self {
        let info = Self {
            firmware_version: r.u32(),
            build_timestamp: r.u32(),
            device_kind: r.u8(),
        };
        r.skip(11);
        info
    }
}

/// Response to `GetRssi`, all values in dBm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssiReport {
    pub remote_local: i8,
    pub timer: i8,
    pub timer_local: i8,
}

impl WirePayload for RssiReport {
    const SIZE: usize = 3;

    fn read(r: &mut FieldReader<'_>) -> Self {
        Self {
            remote_local: r.i8(),
            timer: r.i8(),
            timer_local: r.i8(),
        }
    }
}

impl fmt::Display for RssiReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Remote RSSI local={} timer={} timerLocal={}",
            self.remote_local, self.timer, self.timer_local
        )
    }
}

/// Prefer `primary` unless the device reported 0 (no reading)
pub fn best_rssi(primary: i8, fallback: i8) -> i8 {
    if primary != 0 {
        primary
    } else {
        fallback
    }
}
