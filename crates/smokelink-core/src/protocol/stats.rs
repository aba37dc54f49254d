//! Transport statistics
//!
//! Counters are bumped from the read loop and the send path and read from
//! anywhere without taking the link lock. Readers may observe a snapshot
//! that is a few increments stale.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::frame::FrameStatus;

/// Point-in-time copy of the link counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub tx_frames: u32,
    pub tx_acked: u32,
    pub tx_nak: u32,
    pub tx_timeout: u32,
    /// Kept for parity with the firmware counters; nothing retries a send
    pub tx_retries: u32,
    pub tx_send_errors: u32,
    pub rx_frames: u32,
    pub rx_ack_requests: u32,
    pub rx_ack_sent: u32,
    pub rx_nak_sent: u32,
    pub rx_crc_errors: u32,
    pub rx_invalid_length: u32,
    pub handler_declined: u32,
    /// When the last ACK or NAK frame arrived
    pub last_ack_or_nak: Option<DateTime<Utc>>,
    /// Status byte of the last ACK or NAK frame
    pub last_status_code: u8,
}

impl fmt::Display for TransportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TX:{} ack:{} nak:{} timeout:{} retries:{} err:{} | RX:{} ackReq:{} ackSent:{} nakSent:{} crc:{} invalid:{} decl:{}",
            self.tx_frames,
            self.tx_acked,
            self.tx_nak,
            self.tx_timeout,
            self.tx_retries,
            self.tx_send_errors,
            self.rx_frames,
            self.rx_ack_requests,
            self.rx_ack_sent,
            self.rx_nak_sent,
            self.rx_crc_errors,
            self.rx_invalid_length,
            self.handler_declined,
        )
    }
}

/// Counter being bumped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    TxFrames,
    TxAcked,
    TxNak,
    TxTimeout,
    TxRetries,
    TxSendErrors,
    RxFrames,
    RxAckRequests,
    RxAckSent,
    RxNakSent,
    RxCrcErrors,
    RxInvalidLength,
    HandlerDeclined,
}

/// Live counters owned by a link
#[derive(Debug, Default)]
pub struct StatsCounters {
    tx_frames: AtomicU32,
    tx_acked: AtomicU32,
    tx_nak: AtomicU32,
    tx_timeout: AtomicU32,
    tx_retries: AtomicU32,
    tx_send_errors: AtomicU32,
    rx_frames: AtomicU32,
    rx_ack_requests: AtomicU32,
    rx_ack_sent: AtomicU32,
    rx_nak_sent: AtomicU32,
    rx_crc_errors: AtomicU32,
    rx_invalid_length: AtomicU32,
    handler_declined: AtomicU32,
    /// Milliseconds since the Unix epoch, 0 when unset
    last_ack_or_nak_ms: AtomicI64,
    last_status_code: AtomicU8,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, counter: Counter) -> &AtomicU32 {
        match counter {
            Counter::TxFrames => &self.tx_frames,
            Counter::TxAcked => &self.tx_acked,
            Counter::TxNak => &self.tx_nak,
            Counter::TxTimeout => &self.tx_timeout,
            Counter::TxRetries => &self.tx_retries,
            Counter::TxSendErrors => &self.tx_send_errors,
            Counter::RxFrames => &self.rx_frames,
            Counter::RxAckRequests => &self.rx_ack_requests,
            Counter::RxAckSent => &self.rx_ack_sent,
            Counter::RxNakSent => &self.rx_nak_sent,
            Counter::RxCrcErrors => &self.rx_crc_errors,
            Counter::RxInvalidLength => &self.rx_invalid_length,
            Counter::HandlerDeclined => &self.handler_declined,
        }
    }

    /// Bump a counter by one
    pub fn incr(&self, counter: Counter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
    }

    /// Read one counter
    pub fn get(&self, counter: Counter) -> u32 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    /// Record an incoming ACK or NAK frame
    pub fn record_ack_or_nak(&self, is_ack: bool, status: u8) {
        self.incr(if is_ack { Counter::TxAcked } else { Counter::TxNak });
        self.last_ack_or_nak_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.last_status_code.store(status, Ordering::Relaxed);
    }

    /// Status of the last ACK/NAK, if it is a known code
    pub fn last_status(&self) -> Option<FrameStatus> {
        FrameStatus::try_from(self.last_status_code.load(Ordering::Relaxed)).ok()
    }

    /// Zero every counter (called on connect)
    pub fn reset(&self) {
        for counter in [
            Counter::TxFrames,
            Counter::TxAcked,
            Counter::TxNak,
            Counter::TxTimeout,
            Counter::TxRetries,
            Counter::TxSendErrors,
            Counter::RxFrames,
            Counter::RxAckRequests,
            Counter::RxAckSent,
            Counter::RxNakSent,
            Counter::RxCrcErrors,
            Counter::RxInvalidLength,
            Counter::HandlerDeclined,
        ] {
            self.slot(counter).store(0, Ordering::Relaxed);
        }
        self.last_ack_or_nak_ms.store(0, Ordering::Relaxed);
        self.last_status_code.store(0, Ordering::Relaxed);
    }

    /// Copy the current values
    pub fn snapshot(&self) -> TransportStats {
        let last_ms = self.last_ack_or_nak_ms.load(Ordering::Relaxed);
        TransportStats {
            tx_frames: self.get(Counter::TxFrames),
            tx_acked: self.get(Counter::TxAcked),
            tx_nak: self.get(Counter::TxNak),
            tx_timeout: self.get(Counter::TxTimeout),
            tx_retries: self.get(Counter::TxRetries),
            tx_send_errors: self.get(Counter::TxSendErrors),
            rx_frames: self.get(Counter::RxFrames),
            rx_ack_requests: self.get(Counter::RxAckRequests),
            rx_ack_sent: self.get(Counter::RxAckSent),
            rx_nak_sent: self.get(Counter::RxNakSent),
            rx_crc_errors: self.get(Counter::RxCrcErrors),
            rx_invalid_length: self.get(Counter::RxInvalidLength),
            handler_declined: self.get(Counter::HandlerDeclined),
            last_ack_or_nak: if last_ms == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(last_ms).single()
            },
            last_status_code: self.last_status_code.load(Ordering::Relaxed),
        }
    }
}
