//! Connection management
//!
//! [`LinkClient`] owns one transport session: a background read loop feeding
//! the reliable receiver, a table of requests waiting for their response,
//! and the send path that frames packets and waits for the matching reply.
//!
//! Packets that do not complete a pending request (streaming telemetry,
//! late responses) are handed to the event handler.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::commands::{Command, Request};
use super::error::LinkError;
use super::frame::{Frame, SequenceCounter};
use super::packet::{Packet, PACKET_SIZE};
use super::reliable::{PayloadHandler, ReliableReceiver};
use super::stats::{Counter, StatsCounters, TransportStats};
use super::transport::{Connector, SerialConnector};
use crate::config::LinkConfig;

type PendingRequests = HashMap<u16, oneshot::Sender<Packet>>;
type EventCallback = Arc<dyn Fn(Packet) + Send + Sync>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Read loop running, requests accepted
    Connected,
}

/// Hands out request ids: never 0, never one still in flight
#[derive(Debug, Default)]
struct RequestIds {
    last: u16,
}

impl RequestIds {
    fn allocate(&mut self, pending: &PendingRequests) -> Option<u16> {
        let mut candidate = self.last;
        for _ in 0..u16::MAX {
            candidate = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if !pending.contains_key(&candidate) {
                self.last = candidate;
                return Some(candidate);
            }
        }
        None
    }
}

/// State guarded by the link lock
struct LinkState {
    receiver: ReliableReceiver,
    pending: PendingRequests,
    sequence: SequenceCounter,
    request_ids: RequestIds,
}

impl LinkState {
    /// Frame `packet` and register its request id as pending
    fn register(
        &mut self,
        packet: &Packet,
    ) -> Result<(Bytes, oneshot::Receiver<Packet>), LinkError> {
        let sequence = self.sequence.next_sequence();
        let frame = Frame::data(sequence, true, packet.to_bytes().to_vec()).to_bytes()?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(packet.request_id, tx);
        Ok((frame, rx))
    }
}

/// Routes decoded payloads to waiting requests or the event queue
struct PacketRouter<'a> {
    pending: &'a mut PendingRequests,
    stats: &'a StatsCounters,
    events: Vec<Packet>,
}

impl PayloadHandler for PacketRouter<'_> {
    fn handle_payload(&mut self, payload: &[u8]) -> bool {
        if payload.len() != PACKET_SIZE {
            self.stats.incr(Counter::RxInvalidLength);
            debug!(len = payload.len(), "declining payload with unexpected length");
            return false;
        }

        let packet = match Packet::from_bytes(payload) {
            Ok(packet) if packet.is_valid() => packet,
            Ok(packet) => {
                self.stats.incr(Counter::HandlerDeclined);
                debug!(
                    magic = packet.magic,
                    data_length = packet.data_length,
                    "declining invalid packet"
                );
                return false;
            }
            Err(e) => {
                self.stats.incr(Counter::HandlerDeclined);
                debug!("declining undecodable packet: {e}");
                return false;
            }
        };

        if packet.is_response() && !packet.is_streaming() {
            if let Some(waiter) = self.pending.remove(&packet.request_id) {
                debug!(
                    request_id = packet.request_id,
                    command = %packet.command,
                    status = %packet.status,
                    "response matched"
                );
                // Waiter gave up between timeout and removal
                if let Err(packet) = waiter.send(packet) {
                    self.events.push(packet);
                }
                return true;
            }
            debug!(request_id = packet.request_id, "response without a pending request");
        }

        self.events.push(packet);
        true
    }
}

/// Everything the read loop and the send path share
struct Shared {
    state: Mutex<LinkState>,
    stats: Arc<StatsCounters>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    on_event: RwLock<Option<EventCallback>>,
    link_lost: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_lost(&self) -> bool {
        self.link_lost.load(Ordering::SeqCst)
    }

    /// Record that the transport went away and fail every waiter
    fn mark_lost(&self) {
        self.link_lost.store(true, Ordering::SeqCst);
        let mut state = self.lock();
        let count = state.pending.len();
        state.pending.clear();
        if count > 0 {
            debug!(count, "link lost, failing pending requests");
        }
    }

    async fn write_frame(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link is closed"));
        };
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Feed received bytes through the framing layer
    async fn ingest(&self, data: &[u8]) {
        let (replies, events) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let mut router = PacketRouter {
                pending: &mut state.pending,
                stats: &self.stats,
                events: Vec::new(),
            };
            let replies = state.receiver.receive(data, &mut router);
            (replies, router.events)
        };

        for reply in replies {
            if let Err(e) = self.write_frame(&reply).await {
                self.stats.incr(Counter::TxSendErrors);
                warn!("failed to send ACK/NAK: {e}");
            }
        }

        self.dispatch(events);
    }

    fn dispatch(&self, events: Vec<Packet>) {
        if events.is_empty() {
            return;
        }
        // Cloned out so the handler may replace itself
        let callback = self
            .on_event
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(callback) => {
                for packet in events {
                    callback(packet);
                }
            }
            None => debug!(count = events.len(), "no event handler, dropping packets"),
        }
    }
}

async fn read_loop<R>(
    shared: Arc<Shared>,
    mut reader: R,
    cancel: CancellationToken,
    chunk_size: usize,
) where
    R: AsyncRead + Unpin,
{
    info!("link reader started");
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    info!("transport closed by peer");
                    shared.mark_lost();
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("serial read error: {e}");
                    shared.mark_lost();
                    break;
                }
            },
        };
        debug!(bytes = n, "received");
        shared.ingest(&buf[..n]).await;
    }
    info!("link reader stopped");
}

/// Drops a request's pending entry if its caller goes away early
struct PendingGuard<'a> {
    shared: &'a Shared,
    request_id: u16,
    armed: bool,
}

impl PendingGuard<'_> {
    /// Remove the entry now; true if it was still pending
    fn remove(&mut self) -> bool {
        self.armed = false;
        self.shared.lock().pending.remove(&self.request_id).is_some()
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.remove() {
            debug!(request_id = self.request_id, "request abandoned by caller");
        }
    }
}

struct Session {
    endpoint: String,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// Client for the remote's debug bridge
pub struct LinkClient<C: Connector = SerialConnector> {
    connector: C,
    config: LinkConfig,
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
    state: RwLock<ConnectionState>,
}

impl LinkClient<SerialConnector> {
    /// Client using the serial port transport
    pub fn new(config: LinkConfig) -> Self {
        Self::with_connector(SerialConnector, config)
    }
}

impl<C: Connector> LinkClient<C> {
    pub fn with_connector(connector: C, config: LinkConfig) -> Self {
        let stats = Arc::new(StatsCounters::new());
        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState {
                receiver: ReliableReceiver::new(stats.clone()),
                pending: HashMap::new(),
                sequence: SequenceCounter::new(),
                request_ids: RequestIds::default(),
            }),
            stats,
            writer: tokio::sync::Mutex::new(None),
            on_event: RwLock::new(None),
            link_lost: AtomicBool::new(false),
        });
        Self {
            connector,
            config,
            shared,
            session: tokio::sync::Mutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current state; a session whose transport closed reports `Disconnected`
    pub fn state(&self) -> ConnectionState {
        let state = *self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state == ConnectionState::Connected && self.shared.is_lost() {
            ConnectionState::Disconnected
        } else {
            state
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Snapshot of the transport counters
    pub fn stats(&self) -> TransportStats {
        self.shared.stats.snapshot()
    }

    /// Number of requests waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Receive every packet that does not complete a pending request
    ///
    /// Called on the read loop task; keep it short.
    pub fn set_event_handler<F>(&self, callback: F)
    where
        F: Fn(Packet) + Send + Sync + 'static,
    {
        *self.shared.on_event.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(callback));
    }

    pub fn clear_event_handler(&self) {
        *self.shared.on_event.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Connect to the endpoint named in the config
    pub async fn open(&self) -> Result<(), LinkError> {
        let endpoint = self.config.endpoint.clone();
        self.connect(&endpoint, self.config.baud_rate).await
    }

    /// Open `endpoint` and start the read loop
    ///
    /// Any existing session is closed first. Counters are reset.
    pub async fn connect(&self, endpoint: &str, baud_rate: u32) -> Result<(), LinkError> {
        self.disconnect().await;
        self.set_state(ConnectionState::Connecting);
        info!(endpoint, baud_rate, "connecting");

        let stream = match self.connector.open(endpoint, baud_rate) {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(endpoint, "failed to open transport: {e}");
                return Err(LinkError::ConnectionFailed(format!("{endpoint}: {e}")));
            }
        };

        self.shared.stats.reset();
        {
            let mut state = self.shared.lock();
            state.receiver.clear();
            state.sequence.reset();
        }
        self.shared.link_lost.store(false, Ordering::SeqCst);

        let (reader, writer) = tokio::io::split(stream);
        *self.shared.writer.lock().await = Some(Box::new(writer));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(read_loop(
            self.shared.clone(),
            reader,
            cancel.clone(),
            self.config.read_chunk_size,
        ));

        *self.session.lock().await = Some(Session {
            endpoint: endpoint.to_string(),
            cancel,
            reader: handle,
        });
        self.set_state(ConnectionState::Connected);
        info!(endpoint, "connected");
        Ok(())
    }

    /// Stop the read loop, close the transport and cancel pending requests
    ///
    /// Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.cancel.cancel();
            let abort = session.reader.abort_handle();
            if tokio::time::timeout(self.config.shutdown_grace(), session.reader)
                .await
                .is_err()
            {
                debug!("read loop did not stop in time, aborting");
                abort.abort();
            }

            if let Some(mut writer) = self.shared.writer.lock().await.take() {
                if let Err(e) = writer.shutdown().await {
                    debug!("ignoring transport close error: {e}");
                }
            }
            info!(endpoint = %session.endpoint, "disconnected");
        }

        let cancelled = {
            let mut state = self.shared.lock();
            state.receiver.clear();
            let count = state.pending.len();
            // Dropping the senders wakes every waiter with Cancelled
            state.pending.clear();
            count
        };
        if cancelled > 0 {
            debug!(count = cancelled, "cancelled pending requests");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Send a typed request with the default timeout
    pub async fn request(&self, request: &Request) -> Result<Packet, LinkError> {
        let payload = request.payload()?;
        self.send(request.command(), &payload).await
    }

    /// Send `command` and wait for its response with the default timeout
    pub async fn send(&self, command: Command, payload: &[u8]) -> Result<Packet, LinkError> {
        self.send_with(
            command,
            payload,
            self.config.request_timeout(),
            &CancellationToken::new(),
        )
        .await
    }

    /// Send `command` and wait up to `timeout` for its response
    ///
    /// Payloads longer than the packet data area are truncated.
    pub async fn send_with(
        &self,
        command: Command,
        payload: &[u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Packet, LinkError> {
        self.ensure_ready(cancel)?;

        let (request_id, frame, response) = {
            let mut guard = self.shared.lock();
            if self.shared.is_lost() {
                return Err(LinkError::NotConnected);
            }
            let state = &mut *guard;
            let request_id = state
                .request_ids
                .allocate(&state.pending)
                .ok_or(LinkError::RequestIdsExhausted)?;
            let packet = Packet::request(command, payload, request_id);
            let (frame, response) = state.register(&packet)?;
            (request_id, frame, response)
        };

        self.exchange(request_id, command, frame, response, timeout, cancel)
            .await
    }

    /// Send a caller-built request packet
    ///
    /// The packet must be valid and carry a non-zero request id that is not
    /// already in flight.
    pub async fn send_packet(
        &self,
        packet: &Packet,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Packet, LinkError> {
        if !packet.is_valid() {
            return Err(LinkError::InvalidArgument(
                "packet failed validation".to_string(),
            ));
        }
        if packet.request_id == 0 {
            return Err(LinkError::InvalidArgument(
                "request id 0 is reserved".to_string(),
            ));
        }
        self.ensure_ready(cancel)?;

        let (frame, response) = {
            let mut state = self.shared.lock();
            if self.shared.is_lost() {
                return Err(LinkError::NotConnected);
            }
            if state.pending.contains_key(&packet.request_id) {
                return Err(LinkError::InvalidArgument(format!(
                    "request id {} already in flight",
                    packet.request_id
                )));
            }
            state.register(packet)?
        };

        self.exchange(
            packet.request_id,
            packet.command,
            frame,
            response,
            timeout,
            cancel,
        )
        .await
    }

    fn ensure_ready(&self, cancel: &CancellationToken) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        if cancel.is_cancelled() {
            return Err(LinkError::Cancelled);
        }
        Ok(())
    }

    async fn exchange(
        &self,
        request_id: u16,
        command: Command,
        frame: Bytes,
        mut response: oneshot::Receiver<Packet>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Packet, LinkError> {
        let mut pending = PendingGuard {
            shared: &*self.shared,
            request_id,
            armed: true,
        };

        self.shared.stats.incr(Counter::TxFrames);
        if let Err(e) = self.shared.write_frame(&frame).await {
            self.shared.stats.incr(Counter::TxSendErrors);
            pending.remove();
            warn!(request_id, %command, "failed to send request: {e}");
            return Err(LinkError::Transport(e));
        }
        debug!(request_id, %command, bytes = frame.len(), "request sent");

        let failure = tokio::select! {
            result = &mut response => {
                pending.disarm();
                return result.map_err(|_| {
                    if self.shared.is_lost() {
                        LinkError::NotConnected
                    } else {
                        LinkError::Cancelled
                    }
                });
            }
            _ = cancel.cancelled() => LinkError::Cancelled,
            _ = tokio::time::sleep(timeout) => LinkError::Timeout,
        };

        if !pending.remove() {
            // The router matched the response while we were giving up
            if let Ok(packet) = response.try_recv() {
                return Ok(packet);
            }
        }

        match failure {
            LinkError::Timeout => {
                self.shared.stats.incr(Counter::TxTimeout);
                warn!(request_id, %command, "request timed out");
            }
            _ => debug!(request_id, %command, "request cancelled"),
        }
        Err(failure)
    }
}

impl<C: Connector> Drop for LinkClient<C> {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
            session.reader.abort();
        }
        self.shared.lock().pending.clear();
    }
}
