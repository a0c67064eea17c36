//! Gateway protocol engine: handshake, heartbeating, sequence tracking and frame reassembly on
//! top of a `FrameTransport`.
//!
//! Lifecycle: `Connecting` → `AwaitingHello` → `Identifying` → `Connected` → `Closed`.
//! `Identifying` spans from HELLO to the first dispatch. `Closed` is terminal.

use crate::gateway::protocol::{
    GatewayPayload, Hello, Identify, IdentifyProperties, Intents, OpCode, OutboundPayload,
};
use crate::net::{FrameKind, FrameTransport, NetContext, StreamingSession, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use std::time::{Duration, Instant};

/// Cap on bytes held while waiting for the rest of a frame.
pub const DEFAULT_MAX_PARTIAL_BYTES: usize = 4 * 1024 * 1024;

/// Time source for the heartbeat timer.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Connecting,
    AwaitingHello,
    Identifying,
    Connected,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway transport: {0}")]
    Transport(#[from] TransportError),
    /// The peer broke the handshake contract; the connection cannot continue.
    #[error("hello frame is missing a positive integer heartbeat_interval")]
    MalformedHello,
    #[error("gateway connection is closed")]
    Closed,
    #[error("encoding gateway frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What the engine sends with identify, plus reassembly limits.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub token: String,
    pub intents: Intents,
    pub properties: IdentifyProperties,
    pub max_partial_bytes: usize,
}

impl GatewayOptions {
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            intents,
            properties: IdentifyProperties::default(),
            max_partial_bytes: DEFAULT_MAX_PARTIAL_BYTES,
        }
    }
}

/// Resume data recorded from the first READY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    pub session_id: String,
    pub resume_url: String,
}

/// Protocol state owned by the engine. Only the engine's frame handler mutates it.
#[derive(Debug, Default)]
pub struct ProtocolSession {
    sequence: Option<u64>,
    /// Zero until HELLO arms it.
    heartbeat_interval: Duration,
    last_heartbeat: Option<Instant>,
    metadata: Option<SessionMetadata>,
    identify_sent: bool,
    partial: Vec<u8>,
    heartbeats_sent: u64,
    acks_received: u64,
    ack_pending: bool,
}

impl ProtocolSession {
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    pub fn identify_sent(&self) -> bool {
        self.identify_sent
    }

    /// Bytes currently held for an incomplete frame.
    pub fn partial_len(&self) -> usize {
        self.partial.len()
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent
    }

    pub fn acks_received(&self) -> u64 {
        self.acks_received
    }
}

/// A named application event delivered by opcode 0. The name is upper-cased.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    pub name: String,
    pub data: serde_json::Value,
    pub sequence: Option<u64>,
}

pub struct Gateway<T: FrameTransport = StreamingSession, C: Clock = SystemClock> {
    transport: T,
    clock: C,
    options: GatewayOptions,
    state: GatewayState,
    session: ProtocolSession,
}

/// Append the version and encoding query to the URL returned by `GET /gateway/bot`.
pub fn streaming_url(base: &str, api_version: u32) -> String {
    let mut url = base.to_string();
    let has_path = url
        .split_once("://")
        .map(|(_, rest)| rest.contains('/'))
        .unwrap_or(true);
    if !has_path {
        url.push('/');
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}v={}&encoding=json", url, sep, api_version)
}

impl Gateway<StreamingSession, SystemClock> {
    /// Open the streaming connection (synchronous upgrade) and wait for HELLO.
    pub fn connect(
        ctx: &NetContext,
        url: &str,
        api_version: u32,
        options: GatewayOptions,
    ) -> Result<Self, GatewayError> {
        let url = streaming_url(url, api_version);
        log::debug!("connecting to gateway at {}", url);
        let transport = StreamingSession::open(ctx, &url)?;
        Ok(Self::new(transport, SystemClock, options))
    }
}

impl<T: FrameTransport, C: Clock> Gateway<T, C> {
    /// Wrap an already-upgraded transport.
    pub fn new(transport: T, clock: C, options: GatewayOptions) -> Self {
        let mut gw = Self {
            transport,
            clock,
            options,
            state: GatewayState::Connecting,
            session: ProtocolSession::default(),
        };
        if gw.transport.is_open() {
            gw.set_state(GatewayState::AwaitingHello);
        } else {
            gw.set_state(GatewayState::Closed);
        }
        gw
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn session(&self) -> &ProtocolSession {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Receive and handle everything available, then service the heartbeat timer. Returns the
    /// dispatches received during this step, in order.
    pub fn poll(&mut self) -> Result<Vec<DispatchEvent>, GatewayError> {
        if self.state == GatewayState::Closed {
            return Err(GatewayError::Closed);
        }

        let mut received: Vec<(Vec<u8>, FrameKind)> = Vec::new();
        let polled = self
            .transport
            .poll_frames(&mut |payload: &[u8], kind: FrameKind| {
                received.push((payload.to_vec(), kind))
            });

        let mut events = Vec::new();
        for (payload, kind) in received {
            if let Err(e) = self.on_frame_received(&payload, kind, &mut events) {
                self.set_state(GatewayState::Closed);
                return Err(e);
            }
        }

        if let Err(e) = polled {
            log::error!("gateway receive failed: {}", e);
            self.set_state(GatewayState::Closed);
            return Err(e.into());
        }
        if !self.transport.is_open() {
            log::warn!("gateway connection closed by peer");
            self.set_state(GatewayState::Closed);
            return Ok(events);
        }

        self.check_heartbeat_timer()?;
        Ok(events)
    }

    /// Store resume data from READY. The first write wins; later calls are refused.
    pub fn record_session(
        &mut self,
        session_id: impl Into<String>,
        resume_url: impl Into<String>,
    ) -> bool {
        let session_id = session_id.into();
        if let Some(existing) = &self.session.metadata {
            log::warn!(
                "session already recorded as {}; ignoring {}",
                existing.session_id,
                session_id
            );
            return false;
        }
        log::debug!("recorded gateway session {}", session_id);
        self.session.metadata = Some(SessionMetadata {
            session_id,
            resume_url: resume_url.into(),
        });
        true
    }

    /// Close handshake, then release the connection. Idempotent.
    pub fn close(&mut self, code: u16, reason: &str) -> Result<(), GatewayError> {
        if self.state == GatewayState::Closed {
            return Ok(());
        }
        log::info!("closing gateway ({} {})", code, reason);
        self.set_state(GatewayState::Closed);
        self.transport.close(code, reason)?;
        Ok(())
    }

    fn set_state(&mut self, state: GatewayState) {
        if self.state != state {
            log::trace!("gateway state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn on_frame_received(
        &mut self,
        payload: &[u8],
        kind: FrameKind,
        events: &mut Vec<DispatchEvent>,
    ) -> Result<(), GatewayError> {
        match kind {
            FrameKind::Text | FrameKind::Binary => {}
            FrameKind::Close => {
                log::info!("gateway sent close frame ({} bytes)", payload.len());
                return Ok(());
            }
            FrameKind::Ping | FrameKind::Pong => {
                log::trace!("websocket {:?}", kind);
                return Ok(());
            }
        }

        log::debug!("frame received from gateway (len {})", payload.len());
        match self.reassemble(payload) {
            Some(frame) => self.handle_frame(frame, events),
            None => Ok(()),
        }
    }

    /// Parse `fresh` alone, or appended to the bytes held from earlier pieces. Truncated input
    /// is held for the next piece; malformed input is discarded.
    fn reassemble(&mut self, fresh: &[u8]) -> Option<GatewayPayload> {
        let had_partial = !self.session.partial.is_empty();
        let parsed = if had_partial {
            self.session.partial.extend_from_slice(fresh);
            serde_json::from_slice::<serde_json::Value>(&self.session.partial)
        } else {
            serde_json::from_slice::<serde_json::Value>(fresh)
        };

        match parsed {
            Ok(value) => {
                if had_partial {
                    log::trace!("reassembled frame from {} bytes", self.session.partial.len());
                    self.session.partial = Vec::new();
                }
                match serde_json::from_value::<GatewayPayload>(value) {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        log::warn!("malformed gateway frame, dropping: {}", e);
                        None
                    }
                }
            }
            Err(e) if e.classify() == Category::Eof => {
                if !had_partial {
                    self.session.partial = fresh.to_vec();
                }
                if self.session.partial.len() > self.options.max_partial_bytes {
                    log::error!(
                        "incomplete gateway frame exceeded {} bytes; discarding",
                        self.options.max_partial_bytes
                    );
                    self.session.partial = Vec::new();
                } else {
                    log::trace!(
                        "incomplete gateway frame; holding {} bytes",
                        self.session.partial.len()
                    );
                }
                None
            }
            Err(e) => {
                log::warn!("invalid gateway frame, discarding {} bytes: {}", fresh.len(), e);
                self.session.partial = Vec::new();
                None
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: GatewayPayload,
        events: &mut Vec<DispatchEvent>,
    ) -> Result<(), GatewayError> {
        if let Some(s) = frame.s {
            self.session.sequence = Some(s);
        }

        let Some(op) = frame.op else {
            log::warn!("no opcode on gateway frame; not handling");
            return Ok(());
        };
        let Some(opcode) = OpCode::from_u64(op) else {
            log::warn!("unhandled gateway opcode {}; dropping frame", op);
            return Ok(());
        };
        log::trace!("opcode: {:?}", opcode);

        match opcode {
            OpCode::Dispatch => self.handle_dispatch(frame, events),
            OpCode::Heartbeat => {
                log::debug!("gateway requested a heartbeat");
                self.send_heartbeat()?;
            }
            OpCode::Identify => log::warn!("peer sent an identify frame; ignoring"),
            OpCode::Hello => self.handle_hello(&frame.d)?,
            OpCode::HeartbeatAck => {
                self.session.acks_received += 1;
                self.session.ack_pending = false;
                log::trace!("heartbeat acknowledged");
            }
        }
        Ok(())
    }

    fn handle_hello(&mut self, d: &serde_json::Value) -> Result<(), GatewayError> {
        let hello = match Hello::deserialize(d) {
            Ok(hello) if hello.heartbeat_interval > 0 => hello,
            _ => {
                log::error!("hello without a usable heartbeat_interval: {}", d);
                return Err(GatewayError::MalformedHello);
            }
        };

        log::info!("gateway says hello");
        self.session.heartbeat_interval = Duration::from_millis(hello.heartbeat_interval);
        log::debug!("heartbeat interval: {} ms", hello.heartbeat_interval);

        // the peer expects a heartbeat right away
        self.send_heartbeat()?;

        if self.session.identify_sent {
            log::warn!("repeated hello; identify already sent");
        } else {
            self.send_identify()?;
        }
        self.set_state(GatewayState::Identifying);
        Ok(())
    }

    fn handle_dispatch(&mut self, frame: GatewayPayload, events: &mut Vec<DispatchEvent>) {
        let Some(name) = frame.t else {
            log::warn!("dispatch without an event name; dropping");
            return;
        };
        if self.state == GatewayState::Identifying {
            self.set_state(GatewayState::Connected);
        }
        let name = name.to_uppercase();
        log::debug!("dispatch {}", name);
        events.push(DispatchEvent {
            name,
            data: frame.d,
            sequence: frame.s,
        });
    }

    fn check_heartbeat_timer(&mut self) -> Result<(), GatewayError> {
        if self.session.heartbeat_interval.is_zero() {
            return Ok(());
        }
        let now = self.clock.now();
        let due = match self.session.last_heartbeat {
            Some(last) => now.saturating_duration_since(last) >= self.session.heartbeat_interval,
            None => true,
        };
        if due {
            log::trace!("heartbeat interval elapsed");
            if self.session.ack_pending {
                log::warn!("previous heartbeat was never acknowledged");
            }
            self.send_heartbeat()?;
        }
        Ok(())
    }

    fn send_heartbeat(&mut self) -> Result<(), GatewayError> {
        log::debug!("sending heartbeat (seq {:?})", self.session.sequence);
        let payload = OutboundPayload::new(OpCode::Heartbeat, self.session.sequence);
        self.send_payload(&payload)?;
        self.session.last_heartbeat = Some(self.clock.now());
        self.session.heartbeats_sent += 1;
        self.session.ack_pending = true;
        Ok(())
    }

    fn send_identify(&mut self) -> Result<(), GatewayError> {
        log::info!("identifying (intents {:#x})", self.options.intents.bits());
        let payload = OutboundPayload::new(
            OpCode::Identify,
            Identify {
                token: self.options.token.clone(),
                intents: self.options.intents.bits(),
                properties: self.options.properties.clone(),
            },
        );
        self.send_payload(&payload)?;
        self.session.identify_sent = true;
        Ok(())
    }

    fn send_payload<P: Serialize>(&mut self, payload: &P) -> Result<(), GatewayError> {
        let bytes = serde_json::to_vec(payload)?;
        if let Err(e) = self.transport.send_frame(&bytes, FrameKind::Text) {
            log::error!("failed to send gateway frame: {}", e);
            self.set_state(GatewayState::Closed);
            return Err(e.into());
        }
        Ok(())
    }
}
