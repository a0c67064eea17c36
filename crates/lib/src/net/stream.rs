//! Streaming session: a framed duplex connection (WebSocket) on the shared runtime.
//!
//! The upgrade is synchronous and happens once, before the tick loop starts. After that every
//! operation enters the runtime only for a short, bounded wait.

use crate::net::context::{NetContext, NetLease};
use crate::net::TransportError;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Size of the reusable receive buffer. Larger messages are handed out in pieces of this size.
pub const RECV_BUFFER_SIZE: usize = 16 * 1024;
/// Control frame payloads are capped at 125 bytes, two of which hold the status code.
pub const MAX_CLOSE_REASON: usize = 123;

/// How long a receive waits before the socket counts as would-block.
const RECV_WAIT: Duration = Duration::from_millis(1);
/// How long a flush may take before the write counts as would-block.
const FLUSH_WAIT: Duration = Duration::from_millis(50);
const SEND_RETRY_SLEEP: Duration = Duration::from_millis(10);
const SEND_MAX_ATTEMPTS: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

/// The seam between the protocol engine and the wire. `StreamingSession` is the real one.
pub trait FrameTransport {
    /// Write one frame, waiting out short backpressure.
    fn send_frame(&mut self, payload: &[u8], kind: FrameKind) -> Result<(), TransportError>;

    /// Hand every frame that is available right now to `on_frame`. Must not block beyond a
    /// short bounded wait.
    fn poll_frames(
        &mut self,
        on_frame: &mut dyn FnMut(&[u8], FrameKind),
    ) -> Result<(), TransportError>;

    /// Send a close frame and release the connection.
    fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct StreamingSession {
    socket: Socket,
    open: bool,
    recv_buffer: Vec<u8>,
    lease: NetLease,
}

impl StreamingSession {
    /// Perform the upgrade handshake. Blocks until it succeeds or fails.
    pub fn open(ctx: &NetContext, url: &str) -> Result<Self, TransportError> {
        log::info!("opening websocket to {}", url);
        let lease = ctx.acquire()?;
        let (socket, response) = lease
            .runtime()
            .block_on(tokio_tungstenite::connect_async(url))
            .map_err(|e| TransportError::Upgrade(e.to_string()))?;
        log::debug!("websocket upgraded (status {})", response.status());
        Ok(Self {
            socket,
            open: true,
            recv_buffer: Vec::with_capacity(RECV_BUFFER_SIZE),
            lease,
        })
    }

    fn flush_with_backpressure(&mut self) -> Result<(), TransportError> {
        let socket = &mut self.socket;
        let runtime = self.lease.runtime();
        let result = flush_with_retries(SEND_MAX_ATTEMPTS, SEND_RETRY_SLEEP, || {
            match runtime.block_on(async { tokio::time::timeout(FLUSH_WAIT, socket.flush()).await }) {
                Ok(Ok(())) => FlushAttempt::Done,
                Ok(Err(e)) => FlushAttempt::Failed(e.to_string()),
                Err(_) => FlushAttempt::Pending,
            }
        });
        if let Err(TransportError::Socket(_)) = &result {
            self.open = false;
        }
        result
    }
}

/// Outcome of one bounded flush wait.
#[derive(Debug)]
enum FlushAttempt {
    Done,
    Pending,
    Failed(String),
}

/// Flush until done, sleeping `pause` after every attempt that did not finish in time.
fn flush_with_retries(
    max_attempts: u32,
    pause: Duration,
    mut attempt: impl FnMut() -> FlushAttempt,
) -> Result<(), TransportError> {
    for n in 1..=max_attempts {
        match attempt() {
            FlushAttempt::Done => return Ok(()),
            FlushAttempt::Failed(e) => return Err(TransportError::Socket(e)),
            FlushAttempt::Pending => {
                log::debug!("websocket write would block (attempt {}); retrying", n);
                std::thread::sleep(pause);
            }
        }
    }
    Err(TransportError::WouldBlock(max_attempts))
}

/// Hand `payload` to `on_frame` through `buffer`, at most `RECV_BUFFER_SIZE` bytes at a time.
/// An empty payload is still delivered once.
fn deliver(
    buffer: &mut Vec<u8>,
    payload: &[u8],
    kind: FrameKind,
    on_frame: &mut dyn FnMut(&[u8], FrameKind),
) {
    if payload.is_empty() {
        on_frame(payload, kind);
        return;
    }
    for piece in payload.chunks(RECV_BUFFER_SIZE) {
        buffer.clear();
        buffer.extend_from_slice(piece);
        on_frame(buffer, kind);
    }
}

impl FrameTransport for StreamingSession {
    fn send_frame(&mut self, payload: &[u8], kind: FrameKind) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::StreamClosed);
        }
        let message = match kind {
            FrameKind::Text => Message::Text(String::from_utf8_lossy(payload).into_owned()),
            FrameKind::Binary => Message::Binary(payload.to_vec()),
            FrameKind::Ping => Message::Ping(payload.to_vec()),
            FrameKind::Pong => Message::Pong(payload.to_vec()),
            FrameKind::Close => Message::Close(None),
        };

        let socket = &mut self.socket;
        self.lease
            .runtime()
            .block_on(socket.feed(message))
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        self.flush_with_backpressure()
    }

    fn poll_frames(
        &mut self,
        on_frame: &mut dyn FnMut(&[u8], FrameKind),
    ) -> Result<(), TransportError> {
        while self.open {
            let socket = &mut self.socket;
            let next = self
                .lease
                .runtime()
                .block_on(async { tokio::time::timeout(RECV_WAIT, socket.next()).await });
            let message = match next {
                Err(_) => {
                    log::trace!("no data on websocket");
                    break;
                }
                Ok(None) => {
                    log::info!("websocket stream ended");
                    self.open = false;
                    break;
                }
                Ok(Some(Err(e))) => {
                    self.open = false;
                    return Err(TransportError::Socket(e.to_string()));
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => {
                    deliver(&mut self.recv_buffer, text.as_bytes(), FrameKind::Text, on_frame)
                },
                Message::Binary(data) => {
                    deliver(&mut self.recv_buffer, &data, FrameKind::Binary, on_frame)
                },
                Message::Ping(data) => {
                    deliver(&mut self.recv_buffer, &data, FrameKind::Ping, on_frame)
                },
                Message::Pong(data) => {
                    deliver(&mut self.recv_buffer, &data, FrameKind::Pong, on_frame)
                },
                Message::Close(frame) => {
                    let payload = match frame {
                        Some(frame) => {
                            let code = u16::from(frame.code);
                            log::info!("peer closed websocket: {} {}", code, frame.reason);
                            close_payload(code, &frame.reason)
                        }
                        None => Vec::new(),
                    };
                    self.open = false;
                    deliver(&mut self.recv_buffer, &payload, FrameKind::Close, on_frame);
                }
                Message::Frame(_) => {}
            }
        }
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(truncate_reason(reason).to_string()),
        };
        let socket = &mut self.socket;
        let result = self.lease.runtime().block_on(async {
            tokio::time::timeout(FLUSH_WAIT, socket.close(Some(frame))).await
        });
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Socket(e.to_string())),
            Err(_) => {
                log::warn!("websocket close handshake did not drain; dropping connection");
                Ok(())
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Cut `reason` so that code + reason fit one control frame, never splitting a character.
pub fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// Close frame payload: big-endian status code followed by the (truncated) UTF-8 reason.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let reason = truncate_reason(reason);
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reason_is_untouched() {
        assert_eq!(truncate_reason("bye"), "bye");
        assert_eq!(close_payload(1000, "bye"), vec![0x03, 0xe8, b'b', b'y', b'e']);
    }

    #[test]
    fn long_reason_is_capped() {
        let reason = "x".repeat(300);
        let payload = close_payload(4000, &reason);
        assert_eq!(payload.len(), 125);
        assert_eq!(&payload[..2], &4000u16.to_be_bytes());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let reason = "é".repeat(100);
        let cut = truncate_reason(&reason);
        assert!(cut.len() <= MAX_CLOSE_REASON);
        assert_eq!(cut.len() % 2, 0);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn large_payloads_arrive_in_buffer_sized_pieces() {
        let payload: Vec<u8> = (0..RECV_BUFFER_SIZE * 2 + 100).map(|i| i as u8).collect();
        let mut buffer = Vec::with_capacity(RECV_BUFFER_SIZE);
        let mut pieces: Vec<(Vec<u8>, FrameKind)> = Vec::new();
        deliver(&mut buffer, &payload, FrameKind::Binary, &mut |piece: &[u8], kind: FrameKind| {
            pieces.push((piece.to_vec(), kind))
        });

        let sizes: Vec<usize> = pieces.iter().map(|(p, _)| p.len()).collect();
        assert_eq!(sizes, vec![RECV_BUFFER_SIZE, RECV_BUFFER_SIZE, 100]);
        assert!(pieces.iter().all(|(_, kind)| *kind == FrameKind::Binary));
        let joined: Vec<u8> = pieces.iter().flat_map(|(p, _)| p.iter().copied()).collect();
        assert_eq!(joined, payload);
    }

    #[test]
    fn empty_payload_is_delivered_once() {
        let mut buffer = Vec::new();
        let mut seen = Vec::new();
        deliver(&mut buffer, &[], FrameKind::Close, &mut |piece: &[u8], kind: FrameKind| {
            seen.push((piece.len(), kind))
        });
        assert_eq!(seen, vec![(0, FrameKind::Close)]);
    }

    #[test]
    fn flush_retries_until_the_write_drains() {
        let mut attempts = 0;
        let result = flush_with_retries(5, Duration::ZERO, || {
            attempts += 1;
            if attempts < 3 {
                FlushAttempt::Pending
            } else {
                FlushAttempt::Done
            }
        });
        assert!(result.is_ok());
        assert_eq!(attempts, 3);
    }

    #[test]
    fn flush_gives_up_after_max_attempts() {
        let mut attempts = 0;
        let result = flush_with_retries(4, Duration::ZERO, || {
            attempts += 1;
            FlushAttempt::Pending
        });
        assert!(matches!(result, Err(TransportError::WouldBlock(4))));
        assert_eq!(attempts, 4);
    }

    #[test]
    fn flush_failure_is_not_retried() {
        let mut attempts = 0;
        let result = flush_with_retries(4, Duration::ZERO, || {
            attempts += 1;
            FlushAttempt::Failed("broken pipe".into())
        });
        assert!(matches!(result, Err(TransportError::Socket(e)) if e == "broken pipe"));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn open_fails_when_nothing_listens() {
        let ctx = NetContext::new();
        let result = StreamingSession::open(&ctx, "ws://127.0.0.1:9/");
        assert!(matches!(result, Err(TransportError::Upgrade(_))));
        assert!(!ctx.is_initialized());
    }
}
