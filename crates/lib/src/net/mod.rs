//! Non-blocking transport: a shared networking context, an HTTP multiplexer driven by a single
//! poll step, and the streaming (WebSocket) session layered on the same runtime.

mod context;
mod multiplexer;
mod stream;

pub use context::{NetContext, NetLease};
pub use multiplexer::{
    DataCallback, DoneCallback, HttpRequest, HttpResponse, Multiplexer, RequestHandle,
    POLL_WAIT,
};
pub use stream::{
    close_payload, truncate_reason, FrameKind, FrameTransport, StreamingSession,
    MAX_CLOSE_REASON, RECV_BUFFER_SIZE,
};

/// Transport-level faults. Per-request faults reach only that request's completion callback.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("networking init failed: {0}")]
    Init(String),
    #[error("request failed: {message}")]
    Request {
        message: String,
        status: Option<u16>,
    },
    #[error("reading response body failed (status {status}): {message}")]
    Body { status: u16, message: String },
    #[error("multiplexer is closed")]
    Closed,
    #[error("websocket upgrade failed: {0}")]
    Upgrade(String),
    #[error("websocket error: {0}")]
    Socket(String),
    #[error("websocket write did not drain after {0} attempts")]
    WouldBlock(u32),
    #[error("streaming connection is closed")]
    StreamClosed,
}

impl TransportError {
    /// HTTP status, when the fault happened after a response line was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Request { status, .. } => *status,
            TransportError::Body { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Request {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}
