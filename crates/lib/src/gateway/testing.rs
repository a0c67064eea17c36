//! In-memory transport and clock for driving the engine without a socket.

use crate::gateway::engine::Clock;
use crate::net::{FrameKind, FrameTransport, TransportError};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Wire {
    inbound: VecDeque<(Vec<u8>, FrameKind)>,
    sent: Vec<(Vec<u8>, FrameKind)>,
    open: bool,
    peer_closes: bool,
    fail_sends: bool,
    closed_with: Option<(u16, String)>,
}

/// Cloned handles share one wire, so a test keeps a handle after moving one into the engine.
#[derive(Clone)]
pub struct MockTransport {
    wire: Rc<RefCell<Wire>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            wire: Rc::new(RefCell::new(Wire {
                open: true,
                ..Wire::default()
            })),
        }
    }

    pub fn push_text(&self, text: &str) {
        self.push_bytes(text.as_bytes());
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        self.wire
            .borrow_mut()
            .inbound
            .push_back((bytes.to_vec(), FrameKind::Text));
    }

    /// The peer closes after the queued frames are delivered.
    pub fn peer_close(&self) {
        self.wire.borrow_mut().peer_closes = true;
    }

    pub fn fail_sends(&self) {
        self.wire.borrow_mut().fail_sends = true;
    }

    pub fn sent(&self) -> Vec<(Vec<u8>, FrameKind)> {
        self.wire.borrow().sent.clone()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|(bytes, _)| serde_json::from_slice(bytes).ok())
            .collect()
    }

    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.wire.borrow().closed_with.clone()
    }
}

impl FrameTransport for MockTransport {
    fn send_frame(&mut self, payload: &[u8], kind: FrameKind) -> Result<(), TransportError> {
        let mut wire = self.wire.borrow_mut();
        if wire.fail_sends {
            return Err(TransportError::Socket("connection reset".to_string()));
        }
        wire.sent.push((payload.to_vec(), kind));
        Ok(())
    }

    fn poll_frames(
        &mut self,
        on_frame: &mut dyn FnMut(&[u8], FrameKind),
    ) -> Result<(), TransportError> {
        let frames: Vec<_> = self.wire.borrow_mut().inbound.drain(..).collect();
        for (payload, kind) in frames {
            on_frame(&payload, kind);
        }
        let mut wire = self.wire.borrow_mut();
        if wire.peer_closes {
            wire.open = false;
        }
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let mut wire = self.wire.borrow_mut();
        if wire.closed_with.is_none() {
            wire.closed_with = Some((code, reason.to_string()));
        }
        wire.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.wire.borrow().open
    }
}

/// Manually advanced clock.
#[derive(Clone)]
pub struct MockClock {
    now: Rc<Cell<Instant>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}
