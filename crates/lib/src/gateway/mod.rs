//! Gateway: the vendor's streaming event protocol.
//!
//! `protocol` holds the wire types; `engine` drives the handshake, heartbeats and frame
//! reassembly over any `FrameTransport`.

mod engine;
mod protocol;
#[cfg(test)]
pub(crate) mod testing;

pub use engine::{
    streaming_url, Clock, DispatchEvent, Gateway, GatewayError, GatewayOptions, GatewayState,
    ProtocolSession, SessionMetadata, SystemClock, DEFAULT_MAX_PARTIAL_BYTES,
};
pub use protocol::{
    GatewayPayload, Hello, Identify, IdentifyProperties, Intents, OpCode, OutboundPayload,
};
