//! # Socket Transport
//!
//! Owns exactly one WebSocket connection at a time and nothing else: no
//! retry policy (that belongs to the coordinator), no queueing (a send
//! while disconnected fails immediately), no protocol knowledge (frames in,
//! frames out).
//!
//! Status transitions are published on a watch channel:
//!
//! ```text
//! NotConnected → Connecting → Connected → Disconnected
//!        ▲                        │
//!        └───────── close() ──────┘
//! ```
//!
//! `Disconnected` is the involuntary exit (peer close, transport error);
//! `NotConnected` is the deliberate one.

mod socket;

use async_trait::async_trait;

use crate::error::SdkError;

pub use socket::{ConnectionStatus, SocketTransport, TransportEvent};

/// The one-method seam between the protocol engine and the wire. The
/// production implementation is [`SocketTransport`]; tests substitute a
/// recorder.
#[async_trait]
pub trait MessagePort: Send + Sync {
    async fn send(&self, frame: String) -> Result<(), SdkError>;
}
