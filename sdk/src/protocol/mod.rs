//! # Transaction Protocol
//!
//! The sequencing engine for the Luma payment session. Every payment —
//! card, ACH, or cash — runs the same message flow over one encrypted
//! WebSocket channel:
//!
//! ```text
//!   ┌────────┐                                        ┌────────┐
//!   │  SDK   │                                        │ Server │
//!   └───┬────┘                                        └───┬────┘
//!       │ host:hostToken (plaintext b64 + our pubkey)     │
//!       ├───────────────────────────────────────────────► │
//!       │ host_token {hostToken, sessionKey, publicKey}   │
//!       │ ◄───────────────────────────────────────────────┤
//!       │                                                 │
//!       │ host:transfer_part1 (sealed)                    │
//!       ├───────────────────────────────────────────────► │
//!       │ transfer_confirmation (sealed, idempotency)     │   two-phase
//!       │ ◄─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┤   servers only
//!       │ host:transfer_part2 (sealed)                    │
//!       ├─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ► │
//!       │ transfer_complete (sealed)                      │
//!       │ ◄───────────────────────────────────────────────┤
//! ```
//!
//! The engine's state machine is
//! `Idle → AwaitingHostToken → Ready → AwaitingResponse → (Completed | Failed) → Idle`,
//! with reset reachable from anywhere. The host token, session key, and
//! peer public key commit and clear atomically — readiness is always a
//! check of the triple, never of one field.
//!
//! Inbound correlation uses a FIFO expectation queue keyed by
//! message-type family (see [`correlate`]), so the calculate-fee side
//! channel can run without ever being mistaken for the primary
//! operation's answer.

pub mod correlate;
mod engine;
pub mod messages;
mod outcome;

pub use engine::{ActiveSession, ProtocolState, TransactionProtocol};
pub use messages::{FeeMode, Payor};
pub use outcome::{
    CashBarcode, FailedTransaction, SuccessfulTransaction, TokenizeResult, TokenizedInstrument,
    TransactResult,
};
