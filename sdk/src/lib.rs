// Copyright (c) 2026 Luma Payments. MIT License.
// See LICENSE for details.

//! # Luma Pay SDK — Core Library
//!
//! The transaction protocol engine behind the Luma mobile SDK: collect
//! payment-instrument data in the app, exchange it with the payment
//! service over an encrypted WebSocket channel, and never let the raw
//! card number anywhere near the integrator's own backend.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of a
//! payment session:
//!
//! - **crypto** — Session key pair and authenticated sealing/opening of
//!   message bodies. Keys live for one session and never touch disk.
//! - **instrument** — Card / ACH / cash entry state with synchronous
//!   per-mutation validation. Invalid data cannot leave the device.
//! - **transport** — One WebSocket at a time: connect, send, read loop,
//!   status. No retries, no queues, no opinions.
//! - **protocol** — The state machine that sequences the handshake and
//!   payment flows and correlates answers over a wire with no message ids.
//! - **coordinator** — The facade: `transact`, `tokenize_payment_method`,
//!   `cancel`, `reset_session`, and the fee-preview side channel.
//! - **config** — Every wire constant in one place, because the server is
//!   not ours to argue with.
//!
//! ## Design Philosophy
//!
//! 1. Readiness is a triple (host token, session key, peer key), checked
//!    atomically. Half a session is no session.
//! 2. One operation in flight, by rejection rather than queueing — a
//!    payment SDK that silently replays buffered charges is a lawsuit.
//! 3. A declined payment is a *delivered* outcome, not an error. The
//!    error type is for things that went wrong, not things that went
//!    unprofitably.
//! 4. If it touches money, it has tests. Plural.
//!
//! ## Quick Start
//!
//! ```no_run
//! use luma_sdk::{SessionCoordinator, TransactRequest};
//!
//! # async fn run() -> Result<(), luma_sdk::SdkError> {
//! let coordinator = SessionCoordinator::new("partner-sandbox-9f8e7d6c")?;
//!
//! {
//!     let handle = coordinator.card();
//!     let mut card = handle.lock();
//!     card.set_number("4242 4242 4242 4242");
//!     card.set_expiration("12/2030");
//!     card.set_security_code("123");
//!     card.set_postal_code("94107");
//!     card.set_visible(true);
//! }
//!
//! let outcome = coordinator.transact(TransactRequest::new(1_000)).await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod instrument;
pub mod protocol;
pub mod transport;

pub use coordinator::{
    AttestationProvider, HttpTokenSource, NoAttestation, SessionCoordinator, TokenGrant,
    TokenSource, TransactRequest,
};
pub use credentials::Credentials;
pub use error::SdkError;
pub use instrument::{AccountType, BankAccountState, CardState, CashState, InstrumentKind};
pub use protocol::{
    CashBarcode, FailedTransaction, FeeMode, Payor, ProtocolState, SuccessfulTransaction,
    TokenizeResult, TokenizedInstrument, TransactResult,
};
pub use transport::ConnectionStatus;
