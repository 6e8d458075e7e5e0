//! # Session Cryptography
//!
//! One concern: turning protocol message bodies into authenticated
//! ciphertext and back, against a peer key negotiated during the host-token
//! handshake.
//!
//! The construction is ephemeral X25519 Diffie-Hellman (one static pair per
//! session lifetime, regenerated on every reset — never persisted) feeding
//! a BLAKE3 `derive_key` KDF, with AES-256-GCM doing the actual sealing.
//! The raw DH output is never used as a key directly: curve points have
//! algebraic structure, and AES-GCM wants uniform randomness, so the KDF
//! sits in between.
//!
//! This module holds no network or UI state. It does not know what a
//! payment is. That is the point.

mod session;

pub use session::{CryptoError, CryptoSession};
