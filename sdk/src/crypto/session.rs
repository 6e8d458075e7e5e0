//! Sealing and opening of protocol message bodies.
//!
//! ## Wire framing
//!
//! Sealed bodies are framed as `base64(nonce || ciphertext)`, and the bytes
//! *inside* the ciphertext are themselves `base64(utf8-json)`. The double
//! base64 looks redundant and is: it exists because the deployed server
//! speaks exactly this framing, and changing it breaks interoperability.
//! Preserve it.
//!
//! ## Failure policy
//!
//! Like the rest of the crypto in this codebase, failures are vague on
//! purpose. "Wrong key" vs "corrupted ciphertext" is nobody's business but
//! ours, and definitely not an attacker's.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::config;

/// AES-256-GCM nonce length. 96 bits, the standard, the only one to use.
const NONCE_LENGTH: usize = 12;

/// Errors from sealing/opening message bodies.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// `seal` was called before the handshake delivered a peer key.
    /// The caller must guarantee the handshake completed first.
    #[error("no peer public key negotiated yet")]
    NoPeerKey,

    /// A public key failed to decode into 32 bytes.
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    /// Encryption failed.
    #[error("sealing failed")]
    SealFailed,

    /// Authentication or decryption failed, or the inner framing was not
    /// the expected base64-of-JSON.
    #[error("opening failed -- wrong key, corrupted envelope, or bad framing")]
    OpenFailed,
}

/// Owns the session key pair and performs authenticated encryption of
/// message payloads against the negotiated peer public key.
///
/// ## Lifecycle
///
/// A `CryptoSession` is created with a fresh X25519 static pair — key
/// generation cannot fail short of a broken OS RNG, which is a
/// configuration catastrophe, not a recoverable error. The peer key is
/// absent until the host-token handshake commits it, and the whole session
/// is dropped and regenerated on reset. Keys never touch disk.
pub struct CryptoSession {
    secret: StaticSecret,
    public: PublicKey,
    peer: Option<PublicKey>,
}

impl CryptoSession {
    /// Generate a fresh session key pair.
    pub fn new() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            secret,
            public,
            peer: None,
        }
    }

    /// Our public key, base64-encoded for the wire.
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.public.to_bytes())
    }

    /// Commit the server's public key received during the handshake.
    pub fn set_peer_public_key(&mut self, peer_b64: &str) -> Result<(), CryptoError> {
        self.peer = Some(decode_public_key(peer_b64)?);
        Ok(())
    }

    /// Drop the peer key (reset / disconnect). Sealing fails until a new
    /// handshake commits a replacement.
    pub fn clear_peer(&mut self) {
        self.peer = None;
    }

    /// Whether a peer key has been negotiated.
    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Seal a JSON body for the negotiated peer.
    ///
    /// Produces `base64(nonce || ciphertext)` where the plaintext under the
    /// AEAD is `base64(plaintext_json)` — see the module docs on framing.
    ///
    /// # Errors
    ///
    /// [`CryptoError::NoPeerKey`] if the handshake has not completed;
    /// [`CryptoError::SealFailed`] on cipher failure.
    pub fn seal(&self, plaintext_json: &str) -> Result<String, CryptoError> {
        let peer = self.peer.as_ref().ok_or(CryptoError::NoPeerKey)?;
        let key = self.message_key(peer);
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::SealFailed)?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let inner = BASE64.encode(plaintext_json.as_bytes());
        let ciphertext = cipher
            .encrypt(nonce, inner.as_bytes())
            .map_err(|_| CryptoError::SealFailed)?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Open a sealed body against the sender key named in the message.
    ///
    /// The sender key comes from the inbound message's `public_key` field,
    /// not from stored state — the message tells us which key to
    /// authenticate against, and the AEAD tag tells us whether to believe it.
    ///
    /// Returns the recovered plaintext JSON string.
    pub fn open(
        &self,
        envelope_b64: &str,
        sender_public_b64: &str,
    ) -> Result<String, CryptoError> {
        let sender = decode_public_key(sender_public_b64)?;
        let data = BASE64
            .decode(envelope_b64.as_bytes())
            .map_err(|_| CryptoError::OpenFailed)?;
        if data.len() < NONCE_LENGTH {
            return Err(CryptoError::OpenFailed);
        }

        let key = self.message_key(&sender);
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::OpenFailed)?;
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LENGTH);
        let inner = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::OpenFailed)?;

        // Inner framing: the decrypted bytes are base64 of the UTF-8 JSON.
        let plaintext = BASE64
            .decode(&inner)
            .map_err(|_| CryptoError::OpenFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::OpenFailed)
    }

    /// Derive the AES-256 message key for a given counterparty.
    ///
    /// DH output runs through BLAKE3's `derive_key` mode with both public
    /// keys in canonical (sorted) order, so client and server derive the
    /// same key regardless of which side is "ours".
    fn message_key(&self, counterparty: &PublicKey) -> [u8; 32] {
        let shared = self.secret.diffie_hellman(counterparty);

        let mut hasher = blake3::Hasher::new_derive_key(config::KDF_CONTEXT);
        hasher.update(shared.as_bytes());

        let ours = self.public.to_bytes();
        let theirs = counterparty.to_bytes();
        let (first, second) = if ours <= theirs {
            (ours, theirs)
        } else {
            (theirs, ours)
        };
        hasher.update(&first);
        hasher.update(&second);

        let mut key = [0u8; 32];
        hasher.finalize_xof().fill(&mut key);
        key
    }
}

impl Default for CryptoSession {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_public_key(b64: &str) -> Result<PublicKey, CryptoError> {
    let bytes = BASE64
        .decode(b64.as_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(PublicKey::from(arr))
}
