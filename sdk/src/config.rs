//! # Protocol Configuration & Constants
//!
//! Every magic string in the Luma wire protocol lives here. The server is
//! not ours to change, so these values are load-bearing: rename an action
//! string and the socket on the other end will politely ignore you forever.
//!
//! Anything that is a *policy* rather than a wire fact (timeouts, field
//! caps) is also here so the whole crate argues about one copy of it.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Outbound Actions
// ---------------------------------------------------------------------------

/// Bootstrap handshake. The only action sent before a peer key exists,
/// so its body travels as plaintext base64 rather than ciphertext.
pub const ACTION_HOST_TOKEN: &str = "host:hostToken";

/// First leg of a two-phase transfer. May be answered by a confirmation
/// (two-phase servers) or directly by a completion (one-phase servers).
pub const ACTION_TRANSFER_PART1: &str = "host:transfer_part1";

/// Second leg of a two-phase transfer, carrying the idempotency token
/// issued in the confirmation.
pub const ACTION_TRANSFER_PART2: &str = "host:transfer_part2";

/// Convert a validated instrument into a reusable payment-method reference
/// without charging it.
pub const ACTION_TOKENIZE: &str = "host:tokenize";

/// Cash flow: request a retail barcode for the payor.
pub const ACTION_BARCODE: &str = "host:barcode";

/// Fee-preview side channel. Non-terminal, independent of the primary flow.
pub const ACTION_CALCULATE_FEE: &str = "host:calculate_fee";

/// Abort a transfer for which an idempotency token has been issued.
pub const ACTION_CANCEL_TRANSFER: &str = "host:cancel_transfer";

// ---------------------------------------------------------------------------
// Inbound Message Types
// ---------------------------------------------------------------------------

pub const TYPE_HOST_TOKEN: &str = "host_token";
pub const TYPE_TRANSFER_CONFIRMATION: &str = "transfer_confirmation";
pub const TYPE_TRANSFER_COMPLETE: &str = "transfer_complete";
pub const TYPE_BARCODE_COMPLETE: &str = "barcode_complete";
pub const TYPE_TOKENIZE_COMPLETE: &str = "tokenize_complete";
pub const TYPE_CALCULATE_FEE_COMPLETE: &str = "calculate_fee_complete";
pub const TYPE_ERROR: &str = "error";

/// Inbound types whose `body` is ciphertext and must be opened against the
/// accompanying `public_key` before it can be parsed as JSON. Everything
/// else carries plaintext JSON in `body`.
pub const ENCRYPTED_TYPES: &[&str] = &[
    TYPE_TRANSFER_CONFIRMATION,
    TYPE_TRANSFER_COMPLETE,
    TYPE_BARCODE_COMPLETE,
    TYPE_TOKENIZE_COMPLETE,
];

/// Returns `true` if the given inbound type carries an encrypted body.
pub fn is_encrypted_type(kind: &str) -> bool {
    ENCRYPTED_TYPES.contains(&kind)
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Hard deadline on every awaited socket response. The source protocol has
/// no deadline at all, which means a silent server wedges the single-flight
/// guard until the heat death of the universe. 30 seconds is long enough
/// for a card network round trip and short enough that a human is still
/// looking at the screen when the error arrives.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the bootstrap token fetch over HTTPS.
pub const TOKEN_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for establishing the WebSocket connection itself.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Field Caps
// ---------------------------------------------------------------------------

/// Maximum PAN length in digits. ISO/IEC 7812 says 19; nobody has seen a
/// 20-digit card and lived to tell about it.
pub const MAX_CARD_DIGITS: usize = 19;

/// Minimum PAN length for a Luhn check to even be worth running.
pub const MIN_CARD_DIGITS: usize = 13;

/// Security codes are 3 digits, or 4 if American Express is involved.
pub const MAX_SECURITY_CODE_DIGITS: usize = 4;
pub const MIN_SECURITY_CODE_DIGITS: usize = 3;

/// ABA routing numbers are exactly 9 digits. Always. No exceptions.
pub const ROUTING_NUMBER_DIGITS: usize = 9;

/// Bank account numbers: length must be strictly between these bounds,
/// i.e. 4..=17 digits inclusive.
pub const ACCOUNT_NUMBER_MIN_EXCLUSIVE: usize = 3;
pub const ACCOUNT_NUMBER_MAX_EXCLUSIVE: usize = 18;

// ---------------------------------------------------------------------------
// Wire Identity
// ---------------------------------------------------------------------------

/// Origin tag included in the host-token handshake so the server knows
/// which integration surface is talking to it.
pub const ORIGIN: &str = "native";

/// SDK version string reported in handshakes.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Domain the production endpoints hang off. Overridable at the
/// coordinator level for sandbox and test targets.
pub const API_DOMAIN: &str = "lumapay.io";

/// BLAKE3 `derive_key` context for session message keys. Changing this
/// string is a protocol break with every deployed server.
pub const KDF_CONTEXT: &str = "luma-sdk v1 session message key";

// ---------------------------------------------------------------------------
// Endpoint Assembly
// ---------------------------------------------------------------------------

/// URL of the bootstrap token service for a partner/stage pair.
///
/// Shape: `https://{partner}.{stage}.{domain}/pt-token-service/`
pub fn token_service_url(partner: &str, stage: &str) -> String {
    format!("https://{partner}.{stage}.{API_DOMAIN}/pt-token-service/")
}

/// URL of the secure WebSocket endpoint for a partner/stage pair, with the
/// freshly fetched token bound into the query string.
///
/// Shape: `wss://{partner}.secure.socket.{stage}.{domain}/{partner}/?pt_token={token}`
pub fn socket_url(partner: &str, stage: &str, pt_token: &str) -> String {
    format!("wss://{partner}.secure.socket.{stage}.{API_DOMAIN}/{partner}/?pt_token={pt_token}")
}
