//! Wire message shapes.
//!
//! Field names here are server-compatible facts, not style choices: the
//! envelope speaks camelCase (`sessionKey`, `publicKey`), inbound messages
//! speak snake_case (`public_key`), and both stay exactly as the deployed
//! service expects them. Bodies are serialized to JSON *first*, then
//! either base64'd (the bootstrap handshake, which has no peer key yet) or
//! sealed (everything after).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::instrument::{BankDetails, CardDetails, CashDetails};

/// Business-outcome sentinel in completion bodies. A response can be
/// delivered perfectly and still carry bad news.
pub const BUSINESS_FAILURE_STATE: &str = "FAILURE";

/// Client timestamp for `timing` fields, milliseconds since epoch.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Outbound message envelope.
///
/// `encoded` is base64 plaintext for the host-token bootstrap and
/// ciphertext for every other action — exactly one of the two framings,
/// selected by the action. `sessionKey` is absent only on the bootstrap.
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope {
    pub action: &'static str,
    pub encoded: String,
    #[serde(rename = "sessionKey", skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

impl OutboundEnvelope {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound message envelope.
///
/// `body` must be opened before parsing whenever `type` is in the
/// encrypted set (see [`crate::config::is_encrypted_type`]); `public_key`
/// names the sender key to authenticate against.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub error: Option<Vec<String>>,
}

impl InboundMessage {
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Joined error strings, when the server attached any.
    pub fn error_text(&self) -> Option<String> {
        self.error
            .as_ref()
            .filter(|errs| !errs.is_empty())
            .map(|errs| errs.join("; "))
    }
}

// ---------------------------------------------------------------------------
// Shared Body Vocabulary
// ---------------------------------------------------------------------------

/// Who absorbs the service fee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    /// The merchant eats the fee; the payor sees the sticker price.
    MerchantFee,
    /// The fee is passed through to the payor on top of the amount.
    ServiceFee,
}

/// Optional payor identity attached to transfer and tokenize bodies.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Payor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// The instrument payload selected for an operation, tagged for the wire.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethodPayload {
    Card(CardDetails),
    BankAccount(BankDetails),
    Cash(CashDetails),
}

impl PaymentMethodPayload {
    pub fn kind(&self) -> crate::instrument::InstrumentKind {
        match self {
            PaymentMethodPayload::Card(_) => crate::instrument::InstrumentKind::Card,
            PaymentMethodPayload::BankAccount(_) => crate::instrument::InstrumentKind::BankAccount,
            PaymentMethodPayload::Cash(_) => crate::instrument::InstrumentKind::Cash,
        }
    }

    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethodPayload::Cash(_))
    }
}

// ---------------------------------------------------------------------------
// Outbound Bodies
// ---------------------------------------------------------------------------

/// Body of `host:hostToken`. Plaintext-base64 on the wire — there is no
/// peer key to seal against yet.
#[derive(Debug, Serialize)]
pub struct HostTokenRequestBody {
    #[serde(rename = "ptToken")]
    pub pt_token: String,
    pub origin: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<String>,
    pub timing: i64,
    #[serde(rename = "sdkVersion")]
    pub sdk_version: &'static str,
}

/// Body of `host:transfer_part1`.
#[derive(Debug, Serialize)]
pub struct TransferPart1Body {
    pub payment_method: PaymentMethodPayload,
    pub amount: u64,
    pub fee_mode: FeeMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payor: Option<Payor>,
    pub timing: i64,
}

/// Body of `host:transfer_part2` — the continuation that redeems the
/// idempotency token issued in the confirmation.
#[derive(Debug, Serialize)]
pub struct TransferPart2Body {
    pub idempotency: String,
    pub timing: i64,
}

/// Body of `host:tokenize`.
#[derive(Debug, Serialize)]
pub struct TokenizeBody {
    pub payment_method: PaymentMethodPayload,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payor: Option<Payor>,
    pub timing: i64,
}

/// Body of `host:barcode` (cash flow).
#[derive(Debug, Serialize)]
pub struct BarcodeRequestBody {
    pub payment_method: PaymentMethodPayload,
    pub amount: u64,
    pub fee_mode: FeeMode,
    pub metadata: Value,
    pub timing: i64,
}

/// Body of `host:calculate_fee` — the non-terminal preview exchange.
#[derive(Debug, Serialize)]
pub struct CalculateFeeBody {
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_six: Option<String>,
    pub timing: i64,
}

/// Body of `host:cancel_transfer`.
#[derive(Debug, Serialize)]
pub struct CancelBody {
    pub idempotency: String,
    pub timing: i64,
}

// ---------------------------------------------------------------------------
// Inbound Bodies
// ---------------------------------------------------------------------------

/// Body of `host_token` (plaintext JSON). The three session fields arrive
/// together and are committed together — there is no partial session.
#[derive(Debug, Clone, Deserialize)]
pub struct HostTokenResponseBody {
    #[serde(rename = "hostToken")]
    pub host_token: String,
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// Body of `transfer_confirmation` (sealed).
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfirmationBody {
    pub idempotency: String,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub fee: Option<u64>,
}

/// Body of `transfer_complete` and `tokenize_complete` (sealed).
///
/// `state == "FAILURE"` is a delivered business failure, not a transport
/// problem; the failure fields carry the details in that case.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionBody {
    pub state: String,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub service_fee: Option<u64>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub last_four: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub failure_text: Option<String>,
}

impl CompletionBody {
    pub fn is_business_failure(&self) -> bool {
        self.state == BUSINESS_FAILURE_STATE
    }
}

/// Body of `barcode_complete` (sealed). Shares the state sentinel with the
/// other completions; carries the barcode on success.
#[derive(Debug, Clone, Deserialize)]
pub struct BarcodeCompleteBody {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub barcode_url: Option<String>,
    #[serde(default)]
    pub barcode_uid: Option<String>,
    #[serde(default)]
    pub expiration: Option<String>,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub failure_text: Option<String>,
}

/// Body of `calculate_fee_complete` (plaintext JSON).
#[derive(Debug, Clone, Deserialize)]
pub struct CalculateFeeCompleteBody {
    pub fee: u64,
    #[serde(default)]
    pub total: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_camel_case_on_the_wire() {
        let envelope = OutboundEnvelope {
            action: crate::config::ACTION_TRANSFER_PART1,
            encoded: "abc".into(),
            session_key: Some("sk".into()),
            public_key: "pk".into(),
        };
        let frame = envelope.to_frame().unwrap();
        assert!(frame.contains(r#""action":"host:transfer_part1""#));
        assert!(frame.contains(r#""sessionKey":"sk""#));
        assert!(frame.contains(r#""publicKey":"pk""#));
        assert!(!frame.contains("session_key"));
    }

    #[test]
    fn bootstrap_envelope_omits_session_key() {
        let envelope = OutboundEnvelope {
            action: crate::config::ACTION_HOST_TOKEN,
            encoded: "abc".into(),
            session_key: None,
            public_key: "pk".into(),
        };
        let frame = envelope.to_frame().unwrap();
        assert!(!frame.contains("sessionKey"));
    }

    #[test]
    fn inbound_parses_minimal_and_full_shapes() {
        let minimal = InboundMessage::parse(r#"{"type":"host_token","body":"{}"}"#).unwrap();
        assert_eq!(minimal.kind, "host_token");
        assert!(minimal.public_key.is_none());
        assert!(minimal.error_text().is_none());

        let full = InboundMessage::parse(
            r#"{"type":"error","body":"","public_key":"pk","error":["bad token","expired"]}"#,
        )
        .unwrap();
        assert_eq!(full.error_text().as_deref(), Some("bad token; expired"));
    }

    #[test]
    fn payment_method_is_type_tagged() {
        let payload = PaymentMethodPayload::Card(CardDetails {
            number: "4242424242424242".into(),
            expiration_month: "12".into(),
            expiration_year: "2099".into(),
            security_code: "123".into(),
            postal_code: "94107".into(),
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""type":"card""#));
        assert!(json.contains(r#""number":"4242424242424242""#));
    }

    #[test]
    fn completion_failure_sentinel() {
        let body: CompletionBody = serde_json::from_str(
            r#"{"state":"FAILURE","failure_code":"51","failure_text":"insufficient funds"}"#,
        )
        .unwrap();
        assert!(body.is_business_failure());
        assert_eq!(body.failure_code.as_deref(), Some("51"));

        let ok: CompletionBody =
            serde_json::from_str(r#"{"state":"SUCCEEDED","amount":1000}"#).unwrap();
        assert!(!ok.is_business_failure());
    }

    #[test]
    fn host_token_body_round_trips_camel_case() {
        let body: HostTokenResponseBody = serde_json::from_str(
            r#"{"hostToken":"ht","sessionKey":"sk","publicKey":"pk"}"#,
        )
        .unwrap();
        assert_eq!(body.host_token, "ht");
        assert_eq!(body.session_key, "sk");
        assert_eq!(body.public_key, "pk");
    }
}
