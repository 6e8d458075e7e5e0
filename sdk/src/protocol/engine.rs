//! The transaction protocol state machine.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config;
use crate::crypto::CryptoSession;
use crate::error::SdkError;
use crate::transport::MessagePort;

use super::correlate::{
    ExpectationQueue, FAMILY_BARCODE, FAMILY_FEE, FAMILY_HOST_TOKEN, FAMILY_TOKENIZE,
    FAMILY_TRANSFER, FAMILY_TRANSFER_COMPLETION,
};
use super::messages::{
    now_millis, BarcodeCompleteBody, BarcodeRequestBody, CalculateFeeBody,
    CalculateFeeCompleteBody, CancelBody, CompletionBody, FeeMode, HostTokenRequestBody,
    HostTokenResponseBody, InboundMessage, OutboundEnvelope, Payor, PaymentMethodPayload,
    TokenizeBody, TransferConfirmationBody, TransferPart1Body, TransferPart2Body,
    BUSINESS_FAILURE_STATE,
};
use super::outcome::{
    CashBarcode, FailedTransaction, SuccessfulTransaction, TokenizeResult, TokenizedInstrument,
    TransactResult,
};

// ---------------------------------------------------------------------------
// Session Context
// ---------------------------------------------------------------------------

/// The negotiated session triple plus bookkeeping.
///
/// These three fields arrive in one handshake response and die together:
/// there is no such thing as "has a host token but no peer key". Readiness
/// checks look at this struct's presence, never at an individual field.
#[derive(Clone, Debug)]
pub struct ActiveSession {
    pub host_token: String,
    pub session_key: String,
    pub peer_public_key: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Protocol State
// ---------------------------------------------------------------------------

/// Where the engine is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolState {
    /// Nothing negotiated, nothing in flight.
    Idle,
    /// Host-token handshake sent, answer pending.
    AwaitingHostToken,
    /// Session established; a primary operation may start.
    Ready,
    /// A primary operation is in flight.
    AwaitingResponse,
    /// Terminal: a transaction outcome (success *or* business failure) was
    /// delivered. Only a reset leaves this state.
    Completed,
    /// Terminal-ish: the last exchange failed; the session, if any, was
    /// torn down. A fresh handshake recovers.
    Failed,
}

struct EngineInner {
    crypto: CryptoSession,
    session: Option<ActiveSession>,
    state: ProtocolState,
    expectations: ExpectationQueue,
    idempotency: Option<String>,
    session_id: String,
}

impl EngineInner {
    /// Build a sealed, enveloped frame for a post-handshake action.
    fn sealed_frame(&self, action: &'static str, body_json: &str) -> Result<String, SdkError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| SdkError::Protocol("no active session".into()))?;
        let encoded = self.crypto.seal(body_json)?;
        let envelope = OutboundEnvelope {
            action,
            encoded,
            session_key: Some(session.session_key.clone()),
            public_key: self.crypto.public_key_base64(),
        };
        Ok(envelope.to_frame()?)
    }

    /// Gate for starting a primary operation.
    fn ensure_ready(&self) -> Result<(), SdkError> {
        match self.state {
            ProtocolState::Ready => {
                if self.session.is_some() && self.crypto.has_peer() {
                    Ok(())
                } else {
                    Err(SdkError::Protocol("no active session".into()))
                }
            }
            ProtocolState::Completed => Err(SdkError::AlreadyComplete),
            ProtocolState::AwaitingHostToken | ProtocolState::AwaitingResponse => {
                Err(SdkError::InFlight)
            }
            ProtocolState::Idle | ProtocolState::Failed => {
                Err(SdkError::Protocol("no active session".into()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Sequences outbound actions, correlates inbound answers, and tracks the
/// session lifecycle. One instance per logical session; all mutation goes
/// through short critical sections — no lock is ever held across an await.
pub struct TransactionProtocol {
    inner: Mutex<EngineInner>,
    port: Arc<dyn MessagePort>,
    response_timeout: Duration,
    fee_tx: watch::Sender<Option<u64>>,
}

impl TransactionProtocol {
    pub fn new(port: Arc<dyn MessagePort>) -> Self {
        Self::with_timeout(port, config::RESPONSE_TIMEOUT)
    }

    /// Custom response deadline (tests mostly).
    pub fn with_timeout(port: Arc<dyn MessagePort>, response_timeout: Duration) -> Self {
        let (fee_tx, _) = watch::channel(None);
        Self {
            inner: Mutex::new(EngineInner {
                crypto: CryptoSession::new(),
                session: None,
                state: ProtocolState::Idle,
                expectations: ExpectationQueue::new(),
                idempotency: None,
                session_id: Uuid::new_v4().to_string(),
            }),
            port,
            response_timeout,
            fee_tx,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.inner.lock().state
    }

    /// The atomic readiness check: true only when the whole session triple
    /// is committed.
    pub fn has_session(&self) -> bool {
        let inner = self.inner.lock();
        inner.session.is_some() && inner.crypto.has_peer()
    }

    pub fn session(&self) -> Option<ActiveSession> {
        self.inner.lock().session.clone()
    }

    /// Local logical session id; regenerated on every reset.
    pub fn session_id(&self) -> String {
        self.inner.lock().session_id.clone()
    }

    /// The server-issued idempotency token, once a confirmation delivered
    /// one. Gates whether `cancel_transfer` has anything to cancel.
    pub fn idempotency_token(&self) -> Option<String> {
        self.inner.lock().idempotency.clone()
    }

    /// Latest service-fee preview from the calculate-fee side channel.
    pub fn subscribe_service_fee(&self) -> watch::Receiver<Option<u64>> {
        self.fee_tx.subscribe()
    }

    // -- handshake ---------------------------------------------------------

    /// Perform the host-token handshake and commit the session triple.
    ///
    /// No-op when a session is already active. The request body travels as
    /// plaintext base64 — there is no peer key to seal against yet.
    pub async fn establish_session(
        &self,
        pt_token: &str,
        attestation: Option<String>,
    ) -> Result<(), SdkError> {
        let (frame, id, rx) = {
            let mut inner = self.inner.lock();
            if inner.session.is_some() && inner.crypto.has_peer() {
                return Ok(());
            }
            match inner.state {
                ProtocolState::Completed => return Err(SdkError::AlreadyComplete),
                ProtocolState::AwaitingHostToken | ProtocolState::AwaitingResponse => {
                    return Err(SdkError::InFlight)
                }
                ProtocolState::Idle | ProtocolState::Ready | ProtocolState::Failed => {}
            }

            let body = HostTokenRequestBody {
                pt_token: pt_token.to_string(),
                origin: config::ORIGIN,
                attestation,
                timing: now_millis(),
                sdk_version: config::SDK_VERSION,
            };
            let envelope = OutboundEnvelope {
                action: config::ACTION_HOST_TOKEN,
                encoded: BASE64.encode(serde_json::to_string(&body)?.as_bytes()),
                session_key: None,
                public_key: inner.crypto.public_key_base64(),
            };
            let frame = envelope.to_frame()?;
            inner.state = ProtocolState::AwaitingHostToken;
            let (id, rx) = inner.expectations.register(FAMILY_HOST_TOKEN);
            (frame, id, rx)
        };

        if let Err(e) = self.port.send(frame).await {
            self.fail_pending(id);
            return Err(e);
        }
        let msg = self.await_response(id, rx).await?;

        if msg.kind == config::TYPE_ERROR {
            self.mark_failed(true);
            return Err(SdkError::Protocol(
                msg.error_text()
                    .unwrap_or_else(|| "host token rejected".into()),
            ));
        }

        let body: HostTokenResponseBody = match serde_json::from_str(&msg.body) {
            Ok(body) => body,
            Err(e) => {
                self.mark_failed(true);
                return Err(e.into());
            }
        };

        {
            let mut inner = self.inner.lock();
            if let Err(e) = inner.crypto.set_peer_public_key(&body.public_key) {
                inner.state = ProtocolState::Failed;
                return Err(e.into());
            }
            // The triple commits in one step; see ActiveSession.
            inner.session = Some(ActiveSession {
                host_token: body.host_token,
                session_key: body.session_key,
                peer_public_key: body.public_key,
                created_at: Utc::now(),
            });
            inner.state = ProtocolState::Ready;
        }
        info!("payment session established");
        Ok(())
    }

    // -- primary operations ------------------------------------------------

    /// Run a card/ACH transfer to its terminal outcome.
    ///
    /// Sends `transfer_part1`; a two-phase server answers with a
    /// confirmation carrying the idempotency token, and the engine
    /// continues with `transfer_part2` before awaiting the completion.
    pub async fn transfer(
        &self,
        payment_method: PaymentMethodPayload,
        amount: u64,
        fee_mode: FeeMode,
        fee: Option<u64>,
        metadata: Value,
        payor: Option<Payor>,
    ) -> Result<TransactResult, SdkError> {
        let (frame, id, rx) = {
            let mut inner = self.inner.lock();
            inner.ensure_ready()?;
            let body = TransferPart1Body {
                payment_method,
                amount,
                fee_mode,
                fee,
                metadata,
                payor,
                timing: now_millis(),
            };
            let frame =
                inner.sealed_frame(config::ACTION_TRANSFER_PART1, &serde_json::to_string(&body)?)?;
            inner.state = ProtocolState::AwaitingResponse;
            let (id, rx) = inner.expectations.register(FAMILY_TRANSFER);
            (frame, id, rx)
        };

        if let Err(e) = self.port.send(frame).await {
            self.fail_pending(id);
            return Err(e);
        }
        let mut msg = self.await_response(id, rx).await?;

        if msg.kind == config::TYPE_TRANSFER_CONFIRMATION {
            let confirmation: TransferConfirmationBody = self.parse_body(&msg)?;
            debug!(idempotency = %confirmation.idempotency, "transfer confirmed, sending part 2");

            let (frame2, id2, rx2) = {
                let mut inner = self.inner.lock();
                inner.idempotency = Some(confirmation.idempotency.clone());
                let body = TransferPart2Body {
                    idempotency: confirmation.idempotency,
                    timing: now_millis(),
                };
                let frame = inner
                    .sealed_frame(config::ACTION_TRANSFER_PART2, &serde_json::to_string(&body)?)?;
                let (id, rx) = inner.expectations.register(FAMILY_TRANSFER_COMPLETION);
                (frame, id, rx)
            };
            if let Err(e) = self.port.send(frame2).await {
                self.fail_pending(id2);
                return Err(e);
            }
            msg = self.await_response(id2, rx2).await?;
        }

        if msg.kind == config::TYPE_ERROR {
            self.mark_failed(true);
            return Err(SdkError::Protocol(
                msg.error_text().unwrap_or_else(|| "transfer rejected".into()),
            ));
        }

        let completion: CompletionBody = self.parse_body(&msg)?;
        let result = if completion.is_business_failure() {
            TransactResult::Failure(FailedTransaction {
                failure_code: completion.failure_code,
                failure_text: completion.failure_text,
                transaction_id: completion.transaction_id,
            })
        } else {
            TransactResult::Success(SuccessfulTransaction {
                transaction_id: completion.transaction_id,
                amount: completion.amount,
                service_fee: completion.service_fee,
                last_four: completion.last_four,
                brand: completion.brand,
                created_at: completion.created_at,
            })
        };
        self.mark_completed();
        Ok(result)
    }

    /// Run the cash flow to a barcode.
    pub async fn barcode(
        &self,
        payment_method: PaymentMethodPayload,
        amount: u64,
        fee_mode: FeeMode,
        metadata: Value,
    ) -> Result<TransactResult, SdkError> {
        let (frame, id, rx) = {
            let mut inner = self.inner.lock();
            inner.ensure_ready()?;
            let body = BarcodeRequestBody {
                payment_method,
                amount,
                fee_mode,
                metadata,
                timing: now_millis(),
            };
            let frame =
                inner.sealed_frame(config::ACTION_BARCODE, &serde_json::to_string(&body)?)?;
            inner.state = ProtocolState::AwaitingResponse;
            let (id, rx) = inner.expectations.register(FAMILY_BARCODE);
            (frame, id, rx)
        };

        if let Err(e) = self.port.send(frame).await {
            self.fail_pending(id);
            return Err(e);
        }
        let msg = self.await_response(id, rx).await?;

        if msg.kind == config::TYPE_ERROR {
            self.mark_failed(true);
            return Err(SdkError::Protocol(
                msg.error_text().unwrap_or_else(|| "barcode rejected".into()),
            ));
        }

        let body: BarcodeCompleteBody = self.parse_body(&msg)?;
        let result = if body.state.as_deref() == Some(BUSINESS_FAILURE_STATE) {
            TransactResult::Failure(FailedTransaction {
                failure_code: body.failure_code,
                failure_text: body.failure_text,
                transaction_id: None,
            })
        } else {
            let barcode_url = match body.barcode_url {
                Some(url) => url,
                None => {
                    self.mark_failed(true);
                    return Err(SdkError::Protocol(
                        "barcode_complete carried no barcode".into(),
                    ));
                }
            };
            TransactResult::Barcode(CashBarcode {
                barcode_url,
                barcode_uid: body.barcode_uid,
                expiration: body.expiration,
            })
        };
        self.mark_completed();
        Ok(result)
    }

    /// Tokenize the instrument without charging it.
    pub async fn tokenize(
        &self,
        payment_method: PaymentMethodPayload,
        metadata: Value,
        payor: Option<Payor>,
    ) -> Result<TokenizeResult, SdkError> {
        let (frame, id, rx) = {
            let mut inner = self.inner.lock();
            inner.ensure_ready()?;
            let body = TokenizeBody {
                payment_method,
                metadata,
                payor,
                timing: now_millis(),
            };
            let frame =
                inner.sealed_frame(config::ACTION_TOKENIZE, &serde_json::to_string(&body)?)?;
            inner.state = ProtocolState::AwaitingResponse;
            let (id, rx) = inner.expectations.register(FAMILY_TOKENIZE);
            (frame, id, rx)
        };

        if let Err(e) = self.port.send(frame).await {
            self.fail_pending(id);
            return Err(e);
        }
        let msg = self.await_response(id, rx).await?;

        if msg.kind == config::TYPE_ERROR {
            self.mark_failed(true);
            return Err(SdkError::Protocol(
                msg.error_text().unwrap_or_else(|| "tokenize rejected".into()),
            ));
        }

        let completion: CompletionBody = self.parse_body(&msg)?;
        let result = if completion.is_business_failure() {
            TokenizeResult::Failure(FailedTransaction {
                failure_code: completion.failure_code,
                failure_text: completion.failure_text,
                transaction_id: completion.transaction_id,
            })
        } else {
            TokenizeResult::Success(TokenizedInstrument {
                payment_method_id: completion.payment_method_id,
                last_four: completion.last_four,
                brand: completion.brand,
            })
        };
        self.mark_completed();
        Ok(result)
    }

    // -- side channel ------------------------------------------------------

    /// Preview the service fee for an amount. Non-terminal: runs alongside
    /// the primary flow without touching its state, and publishes the
    /// result on the fee watch channel.
    pub async fn calculate_fee(
        &self,
        amount: u64,
        first_six: Option<String>,
    ) -> Result<u64, SdkError> {
        let (frame, id, rx) = {
            let mut inner = self.inner.lock();
            if inner.session.is_none() {
                return Err(SdkError::Protocol("no active session".into()));
            }
            let body = CalculateFeeBody {
                amount,
                first_six,
                timing: now_millis(),
            };
            let frame =
                inner.sealed_frame(config::ACTION_CALCULATE_FEE, &serde_json::to_string(&body)?)?;
            let (id, rx) = inner.expectations.register(FAMILY_FEE);
            (frame, id, rx)
        };

        if let Err(e) = self.port.send(frame).await {
            self.inner.lock().expectations.withdraw(id);
            return Err(e);
        }
        let msg = match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(_)) => {
                return Err(SdkError::Connection(
                    "connection closed while awaiting fee preview".into(),
                ))
            }
            Err(_) => {
                self.inner.lock().expectations.withdraw(id);
                return Err(SdkError::ResponseTimeout(self.response_timeout));
            }
        };

        if msg.kind == config::TYPE_ERROR {
            return Err(SdkError::Protocol(
                msg.error_text()
                    .unwrap_or_else(|| "fee preview rejected".into()),
            ));
        }
        let body: CalculateFeeCompleteBody = serde_json::from_str(&msg.body)?;
        self.fee_tx.send_replace(Some(body.fee));
        debug!(fee = body.fee, "service fee preview updated");
        Ok(body.fee)
    }

    // -- cancel / reset ----------------------------------------------------

    /// Best-effort cancel of the in-progress transfer. Only meaningful once
    /// an idempotency token exists; before that it is a no-op and returns
    /// `false`. Never fails — the caller resets regardless of the outcome.
    pub async fn cancel_transfer(&self) -> bool {
        let frame = {
            let inner = self.inner.lock();
            let Some(idempotency) = inner.idempotency.clone() else {
                return false;
            };
            let body = CancelBody {
                idempotency,
                timing: now_millis(),
            };
            let json = match serde_json::to_string(&body) {
                Ok(json) => json,
                Err(_) => return false,
            };
            match inner.sealed_frame(config::ACTION_CANCEL_TRANSFER, &json) {
                Ok(frame) => frame,
                Err(_) => return false,
            }
        };
        match self.port.send(frame).await {
            Ok(()) => {
                info!("cancel_transfer sent");
                true
            }
            Err(e) => {
                warn!(error = %e, "cancel_transfer send failed");
                false
            }
        }
    }

    /// Drop everything: expectations, the session triple, the key pair,
    /// the idempotency token. A fresh logical session id is generated and
    /// the state returns to `Idle`. Safe from any state, any time.
    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.expectations.fail_all();
            inner.crypto = CryptoSession::new();
            inner.session = None;
            inner.idempotency = None;
            inner.state = ProtocolState::Idle;
            inner.session_id = Uuid::new_v4().to_string();
        }
        self.fee_tx.send_replace(None);
        info!("protocol state reset");
    }

    /// Discard the session triple without a full reset. Used when a
    /// reconnect starts: the old host token is stale by definition, and a
    /// fresh handshake must run on the new connection. `Completed` is
    /// preserved so a finished transaction cannot be revived by
    /// reconnecting.
    pub fn invalidate_session(&self) {
        let mut inner = self.inner.lock();
        inner.expectations.fail_all();
        inner.session = None;
        inner.crypto.clear_peer();
        inner.idempotency = None;
        if inner.state != ProtocolState::Completed {
            inner.state = ProtocolState::Idle;
        }
    }

    /// The transport reported an involuntary close. Fails every
    /// outstanding waiter and invalidates the session triple.
    pub fn connection_lost(&self, reason: &str) {
        let mut inner = self.inner.lock();
        let had_waiters = !inner.expectations.is_empty();
        inner.expectations.fail_all();
        let had_session = inner.session.take().is_some();
        inner.crypto.clear_peer();
        if inner.state != ProtocolState::Completed {
            inner.state = if had_waiters {
                ProtocolState::Failed
            } else {
                ProtocolState::Idle
            };
        }
        if had_session || had_waiters {
            warn!(%reason, "connection lost; session invalidated");
        } else {
            debug!(%reason, "connection closed");
        }
    }

    // -- inbound dispatch --------------------------------------------------

    /// Dispatch one inbound frame: route to the oldest matching
    /// expectation, or fall through to default handling. Unknown types are
    /// logged and ignored — they are not a reason to kill a payment.
    pub fn handle_frame(&self, frame: &str) {
        let msg = match InboundMessage::parse(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "ignoring unparseable frame");
                return;
            }
        };
        debug!(kind = %msg.kind, "frame received");
        let unclaimed = self.inner.lock().expectations.route(msg);
        if let Some(msg) = unclaimed {
            self.handle_unsolicited(msg);
        }
    }

    fn handle_unsolicited(&self, msg: InboundMessage) {
        match msg.kind.as_str() {
            // The server may push fee previews (e.g. after the card BIN
            // becomes known). Apply them to the watch channel.
            config::TYPE_CALCULATE_FEE_COMPLETE => {
                match serde_json::from_str::<CalculateFeeCompleteBody>(&msg.body) {
                    Ok(body) => {
                        self.fee_tx.send_replace(Some(body.fee));
                        debug!(fee = body.fee, "unsolicited fee preview applied");
                    }
                    Err(e) => warn!(error = %e, "unsolicited fee preview unparseable"),
                }
            }
            config::TYPE_ERROR => {
                warn!(error = ?msg.error_text(), "unsolicited server error")
            }
            other => warn!(kind = %other, "ignoring unknown message type"),
        }
    }

    // -- internals ---------------------------------------------------------

    /// Open (when encrypted) and parse a message body.
    fn parse_body<T: serde::de::DeserializeOwned>(
        &self,
        msg: &InboundMessage,
    ) -> Result<T, SdkError> {
        let json = if config::is_encrypted_type(&msg.kind) {
            let sender = msg.public_key.as_deref().ok_or_else(|| {
                self.mark_failed(true);
                SdkError::Protocol("encrypted message missing public_key".into())
            })?;
            let opened = {
                let inner = self.inner.lock();
                inner.crypto.open(&msg.body, sender)
            };
            match opened {
                Ok(json) => json,
                Err(e) => {
                    self.mark_failed(true);
                    return Err(e.into());
                }
            }
        } else {
            msg.body.clone()
        };
        serde_json::from_str(&json).map_err(|e| {
            self.mark_failed(true);
            e.into()
        })
    }

    async fn await_response(
        &self,
        id: u64,
        rx: oneshot::Receiver<InboundMessage>,
    ) -> Result<InboundMessage, SdkError> {
        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(msg)) => Ok(msg),
            // Sender dropped: connection_lost or reset already cleaned up.
            Ok(Err(_)) => Err(SdkError::Connection(
                "connection closed while awaiting response".into(),
            )),
            Err(_) => {
                self.inner.lock().expectations.withdraw(id);
                self.mark_failed(true);
                Err(SdkError::ResponseTimeout(self.response_timeout))
            }
        }
    }

    fn fail_pending(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.expectations.withdraw(id);
        if matches!(
            inner.state,
            ProtocolState::AwaitingHostToken | ProtocolState::AwaitingResponse
        ) {
            inner.state = ProtocolState::Failed;
        }
    }

    fn mark_failed(&self, teardown: bool) {
        let mut inner = self.inner.lock();
        inner.state = ProtocolState::Failed;
        if teardown && inner.session.is_some() {
            inner.session = None;
            inner.crypto.clear_peer();
            warn!("session torn down after protocol failure");
        }
    }

    fn mark_completed(&self) {
        self.inner.lock().state = ProtocolState::Completed;
        info!("transaction reached terminal state");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
