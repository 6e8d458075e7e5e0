//! # Session Coordinator
//!
//! The facade the host application talks to. It wires the crypto session,
//! instrument state, socket transport, and protocol engine together and
//! exposes the four public operations: `transact`,
//! `tokenize_payment_method`, `cancel`, and `reset_session` (plus the
//! fee-preview hook `update_amount`).
//!
//! ## Ownership
//!
//! The coordinator owns the canonical [`CardState`], [`BankAccountState`],
//! and [`CashState`] instances. A UI layer binds to them through the
//! shared handles returned by [`SessionCoordinator::card`] and friends and
//! through the validity watch channels — the core never depends on a UI
//! idiom.
//!
//! ## Serialization of work
//!
//! One primary operation at a time, enforced by an explicit guard: a
//! second `transact`/`tokenize` while one is pending is *rejected* with
//! [`SdkError::InFlight`], not queued. The calculate-fee preview is a side
//! channel and deliberately exempt.
//!
//! ## Reconnection
//!
//! Every public operation runs `ensure_ready` first: if the socket and
//! session triple are live it is a no-op; otherwise it performs exactly
//! one reconnect sequence (token fetch → attestation → socket open →
//! host-token handshake) and then either proceeds or surfaces the error.
//! It never loops. The same sequence backs [`SessionCoordinator::connect`]
//! for the app-foreground hook — the socket does not survive backgrounding.

mod token;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::error::SdkError;
use crate::instrument::{BankAccountState, CardState, CashState};
use crate::protocol::messages::PaymentMethodPayload;
use crate::protocol::{FeeMode, Payor, TokenizeResult, TransactResult, TransactionProtocol};
use crate::transport::{ConnectionStatus, MessagePort, SocketTransport, TransportEvent};

pub use token::{
    AttestationProvider, ChallengeOptions, HttpTokenSource, NoAttestation, TokenGrant, TokenSource,
};

// ---------------------------------------------------------------------------
// Request Types
// ---------------------------------------------------------------------------

/// Parameters for a `transact` call.
#[derive(Clone, Debug)]
pub struct TransactRequest {
    pub amount: u64,
    pub fee_mode: FeeMode,
    pub fee: Option<u64>,
    pub metadata: Value,
    pub payor: Option<Payor>,
}

impl TransactRequest {
    pub fn new(amount: u64) -> Self {
        Self {
            amount,
            fee_mode: FeeMode::MerchantFee,
            fee: None,
            metadata: Value::Null,
            payor: None,
        }
    }

    pub fn fee_mode(mut self, fee_mode: FeeMode) -> Self {
        self.fee_mode = fee_mode;
        self
    }

    pub fn fee(mut self, fee: u64) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn payor(mut self, payor: Payor) -> Self {
        self.payor = Some(payor);
        self
    }
}

/// Which primary operation currently holds the single-flight guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OperationKind {
    Transact,
    Tokenize,
}

/// RAII slot for the single-flight guard: acquired before any validation
/// or network work, released when the operation's future settles — by
/// completion, error, or drop.
struct OpGuard {
    slot: Arc<Mutex<Option<OperationKind>>>,
}

impl OpGuard {
    fn acquire(
        slot: &Arc<Mutex<Option<OperationKind>>>,
        kind: OperationKind,
    ) -> Result<Self, SdkError> {
        let mut pending = slot.lock();
        if pending.is_some() {
            return Err(SdkError::InFlight);
        }
        *pending = Some(kind);
        drop(pending);
        Ok(Self {
            slot: Arc::clone(slot),
        })
    }
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Top-level runtime entity for one logical payment session.
pub struct SessionCoordinator {
    credentials: Credentials,
    token_source: Arc<dyn TokenSource>,
    attestor: Arc<dyn AttestationProvider>,
    transport: Arc<SocketTransport>,
    protocol: Arc<TransactionProtocol>,
    card: Arc<Mutex<CardState>>,
    bank: Arc<Mutex<BankAccountState>>,
    cash: Arc<Mutex<CashState>>,
    pending: Arc<Mutex<Option<OperationKind>>>,
    amount: Mutex<Option<u64>>,
    socket_url_override: Option<String>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCoordinator {
    /// Build a coordinator from an API key.
    ///
    /// # Errors
    ///
    /// [`SdkError::Configuration`] when the key is malformed — this is the
    /// only constructor-time failure, and nothing downstream can limp
    /// along without valid routing, so it surfaces here rather than at
    /// payment time.
    pub fn new(api_key: &str) -> Result<Self, SdkError> {
        let credentials = Credentials::parse(api_key)?;
        let transport = Arc::new(SocketTransport::new());
        let port: Arc<dyn MessagePort> = transport.clone();
        let token_source: Arc<dyn TokenSource> = Arc::new(HttpTokenSource::new(&credentials));

        Ok(Self {
            credentials,
            token_source,
            attestor: Arc::new(NoAttestation),
            protocol: Arc::new(TransactionProtocol::new(port)),
            transport,
            card: Arc::new(Mutex::new(CardState::new())),
            bank: Arc::new(Mutex::new(BankAccountState::new())),
            cash: Arc::new(Mutex::new(CashState::new())),
            pending: Arc::new(Mutex::new(None)),
            amount: Mutex::new(None),
            socket_url_override: None,
            pump: Mutex::new(None),
        })
    }

    /// Substitute the bootstrap token source (sandboxes, tests).
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = source;
        self
    }

    /// Substitute the attestation provider (platform integrations).
    pub fn with_attestor(mut self, attestor: Arc<dyn AttestationProvider>) -> Self {
        self.attestor = attestor;
        self
    }

    /// Override the socket endpoint. The fresh token is still appended as
    /// the `pt_token` query parameter.
    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url_override = Some(url.into());
        self
    }

    /// Override the response deadline (tests mostly).
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        let port: Arc<dyn MessagePort> = self.transport.clone();
        self.protocol = Arc::new(TransactionProtocol::with_timeout(port, timeout));
        self
    }

    // -- state handles -----------------------------------------------------

    /// Shared handle to the canonical card state.
    pub fn card(&self) -> Arc<Mutex<CardState>> {
        Arc::clone(&self.card)
    }

    /// Shared handle to the canonical bank-account state.
    pub fn bank_account(&self) -> Arc<Mutex<BankAccountState>> {
        Arc::clone(&self.bank)
    }

    /// Shared handle to the canonical cash state.
    pub fn cash(&self) -> Arc<Mutex<CashState>> {
        Arc::clone(&self.cash)
    }

    /// Latest service-fee preview.
    pub fn service_fee(&self) -> watch::Receiver<Option<u64>> {
        self.protocol.subscribe_service_fee()
    }

    /// True when the socket is open and the session triple is committed.
    /// Pure query — reconnection happens inside the public operations.
    pub fn is_ready(&self) -> bool {
        self.transport.is_connected() && self.protocol.has_session()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    pub fn subscribe_connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.transport.subscribe_status()
    }

    /// Local logical session id (regenerated by reset).
    pub fn session_id(&self) -> String {
        self.protocol.session_id()
    }

    // -- public operations -------------------------------------------------

    /// Establish (or re-establish) the session without running a payment.
    /// This is the app-foreground hook: the socket closes when the app
    /// backgrounds, and one call here brings the session back.
    pub async fn connect(&self) -> Result<(), SdkError> {
        self.ensure_ready().await
    }

    /// Execute a charge/transfer against the currently active instrument.
    ///
    /// Rejected before any network activity when another operation is
    /// pending, a prior transaction already completed, the fee mode lacks
    /// its fee, or no/too many instruments are valid and visible. A cash
    /// instrument routes to the barcode flow.
    pub async fn transact(&self, request: TransactRequest) -> Result<TransactResult, SdkError> {
        let _guard = OpGuard::acquire(&self.pending, OperationKind::Transact)?;

        if request.fee_mode == FeeMode::ServiceFee && request.fee.is_none() {
            return Err(SdkError::Validation(
                "service_fee mode requires an explicit fee value".into(),
            ));
        }
        let payment_method = self.select_instrument()?;
        debug!(instrument = %payment_method.kind(), "instrument selected");
        self.ensure_ready().await?;
        *self.amount.lock() = Some(request.amount);

        let outcome = if payment_method.is_cash() {
            self.protocol
                .barcode(payment_method, request.amount, request.fee_mode, request.metadata)
                .await?
        } else {
            self.protocol
                .transfer(
                    payment_method,
                    request.amount,
                    request.fee_mode,
                    request.fee,
                    request.metadata,
                    request.payor,
                )
                .await?
        };

        // Completion handling: a settled payment releases the collected
        // instrument data; a delivered decline keeps it for inspection
        // until the caller resets.
        match &outcome {
            TransactResult::Success(_) | TransactResult::Barcode(_) => self.clear_instruments(),
            TransactResult::Failure(_) => {}
        }
        Ok(outcome)
    }

    /// Convert the active instrument into a reusable payment-method
    /// reference without charging it. Cash cannot be tokenized.
    pub async fn tokenize_payment_method(
        &self,
        payor: Option<Payor>,
        metadata: Value,
    ) -> Result<TokenizeResult, SdkError> {
        let _guard = OpGuard::acquire(&self.pending, OperationKind::Tokenize)?;

        let payment_method = self.select_instrument()?;
        if payment_method.is_cash() {
            return Err(SdkError::Validation("cash cannot be tokenized".into()));
        }
        self.ensure_ready().await?;

        let outcome = self.protocol.tokenize(payment_method, metadata, payor).await?;
        if matches!(outcome, TokenizeResult::Success(_)) {
            self.clear_instruments();
        }
        Ok(outcome)
    }

    /// Abort the in-progress transfer if the server issued an idempotency
    /// token, then perform a full reset regardless of the outcome.
    pub async fn cancel(&self) {
        if self.protocol.idempotency_token().is_some() {
            let _ = self.protocol.cancel_transfer().await;
        }
        self.reset_session().await;
    }

    /// Clear all state and prepare for a new logical payment. Safe to call
    /// at any time; attempts to re-establish the session proactively so
    /// the next operation starts warm (a failure here is logged and
    /// deferred to that operation's own `ensure_ready`).
    pub async fn reset_session(&self) {
        info!("session reset requested");
        self.protocol.reset();
        self.transport.close().await;
        self.clear_instruments();
        *self.amount.lock() = None;

        if let Err(e) = self.ensure_ready().await {
            warn!(error = %e, "proactive session re-establishment failed");
        }
    }

    /// Record a new amount and, when a session is live, refresh the
    /// service-fee preview (keyed by the card BIN when one is known).
    /// Returns the fresh fee, or `None` when no session is up — previews
    /// never force a reconnect.
    pub async fn update_amount(&self, amount: u64) -> Result<Option<u64>, SdkError> {
        *self.amount.lock() = Some(amount);
        if !self.is_ready() {
            return Ok(None);
        }
        let first_six = self.card.lock().first_six();
        let fee = self.protocol.calculate_fee(amount, first_six).await?;
        Ok(Some(fee))
    }

    // -- internals ---------------------------------------------------------

    /// One reconnect sequence, or nothing.
    async fn ensure_ready(&self) -> Result<(), SdkError> {
        if self.transport.is_connected() && self.protocol.has_session() {
            return Ok(());
        }
        info!("establishing payment session");

        let grant = self.token_source.fetch().await?;
        let attestation = match &grant.challenge_options {
            Some(options) => Some(self.attestor.attest(&options.challenge).await?),
            None => None,
        };

        let url = match &self.socket_url_override {
            Some(base) => format!("{base}?pt_token={}", grant.pt_token),
            None => self.credentials.socket_url(&grant.pt_token),
        };

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        self.transport.connect(&url, events_tx).await?;

        let protocol = Arc::clone(&self.protocol);
        let pump = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    TransportEvent::Frame(frame) => protocol.handle_frame(&frame),
                    TransportEvent::Closed(reason) => {
                        protocol.connection_lost(&reason);
                        break;
                    }
                }
            }
        });
        if let Some(previous) = self.pump.lock().replace(pump) {
            previous.abort();
        }

        // Whatever session existed belonged to the dead connection; its
        // host token is stale. Start the new connection with a clean
        // handshake.
        self.protocol.invalidate_session();
        self.protocol.establish_session(&grant.pt_token, attestation).await
    }

    /// Exactly one valid, visible instrument; anything else is the
    /// caller's error to fix, not ours to guess.
    fn select_instrument(&self) -> Result<PaymentMethodPayload, SdkError> {
        let mut eligible = Vec::new();
        {
            let card = self.card.lock();
            if card.is_visible() {
                if let Some(details) = card.snapshot() {
                    eligible.push(PaymentMethodPayload::Card(details));
                }
            }
        }
        {
            let bank = self.bank.lock();
            if bank.is_visible() {
                if let Some(details) = bank.snapshot() {
                    eligible.push(PaymentMethodPayload::BankAccount(details));
                }
            }
        }
        {
            let cash = self.cash.lock();
            if cash.is_visible() {
                if let Some(details) = cash.snapshot() {
                    eligible.push(PaymentMethodPayload::Cash(details));
                }
            }
        }

        match eligible.len() {
            0 => Err(SdkError::Validation(
                "no valid, visible payment instrument".into(),
            )),
            1 => Ok(eligible.remove(0)),
            _ => Err(SdkError::Validation(
                "multiple valid, visible payment instruments; exactly one must be active".into(),
            )),
        }
    }

    fn clear_instruments(&self) {
        self.card.lock().clear();
        self.bank.lock().clear();
        self.cash.lock().clear();
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
