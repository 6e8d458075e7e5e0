//! End-to-end integration tests for the Luma session protocol.
//!
//! These tests exercise the full stack against a real WebSocket server
//! running in-process: token bootstrap, the host-token handshake with an
//! actual key exchange, sealed transfer/tokenize/barcode flows, the fee
//! side channel, timeouts, and reconnection. The mock server speaks the
//! genuine wire protocol — including the crypto — using the crate's own
//! `CryptoSession` for its half of the exchange.
//!
//! Each test spins its own listener on an ephemeral port. No shared
//! state, no test ordering dependencies, no flaky failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;

use luma_sdk::coordinator::{TokenGrant, TokenSource};
use luma_sdk::crypto::CryptoSession;
use luma_sdk::{
    FeeMode, SdkError, SessionCoordinator, TokenizeResult, TransactRequest, TransactResult,
};

const KEY: &str = "acme-sandbox-123e4567-e89b-12d3-a456-426614174000";

// ---------------------------------------------------------------------------
// Test Doubles
// ---------------------------------------------------------------------------

/// Token source that skips the HTTP hop and hands out a fixed token.
struct StaticTokens;

#[async_trait]
impl TokenSource for StaticTokens {
    async fn fetch(&self) -> Result<TokenGrant, SdkError> {
        Ok(TokenGrant {
            pt_token: "pt-e2e".into(),
            challenge_options: None,
        })
    }
}

/// How the mock server answers the payment flows.
#[derive(Clone, Copy, PartialEq)]
enum ServerMode {
    /// `transfer_part1` is answered directly with a completion.
    OnePhase,
    /// `transfer_part1` gets a confirmation; the completion follows part 2.
    TwoPhase,
    /// Completions carry `state: "FAILURE"`.
    Decline,
    /// The handshake works but payment messages are never answered.
    Silent,
    /// The first connection is dropped right after the handshake; later
    /// connections behave like `OnePhase`.
    DropFirstThenServe,
}

/// Bind an ephemeral port, serve connections forever, return the ws URL.
async fn spawn_server(mode: ServerMode) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let connections = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let index = connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_connection(stream, mode, index));
        }
    });
    format!("ws://127.0.0.1:{port}/session")
}

fn sealed_reply(session: &CryptoSession, kind: &str, body: &Value) -> Message {
    let sealed = session.seal(&body.to_string()).expect("server seal");
    Message::Text(
        json!({
            "type": kind,
            "body": sealed,
            "public_key": session.public_key_base64(),
        })
        .to_string(),
    )
}

async fn serve_connection(stream: TcpStream, mode: ServerMode, index: usize) {
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let mut crypto: Option<CryptoSession> = None;
    let mut pending_amount: Option<u64> = None;

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = serde_json::from_str(&text).expect("parseable frame");
        let action = frame["action"].as_str().expect("action field");
        let client_pub = frame["publicKey"].as_str().expect("publicKey field");

        match action {
            "host:hostToken" => {
                // Bootstrap body is plaintext base64, not ciphertext.
                let body_bytes = BASE64
                    .decode(frame["encoded"].as_str().expect("encoded"))
                    .expect("bootstrap body is base64");
                let body: Value = serde_json::from_slice(&body_bytes).expect("bootstrap json");
                assert_eq!(body["ptToken"], "pt-e2e");
                assert_eq!(body["origin"], "native");

                let mut session = CryptoSession::new();
                session.set_peer_public_key(client_pub).expect("client key");
                let reply_body = json!({
                    "hostToken": "ht-e2e",
                    "sessionKey": "sk-e2e",
                    "publicKey": session.public_key_base64(),
                })
                .to_string();
                let reply = json!({"type": "host_token", "body": reply_body}).to_string();
                crypto = Some(session);
                if ws.send(Message::Text(reply)).await.is_err() {
                    return;
                }

                if mode == ServerMode::DropFirstThenServe && index == 0 {
                    let _ = ws.send(Message::Close(None)).await;
                    return;
                }
            }
            "host:transfer_part1" => {
                let session = crypto.as_ref().expect("handshake first");
                let opened = session
                    .open(frame["encoded"].as_str().expect("encoded"), client_pub)
                    .expect("server open");
                let body: Value = serde_json::from_str(&opened).expect("part1 json");
                let amount = body["amount"].as_u64().expect("amount");
                assert_eq!(frame["sessionKey"], "sk-e2e");

                let reply = match mode {
                    ServerMode::Silent => continue,
                    ServerMode::Decline => sealed_reply(
                        session,
                        "transfer_complete",
                        &json!({
                            "state": "FAILURE",
                            "failure_code": "51",
                            "failure_text": "insufficient funds",
                        }),
                    ),
                    ServerMode::TwoPhase => {
                        pending_amount = Some(amount);
                        sealed_reply(
                            session,
                            "transfer_confirmation",
                            &json!({"idempotency": "idem-e2e", "amount": amount}),
                        )
                    }
                    _ => sealed_reply(
                        session,
                        "transfer_complete",
                        &json!({
                            "state": "SUCCEEDED",
                            "amount": amount,
                            "transaction_id": "tx-e2e",
                            "last_four": "4242",
                            "brand": "VISA",
                        }),
                    ),
                };
                if ws.send(reply).await.is_err() {
                    return;
                }
            }
            "host:transfer_part2" => {
                let session = crypto.as_ref().expect("handshake first");
                let opened = session
                    .open(frame["encoded"].as_str().expect("encoded"), client_pub)
                    .expect("server open");
                let body: Value = serde_json::from_str(&opened).expect("part2 json");
                assert_eq!(body["idempotency"], "idem-e2e");

                let reply = sealed_reply(
                    session,
                    "transfer_complete",
                    &json!({
                        "state": "SUCCEEDED",
                        "amount": pending_amount.take().unwrap_or_default(),
                        "transaction_id": "tx-e2e-2p",
                    }),
                );
                if ws.send(reply).await.is_err() {
                    return;
                }
            }
            "host:tokenize" => {
                let session = crypto.as_ref().expect("handshake first");
                let reply = sealed_reply(
                    session,
                    "tokenize_complete",
                    &json!({
                        "state": "SUCCEEDED",
                        "payment_method_id": "pm-e2e",
                        "last_four": "4242",
                        "brand": "VISA",
                    }),
                );
                if ws.send(reply).await.is_err() {
                    return;
                }
            }
            "host:barcode" => {
                let session = crypto.as_ref().expect("handshake first");
                let opened = session
                    .open(frame["encoded"].as_str().expect("encoded"), client_pub)
                    .expect("server open");
                let body: Value = serde_json::from_str(&opened).expect("barcode json");
                assert_eq!(body["payment_method"]["type"], "cash");

                let reply = sealed_reply(
                    session,
                    "barcode_complete",
                    &json!({
                        "barcode_url": "https://barcodes.test/e2e.png",
                        "barcode_uid": "bc-e2e",
                    }),
                );
                if ws.send(reply).await.is_err() {
                    return;
                }
            }
            "host:calculate_fee" => {
                let session = crypto.as_ref().expect("handshake first");
                let opened = session
                    .open(frame["encoded"].as_str().expect("encoded"), client_pub)
                    .expect("server open");
                let body: Value = serde_json::from_str(&opened).expect("fee json");
                let amount = body["amount"].as_u64().expect("amount");

                // Fee previews travel as plaintext JSON.
                let reply = json!({
                    "type": "calculate_fee_complete",
                    "body": json!({"fee": amount / 40}).to_string(),
                })
                .to_string();
                if ws.send(Message::Text(reply)).await.is_err() {
                    return;
                }
            }
            "host:cancel_transfer" => {
                // Nothing to answer; the client resets regardless.
            }
            other => panic!("mock server saw unexpected action {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

async fn coordinator_for(mode: ServerMode) -> SessionCoordinator {
    let url = spawn_server(mode).await;
    SessionCoordinator::new(KEY)
        .expect("valid key")
        .with_token_source(Arc::new(StaticTokens))
        .with_socket_url(url)
        .with_response_timeout(Duration::from_secs(2))
}

fn fill_card(coordinator: &SessionCoordinator) {
    let handle = coordinator.card();
    let mut card = handle.lock();
    card.set_number("4242424242424242");
    card.set_expiration("12/2099");
    card.set_security_code("123");
    card.set_postal_code("94107");
    card.set_visible(true);
}

fn fill_cash(coordinator: &SessionCoordinator) {
    let handle = coordinator.cash();
    let mut cash = handle.lock();
    cash.set_payor_name("Ada Lovelace");
    cash.set_contact("ada@example.com");
    cash.set_visible(true);
}

async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// 1. Full Card Transfer Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn card_transfer_end_to_end() {
    let coordinator = coordinator_for(ServerMode::OnePhase).await;
    fill_card(&coordinator);

    let outcome = coordinator
        .transact(TransactRequest::new(1_000))
        .await
        .expect("transact");

    match outcome {
        TransactResult::Success(s) => {
            assert_eq!(s.amount, Some(1_000));
            assert_eq!(s.transaction_id.as_deref(), Some("tx-e2e"));
            assert_eq!(s.last_four.as_deref(), Some("4242"));
        }
        other => panic!("expected success, got {other:?}"),
    }

    // Completion handling released the collected card data.
    assert!(!coordinator.card().lock().is_valid());
    assert_eq!(coordinator.card().lock().number(), "");

    // The session is terminal until a reset.
    fill_card(&coordinator);
    let err = coordinator.transact(TransactRequest::new(500)).await.unwrap_err();
    assert!(matches!(err, SdkError::AlreadyComplete));
}

// ---------------------------------------------------------------------------
// 2. Two-Phase Transfer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_phase_transfer_end_to_end() {
    let coordinator = coordinator_for(ServerMode::TwoPhase).await;
    fill_card(&coordinator);

    let outcome = coordinator
        .transact(
            TransactRequest::new(2_500)
                .fee_mode(FeeMode::ServiceFee)
                .fee(75),
        )
        .await
        .expect("transact");

    match outcome {
        TransactResult::Success(s) => {
            assert_eq!(s.amount, Some(2_500));
            assert_eq!(s.transaction_id.as_deref(), Some("tx-e2e-2p"));
        }
        other => panic!("expected success, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 3. Declined Payment Is an Outcome, Not an Error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn declined_payment_surfaces_as_business_failure() {
    let coordinator = coordinator_for(ServerMode::Decline).await;
    fill_card(&coordinator);

    let outcome = coordinator
        .transact(TransactRequest::new(9_999))
        .await
        .expect("transport must succeed even when the payment fails");

    match outcome {
        TransactResult::Failure(f) => {
            assert_eq!(f.failure_code.as_deref(), Some("51"));
            assert_eq!(f.failure_text.as_deref(), Some("insufficient funds"));
        }
        other => panic!("expected business failure, got {other:?}"),
    }

    // A decline keeps the entered card for the integrator to inspect.
    assert!(coordinator.card().lock().is_valid());
}

// ---------------------------------------------------------------------------
// 4. Tokenize
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tokenize_card_end_to_end() {
    let coordinator = coordinator_for(ServerMode::OnePhase).await;
    fill_card(&coordinator);

    let outcome = coordinator
        .tokenize_payment_method(None, Value::Null)
        .await
        .expect("tokenize");

    match outcome {
        TokenizeResult::Success(t) => {
            assert_eq!(t.payment_method_id.as_deref(), Some("pm-e2e"));
            assert_eq!(t.brand.as_deref(), Some("VISA"));
        }
        other => panic!("expected tokenized instrument, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 5. Cash Barcode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cash_flow_yields_barcode() {
    let coordinator = coordinator_for(ServerMode::OnePhase).await;
    fill_cash(&coordinator);

    let outcome = coordinator
        .transact(TransactRequest::new(4_000))
        .await
        .expect("transact");

    match outcome {
        TransactResult::Barcode(b) => {
            assert_eq!(b.barcode_url, "https://barcodes.test/e2e.png");
            assert_eq!(b.barcode_uid.as_deref(), Some("bc-e2e"));
        }
        other => panic!("expected barcode, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 6. Fee Preview Side Channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_amount_refreshes_fee_preview() {
    let coordinator = coordinator_for(ServerMode::OnePhase).await;
    fill_card(&coordinator);

    coordinator.connect().await.expect("connect");
    assert!(coordinator.is_ready());

    let fee = coordinator.update_amount(2_000).await.expect("preview");
    assert_eq!(fee, Some(50));
    assert_eq!(*coordinator.service_fee().borrow(), Some(50));
}

// ---------------------------------------------------------------------------
// 7. Response Deadline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn silent_server_trips_the_response_deadline() {
    let url = spawn_server(ServerMode::Silent).await;
    let coordinator = SessionCoordinator::new(KEY)
        .expect("valid key")
        .with_token_source(Arc::new(StaticTokens))
        .with_socket_url(url)
        .with_response_timeout(Duration::from_millis(200));
    fill_card(&coordinator);

    let err = coordinator.transact(TransactRequest::new(1_000)).await.unwrap_err();
    assert!(matches!(err, SdkError::ResponseTimeout(_)));

    // The guard is free again: the next attempt gets a fresh (non-InFlight)
    // answer rather than a wedged coordinator.
    fill_card(&coordinator);
    let err = coordinator.transact(TransactRequest::new(1_000)).await.unwrap_err();
    assert!(!matches!(err, SdkError::InFlight));
}

// ---------------------------------------------------------------------------
// 8. Reconnect-Once After a Drop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dropped_connection_recovers_with_one_reconnect() {
    let coordinator = coordinator_for(ServerMode::DropFirstThenServe).await;
    fill_card(&coordinator);

    // First connect succeeds, then the server drops us immediately.
    coordinator.connect().await.expect("initial connect");
    wait_until(|| !coordinator.is_ready(), "drop to be observed").await;

    // The next public operation performs exactly one reconnect sequence —
    // token fetch, socket open, handshake — and then completes the payment
    // on the fresh session.
    let outcome = coordinator
        .transact(TransactRequest::new(1_000))
        .await
        .expect("transact after reconnect");
    assert!(matches!(outcome, TransactResult::Success(_)));
}

// ---------------------------------------------------------------------------
// 9. Reset Opens a New Logical Session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reset_session_allows_a_new_payment() {
    let coordinator = coordinator_for(ServerMode::OnePhase).await;
    fill_card(&coordinator);

    let first = coordinator.transact(TransactRequest::new(1_000)).await.expect("first");
    assert!(matches!(first, TransactResult::Success(_)));

    fill_card(&coordinator);
    let err = coordinator.transact(TransactRequest::new(2_000)).await.unwrap_err();
    assert!(matches!(err, SdkError::AlreadyComplete));

    let id_before = coordinator.session_id();
    coordinator.reset_session().await;
    assert_ne!(coordinator.session_id(), id_before);

    fill_card(&coordinator);
    let second = coordinator.transact(TransactRequest::new(2_000)).await.expect("second");
    match second {
        TransactResult::Success(s) => assert_eq!(s.amount, Some(2_000)),
        other => panic!("expected success, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 10. Cancel Performs a Full Reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_resets_regardless_of_flow_position() {
    let coordinator = coordinator_for(ServerMode::OnePhase).await;
    fill_card(&coordinator);

    coordinator.connect().await.expect("connect");
    let id_before = coordinator.session_id();

    // No idempotency token exists yet, so this is a pure local reset.
    coordinator.cancel().await;
    assert_ne!(coordinator.session_id(), id_before);
    assert!(!coordinator.card().lock().is_valid());

    // The reset left a warm session behind; a fresh payment just works.
    fill_card(&coordinator);
    let outcome = coordinator.transact(TransactRequest::new(700)).await.expect("transact");
    assert!(matches!(outcome, TransactResult::Success(_)));
}
