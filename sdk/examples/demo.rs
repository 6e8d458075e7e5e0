// Copyright (c) 2026 Luma Payments. MIT License.
// See LICENSE for details.

//! Walkthrough of the SDK's local surface: instrument entry, synchronous
//! validation, validity subscriptions, and facade construction.
//!
//! Everything here runs offline — the one network-facing call at the end
//! is expected to fail against the placeholder credentials, and the demo
//! prints the typed error it gets back.
//!
//! ```text
//! cargo run --example demo
//! ```

use luma_sdk::{FeeMode, SdkError, SessionCoordinator, TransactRequest};

#[tokio::main]
async fn main() -> Result<(), SdkError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Luma Pay SDK demo ===\n");

    // A coordinator is built from an API key; a malformed key fails here,
    // not somewhere in the middle of a payment.
    let coordinator = SessionCoordinator::new("demo-sandbox-123e4567-e89b-12d3-a456-426614174000")?;
    println!("coordinator constructed, session id {}", coordinator.session_id());

    // Watch the card's aggregate validity while fields are typed in.
    let card_handle = coordinator.card();
    let validity = card_handle.lock().subscribe_validity();

    println!("\n-- typing a card --");
    {
        let mut card = card_handle.lock();
        card.set_number("4242424242424242");
        println!("number committed as {:?} (valid: {})", card.number(), *validity.borrow());
        card.set_expiration("12/2030");
        card.set_security_code("123");
        println!("still incomplete (valid: {})", *validity.borrow());
        card.set_postal_code("94107");
        println!("postal code entered   (valid: {})", *validity.borrow());
        card.set_visible(true);
    }

    // Formatting is part of the mutation: pasted separators are normalized
    // and overflow is clamped.
    {
        let mut card = card_handle.lock();
        card.set_number("4242-4242-4242-4242");
        println!("\npasted with dashes, committed as {:?}", card.number());
    }

    // A cash payor with no name is invalid no matter the contact.
    let cash_handle = coordinator.cash();
    {
        let mut cash = cash_handle.lock();
        cash.set_contact("ada@example.com");
        println!("\ncash with contact but no name valid: {}", cash.is_valid());
        cash.set_payor_name("Ada Lovelace");
        println!("cash with name and contact valid:    {}", cash.is_valid());
        // Leave cash invisible: exactly one instrument may be active.
        cash.clear();
    }

    // The network path: with placeholder credentials this fails with a
    // typed error rather than hanging or panicking.
    println!("\n-- attempting a transact (expected to fail offline) --");
    match coordinator
        .transact(TransactRequest::new(1_000).fee_mode(FeeMode::MerchantFee))
        .await
    {
        Ok(outcome) => println!("unexpected success: {outcome:?}"),
        Err(e) => println!("transact failed as expected: {e}"),
    }

    Ok(())
}
