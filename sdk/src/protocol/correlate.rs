//! Request/response correlation over a socket with no message IDs.
//!
//! The wire protocol cannot be extended with correlation ids, so the next
//! best thing: a FIFO queue of *expectations*, each naming the family of
//! inbound types that can legally answer it. An inbound message resolves
//! the oldest expectation whose family contains its type; anything no
//! expectation claims falls through to the engine's default handling.
//!
//! This keeps the side channels honest — a `calculate_fee_complete` can
//! never be swallowed by a waiter that asked for a transfer answer — while
//! degrading to plain "next message wins" when only one expectation is
//! outstanding, which is all a single-flight protocol normally has.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::config::{
    TYPE_BARCODE_COMPLETE, TYPE_CALCULATE_FEE_COMPLETE, TYPE_ERROR, TYPE_HOST_TOKEN,
    TYPE_TOKENIZE_COMPLETE, TYPE_TRANSFER_COMPLETE, TYPE_TRANSFER_CONFIRMATION,
};
use crate::protocol::messages::InboundMessage;

// `error` belongs to every family: a server error must resolve the oldest
// waiter rather than rot in the queue.

/// Answers to the bootstrap handshake.
pub const FAMILY_HOST_TOKEN: &[&str] = &[TYPE_HOST_TOKEN, TYPE_ERROR];

/// Answers to `transfer_part1`: confirmation (two-phase) or straight
/// completion (one-phase).
pub const FAMILY_TRANSFER: &[&str] = &[
    TYPE_TRANSFER_CONFIRMATION,
    TYPE_TRANSFER_COMPLETE,
    TYPE_ERROR,
];

/// Answers to `transfer_part2`.
pub const FAMILY_TRANSFER_COMPLETION: &[&str] = &[TYPE_TRANSFER_COMPLETE, TYPE_ERROR];

/// Answers to `tokenize`.
pub const FAMILY_TOKENIZE: &[&str] = &[TYPE_TOKENIZE_COMPLETE, TYPE_ERROR];

/// Answers to `barcode`.
pub const FAMILY_BARCODE: &[&str] = &[TYPE_BARCODE_COMPLETE, TYPE_ERROR];

/// Answers to `calculate_fee`.
pub const FAMILY_FEE: &[&str] = &[TYPE_CALCULATE_FEE_COMPLETE, TYPE_ERROR];

struct Expectation {
    id: u64,
    family: &'static [&'static str],
    tx: oneshot::Sender<InboundMessage>,
}

/// FIFO queue of outstanding expectations.
pub struct ExpectationQueue {
    next_id: u64,
    queue: VecDeque<Expectation>,
}

impl ExpectationQueue {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            queue: VecDeque::new(),
        }
    }

    /// Register an expectation for one message out of `family`. Returns
    /// the expectation id (for withdrawal on timeout) and the receiver the
    /// answer will arrive on.
    pub fn register(
        &mut self,
        family: &'static [&'static str],
    ) -> (u64, oneshot::Receiver<InboundMessage>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.queue.push_back(Expectation { id, family, tx });
        (id, rx)
    }

    /// Withdraw an expectation that will never be fulfilled (the waiter
    /// timed out). Returns whether it was still queued — a `false` means
    /// the answer won the race and was already delivered.
    pub fn withdraw(&mut self, id: u64) -> bool {
        let before = self.queue.len();
        self.queue.retain(|e| e.id != id);
        self.queue.len() != before
    }

    /// Deliver a message to the oldest expectation whose family contains
    /// its type. Returns the message back if no expectation claims it.
    pub fn route(&mut self, msg: InboundMessage) -> Option<InboundMessage> {
        let mut msg = msg;
        loop {
            let Some(position) = self
                .queue
                .iter()
                .position(|e| e.family.contains(&msg.kind.as_str()))
            else {
                return Some(msg);
            };
            let expectation = self.queue.remove(position).expect("position just found");
            match expectation.tx.send(msg) {
                Ok(()) => return None,
                // Receiver dropped between timeout and withdrawal: try the
                // next matching expectation with the same message.
                Err(returned) => msg = returned,
            }
        }
    }

    /// Drop every outstanding expectation. Their receivers observe a
    /// closed channel, which waiters surface as a connection error.
    pub fn fail_all(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for ExpectationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(kind: &str) -> InboundMessage {
        InboundMessage {
            kind: kind.to_string(),
            body: String::new(),
            public_key: None,
            error: None,
        }
    }

    #[test]
    fn fee_answer_skips_transfer_waiter() {
        let mut q = ExpectationQueue::new();
        let (_id1, mut transfer_rx) = q.register(FAMILY_TRANSFER);
        let (_id2, mut fee_rx) = q.register(FAMILY_FEE);

        // The fee preview answers first. The transfer waiter must not
        // consume it even though it registered earlier.
        assert!(q.route(msg(TYPE_CALCULATE_FEE_COMPLETE)).is_none());
        assert_eq!(fee_rx.try_recv().unwrap().kind, TYPE_CALCULATE_FEE_COMPLETE);
        assert!(transfer_rx.try_recv().is_err());

        assert!(q.route(msg(TYPE_TRANSFER_COMPLETE)).is_none());
        assert_eq!(transfer_rx.try_recv().unwrap().kind, TYPE_TRANSFER_COMPLETE);
    }

    #[test]
    fn error_resolves_oldest_waiter() {
        let mut q = ExpectationQueue::new();
        let (_id1, mut first_rx) = q.register(FAMILY_TRANSFER);
        let (_id2, mut second_rx) = q.register(FAMILY_FEE);

        assert!(q.route(msg(TYPE_ERROR)).is_none());
        assert_eq!(first_rx.try_recv().unwrap().kind, TYPE_ERROR);
        assert!(second_rx.try_recv().is_err());
    }

    #[test]
    fn fifo_within_a_family() {
        let mut q = ExpectationQueue::new();
        let (_a, mut rx_a) = q.register(FAMILY_FEE);
        let (_b, mut rx_b) = q.register(FAMILY_FEE);

        q.route(msg(TYPE_CALCULATE_FEE_COMPLETE));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        q.route(msg(TYPE_CALCULATE_FEE_COMPLETE));
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn unclaimed_message_is_returned() {
        let mut q = ExpectationQueue::new();
        let (_id, _rx) = q.register(FAMILY_FEE);
        let returned = q.route(msg(TYPE_TRANSFER_COMPLETE));
        assert_eq!(returned.unwrap().kind, TYPE_TRANSFER_COMPLETE);
        // The fee expectation is still queued.
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn withdraw_removes_exactly_one() {
        let mut q = ExpectationQueue::new();
        let (id, _rx) = q.register(FAMILY_TRANSFER);
        assert!(q.withdraw(id));
        assert!(!q.withdraw(id));
        assert!(q.is_empty());
    }

    #[test]
    fn dropped_receiver_falls_through_to_next_waiter() {
        let mut q = ExpectationQueue::new();
        let (_a, rx_a) = q.register(FAMILY_FEE);
        let (_b, mut rx_b) = q.register(FAMILY_FEE);
        drop(rx_a);

        assert!(q.route(msg(TYPE_CALCULATE_FEE_COMPLETE)).is_none());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn fail_all_closes_receivers() {
        let mut q = ExpectationQueue::new();
        let (_id, mut rx) = q.register(FAMILY_HOST_TOKEN);
        q.fail_all();
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }
}
