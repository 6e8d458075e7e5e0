//! Cash instrument state.
//!
//! Cash collects the least data of the three instruments: who the payor is
//! and how to reach them. The contact doubles as the delivery channel for
//! the retail barcode, so it must be an email or a phone number — not just
//! non-empty.

use serde::Serialize;
use tokio::sync::watch;

use super::validators;

/// Wire-ready snapshot of a valid cash payor.
#[derive(Clone, Debug, Serialize)]
pub struct CashDetails {
    pub payor_name: String,
    pub contact: String,
}

/// Mutable cash entry state.
pub struct CashState {
    payor_name: String,
    contact: String,
    visible: bool,
    valid_tx: watch::Sender<bool>,
}

impl CashState {
    pub fn new() -> Self {
        let (valid_tx, _) = watch::channel(false);
        Self {
            payor_name: String::new(),
            contact: String::new(),
            visible: false,
            valid_tx,
        }
    }

    pub fn set_payor_name(&mut self, entered: &str) {
        self.payor_name = entered.trim().to_string();
        self.recompute();
    }

    pub fn set_contact(&mut self, entered: &str) {
        self.contact = entered.trim().to_string();
        self.recompute();
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn clear(&mut self) {
        self.payor_name.clear();
        self.contact.clear();
        self.recompute();
    }

    pub fn payor_name(&self) -> &str {
        &self.payor_name
    }

    pub fn contact(&self) -> &str {
        &self.contact
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_payor_name_valid(&self) -> bool {
        !self.payor_name.is_empty()
    }

    pub fn is_contact_valid(&self) -> bool {
        validators::is_valid_contact(&self.contact)
    }

    /// Aggregate validity: name present AND contact is email-or-phone.
    pub fn is_valid(&self) -> bool {
        *self.valid_tx.borrow()
    }

    pub fn subscribe_validity(&self) -> watch::Receiver<bool> {
        self.valid_tx.subscribe()
    }

    pub fn snapshot(&self) -> Option<CashDetails> {
        if !self.is_valid() {
            return None;
        }
        Some(CashDetails {
            payor_name: self.payor_name.clone(),
            contact: self.contact.clone(),
        })
    }

    fn recompute(&mut self) {
        let aggregate = self.is_payor_name_valid() && self.is_contact_valid();
        self.valid_tx.send_replace(aggregate);
    }
}

impl Default for CashState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_email_contact_is_valid() {
        let mut cash = CashState::new();
        cash.set_payor_name("Ada Lovelace");
        cash.set_contact("ada@example.com");
        assert!(cash.is_valid());
    }

    #[test]
    fn phone_contact_also_accepted() {
        let mut cash = CashState::new();
        cash.set_payor_name("Ada Lovelace");
        cash.set_contact("+1 415 555 1234");
        assert!(cash.is_valid());
    }

    #[test]
    fn empty_name_invalid_regardless_of_contact() {
        let mut cash = CashState::new();
        cash.set_payor_name("");
        cash.set_contact("ada@example.com");
        assert!(!cash.is_valid());
        cash.set_contact("4155551234");
        assert!(!cash.is_valid());
    }

    #[test]
    fn contact_must_be_email_or_phone() {
        let mut cash = CashState::new();
        cash.set_payor_name("Ada Lovelace");
        cash.set_contact("reachable somehow");
        assert!(!cash.is_valid());
    }

    #[test]
    fn clear_is_idempotent() {
        let mut cash = CashState::new();
        cash.set_payor_name("Ada");
        cash.set_contact("ada@example.com");
        cash.clear();
        assert!(!cash.is_valid());
        assert_eq!(cash.payor_name(), "");
        cash.clear();
        assert_eq!(cash.contact(), "");
    }
}
