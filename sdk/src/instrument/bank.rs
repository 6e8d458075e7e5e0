//! Bank account (ACH) instrument state.

use serde::Serialize;
use tokio::sync::watch;

use super::format;
use super::validators;
use crate::config;

/// ACH account class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Checking,
    Savings,
}

/// Wire-ready snapshot of a valid bank account.
#[derive(Clone, Debug, Serialize)]
pub struct BankDetails {
    pub account_name: String,
    pub account_number: String,
    pub routing_number: String,
    pub account_type: AccountType,
}

/// Mutable ACH entry state.
///
/// Same mutation discipline as the card state: format, commit, recompute,
/// publish — all in the setter.
pub struct BankAccountState {
    account_name: String,
    account_number: String,
    routing_number: String,
    account_type: AccountType,
    visible: bool,
    valid_tx: watch::Sender<bool>,
}

impl BankAccountState {
    pub fn new() -> Self {
        let (valid_tx, _) = watch::channel(false);
        Self {
            account_name: String::new(),
            account_number: String::new(),
            routing_number: String::new(),
            account_type: AccountType::Checking,
            visible: false,
            valid_tx,
        }
    }

    pub fn set_account_name(&mut self, entered: &str) {
        self.account_name = entered.trim().to_string();
        self.recompute();
    }

    pub fn set_account_number(&mut self, entered: &str) {
        self.account_number =
            format::format_digits(entered, config::ACCOUNT_NUMBER_MAX_EXCLUSIVE - 1);
        self.recompute();
    }

    pub fn set_routing_number(&mut self, entered: &str) {
        self.routing_number = format::format_digits(entered, config::ROUTING_NUMBER_DIGITS);
        self.recompute();
    }

    pub fn set_account_type(&mut self, account_type: AccountType) {
        self.account_type = account_type;
        self.recompute();
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn clear(&mut self) {
        self.account_name.clear();
        self.account_number.clear();
        self.routing_number.clear();
        self.account_type = AccountType::Checking;
        self.recompute();
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn routing_number(&self) -> &str {
        &self.routing_number
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_account_name_valid(&self) -> bool {
        !self.account_name.is_empty()
    }

    pub fn is_account_number_valid(&self) -> bool {
        validators::is_valid_account_number(&self.account_number)
    }

    pub fn is_routing_number_valid(&self) -> bool {
        validators::is_valid_routing_number(&self.routing_number)
    }

    /// Aggregate validity: AND of the three field predicates.
    pub fn is_valid(&self) -> bool {
        *self.valid_tx.borrow()
    }

    pub fn subscribe_validity(&self) -> watch::Receiver<bool> {
        self.valid_tx.subscribe()
    }

    pub fn snapshot(&self) -> Option<BankDetails> {
        if !self.is_valid() {
            return None;
        }
        Some(BankDetails {
            account_name: self.account_name.clone(),
            account_number: self.account_number.clone(),
            routing_number: self.routing_number.clone(),
            account_type: self.account_type,
        })
    }

    fn recompute(&mut self) {
        let aggregate = self.is_account_name_valid()
            && self.is_account_number_valid()
            && self.is_routing_number_valid();
        self.valid_tx.send_replace(aggregate);
    }
}

impl Default for BankAccountState {
    fn default() -> Self {
        Self::new()
    }
}
