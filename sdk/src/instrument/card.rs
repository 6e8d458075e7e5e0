//! Card instrument state.

use serde::Serialize;
use tokio::sync::watch;

use super::format;
use super::validators;

/// Wire-ready snapshot of a valid card. Number is digits-only — the
/// display grouping never leaves the device.
#[derive(Clone, Debug, Serialize)]
pub struct CardDetails {
    pub number: String,
    pub expiration_month: String,
    pub expiration_year: String,
    pub security_code: String,
    pub postal_code: String,
}

/// Mutable card entry state with per-field and aggregate validity.
///
/// Setters commit the formatted value and recompute validity in the same
/// call. The aggregate is published on a watch channel so a binding layer
/// can subscribe without polling.
pub struct CardState {
    number: String,
    expiration: String,
    security_code: String,
    postal_code: String,
    country: String,
    visible: bool,
    valid_tx: watch::Sender<bool>,
}

impl CardState {
    pub fn new() -> Self {
        let (valid_tx, _) = watch::channel(false);
        Self {
            number: String::new(),
            expiration: String::new(),
            security_code: String::new(),
            postal_code: String::new(),
            country: "US".to_string(),
            visible: false,
            valid_tx,
        }
    }

    // -- mutation ----------------------------------------------------------

    pub fn set_number(&mut self, entered: &str) {
        self.number = format::format_card_number(entered);
        self.recompute();
    }

    pub fn set_expiration(&mut self, entered: &str) {
        self.expiration = format::format_expiration(&self.expiration, entered);
        self.recompute();
    }

    pub fn set_security_code(&mut self, entered: &str) {
        self.security_code =
            format::format_digits(entered, crate::config::MAX_SECURITY_CODE_DIGITS);
        self.recompute();
    }

    pub fn set_postal_code(&mut self, entered: &str) {
        self.postal_code = entered.trim().to_string();
        self.recompute();
    }

    pub fn set_country(&mut self, country: &str) {
        self.country = country.trim().to_string();
        self.recompute();
    }

    /// Mark this instrument as the one the integrating layer is showing.
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Reset every field to its empty default. Validity recomputes to
    /// false. Idempotent.
    pub fn clear(&mut self) {
        self.number.clear();
        self.expiration.clear();
        self.security_code.clear();
        self.postal_code.clear();
        self.country = "US".to_string();
        self.recompute();
    }

    // -- accessors ---------------------------------------------------------

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn expiration(&self) -> &str {
        &self.expiration
    }

    pub fn security_code(&self) -> &str {
        &self.security_code
    }

    pub fn postal_code(&self) -> &str {
        &self.postal_code
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// First six digits of the number, once at least six are present.
    /// Drives the fee-preview side channel.
    pub fn first_six(&self) -> Option<String> {
        let digits = format::digits_only(&self.number);
        (digits.len() >= 6).then(|| digits[..6].to_string())
    }

    // -- validity ----------------------------------------------------------

    pub fn is_number_valid(&self) -> bool {
        validators::is_valid_card_number(&self.number)
    }

    pub fn is_expiration_valid(&self) -> bool {
        match validators::split_expiration(&self.expiration) {
            Some((month, year)) => validators::is_valid_expiration(month, year),
            None => false,
        }
    }

    pub fn is_security_code_valid(&self) -> bool {
        validators::is_valid_security_code(&self.security_code)
    }

    pub fn is_postal_code_valid(&self) -> bool {
        validators::is_valid_postal_code(&self.country, &self.postal_code)
    }

    /// Aggregate validity: AND of the four field predicates.
    pub fn is_valid(&self) -> bool {
        *self.valid_tx.borrow()
    }

    /// Subscribe to aggregate-validity changes.
    pub fn subscribe_validity(&self) -> watch::Receiver<bool> {
        self.valid_tx.subscribe()
    }

    /// Wire snapshot, available only while the aggregate holds.
    pub fn snapshot(&self) -> Option<CardDetails> {
        if !self.is_valid() {
            return None;
        }
        let (month, year) = validators::split_expiration(&self.expiration)?;
        Some(CardDetails {
            number: format::digits_only(&self.number),
            expiration_month: month.to_string(),
            expiration_year: year.to_string(),
            security_code: self.security_code.clone(),
            postal_code: self.postal_code.clone(),
        })
    }

    fn recompute(&mut self) {
        let aggregate = self.is_number_valid()
            && self.is_expiration_valid()
            && self.is_security_code_valid()
            && self.is_postal_code_valid();
        self.valid_tx.send_replace(aggregate);
    }
}

impl Default for CardState {
    fn default() -> Self {
        Self::new()
    }
}
