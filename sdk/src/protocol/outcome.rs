//! Typed operation outcomes delivered to the caller.
//!
//! A delivered business failure is a *completed* exchange — it lives here,
//! on the success path of the `Result`, with structured details. Errors
//! proper (connection, protocol, validation) live in
//! [`crate::error::SdkError`].

/// A settled payment.
#[derive(Clone, Debug)]
pub struct SuccessfulTransaction {
    pub transaction_id: Option<String>,
    pub amount: Option<u64>,
    pub service_fee: Option<u64>,
    pub last_four: Option<String>,
    pub brand: Option<String>,
    pub created_at: Option<String>,
}

/// A delivered decline: transport succeeded, the payment did not.
#[derive(Clone, Debug)]
pub struct FailedTransaction {
    pub failure_code: Option<String>,
    pub failure_text: Option<String>,
    pub transaction_id: Option<String>,
}

/// A retail cash barcode ready to present to the payor.
#[derive(Clone, Debug)]
pub struct CashBarcode {
    pub barcode_url: String,
    pub barcode_uid: Option<String>,
    pub expiration: Option<String>,
}

/// Terminal outcome of a `transact` operation.
#[derive(Clone, Debug)]
pub enum TransactResult {
    Success(SuccessfulTransaction),
    Failure(FailedTransaction),
    Barcode(CashBarcode),
}

/// A stored, reusable payment method reference.
#[derive(Clone, Debug)]
pub struct TokenizedInstrument {
    pub payment_method_id: Option<String>,
    pub last_four: Option<String>,
    pub brand: Option<String>,
}

/// Terminal outcome of a tokenize operation.
#[derive(Clone, Debug)]
pub enum TokenizeResult {
    Success(TokenizedInstrument),
    Failure(FailedTransaction),
}
