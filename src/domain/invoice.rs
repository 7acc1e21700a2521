use crate::domain::payment_method::PaymentMethod;
use crate::error::Failure;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Server-side record of an amount to collect, together with the payment
/// methods currently offered for it.
///
/// An invoice is an immutable snapshot: it is fetched once per attempt and
/// replaced wholesale when the checkout restarts with a new invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub payment_methods: Vec<PaymentMethod>,
    #[serde(default)]
    pub transaction: Option<InvoiceTransaction>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
}

impl Invoice {
    pub fn payment_method(&self, id: &str) -> Option<&PaymentMethod> {
        self.payment_methods.iter().find(|method| method.id() == id)
    }

    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction.as_ref().map(|transaction| transaction.status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTransaction {
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Waiting,
    Authorized,
    Completed,
    Failed,
    Voided,
    #[serde(other)]
    Unknown,
}

/// Identifies the invoice a checkout operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub invoice_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl InvoiceRequest {
    pub fn new(invoice_id: impl Into<String>) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            client_secret: None,
        }
    }
}

/// Request to authorize an invoice with a tokenized payment source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceAuthorizationRequest {
    pub invoice_id: String,
    pub source: String,
    #[serde(default)]
    pub save_source: bool,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub allow_fallback_to_sale: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl InvoiceAuthorizationRequest {
    pub fn new(invoice_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            source: source.into(),
            save_source: false,
            client_secret: None,
            allow_fallback_to_sale: false,
            metadata: HashMap::new(),
        }
    }
}

/// Additional customer action the backend may require while authorizing,
/// typically a 3-D Secure challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAction {
    pub kind: String,
    pub value: String,
}

/// Why the checkout asks its delegate for a replacement invoice.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidationReason {
    /// Payment processing failed in a way that may have consumed the invoice.
    Failure(Failure),
    /// The customer switched to another method after the current one may
    /// have mutated server-side state.
    PaymentMethodChanged,
}
