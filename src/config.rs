//! Checkout configuration.
//!
//! Everything here can be loaded from JSON; durations are expressed as
//! (fractional) seconds.

use crate::domain::card::CardContact;
use crate::domain::invoice::InvoiceRequest;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSecondsWithFrac, serde_as};
use std::time::Duration;

/// Upper bound for how long a native payment capture may be awaited.
pub const MAX_CAPTURE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutConfiguration {
    pub invoice_request: InvoiceRequest,
    /// Starts the only card or native method immediately instead of showing
    /// the method list.
    #[serde(default)]
    pub allows_skipping_payment_list: bool,
    #[serde(default = "default_true")]
    pub cancellable: bool,
    #[serde(default)]
    pub card: CardCollectionConfiguration,
    #[serde(default)]
    pub alternative_payment: NativeAlternativePaymentConfiguration,
}

impl CheckoutConfiguration {
    pub fn new(invoice_request: InvoiceRequest) -> Self {
        Self {
            invoice_request,
            allows_skipping_payment_list: false,
            cancellable: true,
            card: CardCollectionConfiguration::default(),
            alternative_payment: NativeAlternativePaymentConfiguration::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardCollectionConfiguration {
    /// Prefills the billing address fields.
    #[serde(default)]
    pub default_address: Option<CardContact>,
    /// Sends the default address even when address fields are not collected.
    #[serde(default)]
    pub attach_defaults_to_payment_method: bool,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "default_issuer_lookup_debounce")]
    pub issuer_lookup_debounce: Duration,
}

impl Default for CardCollectionConfiguration {
    fn default() -> Self {
        Self {
            default_address: None,
            attach_defaults_to_payment_method: false,
            issuer_lookup_debounce: default_issuer_lookup_debounce(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeAlternativePaymentConfiguration {
    /// When false the flow completes right after the parameters are accepted
    /// instead of waiting for the capture.
    #[serde(default = "default_true")]
    pub waits_confirmation: bool,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "default_capture_timeout")]
    pub timeout: Duration,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub show_progress_indicator_after: Option<Duration>,
    /// Requires an explicit customer confirmation before polling starts.
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default = "default_true")]
    pub cancellable: bool,
}

impl NativeAlternativePaymentConfiguration {
    /// Configured timeout clamped to [`MAX_CAPTURE_TIMEOUT`].
    pub fn capture_timeout(&self) -> Duration {
        self.timeout.min(MAX_CAPTURE_TIMEOUT)
    }
}

impl Default for NativeAlternativePaymentConfiguration {
    fn default() -> Self {
        Self {
            waits_confirmation: true,
            timeout: default_capture_timeout(),
            poll_interval: default_poll_interval(),
            show_progress_indicator_after: None,
            requires_confirmation: false,
            cancellable: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_issuer_lookup_debounce() -> Duration {
    Duration::from_millis(300)
}

fn default_capture_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}
