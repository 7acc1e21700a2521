use super::card::{Card, CardScheme, CardTokenizationRequest, IssuerInformation};
use super::event::CheckoutEvent;
use super::invoice::{
    CustomerAction, InvalidationReason, Invoice, InvoiceAuthorizationRequest, InvoiceRequest,
};
use super::parameter::{
    NativePaymentResponse, NativePaymentSubmission, NativePaymentTarget, ParameterSpecification,
};
use super::payment_method::{PaymentMethod, WalletMethod};
use crate::error::Failure;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type ServiceResult<T> = Result<T, Failure>;

/// Backend operations on invoices and native alternative payments.
///
/// Every collaborator call receives the cancellation token of the operation
/// it belongs to and should return promptly once it fires.
#[async_trait]
pub trait InvoiceService: Send + Sync {
    async fn fetch_invoice(
        &self,
        request: &InvoiceRequest,
        cancel: &CancellationToken,
    ) -> ServiceResult<Invoice>;

    async fn authorize_invoice(
        &self,
        request: InvoiceAuthorizationRequest,
        customer_actions: &dyn CustomerActionHandler,
        cancel: &CancellationToken,
    ) -> ServiceResult<()>;

    /// Returns the current step of a native alternative payment.
    async fn native_alternative_payment(
        &self,
        target: &NativePaymentTarget,
        cancel: &CancellationToken,
    ) -> ServiceResult<NativePaymentResponse>;

    async fn initiate_native_alternative_payment(
        &self,
        submission: NativePaymentSubmission,
        cancel: &CancellationToken,
    ) -> ServiceResult<NativePaymentResponse>;

    /// Asks whether the payment was captured. A `pending` answer means the
    /// caller should ask again later.
    async fn capture_native_alternative_payment(
        &self,
        target: &NativePaymentTarget,
        cancel: &CancellationToken,
    ) -> ServiceResult<NativePaymentResponse>;
}

#[async_trait]
pub trait CardService: Send + Sync {
    async fn tokenize(
        &self,
        request: CardTokenizationRequest,
        cancel: &CancellationToken,
    ) -> ServiceResult<Card>;

    /// Best-effort issuer lookup by IIN.
    async fn lookup_issuer(
        &self,
        iin: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<IssuerInformation>;
}

#[async_trait]
pub trait AlternativePaymentAuthenticator: Send + Sync {
    /// Drives the customer through `redirect_url` and returns the gateway token.
    async fn authenticate(
        &self,
        redirect_url: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<String>;
}

#[async_trait]
pub trait WalletService: Send + Sync {
    fn can_make_payments(&self, method: &WalletMethod) -> bool;

    /// Presents the wallet sheet and tokenizes the authorized payment,
    /// returning the payment source to authorize the invoice with.
    async fn tokenize(
        &self,
        method: &WalletMethod,
        invoice: &Invoice,
        cancel: &CancellationToken,
    ) -> ServiceResult<String>;
}

/// Resolves additional customer actions (3-D Secure and alike) requested
/// during invoice authorization.
#[async_trait]
pub trait CustomerActionHandler: Send + Sync {
    async fn handle(&self, action: CustomerAction, cancel: &CancellationToken)
    -> ServiceResult<String>;
}

/// Hooks the hosting application implements to steer a checkout.
///
/// Every method has a default so callers only override what they need.
#[async_trait]
pub trait CheckoutDelegate: Send + Sync {
    fn on_event(&self, _event: &CheckoutEvent) {}

    /// Whether the checkout may recover from `failure` instead of ending.
    fn should_continue_after_failure(&self, _failure: &Failure) -> bool {
        true
    }

    /// Scheme to process a card with once its issuer is known.
    fn preferred_scheme(&self, issuer: &IssuerInformation) -> Option<CardScheme> {
        Some(issuer.scheme)
    }

    /// Supplies a replacement invoice when the current one can no longer be used.
    async fn new_invoice(
        &self,
        _current: &Invoice,
        _reason: &InvalidationReason,
    ) -> Option<InvoiceRequest> {
        None
    }

    /// Default values for dynamic parameters, keyed by parameter key.
    async fn default_values(
        &self,
        _payment_method_id: &str,
        _parameters: &[ParameterSpecification],
    ) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Last chance to amend an authorization request before it is sent.
    async fn will_authorize_invoice(
        &self,
        _request: &mut InvoiceAuthorizationRequest,
        _payment_method: &PaymentMethod,
    ) {
    }
}

/// Delegate that accepts every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCheckoutDelegate;

#[async_trait]
impl CheckoutDelegate for DefaultCheckoutDelegate {}

/// Customer action handler for integrations without 3-D Secure support.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedCustomerActions;

#[async_trait]
impl CustomerActionHandler for UnsupportedCustomerActions {
    async fn handle(
        &self,
        action: CustomerAction,
        _cancel: &CancellationToken,
    ) -> ServiceResult<String> {
        Err(Failure::generic(format!(
            "Customer action '{}' is not supported.",
            action.kind
        )))
    }
}

pub type InvoiceServiceRef = Arc<dyn InvoiceService>;
pub type CardServiceRef = Arc<dyn CardService>;
pub type AuthenticatorRef = Arc<dyn AlternativePaymentAuthenticator>;
pub type WalletServiceRef = Arc<dyn WalletService>;
pub type CustomerActionHandlerRef = Arc<dyn CustomerActionHandler>;
pub type CheckoutDelegateRef = Arc<dyn CheckoutDelegate>;
