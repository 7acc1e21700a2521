//! Payment paths that run underneath the orchestrator: invoice
//! authorization, the inline wallet / redirect / customer token payments and
//! the adapters that connect sub-flows to the checkout delegate.

use super::state::CheckoutMessage;
use crate::application::card::CardCollectionDelegate;
use crate::application::native_apm::NativeAlternativePaymentDelegate;
use crate::application::observer::Dispatch;
use crate::domain::card::{Card, CardScheme, IssuerInformation};
use crate::domain::event::{CardCollectionEvent, CheckoutEvent, NativeAlternativePaymentEvent};
use crate::domain::invoice::{Invoice, InvoiceAuthorizationRequest};
use crate::domain::parameter::ParameterSpecification;
use crate::domain::payment_method::PaymentMethod;
use crate::domain::ports::{
    AuthenticatorRef, CheckoutDelegateRef, CustomerActionHandlerRef, InvoiceServiceRef,
    WalletServiceRef,
};
use crate::error::Failure;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Authorizes one invoice with a payment source on behalf of one method.
#[derive(Clone)]
pub(crate) struct PaymentAuthorizer {
    pub invoices: InvoiceServiceRef,
    pub customer_actions: CustomerActionHandlerRef,
    pub delegate: CheckoutDelegateRef,
    pub invoice_id: String,
    pub client_secret: Option<String>,
    pub payment_method: PaymentMethod,
}

impl PaymentAuthorizer {
    pub async fn authorize(
        &self,
        source: String,
        save_source: bool,
        cancel: &CancellationToken,
    ) -> Result<(), Failure> {
        let mut request = InvoiceAuthorizationRequest::new(&self.invoice_id, source);
        request.save_source = save_source;
        request.client_secret = self.client_secret.clone();
        self.delegate
            .will_authorize_invoice(&mut request, &self.payment_method)
            .await;
        info!(
            invoice_id = %self.invoice_id,
            method_id = self.payment_method.id(),
            "Authorizing invoice"
        );
        self.invoices
            .authorize_invoice(request, self.customer_actions.as_ref(), cancel)
            .await
    }
}

/// Wallet, redirect and customer token payments: obtain a payment source,
/// then authorize the invoice with it.
pub(crate) struct InlinePayment {
    pub authorizer: PaymentAuthorizer,
    pub authenticator: AuthenticatorRef,
    pub wallet: Option<WalletServiceRef>,
    pub invoice: Invoice,
    pub save_source: bool,
    pub dispatch: Dispatch<CheckoutMessage>,
    pub attempt: u64,
}

impl InlinePayment {
    pub async fn run(self, cancel: &CancellationToken) -> Result<(), Failure> {
        let source = match &self.authorizer.payment_method {
            PaymentMethod::Wallet(method) => {
                let wallet = self
                    .wallet
                    .as_ref()
                    .ok_or_else(|| Failure::generic("Wallet payments are not available."))?;
                let source = wallet.tokenize(method, &self.invoice, cancel).await?;
                self.mutated();
                source
            }
            PaymentMethod::AlternativePayment(method) => {
                self.authenticator
                    .authenticate(&method.configuration.redirect_url, cancel)
                    .await?
            }
            PaymentMethod::CustomerToken(method) => {
                if let Some(redirect_url) = &method.configuration.redirect_url {
                    debug!("Customer token requires authentication");
                    self.authenticator.authenticate(redirect_url, cancel).await?;
                }
                method.configuration.customer_token_id.clone()
            }
            other => {
                return Err(Failure::generic(format!(
                    "Payment method '{}' can't be authorized directly.",
                    other.kind()
                )));
            }
        };
        self.authorizer
            .authorize(source, self.save_source, cancel)
            .await
    }

    fn mutated(&self) {
        (self.dispatch)(CheckoutMessage::PaymentMutated {
            attempt: self.attempt,
        });
    }
}

/// Connects a card collection to the checkout: forwards events and hooks to
/// the checkout delegate and authorizes the invoice with the tokenized card.
pub(crate) struct CardPaymentDelegate {
    pub delegate: CheckoutDelegateRef,
    pub authorizer: PaymentAuthorizer,
    pub dispatch: Dispatch<CheckoutMessage>,
    pub attempt: u64,
    pub authorization_attempted: AtomicBool,
}

#[async_trait]
impl CardCollectionDelegate for CardPaymentDelegate {
    fn on_event(&self, event: CardCollectionEvent) {
        self.delegate.on_event(&CheckoutEvent::CardCollection(event));
    }

    fn preferred_scheme(&self, issuer: &IssuerInformation) -> Option<CardScheme> {
        self.delegate.preferred_scheme(issuer)
    }

    /// Once the invoice authorization was attempted the card can't simply be
    /// corrected and resubmitted.
    fn should_continue_after_failure(&self, failure: &Failure) -> bool {
        !self.authorization_attempted.load(Ordering::SeqCst)
            && self.delegate.should_continue_after_failure(failure)
    }

    async fn process_tokenized_card(
        &self,
        card: &Card,
        should_save: bool,
        cancel: &CancellationToken,
    ) -> Result<(), Failure> {
        self.authorization_attempted.store(true, Ordering::SeqCst);
        (self.dispatch)(CheckoutMessage::PaymentMutated {
            attempt: self.attempt,
        });
        self.authorizer
            .authorize(card.id.clone(), should_save, cancel)
            .await
    }
}

pub(crate) struct NativePaymentDelegate {
    pub delegate: CheckoutDelegateRef,
    pub payment_method_id: String,
}

#[async_trait]
impl NativeAlternativePaymentDelegate for NativePaymentDelegate {
    fn on_event(&self, event: NativeAlternativePaymentEvent) {
        self.delegate
            .on_event(&CheckoutEvent::NativeAlternativePayment(event));
    }

    async fn default_values(
        &self,
        parameters: &[ParameterSpecification],
    ) -> HashMap<String, String> {
        self.delegate
            .default_values(&self.payment_method_id, parameters)
            .await
    }
}
