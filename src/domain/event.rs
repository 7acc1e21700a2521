use crate::domain::payment_method::PaymentMethod;
use crate::error::Failure;

/// Notifications emitted by the checkout orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutEvent {
    WillStart,
    DidStart,
    WillSelectPaymentMethod(PaymentMethod),
    DidSelectPaymentMethod(PaymentMethod),
    WillStartPayment(PaymentMethod),
    DidFailPayment {
        payment_method: PaymentMethod,
        failure: Failure,
    },
    WillRestart {
        invalidates_invoice: bool,
    },
    DidCompletePayment,
    DidFail(Failure),
    CardCollection(CardCollectionEvent),
    NativeAlternativePayment(NativeAlternativePaymentEvent),
}

/// Notifications emitted by the card collection sub-flow.
#[derive(Debug, Clone, PartialEq)]
pub enum CardCollectionEvent {
    DidStart,
    ParametersChanged,
    WillTokenize,
    DidTokenize,
    DidFail(Failure),
}

/// Notifications emitted by the native alternative payment sub-flow.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeAlternativePaymentEvent {
    WillStart,
    DidStart,
    ParametersChanged,
    WillSubmitParameters,
    DidSubmitParameters { additional_parameters_expected: bool },
    DidFailToSubmitParameters(Failure),
    WillWaitForPaymentConfirmation,
    DidConfirmPayment,
    DidCompletePayment,
    DidFail(Failure),
}
