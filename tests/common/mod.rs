#![allow(dead_code)]

use checkout_flow::application::card::{CardCommand, CardFieldId};
use checkout_flow::application::checkout::{
    CheckoutHandle, CheckoutOrchestrator, CheckoutServices, CheckoutState, PaymentStage,
};
use checkout_flow::application::native_apm::{
    NativeAlternativePaymentStarted, NativeAlternativePaymentState,
};
use checkout_flow::config::CheckoutConfiguration;
use checkout_flow::domain::invoice::{Invoice, InvoiceRequest, InvoiceTransaction, TransactionStatus};
use checkout_flow::domain::parameter::{
    NativePaymentElement, NativePaymentResponse, NativePaymentStatus, ParameterSpecification,
};
use checkout_flow::domain::payment_method::{
    AlternativePaymentConfiguration, AlternativePaymentMethod, CardMethod,
    CardMethodConfiguration, CustomerTokenConfiguration, CustomerTokenMethod,
    NativeAlternativePaymentMethod, NativeAlternativePaymentMethodConfiguration, PaymentMethod,
    WalletConfiguration, WalletMethod,
};
use checkout_flow::infrastructure::in_memory::{
    InMemoryAuthenticator, InMemoryCardService, InMemoryInvoiceService,
    RecordingCheckoutDelegate,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

pub fn invoice(id: &str, payment_methods: Vec<PaymentMethod>) -> Invoice {
    Invoice {
        id: id.to_string(),
        amount: dec!(42.50),
        currency: "EUR".to_string(),
        payment_methods,
        transaction: Some(InvoiceTransaction {
            status: TransactionStatus::Waiting,
        }),
        customer_id: Some("cust_1".to_string()),
        return_url: None,
    }
}

pub fn card(id: &str) -> PaymentMethod {
    PaymentMethod::Card(CardMethod {
        id: id.to_string(),
        configuration: CardMethodConfiguration::default(),
    })
}

pub fn apm(id: &str, saving_allowed: bool) -> PaymentMethod {
    PaymentMethod::AlternativePayment(AlternativePaymentMethod {
        id: id.to_string(),
        configuration: AlternativePaymentConfiguration {
            gateway_configuration_id: format!("gway_conf_{id}"),
            redirect_url: format!("https://pay.example.com/{id}"),
            saving_allowed,
        },
    })
}

pub fn native(id: &str) -> PaymentMethod {
    PaymentMethod::NativeAlternativePayment(NativeAlternativePaymentMethod {
        id: id.to_string(),
        configuration: NativeAlternativePaymentMethodConfiguration {
            gateway_configuration_id: format!("gway_conf_{id}"),
        },
    })
}

pub fn wallet(id: &str) -> PaymentMethod {
    PaymentMethod::Wallet(WalletMethod {
        id: id.to_string(),
        configuration: WalletConfiguration {
            merchant_id: "merchant.com.example".to_string(),
            country_code: "FR".to_string(),
            supported_networks: vec!["visa".to_string()],
        },
    })
}

pub fn token(id: &str, token_id: &str) -> PaymentMethod {
    PaymentMethod::CustomerToken(CustomerTokenMethod {
        id: id.to_string(),
        configuration: CustomerTokenConfiguration {
            customer_token_id: token_id.to_string(),
            redirect_url: None,
            deleting_allowed: true,
        },
    })
}

pub fn response(status: NativePaymentStatus, parameters: Vec<ParameterSpecification>) -> NativePaymentResponse {
    let elements = if parameters.is_empty() {
        Vec::new()
    } else {
        vec![NativePaymentElement::Form {
            label: None,
            parameters,
        }]
    };
    NativePaymentResponse {
        status,
        elements,
        redirect: None,
    }
}

pub fn configuration(invoice_id: &str) -> CheckoutConfiguration {
    CheckoutConfiguration::new(InvoiceRequest::new(invoice_id))
}

pub fn services(invoices: &InMemoryInvoiceService, cards: &InMemoryCardService) -> CheckoutServices {
    CheckoutServices::new(
        Arc::new(invoices.clone()),
        Arc::new(cards.clone()),
        Arc::new(InMemoryAuthenticator::new()),
    )
}

pub fn spawn(
    configuration: CheckoutConfiguration,
    services: CheckoutServices,
    delegate: &RecordingCheckoutDelegate,
) -> CheckoutHandle {
    let orchestrator = CheckoutOrchestrator::new(configuration, services, Arc::new(delegate.clone()));
    let (handle, _task) = CheckoutHandle::spawn(orchestrator);
    handle
}

/// Waits for a matching state, failing the test instead of hanging.
pub async fn reach(
    handle: &CheckoutHandle,
    predicate: impl FnMut(&CheckoutState) -> bool,
) -> CheckoutState {
    tokio::time::timeout(Duration::from_secs(3600), handle.wait_for(predicate))
        .await
        .expect("checkout did not reach the expected state")
        .expect("checkout stopped")
}

pub async fn started(handle: &CheckoutHandle) -> CheckoutState {
    handle.start().unwrap();
    reach(handle, |state| matches!(state, CheckoutState::Started(_))).await
}

pub fn fill_valid_card(handle: &CheckoutHandle) {
    for (field, value) in [
        (CardFieldId::Number, "4242424242424242"),
        (CardFieldId::Expiration, "1230"),
        (CardFieldId::Cvc, "123"),
    ] {
        handle
            .card(CardCommand::Update {
                field,
                value: value.to_string(),
            })
            .unwrap();
    }
}

pub fn native_stage(state: &CheckoutState) -> Option<&NativeAlternativePaymentState> {
    match state {
        CheckoutState::PaymentProcessing(processing) => match &processing.stage {
            PaymentStage::NativeAlternativePayment(native) => Some(native),
            _ => None,
        },
        _ => None,
    }
}

pub fn native_form(state: &CheckoutState) -> Option<&NativeAlternativePaymentStarted> {
    match native_stage(state) {
        Some(NativeAlternativePaymentState::Started(started)) => Some(started),
        _ => None,
    }
}
