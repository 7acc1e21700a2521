mod common;

use checkout_flow::application::card::{CardCollectionState, CardCommand};
use checkout_flow::application::checkout::{CheckoutState, PaymentStage};
use checkout_flow::application::native_apm::NativeAlternativePaymentCommand;
use checkout_flow::domain::event::{CheckoutEvent, NativeAlternativePaymentEvent};
use checkout_flow::domain::invoice::{CustomerAction, InvalidationReason, InvoiceRequest};
use checkout_flow::domain::parameter::{NativePaymentStatus, ParameterSpecification, ParameterType};
use checkout_flow::error::{CheckoutError, Failure, FailureKind};
use checkout_flow::infrastructure::in_memory::{
    ApprovingCustomerActions, InMemoryCardService, InMemoryInvoiceService, InMemoryWalletService,
    RecordingCheckoutDelegate,
};
use common::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_single_card_method_starts_without_selection() {
    let invoices = InMemoryInvoiceService::new().with_invoice(invoice("inv_1", vec![card("card")]));
    let delegate = RecordingCheckoutDelegate::new();
    let mut configuration = configuration("inv_1");
    configuration.allows_skipping_payment_list = true;
    let handle = spawn(configuration, services(&invoices, &InMemoryCardService::new()), &delegate);

    handle.start().unwrap();
    let state = reach(&handle, |state| matches!(state, CheckoutState::PaymentProcessing(_))).await;

    let CheckoutState::PaymentProcessing(processing) = state else {
        unreachable!();
    };
    assert_eq!(processing.payment_method, card("card"));
    assert!(matches!(
        processing.stage,
        PaymentStage::Card(CardCollectionState::Started(_))
    ));
    assert!(
        !delegate
            .events()
            .iter()
            .any(|event| matches!(event, CheckoutEvent::DidSelectPaymentMethod(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_required_email_fails_locally() {
    let email = ParameterSpecification::new("email", ParameterType::Email).required();
    let invoices = InMemoryInvoiceService::new()
        .with_invoice(invoice("inv_1", vec![native("napm")]))
        .with_native_step(Ok(response(NativePaymentStatus::NextStepRequired, vec![email])));
    let delegate = RecordingCheckoutDelegate::new();
    let handle = spawn(
        configuration("inv_1"),
        services(&invoices, &InMemoryCardService::new()),
        &delegate,
    );
    started(&handle).await;

    handle.start_payment("napm").unwrap();
    reach(&handle, |state| native_form(state).is_some()).await;
    handle
        .native_alternative_payment(NativeAlternativePaymentCommand::Submit)
        .unwrap();
    let state = reach(&handle, |state| {
        native_form(state).is_some_and(|form| form.has_errors())
    })
    .await;

    let form = native_form(&state).unwrap();
    assert!(form.parameters["email"].value.error.is_some());
    let failure = delegate
        .events()
        .into_iter()
        .find_map(|event| match event {
            CheckoutEvent::NativeAlternativePayment(
                NativeAlternativePaymentEvent::DidFailToSubmitParameters(failure),
            ) => Some(failure),
            _ => None,
        })
        .expect("validation failure was reported");
    assert_eq!(failure.kind(), FailureKind::Validation);
    assert_eq!(failure.invalid_fields[0].name, "email");
    assert!(invoices.submissions().is_empty());

    // Outstanding errors make the next submit a no-op.
    handle
        .native_alternative_payment(NativeAlternativePaymentCommand::Submit)
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(invoices.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_declined_payment_reuses_invoice() {
    let invoices = InMemoryInvoiceService::new().with_invoice(invoice("inv_1", vec![card("card")]));
    let cards = InMemoryCardService::new()
        .failing_tokenization(Failure::new("gateway.declined", Some("Declined".to_string())));
    let delegate = RecordingCheckoutDelegate::new();
    let handle = spawn(configuration("inv_1"), services(&invoices, &cards), &delegate);
    started(&handle).await;

    handle.start_payment("card").unwrap();
    fill_valid_card(&handle);
    handle.card(CardCommand::Tokenize).unwrap();
    let state = reach(&handle, |state| matches!(state, CheckoutState::Selected(_))).await;

    let CheckoutState::Selected(selected) = state else {
        unreachable!();
    };
    assert_eq!(selected.payment_method_id, "card");
    assert_eq!(selected.snapshot.invoice.id, "inv_1");
    assert!(selected.snapshot.recent_error_description.is_some());
    assert_eq!(invoices.fetched_invoices(), vec!["inv_1".to_string()]);
    assert!(delegate.invalidations().is_empty());
    assert!(delegate.events().contains(&CheckoutEvent::WillRestart {
        invalidates_invoice: false
    }));
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_fetches_replacement_invoice() {
    let invoices = InMemoryInvoiceService::new()
        .with_invoice(invoice("inv_1", vec![card("card")]))
        .with_invoice(invoice("inv_2", vec![card("card")]))
        .with_authorization_result(Err(Failure::new("request.validation.invalid-amount", None)));
    let delegate = RecordingCheckoutDelegate::new().with_new_invoice(InvoiceRequest::new("inv_2"));
    let handle = spawn(
        configuration("inv_1"),
        services(&invoices, &InMemoryCardService::new()),
        &delegate,
    );
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle
        .observe(move |state: &CheckoutState| sink.lock().unwrap().push(state.name()))
        .await
        .unwrap();
    started(&handle).await;

    handle.start_payment("card").unwrap();
    fill_valid_card(&handle);
    handle.card(CardCommand::Tokenize).unwrap();
    let state = reach(&handle, |state| matches!(state, CheckoutState::Selected(_))).await;

    let CheckoutState::Selected(selected) = state else {
        unreachable!();
    };
    assert_eq!(selected.snapshot.invoice.id, "inv_2");
    assert_eq!(
        invoices.fetched_invoices(),
        vec!["inv_1".to_string(), "inv_2".to_string()]
    );
    assert!(matches!(
        delegate.invalidations().as_slice(),
        [InvalidationReason::Failure(failure)] if failure.code.as_str() == "request.validation.invalid-amount"
    ));
    let seen = seen.lock().unwrap();
    let restart = seen.iter().position(|name| *name == "restarting").unwrap();
    assert_eq!(&seen[restart..], &["restarting", "started", "selected"]);
}

#[tokio::test(start_paused = true)]
async fn test_capture_timeout_is_not_cancellation() {
    let invoices = InMemoryInvoiceService::new()
        .with_invoice(invoice("inv_1", vec![native("napm")]))
        .with_native_step(Ok(response(NativePaymentStatus::Pending, Vec::new())));
    let delegate = RecordingCheckoutDelegate::new().stopping_after_failure();
    let mut configuration = configuration("inv_1");
    configuration.alternative_payment.timeout = Duration::from_secs(3);
    configuration.alternative_payment.poll_interval = Duration::from_secs(1);
    let handle = spawn(configuration, services(&invoices, &InMemoryCardService::new()), &delegate);
    started(&handle).await;

    handle.start_payment("napm").unwrap();
    let outcome = handle.outcome().await;

    let Err(CheckoutError::CheckoutFailed(failure)) = outcome else {
        panic!("expected a failed checkout, got {:?}", handle.state());
    };
    assert_eq!(failure.kind(), FailureKind::Timeout);
    assert!(!failure.is_cancellation());
    assert!(invoices.capture_attempts() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_capture_polling() {
    let invoices = InMemoryInvoiceService::new()
        .with_invoice(invoice("inv_1", vec![native("napm")]))
        .with_native_step(Ok(response(NativePaymentStatus::Pending, Vec::new())));
    let delegate = RecordingCheckoutDelegate::new();
    let handle = spawn(
        configuration("inv_1"),
        services(&invoices, &InMemoryCardService::new()),
        &delegate,
    );
    started(&handle).await;
    handle.start_payment("napm").unwrap();
    reach(&handle, |state| {
        matches!(state, CheckoutState::PaymentProcessing(processing) if processing.is_awaiting_native_capture)
    })
    .await;

    handle.cancel().unwrap();
    handle.cancel().unwrap();
    let state = reach(&handle, CheckoutState::is_sink).await;
    let attempts = invoices.capture_attempts();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(matches!(state, CheckoutState::Failure(ref failure) if failure.is_cancellation()));
    assert_eq!(handle.state(), state);
    assert_eq!(invoices.capture_attempts(), attempts);
    let terminal = delegate
        .events()
        .iter()
        .filter(|event| matches!(event, CheckoutEvent::DidFail(_) | CheckoutEvent::DidCompletePayment))
        .count();
    assert_eq!(terminal, 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_payment_during_processing_switches_method() {
    let invoices = InMemoryInvoiceService::new()
        .with_invoice(invoice("inv_1", vec![card("card"), apm("apm", false)]));
    let delegate = RecordingCheckoutDelegate::new();
    let handle = spawn(
        configuration("inv_1"),
        services(&invoices, &InMemoryCardService::new()),
        &delegate,
    );
    started(&handle).await;

    handle.start_payment("card").unwrap();
    handle.start_payment("apm").unwrap();
    handle.outcome().await.unwrap();

    assert_eq!(delegate.authorized_methods(), vec!["apm".to_string()]);
    assert_eq!(
        invoices.authorizations()[0].source,
        checkout_flow::infrastructure::in_memory::InMemoryAuthenticator::DEFAULT_TOKEN
    );
    assert_eq!(invoices.fetched_invoices(), vec!["inv_1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_saving_preference_reaches_authorization() {
    let invoices = InMemoryInvoiceService::new()
        .with_invoice(invoice("inv_1", vec![apm("apm", true), apm("plain", false)]));
    let delegate = RecordingCheckoutDelegate::new();
    let handle = spawn(
        configuration("inv_1"),
        services(&invoices, &InMemoryCardService::new()),
        &delegate,
    );
    started(&handle).await;

    handle.select("plain").unwrap();
    handle.set_should_save_payment_method(true).unwrap();
    let state = reach(&handle, |state| matches!(state, CheckoutState::Selected(_))).await;
    let CheckoutState::Selected(selected) = state else {
        unreachable!();
    };
    assert_eq!(selected.should_save_payment_method, None);

    handle.select("apm").unwrap();
    handle.set_should_save_payment_method(true).unwrap();
    reach(&handle, |state| {
        matches!(state, CheckoutState::Selected(selected) if selected.should_save_payment_method == Some(true))
    })
    .await;
    handle.start_payment("apm").unwrap();
    handle.outcome().await.unwrap();

    assert!(invoices.authorizations()[0].save_source);
}

#[tokio::test(start_paused = true)]
async fn test_wallet_and_customer_action() {
    let invoices = InMemoryInvoiceService::new()
        .with_invoice(invoice("inv_1", vec![wallet("wallet"), token("saved", "tok_1")]))
        .with_customer_action(CustomerAction {
            kind: "3ds".to_string(),
            value: "challenge".to_string(),
        });
    let actions = ApprovingCustomerActions::new();
    let delegate = RecordingCheckoutDelegate::new();
    let services = services(&invoices, &InMemoryCardService::new())
        .with_wallet(Arc::new(InMemoryWalletService::new()))
        .with_customer_actions(Arc::new(actions.clone()));
    let handle = spawn(configuration("inv_1"), services, &delegate);
    let state = started(&handle).await;
    let CheckoutState::Started(started) = state else {
        unreachable!();
    };
    assert_eq!(started.payment_methods.len(), 2);

    handle.start_payment("wallet").unwrap();
    handle.outcome().await.unwrap();

    assert_eq!(invoices.authorizations()[0].source, "wallet_token");
    assert_eq!(actions.handled().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_wallet_is_hidden() {
    let invoices = InMemoryInvoiceService::new()
        .with_invoice(invoice("inv_1", vec![wallet("wallet"), card("card")]));
    let delegate = RecordingCheckoutDelegate::new();
    let services = services(&invoices, &InMemoryCardService::new())
        .with_wallet(Arc::new(InMemoryWalletService::unavailable()));
    let handle = spawn(configuration("inv_1"), services, &delegate);

    let CheckoutState::Started(started) = started(&handle).await else {
        unreachable!();
    };
    assert_eq!(started.payment_methods, vec![card("card")]);
}

#[tokio::test(start_paused = true)]
async fn test_sink_state_ignores_later_commands() {
    let invoices = InMemoryInvoiceService::new().with_invoice(invoice("inv_1", vec![card("card")]));
    let delegate = RecordingCheckoutDelegate::new();
    let handle = spawn(
        configuration("inv_1"),
        services(&invoices, &InMemoryCardService::new()),
        &delegate,
    );
    started(&handle).await;
    handle.cancel().unwrap();
    reach(&handle, CheckoutState::is_sink).await;

    let transitions = Arc::new(std::sync::Mutex::new(0));
    let counter = transitions.clone();
    handle
        .observe(move |_: &CheckoutState| *counter.lock().unwrap() += 1)
        .await
        .unwrap();
    handle.start().unwrap();
    handle.select("card").unwrap();
    handle.start_payment("card").unwrap();
    handle.remove_customer_token("cust_1", "tok_1").unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(*transitions.lock().unwrap(), 0);
    assert!(matches!(handle.state(), CheckoutState::Failure(_)));
}

#[tokio::test(start_paused = true)]
async fn test_wallet_failure_ends_checkout_when_delegate_refuses() {
    let declined = Failure::new("gateway.declined", Some("Wallet declined".to_string()));
    let invoices = InMemoryInvoiceService::new()
        .with_invoice(invoice("inv_1", vec![wallet("wallet"), card("card")]));
    let delegate = RecordingCheckoutDelegate::new().stopping_after_failure();
    let services = services(&invoices, &InMemoryCardService::new())
        .with_wallet(Arc::new(InMemoryWalletService::failing(declined.clone())));
    let handle = spawn(configuration("inv_1"), services, &delegate);
    started(&handle).await;

    handle.start_payment("wallet").unwrap();
    let state = reach(&handle, CheckoutState::is_sink).await;

    assert_eq!(state, CheckoutState::Failure(declined.clone()));
    assert!(invoices.authorizations().is_empty());
    assert!(delegate.events().contains(&CheckoutEvent::DidFailPayment {
        payment_method: wallet("wallet"),
        failure: declined,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_payment_requested_during_restart_starts_on_new_invoice() {
    let invoices = InMemoryInvoiceService::new()
        .with_invoice(invoice("inv_1", vec![card("card"), apm("apm", false)]))
        .with_invoice(invoice("inv_2", vec![card("card"), apm("apm", false)]))
        .with_latency(Duration::from_millis(200));
    let delegate = RecordingCheckoutDelegate::new().with_new_invoice(InvoiceRequest::new("inv_2"));
    let handle = spawn(
        configuration("inv_1"),
        services(&invoices, &InMemoryCardService::new()),
        &delegate,
    );
    started(&handle).await;

    handle.start_payment("apm").unwrap();
    handle.select("card").unwrap();
    handle.start_payment("card").unwrap();
    let state = reach(&handle, |state| {
        matches!(state, CheckoutState::Restarting(restarting)
            if restarting.pending.as_ref().is_some_and(|pending| pending.should_start))
    })
    .await;
    let CheckoutState::Restarting(restarting) = state else {
        unreachable!();
    };
    assert_eq!(restarting.pending.unwrap().payment_method_id, "card");

    let state = reach(&handle, |state| {
        matches!(state, CheckoutState::PaymentProcessing(processing)
            if processing.snapshot.invoice.id == "inv_2")
    })
    .await;
    let CheckoutState::PaymentProcessing(processing) = state else {
        unreachable!();
    };
    assert_eq!(processing.payment_method, card("card"));
    assert!(processing.snapshot.recent_error_description.is_none());
    assert_eq!(
        delegate.invalidations(),
        vec![InvalidationReason::PaymentMethodChanged]
    );
    assert!(invoices.authorizations().is_empty());
}
