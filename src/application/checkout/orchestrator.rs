use super::payment::{CardPaymentDelegate, InlinePayment, NativePaymentDelegate, PaymentAuthorizer};
use super::state::{
    CheckoutCommand, CheckoutMessage, CheckoutSelected, CheckoutStarted, CheckoutState,
    PaymentProcessing, PaymentStage, PendingSelection, Restarting,
};
use crate::application::card::{CardCollectionState, CardCommand, CardCollectionSubflow};
use crate::application::native_apm::{
    NativeAlternativePaymentCommand, NativeAlternativePaymentServices,
    NativeAlternativePaymentState, NativeAlternativePaymentSubflow,
};
use crate::application::observer::{
    Dispatch, Observable, ObserverId, channel_dispatch, map_dispatch,
};
use crate::application::restart_policy;
use crate::config::CheckoutConfiguration;
use crate::domain::event::CheckoutEvent;
use crate::domain::invoice::{InvalidationReason, Invoice, TransactionStatus};
use crate::domain::parameter::NativePaymentTarget;
use crate::domain::payment_method::{CardMethod, NativeAlternativePaymentMethod, PaymentMethod};
use crate::domain::ports::{
    AuthenticatorRef, CardServiceRef, CheckoutDelegateRef, CustomerActionHandlerRef,
    InvoiceServiceRef, UnsupportedCustomerActions, WalletServiceRef,
};
use crate::error::Failure;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const METHODS_UNAVAILABLE: &str = "Payment methods are not available.";
const METHOD_UNAVAILABLE: &str = "The selected payment method is no longer available.";
const RESTART_MESSAGE: &str = "Payment could not be completed, please try again.";
const UNSUPPORTED_INVOICE: &str = "Invoice can't be paid in its current state.";
const MISSING_INVOICE: &str = "Checkout can't continue without a new invoice.";

pub type CheckoutCompletion = Box<dyn FnOnce(Result<(), Failure>) + Send>;

/// Collaborators a checkout talks to.
#[derive(Clone)]
pub struct CheckoutServices {
    pub invoices: InvoiceServiceRef,
    pub cards: CardServiceRef,
    pub authenticator: AuthenticatorRef,
    /// Wallet methods are hidden when absent.
    pub wallet: Option<WalletServiceRef>,
    pub customer_actions: CustomerActionHandlerRef,
}

impl CheckoutServices {
    pub fn new(
        invoices: InvoiceServiceRef,
        cards: CardServiceRef,
        authenticator: AuthenticatorRef,
    ) -> Self {
        Self {
            invoices,
            cards,
            authenticator,
            wallet: None,
            customer_actions: Arc::new(UnsupportedCustomerActions),
        }
    }

    pub fn with_wallet(mut self, wallet: WalletServiceRef) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_customer_actions(mut self, customer_actions: CustomerActionHandlerRef) -> Self {
        self.customer_actions = customer_actions;
        self
    }
}

/// The payment currently running, owned exclusively by the orchestrator.
enum ActivePayment {
    None,
    Card(CardCollectionSubflow),
    NativeAlternativePayment(NativeAlternativePaymentSubflow),
    Task(CancellationToken),
}

enum InvoiceReadiness {
    Payable,
    Paid,
    Unsupported,
}

fn readiness(invoice: &Invoice) -> InvoiceReadiness {
    match invoice.transaction_status() {
        Some(TransactionStatus::Waiting) => InvoiceReadiness::Payable,
        Some(TransactionStatus::Authorized | TransactionStatus::Completed) => InvoiceReadiness::Paid,
        _ => InvoiceReadiness::Unsupported,
    }
}

enum Input {
    Message(CheckoutMessage),
    Command(Option<CheckoutCommand>),
}

/// Walks a customer through paying an invoice.
///
/// The orchestrator lists the invoice's payment methods, runs the selected
/// one and restarts on recoverable failures, possibly on a replacement
/// invoice. All state lives in `&mut self`; background work reports back
/// through an internal mailbox that [`CheckoutOrchestrator::run`] (or
/// [`CheckoutOrchestrator::process_pending`]) drains, so state mutations
/// never interleave. Exactly one of [`CheckoutState::Success`] and
/// [`CheckoutState::Failure`] is ever reached.
pub struct CheckoutOrchestrator {
    configuration: CheckoutConfiguration,
    services: CheckoutServices,
    delegate: CheckoutDelegateRef,
    state: Observable<CheckoutState>,
    dispatch: Dispatch<CheckoutMessage>,
    mailbox: mpsc::UnboundedReceiver<CheckoutMessage>,
    root: CancellationToken,
    active: ActivePayment,
    attempt: u64,
    completion: Option<CheckoutCompletion>,
}

impl CheckoutOrchestrator {
    /// Creates an idle checkout.
    ///
    /// # Arguments
    ///
    /// * `configuration` - Invoice to pay and behaviour switches.
    /// * `services` - Backend collaborators.
    /// * `delegate` - Hooks of the hosting application.
    pub fn new(
        configuration: CheckoutConfiguration,
        services: CheckoutServices,
        delegate: CheckoutDelegateRef,
    ) -> Self {
        let (dispatch, mailbox) = channel_dispatch();
        Self {
            configuration,
            services,
            delegate,
            state: Observable::new(CheckoutState::Idle),
            dispatch,
            mailbox,
            root: CancellationToken::new(),
            active: ActivePayment::None,
            attempt: 0,
            completion: None,
        }
    }

    /// Registers the callback fired once with the final outcome.
    pub fn with_completion(mut self, completion: CheckoutCompletion) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn state(&self) -> &CheckoutState {
        self.state.get()
    }

    pub fn observe(&mut self, observer: impl FnMut(&CheckoutState) + Send + 'static) -> ObserverId {
        self.state.observe(observer)
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.state.unobserve(id)
    }

    /// Processes messages and commands until every command sender is gone.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<CheckoutCommand>) {
        loop {
            let input = tokio::select! {
                biased;
                Some(message) = self.mailbox.recv() => Input::Message(message),
                command = commands.recv() => Input::Command(command),
            };
            match input {
                Input::Message(message) => self.handle(message),
                Input::Command(Some(command)) => self.execute(command),
                Input::Command(None) => break,
            }
        }
        debug!(state = self.state().name(), "Checkout commands closed, stopping");
    }

    /// Applies every message that is already waiting; returns how many.
    pub fn process_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(message) = self.mailbox.try_recv() {
            self.handle(message);
            processed += 1;
        }
        processed
    }

    pub fn execute(&mut self, command: CheckoutCommand) {
        match command {
            CheckoutCommand::Start => self.start(),
            CheckoutCommand::Select(id) => self.select(&id),
            CheckoutCommand::StartPayment(id) => self.start_payment(&id),
            CheckoutCommand::Cancel => self.cancel(),
            CheckoutCommand::SetShouldSavePaymentMethod(should_save) => {
                self.set_should_save_payment_method(should_save)
            }
            CheckoutCommand::RemoveCustomerToken {
                customer_id,
                token_id,
            } => self.remove_customer_token(&customer_id, &token_id),
            CheckoutCommand::Card(command) => self.card(command),
            CheckoutCommand::NativeAlternativePayment(command) => {
                self.native_alternative_payment(command)
            }
            CheckoutCommand::Observe(observer, reply) => {
                let _ = reply.send(self.state.observe(observer));
            }
            CheckoutCommand::Unobserve(id) => {
                self.state.unobserve(id);
            }
        }
    }

    /// Fetches the invoice. Ignored unless the checkout is idle.
    pub fn start(&mut self) {
        if !matches!(self.state(), CheckoutState::Idle) {
            debug!(state = self.state().name(), "Checkout already started, ignored");
            return;
        }
        let request = self.configuration.invoice_request.clone();
        info!(invoice_id = %request.invoice_id, "Starting checkout");
        self.delegate.on_event(&CheckoutEvent::WillStart);
        self.set_state(CheckoutState::Starting);

        let token = self.root.child_token();
        let invoices = self.services.invoices.clone();
        let cancel = token.clone();
        self.spawn(
            token,
            async move { invoices.fetch_invoice(&request, &cancel).await },
            CheckoutMessage::InvoiceFetched,
        );
    }

    /// Selects a method from the list. While restarting the selection is
    /// queued; while paying with another method it restarts and switches.
    pub fn select(&mut self, payment_method_id: &str) {
        match self.state() {
            CheckoutState::Started(_) | CheckoutState::Selected(_) => {
                self.select_method(payment_method_id, true)
            }
            CheckoutState::Restarting(_) => self.queue_pending(payment_method_id, false),
            CheckoutState::PaymentProcessing(processing)
                if processing.payment_method.id() != payment_method_id =>
            {
                self.restart(
                    None,
                    Some(PendingSelection {
                        payment_method_id: payment_method_id.to_string(),
                        should_start: false,
                    }),
                );
            }
            state => debug!(
                state = state.name(),
                method_id = payment_method_id,
                "Ignoring payment method selection"
            ),
        }
    }

    /// Starts paying with a method, selecting it first when needed.
    pub fn start_payment(&mut self, payment_method_id: &str) {
        match self.state() {
            CheckoutState::Started(_) | CheckoutState::Selected(_) => {
                self.begin_payment(payment_method_id)
            }
            CheckoutState::Restarting(_) => self.queue_pending(payment_method_id, true),
            CheckoutState::PaymentProcessing(processing)
                if processing.payment_method.id() != payment_method_id =>
            {
                self.restart(
                    None,
                    Some(PendingSelection {
                        payment_method_id: payment_method_id.to_string(),
                        should_start: true,
                    }),
                );
            }
            state => debug!(
                state = state.name(),
                method_id = payment_method_id,
                "Ignoring payment start"
            ),
        }
    }

    /// Ends the checkout with a cancellation failure. No-op once finished.
    pub fn cancel(&mut self) {
        if self.state().is_sink() {
            debug!("Checkout already finished, cancel ignored");
            return;
        }
        info!(state = self.state().name(), "Cancelling checkout");
        self.fail(Failure::cancelled());
    }

    pub fn set_should_save_payment_method(&mut self, should_save: bool) {
        match self.state() {
            CheckoutState::Selected(current)
                if current
                    .should_save_payment_method
                    .is_some_and(|saving| saving != should_save) =>
            {
                let mut selected = current.clone();
                selected.should_save_payment_method = Some(should_save);
                self.set_state(CheckoutState::Selected(selected));
            }
            state => debug!(state = state.name(), "Ignoring save payment method change"),
        }
    }

    /// Drops a customer token that was deleted elsewhere from the offered
    /// methods, clearing any selection that referred to it.
    pub fn remove_customer_token(&mut self, customer_id: &str, token_id: &str) {
        let Some(snapshot) = self.state().snapshot() else {
            debug!(state = self.state().name(), "No payment methods to update");
            return;
        };
        if snapshot.invoice.customer_id.as_deref() != Some(customer_id) {
            debug!(customer_id, "Customer token belongs to another customer, ignored");
            return;
        }
        let is_removed = |method: &PaymentMethod| {
            matches!(
                method,
                PaymentMethod::CustomerToken(token)
                    if token.configuration.customer_token_id == token_id
            )
        };
        if !snapshot.payment_methods.iter().any(is_removed) {
            debug!(token_id, "Customer token is not offered, ignored");
            return;
        }
        let prune = |snapshot: &mut CheckoutStarted| {
            snapshot.payment_methods.retain(|method| !is_removed(method));
            snapshot
                .invoice
                .payment_methods
                .retain(|method| !is_removed(method));
        };
        let state = match self.state().clone() {
            CheckoutState::Started(mut started) => {
                prune(&mut started);
                CheckoutState::Started(started)
            }
            CheckoutState::Selected(mut selected) => {
                prune(&mut selected.snapshot);
                if selected
                    .snapshot
                    .payment_method(&selected.payment_method_id)
                    .is_none()
                {
                    CheckoutState::Started(selected.snapshot)
                } else {
                    CheckoutState::Selected(selected)
                }
            }
            CheckoutState::PaymentProcessing(mut processing) => {
                prune(&mut processing.snapshot);
                CheckoutState::PaymentProcessing(processing)
            }
            CheckoutState::Restarting(mut restarting) => {
                prune(&mut restarting.snapshot);
                let pending_removed = restarting.pending.as_ref().is_some_and(|pending| {
                    restarting
                        .snapshot
                        .payment_method(&pending.payment_method_id)
                        .is_none()
                });
                if pending_removed {
                    restarting.pending = None;
                }
                CheckoutState::Restarting(restarting)
            }
            other => other,
        };
        info!(token_id, "Removed customer token");
        self.set_state(state);
    }

    /// Forwards a command to the card collection, if one is running.
    pub fn card(&mut self, command: CardCommand) {
        let ActivePayment::Card(subflow) = &mut self.active else {
            debug!(?command, "No card collection in progress");
            return;
        };
        subflow.execute(command);
        self.sync_processing();
    }

    /// Forwards a command to the native alternative payment, if one is running.
    pub fn native_alternative_payment(&mut self, command: NativeAlternativePaymentCommand) {
        let ActivePayment::NativeAlternativePayment(subflow) = &mut self.active else {
            debug!(?command, "No native alternative payment in progress");
            return;
        };
        subflow.execute(command);
        self.sync_processing();
    }

    /// Applies the result of background work. Results of an abandoned
    /// payment attempt are logged and dropped.
    pub fn handle(&mut self, message: CheckoutMessage) {
        if let Some(attempt) = message.attempt()
            && attempt != self.attempt
        {
            debug!(attempt, current = self.attempt, "Discarding message of an abandoned attempt");
            return;
        }
        match message {
            CheckoutMessage::InvoiceFetched(result) => self.did_fetch_invoice(result),
            CheckoutMessage::Card { message, .. } => {
                if let ActivePayment::Card(subflow) = &mut self.active {
                    subflow.handle(message);
                    self.sync_processing();
                }
            }
            CheckoutMessage::CardCompleted { result, .. } => {
                if let Ok(card) = &result {
                    debug!(card_id = %card.id, "Card payment authorized");
                }
                self.did_finish_payment(result.map(|_| ()))
            }
            CheckoutMessage::NativeAlternativePayment { message, .. } => {
                if let ActivePayment::NativeAlternativePayment(subflow) = &mut self.active {
                    subflow.handle(message);
                    self.sync_processing();
                }
            }
            CheckoutMessage::NativeAlternativePaymentCompleted { result, .. }
            | CheckoutMessage::PaymentFinished { result, .. } => self.did_finish_payment(result),
            CheckoutMessage::PaymentMutated { .. } => self.did_mutate_payment(),
            CheckoutMessage::RestartResolved { result, .. } => self.did_resolve_restart(result),
        }
    }

    fn did_fetch_invoice(&mut self, result: Result<Invoice, Failure>) {
        if !matches!(self.state(), CheckoutState::Starting) {
            debug!(state = self.state().name(), "Ignoring fetched invoice");
            return;
        }
        let invoice = match result {
            Ok(invoice) => invoice,
            Err(failure) => return self.fail(failure),
        };
        match readiness(&invoice) {
            InvoiceReadiness::Paid => {
                info!(invoice_id = %invoice.id, "Invoice is already paid");
                self.succeed();
            }
            InvoiceReadiness::Unsupported => {
                warn!(invoice_id = %invoice.id, status = ?invoice.transaction_status(), "Unsupported invoice");
                self.fail(Failure::generic(UNSUPPORTED_INVOICE));
            }
            InvoiceReadiness::Payable => {
                if self.enter_started(invoice, None) {
                    self.delegate.on_event(&CheckoutEvent::DidStart);
                    self.start_default_payment();
                }
            }
        }
    }

    /// Methods of `invoice` that can be used on this device.
    fn supported_methods(&self, invoice: &Invoice) -> Vec<PaymentMethod> {
        invoice
            .payment_methods
            .iter()
            .filter(|method| match method {
                PaymentMethod::Unknown { .. } => false,
                PaymentMethod::Wallet(wallet) => self
                    .services
                    .wallet
                    .as_ref()
                    .is_some_and(|service| service.can_make_payments(wallet)),
                _ => true,
            })
            .cloned()
            .collect()
    }

    fn enter_started(&mut self, invoice: Invoice, recent_error_description: Option<String>) -> bool {
        let payment_methods = self.supported_methods(&invoice);
        if payment_methods.is_empty() {
            self.fail(Failure::generic(METHODS_UNAVAILABLE));
            return false;
        }
        self.set_state(CheckoutState::Started(CheckoutStarted {
            invoice,
            payment_methods,
            is_cancellable: self.configuration.cancellable,
            recent_error_description,
        }));
        true
    }

    /// Skips the method list when the only method collects its own input.
    fn start_default_payment(&mut self) {
        let CheckoutState::Started(started) = self.state() else {
            return;
        };
        if !self.configuration.allows_skipping_payment_list {
            return;
        }
        let [method] = started.payment_methods.as_slice() else {
            return;
        };
        if matches!(
            method,
            PaymentMethod::Card(_) | PaymentMethod::NativeAlternativePayment(_)
        ) {
            let id = method.id().to_string();
            debug!(method_id = %id, "Skipping payment method list");
            self.begin_payment(&id);
        }
    }

    fn select_method(&mut self, payment_method_id: &str, clears_error: bool) {
        let (mut snapshot, current) = match self.state() {
            CheckoutState::Started(started) => (started.clone(), None),
            CheckoutState::Selected(selected) => (
                selected.snapshot.clone(),
                Some(selected.payment_method_id.as_str()),
            ),
            _ => return,
        };
        if current == Some(payment_method_id) {
            debug!(method_id = payment_method_id, "Payment method already selected");
            return;
        }
        let Some(method) = snapshot.payment_method(payment_method_id).cloned() else {
            warn!(method_id = payment_method_id, "Unknown payment method, selection ignored");
            return;
        };
        self.delegate
            .on_event(&CheckoutEvent::WillSelectPaymentMethod(method.clone()));
        if clears_error {
            snapshot.recent_error_description = None;
        }
        self.set_state(CheckoutState::Selected(CheckoutSelected {
            snapshot,
            payment_method_id: payment_method_id.to_string(),
            should_save_payment_method: method.supports_saving().then_some(false),
        }));
        self.delegate
            .on_event(&CheckoutEvent::DidSelectPaymentMethod(method));
    }

    fn queue_pending(&mut self, payment_method_id: &str, should_start: bool) {
        let CheckoutState::Restarting(current) = self.state() else {
            return;
        };
        let mut restarting = current.clone();
        restarting.pending = Some(PendingSelection {
            payment_method_id: payment_method_id.to_string(),
            should_start,
        });
        debug!(method_id = payment_method_id, should_start, "Queued payment method until restart completes");
        self.set_state(CheckoutState::Restarting(restarting));
    }

    fn begin_payment(&mut self, payment_method_id: &str) {
        let (snapshot, should_save) = match self.state() {
            CheckoutState::Started(started) => (started.clone(), false),
            CheckoutState::Selected(selected) => (
                selected.snapshot.clone(),
                selected.payment_method_id == payment_method_id
                    && selected.should_save_payment_method == Some(true),
            ),
            _ => return,
        };
        let Some(method) = snapshot.payment_method(payment_method_id).cloned() else {
            warn!(method_id = payment_method_id, "Unknown payment method, payment not started");
            return;
        };
        self.attempt += 1;
        info!(method_id = payment_method_id, attempt = self.attempt, "Starting payment");
        self.delegate
            .on_event(&CheckoutEvent::WillStartPayment(method.clone()));
        let processing = PaymentProcessing {
            snapshot,
            payment_method: method.clone(),
            stage: PaymentStage::Authorizing,
            should_save_payment_method: should_save,
            is_cancellable: false,
            is_ready: false,
            is_awaiting_native_capture: false,
            should_invalidate_invoice: false,
        };
        match &method {
            PaymentMethod::Card(card) => self.start_card_payment(processing, card),
            PaymentMethod::NativeAlternativePayment(native) => {
                self.start_native_payment(processing, native)
            }
            PaymentMethod::Wallet(_)
            | PaymentMethod::AlternativePayment(_)
            | PaymentMethod::CustomerToken(_) => self.start_inline_payment(processing),
            PaymentMethod::Unknown { kind, .. } => {
                warn!(kind = %kind, "Unsupported payment method");
                self.set_state(CheckoutState::PaymentProcessing(processing));
                self.did_fail_payment(Failure::generic("Payment method is not supported."));
            }
        }
    }

    fn authorizer(&self, processing: &PaymentProcessing) -> PaymentAuthorizer {
        PaymentAuthorizer {
            invoices: self.services.invoices.clone(),
            customer_actions: self.services.customer_actions.clone(),
            delegate: self.delegate.clone(),
            invoice_id: processing.snapshot.invoice.id.clone(),
            client_secret: self.configuration.invoice_request.client_secret.clone(),
            payment_method: processing.payment_method.clone(),
        }
    }

    fn start_card_payment(&mut self, processing: PaymentProcessing, method: &CardMethod) {
        let attempt = self.attempt;
        let delegate = CardPaymentDelegate {
            delegate: self.delegate.clone(),
            authorizer: self.authorizer(&processing),
            dispatch: self.dispatch.clone(),
            attempt,
            authorization_attempted: AtomicBool::new(false),
        };
        let completion_dispatch = self.dispatch.clone();
        let subflow = CardCollectionSubflow::new(
            method.configuration.clone(),
            self.configuration.card.clone(),
            self.services.cards.clone(),
            Arc::new(delegate),
            map_dispatch(self.dispatch.clone(), move |message| CheckoutMessage::Card {
                attempt,
                message,
            }),
            Box::new(move |result| {
                completion_dispatch(CheckoutMessage::CardCompleted { attempt, result })
            }),
        );
        self.set_state(CheckoutState::PaymentProcessing(PaymentProcessing {
            stage: PaymentStage::Card(CardCollectionState::Idle),
            ..processing
        }));
        self.active = ActivePayment::Card(subflow);
        if let ActivePayment::Card(subflow) = &mut self.active {
            subflow.start();
        }
        self.sync_processing();
    }

    fn start_native_payment(
        &mut self,
        processing: PaymentProcessing,
        method: &NativeAlternativePaymentMethod,
    ) {
        let attempt = self.attempt;
        let target = NativePaymentTarget {
            invoice_id: processing.snapshot.invoice.id.clone(),
            gateway_configuration_id: method.configuration.gateway_configuration_id.clone(),
        };
        let completion_dispatch = self.dispatch.clone();
        let subflow = NativeAlternativePaymentSubflow::new(
            target,
            self.configuration.alternative_payment.clone(),
            NativeAlternativePaymentServices {
                invoices: self.services.invoices.clone(),
                authenticator: self.services.authenticator.clone(),
            },
            Arc::new(NativePaymentDelegate {
                delegate: self.delegate.clone(),
                payment_method_id: method.id.clone(),
            }),
            map_dispatch(self.dispatch.clone(), move |message| {
                CheckoutMessage::NativeAlternativePayment { attempt, message }
            }),
            Box::new(move |result| {
                completion_dispatch(CheckoutMessage::NativeAlternativePaymentCompleted {
                    attempt,
                    result,
                })
            }),
        );
        self.set_state(CheckoutState::PaymentProcessing(PaymentProcessing {
            stage: PaymentStage::NativeAlternativePayment(NativeAlternativePaymentState::Idle),
            ..processing
        }));
        self.active = ActivePayment::NativeAlternativePayment(subflow);
        if let ActivePayment::NativeAlternativePayment(subflow) = &mut self.active {
            subflow.start();
        }
        self.sync_processing();
    }

    /// Wallet, redirect and customer token payments.
    fn start_inline_payment(&mut self, processing: PaymentProcessing) {
        let payment = InlinePayment {
            authorizer: self.authorizer(&processing),
            authenticator: self.services.authenticator.clone(),
            wallet: self.services.wallet.clone(),
            invoice: processing.snapshot.invoice.clone(),
            save_source: processing.should_save_payment_method,
            dispatch: self.dispatch.clone(),
            attempt: self.attempt,
        };
        // Wallet tokenization alone leaves the invoice untouched.
        let should_invalidate_invoice = !matches!(processing.payment_method, PaymentMethod::Wallet(_));
        self.set_state(CheckoutState::PaymentProcessing(PaymentProcessing {
            is_ready: true,
            is_cancellable: false,
            should_invalidate_invoice,
            ..processing
        }));

        let token = self.root.child_token();
        self.active = ActivePayment::Task(token.clone());
        let attempt = self.attempt;
        let cancel = token.clone();
        self.spawn(
            token,
            async move { payment.run(&cancel).await },
            move |result| CheckoutMessage::PaymentFinished { attempt, result },
        );
    }

    /// Mirrors the active sub-flow into the processing state.
    fn sync_processing(&mut self) {
        let CheckoutState::PaymentProcessing(current) = self.state() else {
            return;
        };
        let mut processing = current.clone();
        let cancellable = self.configuration.cancellable;
        match &self.active {
            ActivePayment::Card(subflow) => {
                let state = subflow.state();
                processing.is_ready = !matches!(state, CardCollectionState::Idle);
                processing.is_cancellable = cancellable
                    && !matches!(
                        state,
                        CardCollectionState::Tokenizing(_) | CardCollectionState::Tokenized { .. }
                    );
                processing.stage = PaymentStage::Card(state.clone());
            }
            ActivePayment::NativeAlternativePayment(subflow) => {
                let state = subflow.state();
                processing.is_ready = !matches!(
                    state,
                    NativeAlternativePaymentState::Idle | NativeAlternativePaymentState::Starting
                );
                processing.is_cancellable = cancellable && state.is_cancellable();
                processing.is_awaiting_native_capture =
                    matches!(state, NativeAlternativePaymentState::AwaitingCompletion(_));
                processing.should_invalidate_invoice |= matches!(
                    state,
                    NativeAlternativePaymentState::Submitting(_)
                        | NativeAlternativePaymentState::Redirecting { .. }
                        | NativeAlternativePaymentState::AwaitingCompletion(_)
                );
                processing.stage = PaymentStage::NativeAlternativePayment(state.clone());
            }
            ActivePayment::Task(_) | ActivePayment::None => {}
        }
        let changed = processing != *current;
        if changed {
            self.set_state(CheckoutState::PaymentProcessing(processing));
        }
    }

    fn did_mutate_payment(&mut self) {
        match self.state() {
            CheckoutState::PaymentProcessing(current) if !current.should_invalidate_invoice => {
                let mut processing = current.clone();
                processing.should_invalidate_invoice = true;
                self.set_state(CheckoutState::PaymentProcessing(processing));
            }
            _ => {}
        }
    }

    fn did_finish_payment(&mut self, result: Result<(), Failure>) {
        if !matches!(self.state(), CheckoutState::PaymentProcessing(_)) {
            if let Err(failure) = result {
                debug!(%failure, state = self.state().name(), "Discarding late payment failure");
            }
            return;
        }
        match result {
            Ok(()) => self.succeed(),
            Err(failure) => self.did_fail_payment(failure),
        }
    }

    fn did_fail_payment(&mut self, failure: Failure) {
        let CheckoutState::PaymentProcessing(processing) = self.state() else {
            return;
        };
        let payment_method = processing.payment_method.clone();
        warn!(%failure, method_id = payment_method.id(), "Payment failed");
        self.delegate.on_event(&CheckoutEvent::DidFailPayment {
            payment_method: payment_method.clone(),
            failure: failure.clone(),
        });
        if failure.is_cancellation() || !self.delegate.should_continue_after_failure(&failure) {
            self.fail(failure);
            return;
        }
        let pending = PendingSelection {
            payment_method_id: payment_method.id().to_string(),
            should_start: false,
        };
        self.restart(Some(failure), Some(pending));
    }

    /// Abandons the running payment and returns to the method list, on a
    /// replacement invoice when the invoice may no longer be usable.
    fn restart(&mut self, failure: Option<Failure>, pending: Option<PendingSelection>) {
        let CheckoutState::PaymentProcessing(processing) = self.state() else {
            return;
        };
        let processing = processing.clone();
        self.abort_payment();
        self.attempt += 1;

        let invalidates_invoice = match &failure {
            Some(failure) => restart_policy::should_invalidate_invoice(
                &failure.code,
                processing.should_invalidate_invoice,
            ),
            None => restart_policy::should_invalidate_on_switch(processing.should_invalidate_invoice),
        };
        info!(attempt = self.attempt, invalidates_invoice, "Restarting checkout");
        self.delegate
            .on_event(&CheckoutEvent::WillRestart { invalidates_invoice });
        let reason = match &failure {
            Some(failure) => InvalidationReason::Failure(failure.clone()),
            None => InvalidationReason::PaymentMethodChanged,
        };
        let invoice = processing.snapshot.invoice.clone();
        self.set_state(CheckoutState::Restarting(Restarting {
            snapshot: processing.snapshot,
            failed_payment_method_id: processing.payment_method.id().to_string(),
            failure,
            pending,
            invalidates_invoice,
        }));
        if !invalidates_invoice {
            self.finish_restart(invoice);
            return;
        }

        let token = self.root.child_token();
        self.active = ActivePayment::Task(token.clone());
        let attempt = self.attempt;
        let delegate = self.delegate.clone();
        let invoices = self.services.invoices.clone();
        let cancel = token.clone();
        self.spawn(
            token,
            async move {
                let Some(request) = delegate.new_invoice(&invoice, &reason).await else {
                    return Ok::<_, Failure>(None);
                };
                info!(invoice_id = %request.invoice_id, "Fetching replacement invoice");
                invoices.fetch_invoice(&request, &cancel).await.map(Some)
            },
            move |result| CheckoutMessage::RestartResolved { attempt, result },
        );
    }

    fn did_resolve_restart(&mut self, result: Result<Option<Invoice>, Failure>) {
        let CheckoutState::Restarting(restarting) = self.state() else {
            debug!(state = self.state().name(), "Ignoring replacement invoice");
            return;
        };
        match result {
            Ok(Some(invoice)) => {
                self.active = ActivePayment::None;
                self.finish_restart(invoice);
            }
            Ok(None) => {
                let failure = restarting
                    .failure
                    .clone()
                    .unwrap_or_else(|| Failure::generic(MISSING_INVOICE));
                warn!(%failure, "No replacement invoice was provided");
                self.fail(failure);
            }
            Err(failure) => self.fail(failure),
        }
    }

    fn finish_restart(&mut self, invoice: Invoice) {
        let CheckoutState::Restarting(restarting) = self.state() else {
            return;
        };
        let restarting = restarting.clone();
        match readiness(&invoice) {
            InvoiceReadiness::Payable => {}
            InvoiceReadiness::Paid => return self.succeed(),
            InvoiceReadiness::Unsupported => {
                return self.fail(Failure::generic(UNSUPPORTED_INVOICE));
            }
        }
        let pending_available = restarting.pending.as_ref().map(|pending| {
            self.supported_methods(&invoice)
                .iter()
                .any(|method| method.id() == pending.payment_method_id)
        });
        let description = match (&restarting.failure, pending_available) {
            (_, Some(false)) => Some(METHOD_UNAVAILABLE.to_string()),
            (Some(failure), _) if !failure.is_cancellation() => Some(RESTART_MESSAGE.to_string()),
            _ => None,
        };
        if !self.enter_started(invoice, description) {
            return;
        }
        let Some(pending) = restarting.pending else {
            return;
        };
        if pending_available != Some(true) {
            debug!(method_id = %pending.payment_method_id, "Queued payment method is no longer offered");
            return;
        }
        self.select_method(&pending.payment_method_id, false);
        if pending.should_start {
            self.begin_payment(&pending.payment_method_id);
        }
    }

    fn succeed(&mut self) {
        if self.state().is_sink() {
            return;
        }
        info!("Checkout completed");
        self.abort_payment();
        self.root.cancel();
        self.set_state(CheckoutState::Success);
        self.delegate.on_event(&CheckoutEvent::DidCompletePayment);
        self.complete(Ok(()));
    }

    fn fail(&mut self, failure: Failure) {
        if self.state().is_sink() {
            debug!(%failure, "Checkout already finished, failure discarded");
            return;
        }
        warn!(%failure, "Checkout failed");
        self.abort_payment();
        self.root.cancel();
        self.set_state(CheckoutState::Failure(failure.clone()));
        self.delegate.on_event(&CheckoutEvent::DidFail(failure.clone()));
        self.complete(Err(failure));
    }

    fn complete(&mut self, result: Result<(), Failure>) {
        if let Some(completion) = self.completion.take() {
            completion(result);
        }
    }

    /// Dropping a sub-flow cancels everything it started.
    fn abort_payment(&mut self) {
        if let ActivePayment::Task(token) = std::mem::replace(&mut self.active, ActivePayment::None) {
            token.cancel();
        }
    }

    fn spawn<T, F>(
        &self,
        token: CancellationToken,
        task: F,
        deliver: impl FnOnce(T) -> CheckoutMessage + Send + 'static,
    ) where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            let output = tokio::select! {
                _ = token.cancelled() => return,
                output = task => output,
            };
            if !token.is_cancelled() {
                dispatch(deliver(output));
            }
        });
    }

    fn set_state(&mut self, state: CheckoutState) {
        if self.state().is_sink() {
            debug!(new_state = state.name(), "Checkout is finished, transition ignored");
            return;
        }
        debug!(from = self.state().name(), to = state.name(), "Checkout state changed");
        self.state.set(state);
    }
}

impl Drop for CheckoutOrchestrator {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::card::CardFieldId;
    use crate::domain::invoice::{InvoiceRequest, InvoiceTransaction};
    use crate::domain::payment_method::{
        AlternativePaymentConfiguration, AlternativePaymentMethod, CardMethodConfiguration,
        CustomerTokenConfiguration, CustomerTokenMethod,
    };
    use crate::infrastructure::in_memory::{
        InMemoryAuthenticator, InMemoryCardService, InMemoryInvoiceService,
        RecordingCheckoutDelegate,
    };
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::time::Duration;

    type Outcome = Arc<Mutex<Vec<Result<(), Failure>>>>;

    struct Harness {
        checkout: CheckoutOrchestrator,
        invoices: InMemoryInvoiceService,
        delegate: RecordingCheckoutDelegate,
        outcome: Outcome,
    }

    impl Harness {
        async fn settle(&mut self) {
            self.advance(20).await;
        }

        async fn advance(&mut self, millis: u64) {
            for _ in 0..millis {
                tokio::time::sleep(Duration::from_millis(1)).await;
                self.checkout.process_pending();
            }
        }

        fn restarting(&self) -> &Restarting {
            match self.checkout.state() {
                CheckoutState::Restarting(restarting) => restarting,
                other => panic!("expected restarting state, got {other:?}"),
            }
        }
    }

    fn invoice(id: &str, payment_methods: Vec<PaymentMethod>) -> Invoice {
        Invoice {
            id: id.to_string(),
            amount: dec!(19.99),
            currency: "EUR".to_string(),
            payment_methods,
            transaction: Some(InvoiceTransaction {
                status: TransactionStatus::Waiting,
            }),
            customer_id: Some("cust_1".to_string()),
            return_url: None,
        }
    }

    fn card(id: &str) -> PaymentMethod {
        PaymentMethod::Card(CardMethod {
            id: id.to_string(),
            configuration: CardMethodConfiguration::default(),
        })
    }

    fn apm(id: &str) -> PaymentMethod {
        PaymentMethod::AlternativePayment(AlternativePaymentMethod {
            id: id.to_string(),
            configuration: AlternativePaymentConfiguration {
                gateway_configuration_id: format!("gway_conf_{id}"),
                redirect_url: format!("https://pay.example.com/{id}"),
                saving_allowed: false,
            },
        })
    }

    fn token(id: &str, token_id: &str) -> PaymentMethod {
        PaymentMethod::CustomerToken(CustomerTokenMethod {
            id: id.to_string(),
            configuration: CustomerTokenConfiguration {
                customer_token_id: token_id.to_string(),
                redirect_url: None,
                deleting_allowed: true,
            },
        })
    }

    fn harness_with(
        configuration: CheckoutConfiguration,
        invoices: InMemoryInvoiceService,
        delegate: RecordingCheckoutDelegate,
    ) -> Harness {
        let outcome: Outcome = Arc::default();
        let sink = outcome.clone();
        let services = CheckoutServices::new(
            Arc::new(invoices.clone()),
            Arc::new(InMemoryCardService::new()),
            Arc::new(InMemoryAuthenticator::new()),
        );
        let checkout = CheckoutOrchestrator::new(configuration, services, Arc::new(delegate.clone()))
            .with_completion(Box::new(move |result| sink.lock().unwrap().push(result)));
        Harness {
            checkout,
            invoices,
            delegate,
            outcome,
        }
    }

    fn harness(invoices: InMemoryInvoiceService) -> Harness {
        harness_with(
            CheckoutConfiguration::new(InvoiceRequest::new("inv_1")),
            invoices,
            RecordingCheckoutDelegate::new(),
        )
    }

    fn processing(checkout: &CheckoutOrchestrator) -> &PaymentProcessing {
        match checkout.state() {
            CheckoutState::PaymentProcessing(processing) => processing,
            other => panic!("expected payment processing, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_lists_supported_methods() {
        let methods = vec![
            card("card"),
            PaymentMethod::Unknown {
                id: "crypto".to_string(),
                kind: "crypto".to_string(),
            },
        ];
        let mut h = harness(InMemoryInvoiceService::new().with_invoice(invoice("inv_1", methods)));

        h.checkout.start();
        assert!(matches!(h.checkout.state(), CheckoutState::Starting));
        h.settle().await;

        let CheckoutState::Started(started) = h.checkout.state() else {
            panic!("expected started state, got {:?}", h.checkout.state());
        };
        assert_eq!(started.payment_methods, vec![card("card")]);
        assert_eq!(
            h.delegate.events(),
            vec![CheckoutEvent::WillStart, CheckoutEvent::DidStart]
        );

        h.checkout.start();
        assert_eq!(h.invoices.fetched_invoices(), vec!["inv_1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paid_invoice_completes_immediately() {
        let mut paid = invoice("inv_1", vec![card("card")]);
        paid.transaction = Some(InvoiceTransaction {
            status: TransactionStatus::Authorized,
        });
        let mut h = harness(InMemoryInvoiceService::new().with_invoice(paid));

        h.checkout.start();
        h.settle().await;

        assert_eq!(h.checkout.state(), &CheckoutState::Success);
        assert_eq!(h.outcome.lock().unwrap().as_slice(), &[Ok(())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_status_and_empty_methods_fail() {
        let mut unknown = invoice("inv_1", vec![card("card")]);
        unknown.transaction = None;
        let mut h = harness(InMemoryInvoiceService::new().with_invoice(unknown));
        h.checkout.start();
        h.settle().await;
        assert!(matches!(h.checkout.state(), CheckoutState::Failure(_)));

        let mut h = harness(InMemoryInvoiceService::new().with_invoice(invoice("inv_1", vec![])));
        h.checkout.start();
        h.settle().await;
        let CheckoutState::Failure(failure) = h.checkout.state() else {
            panic!("expected failure");
        };
        assert_eq!(failure.message.as_deref(), Some(METHODS_UNAVAILABLE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_card_skips_method_list() {
        let mut configuration = CheckoutConfiguration::new(InvoiceRequest::new("inv_1"));
        configuration.allows_skipping_payment_list = true;
        let invoices =
            InMemoryInvoiceService::new().with_invoice(invoice("inv_1", vec![card("card")]));
        let mut h = harness_with(configuration, invoices, RecordingCheckoutDelegate::new());

        h.checkout.start();
        h.settle().await;

        let processing = processing(&h.checkout);
        assert!(processing.is_ready);
        assert!(processing.is_cancellable);
        assert!(matches!(
            processing.stage,
            PaymentStage::Card(CardCollectionState::Started(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_card_payment_authorizes_invoice() {
        let invoices =
            InMemoryInvoiceService::new().with_invoice(invoice("inv_1", vec![card("card")]));
        let mut h = harness(invoices);
        h.checkout.start();
        h.settle().await;

        h.checkout.start_payment("card");
        for (field, value) in [
            (CardFieldId::Number, "4242424242424242"),
            (CardFieldId::Expiration, "1230"),
            (CardFieldId::Cvc, "123"),
        ] {
            h.checkout.card(CardCommand::Update {
                field,
                value: value.to_string(),
            });
        }
        h.checkout.card(CardCommand::Tokenize);
        assert!(!processing(&h.checkout).is_cancellable);
        h.settle().await;

        assert_eq!(h.checkout.state(), &CheckoutState::Success);
        let authorizations = h.invoices.authorizations();
        assert_eq!(authorizations.len(), 1);
        assert!(authorizations[0].source.starts_with("card_"));
        assert_eq!(h.delegate.authorized_methods(), vec!["card".to_string()]);
        assert_eq!(h.outcome.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_payment_restarts_on_new_invoice() {
        let invoices = InMemoryInvoiceService::new()
            .with_invoice(invoice("inv_1", vec![card("card"), apm("apm")]))
            .with_invoice(invoice("inv_2", vec![card("card"), apm("apm")]))
            .with_authorization_result(Err(Failure::new(
                "gateway.declined",
                Some("Declined".to_string()),
            )));
        let delegate = RecordingCheckoutDelegate::new().with_new_invoice(InvoiceRequest::new("inv_2"));
        let mut h = harness_with(
            CheckoutConfiguration::new(InvoiceRequest::new("inv_1")),
            invoices,
            delegate,
        );
        h.checkout.start();
        h.settle().await;

        h.checkout.start_payment("apm");
        assert!(processing(&h.checkout).should_invalidate_invoice);
        h.settle().await;

        let CheckoutState::Selected(selected) = h.checkout.state() else {
            panic!("expected selected state, got {:?}", h.checkout.state());
        };
        assert_eq!(selected.payment_method_id, "apm");
        assert_eq!(selected.snapshot.invoice.id, "inv_2");
        assert_eq!(
            selected.snapshot.recent_error_description.as_deref(),
            Some(RESTART_MESSAGE)
        );
        assert_eq!(h.delegate.invalidations().len(), 1);
        assert!(
            h.delegate
                .events()
                .contains(&CheckoutEvent::WillRestart {
                    invalidates_invoice: true
                })
        );
        assert!(h.outcome.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_replacement_invoice_is_terminal() {
        let declined = Failure::new("gateway.declined", None);
        let invoices = InMemoryInvoiceService::new()
            .with_invoice(invoice("inv_1", vec![apm("apm")]))
            .with_authorization_result(Err(declined.clone()));
        let mut h = harness(invoices);
        h.checkout.start();
        h.settle().await;

        h.checkout.start_payment("apm");
        h.settle().await;

        assert_eq!(h.checkout.state(), &CheckoutState::Failure(declined.clone()));
        assert_eq!(h.outcome.lock().unwrap().as_slice(), &[Err(declined)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_method_restarts_on_same_invoice() {
        let invoices = InMemoryInvoiceService::new()
            .with_invoice(invoice("inv_1", vec![card("card"), apm("apm")]));
        let mut h = harness(invoices);
        h.checkout.start();
        h.settle().await;
        h.checkout.start_payment("card");

        h.checkout.select("apm");

        let CheckoutState::Selected(selected) = h.checkout.state() else {
            panic!("expected selected state, got {:?}", h.checkout.state());
        };
        assert_eq!(selected.payment_method_id, "apm");
        assert!(selected.snapshot.recent_error_description.is_none());
        assert!(h.delegate.invalidations().is_empty());
        assert!(
            h.delegate
                .events()
                .contains(&CheckoutEvent::WillRestart {
                    invalidates_invoice: false
                })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_results_are_discarded() {
        let invoices =
            InMemoryInvoiceService::new().with_invoice(invoice("inv_1", vec![card("card")]));
        let mut h = harness(invoices);
        h.checkout.start();
        h.settle().await;
        h.checkout.start_payment("card");

        h.checkout.handle(CheckoutMessage::PaymentFinished {
            attempt: 99,
            result: Ok(()),
        });

        assert!(matches!(h.checkout.state(), CheckoutState::PaymentProcessing(_)));
        assert!(h.outcome.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_terminal_and_idempotent() {
        let invoices =
            InMemoryInvoiceService::new().with_invoice(invoice("inv_1", vec![card("card")]));
        let mut h = harness(invoices);
        h.checkout.start();
        h.settle().await;
        h.checkout.start_payment("card");

        h.checkout.cancel();
        h.checkout.cancel();
        h.checkout.select("card");
        h.settle().await;

        let CheckoutState::Failure(failure) = h.checkout.state() else {
            panic!("expected failure state");
        };
        assert!(failure.is_cancellation());
        assert_eq!(h.outcome.lock().unwrap().len(), 1);
        let failures = h
            .delegate
            .events()
            .into_iter()
            .filter(|event| matches!(event, CheckoutEvent::DidFail(_)))
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_customer_token_clears_selection() {
        let invoices = InMemoryInvoiceService::new().with_invoice(invoice(
            "inv_1",
            vec![card("card"), token("saved", "tok_1")],
        ));
        let mut h = harness(invoices);
        h.checkout.start();
        h.settle().await;
        h.checkout.select("saved");

        h.checkout.remove_customer_token("someone_else", "tok_1");
        assert!(matches!(h.checkout.state(), CheckoutState::Selected(_)));

        h.checkout.remove_customer_token("cust_1", "tok_1");
        let CheckoutState::Started(started) = h.checkout.state() else {
            panic!("expected started state, got {:?}", h.checkout.state());
        };
        assert_eq!(started.payment_methods, vec![card("card")]);
        assert_eq!(started.invoice.payment_methods, vec![card("card")]);
    }

    const LATENCY: u64 = 50;

    /// Checkout on `inv_1` that hands out `inv_2` on invalidation. The backend
    /// is slow so commands land while a restart is in flight, and it declines
    /// the first authorization.
    async fn slow_checkout(first: Vec<PaymentMethod>, second: Vec<PaymentMethod>) -> Harness {
        let invoices = InMemoryInvoiceService::new()
            .with_invoice(invoice("inv_1", first))
            .with_invoice(invoice("inv_2", second))
            .with_latency(Duration::from_millis(LATENCY));
        let invoices = invoices.with_authorization_result(Err(Failure::new("gateway.declined", None)));
        let delegate = RecordingCheckoutDelegate::new().with_new_invoice(InvoiceRequest::new("inv_2"));
        let mut h = harness_with(
            CheckoutConfiguration::new(InvoiceRequest::new("inv_1")),
            invoices,
            delegate,
        );
        h.checkout.start();
        h.advance(LATENCY + 10).await;
        assert!(matches!(h.checkout.state(), CheckoutState::Started(_)));
        h
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_to_method_missing_from_new_invoice_reports_it() {
        let mut h = slow_checkout(
            vec![card("card"), apm("apm"), apm("other")],
            vec![apm("apm"), apm("other")],
        )
        .await;
        h.checkout.start_payment("apm");
        h.checkout.select("card");
        assert!(h.restarting().invalidates_invoice);

        h.advance(LATENCY + 10).await;

        let CheckoutState::Started(started) = h.checkout.state() else {
            panic!("expected started state, got {:?}", h.checkout.state());
        };
        assert_eq!(started.invoice.id, "inv_2");
        assert_eq!(
            started.recent_error_description.as_deref(),
            Some(METHOD_UNAVAILABLE)
        );
        assert_eq!(
            h.delegate.invalidations(),
            vec![InvalidationReason::PaymentMethodChanged]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_during_restart_are_queued() {
        let mut h = slow_checkout(
            vec![card("card"), apm("apm")],
            vec![card("card"), apm("apm")],
        )
        .await;
        h.checkout.start_payment("apm");
        h.checkout.select("card");

        h.checkout.select("apm");
        assert_eq!(
            h.restarting().pending,
            Some(PendingSelection {
                payment_method_id: "apm".to_string(),
                should_start: false,
            })
        );
        h.checkout.start_payment("card");
        assert_eq!(
            h.restarting().pending,
            Some(PendingSelection {
                payment_method_id: "card".to_string(),
                should_start: true,
            })
        );

        h.advance(LATENCY + 10).await;

        let processing = processing(&h.checkout);
        assert_eq!(processing.payment_method.id(), "card");
        assert_eq!(processing.snapshot.invoice.id, "inv_2");
        assert!(processing.snapshot.recent_error_description.is_none());
        assert!(matches!(
            processing.stage,
            PaymentStage::Card(CardCollectionState::Started(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_method_replaces_failed_one_after_restart() {
        let mut h = slow_checkout(
            vec![card("card"), apm("apm"), apm("other")],
            vec![card("card"), apm("other")],
        )
        .await;
        h.checkout.start_payment("apm");
        h.advance(LATENCY + 10).await;
        assert_eq!(h.restarting().failed_payment_method_id, "apm");

        h.checkout.select("other");
        h.advance(LATENCY + 10).await;

        let CheckoutState::Selected(selected) = h.checkout.state() else {
            panic!("expected selected state, got {:?}", h.checkout.state());
        };
        assert_eq!(selected.payment_method_id, "other");
        assert_eq!(selected.snapshot.invoice.id, "inv_2");
        assert_eq!(
            selected.snapshot.recent_error_description.as_deref(),
            Some(RESTART_MESSAGE)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_method_missing_from_new_invoice_reports_it() {
        let mut h = slow_checkout(
            vec![card("card"), apm("apm")],
            vec![card("card")],
        )
        .await;
        h.checkout.start_payment("apm");
        h.advance(2 * LATENCY + 20).await;

        let CheckoutState::Started(started) = h.checkout.state() else {
            panic!("expected started state, got {:?}", h.checkout.state());
        };
        assert_eq!(started.invoice.id, "inv_2");
        assert_eq!(
            started.recent_error_description.as_deref(),
            Some(METHOD_UNAVAILABLE)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_customer_token_clears_queued_selection() {
        let methods = vec![card("card"), apm("apm"), token("saved", "tok_1")];
        let mut h = slow_checkout(methods.clone(), methods).await;
        h.checkout.start_payment("apm");
        h.checkout.select("saved");
        assert!(h.restarting().pending.is_some());

        h.checkout.remove_customer_token("cust_1", "tok_1");
        assert_eq!(h.restarting().pending, None);
        h.advance(LATENCY + 10).await;

        let CheckoutState::Started(started) = h.checkout.state() else {
            panic!("expected started state, got {:?}", h.checkout.state());
        };
        assert_eq!(started.invoice.id, "inv_2");
        assert!(started.recent_error_description.is_none());
    }
}
