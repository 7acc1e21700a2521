use super::state::{
    AwaitingCompletion, NativeAlternativePaymentCommand, NativeAlternativePaymentMessage,
    NativeAlternativePaymentStarted, NativeAlternativePaymentState, ResolvedStep,
};
use crate::application::observer::{Dispatch, Observable, ObserverId};
use crate::application::validation;
use crate::config::NativeAlternativePaymentConfiguration;
use crate::domain::event::NativeAlternativePaymentEvent;
use crate::domain::parameter::{
    NativePaymentElement, NativePaymentResponse, NativePaymentStatus, NativePaymentSubmission,
    NativePaymentTarget, Parameter, ParameterSpecification, ParameterType, ParameterValue,
};
use crate::domain::ports::{AuthenticatorRef, InvoiceService, InvoiceServiceRef};
use crate::error::Failure;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Owner-supplied hooks of a native alternative payment.
#[async_trait]
pub trait NativeAlternativePaymentDelegate: Send + Sync {
    fn on_event(&self, _event: NativeAlternativePaymentEvent) {}

    /// Values to prefill, keyed by parameter key.
    async fn default_values(
        &self,
        _parameters: &[ParameterSpecification],
    ) -> HashMap<String, String> {
        HashMap::new()
    }
}

#[derive(Clone)]
pub struct NativeAlternativePaymentServices {
    pub invoices: InvoiceServiceRef,
    pub authenticator: AuthenticatorRef,
}

pub type NativeCompletion = Box<dyn FnOnce(Result<(), Failure>) + Send>;

/// Collects server-described parameters for a redirect-free alternative
/// payment, submits them and waits for the payment to be captured.
pub struct NativeAlternativePaymentSubflow {
    target: NativePaymentTarget,
    configuration: NativeAlternativePaymentConfiguration,
    services: NativeAlternativePaymentServices,
    delegate: Arc<dyn NativeAlternativePaymentDelegate>,
    dispatch: Dispatch<NativeAlternativePaymentMessage>,
    state: Observable<NativeAlternativePaymentState>,
    root: CancellationToken,
    completion: Option<NativeCompletion>,
}

impl NativeAlternativePaymentSubflow {
    pub fn new(
        target: NativePaymentTarget,
        configuration: NativeAlternativePaymentConfiguration,
        services: NativeAlternativePaymentServices,
        delegate: Arc<dyn NativeAlternativePaymentDelegate>,
        dispatch: Dispatch<NativeAlternativePaymentMessage>,
        completion: NativeCompletion,
    ) -> Self {
        Self {
            target,
            configuration,
            services,
            delegate,
            dispatch,
            state: Observable::new(NativeAlternativePaymentState::Idle),
            root: CancellationToken::new(),
            completion: Some(completion),
        }
    }

    pub fn state(&self) -> &NativeAlternativePaymentState {
        self.state.get()
    }

    pub fn observe(
        &mut self,
        observer: impl FnMut(&NativeAlternativePaymentState) + Send + 'static,
    ) -> ObserverId {
        self.state.observe(observer)
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.state.unobserve(id)
    }

    /// Fetches the current payment step.
    pub fn start(&mut self) {
        if !matches!(self.state(), NativeAlternativePaymentState::Idle) {
            debug!(state = self.state().name(), "Native payment already started, ignored");
            return;
        }
        self.delegate.on_event(NativeAlternativePaymentEvent::WillStart);
        self.set_state(NativeAlternativePaymentState::Starting);

        let token = self.root.child_token();
        let invoices = self.services.invoices.clone();
        let delegate = self.delegate.clone();
        let target = self.target.clone();
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = async {
                    let response = invoices.native_alternative_payment(&target, &token).await?;
                    Ok(resolve_step(response, delegate.as_ref()).await)
                } => result,
            };
            if !token.is_cancelled() {
                dispatch(NativeAlternativePaymentMessage::Started(result));
            }
        });
    }

    pub fn execute(&mut self, command: NativeAlternativePaymentCommand) {
        match command {
            NativeAlternativePaymentCommand::UpdateValue { key, value } => {
                self.update_value(&key, &value)
            }
            NativeAlternativePaymentCommand::Submit => self.submit(),
            NativeAlternativePaymentCommand::ConfirmRedirect => self.confirm_redirect(),
            NativeAlternativePaymentCommand::ConfirmPayment => self.confirm_payment(),
        }
    }

    /// Applies the result of a background operation.
    pub fn handle(&mut self, message: NativeAlternativePaymentMessage) {
        match message {
            NativeAlternativePaymentMessage::Started(result) => self.did_start(result),
            NativeAlternativePaymentMessage::Submitted(result) => self.did_submit(result),
            NativeAlternativePaymentMessage::Redirected(result) => self.did_redirect(result),
            NativeAlternativePaymentMessage::Captured(result) => self.did_capture(result),
            NativeAlternativePaymentMessage::DelayElapsed => self.did_exceed_delay(),
        }
    }

    /// Replaces the value of `key`, clearing its error. Re-entering the
    /// current value is a no-op.
    pub fn update_value(&mut self, key: &str, value: &str) {
        let NativeAlternativePaymentState::Started(current) = self.state() else {
            debug!(state = self.state().name(), "Ignoring parameter update");
            return;
        };
        let Some(parameter) = current.parameters.get(key) else {
            debug!(key, "Ignoring update of unknown parameter");
            return;
        };
        let normalized = validation::normalize(parameter.specification.kind, value);
        if parameter.value.value.as_deref().unwrap_or_default() == normalized {
            return;
        }
        let mut started = current.clone();
        if let Some(parameter) = started.parameters.get_mut(key) {
            parameter.value = ParameterValue {
                value: Some(normalized),
                error: None,
            };
        }
        self.set_state(NativeAlternativePaymentState::Started(started));
        self.delegate.on_event(NativeAlternativePaymentEvent::ParametersChanged);
    }

    /// Validates and submits the collected parameters.
    ///
    /// Ignored while any parameter carries an error. Local validation
    /// failures are folded back into the parameters without a network call.
    pub fn submit(&mut self) {
        let NativeAlternativePaymentState::Started(current) = self.state() else {
            debug!(state = self.state().name(), "Ignoring submission");
            return;
        };
        if current.has_errors() {
            debug!("Parameters have outstanding errors, submission ignored");
            return;
        }
        let invalid_fields = validation::invalid_fields(current.parameters.values());
        if !invalid_fields.is_empty() {
            let mut started = current.clone();
            for field in &invalid_fields {
                if let Some(parameter) = started.parameters.get_mut(&field.name) {
                    parameter.value.error = Some(field.message.clone());
                }
            }
            let failure = Failure::validation(invalid_fields);
            debug!(%failure, "Parameters failed local validation");
            self.set_state(NativeAlternativePaymentState::Started(started));
            self.delegate
                .on_event(NativeAlternativePaymentEvent::DidFailToSubmitParameters(failure));
            return;
        }
        let started = current.clone();
        let submission = NativePaymentSubmission {
            target: self.target.clone(),
            parameters: started.values(),
        };
        self.delegate
            .on_event(NativeAlternativePaymentEvent::WillSubmitParameters);
        self.set_state(NativeAlternativePaymentState::Submitting(started));

        let token = self.root.child_token();
        let invoices = self.services.invoices.clone();
        let delegate = self.delegate.clone();
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = async {
                    let response = invoices
                        .initiate_native_alternative_payment(submission, &token)
                        .await?;
                    Ok(resolve_step(response, delegate.as_ref()).await)
                } => result,
            };
            if !token.is_cancelled() {
                dispatch(NativeAlternativePaymentMessage::Submitted(result));
            }
        });
    }

    /// Hands the pending redirect to the authenticator.
    pub fn confirm_redirect(&mut self) {
        let NativeAlternativePaymentState::AwaitingRedirect { redirect, .. } = self.state() else {
            debug!(state = self.state().name(), "No redirect to confirm");
            return;
        };
        let redirect = redirect.clone();
        let url = redirect.url.clone();
        self.set_state(NativeAlternativePaymentState::Redirecting { redirect });

        let token = self.root.child_token();
        let authenticator = self.services.authenticator.clone();
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = authenticator.authenticate(&url, &token) => result,
            };
            if !token.is_cancelled() {
                dispatch(NativeAlternativePaymentMessage::Redirected(result.map(|_| ())));
            }
        });
    }

    /// Acknowledges that the customer completed the required action, which
    /// starts the capture wait. Only the first confirmation counts.
    pub fn confirm_payment(&mut self) {
        match self.state() {
            NativeAlternativePaymentState::AwaitingCompletion(current)
                if current.should_confirm_payment =>
            {
                let mut awaiting = current.clone();
                awaiting.should_confirm_payment = false;
                awaiting.is_cancellable = false;
                self.set_state(NativeAlternativePaymentState::AwaitingCompletion(awaiting));
                self.delegate
                    .on_event(NativeAlternativePaymentEvent::DidConfirmPayment);
                self.start_capture();
            }
            state => debug!(state = state.name(), "Payment confirmation ignored"),
        }
    }

    /// Fails the payment with a cancellation when the current state allows it.
    pub fn cancel(&mut self) {
        let state = self.state();
        if state.is_sink() {
            debug!("Native payment already finished, cancel ignored");
            return;
        }
        if !state.is_cancellable() {
            debug!(state = state.name(), "Native payment can't be cancelled right now");
            return;
        }
        self.fail(Failure::cancelled());
    }

    fn did_start(&mut self, result: Result<ResolvedStep, Failure>) {
        if !matches!(self.state(), NativeAlternativePaymentState::Starting) {
            debug!(state = self.state().name(), "Ignoring start result");
            return;
        }
        match result {
            Ok(step) => {
                self.delegate.on_event(NativeAlternativePaymentEvent::DidStart);
                self.apply_step(step);
            }
            Err(failure) => self.fail(failure),
        }
    }

    fn did_submit(&mut self, result: Result<ResolvedStep, Failure>) {
        let NativeAlternativePaymentState::Submitting(snapshot) = self.state() else {
            debug!(state = self.state().name(), "Ignoring submission result");
            return;
        };
        match result {
            Ok(step) => {
                let additional_parameters_expected =
                    step.response.status == NativePaymentStatus::NextStepRequired;
                self.delegate
                    .on_event(NativeAlternativePaymentEvent::DidSubmitParameters {
                        additional_parameters_expected,
                    });
                self.apply_step(step);
            }
            Err(failure) => {
                let mut started = snapshot.clone();
                let mut flagged = false;
                for field in &failure.invalid_fields {
                    if let Some(parameter) = started.parameters.get_mut(&field.name) {
                        let message =
                            validation::rejected_value_message(parameter.specification.kind);
                        parameter.value.error = Some(message.to_string());
                        flagged = true;
                    }
                }
                if flagged && !failure.is_cancellation() {
                    warn!(%failure, "Server rejected submitted parameters");
                    self.set_state(NativeAlternativePaymentState::Started(started));
                    self.delegate
                        .on_event(NativeAlternativePaymentEvent::DidFailToSubmitParameters(failure));
                } else {
                    self.fail(failure);
                }
            }
        }
    }

    fn apply_step(&mut self, step: ResolvedStep) {
        let ResolvedStep {
            response,
            default_values,
        } = step;
        match response.status {
            NativePaymentStatus::NextStepRequired => {
                if let Some(redirect) = response.redirect {
                    self.set_state(NativeAlternativePaymentState::AwaitingRedirect {
                        redirect,
                        is_cancellable: self.configuration.cancellable,
                    });
                    return;
                }
                let parameters = parameters_with_defaults(&response, &default_values);
                self.set_state(NativeAlternativePaymentState::Started(
                    NativeAlternativePaymentStarted {
                        elements: response.elements,
                        parameters,
                        is_cancellable: self.configuration.cancellable,
                    },
                ));
            }
            NativePaymentStatus::Pending => self.await_completion(response.elements, true),
            NativePaymentStatus::Success => self.complete_payment(),
        }
    }

    fn await_completion(&mut self, elements: Vec<NativePaymentElement>, may_require_confirmation: bool) {
        if !self.configuration.waits_confirmation {
            debug!("Not waiting for capture confirmation");
            self.complete_payment();
            return;
        }
        let should_confirm_payment = may_require_confirmation
            && (self.configuration.requires_confirmation
                || elements
                    .iter()
                    .any(|element| matches!(element, NativePaymentElement::Confirmation { .. })));
        self.set_state(NativeAlternativePaymentState::AwaitingCompletion(
            AwaitingCompletion {
                elements,
                is_cancellable: self.configuration.cancellable,
                is_delayed: false,
                should_confirm_payment,
            },
        ));
        self.delegate
            .on_event(NativeAlternativePaymentEvent::WillWaitForPaymentConfirmation);
        if !should_confirm_payment {
            self.start_capture();
        }
    }

    fn start_capture(&mut self) {
        let token = self.root.child_token();
        let invoices = self.services.invoices.clone();
        let target = self.target.clone();
        let dispatch = self.dispatch.clone();
        let timeout = self.configuration.capture_timeout();
        let interval = self.configuration.poll_interval;
        let capture_token = token.clone();
        let capture_dispatch = dispatch.clone();
        tokio::spawn(async move {
            let token = capture_token;
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = tokio::time::timeout(
                    timeout,
                    poll_capture(invoices.as_ref(), &target, interval, &token),
                ) => match result {
                    Ok(result) => result,
                    Err(_) => Err(Failure::timeout("Payment was not confirmed in time.")),
                },
            };
            if !token.is_cancelled() {
                capture_dispatch(NativeAlternativePaymentMessage::Captured(result));
            }
        });
        if let Some(delay) = self.configuration.show_progress_indicator_after {
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        dispatch(NativeAlternativePaymentMessage::DelayElapsed);
                    }
                }
            });
        }
    }

    fn did_redirect(&mut self, result: Result<(), Failure>) {
        if !matches!(self.state(), NativeAlternativePaymentState::Redirecting { .. }) {
            debug!(state = self.state().name(), "Ignoring redirect result");
            return;
        }
        match result {
            Ok(()) => self.await_completion(Vec::new(), false),
            Err(failure) => self.fail(failure),
        }
    }

    fn did_capture(&mut self, result: Result<(), Failure>) {
        if !matches!(self.state(), NativeAlternativePaymentState::AwaitingCompletion(_)) {
            debug!(state = self.state().name(), "Ignoring capture result");
            return;
        }
        match result {
            Ok(()) => self.complete_payment(),
            Err(failure) => self.fail(failure),
        }
    }

    fn did_exceed_delay(&mut self) {
        match self.state() {
            NativeAlternativePaymentState::AwaitingCompletion(current) if !current.is_delayed => {
                let mut awaiting = current.clone();
                awaiting.is_delayed = true;
                self.set_state(NativeAlternativePaymentState::AwaitingCompletion(awaiting));
            }
            state => debug!(state = state.name(), "Ignoring delay notification"),
        }
    }

    fn complete_payment(&mut self) {
        info!(invoice_id = %self.target.invoice_id, "Native alternative payment completed");
        self.root.cancel();
        self.set_state(NativeAlternativePaymentState::Completed);
        self.delegate
            .on_event(NativeAlternativePaymentEvent::DidCompletePayment);
        self.complete(Ok(()));
    }

    fn fail(&mut self, failure: Failure) {
        warn!(%failure, invoice_id = %self.target.invoice_id, "Native alternative payment failed");
        self.root.cancel();
        self.set_state(NativeAlternativePaymentState::Failure(failure.clone()));
        self.delegate
            .on_event(NativeAlternativePaymentEvent::DidFail(failure.clone()));
        self.complete(Err(failure));
    }

    fn complete(&mut self, result: Result<(), Failure>) {
        if let Some(completion) = self.completion.take() {
            completion(result);
        }
    }

    fn set_state(&mut self, state: NativeAlternativePaymentState) {
        if self.state().is_sink() {
            debug!(new_state = state.name(), "Native payment is finished, transition ignored");
            return;
        }
        self.state.set(state);
    }
}

impl Drop for NativeAlternativePaymentSubflow {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn resolve_step(
    response: NativePaymentResponse,
    delegate: &dyn NativeAlternativePaymentDelegate,
) -> ResolvedStep {
    let specifications: Vec<ParameterSpecification> = response.parameters().cloned().collect();
    let default_values = if specifications.is_empty() {
        HashMap::new()
    } else {
        delegate.default_values(&specifications).await
    };
    ResolvedStep {
        response,
        default_values,
    }
}

/// Seeds each parameter with the caller value, else the server preselected
/// value, else nothing.
fn parameters_with_defaults(
    response: &NativePaymentResponse,
    default_values: &HashMap<String, String>,
) -> BTreeMap<String, Parameter> {
    response
        .parameters()
        .map(|specification| {
            let caller_value = default_values
                .get(&specification.key)
                .map(|value| validation::normalize(specification.kind, value))
                .filter(|value| {
                    specification.kind != ParameterType::SingleSelect
                        || specification
                            .available_values
                            .iter()
                            .any(|option| &option.value == value)
                });
            let value = caller_value.or_else(|| specification.preselected_value().map(str::to_string));
            let parameter = Parameter {
                specification: specification.clone(),
                value: ParameterValue { value, error: None },
            };
            (specification.key.clone(), parameter)
        })
        .collect()
}

/// Polls until the payment is captured. Transport failures are retried;
/// everything else ends the wait.
#[instrument(skip_all, err, fields(invoice_id = %target.invoice_id))]
async fn poll_capture(
    invoices: &dyn InvoiceService,
    target: &NativePaymentTarget,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), Failure> {
    loop {
        match invoices.capture_native_alternative_payment(target, cancel).await {
            Ok(response) if response.status == NativePaymentStatus::Success => return Ok(()),
            Ok(_) => debug!("Payment is not captured yet"),
            Err(failure) if failure.kind().is_retriable() => {
                debug!(%failure, "Capture check failed, retrying")
            }
            Err(failure) => return Err(failure),
        }
        tokio::time::sleep(interval).await;
    }
}
