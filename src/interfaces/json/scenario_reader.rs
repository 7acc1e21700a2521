use crate::application::card::{CardCommand, CardFieldId};
use crate::application::checkout::{
    CheckoutHandle, CheckoutOrchestrator, CheckoutServices, CheckoutState,
};
use crate::application::native_apm::NativeAlternativePaymentCommand;
use crate::config::CheckoutConfiguration;
use crate::domain::card::{CardScheme, IssuerInformation};
use crate::domain::invoice::{CustomerAction, Invoice, InvoiceRequest};
use crate::domain::parameter::NativePaymentResponse;
use crate::error::{CheckoutError, Failure, Result};
use crate::infrastructure::in_memory::{
    ApprovingCustomerActions, InMemoryAuthenticator, InMemoryCardService,
    InMemoryInvoiceService, InMemoryWalletService, RecordingCheckoutDelegate,
};
use serde::Deserialize;
use serde_with::{DurationSecondsWithFrac, serde_as};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Failure as written in a scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedFailure {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<ScriptedFailure> for Failure {
    fn from(failure: ScriptedFailure) -> Self {
        Failure::new(failure.code, failure.message)
    }
}

/// A scripted native payment answer: either a response or a failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptedResponse {
    Failure { failure: ScriptedFailure },
    Response(NativePaymentResponse),
}

impl From<ScriptedResponse> for std::result::Result<NativePaymentResponse, Failure> {
    fn from(scripted: ScriptedResponse) -> Self {
        match scripted {
            ScriptedResponse::Failure { failure } => Err(failure.into()),
            ScriptedResponse::Response(response) => Ok(response),
        }
    }
}

/// Backend behaviour a scenario runs against.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScriptedBackend {
    pub invoices: Vec<Invoice>,
    /// Invoices handed out, in order, whenever the checkout asks for a
    /// replacement.
    pub replacement_invoices: Vec<InvoiceRequest>,
    /// `null` entries authorize successfully.
    pub authorizations: Vec<Option<ScriptedFailure>>,
    pub customer_action: Option<CustomerAction>,
    pub native_steps: Vec<ScriptedResponse>,
    pub submissions: Vec<ScriptedResponse>,
    pub captures: Vec<ScriptedResponse>,
    pub issuers: HashMap<String, IssuerInformation>,
    pub tokenization_failure: Option<ScriptedFailure>,
    pub authentication_failure: Option<ScriptedFailure>,
    pub wallet_available: bool,
    pub default_values: HashMap<String, String>,
    pub stop_after_failure: bool,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub latency: Duration,
}

/// One caller action of a scenario.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ScenarioStep {
    Start,
    Select {
        payment_method_id: String,
    },
    StartPayment {
        payment_method_id: String,
    },
    Cancel,
    SetShouldSavePaymentMethod {
        should_save: bool,
    },
    RemoveCustomerToken {
        customer_id: String,
        token_id: String,
    },
    UpdateCardField {
        field: CardFieldId,
        value: String,
    },
    SetPreferredScheme {
        scheme: CardScheme,
    },
    SetShouldSaveCard {
        should_save: bool,
    },
    Tokenize,
    UpdateValue {
        key: String,
        value: String,
    },
    Submit,
    ConfirmRedirect,
    ConfirmPayment,
    /// Lets background work progress.
    Wait {
        #[serde_as(as = "DurationSecondsWithFrac<f64>")]
        seconds: Duration,
    },
    /// Blocks until the checkout reaches the named state.
    WaitFor {
        state: String,
        #[serde_as(as = "DurationSecondsWithFrac<f64>")]
        #[serde(default = "default_wait_timeout")]
        timeout: Duration,
    },
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(5)
}

/// A checkout configuration, a scripted backend and the caller actions to
/// replay against them.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub configuration: CheckoutConfiguration,
    #[serde(default)]
    pub backend: ScriptedBackend,
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Reads a JSON scenario from any `Read` source (e.g., File, Stdin).
    pub fn from_reader(source: impl Read) -> Result<Self> {
        let scenario: Self = serde_json::from_reader(source)?;
        if scenario.steps.is_empty() {
            return Err(CheckoutError::ScenarioError(
                "scenario has no steps".to_string(),
            ));
        }
        Ok(scenario)
    }

    /// Builds a checkout wired to in-memory services that follow the script.
    pub fn checkout(&self) -> CheckoutOrchestrator {
        let backend = &self.backend;
        let mut invoices = InMemoryInvoiceService::new().with_latency(backend.latency);
        for invoice in &backend.invoices {
            invoices = invoices.with_invoice(invoice.clone());
        }
        for result in &backend.authorizations {
            invoices = invoices.with_authorization_result(match result {
                Some(failure) => Err(failure.clone().into()),
                None => Ok(()),
            });
        }
        for step in &backend.native_steps {
            invoices = invoices.with_native_step(step.clone().into());
        }
        for submission in &backend.submissions {
            invoices = invoices.with_submission_result(submission.clone().into());
        }
        for capture in &backend.captures {
            invoices = invoices.with_capture_result(capture.clone().into());
        }
        if let Some(action) = &backend.customer_action {
            invoices = invoices.with_customer_action(action.clone());
        }

        let mut cards = InMemoryCardService::new().with_latency(backend.latency);
        for (iin, issuer) in &backend.issuers {
            cards = cards.with_issuer(iin.clone(), issuer.clone());
        }
        if let Some(failure) = &backend.tokenization_failure {
            cards = cards.failing_tokenization(failure.clone().into());
        }

        let mut authenticator = InMemoryAuthenticator::new().with_latency(backend.latency);
        if let Some(failure) = &backend.authentication_failure {
            authenticator = authenticator.with_result(Err(failure.clone().into()));
        }

        let mut services =
            CheckoutServices::new(Arc::new(invoices), Arc::new(cards), Arc::new(authenticator))
                .with_customer_actions(Arc::new(ApprovingCustomerActions::new()));
        if backend.wallet_available {
            services = services.with_wallet(Arc::new(InMemoryWalletService::new()));
        }

        let mut delegate = RecordingCheckoutDelegate::new();
        if backend.stop_after_failure {
            delegate = delegate.stopping_after_failure();
        }
        for request in &backend.replacement_invoices {
            delegate = delegate.with_new_invoice(request.clone());
        }
        for (key, value) in &backend.default_values {
            delegate = delegate.with_default_value(key.clone(), value.clone());
        }

        CheckoutOrchestrator::new(self.configuration.clone(), services, Arc::new(delegate))
    }

    /// Replays every step and returns the states the checkout went through.
    ///
    /// Playback stops early once the checkout finished; a checkout that is
    /// still running after the last step is stopped.
    pub async fn play(&self) -> Result<Vec<CheckoutState>> {
        let (handle, task) = CheckoutHandle::spawn(self.checkout());
        let (tx, mut transitions) = mpsc::unbounded_channel();
        handle
            .observe(move |state: &CheckoutState| {
                let _ = tx.send(state.clone());
            })
            .await?;

        for step in &self.steps {
            if handle.state().is_sink() {
                debug!(?step, "Checkout finished, remaining steps skipped");
                break;
            }
            info!(?step, "Replaying scenario step");
            apply(&handle, step).await?;
        }

        drop(handle);
        task.await
            .map_err(|e| CheckoutError::ScenarioError(e.to_string()))?;

        let mut states = Vec::new();
        while let Ok(state) = transitions.try_recv() {
            states.push(state);
        }
        Ok(states)
    }
}

async fn apply(handle: &CheckoutHandle, step: &ScenarioStep) -> Result<()> {
    match step {
        ScenarioStep::Start => handle.start(),
        ScenarioStep::Select { payment_method_id } => handle.select(payment_method_id.as_str()),
        ScenarioStep::StartPayment { payment_method_id } => {
            handle.start_payment(payment_method_id.as_str())
        }
        ScenarioStep::Cancel => handle.cancel(),
        ScenarioStep::SetShouldSavePaymentMethod { should_save } => {
            handle.set_should_save_payment_method(*should_save)
        }
        ScenarioStep::RemoveCustomerToken {
            customer_id,
            token_id,
        } => handle.remove_customer_token(customer_id.as_str(), token_id.as_str()),
        ScenarioStep::UpdateCardField { field, value } => handle.card(CardCommand::Update {
            field: *field,
            value: value.clone(),
        }),
        ScenarioStep::SetPreferredScheme { scheme } => {
            handle.card(CardCommand::SetPreferredScheme(*scheme))
        }
        ScenarioStep::SetShouldSaveCard { should_save } => {
            handle.card(CardCommand::SetShouldSaveCard(*should_save))
        }
        ScenarioStep::Tokenize => handle.card(CardCommand::Tokenize),
        ScenarioStep::UpdateValue { key, value } => {
            handle.native_alternative_payment(NativeAlternativePaymentCommand::UpdateValue {
                key: key.clone(),
                value: value.clone(),
            })
        }
        ScenarioStep::Submit => {
            handle.native_alternative_payment(NativeAlternativePaymentCommand::Submit)
        }
        ScenarioStep::ConfirmRedirect => {
            handle.native_alternative_payment(NativeAlternativePaymentCommand::ConfirmRedirect)
        }
        ScenarioStep::ConfirmPayment => {
            handle.native_alternative_payment(NativeAlternativePaymentCommand::ConfirmPayment)
        }
        ScenarioStep::Wait { seconds } => {
            tokio::time::sleep(*seconds).await;
            Ok(())
        }
        ScenarioStep::WaitFor { state, timeout } => {
            let reached = handle.wait_for(|current| current.name() == state || current.is_sink());
            tokio::time::timeout(*timeout, reached).await.map_err(|_| {
                CheckoutError::ScenarioError(format!(
                    "checkout did not reach '{state}' within {timeout:?}"
                ))
            })??;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "configuration": { "invoice_request": { "invoice_id": "inv_1" } },
        "backend": {
            "invoices": [{
                "id": "inv_1",
                "amount": "10.00",
                "currency": "EUR",
                "transaction": { "status": "waiting" },
                "payment_methods": [{
                    "id": "apm",
                    "type": "alternative_payment",
                    "configuration": {
                        "gateway_configuration_id": "gway_conf_1",
                        "redirect_url": "https://pay.example.com/apm"
                    }
                }]
            }],
            "authorizations": [{ "code": "gateway.declined" }, null],
            "latency": 0.01
        },
        "steps": [
            { "command": "start" },
            { "command": "wait_for", "state": "started" },
            { "command": "start_payment", "payment_method_id": "apm" },
            { "command": "wait", "seconds": 0.5 }
        ]
    }"#;

    #[test]
    fn test_reads_scenario() {
        let scenario = Scenario::from_reader(SCENARIO.as_bytes()).unwrap();

        assert_eq!(scenario.steps.len(), 4);
        assert_eq!(scenario.backend.invoices[0].payment_methods.len(), 1);
        assert!(scenario.backend.authorizations[1].is_none());
        assert_eq!(scenario.backend.latency, Duration::from_millis(10));
        assert!(matches!(
            scenario.steps[3],
            ScenarioStep::Wait { seconds } if seconds == Duration::from_millis(500)
        ));
    }

    #[test]
    fn test_rejects_empty_scenario() {
        let data = r#"{ "configuration": { "invoice_request": { "invoice_id": "inv_1" } }, "steps": [] }"#;
        assert!(matches!(
            Scenario::from_reader(data.as_bytes()),
            Err(CheckoutError::ScenarioError(_))
        ));
    }

    #[tokio::test]
    async fn test_declined_payment_without_new_invoice_fails() {
        let scenario = Scenario::from_reader(SCENARIO.as_bytes()).unwrap();

        let states = scenario.play().await.unwrap();

        let names: Vec<_> = states.iter().map(CheckoutState::name).collect();
        assert_eq!(
            names,
            vec!["starting", "started", "payment_processing", "restarting", "failure"]
        );
    }
}
