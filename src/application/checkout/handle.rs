use super::orchestrator::CheckoutOrchestrator;
use super::state::{CheckoutCommand, CheckoutState};
use crate::application::card::CardCommand;
use crate::application::native_apm::NativeAlternativePaymentCommand;
use crate::application::observer::ObserverId;
use crate::error::{CheckoutError, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Cloneable handle to a checkout running on its own task.
///
/// Every method only enqueues a command; the orchestrator applies commands
/// one at a time in the order they were sent. Dropping the last handle stops
/// the task.
#[derive(Clone)]
pub struct CheckoutHandle {
    commands: mpsc::UnboundedSender<CheckoutCommand>,
    state: watch::Receiver<CheckoutState>,
}

impl CheckoutHandle {
    /// Moves `orchestrator` onto a new task.
    pub fn spawn(mut orchestrator: CheckoutOrchestrator) -> (Self, JoinHandle<()>) {
        let (state_tx, state) = watch::channel(orchestrator.state().clone());
        orchestrator.observe(move |state: &CheckoutState| {
            state_tx.send_replace(state.clone());
        });
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(orchestrator.run(receiver));
        (Self { commands, state }, task)
    }

    fn send(&self, command: CheckoutCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CheckoutError::Stopped)
    }

    pub fn start(&self) -> Result<()> {
        self.send(CheckoutCommand::Start)
    }

    pub fn select(&self, payment_method_id: impl Into<String>) -> Result<()> {
        self.send(CheckoutCommand::Select(payment_method_id.into()))
    }

    pub fn start_payment(&self, payment_method_id: impl Into<String>) -> Result<()> {
        self.send(CheckoutCommand::StartPayment(payment_method_id.into()))
    }

    pub fn cancel(&self) -> Result<()> {
        self.send(CheckoutCommand::Cancel)
    }

    pub fn set_should_save_payment_method(&self, should_save: bool) -> Result<()> {
        self.send(CheckoutCommand::SetShouldSavePaymentMethod(should_save))
    }

    pub fn remove_customer_token(
        &self,
        customer_id: impl Into<String>,
        token_id: impl Into<String>,
    ) -> Result<()> {
        self.send(CheckoutCommand::RemoveCustomerToken {
            customer_id: customer_id.into(),
            token_id: token_id.into(),
        })
    }

    pub fn card(&self, command: CardCommand) -> Result<()> {
        self.send(CheckoutCommand::Card(command))
    }

    pub fn native_alternative_payment(&self, command: NativeAlternativePaymentCommand) -> Result<()> {
        self.send(CheckoutCommand::NativeAlternativePayment(command))
    }

    /// Registers an observer invoked synchronously on the checkout task for
    /// every state change.
    pub async fn observe(
        &self,
        observer: impl FnMut(&CheckoutState) + Send + 'static,
    ) -> Result<ObserverId> {
        let (reply, id) = oneshot::channel();
        self.send(CheckoutCommand::Observe(Box::new(observer), reply))?;
        id.await.map_err(|_| CheckoutError::Stopped)
    }

    pub fn unobserve(&self, id: ObserverId) -> Result<()> {
        self.send(CheckoutCommand::Unobserve(id))
    }

    /// Latest state published by the checkout.
    pub fn state(&self) -> CheckoutState {
        self.state.borrow().clone()
    }

    /// Waits until the checkout reaches a state matching `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&CheckoutState) -> bool,
    ) -> Result<CheckoutState> {
        let mut state = self.state.clone();
        let matched = state
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| CheckoutError::Stopped)?;
        Ok(matched.clone())
    }

    /// Waits for the checkout to finish.
    pub async fn outcome(&self) -> Result<()> {
        match self.wait_for(CheckoutState::is_sink).await? {
            CheckoutState::Failure(failure) => Err(CheckoutError::CheckoutFailed(failure)),
            _ => Ok(()),
        }
    }
}
