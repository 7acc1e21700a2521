use crate::application::card::{CardCollectionState, CardCommand, CardMessage};
use crate::application::native_apm::{
    NativeAlternativePaymentCommand, NativeAlternativePaymentMessage, NativeAlternativePaymentState,
};
use crate::application::observer::ObserverId;
use crate::domain::card::Card;
use crate::domain::invoice::Invoice;
use crate::domain::payment_method::PaymentMethod;
use crate::error::Failure;
use tokio::sync::oneshot;

/// Invoice snapshot together with the methods the customer can pick from.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutStarted {
    pub invoice: Invoice,
    /// Methods of `invoice` whose prerequisites are met on this device.
    pub payment_methods: Vec<PaymentMethod>,
    pub is_cancellable: bool,
    /// Explains why the checkout came back to the method list.
    pub recent_error_description: Option<String>,
}

impl CheckoutStarted {
    pub fn payment_method(&self, id: &str) -> Option<&PaymentMethod> {
        self.payment_methods.iter().find(|method| method.id() == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSelected {
    pub snapshot: CheckoutStarted,
    pub payment_method_id: String,
    /// `None` when the selected method can't be saved.
    pub should_save_payment_method: Option<bool>,
}

/// Progress of the method being paid with.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentStage {
    Card(CardCollectionState),
    NativeAlternativePayment(NativeAlternativePaymentState),
    /// Wallet, redirect and customer token payments run without customer
    /// input until the invoice is authorized.
    Authorizing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentProcessing {
    pub snapshot: CheckoutStarted,
    pub payment_method: PaymentMethod,
    pub stage: PaymentStage,
    pub should_save_payment_method: bool,
    pub is_cancellable: bool,
    /// False until the active method is able to accept customer input.
    pub is_ready: bool,
    pub is_awaiting_native_capture: bool,
    /// Sticky once the method attempted a step that may have changed the
    /// invoice on the server.
    pub should_invalidate_invoice: bool,
}

/// Method to apply once a restart completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSelection {
    pub payment_method_id: String,
    pub should_start: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Restarting {
    pub snapshot: CheckoutStarted,
    pub failed_payment_method_id: String,
    pub failure: Option<Failure>,
    pub pending: Option<PendingSelection>,
    pub invalidates_invoice: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutState {
    Idle,
    Starting,
    Started(CheckoutStarted),
    Selected(CheckoutSelected),
    PaymentProcessing(PaymentProcessing),
    Restarting(Restarting),
    Success,
    Failure(Failure),
}

impl CheckoutState {
    pub fn is_sink(&self) -> bool {
        matches!(self, Self::Success | Self::Failure(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Started(_) => "started",
            Self::Selected(_) => "selected",
            Self::PaymentProcessing(_) => "payment_processing",
            Self::Restarting(_) => "restarting",
            Self::Success => "success",
            Self::Failure(_) => "failure",
        }
    }

    /// Invoice snapshot the state currently refers to.
    pub fn snapshot(&self) -> Option<&CheckoutStarted> {
        match self {
            Self::Started(started) => Some(started),
            Self::Selected(selected) => Some(&selected.snapshot),
            Self::PaymentProcessing(processing) => Some(&processing.snapshot),
            Self::Restarting(restarting) => Some(&restarting.snapshot),
            _ => None,
        }
    }
}

pub type CheckoutObserver = Box<dyn FnMut(&CheckoutState) + Send>;

/// Operations accepted by a running checkout.
pub enum CheckoutCommand {
    Start,
    Select(String),
    StartPayment(String),
    Cancel,
    SetShouldSavePaymentMethod(bool),
    RemoveCustomerToken {
        customer_id: String,
        token_id: String,
    },
    Card(CardCommand),
    NativeAlternativePayment(NativeAlternativePaymentCommand),
    Observe(CheckoutObserver, oneshot::Sender<ObserverId>),
    Unobserve(ObserverId),
}

/// Results of background work, tagged with the payment attempt that started
/// it so late results of an abandoned attempt can be discarded.
#[derive(Debug)]
pub enum CheckoutMessage {
    InvoiceFetched(Result<Invoice, Failure>),
    Card {
        attempt: u64,
        message: CardMessage,
    },
    CardCompleted {
        attempt: u64,
        result: Result<Card, Failure>,
    },
    NativeAlternativePayment {
        attempt: u64,
        message: NativeAlternativePaymentMessage,
    },
    NativeAlternativePaymentCompleted {
        attempt: u64,
        result: Result<(), Failure>,
    },
    /// The active method is about to run a step that may change the invoice.
    PaymentMutated {
        attempt: u64,
    },
    PaymentFinished {
        attempt: u64,
        result: Result<(), Failure>,
    },
    /// Replacement invoice of a restart, `None` when the delegate had none.
    RestartResolved {
        attempt: u64,
        result: Result<Option<Invoice>, Failure>,
    },
}

impl CheckoutMessage {
    /// Attempt the message belongs to; `None` for checkout-wide messages.
    pub fn attempt(&self) -> Option<u64> {
        match self {
            Self::InvoiceFetched(_) => None,
            Self::Card { attempt, .. }
            | Self::CardCompleted { attempt, .. }
            | Self::NativeAlternativePayment { attempt, .. }
            | Self::NativeAlternativePaymentCompleted { attempt, .. }
            | Self::PaymentMutated { attempt }
            | Self::PaymentFinished { attempt, .. }
            | Self::RestartResolved { attempt, .. } => Some(*attempt),
        }
    }
}
