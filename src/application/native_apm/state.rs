use crate::domain::parameter::{
    NativePaymentElement, NativePaymentRedirect, NativePaymentResponse, Parameter,
};
use crate::error::Failure;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct NativeAlternativePaymentStarted {
    pub elements: Vec<NativePaymentElement>,
    /// Flattened form parameters keyed by specification key.
    pub parameters: BTreeMap<String, Parameter>,
    pub is_cancellable: bool,
}

impl NativeAlternativePaymentStarted {
    pub fn has_errors(&self) -> bool {
        self.parameters
            .values()
            .any(|parameter| parameter.value.error.is_some())
    }

    pub fn values(&self) -> HashMap<String, String> {
        self.parameters
            .iter()
            .filter_map(|(key, parameter)| {
                parameter
                    .value
                    .value
                    .as_ref()
                    .filter(|value| !value.is_empty())
                    .map(|value| (key.clone(), value.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwaitingCompletion {
    pub elements: Vec<NativePaymentElement>,
    pub is_cancellable: bool,
    /// Set once the wait exceeds the configured progress threshold.
    pub is_delayed: bool,
    /// True until the customer confirmed the payment; capture polling only
    /// starts afterwards.
    pub should_confirm_payment: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NativeAlternativePaymentState {
    Idle,
    Starting,
    Started(NativeAlternativePaymentStarted),
    Submitting(NativeAlternativePaymentStarted),
    AwaitingRedirect {
        redirect: NativePaymentRedirect,
        is_cancellable: bool,
    },
    Redirecting {
        redirect: NativePaymentRedirect,
    },
    AwaitingCompletion(AwaitingCompletion),
    Completed,
    Failure(Failure),
}

impl NativeAlternativePaymentState {
    pub fn is_sink(&self) -> bool {
        matches!(self, Self::Completed | Self::Failure(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Started(_) => "started",
            Self::Submitting(_) => "submitting",
            Self::AwaitingRedirect { .. } => "awaiting_redirect",
            Self::Redirecting { .. } => "redirecting",
            Self::AwaitingCompletion(_) => "awaiting_completion",
            Self::Completed => "completed",
            Self::Failure(_) => "failure",
        }
    }

    pub fn is_cancellable(&self) -> bool {
        match self {
            Self::Idle | Self::Starting => true,
            Self::Started(started) | Self::Submitting(started) => started.is_cancellable,
            Self::AwaitingRedirect { is_cancellable, .. } => *is_cancellable,
            Self::Redirecting { .. } => false,
            Self::AwaitingCompletion(awaiting) => awaiting.is_cancellable,
            Self::Completed | Self::Failure(_) => false,
        }
    }
}

/// A server step together with the caller-provided default values for it.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    pub response: NativePaymentResponse,
    pub default_values: HashMap<String, String>,
}

/// Results of background work, applied through
/// [`super::NativeAlternativePaymentSubflow::handle`].
#[derive(Debug)]
pub enum NativeAlternativePaymentMessage {
    Started(Result<ResolvedStep, Failure>),
    Submitted(Result<ResolvedStep, Failure>),
    Redirected(Result<(), Failure>),
    Captured(Result<(), Failure>),
    DelayElapsed,
}

/// Caller operations on an active native alternative payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeAlternativePaymentCommand {
    UpdateValue { key: String, value: String },
    Submit,
    ConfirmRedirect,
    ConfirmPayment,
}
