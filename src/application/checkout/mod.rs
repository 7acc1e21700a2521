//! Checkout orchestration: invoice lifecycle, payment method selection and
//! restarts across payment attempts.

pub mod handle;
pub mod orchestrator;
mod payment;
pub mod state;

pub use handle::CheckoutHandle;
pub use orchestrator::{CheckoutCompletion, CheckoutOrchestrator, CheckoutServices};
pub use state::{
    CheckoutCommand, CheckoutMessage, CheckoutObserver, CheckoutSelected, CheckoutStarted,
    CheckoutState, PaymentProcessing, PaymentStage, PendingSelection, Restarting,
};
