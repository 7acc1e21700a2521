//! Native alternative payment sub-flow: server-driven parameter collection,
//! submission and capture polling.

pub mod state;
pub mod subflow;

pub use state::{
    AwaitingCompletion, NativeAlternativePaymentCommand, NativeAlternativePaymentMessage,
    NativeAlternativePaymentStarted, NativeAlternativePaymentState,
};
pub use subflow::{
    NativeAlternativePaymentDelegate, NativeAlternativePaymentServices,
    NativeAlternativePaymentSubflow, NativeCompletion,
};
