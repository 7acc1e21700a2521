//! Application layer containing the checkout state machines.
//!
//! [`checkout::CheckoutOrchestrator`] is the primary entry point. It owns the
//! card and native alternative payment sub-flows of the active payment
//! attempt. Every state machine follows an Actor-like pattern with `tokio`
//! channels: state is only mutated through `&mut self`, and background work
//! reports back through a mailbox that the owner drains in order.

pub mod card;
pub mod checkout;
pub mod debounce;
pub mod formatting;
pub mod native_apm;
pub mod observer;
pub mod restart_policy;
pub mod validation;
