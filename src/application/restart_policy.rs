use crate::error::{FailureCode, FailureKind};

/// Decides whether a failed payment attempt must continue on a fresh invoice.
///
/// Failures in the `internal`, `validation`, `not-found`, `generic` and
/// `unknown` classes always invalidate the invoice. Cancellation never does.
/// Anything else reuses the invoice unless the failed method already
/// attempted a step that may have mutated server-side state.
pub fn should_invalidate_invoice(code: &FailureCode, method_mutated_server_state: bool) -> bool {
    match code.kind() {
        FailureKind::Cancelled => false,
        FailureKind::Internal
        | FailureKind::Validation
        | FailureKind::NotFound
        | FailureKind::Generic
        | FailureKind::Unknown => true,
        FailureKind::Timeout
        | FailureKind::NetworkUnreachable
        | FailureKind::Authentication
        | FailureKind::Server => method_mutated_server_state,
    }
}

/// Restart triggered by a method switch rather than by a failure.
pub fn should_invalidate_on_switch(method_mutated_server_state: bool) -> bool {
    method_mutated_server_state
}
