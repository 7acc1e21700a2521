use crate::application::checkout::{CheckoutState, PaymentStage};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One line of output per checkout state.
#[derive(Debug, Serialize, PartialEq)]
pub struct Transition<'a> {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payment_methods: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a> From<&'a CheckoutState> for Transition<'a> {
    fn from(state: &'a CheckoutState) -> Self {
        let snapshot = state.snapshot();
        let mut transition = Transition {
            state: state.name(),
            invoice_id: snapshot.map(|snapshot| snapshot.invoice.id.as_str()),
            payment_methods: snapshot
                .map(|snapshot| snapshot.payment_methods.iter().map(|m| m.id()).collect())
                .unwrap_or_default(),
            payment_method_id: None,
            stage: None,
            error: snapshot.and_then(|snapshot| snapshot.recent_error_description.clone()),
        };
        match state {
            CheckoutState::Selected(selected) => {
                transition.payment_method_id = Some(selected.payment_method_id.as_str());
            }
            CheckoutState::PaymentProcessing(processing) => {
                transition.payment_method_id = Some(processing.payment_method.id());
                transition.stage = Some(match &processing.stage {
                    PaymentStage::Card(card) => card.name(),
                    PaymentStage::NativeAlternativePayment(native) => native.name(),
                    PaymentStage::Authorizing => "authorizing",
                });
            }
            CheckoutState::Restarting(restarting) => {
                transition.payment_method_id = Some(restarting.failed_payment_method_id.as_str());
                transition.error = restarting.failure.as_ref().map(ToString::to_string);
            }
            CheckoutState::Failure(failure) => transition.error = Some(failure.to_string()),
            _ => {}
        }
        transition
    }
}

/// Writes checkout transitions as JSON lines.
pub struct TransitionWriter<W: Write> {
    writer: W,
}

impl<W: Write> TransitionWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// # Arguments
    ///
    /// * `states` - States in the order the checkout went through them.
    pub fn write_transitions<'a>(
        &mut self,
        states: impl IntoIterator<Item = &'a CheckoutState>,
    ) -> Result<()> {
        for state in states {
            serde_json::to_writer(&mut self.writer, &Transition::from(state))?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Failure;

    #[test]
    fn test_writes_one_line_per_state() {
        let states = vec![
            CheckoutState::Starting,
            CheckoutState::Failure(Failure::cancelled()),
        ];
        let mut output = Vec::new();
        TransitionWriter::new(&mut output)
            .write_transitions(&states)
            .unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"state":"starting"}"#);
        assert!(lines[1].starts_with(r#"{"state":"failure","error":"processout-mobile.cancelled"#));
    }
}
